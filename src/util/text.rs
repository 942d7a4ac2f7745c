use std::borrow::Cow;

use unicode_width::UnicodeWidthChar;

/// Ellipsis string used for truncation
const ELLIPSIS: &str = "...";
/// Display width of the ellipsis (3 columns for ASCII "...")
const ELLIPSIS_WIDTH: usize = 3;

/// Truncates a string to fit within a maximum display width.
///
/// If truncation is necessary, appends "..." to indicate text was cut off.
/// Width is measured in terminal columns, so CJK characters and emoji count
/// as two.
///
/// Widths of three columns or less have no room for the ellipsis; the result
/// is then just the characters that fit.
///
/// # Examples
///
/// ```
/// use gleaner::util::truncate_to_width;
///
/// assert_eq!(truncate_to_width("Short", 10), "Short");
/// assert_eq!(truncate_to_width("Hello World", 8), "Hello...");
/// assert_eq!(truncate_to_width("Test", 2), "Te");
/// ```
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    let budget = if max_width <= ELLIPSIS_WIDTH {
        max_width
    } else {
        max_width - ELLIPSIS_WIDTH
    };

    let mut width = 0;
    // Byte offset of the last char that still fits inside `budget`
    let mut cut = 0;
    for (idx, c) in s.char_indices() {
        let w = c.width().unwrap_or(0);
        if width + w > max_width {
            if max_width <= ELLIPSIS_WIDTH {
                return Cow::Owned(s[..cut].to_string());
            }
            return Cow::Owned(format!("{}{}", &s[..cut], ELLIPSIS));
        }
        width += w;
        if width <= budget {
            cut = idx + c.len_utf8();
        }
    }

    Cow::Borrowed(s)
}

fn is_stripped_control(b: u8) -> bool {
    b == 0x7f || (b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r')
}

/// SEC-001: Strip terminal control characters and ANSI escape sequences from text.
///
/// Feed titles and bodies are attacker-controlled; a display layer that writes
/// them to a terminal must never receive raw escape sequences.
///
/// Strips:
/// - ASCII control chars except tab, newline and carriage return, plus DEL
/// - ANSI CSI sequences: `\x1b[` ... (terminal byte 0x40-0x7E)
/// - ANSI OSC sequences: `\x1b]` ... (until BEL or ST `\x1b\\`)
/// - Bare ESC not followed by `[` or `]`
///
/// Returns `Cow::Borrowed` when there is nothing to strip.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    if !bytes.iter().any(|&b| b == 0x1b || is_stripped_control(b)) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut run_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b != 0x1b && !is_stripped_control(b) {
            i += 1;
            continue;
        }

        // Control bytes are ASCII, so the pending run ends on a char boundary
        out.push_str(&s[run_start..i]);

        i += 1;
        if b == 0x1b {
            match bytes.get(i) {
                Some(b'[') => {
                    i += 1;
                    while let Some(&c) = bytes.get(i) {
                        i += 1;
                        if (0x40..=0x7e).contains(&c) {
                            break;
                        }
                    }
                }
                Some(b']') => {
                    i += 1;
                    while let Some(&c) = bytes.get(i) {
                        if c == 0x07 {
                            i += 1;
                            break;
                        }
                        if c == 0x1b && bytes.get(i + 1) == Some(&b'\\') {
                            i += 2;
                            break;
                        }
                        i += 1;
                    }
                }
                _ => {}
            }
        }
        run_start = i;
    }

    out.push_str(&s[run_start.min(bytes.len())..]);
    Cow::Owned(out)
}
