//! Subscription file parsing.
//!
//! One subscription per line:
//!
//! ```text
//! [filter:<command>:]<url> ["<display name>"]
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use std::path::{Path, PathBuf};

use thiserror::Error;

const FILTER_PREFIX: &str = "filter:";

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("Failed to read subscription file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One subscription: where to fetch, how to pre-process, what to call it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedJob {
    pub url: String,
    pub filter_command: Option<String>,
    pub display_name: Option<String>,
}

impl FeedJob {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filter_command: None,
            display_name: None,
        }
    }

    pub fn with_filter(mut self, command: impl Into<String>) -> Self {
        self.filter_command = Some(command.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Reads and parses a subscription file, preserving line order.
///
/// # Errors
///
/// Returns [`SubscriptionError::Io`] if the file cannot be read.
pub async fn load_jobs(path: &Path) -> Result<Vec<FeedJob>, SubscriptionError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SubscriptionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let jobs = parse_jobs(&text);
    tracing::debug!(path = %path.display(), count = jobs.len(), "Loaded subscriptions");
    Ok(jobs)
}

pub fn parse_jobs(text: &str) -> Vec<FeedJob> {
    text.lines().filter_map(parse_line).collect()
}

/// Parses one subscription line. Returns `None` for blank and comment lines.
pub fn parse_line(line: &str) -> Option<FeedJob> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (rest, display_name) = split_display_name(line);
    let (filter_command, url) = split_filter(rest);
    if url.is_empty() {
        tracing::warn!(line = %line, "Skipping subscription without a URL");
        return None;
    }

    Some(FeedJob {
        url: url.to_string(),
        filter_command,
        display_name,
    })
}

/// Splits a trailing `"name"` token off the line.
///
/// The name starts at the first `"` that follows whitespace, so quotes
/// inside a filter command or URL are left alone. `""` means no override.
fn split_display_name(line: &str) -> (&str, Option<String>) {
    if !line.ends_with('"') || line.len() < 2 {
        return (line, None);
    }
    let body = &line[..line.len() - 1];
    let open = body
        .char_indices()
        .zip(body.chars().skip(1))
        .find(|((_, c), next)| c.is_whitespace() && *next == '"')
        .map(|((i, c), _)| i + c.len_utf8());

    match open {
        Some(start) => {
            let name = &body[start + 1..];
            let rest = line[..start].trim_end();
            (rest, Some(name.to_string()).filter(|n| !n.trim().is_empty()))
        }
        None => (line, None),
    }
}

/// Splits `filter:<command>:<url>` into command and URL.
///
/// The command ends at the first `:` followed by a URL scheme, so commands
/// may contain colons of their own.
fn split_filter(rest: &str) -> (Option<String>, &str) {
    let Some(tail) = rest.strip_prefix(FILTER_PREFIX) else {
        return (None, rest);
    };

    let boundary = tail
        .match_indices(':')
        .map(|(i, _)| i)
        .find(|&i| is_url_start(&tail[i + 1..]));

    match boundary {
        Some(i) => {
            let command = tail[..i].trim();
            let url = tail[i + 1..].trim();
            (Some(command.to_string()).filter(|c| !c.is_empty()), url)
        }
        None => {
            tracing::warn!(line = %rest, "Filter prefix without a URL; treating line as a plain URL");
            (None, rest)
        }
    }
}

/// True when `s` starts with `<alpha>[alnum+.-]*://`.
fn is_url_start(s: &str) -> bool {
    let Some(scheme_end) = s.find("://") else {
        return false;
    };
    let scheme = &s[..scheme_end];
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_plain_url() {
        assert_eq!(
            parse_line("https://example.com/feed.xml"),
            Some(FeedJob::new("https://example.com/feed.xml"))
        );
    }

    #[test]
    fn test_display_name() {
        assert_eq!(
            parse_line("https://example.com/feed.xml \"Example News\""),
            Some(FeedJob::new("https://example.com/feed.xml").with_display_name("Example News"))
        );
    }

    #[test]
    fn test_empty_display_name_is_no_override() {
        assert_eq!(
            parse_line("https://example.com/feed.xml \"\""),
            Some(FeedJob::new("https://example.com/feed.xml"))
        );
    }

    #[test]
    fn test_filter_command() {
        assert_eq!(
            parse_line("filter:json2rss --pretty:https://example.com/api.json"),
            Some(FeedJob::new("https://example.com/api.json").with_filter("json2rss --pretty"))
        );
    }

    #[test]
    fn test_filter_command_containing_colons() {
        let job = parse_line("filter:sed 's/a:b/c/':http://localhost:8080/rss \"Local\"").unwrap();
        assert_eq!(job.filter_command.as_deref(), Some("sed 's/a:b/c/'"));
        assert_eq!(job.url, "http://localhost:8080/rss");
        assert_eq!(job.display_name.as_deref(), Some("Local"));
    }

    #[test]
    fn test_blank_and_comment_lines_skipped() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("   \t"), None);
        assert_eq!(parse_line("# https://example.com/disabled"), None);
    }

    #[test]
    fn test_quote_inside_url_is_not_a_name() {
        let job = parse_line("https://example.com/q=\"x\"").unwrap();
        assert_eq!(job.url, "https://example.com/q=\"x\"");
        assert_eq!(job.display_name, None);
    }

    #[test]
    fn test_parse_jobs_preserves_order() {
        let text = "https://a.example/rss\n\n# skip\nhttps://b.example/atom \"B\"\n  https://c.example/  \n";
        let urls: Vec<String> = parse_jobs(text).into_iter().map(|j| j.url).collect();
        assert_eq!(
            urls,
            vec![
                "https://a.example/rss",
                "https://b.example/atom",
                "https://c.example/"
            ]
        );
    }

    #[test]
    fn test_is_url_start() {
        assert!(is_url_start("https://x"));
        assert!(is_url_start("svn+ssh://x"));
        assert!(!is_url_start("8080/rss"));
        assert!(!is_url_start("no scheme here"));
        assert!(!is_url_start("://x"));
    }

    #[tokio::test]
    async fn test_load_jobs_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_jobs(&dir.path().join("urls")).await.unwrap_err();
        assert!(matches!(err, SubscriptionError::Io { .. }));
    }

    #[tokio::test]
    async fn test_load_jobs_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls");
        std::fs::write(&path, "https://a.example/rss \"A\"\nfilter:cat:https://b.example/rss\n")
            .unwrap();

        let jobs = load_jobs(&path).await.unwrap();
        assert_eq!(
            jobs,
            vec![
                FeedJob::new("https://a.example/rss").with_display_name("A"),
                FeedJob::new("https://b.example/rss").with_filter("cat"),
            ]
        );
    }

    proptest! {
        #[test]
        fn prop_line_fields_round_trip(
            host in "[a-z]{1,12}",
            path in "[a-z0-9/]{0,16}",
            command in proptest::option::of("[a-z][a-z0-9 :-]{0,12}[a-z0-9]"),
            name in proptest::option::of("[A-Za-z][A-Za-z0-9 ]{0,12}[A-Za-z0-9]"),
        ) {
            let url = format!("https://{}.example/{}", host, path);
            let mut line = String::new();
            if let Some(cmd) = &command {
                line.push_str(&format!("filter:{}:", cmd));
            }
            line.push_str(&url);
            if let Some(n) = &name {
                line.push_str(&format!(" \"{}\"", n));
            }

            let job = parse_line(&line).unwrap();
            prop_assert_eq!(job.url, url);
            prop_assert_eq!(job.filter_command, command);
            prop_assert_eq!(job.display_name, name);
        }

        #[test]
        fn prop_never_panics(line in "\\PC{0,64}") {
            let _ = parse_line(&line);
        }
    }
}
