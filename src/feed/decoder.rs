//! Raw bytes to [`Feed`]: optional filter stage, charset detection, then an
//! RSS attempt followed by an Atom attempt.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use encoding_rs::{Encoding, UTF_8};
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

use super::atom::AtomFeed;
use super::filter::{CommandFilter, FeedFilter, FilterError};
use super::model::{origin_of, Feed, FeedKind};
use super::rss::RssFeed;
use super::subscription::FeedJob;
use super::xml;

/// Whether the `<read>`/`<displayName>` snapshot extensions are honoured.
///
/// Freshly fetched documents are always decoded with [`ReadState::Ignore`];
/// read state only enters a fresh feed through reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Ignore,
    Restore,
}

/// Why one schema attempt rejected a document.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The document element belongs to another schema.
    #[error("root element is <{found}>, expected <{expected}>")]
    RootMismatch {
        expected: &'static str,
        found: String,
    },
    /// The bytes are not XML at all (no document element could be read).
    #[error("not an XML document: {0}")]
    NotXml(String),
    /// The root matched but the document is broken inside it.
    #[error("malformed {schema} document: {message}")]
    Malformed { schema: FeedKind, message: String },
    /// The prolog declares an encoding we cannot decode.
    #[error("unsupported character encoding: {0}")]
    UnsupportedEncoding(String),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Filter failed: {0}")]
    Filter(#[from] FilterError),
    /// Neither schema accepted the document. Carries the RSS attempt's error.
    #[error("Unrecognized feed format: {0}")]
    UnrecognizedFormat(#[source] SchemaError),
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Decodes fetched bytes for a job, running its filter command first.
#[derive(Clone)]
pub struct Decoder {
    filter: Arc<dyn FeedFilter>,
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder").finish_non_exhaustive()
    }
}

impl Decoder {
    pub fn new(filter: Arc<dyn FeedFilter>) -> Self {
        Self { filter }
    }

    /// A decoder that runs filter commands through the platform shell.
    pub fn with_command_filter(timeout: Duration) -> Self {
        Self::new(Arc::new(CommandFilter::new(timeout)))
    }

    /// Decodes `raw` into a feed for `job`.
    ///
    /// All items come back unread. The job's display name, if any, becomes
    /// the feed's title override.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::Filter`] if the filter command fails
    /// - [`DecodeError::UnrecognizedFormat`] if neither RSS nor Atom accepts the bytes
    /// - [`DecodeError::InvalidUrl`] if `job.url` cannot be parsed
    pub async fn decode(&self, raw: Vec<u8>, job: &FeedJob) -> Result<Feed, DecodeError> {
        let bytes = match &job.filter_command {
            Some(command) => {
                tracing::debug!(url = %job.url, command = %command, "Running feed filter");
                self.filter.apply(command, raw).await?
            }
            None => raw,
        };

        let mut feed = parse_feed(&bytes, &job.url, ReadState::Ignore)?;
        if let Some(name) = &job.display_name {
            feed.set_title_override(Some(name.clone()));
        }
        Ok(feed)
    }
}

/// Parses a feed document fetched from `url`.
///
/// RSS is tried first; Atom only when RSS fails. When both fail the RSS
/// error is returned, since RSS is the primary schema.
pub fn parse_feed(bytes: &[u8], url: &str, read_state: ReadState) -> Result<Feed, DecodeError> {
    let origin = origin_of(url)?;
    let text = transcode(bytes).map_err(DecodeError::UnrecognizedFormat)?;

    let rss_error = match parse_schema(&text, FeedKind::Rss, url, &origin, read_state) {
        Ok(feed) => return Ok(feed),
        Err(e) => e,
    };

    match parse_schema(&text, FeedKind::Atom, url, &origin, read_state) {
        Ok(feed) => Ok(feed),
        Err(atom_error) => {
            tracing::debug!(
                url = %url,
                rss_error = %rss_error,
                atom_error = %atom_error,
                "Document matched neither RSS nor Atom"
            );
            Err(DecodeError::UnrecognizedFormat(rss_error))
        }
    }
}

fn parse_schema(
    text: &str,
    kind: FeedKind,
    url: &str,
    origin: &str,
    read_state: ReadState,
) -> Result<Feed, SchemaError> {
    let expected = match kind {
        FeedKind::Rss => "rss",
        FeedKind::Atom => "feed",
    };

    let root = match xml::parse_document(text) {
        Ok(root) => root,
        Err(e) => {
            return Err(match e.root {
                Some(found) if found == expected => SchemaError::Malformed {
                    schema: kind,
                    message: e.message,
                },
                Some(found) => SchemaError::RootMismatch { expected, found },
                None => SchemaError::NotXml(e.message),
            })
        }
    };

    if root.local != expected {
        return Err(SchemaError::RootMismatch {
            expected,
            found: root.qualified_name(),
        });
    }

    match kind {
        FeedKind::Rss => RssFeed::from_root(&root, url, origin, read_state).map(Feed::Rss),
        FeedKind::Atom => AtomFeed::from_root(&root, url, origin, read_state).map(Feed::Atom),
    }
}

/// Converts document bytes to UTF-8.
///
/// A byte-order mark wins, then the `encoding` of the XML declaration, then
/// UTF-8. Invalid sequences become U+FFFD rather than failing the document.
pub(crate) fn transcode(bytes: &[u8]) -> Result<Cow<'_, str>, SchemaError> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return Ok(text);
    }

    let encoding = match declared_encoding(bytes) {
        Some(label) => Encoding::for_label(label.as_bytes())
            // A readable prolog claiming UTF-16 without a BOM is really ASCII-compatible
            .map(Encoding::output_encoding)
            .ok_or(SchemaError::UnsupportedEncoding(label))?,
        None => UTF_8,
    };

    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!(encoding = encoding.name(), "Replaced malformed byte sequences");
    }
    Ok(text)
}

/// Reads the `encoding` pseudo-attribute of a leading XML declaration.
fn declared_encoding(bytes: &[u8]) -> Option<String> {
    let mut reader = Reader::from_reader(bytes);
    loop {
        match reader.read_event() {
            Ok(Event::Decl(decl)) => {
                let label = decl.encoding()?.ok()?;
                return Some(String::from_utf8_lossy(&label).trim().to_string());
            }
            Ok(Event::Text(t)) if t.iter().all(u8::is_ascii_whitespace) => continue,
            _ => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedItem;
    use futures::future::BoxFuture;
    use futures::FutureExt;

    const URL: &str = "https://example.com/feed.xml";

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Example</title><link>https://example.com/</link><description>d</description>
  <item><title>One</title><link>/story/1</link><description>Body</description></item>
  <item><title>Two</title><link>https://other.com/x</link></item>
</channel></rss>"#;

    const ATOM: &str = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Example</title><id>urn:x</id>
  <entry><title>A</title><link href="/a" rel="alternate"/><id>urn:a</id></entry>
</feed>"#;

    /// Stand-in for a JSON-to-RSS bridge: ignores its input.
    struct FixedOutput(&'static str);

    impl FeedFilter for FixedOutput {
        fn apply<'a>(
            &'a self,
            _command: &'a str,
            _input: Vec<u8>,
        ) -> BoxFuture<'a, Result<Vec<u8>, FilterError>> {
            async move { Ok(self.0.as_bytes().to_vec()) }.boxed()
        }
    }

    struct AlwaysFails;

    impl FeedFilter for AlwaysFails {
        fn apply<'a>(
            &'a self,
            command: &'a str,
            _input: Vec<u8>,
        ) -> BoxFuture<'a, Result<Vec<u8>, FilterError>> {
            async move {
                Err(FilterError::Timeout {
                    command: command.to_string(),
                    timeout: Duration::from_millis(1),
                })
            }
            .boxed()
        }
    }

    #[test]
    fn test_rss_document_decodes_as_rss() {
        let feed = parse_feed(RSS.as_bytes(), URL, ReadState::Ignore).unwrap();
        assert_eq!(feed.kind(), FeedKind::Rss);
        assert_eq!(feed.title(), "Example");
        assert_eq!(feed.len(), 2);
    }

    #[test]
    fn test_atom_document_falls_back_to_atom() {
        let feed = parse_feed(ATOM.as_bytes(), URL, ReadState::Ignore).unwrap();
        assert_eq!(feed.kind(), FeedKind::Atom);
        assert_eq!(feed.items()[0].link(), "https://example.com/a");
    }

    #[test]
    fn test_relative_links_resolved_against_job_origin() {
        let feed = parse_feed(RSS.as_bytes(), URL, ReadState::Ignore).unwrap();
        let items = feed.items();
        assert_eq!(items[0].link(), "https://example.com/story/1");
        assert_eq!(items[1].link(), "https://other.com/x");
    }

    #[test]
    fn test_unrecognized_root_wraps_rss_error() {
        let err = parse_feed(b"<html><body>nope</body></html>", URL, ReadState::Ignore)
            .unwrap_err();
        match err {
            DecodeError::UnrecognizedFormat(SchemaError::RootMismatch { expected, found }) => {
                assert_eq!(expected, "rss");
                assert_eq!(found, "html");
            }
            e => panic!("Expected RootMismatch, got {:?}", e),
        }
    }

    #[test]
    fn test_garbage_is_unrecognized() {
        let err = parse_feed(b"{\"items\": []}", URL, ReadState::Ignore).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnrecognizedFormat(SchemaError::NotXml(_))
        ));
    }

    #[test]
    fn test_rss_without_channel_is_empty_feed() {
        let feed = parse_feed(b"<rss version=\"2.0\"></rss>", URL, ReadState::Ignore).unwrap();
        assert_eq!(feed.kind(), FeedKind::Rss);
        assert_eq!(feed.len(), 0);
    }

    #[test]
    fn test_broken_rss_is_malformed() {
        let err = parse_feed(b"<rss><channel><item></channel></rss>", URL, ReadState::Ignore)
            .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnrecognizedFormat(SchemaError::Malformed {
                schema: FeedKind::Rss,
                ..
            })
        ));
    }

    #[test]
    fn test_declared_latin1_encoding_honoured() {
        let mut doc = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n<rss><channel><title>Caf".to_vec();
        doc.push(0xE9); // é in Latin-1
        doc.extend_from_slice(b"</title></channel></rss>");

        let feed = parse_feed(&doc, URL, ReadState::Ignore).unwrap();
        assert_eq!(feed.title(), "Café");
    }

    #[test]
    fn test_utf16_bom_detected() {
        let doc = "<rss><channel><title>Wide</title></channel></rss>";
        let mut bytes = vec![0xFF, 0xFE];
        for unit in doc.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let feed = parse_feed(&bytes, URL, ReadState::Ignore).unwrap();
        assert_eq!(feed.title(), "Wide");
    }

    #[test]
    fn test_unknown_encoding_rejected() {
        let doc = b"<?xml version=\"1.0\" encoding=\"x-made-up\"?><rss><channel/></rss>";
        let err = parse_feed(doc, URL, ReadState::Ignore).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnrecognizedFormat(SchemaError::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn test_invalid_job_url() {
        let err = parse_feed(RSS.as_bytes(), "not a url", ReadState::Ignore).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_decode_applies_display_name() {
        let decoder = Decoder::with_command_filter(Duration::from_secs(5));
        let job = FeedJob::new(URL).with_display_name("Renamed");
        let feed = decoder.decode(RSS.as_bytes().to_vec(), &job).await.unwrap();
        assert_eq!(feed.title(), "Renamed");
        assert_eq!(feed.title_override(), Some("Renamed"));
    }

    #[tokio::test]
    async fn test_decode_never_sets_read_flags() {
        let doc = RSS.replace("<title>One</title>", "<title>One</title><read>true</read>");
        let decoder = Decoder::with_command_filter(Duration::from_secs(5));
        let feed = decoder
            .decode(doc.into_bytes(), &FeedJob::new(URL))
            .await
            .unwrap();
        assert_eq!(feed.unread_count(), 2);
    }

    #[tokio::test]
    async fn test_decode_runs_filter_before_parsing() {
        let decoder = Decoder::new(Arc::new(FixedOutput(RSS)));
        let job = FeedJob::new(URL).with_filter("json2rss");
        let feed = decoder
            .decode(b"{\"not\": \"xml\"}".to_vec(), &job)
            .await
            .unwrap();
        assert_eq!(feed.kind(), FeedKind::Rss);
    }

    #[tokio::test]
    async fn test_filter_not_used_without_command() {
        let decoder = Decoder::new(Arc::new(AlwaysFails));
        let feed = decoder
            .decode(RSS.as_bytes().to_vec(), &FeedJob::new(URL))
            .await
            .unwrap();
        assert_eq!(feed.len(), 2);
    }

    #[tokio::test]
    async fn test_filter_failure_aborts_decode() {
        let decoder = Decoder::new(Arc::new(AlwaysFails));
        let job = FeedJob::new(URL).with_filter("slow");
        let err = decoder
            .decode(RSS.as_bytes().to_vec(), &job)
            .await
            .unwrap_err();
        assert!(matches!(err, DecodeError::Filter(FilterError::Timeout { .. })));
    }
}
