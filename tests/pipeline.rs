//! Integration tests for the ingestion pipeline across runs:
//! subscribe, fetch, mark read, persist, re-fetch.
//!
//! Each test serves feeds from its own mock HTTP server and keeps snapshots
//! in its own temporary directory.

use std::time::Duration;

use gleaner::feed::{parse_jobs, Decoder, FeedItem, FeedJob, FetchError, Fetcher};
use gleaner::session::{Session, Slot};
use gleaner::storage::SnapshotStore;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RSS_V1: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel>
  <title>Daily News</title>
  <link>https://news.example/</link>
  <description>Headlines</description>
  <item><title>Storm warning</title><link>/storm</link><description>&lt;p&gt;Batten down&lt;/p&gt;</description></item>
  <item><title>Markets rally</title><link>/markets</link><description>Up again</description></item>
</channel></rss>"#;

/// Next day: one new story on top, one dropped, one kept verbatim.
const RSS_V2: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel>
  <title>Daily News</title>
  <link>https://news.example/</link>
  <description>Headlines</description>
  <item><title>Election results</title><link>/election</link><description>Counted</description></item>
  <item><title>Markets rally</title><link>/markets</link><description>Up again</description></item>
</channel></rss>"#;

const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Engineering Blog</title>
  <id>urn:blog</id>
  <link rel="self" href="/atom.xml"/>
  <link rel="alternate" href="/blog"/>
  <entry>
    <title>Shipping it</title>
    <id>urn:blog:1</id>
    <link rel="alternate" href="/posts/1"/>
    <summary>Short</summary>
    <content type="html">&lt;p&gt;The long version&lt;/p&gt;</content>
  </entry>
</feed>"#;

fn fetcher(dir: &TempDir) -> Fetcher {
    Fetcher::new(
        reqwest::Client::new(),
        Decoder::with_command_filter(Duration::from_secs(10)),
        SnapshotStore::new(dir.path()),
    )
    .with_fetch_timeout(Duration::from_secs(5))
}

async fn mount(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn run_session(fetcher: &Fetcher, jobs: &[FeedJob]) -> Session {
    let mut session = Session::new(jobs);
    let mut run = fetcher.spawn_all(jobs.to_vec());
    while let Some(result) = run.next().await {
        session.place(result);
    }
    session
}

fn read_flags(session: &Session, feed: usize) -> Vec<bool> {
    session
        .feed(feed)
        .unwrap()
        .items()
        .iter()
        .map(|i| i.is_read())
        .collect()
}

// ============================================================================
// Cross-run read state
// ============================================================================

#[tokio::test]
async fn test_read_state_survives_refetch() {
    let server = MockServer::start().await;
    mount(&server, "/rss", RSS_V1).await;

    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher(&dir);
    let jobs = vec![FeedJob::new(format!("{}/rss", server.uri()))];

    // First run: read the markets story, then quit
    let mut first = run_session(&fetcher, &jobs).await;
    assert!(first.set_read(0, 1, true));
    let report = first.persist(fetcher.snapshots()).await;
    assert_eq!(report.saved, 1);

    // Second run: the feed has moved on
    server.reset().await;
    mount(&server, "/rss", RSS_V2).await;
    let second = run_session(&fetcher, &jobs).await;

    let feed = second.feed(0).unwrap();
    let titles: Vec<&str> = feed.items().iter().map(|i| i.title()).collect();
    assert_eq!(titles, vec!["Election results", "Markets rally"]);
    assert_eq!(read_flags(&second, 0), vec![false, true]);
    assert_eq!(feed.unread_count(), 1);
}

#[tokio::test]
async fn test_mark_all_read_then_unchanged_feed_stays_read() {
    let server = MockServer::start().await;
    mount(&server, "/atom", ATOM).await;

    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher(&dir);
    let jobs = vec![FeedJob::new(format!("{}/atom", server.uri()))];

    let mut first = run_session(&fetcher, &jobs).await;
    first.mark_all_read();
    first.persist(fetcher.snapshots()).await;

    let second = run_session(&fetcher, &jobs).await;
    assert_eq!(second.unread_total(), 0);
}

#[tokio::test]
async fn test_failed_fetch_keeps_previous_snapshot() {
    let server = MockServer::start().await;
    mount(&server, "/rss", RSS_V1).await;

    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher(&dir);
    let url = format!("{}/rss", server.uri());
    let jobs = vec![FeedJob::new(&url)];

    let mut first = run_session(&fetcher, &jobs).await;
    first.mark_all_read();
    first.persist(fetcher.snapshots()).await;

    // Feed is down for one run
    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    let outage = run_session(&fetcher, &jobs).await;
    assert!(matches!(
        outage.slots()[0],
        Slot::Failed {
            error: FetchError::HttpStatus(502),
            ..
        }
    ));
    outage.persist(fetcher.snapshots()).await;

    // Back up: read flags from before the outage still apply
    server.reset().await;
    mount(&server, "/rss", RSS_V1).await;
    let recovered = run_session(&fetcher, &jobs).await;
    assert_eq!(recovered.unread_total(), 0);
}

// ============================================================================
// Subscription file to summary
// ============================================================================

#[tokio::test]
async fn test_mixed_subscriptions_in_file_order() {
    let server = MockServer::start().await;
    mount(&server, "/rss", RSS_V1).await;
    mount(&server, "/atom", ATOM).await;
    mount(&server, "/junk", "<html><body>Not a feed</body></html>").await;

    let uri = server.uri();
    let text = format!(
        "# morning reading\n{uri}/rss \"News\"\n\n{uri}/junk\nfilter:cat:{uri}/atom\n",
        uri = uri
    );
    let jobs = parse_jobs(&text);
    assert_eq!(jobs.len(), 3);

    let dir = tempfile::tempdir().unwrap();
    let session = run_session(&fetcher(&dir), &jobs).await;
    assert!(session.is_complete());

    let news = session.feed(0).unwrap();
    assert_eq!(news.title(), "News");
    assert_eq!(news.items()[0].link(), format!("{}/storm", uri));
    assert_eq!(news.items()[0].content(), "Batten down");

    assert!(matches!(session.slots()[1], Slot::Failed { .. }));

    let blog = session.feed(2).unwrap();
    assert_eq!(blog.title(), "Engineering Blog");
    assert_eq!(blog.link(), format!("{}/blog", uri));
    assert_eq!(blog.items()[0].link(), format!("{}/posts/1", uri));
    assert_eq!(blog.items()[0].content(), "The long version");

    assert_eq!(session.unread_total(), 3);
}

#[tokio::test]
async fn test_display_name_persisted_with_snapshot() {
    let server = MockServer::start().await;
    mount(&server, "/rss", RSS_V1).await;

    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher(&dir);
    let url = format!("{}/rss", server.uri());
    let jobs = vec![FeedJob::new(&url).with_display_name("Morning Paper")];

    let session = run_session(&fetcher, &jobs).await;
    session.persist(fetcher.snapshots()).await;

    let snapshot = fetcher.snapshots().load(&url).await.unwrap().unwrap();
    assert_eq!(snapshot.title(), "Morning Paper");
    assert_eq!(snapshot.title_override(), Some("Morning Paper"));
}
