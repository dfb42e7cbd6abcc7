use crate::feed::FeedDescriptor;
use crate::util::{validate_url, UrlPolicy, UrlValidationError};
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default upper bound for one discovery attempt, body included.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
/// Default response size cap (5MB).
pub const MAX_DISCOVERY_SIZE: usize = 5 * 1024 * 1024;
/// An HTML page may point at a feed; the feed may not point anywhere else.
const MAX_DISCOVERY_HOPS: usize = 1;
const MAX_REDIRECTS: usize = 5;

const FEED_LINK_TYPES: &[&str] = &[
    "application/rss+xml",
    "application/atom+xml",
    "application/feed+json",
];

/// Why a candidate URL did not resolve to a feed.
///
/// Callers that only care about accept/reject can treat every variant the
/// same; the reason is kept for logs and tests.
#[derive(Debug, Error)]
pub enum RejectReason {
    /// The URL failed parsing or the host policy (SSRF, bad scheme, etc.)
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    /// Connection, DNS, TLS or redirect failure
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    /// Request plus body exceeded the discovery timeout
    #[error("request timed out")]
    Timeout,
    /// Server answered with a non-2xx status
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the size limit
    #[error("response too large")]
    TooLarge,
    /// Not a feed, and no feed link was advertised
    #[error("not a feed: no RSS/Atom content found")]
    NotAFeed,
    /// The page advertises several distinct feeds
    #[error("page advertises {0} feeds; pick one")]
    Ambiguous(usize),
    /// The advertised feed link led to another HTML page
    #[error("advertised feed link is not a feed")]
    HopLimit,
}

/// A URL that could not be turned into a [`FeedDescriptor`].
#[derive(Debug, Error)]
#[error("rejected {url}: {reason}")]
pub struct Rejected {
    url: String,
    #[source]
    reason: RejectReason,
}

impl Rejected {
    pub fn new(url: impl Into<String>, reason: RejectReason) -> Self {
        Self {
            url: url.into(),
            reason,
        }
    }

    /// The URL exactly as the caller supplied it.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn reason(&self) -> &RejectReason {
        &self.reason
    }
}

/// Tunables for [`FeedValidator`].
#[derive(Debug, Clone)]
pub struct ValidatorSettings {
    pub timeout: Duration,
    pub max_body_bytes: usize,
    pub policy: UrlPolicy,
    pub user_agent: String,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            timeout: DISCOVERY_TIMEOUT,
            max_body_bytes: MAX_DISCOVERY_SIZE,
            policy: UrlPolicy::PublicOnly,
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

/// Turns an arbitrary URL into a confirmed feed, or rejects it.
///
/// Accepts either a direct feed URL or an HTML page URL. For HTML pages,
/// scans for `<link rel="alternate">` tags advertising RSS/Atom/JSON feeds;
/// when exactly one distinct feed is advertised, that URL is fetched and
/// must itself be a feed.
///
/// The whole attempt (every hop, bodies included) runs under
/// [`ValidatorSettings::timeout`], so a stalled server produces
/// [`RejectReason::Timeout`] instead of blocking the caller.
#[derive(Debug, Clone)]
pub struct FeedValidator {
    client: reqwest::Client,
    settings: ValidatorSettings,
}

struct Fetched {
    kind: BodyKind,
    bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Feed,
    Html,
    Unknown,
}

struct FeedMeta {
    title: Option<String>,
    site_url: Option<Url>,
}

impl FeedValidator {
    /// Builds a validator with its own HTTP client.
    ///
    /// Redirects are followed (at most five) and every redirect target is
    /// checked against the same [`UrlPolicy`] as the original URL.
    pub fn new(settings: ValidatorSettings) -> Result<Self, reqwest::Error> {
        let policy = settings.policy;
        let redirect = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error("too many redirects");
            }
            match validate_url(attempt.url().as_str(), policy) {
                Ok(_) => attempt.follow(),
                Err(e) => attempt.error(e),
            }
        });

        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .redirect(redirect)
            .build()?;

        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &ValidatorSettings {
        &self.settings
    }

    /// The underlying client, redirect policy included. Clones share one
    /// connection pool.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Validates `url` and returns the descriptor of the feed it resolves to.
    ///
    /// Never panics on bad input: malformed URLs, network failures, timeouts,
    /// non-2xx responses and pages without exactly one feed all come back as
    /// [`Rejected`]. The sub-reason is logged and kept on the error.
    ///
    /// A direct feed's canonical URL is `url` after URL parsing, so an empty
    /// path becomes `/` and the scheme and host are lowercased. The raw input
    /// stays available as [`FeedDescriptor::source_url`].
    pub async fn validate(&self, url: &str) -> Result<FeedDescriptor, Rejected> {
        let outcome = tokio::time::timeout(self.settings.timeout, self.resolve(url))
            .await
            .unwrap_or(Err(RejectReason::Timeout));

        match outcome {
            Ok(descriptor) => {
                tracing::debug!(
                    url = %url,
                    canonical = %descriptor.canonical_url(),
                    title = %descriptor.title(),
                    "Feed URL accepted"
                );
                Ok(descriptor)
            }
            Err(reason) => {
                tracing::info!(url = %url, reason = %reason, "Feed URL rejected");
                Err(Rejected::new(url, reason))
            }
        }
    }

    async fn resolve(&self, url: &str) -> Result<FeedDescriptor, RejectReason> {
        let mut target = validate_url(url, self.settings.policy)?;
        let mut advertised_by: Option<Url> = None;

        for hop in 0..=MAX_DISCOVERY_HOPS {
            let fetched = self.fetch(&target).await?;

            if fetched.kind != BodyKind::Html {
                match parse_feed_meta(&fetched.bytes) {
                    Some(meta) => {
                        let site_url = meta.site_url.or(advertised_by);
                        return Ok(FeedDescriptor::new(
                            url,
                            target,
                            meta.title.as_deref(),
                            site_url,
                        ));
                    }
                    None if fetched.kind == BodyKind::Feed => return Err(RejectReason::NotAFeed),
                    None => {}
                }
            }

            if hop == MAX_DISCOVERY_HOPS {
                return Err(RejectReason::HopLimit);
            }

            let html = String::from_utf8_lossy(&fetched.bytes);
            let mut candidates = find_feed_links(&html, &target);
            let candidate = match candidates.len() {
                0 => return Err(RejectReason::NotAFeed),
                1 => candidates.remove(0),
                n => return Err(RejectReason::Ambiguous(n)),
            };

            tracing::debug!(page = %target, feed = %candidate, "Following advertised feed link");

            // SEC: the advertised link gets the same policy as user input
            let candidate = validate_url(candidate.as_str(), self.settings.policy)?;
            advertised_by = Some(target);
            target = candidate;
        }

        Err(RejectReason::HopLimit)
    }

    async fn fetch(&self, url: &Url) -> Result<Fetched, RejectReason> {
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RejectReason::HttpStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        let kind = classify_content_type(&content_type);
        let bytes = read_limited_bytes(response, self.settings.max_body_bytes).await?;

        Ok(Fetched { kind, bytes })
    }
}

fn classify_content_type(content_type: &str) -> BodyKind {
    let is_feed = content_type.contains("application/rss+xml")
        || content_type.contains("application/atom+xml")
        || content_type.contains("application/feed+json")
        || content_type.contains("application/xml")
        || content_type.contains("text/xml");

    if is_feed {
        BodyKind::Feed
    } else if content_type.contains("text/html") || content_type.contains("application/xhtml") {
        BodyKind::Html
    } else {
        BodyKind::Unknown
    }
}

/// Reads the response body as a stream, giving up once it passes `limit`.
async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, RejectReason> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(RejectReason::TooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(RejectReason::TooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

/// Parses feed bytes far enough to confirm they are a feed and pull out the
/// metadata a descriptor needs. Returns `None` for anything `feed-rs` cannot
/// read.
fn parse_feed_meta(bytes: &[u8]) -> Option<FeedMeta> {
    let feed = feed_rs::parser::parse(bytes).ok()?;

    let title = feed.title.map(|t| t.content);

    // The site link is the alternate (or untyped) link, never rel="self"
    let site_url = feed
        .links
        .iter()
        .filter(|link| matches!(link.rel.as_deref(), None | Some("alternate")))
        .find_map(|link| Url::parse(&link.href).ok())
        .filter(|u| matches!(u.scheme(), "http" | "https"));

    Some(FeedMeta { title, site_url })
}

/// Collects every distinct feed advertised by `<link rel="alternate">` tags.
///
/// Uses simple tag scanning (no HTML parser dependency). Attribute order and
/// quoting style do not matter; relative hrefs resolve against `base`.
/// The result keeps document order and drops duplicates.
fn find_feed_links(html: &str, base: &Url) -> Vec<Url> {
    // ASCII lowercasing keeps byte offsets aligned with `html`
    let lowered = html.to_ascii_lowercase();
    let mut found: Vec<Url> = Vec::new();
    let mut search_from = 0;

    while let Some(offset) = lowered[search_from..].find("<link") {
        let start = search_from + offset;
        let Some(len) = lowered[start..].find('>') else {
            break;
        };
        let tag = &html[start + "<link".len()..start + len];
        search_from = start + len + 1;

        let attrs = parse_attributes(tag);
        let attr = |name: &str| {
            attrs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };

        let is_alternate = attr("rel").is_some_and(|rel| {
            rel.split_ascii_whitespace()
                .any(|r| r.eq_ignore_ascii_case("alternate"))
        });
        let is_feed_type = attr("type").is_some_and(|t| {
            let t = t.trim().to_ascii_lowercase();
            FEED_LINK_TYPES.iter().any(|ft| t.starts_with(ft))
        });
        if !is_alternate || !is_feed_type {
            continue;
        }

        let Some(href) = attr("href") else {
            continue;
        };
        let href = href.trim().replace("&amp;", "&");
        match base.join(&href) {
            Ok(resolved) if !found.contains(&resolved) => found.push(resolved),
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(href = %href, error = %e, "Ignoring unresolvable feed link");
            }
        }
    }

    found
}

/// Splits the inside of a tag into `(lowercased name, value)` pairs.
///
/// Handles double-quoted, single-quoted, unquoted and valueless attributes.
fn parse_attributes(tag: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut rest = tag.trim_start_matches('/');

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_ascii_whitespace() || c == '/');
        if rest.is_empty() {
            break;
        }

        let name_end = rest
            .find(|c: char| c.is_ascii_whitespace() || c == '=' || c == '/')
            .unwrap_or(rest.len());
        let name = rest[..name_end].to_ascii_lowercase();
        rest = rest[name_end..].trim_start();

        let Some(after_eq) = rest.strip_prefix('=') else {
            attrs.push((name, String::new()));
            continue;
        };
        let after_eq = after_eq.trim_start();

        let (value, remaining) = match after_eq.chars().next() {
            Some(quote @ ('"' | '\'')) => {
                let inner = &after_eq[1..];
                match inner.find(quote) {
                    Some(end) => (&inner[..end], &inner[end + 1..]),
                    None => (inner, ""),
                }
            }
            _ => {
                let end = after_eq
                    .find(|c: char| c.is_ascii_whitespace())
                    .unwrap_or(after_eq.len());
                (&after_eq[..end], &after_eq[end..])
            }
        };

        attrs.push((name, value.to_owned()));
        rest = remaining;
    }

    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS_WITH_METADATA: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example Blog</title>
    <link>https://example.com</link>
    <description>An example blog about things</description>
    <item>
      <guid>1</guid>
      <title>First Post</title>
      <link>https://example.com/post/1</link>
    </item>
  </channel>
</rss>"#;

    const ATOM_WITH_METADATA: &str = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example Atom</title>
  <link href="https://example.com/feed.xml" rel="self"/>
  <link href="https://example.com" rel="alternate"/>
  <id>urn:example</id>
  <updated>2024-01-01T00:00:00Z</updated>
</feed>"#;

    const RSS_NO_TITLE: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <item><guid>1</guid><title>Post</title></item>
</channel></rss>"#;

    fn base(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn local_validator() -> FeedValidator {
        FeedValidator::new(ValidatorSettings {
            timeout: Duration::from_secs(5),
            policy: UrlPolicy::AllowPrivate,
            ..ValidatorSettings::default()
        })
        .unwrap()
    }

    fn html_with_links(links: &[&str]) -> String {
        let tags: String = links
            .iter()
            .map(|href| {
                format!(r#"<link rel="alternate" type="application/rss+xml" href="{href}">"#)
            })
            .collect();
        format!("<html><head><title>Page</title>{tags}</head><body>Hi</body></html>")
    }

    // --- Feed metadata ---

    #[test]
    fn test_parse_rss_metadata() {
        let meta = parse_feed_meta(RSS_WITH_METADATA.as_bytes()).unwrap();
        assert_eq!(meta.title.as_deref(), Some("Example Blog"));
        // Url parsing adds the trailing slash
        assert_eq!(
            meta.site_url.as_ref().map(Url::as_str),
            Some("https://example.com/")
        );
    }

    #[test]
    fn test_parse_atom_prefers_alternate_over_self() {
        let meta = parse_feed_meta(ATOM_WITH_METADATA.as_bytes()).unwrap();
        assert_eq!(meta.title.as_deref(), Some("Example Atom"));
        assert_eq!(
            meta.site_url.as_ref().map(Url::as_str),
            Some("https://example.com/")
        );
    }

    #[test]
    fn test_parse_html_is_not_a_feed() {
        assert!(parse_feed_meta(b"<html><body>Hello</body></html>").is_none());
        assert!(parse_feed_meta(b"").is_none());
    }

    #[test]
    fn test_classify_content_type() {
        assert_eq!(
            classify_content_type("application/rss+xml; charset=utf-8"),
            BodyKind::Feed
        );
        assert_eq!(classify_content_type("text/xml"), BodyKind::Feed);
        assert_eq!(
            classify_content_type("text/html; charset=utf-8"),
            BodyKind::Html
        );
        assert_eq!(classify_content_type(""), BodyKind::Unknown);
        assert_eq!(classify_content_type("text/plain"), BodyKind::Unknown);
    }

    // --- HTML link discovery ---

    #[test]
    fn test_find_relative_rss_link() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/rss+xml" href="/feed.xml" title="RSS">
        </head><body></body></html>"#;
        let links = find_feed_links(html, &base("https://example.com/blog/post"));
        assert_eq!(links, vec![base("https://example.com/feed.xml")]);
    }

    #[test]
    fn test_find_link_attribute_variations() {
        let html = r#"<HEAD>
            <LINK HREF='atom.xml' TYPE='application/atom+xml' REL='alternate'/>
        </HEAD>"#;
        let links = find_feed_links(html, &base("https://example.com/blog/"));
        assert_eq!(links, vec![base("https://example.com/blog/atom.xml")]);
    }

    #[test]
    fn test_find_link_unquoted_and_multi_rel() {
        let html = r#"<link rel="alternate home" type=application/rss+xml href=https://feeds.example.com/rss>"#;
        let links = find_feed_links(html, &base("https://example.com"));
        assert_eq!(links, vec![base("https://feeds.example.com/rss")]);
    }

    #[test]
    fn test_find_link_protocol_relative_keeps_scheme() {
        let html = r#"<link rel="alternate" type="application/rss+xml" href="//cdn.example.com/feed.xml">"#;
        let links = find_feed_links(html, &base("http://example.com"));
        assert_eq!(links, vec![base("http://cdn.example.com/feed.xml")]);
    }

    #[test]
    fn test_find_link_decodes_amp() {
        let html = r#"<link rel="alternate" type="application/rss+xml" href="/feed?a=1&amp;b=2">"#;
        let links = find_feed_links(html, &base("https://example.com"));
        assert_eq!(links, vec![base("https://example.com/feed?a=1&b=2")]);
    }

    #[test]
    fn test_ignores_non_feed_links() {
        let html = r#"<link rel="stylesheet" href="/style.css">
            <link rel="alternate" hreflang="fr" href="/fr/">
            <link rel="icon" type="application/rss+xml" href="/weird.xml">"#;
        assert!(find_feed_links(html, &base("https://example.com")).is_empty());
    }

    #[test]
    fn test_duplicate_links_count_once() {
        let html = html_with_links(&["/feed.xml", "https://example.com/feed.xml"]);
        let links = find_feed_links(&html, &base("https://example.com/"));
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn test_multiple_distinct_links_kept_in_order() {
        let html = html_with_links(&["/rss.xml", "/comments.xml"]);
        let links = find_feed_links(&html, &base("https://example.com/"));
        assert_eq!(
            links,
            vec![
                base("https://example.com/rss.xml"),
                base("https://example.com/comments.xml")
            ]
        );
    }

    #[test]
    fn test_parse_attributes_forms() {
        let attrs = parse_attributes(r#" rel="alternate" data-x='y z' async href=/a /"#);
        assert_eq!(
            attrs,
            vec![
                ("rel".to_owned(), "alternate".to_owned()),
                ("data-x".to_owned(), "y z".to_owned()),
                ("async".to_owned(), String::new()),
                ("href".to_owned(), "/a".to_owned()),
            ]
        );
    }

    // --- Validation without network ---

    #[tokio::test]
    async fn test_validate_malformed_url() {
        let validator = local_validator();
        let err = validator.validate("not a url").await.unwrap_err();
        assert_eq!(err.url(), "not a url");
        assert!(matches!(err.reason(), RejectReason::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_validate_empty_url() {
        let validator = local_validator();
        let err = validator.validate("").await.unwrap_err();
        assert!(matches!(
            err.reason(),
            RejectReason::InvalidUrl(UrlValidationError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_validate_private_host_rejected_by_default() {
        let validator = FeedValidator::new(ValidatorSettings::default()).unwrap();
        let err = validator
            .validate("http://192.168.1.1/feed")
            .await
            .unwrap_err();
        assert!(matches!(err.reason(), RejectReason::InvalidUrl(_)));
    }

    // --- Validation against a mock server ---

    #[tokio::test]
    async fn test_validate_direct_rss() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(RSS_WITH_METADATA)
                    .insert_header("Content-Type", "application/rss+xml"),
            )
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed.xml", mock_server.uri());
        let feed = local_validator().validate(&url).await.unwrap();

        assert_eq!(feed.canonical_url().as_str(), url);
        assert_eq!(feed.source_url(), url);
        assert_eq!(feed.title(), "Example Blog");
    }

    #[tokio::test]
    async fn test_validate_bare_origin_gets_root_path() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(RSS_WITH_METADATA)
                    .insert_header("Content-Type", "application/rss+xml"),
            )
            .mount(&mock_server)
            .await;

        let url = mock_server.uri();
        assert!(!url.ends_with('/'));
        let feed = local_validator().validate(&url).await.unwrap();

        assert_eq!(feed.canonical_url().as_str(), format!("{}/", url));
        assert_eq!(feed.source_url(), url);
    }

    #[tokio::test]
    async fn test_validate_untitled_feed_uses_host() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(RSS_NO_TITLE)
                    .insert_header("Content-Type", "application/rss+xml"),
            )
            .mount(&mock_server)
            .await;

        let url = format!("{}/rss", mock_server.uri());
        let feed = local_validator().validate(&url).await.unwrap();
        assert_eq!(feed.title(), "127.0.0.1");
    }

    #[tokio::test]
    async fn test_validate_sniffs_feed_without_content_type() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS_WITH_METADATA))
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        let feed = local_validator().validate(&url).await.unwrap();
        assert_eq!(feed.title(), "Example Blog");
    }

    #[tokio::test]
    async fn test_validate_discovers_single_feed_link() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(html_with_links(&["/feed.xml"]))
                    .insert_header("Content-Type", "text/html; charset=utf-8"),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(RSS_NO_TITLE)
                    .insert_header("Content-Type", "application/rss+xml"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let page = format!("{}/", mock_server.uri());
        let feed = local_validator().validate(&page).await.unwrap();

        assert_eq!(
            feed.canonical_url().as_str(),
            format!("{}/feed.xml", mock_server.uri())
        );
        assert_eq!(feed.source_url(), page);
        // No site link in the feed: the advertising page stands in
        assert_eq!(feed.site_url().map(Url::as_str), Some(page.as_str()));
    }

    #[tokio::test]
    async fn test_validate_html_without_feed_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body>Just a page</body></html>")
                    .insert_header("Content-Type", "text/html"),
            )
            .mount(&mock_server)
            .await;

        let err = local_validator()
            .validate(&format!("{}/page", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err.reason(), RejectReason::NotAFeed));
    }

    #[tokio::test]
    async fn test_validate_ambiguous_feed_links_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(html_with_links(&["/posts.xml", "/comments.xml"]))
                    .insert_header("Content-Type", "text/html"),
            )
            .mount(&mock_server)
            .await;

        let err = local_validator()
            .validate(&format!("{}/", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err.reason(), RejectReason::Ambiguous(2)));
    }

    #[tokio::test]
    async fn test_validate_stops_after_one_hop() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(html_with_links(&["/loop"]))
                    .insert_header("Content-Type", "text/html"),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/loop"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(html_with_links(&["/"]))
                    .insert_header("Content-Type", "text/html"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let err = local_validator()
            .validate(&format!("{}/", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err.reason(), RejectReason::HopLimit));
    }

    #[tokio::test]
    async fn test_validate_xml_that_is_not_a_feed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<config><value>1</value></config>")
                    .insert_header("Content-Type", "application/xml"),
            )
            .mount(&mock_server)
            .await;

        let err = local_validator()
            .validate(&format!("{}/config.xml", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err.reason(), RejectReason::NotAFeed));
    }

    #[tokio::test]
    async fn test_validate_http_error_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let err = local_validator()
            .validate(&format!("{}/gone", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err.reason(), RejectReason::HttpStatus(404)));
    }

    #[tokio::test]
    async fn test_validate_timeout_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(RSS_WITH_METADATA)
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&mock_server)
            .await;

        let validator = FeedValidator::new(ValidatorSettings {
            timeout: Duration::from_millis(200),
            policy: UrlPolicy::AllowPrivate,
            ..ValidatorSettings::default()
        })
        .unwrap();

        let err = validator
            .validate(&format!("{}/slow", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err.reason(), RejectReason::Timeout));
    }

    #[tokio::test]
    async fn test_validate_unreachable_rejected() {
        let uri = {
            let mock_server = MockServer::start().await;
            mock_server.uri()
        };

        let err = local_validator()
            .validate(&format!("{uri}/feed.xml"))
            .await
            .unwrap_err();
        assert!(matches!(err.reason(), RejectReason::Network(_)));
    }

    #[tokio::test]
    async fn test_validate_oversized_body_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(2048)))
            .mount(&mock_server)
            .await;

        let validator = FeedValidator::new(ValidatorSettings {
            max_body_bytes: 1024,
            policy: UrlPolicy::AllowPrivate,
            ..ValidatorSettings::default()
        })
        .unwrap();

        let err = validator
            .validate(&format!("{}/big", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err.reason(), RejectReason::TooLarge));
    }
}
