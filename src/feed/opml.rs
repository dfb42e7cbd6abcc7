//! OPML subscription lists: decoding for import, encoding for export.
//!
//! Decoding is a pure structural transform. It never touches the network;
//! whether an entry's feed is reachable is for [`FeedValidator`] or the
//! fetch worker to find out.
//!
//! [`FeedValidator`]: crate::feed::FeedValidator

use std::path::Path;

use anyhow::{Context, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;
use thiserror::Error;

use crate::feed::FeedDescriptor;
use crate::util::{validate_url, UrlPolicy};

/// SEC-003: Maximum allowed nesting depth for OPML outline elements.
/// Prevents stack overflow attacks from maliciously crafted deeply nested OPMLs.
const MAX_OPML_DEPTH: usize = 50;

const EXPORT_TITLE: &str = "feedintake subscriptions";

/// The document as a whole could not be read. Nothing was imported.
#[derive(Debug, Error)]
pub enum StructuralError {
    #[error("OPML is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("XML parse error at byte {position}: {message}")]
    Xml { position: u64, message: String },

    #[error("document has no <opml> root element")]
    MissingRoot,

    #[error("document ends inside <{0}>")]
    Unclosed(String),

    /// SEC-003: OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),
}

/// What was wrong with a single outline that got skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryProblem {
    /// A leaf typed as a feed, or carrying `htmlUrl`, but without `xmlUrl`.
    #[error("no xmlUrl attribute")]
    MissingFeedUrl,

    #[error("invalid xmlUrl {url:?}: {reason}")]
    InvalidFeedUrl { url: String, reason: String },

    /// The outline had attributes quick-xml could not read, and no usable
    /// `xmlUrl` survived.
    #[error("malformed attribute: {reason}")]
    MalformedAttribute { reason: String },

    /// A leaf with neither `xmlUrl` nor children, and nothing marking it as
    /// a feed. Usually an empty folder.
    #[error("empty outline")]
    EmptyOutline,
}

impl EntryProblem {
    /// Whether the outline was meant to be a feed subscription.
    pub fn is_feed_entry(&self) -> bool {
        !matches!(self, Self::EmptyOutline)
    }
}

/// A skipped outline. `outline` is the 1-based position of the `<outline>`
/// element in document order, folders included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpmlWarning {
    pub outline: usize,
    pub title: Option<String>,
    pub problem: EntryProblem,
}

impl std::fmt::Display for OpmlWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.title {
            Some(title) => write!(f, "outline #{} ({}): {}", self.outline, title, self.problem),
            None => write!(f, "outline #{}: {}", self.outline, self.problem),
        }
    }
}

/// Result of decoding a well-formed document: usable feeds in document
/// order plus one warning per skipped entry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DecodedOpml {
    pub feeds: Vec<FeedDescriptor>,
    pub warnings: Vec<OpmlWarning>,
}

/// Decodes OPML bytes with the production URL policy.
///
/// See [`decode_with_policy`].
pub fn decode(bytes: &[u8]) -> Result<DecodedOpml, StructuralError> {
    decode_with_policy(bytes, UrlPolicy::PublicOnly)
}

/// Decodes OPML bytes into feed descriptors.
///
/// Every `<outline>` carrying an `xmlUrl` attribute becomes one descriptor,
/// at any nesting depth; folder outlines are walked but not returned. Titles
/// come from `title`, then `text`, then the feed URL's host.
///
/// Entries are not deduplicated: a document listing the same feed twice
/// yields two descriptors.
///
/// Per-entry problems (leaf outline without `xmlUrl`, unusable URL,
/// unreadable attributes) are recorded as [`OpmlWarning`]s and never abort
/// the decode. A well-formed document with no feed outlines decodes to an
/// empty list.
///
/// # Errors
///
/// [`StructuralError`] when the bytes are not UTF-8, not well-formed XML,
/// have no `<opml>` root, or nest outlines deeper than 50 levels.
///
/// # Security
///
/// XXE (XML External Entity) attacks are mitigated because `quick-xml` (0.37)
/// does not parse `<!ENTITY>` declarations; custom entity references fail
/// unescaping and surface as [`StructuralError::Xml`].
pub fn decode_with_policy(
    bytes: &[u8],
    policy: UrlPolicy,
) -> Result<DecodedOpml, StructuralError> {
    let content = std::str::from_utf8(bytes)?;
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    // SEC-002: Entity resolution is limited to the 5 XML builtins by the
    // escape layer. We use `decode_and_unescape_value()` (not `_with()`), so
    // a future quick-xml with entity expansion still stays on the safe default.
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut decoder = OutlineDecoder::new(policy);
    let mut open_elements: Vec<String> = Vec::new();
    let mut seen_root = false;
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| StructuralError::Xml {
            position: reader.error_position() as u64,
            message: e.to_string(),
        })?;

        match event {
            Event::Start(e) => {
                check_root(&mut seen_root, &e)?;
                open_elements.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                if is_outline(&e) {
                    decoder.open_outline(&e, &reader, false)?;
                }
            }
            Event::Empty(e) => {
                check_root(&mut seen_root, &e)?;
                if is_outline(&e) {
                    decoder.open_outline(&e, &reader, true)?;
                }
            }
            Event::End(e) => {
                open_elements.pop();
                if e.local_name().as_ref() == b"outline" {
                    decoder.close_outline();
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(unclosed) = open_elements.pop() {
        return Err(StructuralError::Unclosed(unclosed));
    }
    if !seen_root {
        return Err(StructuralError::MissingRoot);
    }

    Ok(decoder.finish())
}

fn is_outline(e: &BytesStart<'_>) -> bool {
    e.local_name().as_ref() == b"outline"
}

fn check_root(seen_root: &mut bool, e: &BytesStart<'_>) -> Result<(), StructuralError> {
    if !*seen_root {
        if !e.local_name().as_ref().eq_ignore_ascii_case(b"opml") {
            return Err(StructuralError::MissingRoot);
        }
        *seen_root = true;
    }
    Ok(())
}

/// Tracks the outline tree while events stream past.
struct OutlineDecoder {
    policy: UrlPolicy,
    /// Outlines currently open, innermost last.
    stack: Vec<OpenOutline>,
    count: usize,
    out: DecodedOpml,
}

struct OpenOutline {
    position: usize,
    title: Option<String>,
    has_feed_url: bool,
    has_children: bool,
    /// Problem to report if the outline turns out to be an empty leaf
    leaf_problem: EntryProblem,
}

#[derive(Default)]
struct OutlineAttrs {
    xml_url: Option<String>,
    html_url: Option<String>,
    title: Option<String>,
    text: Option<String>,
    kind: Option<String>,
    /// First attribute that failed to parse
    malformed: Option<String>,
}

impl OutlineAttrs {
    fn display_title(&self) -> Option<String> {
        [&self.title, &self.text]
            .into_iter()
            .flatten()
            .find(|t| !t.trim().is_empty())
            .cloned()
    }

    /// Why a leaf outline without a usable `xmlUrl` got skipped.
    fn leaf_problem(&self) -> EntryProblem {
        if let Some(reason) = &self.malformed {
            return EntryProblem::MalformedAttribute {
                reason: reason.clone(),
            };
        }
        let typed_as_feed = self
            .kind
            .as_deref()
            .is_some_and(|k| matches!(k.to_ascii_lowercase().as_str(), "rss" | "atom"));
        if typed_as_feed || self.html_url.is_some() {
            EntryProblem::MissingFeedUrl
        } else {
            EntryProblem::EmptyOutline
        }
    }
}

impl OutlineDecoder {
    fn new(policy: UrlPolicy) -> Self {
        Self {
            policy,
            stack: Vec::new(),
            count: 0,
            out: DecodedOpml::default(),
        }
    }

    fn open_outline(
        &mut self,
        e: &BytesStart<'_>,
        reader: &Reader<&[u8]>,
        self_closing: bool,
    ) -> Result<(), StructuralError> {
        if let Some(parent) = self.stack.last_mut() {
            parent.has_children = true;
        }

        // SEC-003: Reject excessively nested OPMLs. Self-closing outlines
        // don't add a level.
        if !self_closing && self.stack.len() >= MAX_OPML_DEPTH {
            return Err(StructuralError::MaxDepthExceeded(MAX_OPML_DEPTH));
        }

        self.count += 1;
        let position = self.count;
        let attrs = read_outline_attrs(e, reader)?;
        let title = attrs.display_title();
        let has_feed_url = attrs.xml_url.is_some();

        if let Some(raw_url) = &attrs.xml_url {
            self.accept_entry(position, raw_url, &attrs);
        } else if self_closing {
            self.warn(position, title.clone(), attrs.leaf_problem());
        }

        if !self_closing {
            self.stack.push(OpenOutline {
                position,
                title,
                has_feed_url,
                has_children: false,
                leaf_problem: attrs.leaf_problem(),
            });
        }
        Ok(())
    }

    fn close_outline(&mut self) {
        if let Some(outline) = self.stack.pop() {
            if !outline.has_feed_url && !outline.has_children {
                self.warn(outline.position, outline.title, outline.leaf_problem);
            }
        }
    }

    fn accept_entry(&mut self, position: usize, raw_url: &str, attrs: &OutlineAttrs) {
        let title = attrs.display_title();

        let canonical = match validate_url(raw_url, self.policy) {
            Ok(url) => url,
            Err(e) => {
                self.warn(
                    position,
                    title,
                    EntryProblem::InvalidFeedUrl {
                        url: raw_url.to_owned(),
                        reason: e.to_string(),
                    },
                );
                return;
            }
        };

        let site_url = attrs
            .html_url
            .as_deref()
            .and_then(|html| match validate_url(html, self.policy) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::debug!(url = %html, error = %e, "Ignoring invalid htmlUrl in OPML");
                    None
                }
            });

        self.out.feeds.push(FeedDescriptor::new(
            raw_url,
            canonical,
            title.as_deref(),
            site_url,
        ));
    }

    fn warn(&mut self, outline: usize, title: Option<String>, problem: EntryProblem) {
        let warning = OpmlWarning {
            outline,
            title,
            problem,
        };
        tracing::warn!(warning = %warning, "Skipping OPML entry");
        self.out.warnings.push(warning);
    }

    fn finish(self) -> DecodedOpml {
        self.out
    }
}

/// Extracts the attributes an outline may carry. Names match
/// case-insensitively since exporters disagree on `xmlUrl` vs `xmlurl`.
fn read_outline_attrs(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<OutlineAttrs, StructuralError> {
    let mut attrs = OutlineAttrs::default();

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed OPML attribute");
                attrs.malformed.get_or_insert_with(|| e.to_string());
                continue;
            }
        };

        let key = attr.key.local_name();
        let slot = match key.as_ref().to_ascii_lowercase().as_slice() {
            b"xmlurl" => &mut attrs.xml_url,
            b"htmlurl" => &mut attrs.html_url,
            b"title" => &mut attrs.title,
            b"text" => &mut attrs.text,
            b"type" => &mut attrs.kind,
            _ => continue,
        };

        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|e| StructuralError::Xml {
                position: reader.buffer_position() as u64,
                message: e.to_string(),
            })?;
        *slot = Some(value.into_owned());
    }

    Ok(attrs)
}

/// Encodes descriptors as an OPML 2.0 document.
///
/// One `<outline type="rss">` per descriptor, in input order, with `text`,
/// `title`, `xmlUrl` (the canonical URL) and `htmlUrl` when known. An empty
/// input still yields a complete document with an empty `<body>`. Output is
/// UTF-8 and byte-for-byte deterministic for the same input.
pub fn encode<'a, I>(feeds: I) -> Result<String>
where
    I: IntoIterator<Item = &'a FeedDescriptor>,
{
    use quick_xml::events::{BytesDecl, BytesEnd, BytesText};
    use quick_xml::Writer;
    use std::io::Cursor;

    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Failed to write XML declaration")?;

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "2.0"));
    writer
        .write_event(Event::Start(opml))
        .context("Failed to write opml element")?;

    // <head><title>...</title></head>
    writer
        .write_event(Event::Start(BytesStart::new("head")))
        .context("Failed to write head element")?;
    writer
        .write_event(Event::Start(BytesStart::new("title")))
        .context("Failed to write title element")?;
    writer
        .write_event(Event::Text(BytesText::new(EXPORT_TITLE)))
        .context("Failed to write title text")?;
    writer
        .write_event(Event::End(BytesEnd::new("title")))
        .context("Failed to write title end")?;
    writer
        .write_event(Event::End(BytesEnd::new("head")))
        .context("Failed to write head end")?;

    writer
        .write_event(Event::Start(BytesStart::new("body")))
        .context("Failed to write body element")?;

    for feed in feeds {
        let mut outline = BytesStart::new("outline");
        outline.push_attribute(("type", "rss"));
        outline.push_attribute(("text", feed.title()));
        outline.push_attribute(("title", feed.title()));
        outline.push_attribute(("xmlUrl", feed.canonical_url().as_str()));
        if let Some(site_url) = feed.site_url() {
            outline.push_attribute(("htmlUrl", site_url.as_str()));
        }
        writer
            .write_event(Event::Empty(outline))
            .context("Failed to write outline element")?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("body")))
        .context("Failed to write body end")?;
    writer
        .write_event(Event::End(BytesEnd::new("opml")))
        .context("Failed to write opml end")?;

    let mut bytes = writer.into_inner().into_inner();
    bytes.push(b'\n');
    String::from_utf8(bytes).context("Generated OPML contains invalid UTF-8")
}

/// Encodes descriptors and writes them to `path` atomically.
///
/// The document goes to a sibling temp file first, is synced, then renamed
/// over `path`, so readers never see a half-written export.
pub fn export_to_file<'a, I>(feeds: I, path: &Path) -> Result<()>
where
    I: IntoIterator<Item = &'a FeedDescriptor>,
{
    use std::io::Write;
    use std::time::{SystemTime, UNIX_EPOCH};

    let content = encode(feeds)?;

    // SEC-009: Unpredictable temp name; create_new refuses pre-planted files
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{}.{:x}", std::process::id(), nanos));

    let write_temp = || -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .with_context(|| format!("Failed to create '{}'", temp_path.display()))?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write '{}'", temp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync '{}'", temp_path.display()))?;
        std::fs::rename(&temp_path, path).with_context(|| {
            format!(
                "Failed to rename '{}' to '{}'",
                temp_path.display(),
                path.display()
            )
        })
    };

    write_temp().inspect_err(|_| {
        let _ = std::fs::remove_file(&temp_path);
    })
}
