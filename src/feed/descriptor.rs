use serde::Serialize;
use url::Url;

use crate::util::{clean_title, host_title};

/// The minimal record identifying one feed subscription.
///
/// A descriptor only exists for a URL that passed validation: the canonical
/// URL is always an absolute `http`/`https` [`Url`]. Fields are private so a
/// descriptor cannot change after construction; callers read them through
/// accessors and hand descriptors (not mutable state) to storage and to the
/// dispatch queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FeedDescriptor {
    source_url: String,
    canonical_url: Url,
    title: String,
    site_url: Option<Url>,
}

impl FeedDescriptor {
    /// Builds a descriptor from an already-validated canonical URL.
    ///
    /// `title` is cleaned of control characters and surplus whitespace; when
    /// absent or blank it falls back to the canonical URL's host name.
    pub fn new(
        source_url: impl Into<String>,
        canonical_url: Url,
        title: Option<&str>,
        site_url: Option<Url>,
    ) -> Self {
        let title = title
            .and_then(clean_title)
            .unwrap_or_else(|| host_title(&canonical_url));

        Self {
            source_url: source_url.into(),
            canonical_url,
            title,
            site_url,
        }
    }

    /// The URL as the user typed it or as it appeared in an OPML entry.
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// The URL of the feed document itself.
    pub fn canonical_url(&self) -> &Url {
        &self.canonical_url
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// The website the feed belongs to, if known.
    pub fn site_url(&self) -> Option<&Url> {
        self.site_url.as_ref()
    }
}
