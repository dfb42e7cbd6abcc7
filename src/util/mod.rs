//! Utility functions shared by discovery, OPML decoding and storage.
//!
//! - **URL policy**: parsing candidate feed URLs and guarding against SSRF
//! - **Text**: normalizing untrusted titles
//!
//! # Examples
//!
//! ```
//! use feedintake::util::{validate_url, UrlPolicy};
//!
//! let url = validate_url("https://example.com/feed.xml", UrlPolicy::PublicOnly).unwrap();
//! assert_eq!(url.host_str(), Some("example.com"));
//!
//! assert!(validate_url("http://localhost/feed", UrlPolicy::PublicOnly).is_err());
//! assert!(validate_url("http://localhost/feed", UrlPolicy::AllowPrivate).is_ok());
//! ```

mod text;
mod url_validator;

pub use text::{clean_title, host_title};
pub use url_validator::{validate_url, UrlPolicy, UrlValidationError};
