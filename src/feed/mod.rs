//! Feed identity, validation, OPML and fetching.
//!
//! - [`FeedDescriptor`] - the validated record of one subscription
//! - [`FeedValidator`] - turns an arbitrary URL into a descriptor, following
//!   `<link rel="alternate">` discovery on HTML pages
//! - [`opml`] - OPML decode (import) and encode (export)
//! - [`FetchWorker`] - the background fetcher fed by the dispatch queue
//!
//! # Example
//!
//! ```no_run
//! use feedintake::feed::{FeedValidator, ValidatorSettings};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let validator = FeedValidator::new(ValidatorSettings::default())?;
//! match validator.validate("https://blog.rust-lang.org/").await {
//!     Ok(feed) => println!("{} -> {}", feed.title(), feed.canonical_url()),
//!     Err(rejected) => println!("{rejected}"),
//! }
//! # Ok(())
//! # }
//! ```

mod descriptor;
mod discovery;
mod fetcher;
pub mod opml;

pub use descriptor::FeedDescriptor;
pub use discovery::{
    FeedValidator, RejectReason, Rejected, ValidatorSettings, DISCOVERY_TIMEOUT,
    MAX_DISCOVERY_SIZE,
};
pub use fetcher::{FetchError, FetchResult, FetchSettings, FetchWorker, WorkerStats};
