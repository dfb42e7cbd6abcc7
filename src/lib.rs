//! Feed subscription intake: URL validation with feed discovery, OPML
//! import/export, and hand-off of accepted feeds to a background fetcher.
//!
//! The pieces, from the outside in:
//!
//! - [`service::SubscriptionService`] - add / import / export / list / remove
//! - [`ingest::SubscriptionIngestor`] - URL or OPML bytes to descriptors
//! - [`feed`] - descriptors, the validator, OPML, the fetch worker
//! - [`dispatch`] - the bounded queue between the front end and the worker
//! - [`storage`] - SQLite persistence behind [`storage::SubscriptionStore`]

pub mod config;
pub mod dispatch;
pub mod feed;
pub mod ingest;
pub mod service;
pub mod storage;
pub mod util;
