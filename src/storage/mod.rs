mod feeds;
mod schema;
mod types;

pub use feeds::SubscriptionStore;
pub use schema::Database;
pub use types::{DatabaseError, Subscription};
