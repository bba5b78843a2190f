//! Per-(session, app) stream subscription tracking with wildcard support
//! and an append-only history log for diagnostics.

mod registry;

pub use registry::{SubscriptionAction, SubscriptionChange, SubscriptionKey, SubscriptionRegistry};
