//! Display arbitration: one active layout per session, priority tiers,
//! generation-guarded auto-expiry, and bounded per-(session, app) history.

mod arbitrator;

pub use arbitrator::{DisplayArbitrator, DisplayPriority, DisplayRecord};
