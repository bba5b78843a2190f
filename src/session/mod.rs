//! Session state: one `UserSession` per connected glasses client, one
//! `AppSession` per (session, TPA package) pair, and the app-session state
//! machine.

mod session;

pub use session::{AppSession, AppSessionState, AppSessionSummary, SessionSummary, UserSession};
