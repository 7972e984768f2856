//! Authenticated request pipeline for the planner API
//!
//! Wraps every API call so that an expired access credential is renewed
//! transparently, with exactly one refresh call on the wire no matter how
//! many requests notice the expiry at once. A background scheduler keeps the
//! credential fresh while a session is active, and `SessionManager` ties the
//! pieces into login, OAuth and logout flows.
//!
//! Request lifecycle:
//! 1. `Gateway::send()` attaches the bearer credential and dispatches
//! 2. A 401 starts a refresh, or parks behind the one already running
//! 3. The refreshed credential is stored, then parked requests replay in order
//! 4. A failed refresh clears the session and navigates to the login route
//! 5. `RefreshScheduler` calls `Gateway::refresh_session()` every interval

pub mod error;
pub mod gateway;
pub mod manager;
pub mod metrics;
pub mod navigator;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use gateway::{ApiRequest, ApiResponse, Gateway, GatewayConfig, error_message};
pub use manager::{OAuthOutcome, Registration, SessionManager};
pub use navigator::{LogNavigator, Navigator};
pub use scheduler::RefreshScheduler;
