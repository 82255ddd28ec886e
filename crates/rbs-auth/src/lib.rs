//! Token lifecycle for the RBS client.
//!
//! This crate provides:
//! - [`SessionManager`]: owner of the current token pair, with gated
//!   bootstrap, custom-token exchange and refresh
//! - [`TokenService`]: the seam to the token endpoints, with an HTTP
//!   implementation in [`HttpTokenService`]
//! - An explicit token lifecycle state machine (see [`token_fsm`])
//! - Unverified claim decoding (see [`claims`])

pub mod claims;
mod clock;
mod error;
mod session;
pub mod token_fsm;
mod token_service;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use claims::{decode_claims, needs_refresh, Claims};
pub use clock::{Clock, SystemClock};
pub use error::{AuthError, AuthResult};
pub use session::{
    AuthStatus, AuthStatusChanged, AuthUser, SessionManager, StatusSubscription, TokenEvent,
    DEFAULT_REFRESH_SKEW_SECS,
};
pub use token_fsm::{TokenMachine, TokenMachineInput, TokenMachineState, TokenPhase};
pub use token_service::{HttpTokenService, TokenService};
