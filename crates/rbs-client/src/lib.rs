//! RBS client session core.
//!
//! This crate provides:
//! - [`RbsClient`]: an owned client session wiring token lifecycle, action
//!   execution and the realtime socket together
//! - [`RequestExecutor`]: action calls with automatic token handling
//! - [`VisibilityTracker`]: foreground/background signal driving the socket
//! - [`ActionTransport`]: the HTTP seam for action calls

mod action;
mod client;
mod error;
mod executor;
mod transport;
mod visibility;

pub use action::{ActionRequest, CoreAction, RequestMode, CONNECT_SOCKET};
pub use client::{ActionTask, ClientServices, ListenerHandle, RbsClient};
pub use error::{
    ClientError, ClientResult, ExecError, ExecResult, TransportError, TransportResult,
};
pub use executor::RequestExecutor;
pub use transport::{ActionCall, ActionTransport, HttpActionTransport, HttpMethod};
pub use visibility::{Visibility, VisibilityTracker};

pub use rbs_auth::{AuthStatus, AuthStatusChanged, AuthUser, StatusSubscription};
pub use rbs_realtime::{ConnectionState, RealtimeEvent};
