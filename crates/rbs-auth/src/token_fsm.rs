//! Token lifecycle state machine using rust-fsm.
//!
//! Every exchange with the token endpoints moves the session through this
//! machine, so an in-flight bootstrap, custom-token exchange or refresh is
//! always visible as a distinct phase.
//!
//! ## State Diagram
//!
//! ```text
//!                  ┌─────────────────┐
//!   ┌────────────► │  NoCredential   │ (initial) ◄──────────── SignedOut (any)
//!   │              └───┬─────────┬───┘
//!   │ ExchangeFailed   │         │ CustomTokenSubmitted
//!   │  AnonymousRequested        ▼
//!   │                  │   ┌─────────────┐
//!   │                  │   │ Exchanging  │──┐
//!   │                  ▼   └─────────────┘  │ TokenIssued
//! ┌─┴────────────┐                          │
//! │ Bootstrapping│── TokenIssued ──┐        │   CredentialRestored
//! └──────────────┘                 ▼        ▼   (from NoCredential)
//!                        ┌─────────────────────┐
//!                        │    HasCredential    │
//!                        └───┬──────────────┬──┘
//!            RefreshStarted  │              │ CustomTokenSubmitted
//!                            ▼              ▼
//!                   ┌─────────────┐  ┌─────────────┐
//!                   │ Refreshing  │  │  Switching  │
//!                   └─────────────┘  └─────────────┘
//!   TokenIssued → HasCredential      TokenIssued / ExchangeFailed → HasCredential
//!   RefreshRejected → NoCredential
//! ```

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub token_machine(NoCredential)

    NoCredential => {
        AnonymousRequested => Bootstrapping,
        CustomTokenSubmitted => Exchanging,
        CredentialRestored => HasCredential,
        SignedOut => NoCredential
    },
    Bootstrapping => {
        TokenIssued => HasCredential,
        ExchangeFailed => NoCredential,
        SignedOut => NoCredential
    },
    Exchanging => {
        TokenIssued => HasCredential,
        ExchangeFailed => NoCredential,
        SignedOut => NoCredential
    },
    HasCredential => {
        RefreshStarted => Refreshing,
        CustomTokenSubmitted => Switching,
        SignedOut => NoCredential
    },
    Switching => {
        TokenIssued => HasCredential,
        // A failed switch keeps the previous credential.
        ExchangeFailed => HasCredential,
        SignedOut => NoCredential
    },
    Refreshing => {
        TokenIssued => HasCredential,
        RefreshRejected => NoCredential,
        SignedOut => NoCredential
    }
}

pub use token_machine::Input as TokenMachineInput;
pub use token_machine::State as TokenMachineState;
pub use token_machine::StateMachine as TokenMachine;

/// Externally visible phase of the token lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPhase {
    /// No credential held.
    NoCredential,
    /// Anonymous bootstrap in flight.
    Bootstrapping,
    /// Custom-token exchange in flight with no prior credential.
    Exchanging,
    /// A credential is held and no exchange is running.
    HasCredential,
    /// Custom-token exchange in flight while a credential is held.
    Switching,
    /// Refresh in flight.
    Refreshing,
}

impl TokenPhase {
    /// Returns true while a request to the token endpoints is outstanding.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TokenPhase::Bootstrapping
                | TokenPhase::Exchanging
                | TokenPhase::Switching
                | TokenPhase::Refreshing
        )
    }
}

impl From<&TokenMachineState> for TokenPhase {
    fn from(state: &TokenMachineState) -> Self {
        match state {
            TokenMachineState::NoCredential => TokenPhase::NoCredential,
            TokenMachineState::Bootstrapping => TokenPhase::Bootstrapping,
            TokenMachineState::Exchanging => TokenPhase::Exchanging,
            TokenMachineState::HasCredential => TokenPhase::HasCredential,
            TokenMachineState::Switching => TokenPhase::Switching,
            TokenMachineState::Refreshing => TokenPhase::Refreshing,
        }
    }
}
