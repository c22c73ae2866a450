//! Authentication state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//!                 ┌─────────────────┐
//!        ┌───────►│    Anonymous    │ (initial)
//!        │        └──┬──────────┬───┘
//!        │  Bootstrap│          │LoginAttempt
//!        │           ▼          ▼
//!        │  ┌──────────────┐  ┌──────────────┐
//!        ├──┤ Bootstrapping│  │  LoggingIn   ├──► LoginFailed ──► Anonymous
//!        │  └──────┬───────┘  └──────┬───────┘
//!        │ NoSession /               │ LoginSuccess
//!        │ SessionExpired            ▼
//!        │         │ CredentialValid ┌─────────────────┐
//!        │         └────────────────►│  Authenticated  │
//!        │                           └───────┬─────────┘
//!        │ SessionExpired                    │ LogoutRequested
//!        │                                   ▼
//!        │                           ┌─────────────────┐
//!        └───────────────────────────┤   LoggingOut    │
//!                  LogoutComplete    └─────────────────┘
//! ```
//!
//! `Authenticated` may also re-enter `Bootstrapping` (visibility regained)
//! and `LoggingIn` (switching accounts).

use rust_fsm::*;
use serde::{Deserialize, Serialize};

// Generates a module `auth_machine` with State, Input and StateMachine.
state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub auth_machine(Anonymous)

    Anonymous => {
        Bootstrap => Bootstrapping,
        LoginAttempt => LoggingIn,
        LogoutRequested => LoggingOut
    },
    Bootstrapping => {
        // Stored credential was fresh, or was refreshed
        CredentialValid => Authenticated,
        NoSession => Anonymous,
        // Refresh failed; the store has been cleared
        SessionExpired => Anonymous
    },
    LoggingIn => {
        LoginSuccess => Authenticated,
        LoginFailed => Anonymous
    },
    Authenticated => {
        Bootstrap => Bootstrapping,
        SessionExpired => Anonymous,
        LoginAttempt => LoggingIn,
        LogoutRequested => LoggingOut
    },
    LoggingOut => {
        LogoutComplete => Anonymous
    }
}

pub use auth_machine::Input as AuthMachineInput;
pub use auth_machine::State as AuthMachineState;
pub use auth_machine::StateMachine as AuthMachine;

/// Authentication state for external consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    /// No session.
    Anonymous,
    /// Checking (and if needed refreshing) the stored credential.
    Bootstrapping,
    /// Exchanging user credentials for tokens.
    LoggingIn,
    /// Holding a credential whose claims decoded into an identity.
    Authenticated,
    /// Clearing the session.
    LoggingOut,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated)
    }

    /// Returns true if the state is a transient/in-progress state.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AuthState::Bootstrapping | AuthState::LoggingIn | AuthState::LoggingOut
        )
    }
}

impl From<&AuthMachineState> for AuthState {
    fn from(state: &AuthMachineState) -> Self {
        match state {
            AuthMachineState::Anonymous => AuthState::Anonymous,
            AuthMachineState::Bootstrapping => AuthState::Bootstrapping,
            AuthMachineState::LoggingIn => AuthState::LoggingIn,
            AuthMachineState::Authenticated => AuthState::Authenticated,
            AuthMachineState::LoggingOut => AuthState::LoggingOut,
        }
    }
}

/// Payload for auth state change events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStateChangedPayload {
    pub state: AuthState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_anonymous() {
        let machine = AuthMachine::new();
        assert_eq!(*machine.state(), AuthMachineState::Anonymous);
    }

    #[test]
    fn test_login_flow() {
        let mut machine = AuthMachine::new();

        machine.consume(&AuthMachineInput::LoginAttempt).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::LoggingIn);

        machine.consume(&AuthMachineInput::LoginSuccess).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::Authenticated);
    }

    #[test]
    fn test_login_failure_returns_to_anonymous() {
        let mut machine = AuthMachine::new();

        machine.consume(&AuthMachineInput::LoginAttempt).unwrap();
        machine.consume(&AuthMachineInput::LoginFailed).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::Anonymous);
    }

    #[test]
    fn test_bootstrap_outcomes() {
        let mut machine = AuthMachine::new();
        machine.consume(&AuthMachineInput::Bootstrap).unwrap();
        machine.consume(&AuthMachineInput::NoSession).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::Anonymous);

        machine.consume(&AuthMachineInput::Bootstrap).unwrap();
        machine.consume(&AuthMachineInput::CredentialValid).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::Authenticated);

        // Visibility regained while authenticated, refresh fails.
        machine.consume(&AuthMachineInput::Bootstrap).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::Bootstrapping);
        machine.consume(&AuthMachineInput::SessionExpired).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::Anonymous);
    }

    #[test]
    fn test_session_expiry_while_authenticated() {
        let mut machine = AuthMachine::new();
        machine.consume(&AuthMachineInput::LoginAttempt).unwrap();
        machine.consume(&AuthMachineInput::LoginSuccess).unwrap();

        machine.consume(&AuthMachineInput::SessionExpired).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::Anonymous);
    }

    #[test]
    fn test_logout_flow() {
        let mut machine = AuthMachine::new();
        machine.consume(&AuthMachineInput::LoginAttempt).unwrap();
        machine.consume(&AuthMachineInput::LoginSuccess).unwrap();

        machine.consume(&AuthMachineInput::LogoutRequested).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::LoggingOut);

        machine.consume(&AuthMachineInput::LogoutComplete).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::Anonymous);
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let mut machine = AuthMachine::new();

        assert!(machine.consume(&AuthMachineInput::LoginSuccess).is_err());
        assert!(machine.consume(&AuthMachineInput::CredentialValid).is_err());
        assert_eq!(*machine.state(), AuthMachineState::Anonymous);

        machine.consume(&AuthMachineInput::LoginAttempt).unwrap();
        assert!(machine.consume(&AuthMachineInput::Bootstrap).is_err());
        assert_eq!(*machine.state(), AuthMachineState::LoggingIn);
    }

    #[test]
    fn test_auth_state_helpers() {
        assert!(AuthState::Authenticated.is_authenticated());
        assert!(!AuthState::Anonymous.is_authenticated());
        assert!(AuthState::Bootstrapping.is_transient());
        assert!(!AuthState::Authenticated.is_transient());
        assert_eq!(
            serde_json::to_string(&AuthState::LoggingIn).unwrap(),
            "\"logging_in\""
        );
    }
}
