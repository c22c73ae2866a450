//! Session layer for the forms client.
//!
//! This crate provides:
//! - Access token claims decoding into a typed [`Identity`]
//! - REST client for login, register and token refresh
//! - Single-flight token refresh shared by every caller
//! - Authenticated requests with one refresh-and-resend on 401
//! - Session supervision (bootstrap, login, logout) with an explicit FSM

mod api;
mod auth_fsm;
mod claims;
mod coordinator;
mod error;
mod request_client;
mod supervisor;

pub use api::{AuthApi, HttpAuthApi, TokenPair};
pub use auth_fsm::auth_machine;
pub use auth_fsm::{
    AuthMachine, AuthMachineInput, AuthMachineState, AuthState, AuthStateChangedPayload,
};
pub use claims::{decode_access_token, Identity, ADMIN_ROLE};
pub use coordinator::{
    CredentialEvent, CredentialObserver, RefreshState, TokenRefreshCoordinator,
    DEFAULT_SAFETY_MARGIN,
};
pub use error::{AuthError, AuthResult};
pub use request_client::{
    ApiRequest, ApiResponse, AuthenticatedRequestClient, HttpRequestSender, RequestSender,
};
pub use supervisor::{AuthStateCallback, SessionSupervisor};

/// Re-exported so callers can build [`ApiRequest`]s without naming reqwest.
pub use reqwest::Method;
