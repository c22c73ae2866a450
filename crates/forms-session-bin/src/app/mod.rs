//! Application wiring and command handlers.

mod commands;
mod hub_tokens;
mod state;

pub use commands::{get, login, logout, refresh, register, status, watch};
pub use state::SessionApp;
