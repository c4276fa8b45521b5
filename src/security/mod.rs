//! Security boundaries of the gateway.
//!
//! [`PathSandbox`] confines every file-touching tool call to the configured
//! workspace root under a [`WorkspacePolicy`]. [`AuthGate`] guards the
//! control-plane HTTP surface with a single shared bearer secret compared in
//! constant time.

pub mod auth;
pub mod workspace;

pub use auth::{AuthError, AuthGate, HEALTH_PATH, constant_time_eq};
pub use workspace::{PathSandbox, PathValidation, SandboxError, WorkspacePolicy};

/// True when `host` is not a loopback address.
pub fn is_public_bind(host: &str) -> bool {
    !matches!(host, "127.0.0.1" | "localhost" | "::1" | "[::1]")
        && !host.starts_with("127.")
}
