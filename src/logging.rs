//! Log output
//!
//! The crate only emits `tracing` events. Applications that do not install
//! their own subscriber can call [`init`] to print them.

use crate::error::FirebaseError;
use tracing_subscriber::EnvFilter;

/// Install a formatting subscriber filtered by `RUST_LOG`
///
/// `default_directive` (e.g. `"firebase_kit=debug"`) applies when `RUST_LOG`
/// is unset. Fails if the directive is malformed or a global subscriber is
/// already installed.
pub fn init(default_directive: &str) -> Result<(), FirebaseError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive).map_err(|e| {
            FirebaseError::internal(format!("Invalid log filter '{}': {}", default_directive, e))
        })?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| FirebaseError::internal(format!("Failed to install log subscriber: {}", e)))
}
