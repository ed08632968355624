//! Firebase Kit
//!
//! Thin typed façade over the Firebase Realtime Database and phone-number
//! authentication. Reads and writes take a list of path segments and serde
//! models; continuous reads deliver to a callback until cancelled.
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), firebase_kit::FirebaseError> {
//! use firebase_kit::{FirebaseKit, KitOptions};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Message {
//!     text: String,
//! }
//!
//! let kit = FirebaseKit::create(KitOptions::from_env()?).await?;
//!
//! kit.auth().request_verification("7700900123").await?;
//! kit.confirm_otp("123456").await?;
//!
//! let path = kit
//!     .database()
//!     .await?
//!     .create(["rooms", "lobby"], &Message { text: "hi".into() }, true)
//!     .await?;
//! println!("Written to {}", path);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod kit;
pub mod logging;

// Realtime Database module
pub mod database {
    //! Firebase Realtime Database

    pub mod backend;
    pub mod codec;
    #[allow(clippy::module_inception)]
    pub mod database;
    pub mod listener;
    pub mod memory;
    pub mod path;
    pub mod push_id;
    pub mod query;
    pub mod rest;
    pub mod snapshot;
    pub mod sse;
    pub mod tree;

    pub use backend::{DatabaseBackend, SnapshotStream};
    pub use codec::{DecodeFailure, Envelope, Response};
    pub use database::{Database, ListMode, Listing, ResponseCallback, UpdateOutcome};
    pub use listener::{ChildEventKind, ListenerHandle};
    pub use memory::MemoryBackend;
    pub use path::{DatabasePath, IntoPath};
    pub use query::{Filter, ListOptions, QuerySpec};
    pub use rest::{RestBackend, RestSettings};
    pub use snapshot::DataSnapshot;
}

// Auth module
pub mod auth {
    //! Firebase phone authentication

    pub mod backend;
    pub mod memory;
    pub mod phone;
    pub mod rest;
    pub mod types;

    pub use backend::IdentityBackend;
    pub use memory::MemoryIdentityBackend;
    pub use phone::{AuthStateStream, PhoneAuth};
    pub use rest::RestIdentityBackend;
    pub use types::User;
}

// Re-exports for convenience
pub use error::{ConfigError, FirebaseError, StateError};
pub use kit::{FirebaseKit, KitOptions};

pub use auth::{PhoneAuth, User};
pub use database::{
    ChildEventKind, Database, Envelope, Filter, ListMode, ListOptions, ListenerHandle, Listing,
    Response, UpdateOutcome,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_types_exist() {
        // Basic smoke test
        let _err: FirebaseError = ConfigError::MissingOrderKey.into();
        let _err: FirebaseError = StateError::NoPendingVerification.into();
    }
}
