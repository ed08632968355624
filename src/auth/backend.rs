//! Identity backend seam
//!
//! The phone façade only sequences calls and keeps the pending
//! verification; the backend owns the protocol and the signed-in session.

use super::types::User;
use crate::error::FirebaseError;
use std::future::Future;
use std::sync::Arc;

/// Identity provider able to run the phone-number flow
pub trait IdentityBackend: Send + Sync + 'static {
    /// Send a one-time code to `phone_number`, returning the verification ID
    fn send_verification_code(
        &self,
        phone_number: &str,
        language_code: &str,
    ) -> impl Future<Output = Result<String, FirebaseError>> + Send;

    /// Exchange a verification ID and code for a session
    fn sign_in_with_phone_number(
        &self,
        verification_id: &str,
        code: &str,
    ) -> impl Future<Output = Result<Arc<User>, FirebaseError>> + Send;

    /// Trade the session's refresh token for a new ID token
    ///
    /// Replaces the current user with one carrying the new tokens.
    fn refresh_session(&self) -> impl Future<Output = Result<Arc<User>, FirebaseError>> + Send;

    /// User of the current session, if any
    fn current_user(&self) -> impl Future<Output = Option<Arc<User>>> + Send;

    /// End the current session
    fn sign_out(&self) -> impl Future<Output = Result<(), FirebaseError>> + Send;
}
