//! Phone-number authentication
//!
//! Two-step flow: [`PhoneAuth::request_verification`] sends a one-time code
//! and remembers the verification ID, [`PhoneAuth::confirm_otp`] consumes
//! it together with the code the user typed in.

use super::backend::IdentityBackend;
use super::types::User;
use crate::error::{ConfigError, FirebaseError, StateError};
use async_stream::stream;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};

/// Stream of sign-in state, `None` when signed out
pub type AuthStateStream = Pin<Box<dyn Stream<Item = Option<Arc<User>>> + Send>>;

#[derive(Debug, Default)]
struct PhoneSettings {
    language_code: Option<String>,
    phone_code: Option<String>,
}

/// Phone authentication façade
///
/// Cheap to clone; clones share the pending verification and the session.
///
/// # Example
/// ```no_run
/// # async fn example() -> Result<(), firebase_kit::FirebaseError> {
/// use firebase_kit::auth::{MemoryIdentityBackend, PhoneAuth};
///
/// let backend = MemoryIdentityBackend::with_test_numbers([("+447700900123", "123456")]);
/// let auth = PhoneAuth::new(backend);
/// auth.set_language_code("uk").await;
/// auth.set_phone_code("+44").await;
///
/// auth.request_verification("7700900123").await?;
/// let user = auth.confirm_otp("123456").await?;
/// println!("Signed in: {}", user.uid);
/// # Ok(())
/// # }
/// ```
pub struct PhoneAuth<B: IdentityBackend> {
    inner: Arc<PhoneAuthInner<B>>,
}

struct PhoneAuthInner<B> {
    backend: B,
    settings: RwLock<PhoneSettings>,
    pending: Mutex<Option<String>>,
    state_tx: broadcast::Sender<Option<Arc<User>>>,
}

impl<B: IdentityBackend> Clone for PhoneAuth<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: IdentityBackend> PhoneAuth<B> {
    /// Façade over `backend`, with no language or phone code set
    pub fn new(backend: B) -> Self {
        // Create broadcast channel for auth state changes (capacity: 16)
        let (state_tx, _) = broadcast::channel(16);

        Self {
            inner: Arc::new(PhoneAuthInner {
                backend,
                settings: RwLock::new(PhoneSettings::default()),
                pending: Mutex::new(None),
                state_tx,
            }),
        }
    }

    /// The underlying backend
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Set the language the verification SMS is written in, e.g. `"uk"`
    pub async fn set_language_code(&self, language_code: impl Into<String>) {
        self.inner.settings.write().await.language_code = Some(language_code.into());
    }

    /// Set the country prefix prepended to phone numbers, e.g. `"+44"`
    pub async fn set_phone_code(&self, phone_code: impl Into<String>) {
        self.inner.settings.write().await.phone_code = Some(phone_code.into());
    }

    /// Configured language code
    pub async fn language_code(&self) -> Option<String> {
        self.inner.settings.read().await.language_code.clone()
    }

    /// Configured country prefix
    pub async fn phone_code(&self) -> Option<String> {
        self.inner.settings.read().await.phone_code.clone()
    }

    /// Check if a verification is waiting for its code
    pub async fn has_pending_verification(&self) -> bool {
        self.inner.pending.lock().await.is_some()
    }

    /// Send a one-time code to `phone_number` (without country prefix)
    ///
    /// Replaces any verification already pending. On failure the previous
    /// state is kept.
    pub async fn request_verification(
        &self,
        phone_number: impl AsRef<str>,
    ) -> Result<(), FirebaseError> {
        let phone_number = phone_number.as_ref().trim();
        let (language_code, phone_code) = {
            let settings = self.inner.settings.read().await;
            (settings.language_code.clone(), settings.phone_code.clone())
        };

        // Validate configuration (error case first)
        let Some(language_code) = language_code.filter(|code| !code.is_empty()) else {
            return Err(ConfigError::LanguageCodeNotSet.into());
        };
        let Some(phone_code) = phone_code.filter(|code| !code.is_empty()) else {
            return Err(ConfigError::PhoneCodeNotSet.into());
        };
        if !phone_code.starts_with('+') {
            return Err(ConfigError::InvalidPhoneCode(phone_code).into());
        }
        if phone_number.is_empty() {
            return Err(ConfigError::EmptyPhoneNumber.into());
        }

        let full_number = format!("{phone_code}{phone_number}");
        tracing::debug!(language = %language_code, "Requesting phone verification");

        let verification_id = match self
            .inner
            .backend
            .send_verification_code(&full_number, &language_code)
            .await
        {
            Err(e) => {
                tracing::error!(error = %e, "Phone verification request failed");
                return Err(e);
            }
            Ok(id) => id,
        };

        *self.inner.pending.lock().await = Some(verification_id);
        Ok(())
    }

    /// Confirm the one-time code of the pending verification
    ///
    /// The verification is consumed only on success, so a mistyped code can
    /// be retried.
    pub async fn confirm_otp(&self, code: impl AsRef<str>) -> Result<Arc<User>, FirebaseError> {
        let code = code.as_ref().trim();

        // Held across the exchange so a verification is consumed at most once
        let mut pending = self.inner.pending.lock().await;

        // Validate state (error case first)
        let Some(verification_id) = pending.as_deref() else {
            return Err(StateError::NoPendingVerification.into());
        };
        if code.is_empty() {
            return Err(ConfigError::EmptyVerificationCode.into());
        }

        let user = match self
            .inner
            .backend
            .sign_in_with_phone_number(verification_id, code)
            .await
        {
            Err(e) => {
                tracing::error!(error = %e, "One-time code rejected");
                return Err(e);
            }
            Ok(user) => user,
        };
        *pending = None;
        drop(pending);

        tracing::debug!(uid = %user.uid, "Signed in with phone number");
        // Ignore error if no listeners
        let _ = self.inner.state_tx.send(Some(Arc::clone(&user)));
        Ok(user)
    }

    /// Check if a user is signed in
    pub async fn is_logged_in(&self) -> bool {
        self.inner.backend.current_user().await.is_some()
    }

    /// Get the current signed-in user
    pub async fn current_user(&self) -> Option<Arc<User>> {
        self.inner.backend.current_user().await
    }

    /// ID token of the signed-in user, `None` when signed out
    ///
    /// A token within five minutes of expiry, or any token when
    /// `force_refresh` is set, is renewed through the backend first.
    pub async fn id_token(&self, force_refresh: bool) -> Result<Option<String>, FirebaseError> {
        let Some(user) = self.current_user().await else {
            return Ok(None);
        };
        if !force_refresh && !user.is_token_expired(chrono::Utc::now()) {
            return Ok(user.id_token().map(str::to_string));
        }

        let user = match self.inner.backend.refresh_session().await {
            Err(e) => {
                tracing::error!(error = %e, "ID token refresh failed");
                return Err(e);
            }
            Ok(user) => user,
        };
        Ok(user.id_token().map(str::to_string))
    }

    /// Sign out and drop any pending verification
    ///
    /// Backend failures are logged, not returned.
    pub async fn sign_out(&self) {
        *self.inner.pending.lock().await = None;

        if let Err(e) = self.inner.backend.sign_out().await {
            tracing::error!(error = %e, "Sign out failed");
        }

        let _ = self.inner.state_tx.send(None);
    }

    /// Subscribe to sign-in state changes
    ///
    /// Yields the current user immediately, then again after every sign-in
    /// and sign-out.
    ///
    /// # Example
    /// ```no_run
    /// # use firebase_kit::auth::{MemoryIdentityBackend, PhoneAuth};
    /// # async fn example(auth: PhoneAuth<MemoryIdentityBackend>) {
    /// use futures::StreamExt;
    ///
    /// let mut stream = auth.auth_state_changes().await;
    /// while let Some(user) = stream.next().await {
    ///     match user {
    ///         Some(u) => println!("User signed in: {}", u.uid),
    ///         None => println!("User signed out"),
    ///     }
    /// }
    /// # }
    /// ```
    pub async fn auth_state_changes(&self) -> AuthStateStream {
        // Subscribe before reading the current user so no change is missed
        let mut rx = self.inner.state_tx.subscribe();
        let initial_user = self.current_user().await;

        Box::pin(stream! {
            yield initial_user;

            loop {
                let user = match rx.recv().await {
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Auth state listener lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Ok(u) => u,
                };
                yield user;
            }
        })
    }
}

impl<B: IdentityBackend + std::fmt::Debug> std::fmt::Debug for PhoneAuth<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhoneAuth")
            .field("backend", &self.inner.backend)
            .finish()
    }
}
