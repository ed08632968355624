//! In-process identity backend
//!
//! Behaves like the console's test phone numbers: only registered numbers
//! accept a verification request, and each has one fixed code.

use super::backend::IdentityBackend;
use super::types::User;
use crate::error::{FirebaseError, StateError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Default session lifetime handed out by the in-memory backend
const TOKEN_LIFETIME_SECS: i64 = 3600;

/// Shared in-memory identity provider
#[derive(Clone, Default)]
pub struct MemoryIdentityBackend {
    inner: Arc<IdentityInner>,
}

#[derive(Default)]
struct IdentityInner {
    state: Mutex<IdentityState>,
    calls: AtomicUsize,
}

struct IdentityState {
    test_numbers: HashMap<String, String>,
    sessions: HashMap<String, String>,
    known_users: HashSet<String>,
    next_session: u64,
    next_refresh: u64,
    token_lifetime_secs: i64,
    current_user: Option<Arc<User>>,
    last_language: Option<String>,
    fail_sign_out: Option<String>,
}

impl Default for IdentityState {
    fn default() -> Self {
        Self {
            test_numbers: HashMap::new(),
            sessions: HashMap::new(),
            known_users: HashSet::new(),
            next_session: 0,
            next_refresh: 0,
            token_lifetime_secs: TOKEN_LIFETIME_SECS,
            current_user: None,
            last_language: None,
            fail_sign_out: None,
        }
    }
}

impl MemoryIdentityBackend {
    /// Provider with no test numbers
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider accepting each `(phone_number, code)` pair
    pub fn with_test_numbers<I, P, C>(numbers: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        let state = IdentityState {
            test_numbers: numbers
                .into_iter()
                .map(|(phone, code)| (phone.into(), code.into()))
                .collect(),
            ..IdentityState::default()
        };
        Self {
            inner: Arc::new(IdentityInner {
                state: Mutex::new(state),
                calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Register another test number
    pub async fn add_test_number(&self, phone_number: impl Into<String>, code: impl Into<String>) {
        self.inner
            .state
            .lock()
            .await
            .test_numbers
            .insert(phone_number.into(), code.into());
    }

    /// Make the next sign-out fail with `message`
    pub async fn fail_sign_out(&self, message: impl Into<String>) {
        self.inner.state.lock().await.fail_sign_out = Some(message.into());
    }

    /// Lifetime of ID tokens issued from now on
    pub async fn set_token_lifetime(&self, secs: i64) {
        self.inner.state.lock().await.token_lifetime_secs = secs;
    }

    /// Language of the last verification request
    pub async fn last_language(&self) -> Option<String> {
        self.inner.state.lock().await.last_language.clone()
    }

    /// Number of backend operations issued so far
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }
}

impl IdentityBackend for MemoryIdentityBackend {
    async fn send_verification_code(
        &self,
        phone_number: &str,
        language_code: &str,
    ) -> Result<String, FirebaseError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.inner.state.lock().await;

        if !state.test_numbers.contains_key(phone_number) {
            return Err(FirebaseError::backend("INVALID_PHONE_NUMBER"));
        }

        state.next_session += 1;
        let verification_id = format!("session-{}", state.next_session);
        state
            .sessions
            .insert(verification_id.clone(), phone_number.to_string());
        state.last_language = Some(language_code.to_string());
        Ok(verification_id)
    }

    async fn sign_in_with_phone_number(
        &self,
        verification_id: &str,
        code: &str,
    ) -> Result<Arc<User>, FirebaseError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.inner.state.lock().await;

        let Some(phone_number) = state.sessions.get(verification_id).cloned() else {
            return Err(FirebaseError::backend("INVALID_SESSION_INFO"));
        };
        if state.test_numbers.get(&phone_number).map(String::as_str) != Some(code) {
            return Err(FirebaseError::backend("INVALID_CODE"));
        }
        state.sessions.remove(verification_id);

        let uid = format!("uid{}", phone_number.trim_start_matches('+'));
        let mut user = User::new(uid.clone()).with_tokens(
            format!("id-token-{verification_id}"),
            format!("refresh-token-{verification_id}"),
            state.token_lifetime_secs,
            chrono::Utc::now(),
        );
        user.phone_number = Some(phone_number);
        user.is_new_user = state.known_users.insert(uid);

        let user = Arc::new(user);
        state.current_user = Some(Arc::clone(&user));
        Ok(user)
    }

    async fn refresh_session(&self) -> Result<Arc<User>, FirebaseError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.inner.state.lock().await;

        let Some(user) = state.current_user.clone() else {
            return Err(StateError::NotSignedIn.into());
        };
        if user.refresh_token().is_none() {
            return Err(StateError::MissingRefreshToken.into());
        }

        state.next_refresh += 1;
        let renewed = Arc::new(user.refreshed(
            format!("id-token-refresh-{}", state.next_refresh),
            format!("refresh-token-refresh-{}", state.next_refresh),
            state.token_lifetime_secs,
            chrono::Utc::now(),
        ));
        state.current_user = Some(Arc::clone(&renewed));
        Ok(renewed)
    }

    async fn current_user(&self) -> Option<Arc<User>> {
        self.inner.state.lock().await.current_user.clone()
    }

    async fn sign_out(&self) -> Result<(), FirebaseError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.inner.state.lock().await;

        if let Some(message) = state.fail_sign_out.take() {
            return Err(FirebaseError::Backend(message));
        }
        state.current_user = None;
        Ok(())
    }
}

impl std::fmt::Debug for MemoryIdentityBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryIdentityBackend")
            .field("calls", &self.calls())
            .finish()
    }
}
