//! Authentication types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Tokens this close to expiry count as expired
const EXPIRY_MARGIN_SECS: i64 = 300;

/// A signed-in identity
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Unique Firebase user ID
    pub uid: String,

    /// Phone number in E.164 form, e.g. `+447700900123`
    pub phone_number: Option<String>,

    /// Display name (if available)
    pub display_name: Option<String>,

    /// Email address (if available)
    pub email: Option<String>,

    /// Whether this sign-in created the account
    pub is_new_user: bool,

    /// ID token (JWT) - internal use
    #[serde(skip)]
    pub(crate) id_token: Option<String>,

    /// Refresh token - internal use
    #[serde(skip)]
    pub(crate) refresh_token: Option<String>,

    /// When the ID token stops being valid - internal use
    #[serde(skip)]
    pub(crate) token_expiration: Option<DateTime<Utc>>,
}

impl User {
    /// User with only an ID
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            phone_number: None,
            display_name: None,
            email: None,
            is_new_user: false,
            id_token: None,
            refresh_token: None,
            token_expiration: None,
        }
    }

    /// Attach session tokens valid for `expires_in_secs` from `now`
    pub(crate) fn with_tokens(
        mut self,
        id_token: String,
        refresh_token: String,
        expires_in_secs: i64,
        now: DateTime<Utc>,
    ) -> Self {
        self.id_token = Some(id_token);
        self.refresh_token = Some(refresh_token);
        self.token_expiration = Some(now + Duration::seconds(expires_in_secs));
        self
    }

    /// Copy of this user carrying renewed tokens
    pub(crate) fn refreshed(
        &self,
        id_token: String,
        refresh_token: String,
        expires_in_secs: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let mut user = self.clone().with_tokens(id_token, refresh_token, expires_in_secs, now);
        user.is_new_user = false;
        user
    }

    /// ID token for authenticating database requests
    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }

    /// Refresh token for renewing the session
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// When the ID token expires
    pub fn token_expiration(&self) -> Option<DateTime<Utc>> {
        self.token_expiration
    }

    /// Check if the ID token is missing or expires within five minutes of `now`
    pub fn is_token_expired(&self, now: DateTime<Utc>) -> bool {
        match (&self.id_token, self.token_expiration) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(_), Some(expiration)) => {
                now >= expiration - Duration::seconds(EXPIRY_MARGIN_SECS)
            }
        }
    }
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("uid", &self.uid)
            .field("phone_number", &self.phone_number)
            .field("display_name", &self.display_name)
            .field("email", &self.email)
            .field("is_new_user", &self.is_new_user)
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .field("token_expiration", &self.token_expiration)
            .finish()
    }
}
