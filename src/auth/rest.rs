//! Identity Toolkit REST backend
//!
//! Phone sign-in is two calls: `accounts:sendVerificationCode` returns a
//! session info string, and `accounts:signInWithPhoneNumber` trades it
//! plus the SMS code for ID and refresh tokens. ID tokens live about an
//! hour; the Secure Token service renews them from the refresh token.

use super::backend::IdentityBackend;
use super::types::User;
use crate::database::RestSettings;
use crate::error::{ConfigError, FirebaseError, StateError};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Production Identity Toolkit endpoint
pub const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";

/// Production Secure Token endpoint
pub const SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1";

/// Backend speaking the Identity Toolkit REST protocol
#[derive(Clone)]
pub struct RestIdentityBackend {
    inner: Arc<RestIdentityInner>,
}

struct RestIdentityInner {
    api_key: String,
    base_url: String,
    token_url: String,
    recaptcha_token: Option<String>,
    http_client: reqwest::Client,
    current_user: RwLock<Option<Arc<User>>>,
}

impl RestIdentityBackend {
    /// Backend for the project owning `api_key`
    ///
    /// `recaptcha_token` is forwarded with every verification request; the
    /// server requires one unless the number is a configured test number.
    pub fn new(
        api_key: impl Into<String>,
        recaptcha_token: Option<String>,
        settings: &RestSettings,
    ) -> Result<Self, FirebaseError> {
        Self::with_base_url(api_key, IDENTITY_TOOLKIT_URL, recaptcha_token, settings)
    }

    /// Backend sending sign-in calls to `base_url`
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        recaptcha_token: Option<String>,
        settings: &RestSettings,
    ) -> Result<Self, FirebaseError> {
        Self::with_endpoints(api_key, base_url, SECURE_TOKEN_URL, recaptcha_token, settings)
    }

    /// Backend with both services relocated, e.g. to the Auth emulator
    pub fn with_endpoints(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        token_url: impl Into<String>,
        recaptcha_token: Option<String>,
        settings: &RestSettings,
    ) -> Result<Self, FirebaseError> {
        let api_key = api_key.into();

        // Validate API key (error case first)
        if api_key.is_empty() {
            return Err(ConfigError::ApiKeyNotConfigured.into());
        }

        let http_client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|e| FirebaseError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            inner: Arc::new(RestIdentityInner {
                api_key,
                base_url: base_url.into().trim_end_matches('/').to_string(),
                token_url: token_url.into().trim_end_matches('/').to_string(),
                recaptcha_token,
                http_client,
                current_user: RwLock::new(None),
            }),
        })
    }

    /// Get the API key for this backend
    pub fn api_key(&self) -> &str {
        &self.inner.api_key
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/accounts:{}?key={}", self.inner.base_url, method, self.inner.api_key)
    }

    fn token_endpoint(&self) -> String {
        format!("{}/token?key={}", self.inner.token_url, self.inner.api_key)
    }

    async fn post(
        &self,
        method: &str,
        body: Value,
        locale: Option<&str>,
    ) -> Result<reqwest::Response, FirebaseError> {
        self.send(method, self.endpoint(method), body, locale).await
    }

    async fn send(
        &self,
        method: &str,
        url: String,
        body: Value,
        locale: Option<&str>,
    ) -> Result<reqwest::Response, FirebaseError> {
        tracing::debug!(method, "Identity Toolkit request");

        let mut request = self.inner.http_client.post(url).json(&body);
        if let Some(locale) = locale {
            request = request.header("X-Firebase-Locale", locale);
        }
        let response = request.send().await?;

        // Handle error responses first
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = error_message(status, &body);
            tracing::error!(method, %status, %message, "Identity Toolkit request failed");
            return Err(FirebaseError::Backend(message));
        }
        Ok(response)
    }
}

/// Server message from an Identity Toolkit error body, passed through verbatim
fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| format!("HTTP {}: {}", status, body))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendCodeResponse {
    session_info: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PhoneSignInResponse {
    local_id: String,
    id_token: String,
    refresh_token: String,
    phone_number: Option<String>,
    expires_in: Option<String>,
    #[serde(default)]
    is_new_user: bool,
}

impl PhoneSignInResponse {
    fn into_user(self) -> User {
        // expires_in is seconds as a string; one hour when missing
        let expires_in = self
            .expires_in
            .as_deref()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(3600);

        let mut user = User::new(self.local_id).with_tokens(
            self.id_token,
            self.refresh_token,
            expires_in,
            chrono::Utc::now(),
        );
        user.phone_number = self.phone_number;
        user.is_new_user = self.is_new_user;
        user
    }
}

#[derive(Deserialize)]
struct TokenRefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: Option<String>,
}

impl TokenRefreshResponse {
    fn into_user(self, previous: &User) -> User {
        let expires_in = self
            .expires_in
            .as_deref()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(3600);

        previous.refreshed(self.id_token, self.refresh_token, expires_in, chrono::Utc::now())
    }
}

impl IdentityBackend for RestIdentityBackend {
    async fn send_verification_code(
        &self,
        phone_number: &str,
        language_code: &str,
    ) -> Result<String, FirebaseError> {
        let mut body = json!({ "phoneNumber": phone_number });
        if let Some(token) = &self.inner.recaptcha_token {
            body["recaptchaToken"] = json!(token);
        }

        let response = self
            .post("sendVerificationCode", body, Some(language_code))
            .await?;
        let parsed: SendCodeResponse = response.json().await?;
        Ok(parsed.session_info)
    }

    async fn sign_in_with_phone_number(
        &self,
        verification_id: &str,
        code: &str,
    ) -> Result<Arc<User>, FirebaseError> {
        let body = json!({
            "sessionInfo": verification_id,
            "code": code,
        });

        let response = self.post("signInWithPhoneNumber", body, None).await?;
        let parsed: PhoneSignInResponse = response.json().await?;
        let user = Arc::new(parsed.into_user());

        *self.inner.current_user.write().await = Some(Arc::clone(&user));
        Ok(user)
    }

    async fn refresh_session(&self) -> Result<Arc<User>, FirebaseError> {
        // Validate session (error case first)
        let Some(user) = self.current_user().await else {
            return Err(StateError::NotSignedIn.into());
        };
        let Some(refresh_token) = user.refresh_token() else {
            return Err(StateError::MissingRefreshToken.into());
        };

        let body = json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
        });
        let response = self.send("token", self.token_endpoint(), body, None).await?;
        let parsed: TokenRefreshResponse = response.json().await?;
        let renewed = Arc::new(parsed.into_user(&user));

        // A sign-out during the exchange wins
        let mut current = self.inner.current_user.write().await;
        if current.as_ref().map(|u| u.uid.as_str()) != Some(renewed.uid.as_str()) {
            return Err(StateError::NotSignedIn.into());
        }
        *current = Some(Arc::clone(&renewed));
        tracing::debug!(uid = %renewed.uid, "ID token refreshed");
        Ok(renewed)
    }

    async fn current_user(&self) -> Option<Arc<User>> {
        self.inner.current_user.read().await.clone()
    }

    async fn sign_out(&self) -> Result<(), FirebaseError> {
        // Sessions are tokens held locally; dropping them ends the session
        *self.inner.current_user.write().await = None;
        Ok(())
    }
}

impl std::fmt::Debug for RestIdentityBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestIdentityBackend")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.inner.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_api_key_error() {
        let err = RestIdentityBackend::new("", None, &RestSettings::default()).unwrap_err();
        assert!(matches!(
            err,
            FirebaseError::Config(ConfigError::ApiKeyNotConfigured)
        ));
    }

    #[test]
    fn test_endpoint_format() {
        let backend = RestIdentityBackend::with_endpoints(
            "key-1",
            "http://localhost:9099/identitytoolkit.googleapis.com/v1/",
            "http://localhost:9099/securetoken.googleapis.com/v1/",
            None,
            &RestSettings::default(),
        )
        .unwrap();

        assert_eq!(
            backend.endpoint("sendVerificationCode"),
            "http://localhost:9099/identitytoolkit.googleapis.com/v1/accounts:sendVerificationCode?key=key-1"
        );
        assert_eq!(
            backend.token_endpoint(),
            "http://localhost:9099/securetoken.googleapis.com/v1/token?key=key-1"
        );
    }

    #[test]
    fn test_default_token_endpoint() {
        let backend = RestIdentityBackend::new("key-1", None, &RestSettings::default()).unwrap();

        assert_eq!(
            backend.token_endpoint(),
            "https://securetoken.googleapis.com/v1/token?key=key-1"
        );
    }

    #[tokio::test]
    async fn test_refresh_requires_session() {
        let backend = RestIdentityBackend::new("key-1", None, &RestSettings::default()).unwrap();

        let err = backend.refresh_session().await.unwrap_err();

        assert!(matches!(err, FirebaseError::InvalidState(StateError::NotSignedIn)));
    }

    #[test]
    fn test_refresh_response_into_user() {
        let response: TokenRefreshResponse = serde_json::from_value(json!({
            "access_token": "id-2",
            "expires_in": "3600",
            "token_type": "Bearer",
            "refresh_token": "refresh-2",
            "id_token": "id-2",
            "user_id": "uid-1",
            "project_id": "123",
        }))
        .unwrap();
        let mut previous = User::new("uid-1");
        previous.phone_number = Some("+447700900123".to_string());

        let user = response.into_user(&previous);

        assert_eq!(user.uid, "uid-1");
        assert_eq!(user.phone_number.as_deref(), Some("+447700900123"));
        assert_eq!(user.id_token(), Some("id-2"));
        assert_eq!(user.refresh_token(), Some("refresh-2"));
        assert!(!user.is_token_expired(chrono::Utc::now()));
    }

    #[test]
    fn test_error_message_passed_verbatim() {
        let body = r#"{"error":{"code":400,"message":"INVALID_CODE"}}"#;
        assert_eq!(error_message(StatusCode::BAD_REQUEST, body), "INVALID_CODE");

        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, "upstream"),
            "HTTP 502 Bad Gateway: upstream"
        );
    }

    #[test]
    fn test_sign_in_response_into_user() {
        let response: PhoneSignInResponse = serde_json::from_value(json!({
            "localId": "uid-1",
            "idToken": "id",
            "refreshToken": "refresh",
            "phoneNumber": "+447700900123",
            "expiresIn": "3600",
            "isNewUser": true,
        }))
        .unwrap();

        let user = response.into_user();

        assert_eq!(user.uid, "uid-1");
        assert_eq!(user.phone_number.as_deref(), Some("+447700900123"));
        assert!(user.is_new_user);
        assert_eq!(user.id_token(), Some("id"));
        assert!(!user.is_token_expired(chrono::Utc::now()));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let backend =
            RestIdentityBackend::new("secret-key", None, &RestSettings::default()).unwrap();
        let debug = format!("{:?}", backend);

        assert!(!debug.contains("secret-key"));
    }
}
