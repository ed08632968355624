//! Kit: one database façade and one phone-auth façade from one options object
//!
//! The kit keeps the two halves in step: a successful sign-in hands the ID
//! token to the database backend, [`FirebaseKit::database`] renews it before
//! it expires, and [`FirebaseKit::logout`] detaches every listener before
//! ending the session.

use crate::auth::types::User;
use crate::auth::{IdentityBackend, PhoneAuth, RestIdentityBackend};
use crate::database::{Database, DatabaseBackend, RestBackend, RestSettings};
use crate::error::{ConfigError, FirebaseError};
use std::sync::Arc;
use std::time::Duration;

/// Kit configuration
///
/// # Example
/// ```no_run
/// # async fn example() -> Result<(), firebase_kit::FirebaseError> {
/// use firebase_kit::{FirebaseKit, KitOptions};
///
/// let options = KitOptions {
///     database_url: "https://my-app-default-rtdb.firebaseio.com".to_string(),
///     api_key: "YOUR_API_KEY".to_string(),
///     language_code: Some("uk".to_string()),
///     phone_code: Some("+44".to_string()),
///     ..KitOptions::default()
/// };
/// let kit = FirebaseKit::create(options).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct KitOptions {
    /// Realtime Database URL
    pub database_url: String,

    /// Web API key of the project
    pub api_key: String,

    /// Language of verification messages
    pub language_code: Option<String>,

    /// Country prefix for phone numbers, starting with `+`
    pub phone_code: Option<String>,

    /// reCAPTCHA token sent with verification requests
    pub recaptcha_token: Option<String>,

    /// HTTP settings shared by both backends
    pub rest: RestSettings,
}

impl KitOptions {
    /// Options from `FIREBASE_*` environment variables
    ///
    /// Reads `FIREBASE_DATABASE_URL`, `FIREBASE_API_KEY`,
    /// `FIREBASE_LANGUAGE_CODE`, `FIREBASE_PHONE_CODE`,
    /// `FIREBASE_RECAPTCHA_TOKEN` and `FIREBASE_REQUEST_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, FirebaseError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, FirebaseError> {
        let var = |name: &str| lookup(name).filter(|value| !value.is_empty());

        let Some(database_url) = var("FIREBASE_DATABASE_URL") else {
            let reason = "FIREBASE_DATABASE_URL is not set".to_string();
            return Err(ConfigError::InvalidDatabaseUrl(reason).into());
        };
        let Some(api_key) = var("FIREBASE_API_KEY") else {
            return Err(ConfigError::ApiKeyNotConfigured.into());
        };

        let mut rest = RestSettings::default();
        if let Some(secs) = var("FIREBASE_REQUEST_TIMEOUT_SECS") {
            let secs = secs.parse::<u64>().map_err(|e| {
                FirebaseError::internal(format!("Invalid FIREBASE_REQUEST_TIMEOUT_SECS: {}", e))
            })?;
            rest.request_timeout = Duration::from_secs(secs);
        }

        Ok(Self {
            database_url,
            api_key,
            language_code: var("FIREBASE_LANGUAGE_CODE"),
            phone_code: var("FIREBASE_PHONE_CODE"),
            recaptcha_token: var("FIREBASE_RECAPTCHA_TOKEN"),
            rest,
        })
    }
}

/// Database and phone authentication sharing one session
pub struct FirebaseKit<D: DatabaseBackend = RestBackend, I: IdentityBackend = RestIdentityBackend> {
    database: Database<D>,
    auth: PhoneAuth<I>,
}

impl<D: DatabaseBackend, I: IdentityBackend> Clone for FirebaseKit<D, I> {
    fn clone(&self) -> Self {
        Self {
            database: self.database.clone(),
            auth: self.auth.clone(),
        }
    }
}

impl FirebaseKit {
    /// Kit talking to the real Firebase services
    pub async fn create(options: KitOptions) -> Result<Self, FirebaseError> {
        // Validate options (error case first)
        if options.api_key.is_empty() {
            return Err(ConfigError::ApiKeyNotConfigured.into());
        }

        let database = RestBackend::new(&options.database_url, options.rest.clone())?;
        let identity = RestIdentityBackend::new(
            options.api_key.clone(),
            options.recaptcha_token.clone(),
            &options.rest,
        )?;

        let kit = Self::with_backends(database, identity);
        if let Some(language_code) = options.language_code {
            kit.auth.set_language_code(language_code).await;
        }
        if let Some(phone_code) = options.phone_code {
            kit.auth.set_phone_code(phone_code).await;
        }

        tracing::debug!(database_url = %options.database_url, "Firebase kit created");
        Ok(kit)
    }
}

impl<D: DatabaseBackend, I: IdentityBackend> FirebaseKit<D, I> {
    /// Kit over the given backends
    pub fn with_backends(database: D, identity: I) -> Self {
        Self {
            database: Database::new(database),
            auth: PhoneAuth::new(identity),
        }
    }

    /// The data access façade, authenticated with a current ID token
    ///
    /// When signed in and the ID token is within five minutes of expiry, the
    /// token is renewed and handed to the backend first. Continuous reads
    /// keep the token they were started with.
    pub async fn database(&self) -> Result<&Database<D>, FirebaseError> {
        if let Some(token) = self.auth.id_token(false).await? {
            self.database.backend().set_auth_token(Some(token)).await;
        }
        Ok(&self.database)
    }

    /// The phone authentication façade
    pub fn auth(&self) -> &PhoneAuth<I> {
        &self.auth
    }

    /// Confirm the one-time code and authenticate database requests as the new user
    pub async fn confirm_otp(&self, code: impl AsRef<str>) -> Result<Arc<User>, FirebaseError> {
        let user = self.auth.confirm_otp(code).await?;
        self.database
            .backend()
            .set_auth_token(user.id_token().map(str::to_string))
            .await;
        Ok(user)
    }

    /// Cancel every subscription and sign out
    ///
    /// Returns how many subscriptions were cancelled.
    pub async fn logout(&self) -> usize {
        let cancelled = self.database.cancel_all_subscriptions().await;
        self.auth.sign_out().await;
        self.database.backend().set_auth_token(None).await;

        tracing::debug!(cancelled, "Logged out");
        cancelled
    }
}

impl<D, I> std::fmt::Debug for FirebaseKit<D, I>
where
    D: DatabaseBackend + std::fmt::Debug,
    I: IdentityBackend + std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirebaseKit")
            .field("database", &self.database)
            .field("auth", &self.auth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryIdentityBackend;
    use crate::database::MemoryBackend;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_options_from_lookup() {
        let options = KitOptions::from_lookup(lookup(&[
            ("FIREBASE_DATABASE_URL", "https://demo-default-rtdb.firebaseio.com"),
            ("FIREBASE_API_KEY", "key"),
            ("FIREBASE_PHONE_CODE", "+44"),
            ("FIREBASE_LANGUAGE_CODE", ""),
            ("FIREBASE_REQUEST_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();

        assert_eq!(options.api_key, "key");
        assert_eq!(options.phone_code.as_deref(), Some("+44"));
        assert_eq!(options.language_code, None);
        assert_eq!(options.rest.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_options_require_api_key() {
        let err = KitOptions::from_lookup(lookup(&[(
            "FIREBASE_DATABASE_URL",
            "https://demo-default-rtdb.firebaseio.com",
        )]))
        .unwrap_err();

        assert!(matches!(err, FirebaseError::Config(ConfigError::ApiKeyNotConfigured)));
    }

    #[tokio::test]
    async fn test_create_rejects_empty_api_key() {
        let options = KitOptions {
            database_url: "https://demo-default-rtdb.firebaseio.com".to_string(),
            ..KitOptions::default()
        };

        assert!(FirebaseKit::create(options).await.unwrap_err().is_config_error());
    }

    #[tokio::test]
    async fn test_create_applies_phone_settings() {
        let options = KitOptions {
            database_url: "https://demo-default-rtdb.firebaseio.com".to_string(),
            api_key: "key".to_string(),
            language_code: Some("uk".to_string()),
            phone_code: Some("+44".to_string()),
            ..KitOptions::default()
        };

        let kit = FirebaseKit::create(options).await.unwrap();

        assert_eq!(kit.auth().language_code().await.as_deref(), Some("uk"));
        assert_eq!(kit.auth().phone_code().await.as_deref(), Some("+44"));
    }

    #[tokio::test]
    async fn test_sign_in_authenticates_database_and_logout_clears() {
        let kit = FirebaseKit::with_backends(
            MemoryBackend::new(),
            MemoryIdentityBackend::with_test_numbers([("+447700900123", "123456")]),
        );
        kit.auth().set_language_code("en").await;
        kit.auth().set_phone_code("+44").await;

        kit.auth().request_verification("7700900123").await.unwrap();
        let user = kit.confirm_otp("123456").await.unwrap();
        let db = kit.database().await.unwrap();
        assert_eq!(db.backend().auth_token().await.as_deref(), user.id_token());

        db.read_continuous::<serde_json::Value, _>(["users"], |_| {})
            .await
            .unwrap();

        assert_eq!(kit.logout().await, 1);
        assert!(!kit.auth().is_logged_in().await);
        assert_eq!(db.active_subscriptions().await, 0);
        assert_eq!(db.backend().auth_token().await, None);
    }

    #[tokio::test]
    async fn test_database_access_renews_expiring_token() {
        let identity = MemoryIdentityBackend::with_test_numbers([("+447700900123", "123456")]);
        identity.set_token_lifetime(60).await;
        let kit = FirebaseKit::with_backends(MemoryBackend::new(), identity);
        kit.auth().set_language_code("en").await;
        kit.auth().set_phone_code("+44").await;
        kit.auth().request_verification("7700900123").await.unwrap();
        let user = kit.confirm_otp("123456").await.unwrap();
        kit.auth().backend().set_token_lifetime(3600).await;

        let db = kit.database().await.unwrap();

        let token = db.backend().auth_token().await;
        assert!(token.is_some());
        assert_ne!(token.as_deref(), user.id_token());
        let current = kit.auth().current_user().await.unwrap();
        assert_eq!(current.id_token(), token.as_deref());

        // Now fresh, so the next access leaves the session alone
        let calls = kit.auth().backend().calls();
        kit.database().await.unwrap();
        assert_eq!(kit.auth().backend().calls(), calls);
    }
}
