use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderValue;
use reqwest::{Request, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::rest::{Exchange, Interceptor, Next, ResponseSlot, RestClient, RestEntity, RestError};

/// Header carrying the identity token on every administrative request.
pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";

pub const DEFAULT_IDENTITY_URL: &str = "https://identity.api.rackspacecloud.com";

const TOKENS_PATH: &str = "/v2.0/tokens";
const AUTH_TIMEOUT: Duration = Duration::from_secs(60);

/// Invalid identity settings, detected before any request is made.
#[derive(Debug, thiserror::Error)]
pub enum AuthConfigError {
    #[error("identity username is required")]
    MissingUsername,

    #[error("identity password or API key is required")]
    MissingSecret,

    #[error("identity password and API key are mutually exclusive")]
    ConflictingSecrets,

    #[error("invalid identity URL: {0}")]
    InvalidUrl(String),
}

/// The secret used to obtain a token.
#[derive(Clone)]
pub enum Credentials {
    Password { username: String, password: String },
    ApiKey { username: String, api_key: String },
}

impl Credentials {
    /// Build credentials from optional parts, treating empty strings as absent.
    pub fn from_parts(
        username: &str,
        password: Option<&str>,
        api_key: Option<&str>,
    ) -> Result<Self, AuthConfigError> {
        if username.is_empty() {
            return Err(AuthConfigError::MissingUsername);
        }
        let password = password.filter(|p| !p.is_empty());
        let api_key = api_key.filter(|k| !k.is_empty());

        match (password, api_key) {
            (Some(_), Some(_)) => Err(AuthConfigError::ConflictingSecrets),
            (Some(password), None) => Ok(Self::Password {
                username: username.to_owned(),
                password: password.to_owned(),
            }),
            (None, Some(api_key)) => Ok(Self::ApiKey {
                username: username.to_owned(),
                api_key: api_key.to_owned(),
            }),
            (None, None) => Err(AuthConfigError::MissingSecret),
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Self::Password { username, .. } | Self::ApiKey { username, .. } => username,
        }
    }

    fn request_body(&self) -> TokenRequest<'_> {
        let auth = match self {
            Self::Password { username, password } => AuthBody::Password { username, password },
            Self::ApiKey { username, api_key } => AuthBody::ApiKey { username, api_key },
        };
        TokenRequest { auth }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Password { .. } => "Password",
            Self::ApiKey { .. } => "ApiKey",
        };
        f.debug_struct(kind)
            .field("username", &self.username())
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    auth: AuthBody<'a>,
}

#[derive(Serialize)]
enum AuthBody<'a> {
    #[serde(rename = "passwordCredentials")]
    Password { username: &'a str, password: &'a str },

    #[serde(rename = "RAX-KSKEY:apiKeyCredentials")]
    ApiKey {
        username: &'a str,
        #[serde(rename = "apiKey")]
        api_key: &'a str,
    },
}

/// Only the fields we need out of the identity response.
#[derive(Deserialize)]
struct TokenResponse {
    access: Access,
}

#[derive(Deserialize)]
struct Access {
    token: Token,
}

#[derive(Deserialize)]
struct Token {
    id: String,
    expires: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    id: String,
    expires: DateTime<Utc>,
}

impl CachedToken {
    fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires
    }
}

/// Interceptor that obtains a token from the identity service and attaches
/// it to every outgoing request.
///
/// The token is fetched lazily on the first request and again whenever the
/// cached one has expired. A failed refresh fails the request that needed it.
pub struct IdentityAuthenticator {
    identity: RestClient,
    credentials: Credentials,
    token: Mutex<Option<CachedToken>>,
}

impl IdentityAuthenticator {
    pub fn new(identity_url: &str, credentials: Credentials) -> Result<Self, AuthConfigError> {
        let identity = RestClient::with_base_url(identity_url)
            .map_err(|e| AuthConfigError::InvalidUrl(e.to_string()))?
            .with_timeout(AUTH_TIMEOUT);

        Ok(Self {
            identity,
            credentials,
            token: Mutex::new(None),
        })
    }

    pub fn username(&self) -> &str {
        self.credentials.username()
    }

    /// Return a valid token, refreshing it first if needed.
    ///
    /// Concurrent callers queue on the lock, so an expired token is refreshed once.
    pub async fn token(&self) -> Result<String, RestError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.is_valid_at(Utc::now())
        {
            return Ok(token.id.clone());
        }

        let fresh = self.authenticate().await?;
        let id = fresh.id.clone();
        *cached = Some(fresh);
        Ok(id)
    }

    async fn authenticate(&self) -> Result<CachedToken, RestError> {
        let body = serde_json::to_value(self.credentials.request_body())
            .map_err(|e| RestError::Encoding(format!("failed to encode token request: {e}")))?;

        tracing::debug!(
            user = self.credentials.username(),
            endpoint = ?self.identity.base_url().map(|u| u.as_str()),
            "authenticating with identity"
        );

        let response: TokenResponse = self
            .identity
            .exchange(
                Exchange::post(TOKENS_PATH)
                    .body(RestEntity::json(body))
                    .response(ResponseSlot::json()),
            )
            .await?
            .ok_or(RestError::UnsupportedResponse)?
            .into_json()?;

        tracing::debug!(expires = %response.access.token.expires, "obtained identity token");

        Ok(CachedToken {
            id: response.access.token.id,
            expires: response.access.token.expires,
        })
    }
}

#[async_trait::async_trait]
impl Interceptor for IdentityAuthenticator {
    async fn intercept(&self, mut request: Request, next: Next<'_>) -> Result<Response, RestError> {
        let token = self.token().await?;
        let value = HeaderValue::from_str(&token)
            .map_err(|e| RestError::Encoding(format!("token is not a valid header value: {e}")))?;
        request.headers_mut().insert(AUTH_TOKEN_HEADER, value);

        next.run(request).await
    }
}
