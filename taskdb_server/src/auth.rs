//! Session tokens, the signing secret and the request extractors built on them.
//!
//! A session is an HS256 JWT carried in the httpOnly `token` cookie. The same
//! cookie authenticates REST calls, the WebSocket handshake and `/graphql`.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::header::COOKIE;
use axum::http::request::Parts;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use cookie::{Cookie, SameSite};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use taskdb::User;

use crate::error::ApiError;
use crate::state::AppState;

/// Name of the session cookie.
pub const TOKEN_COOKIE: &str = "token";

/// Secrets shorter than this are replaced on startup.
const MIN_SECRET_LEN: usize = 32;
const SECRET_BYTES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub id: String,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies session tokens and builds the matching cookies.
#[derive(Clone)]
pub struct TokenAuthority {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
    secure_cookies: bool,
}

impl std::fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("ttl", &self.ttl)
            .field("secure_cookies", &self.secure_cookies)
            .finish_non_exhaustive()
    }
}

impl TokenAuthority {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl,
            secure_cookies: false,
        }
    }

    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, user: &User) -> Result<String, ApiError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            id: user.id.clone(),
            username: user.username.clone(),
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(ApiError::internal)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => ApiError::Unauthorized("Token expired"),
                _ => ApiError::Unauthorized("Invalid token"),
            })
    }

    /// Claims of the session cookie in `headers`, `None` when there is no
    /// cookie at all.
    pub fn claims_from_headers(&self, headers: &HeaderMap) -> Result<Option<Claims>, ApiError> {
        token_from_headers(headers)
            .map(|token| self.verify(&token))
            .transpose()
    }

    pub fn session_cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build((TOKEN_COOKIE, token))
            .http_only(true)
            .same_site(SameSite::Lax)
            .path("/")
            .secure(self.secure_cookies)
            .max_age(cookie::time::Duration::seconds(self.ttl.as_secs() as i64))
            .build()
    }

    pub fn removal_cookie(&self) -> Cookie<'static> {
        let mut cookie = Cookie::build((TOKEN_COOKIE, ""))
            .http_only(true)
            .same_site(SameSite::Lax)
            .path("/")
            .secure(self.secure_cookies)
            .build();
        cookie.make_removal();
        cookie
    }
}

/// Value of the `token` cookie, if any `Cookie` header carries one.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == TOKEN_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
}

/// Read the signing secret from `path`, or generate and persist a new one
/// when the file is missing or too short.
pub fn load_or_create_secret(path: &Path) -> std::io::Result<String> {
    match std::fs::read_to_string(path) {
        Ok(existing) if existing.trim().len() >= MIN_SECRET_LEN => {
            return Ok(existing.trim().to_string());
        }
        Ok(_) => log::warn!("Secret in {} is too short, replacing it", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let secret = STANDARD.encode(bytes);

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let mut file = std::fs::File::create(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(secret.as_bytes())?;
    log::info!("Generated new signing secret in {}", path.display());
    Ok(secret)
}

/// A request that must carry a valid session.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        state
            .tokens
            .claims_from_headers(&parts.headers)?
            .map(AuthUser)
            .ok_or(ApiError::Unauthorized("Unauthorized"))
    }
}

/// Whoever a task operation acts for: a signed-in user, or nobody when the
/// server runs in anonymous mode.
#[derive(Debug, Clone)]
pub struct Principal(pub Option<Claims>);

impl Principal {
    /// Resolve the principal for a request's headers. A present but invalid
    /// token is rejected even in anonymous mode.
    pub fn from_headers(state: &AppState, headers: &HeaderMap) -> Result<Self, ApiError> {
        match state.tokens.claims_from_headers(headers)? {
            Some(claims) => Ok(Principal(Some(claims))),
            None if state.config.allow_anonymous => Ok(Principal(None)),
            None => Err(ApiError::Unauthorized("Unauthorized")),
        }
    }

    /// Owner id used to scope store operations.
    pub fn owner(&self) -> Option<&str> {
        self.0.as_ref().map(|claims| claims.id.as_str())
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Principal::from_headers(state, &parts.headers)
    }
}
