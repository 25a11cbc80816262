/// Bearer token verification.
/// Tokens are HMAC-signed JWTs carrying the caller's identity and an RFC 3339 `expires` claim.
use actix_web::dev::Payload;
use actix_web::{http::header, web, FromRequest, HttpRequest};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use futures::future::{ready, Ready};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ChatError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub full_name: String,
    pub expires: String,
}

/// Verifies tokens against a shared secret
#[derive(Clone)]
pub struct JwtDecoder {
    key: DecodingKey,
    validation: Validation,
}

impl JwtDecoder {
    pub fn new(secret: &str, algorithm: &str) -> anyhow::Result<Self> {
        let algorithm = Algorithm::from_str(algorithm)?;
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            anyhow::bail!(
                "Unsupported token algorithm {:?}, expected an HMAC algorithm",
                algorithm
            );
        }

        // Expiry lives in the custom `expires` claim, not the registered `exp`
        let mut validation = Validation::new(algorithm);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_aud = false;

        Ok(JwtDecoder {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// Decode a token, with or without a `Bearer ` prefix.
    /// Returns `None` for bad signatures, malformed claims and expired tokens.
    pub fn decode(&self, token: &str) -> Option<Claims> {
        let token = token.trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();

        let claims = match decode::<Claims>(token, &self.key, &self.validation) {
            Ok(data) => data.claims,
            Err(e) => {
                log::debug!("Rejected token: {}", e);
                return None;
            }
        };

        match parse_expiry(&claims.expires) {
            Some(expires) if expires >= Utc::now() => Some(claims),
            Some(_) => {
                log::debug!("Rejected expired token for {}", claims.user_id);
                None
            }
            None => {
                log::debug!("Rejected token with unreadable expiry: {}", claims.expires);
                None
            }
        }
    }
}

/// RFC 3339, or a naive ISO 8601 timestamp taken as UTC
fn parse_expiry(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Some(instant.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Caller identity resolved from the `Authorization` header
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Claims);

impl AuthenticatedUser {
    pub fn user_id(&self) -> &str {
        &self.0.user_id
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = ChatError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authenticate(req))
    }
}

fn authenticate(req: &HttpRequest) -> Result<AuthenticatedUser, ChatError> {
    let decoder = req.app_data::<web::Data<JwtDecoder>>().ok_or_else(|| {
        log::error!("Token decoder missing from application data");
        ChatError::Unauthorized("Token verification unavailable".to_string())
    })?;

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ChatError::Unauthorized("Missing bearer token".to_string()))?;

    decoder
        .decode(token)
        .map(AuthenticatedUser)
        .ok_or_else(|| ChatError::Unauthorized("Invalid or expired token".to_string()))
}

#[cfg(any(test, feature = "test_utils"))]
impl Claims {
    pub fn for_user(user_id: &str, full_name: &str, valid_for: chrono::Duration) -> Self {
        Claims {
            user_id: user_id.to_string(),
            email: format!("{}@example.com", user_id),
            full_name: full_name.to_string(),
            expires: (Utc::now() + valid_for).to_rfc3339(),
        }
    }
}

/// Mint an HS256 token for tests
#[cfg(any(test, feature = "test_utils"))]
pub fn encode_token(secret: &str, claims: &Claims) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("Failed to encode token")
}
