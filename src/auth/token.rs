/// Access and refresh token issuing and verification
///
/// Both kinds are HS256 JWTs, each kind signed with its own secret so an
/// access token can never be replayed as a refresh token or the other way
/// round. Verification is stateless; refresh rotation is checked against
/// the account store by the session manager.
use crate::{
    config::AuthConfig,
    db::account::Account,
    error::{AppError, AppResult},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Allowed clock skew in seconds when checking `exp`
const LEEWAY_SECS: u64 = 5;

/// Which of the two token kinds is expected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims carried by both token kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Account id
    pub sub: String,
    pub typ: TokenKind,
    pub iat: i64,
    pub exp: i64,
    /// Unique per issuance, so tokens minted in the same second differ
    pub jti: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fullname: Option<String>,
}

/// Freshly issued access + refresh tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Why a token failed verification
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token is malformed or has a bad signature")]
    Invalid,
    #[error("token has expired")]
    Expired,
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SigningKeys {
    fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }
}

/// Token issuer holding both signing keys
pub struct TokenIssuer {
    access: SigningKeys,
    refresh: SigningKeys,
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            access: SigningKeys::new(&config.access_token_secret, config.access_ttl()),
            refresh: SigningKeys::new(&config.refresh_token_secret, config.refresh_ttl()),
        }
    }

    fn keys(&self, kind: TokenKind) -> &SigningKeys {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    fn sign(&self, claims: &TokenClaims) -> AppResult<String> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &self.keys(claims.typ).encoding,
        )
        .map_err(|e| AppError::Internal(format!("Failed to sign {:?} token: {}", claims.typ, e)))
    }

    fn base_claims(&self, account_id: &str, kind: TokenKind) -> AppResult<TokenClaims> {
        let now = Utc::now();
        let exp = now
            .checked_add_signed(self.keys(kind).ttl)
            .ok_or_else(|| AppError::Internal(format!("{:?} token lifetime out of range", kind)))?;

        Ok(TokenClaims {
            sub: account_id.to_string(),
            typ: kind,
            iat: now.timestamp(),
            exp: exp.timestamp(),
            jti: Uuid::new_v4().to_string(),
            email: None,
            username: None,
            fullname: None,
        })
    }

    /// Generate access token carrying the account's public identity
    pub fn issue_access_token(&self, account: &Account) -> AppResult<String> {
        let claims = TokenClaims {
            email: Some(account.email.clone()),
            username: Some(account.username.clone()),
            fullname: Some(account.fullname.clone()),
            ..self.base_claims(&account.id, TokenKind::Access)?
        };

        self.sign(&claims)
    }

    /// Generate refresh token carrying only the account id
    pub fn issue_refresh_token(&self, account_id: &str) -> AppResult<String> {
        self.sign(&self.base_claims(account_id, TokenKind::Refresh)?)
    }

    /// Generate both tokens for an account
    pub fn issue_pair(&self, account: &Account) -> AppResult<TokenPair> {
        Ok(TokenPair {
            access_token: self.issue_access_token(account)?,
            refresh_token: self.issue_refresh_token(&account.id)?,
        })
    }

    /// Verify signature, expiry and kind of a token
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<TokenClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECS;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<TokenClaims>(token, &self.keys(expected).decoding, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => {
                    tracing::debug!("Token verification failed: {}", e);
                    TokenError::Invalid
                }
            })?;

        if data.claims.typ != expected {
            return Err(TokenError::Invalid);
        }

        Ok(data.claims)
    }
}
