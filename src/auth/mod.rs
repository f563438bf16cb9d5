/// Authentication extractors and utilities
pub mod token;

pub use token::{TokenClaims, TokenError, TokenIssuer, TokenKind, TokenPair};

use crate::{
    api::middleware::extract_access_token,
    context::AppContext,
    db::account::PublicAccount,
    error::{AppError, AppResult},
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts, http::HeaderMap};

/// Authenticated context - resolves the account behind the access token
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub account: PublicAccount,
}

impl AuthContext {
    pub fn account_id(&self) -> &str {
        &self.account.id
    }
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        // Set by require_auth when the route sits behind it
        if let Some(account) = parts.extensions.get::<PublicAccount>() {
            return Ok(AuthContext {
                account: account.clone(),
            });
        }

        let account = authenticate(state, &parts.headers).await?;
        Ok(AuthContext { account })
    }
}

/// Resolve the caller from the `accessToken` cookie or bearer header
pub async fn authenticate(ctx: &AppContext, headers: &HeaderMap) -> AppResult<PublicAccount> {
    let token = extract_access_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Unauthorized request".to_string()))?;

    let claims = ctx.tokens.verify(&token, TokenKind::Access).map_err(|e| {
        tracing::debug!("Rejected access token: {}", e);
        AppError::Unauthorized("Invalid access token".to_string())
    })?;

    ctx.accounts
        .find_public_by_id(&claims.sub)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid access token".to_string()))
}
