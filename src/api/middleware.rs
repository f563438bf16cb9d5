/// Authentication middleware
use crate::{auth, context::AppContext, error::AppError};
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    extract::cookie::CookieJar,
    headers::{authorization::Bearer, Authorization, HeaderMapExt},
};

/// Cookie carrying the access token
pub const ACCESS_COOKIE: &str = "accessToken";
/// Cookie carrying the refresh token
pub const REFRESH_COOKIE: &str = "refreshToken";

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Extract a named cookie's value, ignoring empty ones
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

/// Access token from the `accessToken` cookie, else the bearer header
pub fn extract_access_token(headers: &HeaderMap) -> Option<String> {
    extract_cookie(headers, ACCESS_COOKIE).or_else(|| extract_bearer_token(headers))
}

/// Require authentication - resolve the account or return 401
///
/// The resolved [`PublicAccount`](crate::db::account::PublicAccount) is
/// added to the request extensions for downstream handlers.
pub async fn require_auth(
    State(ctx): State<AppContext>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let account = auth::authenticate(&ctx, req.headers()).await?;
    req.extensions_mut().insert(account);

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderValue};

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_extract_bearer_token() {
        let map = headers(&[(header::AUTHORIZATION, "Bearer abc.def.ghi")]);
        assert_eq!(extract_bearer_token(&map).as_deref(), Some("abc.def.ghi"));

        let basic = headers(&[(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")]);
        assert_eq!(extract_bearer_token(&basic), None);

        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_cookie_takes_precedence() {
        let map = headers(&[
            (header::COOKIE, "theme=dark; accessToken=from-cookie"),
            (header::AUTHORIZATION, "Bearer from-header"),
        ]);
        assert_eq!(extract_access_token(&map).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn test_empty_cookie_falls_back_to_header() {
        let map = headers(&[
            (header::COOKIE, "accessToken="),
            (header::AUTHORIZATION, "Bearer from-header"),
        ]);
        assert_eq!(extract_access_token(&map).as_deref(), Some("from-header"));
    }

    #[test]
    fn test_extract_refresh_cookie() {
        let map = headers(&[(header::COOKIE, "refreshToken=r1")]);
        assert_eq!(extract_cookie(&map, REFRESH_COOKIE).as_deref(), Some("r1"));
        assert_eq!(extract_cookie(&map, ACCESS_COOKIE), None);
    }
}
