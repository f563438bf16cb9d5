/// /api/v1/users endpoints
use crate::{
    account::{LoginRequest, LoginResponse, RefreshRequest, RegisterForm, TokenPair},
    api::{
        middleware::{require_auth, ACCESS_COOKIE, REFRESH_COOKIE},
        ApiResponse,
    },
    auth::AuthContext,
    context::AppContext,
    db::account::PublicAccount,
    error::{AppError, AppResult},
    upload::stage_multipart,
};
use axum::{
    extract::{rejection::JsonRejection, Multipart, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde_json::{json, Value};

const COOKIE_MAX_AGE_DAYS: i64 = 7;

/// Build user routes
pub fn routes(ctx: AppContext) -> Router<AppContext> {
    let protected = Router::new()
        .route("/logout", post(logout))
        .route("/current-user", get(current_user))
        .route_layer(middleware::from_fn_with_state(ctx, require_auth));

    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .merge(protected)
}

fn session_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .max_age(time::Duration::days(COOKIE_MAX_AGE_DAYS))
        .build()
}

/// Removal cookie with the same attributes as the session cookie
fn expired_cookie(name: &'static str, secure: bool) -> Cookie<'static> {
    let mut cookie = session_cookie(name, String::new(), secure);
    cookie.set_max_age(time::Duration::ZERO);
    cookie
}

fn set_session_cookies(ctx: &AppContext, jar: CookieJar, access: &str, refresh: &str) -> CookieJar {
    let secure = ctx.config.service.is_production();
    jar.add(session_cookie(ACCESS_COOKIE, access.to_string(), secure))
        .add(session_cookie(REFRESH_COOKIE, refresh.to_string(), secure))
}

/// Register endpoint (multipart)
async fn register(
    State(ctx): State<AppContext>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<ApiResponse<PublicAccount>>)> {
    let mut staged = stage_multipart(multipart, &ctx.config.upload.temp_dir).await?;

    let text = |name: &str| staged.text(name).unwrap_or_default().to_string();
    let mut form = RegisterForm {
        fullname: text("fullname"),
        email: text("email"),
        password: text("password"),
        username: text("username"),
        ..Default::default()
    };
    form.avatar = staged.take_file("avatar");
    form.cover_image = staged.take_file("coverImage");

    // Stray file fields are not ours to keep
    staged.discard().await;

    let account = ctx.sessions.register(form).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(
            StatusCode::CREATED,
            account,
            "User registered successfully",
        )),
    ))
}

/// Login endpoint
async fn login(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<(CookieJar, Json<ApiResponse<LoginResponse>>)> {
    let Json(req) = body.map_err(|e| AppError::Validation(e.body_text()))?;

    let response = ctx.sessions.login(req).await?;
    let jar = set_session_cookies(&ctx, jar, &response.access_token, &response.refresh_token);

    Ok((jar, Json(ApiResponse::ok(response, "User logged in successfully"))))
}

/// Logout endpoint (behind the auth gate)
async fn logout(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<ApiResponse<Value>>)> {
    ctx.sessions.logout(auth.account_id()).await?;

    // Sent even when the request authenticated with a bearer header
    let secure = ctx.config.service.is_production();
    let jar = jar
        .add(expired_cookie(ACCESS_COOKIE, secure))
        .add(expired_cookie(REFRESH_COOKIE, secure));

    Ok((jar, Json(ApiResponse::ok(json!({}), "User logged out successfully"))))
}

/// Refresh endpoint; the cookie wins over the JSON body
async fn refresh(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    body: Option<Json<RefreshRequest>>,
) -> AppResult<(CookieJar, Json<ApiResponse<TokenPair>>)> {
    let presented = jar
        .get(REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| body.and_then(|Json(req)| req.refresh_token));

    let pair = ctx.sessions.refresh(presented.as_deref()).await?;
    let jar = set_session_cookies(&ctx, jar, &pair.access_token, &pair.refresh_token);

    Ok((jar, Json(ApiResponse::ok(pair, "Access token refreshed"))))
}

/// Current user endpoint (behind the auth gate)
async fn current_user(auth: AuthContext) -> Json<ApiResponse<PublicAccount>> {
    Json(ApiResponse::ok(
        auth.account,
        "Current user fetched successfully",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie(ACCESS_COOKIE, "tok".to_string(), true);
        assert_eq!(cookie.name(), "accessToken");
        assert_eq!(cookie.value(), "tok");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(time::Duration::days(7)));
    }

    #[test]
    fn test_expired_cookie_matches_session_cookie() {
        let cookie = expired_cookie(REFRESH_COOKIE, false);
        assert_eq!(cookie.name(), "refreshToken");
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
    }

    #[test]
    fn test_api_response_envelope() {
        let json = serde_json::to_value(ApiResponse::new(
            StatusCode::CREATED,
            json!({ "id": "acc-1" }),
            "User registered successfully",
        ))
        .unwrap();

        assert_eq!(json["statusCode"], 201);
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["id"], "acc-1");
        assert_eq!(json["message"], "User registered successfully");
    }
}
