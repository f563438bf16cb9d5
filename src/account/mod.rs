/// Account management system
///
/// Handles registration, credential checks, and the refresh-token session
/// lifecycle.

mod manager;
pub mod password;
mod store;

pub use manager::SessionManager;
pub use store::AccountStore;

pub use crate::auth::TokenPair;

use crate::db::account::PublicAccount;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use validator::Validate;

/// Registration input, after multipart staging
#[derive(Clone, Default, Validate)]
pub struct RegisterForm {
    pub fullname: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
    pub username: String,
    /// Staged avatar file
    pub avatar: Option<PathBuf>,
    /// Staged cover image file
    pub cover_image: Option<PathBuf>,
}

impl std::fmt::Debug for RegisterForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterForm")
            .field("fullname", &self.fullname)
            .field("email", &self.email)
            .field("username", &self.username)
            .field("avatar", &self.avatar)
            .field("cover_image", &self.cover_image)
            .finish_non_exhaustive()
    }
}

/// Login request
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    /// Accepted loosely; see [`canonical_password`]
    #[serde(default)]
    pub password: Option<Value>,
}

/// Login response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: PublicAccount,
    pub access_token: String,
    pub refresh_token: String,
}

/// Token refresh request body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Text form of a submitted password
///
/// Strings are taken as-is, numbers and booleans by their textual form.
/// Anything else, or an empty string, counts as no password.
pub fn canonical_password(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_password() {
        assert_eq!(
            canonical_password(Some(&json!("Secret123"))).as_deref(),
            Some("Secret123")
        );
        assert_eq!(
            canonical_password(Some(&json!(123456))).as_deref(),
            Some("123456")
        );
        assert_eq!(canonical_password(Some(&json!(true))).as_deref(), Some("true"));
        assert_eq!(canonical_password(Some(&json!(""))), None);
        assert_eq!(canonical_password(Some(&json!(null))), None);
        assert_eq!(canonical_password(Some(&json!(["a"]))), None);
        assert_eq!(canonical_password(Some(&json!({"p": 1}))), None);
        assert_eq!(canonical_password(None), None);
    }

    #[test]
    fn test_register_form_validation() {
        let form = RegisterForm {
            fullname: "Alice".to_string(),
            email: "a@x.com".to_string(),
            password: "Secret123".to_string(),
            username: "alice".to_string(),
            ..Default::default()
        };
        assert!(form.validate().is_ok());

        let bad_email = RegisterForm {
            email: "not-an-email".to_string(),
            ..form.clone()
        };
        assert!(bad_email.validate().is_err());

        let short_password = RegisterForm {
            password: "12345".to_string(),
            ..form
        };
        assert!(short_password.validate().is_err());
    }

    #[test]
    fn test_login_request_accepts_loose_password() {
        let request: LoginRequest =
            serde_json::from_value(json!({ "username": "alice", "password": 123456 })).unwrap();
        assert_eq!(canonical_password(request.password.as_ref()).as_deref(), Some("123456"));
        assert!(request.email.is_none());
    }

    #[test]
    fn test_login_response_shape() {
        let json = serde_json::to_value(LoginResponse {
            user: PublicAccount {
                id: "acc-1".to_string(),
                username: "alice".to_string(),
                email: "a@x.com".to_string(),
                fullname: "Alice".to_string(),
                avatar: "https://img.example/a.png".to_string(),
                cover_image: String::new(),
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            },
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
        })
        .unwrap();

        assert_eq!(json["accessToken"], "a");
        assert_eq!(json["refreshToken"], "r");
        assert_eq!(json["user"]["username"], "alice");
    }
}
