/// Session lifecycle: register, login, logout, refresh
use crate::{
    account::{canonical_password, AccountStore, LoginRequest, LoginResponse, RegisterForm},
    auth::{TokenIssuer, TokenKind, TokenPair},
    db::account::{NewAccount, PublicAccount},
    error::{AppError, AppResult},
    upload::{remove_local_file, ImageUploader},
};
use std::sync::Arc;
use validator::Validate;

const INVALID_CREDENTIALS: &str = "Invalid credentials";
const INVALID_REFRESH_TOKEN: &str = "Invalid refresh token";
const REFRESH_TOKEN_USED: &str = "Refresh token is expired or used";

/// Session manager service
pub struct SessionManager {
    accounts: AccountStore,
    tokens: Arc<TokenIssuer>,
    uploader: Arc<dyn ImageUploader>,
}

impl SessionManager {
    pub fn new(
        accounts: AccountStore,
        tokens: Arc<TokenIssuer>,
        uploader: Arc<dyn ImageUploader>,
    ) -> Self {
        Self {
            accounts,
            tokens,
            uploader,
        }
    }

    /// Register a new account
    ///
    /// Staged files are consumed either way: uploaded (and removed by the
    /// uploader) on the happy path, deleted on any earlier failure.
    pub async fn register(&self, form: RegisterForm) -> AppResult<PublicAccount> {
        let staged: Vec<_> = form
            .avatar
            .iter()
            .chain(form.cover_image.iter())
            .cloned()
            .collect();

        let result = self.register_account(form).await;

        if result.is_err() {
            for path in &staged {
                remove_local_file(path).await;
            }
        }

        result
    }

    async fn register_account(&self, form: RegisterForm) -> AppResult<PublicAccount> {
        let missing: Vec<&str> = [
            ("fullname", &form.fullname),
            ("email", &form.email),
            ("password", &form.password),
            ("username", &form.username),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            return Err(AppError::Validation(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }

        let form = RegisterForm {
            fullname: form.fullname.trim().to_string(),
            email: form.email.trim().to_lowercase(),
            username: form.username.trim().to_lowercase(),
            ..form
        };

        form.validate().map_err(|errors| {
            let mut messages: Vec<String> = errors
                .field_errors()
                .into_values()
                .flatten()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                })
                .collect();
            messages.sort();
            AppError::Validation(messages.join("; "))
        })?;

        self.accounts
            .check_available(&form.username, &form.email)
            .await?;

        let avatar_path = form
            .avatar
            .as_deref()
            .ok_or_else(|| AppError::Validation("Avatar image is required".to_string()))?;

        let cover_upload = async {
            match form.cover_image.as_deref() {
                Some(path) => Some(self.uploader.upload(path).await),
                None => None,
            }
        };

        let (avatar, cover) = tokio::join!(self.uploader.upload(avatar_path), cover_upload);

        let avatar = avatar.map_err(|e| {
            tracing::error!("Avatar upload failed: {}", e);
            AppError::Upstream("Failed to upload avatar image".to_string())
        })?;

        // Cover is optional to send, but a supplied one must upload
        let cover_image = match cover {
            Some(Ok(image)) => image.url,
            Some(Err(e)) => {
                tracing::error!("Cover image upload failed: {}", e);
                return Err(AppError::Upstream(
                    "Failed to upload cover image".to_string(),
                ));
            }
            None => String::new(),
        };

        self.accounts
            .create(NewAccount {
                username: form.username,
                email: form.email,
                fullname: form.fullname,
                avatar: avatar.url,
                cover_image,
                password: form.password,
            })
            .await
    }

    /// Check credentials and start a session
    pub async fn login(&self, request: LoginRequest) -> AppResult<LoginResponse> {
        let email = request.email.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let username = request
            .username
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        if email.is_none() && username.is_none() {
            return Err(AppError::Validation(
                "Username or email is required".to_string(),
            ));
        }

        let password = canonical_password(request.password.as_ref())
            .ok_or_else(|| AppError::Validation("Password is required".to_string()))?;

        // Email wins when both are supplied
        let account = match (email, username) {
            (Some(email), _) => self.accounts.find_by_email(email).await?,
            (None, Some(username)) => self.accounts.find_by_username(username).await?,
            (None, None) => None,
        };

        let account =
            account.ok_or_else(|| AppError::AuthFailed(INVALID_CREDENTIALS.to_string()))?;

        if !self
            .accounts
            .verify_secret(&password, &account.password_hash)
            .await?
        {
            tracing::debug!(account_id = %account.id, "Password mismatch");
            return Err(AppError::AuthFailed(INVALID_CREDENTIALS.to_string()));
        }

        let pair = self.tokens.issue_pair(&account)?;
        self.accounts
            .set_refresh_token(&account.id, Some(&pair.refresh_token))
            .await?;

        tracing::info!(account_id = %account.id, "User logged in");

        Ok(LoginResponse {
            user: account.into(),
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        })
    }

    /// End the session by clearing the stored refresh token
    pub async fn logout(&self, account_id: &str) -> AppResult<()> {
        if !self.accounts.set_refresh_token(account_id, None).await? {
            return Err(AppError::Unauthorized("Unauthorized request".to_string()));
        }

        tracing::info!(account_id = %account_id, "User logged out");
        Ok(())
    }

    /// Exchange a refresh token for a new pair, invalidating the old one
    pub async fn refresh(&self, refresh_token: Option<&str>) -> AppResult<TokenPair> {
        let presented = refresh_token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::AuthFailed("Unauthorized request".to_string()))?;

        let claims = self
            .tokens
            .verify(presented, TokenKind::Refresh)
            .map_err(|e| {
                tracing::debug!("Rejected refresh token: {}", e);
                AppError::AuthFailed(INVALID_REFRESH_TOKEN.to_string())
            })?;

        let account = self
            .accounts
            .find_by_id(&claims.sub)
            .await?
            .ok_or_else(|| AppError::AuthFailed(INVALID_REFRESH_TOKEN.to_string()))?;

        if account.refresh_token.as_deref() != Some(presented) {
            tracing::warn!(account_id = %account.id, "Stale refresh token presented");
            return Err(AppError::AuthFailed(REFRESH_TOKEN_USED.to_string()));
        }

        let pair = self.tokens.issue_pair(&account)?;

        if !self
            .accounts
            .rotate_refresh_token(&account.id, presented, &pair.refresh_token)
            .await?
        {
            tracing::warn!(account_id = %account.id, "Lost refresh rotation race");
            return Err(AppError::AuthFailed(REFRESH_TOKEN_USED.to_string()));
        }

        Ok(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::test_config, db, upload::UploadedImage};
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// Uploader that fails for any file whose name contains "broken"
    #[derive(Default)]
    struct FakeUploader {
        uploaded: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl ImageUploader for FakeUploader {
        async fn upload(&self, local_path: &Path) -> AppResult<UploadedImage> {
            remove_local_file(local_path).await;

            let name = local_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if name.contains("broken") {
                return Err(AppError::Upstream("host said no".to_string()));
            }

            self.uploaded.lock().unwrap().push(local_path.to_path_buf());
            Ok(UploadedImage {
                url: format!("https://img.test/{}", name),
                public_id: name,
            })
        }
    }

    struct Harness {
        manager: SessionManager,
        accounts: AccountStore,
        tokens: Arc<TokenIssuer>,
        uploader: Arc<FakeUploader>,
        dir: tempfile::TempDir,
    }

    impl Harness {
        async fn new() -> Self {
            let accounts = AccountStore::new(db::memory_pool().await.unwrap());
            let tokens = Arc::new(TokenIssuer::new(&test_config().authentication));
            let uploader = Arc::new(FakeUploader::default());
            let manager = SessionManager::new(accounts.clone(), tokens.clone(), uploader.clone());

            Self {
                manager,
                accounts,
                tokens,
                uploader,
                dir: tempfile::tempdir().unwrap(),
            }
        }

        async fn stage(&self, name: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            tokio::fs::write(&path, b"image bytes").await.unwrap();
            path
        }

        async fn alice_form(&self) -> RegisterForm {
            RegisterForm {
                fullname: "  Alice Liddell ".to_string(),
                email: "A@X.com".to_string(),
                password: "Secret123".to_string(),
                username: "Alice".to_string(),
                avatar: Some(self.stage("avatar.png").await),
                cover_image: None,
            }
        }

        async fn register_alice(&self) -> PublicAccount {
            let form = self.alice_form().await;
            self.manager.register(form).await.unwrap()
        }

        async fn login_alice(&self) -> LoginResponse {
            self.manager
                .login(LoginRequest {
                    username: Some("ALICE".to_string()),
                    password: Some(json!("Secret123")),
                    ..Default::default()
                })
                .await
                .unwrap()
        }
    }

    fn assert_auth_failed(result: AppResult<TokenPair>, expected: &str) {
        match result {
            Err(AppError::AuthFailed(msg)) => assert_eq!(msg, expected),
            Err(other) => panic!("expected AuthFailed, got {:?}", other),
            Ok(_) => panic!("expected AuthFailed, got a token pair"),
        }
    }

    #[tokio::test]
    async fn test_register_normalizes_and_uploads() {
        let h = Harness::new().await;
        let mut form = h.alice_form().await;
        form.cover_image = Some(h.stage("cover.png").await);

        let account = h.manager.register(form).await.unwrap();
        assert_eq!(account.username, "alice");
        assert_eq!(account.email, "a@x.com");
        assert_eq!(account.fullname, "Alice Liddell");
        assert_eq!(account.avatar, "https://img.test/avatar.png");
        assert_eq!(account.cover_image, "https://img.test/cover.png");
        assert_eq!(h.uploader.uploaded.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_register_missing_fields() {
        let h = Harness::new().await;
        let form = RegisterForm {
            fullname: "Alice".to_string(),
            email: "  ".to_string(),
            password: "Secret123".to_string(),
            username: String::new(),
            avatar: Some(h.stage("avatar.png").await),
            cover_image: None,
        };
        let avatar = form.avatar.clone().unwrap();

        match h.manager.register(form).await.unwrap_err() {
            AppError::Validation(msg) => {
                assert_eq!(msg, "Missing required fields: email, username")
            }
            other => panic!("expected validation error, got {:?}", other),
        }
        // Staged file discarded on early failure
        assert!(!avatar.exists());
        assert!(h.uploader.uploaded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_rejects_bad_email_and_short_password() {
        let h = Harness::new().await;

        let mut form = h.alice_form().await;
        form.email = "alice.example.com".to_string();
        assert!(matches!(
            h.manager.register(form).await,
            Err(AppError::Validation(_))
        ));

        let mut form = h.alice_form().await;
        form.password = "12345".to_string();
        match h.manager.register(form).await.unwrap_err() {
            AppError::Validation(msg) => assert!(msg.contains("at least 6")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_register_requires_avatar() {
        let h = Harness::new().await;
        let mut form = h.alice_form().await;
        form.avatar = None;
        let cover = h.stage("cover.png").await;
        form.cover_image = Some(cover.clone());

        match h.manager.register(form).await.unwrap_err() {
            AppError::Validation(msg) => assert_eq!(msg, "Avatar image is required"),
            other => panic!("expected validation error, got {:?}", other),
        }
        assert!(!cover.exists());
    }

    #[tokio::test]
    async fn test_register_duplicate_conflicts_before_upload() {
        let h = Harness::new().await;
        h.register_alice().await;

        let mut form = h.alice_form().await;
        form.username = "alice2".to_string();
        let avatar = form.avatar.clone().unwrap();

        match h.manager.register(form).await.unwrap_err() {
            AppError::Conflict(msg) => assert_eq!(msg, "User with this email already exists"),
            other => panic!("expected conflict, got {:?}", other),
        }
        assert!(!avatar.exists());
        assert_eq!(h.uploader.uploaded.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_avatar_upload_failure() {
        let h = Harness::new().await;
        let mut form = h.alice_form().await;
        form.avatar = Some(h.stage("broken.png").await);

        match h.manager.register(form).await.unwrap_err() {
            AppError::Upstream(msg) => assert_eq!(msg, "Failed to upload avatar image"),
            other => panic!("expected upstream error, got {:?}", other),
        }
        assert!(h.accounts.find_by_username("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register_cover_upload_failure() {
        let h = Harness::new().await;
        let mut form = h.alice_form().await;
        form.cover_image = Some(h.stage("broken-cover.png").await);

        match h.manager.register(form).await.unwrap_err() {
            AppError::Upstream(msg) => assert_eq!(msg, "Failed to upload cover image"),
            other => panic!("expected upstream error, got {:?}", other),
        }
        assert!(h.accounts.find_by_username("alice").await.unwrap().is_none());
        assert!(h.accounts.find_by_email("a@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register_without_cover_stores_empty_url() {
        let h = Harness::new().await;
        let account = h.register_alice().await;
        assert_eq!(account.cover_image, "");
    }

    #[tokio::test]
    async fn test_login_issues_matching_pair() {
        let h = Harness::new().await;
        let account = h.register_alice().await;

        let response = h.login_alice().await;
        assert_eq!(response.user.id, account.id);

        let access = h
            .tokens
            .verify(&response.access_token, TokenKind::Access)
            .unwrap();
        let refresh = h
            .tokens
            .verify(&response.refresh_token, TokenKind::Refresh)
            .unwrap();
        assert_eq!(access.sub, account.id);
        assert_eq!(refresh.sub, account.id);

        let stored = h.accounts.find_by_id(&account.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some(response.refresh_token.as_str()));
    }

    #[tokio::test]
    async fn test_login_email_wins_over_username() {
        let h = Harness::new().await;
        h.register_alice().await;

        let response = h
            .manager
            .login(LoginRequest {
                email: Some("a@x.com".to_string()),
                username: Some("nobody".to_string()),
                password: Some(json!("Secret123")),
            })
            .await
            .unwrap();
        assert_eq!(response.user.username, "alice");
    }

    #[tokio::test]
    async fn test_login_failures() {
        let h = Harness::new().await;
        h.register_alice().await;

        let missing_handle = h
            .manager
            .login(LoginRequest {
                password: Some(json!("Secret123")),
                ..Default::default()
            })
            .await;
        assert!(
            matches!(missing_handle, Err(AppError::Validation(ref m)) if m == "Username or email is required")
        );

        let missing_password = h
            .manager
            .login(LoginRequest {
                username: Some("alice".to_string()),
                password: Some(json!([])),
                ..Default::default()
            })
            .await;
        assert!(
            matches!(missing_password, Err(AppError::Validation(ref m)) if m == "Password is required")
        );

        for (username, password) in [("alice", "Wrong123"), ("nobody", "Secret123")] {
            let result = h
                .manager
                .login(LoginRequest {
                    username: Some(username.to_string()),
                    password: Some(json!(password)),
                    ..Default::default()
                })
                .await;
            assert!(
                matches!(result, Err(AppError::AuthFailed(ref m)) if m == "Invalid credentials")
            );
        }
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_rejects_reuse() {
        let h = Harness::new().await;
        h.register_alice().await;
        let login = h.login_alice().await;

        let rotated = h
            .manager
            .refresh(Some(&login.refresh_token))
            .await
            .unwrap();
        assert_ne!(rotated.refresh_token, login.refresh_token);
        h.tokens
            .verify(&rotated.access_token, TokenKind::Access)
            .unwrap();

        assert_auth_failed(
            h.manager.refresh(Some(&login.refresh_token)).await,
            "Refresh token is expired or used",
        );

        // The rotated token still works exactly once
        h.manager
            .refresh(Some(&rotated.refresh_token))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_logout_then_refresh_fails() {
        let h = Harness::new().await;
        let account = h.register_alice().await;
        let login = h.login_alice().await;

        h.manager.logout(&account.id).await.unwrap();
        // Idempotent
        h.manager.logout(&account.id).await.unwrap();

        assert_auth_failed(
            h.manager.refresh(Some(&login.refresh_token)).await,
            "Refresh token is expired or used",
        );
    }

    #[tokio::test]
    async fn test_logout_unknown_account() {
        let h = Harness::new().await;
        assert!(matches!(
            h.manager.logout("missing").await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_rejects_bad_input() {
        let h = Harness::new().await;
        h.register_alice().await;
        let login = h.login_alice().await;

        assert_auth_failed(h.manager.refresh(None).await, "Unauthorized request");
        assert_auth_failed(h.manager.refresh(Some("  ")).await, "Unauthorized request");
        assert_auth_failed(
            h.manager.refresh(Some("garbage")).await,
            "Invalid refresh token",
        );
        // An access token is not a refresh token
        assert_auth_failed(
            h.manager.refresh(Some(&login.access_token)).await,
            "Invalid refresh token",
        );

        let orphan = h.tokens.issue_refresh_token("deleted-account").unwrap();
        assert_auth_failed(
            h.manager.refresh(Some(&orphan)).await,
            "Invalid refresh token",
        );
    }
}
