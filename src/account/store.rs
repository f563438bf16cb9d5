/// Account persistence: lookups, creation, and the refresh-token slot
use crate::{
    account::password,
    db::account::{Account, NewAccount, PublicAccount},
    error::{AppError, AppResult},
};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

const ACCOUNT_COLUMNS: &str = "id, username, email, fullname, avatar, cover_image, \
     password_hash, refresh_token, created_at, updated_at";

const PUBLIC_COLUMNS: &str =
    "id, username, email, fullname, avatar, cover_image, created_at, updated_at";

/// Account store backed by the account database
#[derive(Clone)]
pub struct AccountStore {
    db: SqlitePool,
}

impl AccountStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Find an account by email (if the handle looks like one) or username
    pub async fn find_by_handle(&self, handle: &str) -> AppResult<Option<Account>> {
        if handle.contains('@') {
            self.find_by_email(handle).await
        } else {
            self.find_by_username(handle).await
        }
    }

    pub async fn find_by_email(&self, email: &str) -> AppResult<Option<Account>> {
        self.find_by_column("email", email).await
    }

    pub async fn find_by_username(&self, username: &str) -> AppResult<Option<Account>> {
        self.find_by_column("username", username).await
    }

    async fn find_by_column(&self, column: &str, value: &str) -> AppResult<Option<Account>> {
        let value = value.trim().to_lowercase();

        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM account WHERE {} = ?1",
            ACCOUNT_COLUMNS, column
        ))
        .bind(&value)
        .fetch_optional(&self.db)
        .await?;

        Ok(account)
    }

    /// Get full account by id
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM account WHERE id = ?1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(account)
    }

    /// Get account by id without loading secret columns
    pub async fn find_public_by_id(&self, id: &str) -> AppResult<Option<PublicAccount>> {
        let account = sqlx::query_as::<_, PublicAccount>(&format!(
            "SELECT {} FROM account WHERE id = ?1",
            PUBLIC_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(account)
    }

    /// Fail with `Conflict` if the username or email is already registered
    pub async fn check_available(&self, username: &str, email: &str) -> AppResult<()> {
        let username = username.trim().to_lowercase();
        let email = email.trim().to_lowercase();

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT email FROM account WHERE username = ?1 OR email = ?2 LIMIT 1",
        )
        .bind(&username)
        .bind(&email)
        .fetch_optional(&self.db)
        .await?;

        match existing {
            Some(taken_email) => {
                let field = if taken_email.eq_ignore_ascii_case(&email) {
                    "email"
                } else {
                    "username"
                };
                Err(AppError::Conflict(format!(
                    "User with this {} already exists",
                    field
                )))
            }
            None => Ok(()),
        }
    }

    /// Create a new account, hashing the supplied password
    pub async fn create(&self, new_account: NewAccount) -> AppResult<PublicAccount> {
        let username = new_account.username.trim().to_lowercase();
        let email = new_account.email.trim().to_lowercase();

        self.check_available(&username, &email).await?;

        let password_hash = password::hash_password_async(new_account.password).await?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO account (id, username, email, fullname, avatar, cover_image, password_hash, refresh_token, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?8)",
        )
        .bind(&id)
        .bind(&username)
        .bind(&email)
        .bind(&new_account.fullname)
        .bind(&new_account.avatar)
        .bind(&new_account.cover_image)
        .bind(&password_hash)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(|e| match e {
            // A concurrent registration won the race past the pre-check
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict("User with this email or username already exists".to_string())
            }
            other => AppError::Database(other),
        })?;

        tracing::info!(account_id = %id, username = %username, "Account created");

        Ok(PublicAccount {
            id,
            username,
            email,
            fullname: new_account.fullname,
            avatar: new_account.avatar,
            cover_image: new_account.cover_image,
            created_at: now,
            updated_at: now,
        })
    }

    /// Overwrite (or clear) the account's refresh token slot
    ///
    /// Returns false if no account has this id.
    pub async fn set_refresh_token(&self, id: &str, token: Option<&str>) -> AppResult<bool> {
        let result =
            sqlx::query("UPDATE account SET refresh_token = ?1, updated_at = ?2 WHERE id = ?3")
                .bind(token)
                .bind(Utc::now())
                .bind(id)
                .execute(&self.db)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Replace the stored refresh token only if it still equals `expected`
    ///
    /// Returns false if another rotation or a logout got there first.
    pub async fn rotate_refresh_token(
        &self,
        id: &str,
        expected: &str,
        new_token: &str,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE account SET refresh_token = ?1, updated_at = ?2 WHERE id = ?3 AND refresh_token = ?4",
        )
        .bind(new_token)
        .bind(Utc::now())
        .bind(id)
        .bind(expected)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Check a plaintext password against a stored hash
    pub async fn verify_secret(&self, plaintext: &str, password_hash: &str) -> AppResult<bool> {
        password::verify_password_async(plaintext.to_string(), password_hash.to_string()).await
    }
}
