/// Background job task implementations
use crate::{context::AppContext, db, error::AppResult, upload::staging};
use std::time::Duration;
use tracing::debug;

/// Delete staged upload files older than the configured age
pub async fn cleanup_staged_uploads(ctx: &AppContext) -> AppResult<usize> {
    let upload = &ctx.config.upload;
    let max_age = Duration::from_secs(upload.stale_after.max(0) as u64);

    staging::sweep_stale(&upload.temp_dir, max_age).await
}

/// Check that the account database still answers
pub async fn health_check(ctx: &AppContext) -> AppResult<()> {
    db::test_connection(&ctx.account_db).await?;
    debug!("Health check passed");
    Ok(())
}
