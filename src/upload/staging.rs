/// Multipart staging into the upload temp directory
use super::remove_local_file;
use crate::error::{AppError, AppResult};
use axum::extract::{multipart::Field, Multipart};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const MAX_FILE_NAME_LEN: usize = 64;

/// Text fields and staged file paths from a multipart body
#[derive(Debug, Default)]
pub struct StagedForm {
    fields: HashMap<String, String>,
    files: HashMap<String, PathBuf>,
}

impl StagedForm {
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Hand a staged file over to the caller, who then owns its cleanup
    pub fn take_file(&mut self, name: &str) -> Option<PathBuf> {
        self.files.remove(name)
    }

    /// Delete every staged file not yet taken
    pub async fn discard(self) {
        for path in self.files.values() {
            remove_local_file(path).await;
        }
    }
}

/// Stream every part of the body: files to disk, the rest into memory
///
/// Files without a name or with an empty body are skipped. On any error the
/// files staged so far are deleted.
pub async fn stage_multipart(mut multipart: Multipart, temp_dir: &Path) -> AppResult<StagedForm> {
    tokio::fs::create_dir_all(temp_dir).await?;

    let mut form = StagedForm::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                form.discard().await;
                return Err(AppError::Validation(format!("Malformed multipart body: {}", e)));
            }
        };

        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        let file_name = field
            .file_name()
            .filter(|n| !n.trim().is_empty())
            .map(sanitize_file_name);

        let result = match file_name {
            Some(file_name) => {
                let path = temp_dir.join(format!("{}-{}", Uuid::new_v4(), file_name));
                match write_field(field, &path).await {
                    Ok(0) => {
                        remove_local_file(&path).await;
                        Ok(())
                    }
                    Ok(_) => {
                        if let Some(replaced) = form.files.insert(name, path) {
                            remove_local_file(&replaced).await;
                        }
                        Ok(())
                    }
                    Err(e) => {
                        remove_local_file(&path).await;
                        Err(e)
                    }
                }
            }
            None => match field.text().await {
                Ok(value) => {
                    form.fields.insert(name, value);
                    Ok(())
                }
                Err(e) => Err(AppError::Validation(format!("Malformed form field: {}", e))),
            },
        };

        if let Err(e) = result {
            form.discard().await;
            return Err(e);
        }
    }

    Ok(form)
}

async fn write_field(mut field: Field<'_>, path: &Path) -> AppResult<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed file upload: {}", e)))?
    {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    Ok(written)
}

/// Keep only the final path component, restricted to a safe charset
fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILE_NAME_LEN)
        .collect();

    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// Delete staged files older than `max_age`, returning how many went
pub async fn sweep_stale(temp_dir: &Path, max_age: Duration) -> AppResult<usize> {
    let mut entries = match tokio::fs::read_dir(temp_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let now = SystemTime::now();
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();

        if age >= max_age {
            remove_local_file(&entry.path()).await;
            removed += 1;
        }
    }

    Ok(removed)
}
