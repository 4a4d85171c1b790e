use std::path::Path;

use axum::extract::Multipart;

use crate::{ApiError, ApiResult, db};

/// Persists the named upload field and returns the opaque reference the
/// rest of the system treats as a plain string (`/uploads/<file>`).
/// Filenames are `<unix_ms>-<random>` plus a sanitized extension, so
/// nothing client-controlled reaches the filesystem path.
pub async fn store_upload(
    dir: &Path,
    mut multipart: Multipart,
    field_name: &str,
) -> ApiResult<String> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(field_name) {
            continue;
        }
        let ext = field
            .file_name()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext)
            .filter(|ext| {
                !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric())
            })
            .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
            .unwrap_or_default();

        let bytes = field.bytes().await?;
        if bytes.is_empty() {
            return Err(ApiError::InvalidArgument(format!(
                "empty {field_name} upload"
            )));
        }

        let name = format!("{}-{}{}", db::now_millis(), rand::random::<u32>(), ext);
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(dir.join(&name), &bytes).await?;
        return Ok(format!("/uploads/{name}"));
    }

    Err(ApiError::InvalidArgument(format!(
        "missing {field_name} upload field"
    )))
}
