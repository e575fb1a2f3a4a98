//! 图片与音频的单文件 multipart 上传。

use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{Extension, Multipart};
use axum::http::StatusCode;
use axum::response::Json as JsonResponse;
use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::{AUDIO_DIR, IMAGES_DIR, UPLOADS_URL_PREFIX};
use crate::error::ApiError;
use crate::storage::Storage;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadKind {
    Image,
    Audio,
}

impl UploadKind {
    /// 承载文件的 multipart 字段名。
    pub fn field_name(self) -> &'static str {
        match self {
            UploadKind::Image => "image",
            UploadKind::Audio => "audio",
        }
    }

    pub fn dir_name(self) -> &'static str {
        match self {
            UploadKind::Image => IMAGES_DIR,
            UploadKind::Audio => AUDIO_DIR,
        }
    }

    pub fn mime_prefix(self) -> &'static str {
        match self {
            UploadKind::Image => "image/",
            UploadKind::Audio => "audio/",
        }
    }
}

#[derive(Debug)]
pub struct UploadConfig {
    pub image_max_size: u64,
    pub audio_max_size: u64,
}

impl UploadConfig {
    pub fn max_size(&self, kind: UploadKind) -> u64 {
        match kind {
            UploadKind::Image => self.image_max_size,
            UploadKind::Audio => self.audio_max_size,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
    pub filename: String,
}

pub async fn upload_image(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    let multipart = multipart?;
    store_upload(UploadKind::Image, &storage, &upload, multipart)
        .await
        .map(JsonResponse)
}

pub async fn upload_audio(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    let multipart = multipart?;
    store_upload(UploadKind::Audio, &storage, &upload, multipart)
        .await
        .map(JsonResponse)
}

/// 只接受该类型字段名下的一个文件，其他字段忽略。
async fn store_upload(
    kind: UploadKind,
    storage: &Storage,
    upload: &UploadConfig,
    mut multipart: Multipart,
) -> Result<UploadResponse, ApiError> {
    let mut stored: Option<(PathBuf, UploadResponse)> = None;

    loop {
        let next = multipart.next_field().await;
        let field = match next {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                discard(stored.take()).await;
                return Err(multipart_error(err));
            }
        };
        if field.name() != Some(kind.field_name()) {
            continue;
        }
        let Some(original_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        if stored.is_some() {
            discard(stored.take()).await;
            return Err(ApiError::BadRequest(format!(
                "only one '{}' file is allowed",
                kind.field_name()
            )));
        }

        let mime = declared_mime(&field, &original_name);
        if !mime.starts_with(kind.mime_prefix()) {
            warn!(kind = ?kind, mime, original_name, "rejected upload type");
            return Err(ApiError::UnsupportedMediaType(format!(
                "only {}* files are allowed",
                kind.mime_prefix()
            )));
        }

        let filename = generate_filename(&original_name);
        let target = storage.root_path().join(kind.dir_name()).join(&filename);
        let size = write_field(field, &target, upload.max_size(kind)).await?;
        info!(kind = ?kind, filename, original_name, size, "upload stored");
        let url = format!("{UPLOADS_URL_PREFIX}{}/{filename}", kind.dir_name());
        stored = Some((target, UploadResponse { url, filename }));
    }

    stored
        .map(|(_, response)| response)
        .ok_or_else(|| ApiError::BadRequest("No file uploaded".into()))
}

/// 优先使用声明的类型，缺失时按原始文件名推断。
fn declared_mime(field: &Field<'_>, original_name: &str) -> String {
    match field.content_type() {
        Some(value) if !value.trim().is_empty() => value.trim().to_ascii_lowercase(),
        _ => mime_guess::from_path(original_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

/// `<毫秒时间戳>-<9 位随机数>.<扩展名>`；原文件无扩展名时省略。
fn generate_filename(original_name: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: u32 = rand::rng().random_range(100_000_000..1_000_000_000);
    let extension = Path::new(original_name)
        .extension()
        .and_then(OsStr::to_str)
        .filter(|ext| !ext.is_empty() && ext.bytes().all(|b| b.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default();
    format!("{millis}-{suffix}{extension}")
}

/// 流式写入磁盘，超出上限时删除残留的部分文件。
async fn write_field(mut field: Field<'_>, target: &Path, max_size: u64) -> Result<u64, ApiError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|err| ApiError::Internal(err.to_string()))?;
    }
    let mut file = File::create(target)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    let mut total_written: u64 = 0;
    let result: Result<(), ApiError> = async {
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            if chunk.is_empty() {
                continue;
            }
            total_written += chunk.len() as u64;
            if total_written > max_size {
                return Err(ApiError::PayloadTooLarge(format!(
                    "file exceeds the {max_size} byte limit"
                )));
            }
            file.write_all(&chunk)
                .await
                .map_err(|err| ApiError::Internal(err.to_string()))?;
        }
        file.flush()
            .await
            .map_err(|err| ApiError::Internal(err.to_string()))
    }
    .await;

    if let Err(err) = result {
        drop(file);
        let _ = fs::remove_file(target).await;
        debug!(path = ?target, "removed partial upload");
        return Err(err);
    }
    Ok(total_written)
}

async fn discard(stored: Option<(PathBuf, UploadResponse)>) {
    if let Some((path, _)) = stored {
        let _ = fs::remove_file(path).await;
    }
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::BadRequest(err.body_text())
    }
}
