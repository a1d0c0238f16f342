use axum::extract::{Multipart, State};
use chrono::Utc;
use uuid::Uuid;

use crate::context::{Identity, RequestContext};
use crate::error::{AppError, AppResult};
use crate::sanitize::Sanitizer;
use crate::state::AppState;
use crate::store::UploadRecord;
use crate::types::{ApiResponse, Created, UploadDto};

const FILE_FIELD: &str = "file";

/// Per-category MIME allow-list and size ceiling.
struct Rules<'a> {
    mime_types: &'a [String],
    max_bytes: usize,
}

fn rules_for<'a>(state: &'a AppState, category: &str) -> Option<Rules<'a>> {
    let cfg = &state.config.uploads;
    match category {
        "images" => Some(Rules { mime_types: &cfg.image_mime_types, max_bytes: cfg.image_max_bytes }),
        "documents" => Some(Rules { mime_types: &cfg.document_mime_types, max_bytes: cfg.document_max_bytes }),
        _ => None,
    }
}

/// `POST /uploads/{category}` with a multipart `file` field.
///
/// The declared MIME type is checked before the file part is read. The body
/// arrives already capped at the global ceiling; the category ceiling is
/// checked chunk by chunk as the part is read.
pub async fn upload(
    State(state): State<AppState>,
    ctx: RequestContext,
    Identity(claims): Identity,
    mut multipart: Multipart,
) -> AppResult<Created<ApiResponse<UploadDto>>> {
    let category = ctx.path_param("category").unwrap_or_default().to_string();
    let rules = rules_for(&state, &category)
        .ok_or_else(|| AppError::NotFound("Upload category not found".to_string()))?;

    while let Some(mut field) = multipart.next_field().await.map_err(|e| AppError::validation(FILE_FIELD, e.body_text()))? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let content_type = field.content_type().unwrap_or_default().to_string();
        if !rules.mime_types.iter().any(|m| m.eq_ignore_ascii_case(&content_type)) {
            return Err(AppError::InvalidFileType(content_type));
        }
        let file_name = match Sanitizer::strict().sanitize_str(field.file_name().unwrap_or_default()) {
            name if name.is_empty() => "upload".to_string(),
            name => name,
        };

        let mut size = 0usize;
        while let Some(chunk) = field.chunk().await.map_err(|e| AppError::validation(FILE_FIELD, e.body_text()))? {
            size += chunk.len();
            if size > rules.max_bytes {
                return Err(AppError::FileTooLarge { limit: rules.max_bytes });
            }
        }

        let record = state
            .uploads
            .save(UploadRecord {
                id: Uuid::new_v4().to_string(),
                owner_id: claims.sub.clone(),
                category,
                file_name,
                content_type,
                size,
                created_at: Utc::now(),
            })
            .await?;
        tracing::info!(request_id = %ctx.request_id(), upload_id = %record.id, size, "file uploaded");
        return Ok(Created(ApiResponse::with_message("File uploaded successfully", UploadDto::from(&record))));
    }

    Err(AppError::validation(FILE_FIELD, "is required"))
}

/// `GET /uploads` - the caller's own uploads.
pub async fn list_mine(State(state): State<AppState>, Identity(claims): Identity) -> AppResult<ApiResponse<Vec<UploadDto>>> {
    let uploads = state.uploads.list_for(&claims.sub).await?;
    Ok(ApiResponse::ok(uploads.iter().map(UploadDto::from).collect()))
}
