use crate::{
    import,
    responses::{internal_error, FieldErrors},
};
use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

const UPLOAD_FIELD: &str = "file";
const NOT_A_FILE: &str = "The submitted data was not a file. Check the encoding type on the form.";

struct Upload {
    file_name: String,
    content: Vec<u8>,
}

pub async fn post(
    State(app_state): State<crate::AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let Ok(mut multipart) = multipart else {
        return FieldErrors::single(UPLOAD_FIELD, NOT_A_FILE).into_response();
    };
    let Upload { file_name, content } = match read_upload(&mut multipart).await {
        Ok(upload) => upload,
        Err(response) => return response,
    };
    match import::run(&app_state.store, &file_name, content).await {
        Ok(summary) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "status": "success",
                "created": summary.readings_created,
            })),
        )
            .into_response(),
        Err(err) if err.is_validation() => {
            FieldErrors::single(UPLOAD_FIELD, err.to_string()).into_response()
        }
        Err(err) => internal_error(&err),
    }
}

/// Finds the upload field and reads it whole - other form fields are ignored.
async fn read_upload(multipart: &mut Multipart) -> Result<Upload, Response> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => {
                return Err(
                    FieldErrors::single(UPLOAD_FIELD, "No file was submitted.").into_response(),
                )
            }
            Err(err) => {
                tracing::warn!("reading multipart upload: {err}");
                return Err(err.into_response());
            }
        };
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let Some(file_name) = field.file_name().map(str::to_owned) else {
            return Err(FieldErrors::single(UPLOAD_FIELD, NOT_A_FILE).into_response());
        };
        let content = match field.bytes().await {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("reading upload {file_name}: {err}");
                return Err(err.into_response());
            }
        };
        if content.is_empty() {
            return Err(
                FieldErrors::single(UPLOAD_FIELD, "The submitted file is empty.").into_response(),
            );
        }
        return Ok(Upload {
            file_name,
            content: content.to_vec(),
        });
    }
}
