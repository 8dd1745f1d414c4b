use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::{
    error::IntakeWarning,
    intake::IntakeReport,
    models::{AspectRatio, FileInput, ImageSummary, SessionState},
    session::{SessionController, SubmitOutcome},
};

/// Whole multipart upload; individual files are still capped by intake.
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub session: SessionController,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub state: SessionState,
    pub images: Vec<ImageSummary>,
    pub warnings: Vec<IntakeWarning>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBody {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub aspect_ratio: Option<AspectRatio>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/session", get(get_session))
        .route("/api/images", post(upload_images).delete(clear_images))
        .route("/api/images/:id", delete(remove_image))
        .route("/api/generate", post(generate))
        .route("/api/result", get(download_result))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

pub async fn get_session(State(state): State<AppState>) -> Json<SessionView> {
    let session = &state.session;
    Json(SessionView {
        state: session.state(),
        images: session.images().summaries(),
        warnings: session.recent_warnings(),
    })
}

pub async fn upload_images(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IntakeReport>, (StatusCode, String)> {
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        let name = field.file_name().or(field.name()).unwrap_or("upload").to_string();
        let declared_mime = field.content_type().map(str::to_string);
        let data = field.bytes().await.map_err(bad_request)?;
        files.push(FileInput::from_bytes(name, declared_mime, data));
    }

    tracing::info!("📥 Received {} file(s) for intake", files.len());
    Ok(Json(state.session.add_images(files).await))
}

pub async fn remove_image(Path(id): Path<Uuid>, State(state): State<AppState>) -> StatusCode {
    state.session.remove_image(id);
    StatusCode::NO_CONTENT
}

pub async fn clear_images(State(state): State<AppState>) -> StatusCode {
    state.session.clear_images();
    StatusCode::NO_CONTENT
}

pub async fn generate(State(state): State<AppState>, Json(body): Json<GenerateBody>) -> Response {
    tracing::info!("🎯 Generate requested (prompt {} chars)", body.prompt.len());
    match state.session.submit(&body.prompt, body.aspect_ratio).await {
        SubmitOutcome::Completed(s) => Json(s).into_response(),
        SubmitOutcome::Superseded => {
            (StatusCode::CONFLICT, "superseded by a newer generation request").into_response()
        }
    }
}

pub async fn download_result(State(state): State<AppState>) -> Response {
    let Some(result) = state.session.state().result else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let bytes = match result.decode() {
        Ok(b) => b,
        Err(e) => {
            tracing::error!("❌ Stored result is not valid base64: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let filename = format!("generated_{}.{}", Utc::now().format("%Y%m%d_%H%M%S"), result.file_extension());
    let mut headers = HeaderMap::new();
    if let Ok(v) = result.mime_type.parse() {
        headers.insert(header::CONTENT_TYPE, v);
    }
    if let Ok(v) = format!("attachment; filename=\"{}\"", filename).parse() {
        headers.insert(header::CONTENT_DISPOSITION, v);
    }
    (StatusCode::OK, headers, bytes).into_response()
}

fn bad_request(e: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::{BackoffClient, ReqwestTransport, Transport, TransportResponse};
    use crate::error::TransportError;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> (Router, SessionController) {
        // nothing listens here; these tests never reach the network
        let client = BackoffClient::new(Arc::new(ReqwestTransport::new()));
        let session = SessionController::new(client, "http://127.0.0.1:9/generate", 1);
        (router(AppState { session: session.clone() }), session)
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn fresh_session_is_idle_and_empty() {
        let (app, _) = app();
        let resp = app.oneshot(Request::get("/api/session").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["state"]["phase"], "idle");
        assert_eq!(body["images"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn generate_without_input_reports_validation_failure() {
        let (app, _) = app();
        let req = Request::post("/api/generate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"prompt": ""}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["phase"], "failed");
        assert_eq!(body["error"]["kind"], "validation");
    }

    #[tokio::test]
    async fn removing_unknown_image_is_a_no_op() {
        let (app, session) = app();
        session.add_images(vec![FileInput::from_bytes("a.jpg", None, vec![7u8; 16])]).await;
        let uri = format!("/api/images/{}", Uuid::new_v4());
        let resp = app.oneshot(Request::delete(uri).body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(session.images().len(), 1);
    }

    #[tokio::test]
    async fn clear_empties_the_collection() {
        let (app, session) = app();
        session.add_images(vec![FileInput::from_bytes("a.jpg", None, vec![7u8; 16])]).await;
        let resp = app.oneshot(Request::delete("/api/images").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(session.images().is_empty());
    }

    #[tokio::test]
    async fn result_is_missing_until_generated() {
        let (app, _) = app();
        let resp = app.oneshot(Request::get("/api/result").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    struct JpegEndpoint;

    #[async_trait::async_trait]
    impl Transport for JpegEndpoint {
        async fn post_json(&self, _url: &str, _body: &serde_json::Value) -> Result<TransportResponse, TransportError> {
            let body = serde_json::json!({"candidates": [{"content": {"parts": [
                {"inlineData": {"mimeType": "image/jpeg", "data": "aGVsbG8="}}
            ]}}]});
            Ok(TransportResponse { status: 200, body: body.to_string() })
        }
    }

    #[tokio::test]
    async fn generated_result_downloads_as_attachment() {
        let session = SessionController::new(BackoffClient::new(Arc::new(JpegEndpoint)), "http://x", 1);
        let app = router(AppState { session: session.clone() });
        assert!(matches!(session.submit("a red circle", None).await, SubmitOutcome::Completed(_)));

        let resp = app.oneshot(Request::get("/api/result").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/jpeg");
        let disposition = resp.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.starts_with("attachment; filename=\"generated_"), "{disposition}");
        assert!(disposition.ends_with(".jpg\""), "{disposition}");
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn multipart_upload_goes_through_intake() {
        let (app, session) = app();
        let boundary = "XBOUNDARY";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"pic.webp\"\r\nContent-Type: image/webp\r\n\r\nabcdef\r\n--{b}--\r\n",
            b = boundary
        );
        let req = Request::post("/api/images")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let report = json_body(resp).await;
        assert_eq!(report["added"].as_array().unwrap().len(), 1);

        let images = session.images();
        let rec = images.iter().next().unwrap();
        assert_eq!(rec.original_name, "pic.webp");
        assert_eq!(rec.mime_type, "image/webp");
    }
}
