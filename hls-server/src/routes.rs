use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use stream_lifecycle::{LifecycleError, StreamState, StreamStatus};
use tokio_util::io::ReaderStream;

use crate::error::HlsError;
use crate::state::HlsState;

const CONTENT_SECURITY_POLICY: &str =
    "default-src 'self'; script-src 'self' 'unsafe-inline'; style-src 'self' 'unsafe-inline'";

/// Create the router with the stream control API and the segment server.
pub fn router(state: Arc<HlsState>) -> Router {
    Router::new()
        .route("/", get(health_handler))
        // Stream control
        .route("/api/rtsp/connect", post(connect_handler).options(preflight_handler))
        .route("/api/rtsp/disconnect", post(disconnect_handler).options(preflight_handler))
        .route("/api/rtsp/status", get(status_handler).options(preflight_handler))
        // Transcoder output
        .route("/static/{dir}/{file}", get(static_file_handler))
        .layer(middleware::map_response_with_state(
            state.clone(),
            response_headers,
        ))
        .with_state(state)
}

async fn health_handler() -> Html<&'static str> {
    Html("<p>RTSP Overlay Backend Running</p>")
}

async fn preflight_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct ConnectRequest {
    url: Option<String>,
    rtsp_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectResponse {
    status: StreamStatus,
    url: String,
    stream_path: String,
    stream_url: String,
}

/// Start streaming from the posted RTSP address, replacing any current stream.
///
/// Accepts `{"url": ...}` or `{"rtsp_url": ...}`.
async fn connect_handler(
    State(state): State<Arc<HlsState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ConnectResponse>, HlsErrorResponse> {
    if body.is_empty() {
        return Err(HlsError::BadRequest("No data provided".to_string()).into());
    }
    let request: ConnectRequest = serde_json::from_slice(&body)
        .map_err(|_| HlsError::BadRequest("Invalid JSON body".to_string()))?;

    let url = request
        .url
        .filter(|u| !u.is_empty())
        .or(request.rtsp_url.filter(|u| !u.is_empty()))
        .ok_or_else(|| HlsError::BadRequest("URL is required".to_string()))?;

    let report = state.manager.start(&url).await.map_err(HlsError::from)?;

    Ok(Json(ConnectResponse {
        status: report.status,
        stream_url: format!("{}{}", base_url(&headers), report.delivery_path),
        url: report.source_url,
        stream_path: report.delivery_path,
    }))
}

async fn disconnect_handler(
    State(state): State<Arc<HlsState>>,
) -> Result<impl IntoResponse, HlsErrorResponse> {
    state.manager.stop().await.map_err(HlsError::from)?;
    Ok(Json(json!({ "status": StreamStatus::Idle })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: StreamStatus,
    url: Option<String>,
    last_error: Option<String>,
    started_at: Option<DateTime<Utc>>,
}

impl From<StreamState> for StatusResponse {
    fn from(state: StreamState) -> Self {
        Self {
            status: state.status,
            url: state.source_url,
            last_error: state.last_error,
            started_at: state.started_at,
        }
    }
}

async fn status_handler(State(state): State<Arc<HlsState>>) -> Json<StatusResponse> {
    Json(state.manager.status().into())
}

/// What a request under the HLS directory may ask for
#[derive(Debug, PartialEq, Eq)]
enum StreamFile {
    Manifest,
    Segment,
}

fn classify_file(name: &str, manifest_name: &str) -> Option<StreamFile> {
    if name == manifest_name {
        return Some(StreamFile::Manifest);
    }
    let stem = name.strip_suffix(".ts")?;
    let plain = !stem.is_empty()
        && stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    plain.then_some(StreamFile::Segment)
}

/// Serve the live manifest or one of its segments.
async fn static_file_handler(
    Path((dir, file)): Path<(String, String)>,
    State(state): State<Arc<HlsState>>,
) -> Result<Response, HlsErrorResponse> {
    let output = state.output();
    if output.dir_name() != Some(dir.as_str()) {
        return Err(HlsError::NotFound(format!("{}/{}", dir, file)).into());
    }
    let kind = classify_file(&file, output.manifest_name())
        .ok_or_else(|| HlsError::InvalidFileName(file.clone()))?;

    let path = output.dir().join(&file);
    let handle = match tokio::fs::File::open(&path).await {
        Ok(handle) => handle,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(HlsError::NotFound(file).into());
        }
        Err(e) => return Err(HlsError::Io(e).into()),
    };

    let body = Body::from_stream(ReaderStream::new(handle));
    let response = match kind {
        // The playlist is rewritten every segment; never let it be cached
        StreamFile::Manifest => (
            [
                (header::CONTENT_TYPE, "application/vnd.apple.mpegurl"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            body,
        )
            .into_response(),
        StreamFile::Segment => ([(header::CONTENT_TYPE, "video/mp2t")], body).into_response(),
    };
    Ok(response)
}

/// Security headers on every response, plus CORS when an origin is configured
async fn response_headers(State(state): State<Arc<HlsState>>, mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(CONTENT_SECURITY_POLICY),
    );

    if let Some(origin) = state
        .cors_origin
        .as_deref()
        .and_then(|o| HeaderValue::from_str(o).ok())
    {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, OPTIONS, PUT, DELETE, PATCH"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        );
    }
    response
}

/// `http://<host>` of the incoming request, empty when there is no Host header
fn base_url(headers: &HeaderMap) -> String {
    headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(|host| format!("http://{}", host))
        .unwrap_or_default()
}

/// Error response wrapper for HlsError
pub struct HlsErrorResponse(HlsError);

impl From<HlsError> for HlsErrorResponse {
    fn from(e: HlsError) -> Self {
        HlsErrorResponse(e)
    }
}

impl IntoResponse for HlsErrorResponse {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            HlsError::BadRequest(_) | HlsError::InvalidFileName(_) => {
                (StatusCode::BAD_REQUEST, self.0.to_string())
            }
            HlsError::NotFound(_) => (StatusCode::NOT_FOUND, self.0.to_string()),
            HlsError::Lifecycle(LifecycleError::Validation(_)) => {
                (StatusCode::BAD_REQUEST, self.0.to_string())
            }
            HlsError::Lifecycle(LifecycleError::NoActiveStream) => {
                (StatusCode::CONFLICT, self.0.to_string())
            }
            HlsError::Lifecycle(LifecycleError::Spawn(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to connect to stream".to_string(),
            ),
            HlsError::Lifecycle(LifecycleError::TerminationFailed { .. }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to stop the running stream".to_string(),
            ),
            HlsError::Io(_) | HlsError::TranscoderUnavailable(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!("HLS error: {}", self.0);
        } else {
            tracing::warn!("HLS error: {}", self.0);
        }

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use config_manager::{BridgeConfig, Readiness};
    use serde_json::Value;
    use stream_lifecycle::testing::FakeSpawner;
    use stream_lifecycle::LifecycleManager;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestApp {
        app: Router,
        state: Arc<HlsState>,
        spawner: FakeSpawner,
        dir: TempDir,
    }

    fn test_app() -> TestApp {
        test_app_with(|_| {})
    }

    fn test_app_with(customize: impl FnOnce(&mut BridgeConfig)) -> TestApp {
        let dir = TempDir::new().unwrap();
        let mut config = BridgeConfig::default();
        config.server.static_dir = dir.path().to_path_buf();
        config.server.cors_origin = Some("http://localhost:3000".to_string());
        config.stream.readiness = Readiness::Immediate;
        config.stream.graceful_shutdown_secs = 1;
        customize(&mut config);

        let spawner = FakeSpawner::new();
        let manager = Arc::new(LifecycleManager::new(&config, Arc::new(spawner.clone())));
        let state = Arc::new(HlsState::new(&config, manager));
        TestApp {
            app: router(state.clone()),
            state,
            spawner,
            dir,
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::HOST, "localhost:5000")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_body(body: &Bytes) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn test_connect_starts_stream() {
        let t = test_app();

        let (status, _, body) = send(
            &t.app,
            post_json("/api/rtsp/connect", r#"{"url": "rtsp://10.0.0.2:554/stream1"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let body = json_body(&body);
        assert_eq!(body["status"], "live");
        assert_eq!(body["url"], "rtsp://10.0.0.2:554/stream1");
        assert_eq!(body["streamPath"], "/static/hls/stream.m3u8");
        assert_eq!(
            body["streamUrl"],
            "http://localhost:5000/static/hls/stream.m3u8"
        );
        assert_eq!(t.spawner.live_count(), 1);
        t.state.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_accepts_rtsp_url_field() {
        let t = test_app();

        let (status, _, body) = send(
            &t.app,
            post_json("/api/rtsp/connect", r#"{"rtsp_url": "rtsp://cam.local/live"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body)["url"], "rtsp://cam.local/live");
        t.state.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_requests() {
        let t = test_app();

        let cases = [
            ("", "No data provided"),
            ("not json", "Invalid JSON body"),
            (r#"{"url": ""}"#, "URL is required"),
            ("{}", "URL is required"),
        ];
        for (request, expected) in cases {
            let (status, _, body) = send(&t.app, post_json("/api/rtsp/connect", request)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{request}");
            assert_eq!(json_body(&body)["error"], expected);
        }

        let (status, _, body) = send(
            &t.app,
            post_json("/api/rtsp/connect", r#"{"url": "rtsp://cam/live;reboot"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error = json_body(&body)["error"].as_str().unwrap().to_string();
        assert!(error.starts_with("Invalid RTSP URL"), "{error}");

        assert_eq!(t.spawner.spawn_count(), 0);
        assert_eq!(t.state.manager.status().status, StreamStatus::Idle);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_sanitized() {
        let t = test_app();
        t.spawner.fail_next_spawn();

        let (status, _, body) = send(
            &t.app,
            post_json("/api/rtsp/connect", r#"{"url": "rtsp://10.0.0.2/stream"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(&body)["error"], "Failed to connect to stream");

        let (_, _, body) = send(&t.app, get("/api/rtsp/status")).await;
        let body = json_body(&body);
        assert_eq!(body["status"], "error");
        assert!(body["lastError"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_disconnect() {
        let t = test_app();

        let (status, _, body) = send(&t.app, post_json("/api/rtsp/disconnect", "")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json_body(&body)["error"], "No active stream");

        send(
            &t.app,
            post_json("/api/rtsp/connect", r#"{"url": "rtsp://10.0.0.2/stream"}"#),
        )
        .await;
        let (status, _, body) = send(&t.app, post_json("/api/rtsp/disconnect", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body)["status"], "idle");
        assert_eq!(t.spawner.live_count(), 0);
    }

    #[tokio::test]
    async fn test_status_reports_state() {
        let t = test_app();

        let (status, _, body) = send(&t.app, get("/api/rtsp/status")).await;
        assert_eq!(status, StatusCode::OK);
        let body = json_body(&body);
        assert_eq!(body["status"], "idle");
        assert!(body["url"].is_null());
        assert!(body["lastError"].is_null());
        assert!(body["startedAt"].is_null());

        send(
            &t.app,
            post_json("/api/rtsp/connect", r#"{"url": "rtsp://10.0.0.2/stream"}"#),
        )
        .await;
        let (_, _, body) = send(&t.app, get("/api/rtsp/status")).await;
        let body = json_body(&body);
        assert_eq!(body["status"], "live");
        assert_eq!(body["url"], "rtsp://10.0.0.2/stream");
        assert!(body["startedAt"].is_string());
        t.state.shutdown().await;
    }

    #[tokio::test]
    async fn test_serves_manifest_and_segments() {
        let t = test_app();
        let hls_dir = t.state.hls_dir();
        std::fs::create_dir_all(&hls_dir).unwrap();
        std::fs::write(hls_dir.join("stream.m3u8"), "#EXTM3U\n").unwrap();
        std::fs::write(hls_dir.join("segment_001.ts"), b"\x47\x40\x00").unwrap();

        let (status, headers, body) = send(&t.app, get("/static/hls/stream.m3u8")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/vnd.apple.mpegurl");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(&body[..], b"#EXTM3U\n");

        let (status, headers, body) = send(&t.app, get("/static/hls/segment_001.ts")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "video/mp2t");
        assert_eq!(&body[..], b"\x47\x40\x00");

        let (status, _, _) = send(&t.app, get("/static/hls/segment_999.ts")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = send(&t.app, get("/static/other/stream.m3u8")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_serves_from_manager_output_location() {
        let t = test_app_with(|config| {
            config.stream.hls_subdir = "cam1".to_string();
            config.stream.manifest_name = "live.m3u8".to_string();
        });
        assert_eq!(t.state.hls_dir(), t.dir.path().join("cam1"));
        assert_eq!(t.state.hls_dir(), t.state.manager.output().dir());

        std::fs::create_dir_all(t.state.hls_dir()).unwrap();
        std::fs::write(t.state.hls_dir().join("live.m3u8"), "#EXTM3U\n").unwrap();

        let (status, headers, _) = send(&t.app, get("/static/cam1/live.m3u8")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/vnd.apple.mpegurl");

        let (status, _, _) = send(&t.app, get("/static/hls/live.m3u8")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        // Default manifest name is just another invalid file here
        let (status, _, _) = send(&t.app, get("/static/cam1/stream.m3u8")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let t = test_app();
        std::fs::write(t.dir.path().join("secret.ts"), b"secret").unwrap();

        for uri in [
            "/static/hls/..%2Fsecret.ts",
            "/static/hls/notes.txt",
            "/static/hls/.ts",
        ] {
            let (status, _, body) = send(&t.app, get(uri)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_ne!(&body[..], b"secret");
        }
    }

    #[tokio::test]
    async fn test_response_headers() {
        let t = test_app();

        let (status, headers, body) = send(&t.app, get("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8_lossy(&body).contains("Running"));
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );

        // Error responses carry them too
        let (_, headers, _) = send(&t.app, get("/static/hls/missing.ts")).await;
        assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");

        let preflight = Request::builder()
            .method("OPTIONS")
            .uri("/api/rtsp/connect")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(&t.app, preflight).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(headers.contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
    }

    #[test]
    fn test_classify_file() {
        assert_eq!(
            classify_file("stream.m3u8", "stream.m3u8"),
            Some(StreamFile::Manifest)
        );
        assert_eq!(
            classify_file("segment_042.ts", "stream.m3u8"),
            Some(StreamFile::Segment)
        );
        assert_eq!(classify_file("other.m3u8", "stream.m3u8"), None);
        assert_eq!(classify_file("../segment.ts", "stream.m3u8"), None);
        assert_eq!(classify_file("seg ment.ts", "stream.m3u8"), None);
    }
}
