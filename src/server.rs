//! HTTP boundary: upload, progress polling and static artifact serving.
//!
//! `POST /separate` stores the upload and submits a job, `GET /progress/{id}`
//! returns the job view (404 with `{"error": "Job not found"}` for unknown
//! ids), and `/outputs` serves the engine's output tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, Path as UrlPath, State,
        multipart::{Field, MultipartError},
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::StemsplitConfig;
use crate::engine::SeparationEngine;
use crate::service::JobService;
use crate::state_machine::{JobId, JobView};
use crate::store::JobStore;

/// How often the eviction sweep runs when a job TTL is configured.
const EVICTION_SWEEP_SECS: u64 = 60;

/// Response body for POST /separate.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
}

/// Error body shared by every failing endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub jobs: usize,
    pub running_jobs: usize,
    pub max_concurrent_jobs: usize,
}

/// Filesystem locations the HTTP layer reads from or writes to.
#[derive(Debug, Clone)]
pub struct ServerPaths {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub frontend_dir: PathBuf,
}

impl From<&StemsplitConfig> for ServerPaths {
    fn from(config: &StemsplitConfig) -> Self {
        Self {
            upload_dir: config.upload_dir.clone(),
            output_dir: config.output_dir.clone(),
            frontend_dir: config.frontend_dir.clone(),
        }
    }
}

/// Shared state for the HTTP server.
pub struct AppState<E> {
    pub service: JobService<E>,
    pub paths: Arc<ServerPaths>,
    pub max_upload_bytes: usize,
}

impl<E> Clone for AppState<E> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            paths: Arc::clone(&self.paths),
            max_upload_bytes: self.max_upload_bytes,
        }
    }
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

/// Reduces a client-supplied file name to a safe single path component.
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

async fn handle_root<E: SeparationEngine>(State(state): State<AppState<E>>) -> Response {
    let index = state.paths.frontend_dir.join("index.html");
    match tokio::fs::read_to_string(&index).await {
        Ok(html) => Html(html).into_response(),
        Err(_) => Json(serde_json::json!({"status": "API running"})).into_response(),
    }
}

async fn handle_health<E: SeparationEngine>(
    State(state): State<AppState<E>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        jobs: state.service.store().len(),
        running_jobs: state.service.running_jobs(),
        max_concurrent_jobs: state.service.max_concurrent_jobs(),
    })
}

fn multipart_error(e: MultipartError) -> ApiError {
    api_error(e.status(), e.body_text())
}

/// Streams one multipart field to `path`, removing the partial file on failure.
async fn store_upload(field: &mut Field<'_>, path: &Path) -> Result<(), ApiError> {
    let internal = |e: std::io::Error| {
        tracing::error!("failed to store upload: {e}");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to store upload")
    };
    let mut out = tokio::fs::File::create(path).await.map_err(internal)?;
    let written = async {
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            out.write_all(&chunk).await.map_err(internal)?;
        }
        out.flush().await.map_err(internal)
    }
    .await;
    if written.is_err() {
        drop(out);
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!("failed to remove partial upload {}: {e}", path.display());
        }
    }
    written
}

async fn handle_separate<E: SeparationEngine>(
    State(state): State<AppState<E>>,
    mut multipart: Multipart,
) -> Result<Json<SubmitResponse>, ApiError> {
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = sanitize_file_name(field.file_name().unwrap_or_default());
        let path = state
            .paths
            .upload_dir
            .join(format!("{}_{file_name}", Uuid::new_v4()));
        store_upload(&mut field, &path).await?;

        let job_id = state.service.submit(path).map_err(|e| {
            tracing::error!("failed to submit job: {e}");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;
        return Ok(Json(SubmitResponse { job_id }));
    }
    Err(api_error(
        StatusCode::BAD_REQUEST,
        "missing multipart field `file`",
    ))
}

async fn handle_progress<E: SeparationEngine>(
    State(state): State<AppState<E>>,
    UrlPath(job_id): UrlPath<String>,
) -> Result<Json<JobView>, ApiError> {
    match state.service.query(&JobId::from(job_id)) {
        Ok(record) => Ok(Json(record.view())),
        // Unknown ids get 404; the body keeps the `{"error": ...}` shape pollers read.
        Err(e) if e.is_not_found() => Err(api_error(StatusCode::NOT_FOUND, "Job not found")),
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// Build the application router.
pub fn router<E: SeparationEngine>(state: AppState<E>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .route("/", get(handle_root::<E>))
        .route("/health", get(handle_health::<E>))
        .route("/separate", post(handle_separate::<E>))
        .route("/progress/{job_id}", get(handle_progress::<E>))
        .nest_service("/outputs", ServeDir::new(&state.paths.output_dir));
    if state.paths.frontend_dir.is_dir() {
        app = app.nest_service("/static", ServeDir::new(&state.paths.frontend_dir));
    }

    let max_upload_bytes = state.max_upload_bytes;
    app.layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn prepare_dirs(paths: &ServerPaths) -> Result<()> {
    for dir in [&paths.upload_dir, &paths.output_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    if !paths.frontend_dir.is_dir() {
        tracing::info!(
            "frontend dir {} not found; /static is disabled",
            paths.frontend_dir.display()
        );
    }
    Ok(())
}

/// Run the HTTP server until Ctrl+C or SIGTERM.
pub async fn run_http(config: &StemsplitConfig) -> Result<()> {
    let paths = ServerPaths::from(config);
    prepare_dirs(&paths).await?;

    let service = JobService::new(
        JobStore::new(),
        config.engine(),
        config.layout(),
        config.service_settings(),
    );
    if let Some(ttl) = config.job_ttl() {
        tracing::info!("finished jobs are evicted after {}s", ttl.as_secs());
        service.spawn_eviction(ttl, Duration::from_secs(EVICTION_SWEEP_SECS));
    }

    let app = router(AppState {
        service,
        paths: Arc::new(paths),
        max_upload_bytes: config.max_upload_bytes,
    });
    let bind_addr = config.bind_addr();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(
        "listening on {} (engine={}, max_concurrent_jobs={})",
        bind_addr,
        config.engine_program,
        config.max_concurrent_jobs
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let ctrl_c = tokio::signal::ctrl_c();
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to listen for SIGTERM: {e}");
                let _ = ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for Ctrl+C: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::engine::OutputLayout;
    use crate::service::ServiceSettings;
    use crate::state_machine::JobStatus;
    use crate::supervisor::tests::ScriptedEngine;

    const BOUNDARY: &str = "stemsplit-test-boundary";

    struct TestApp {
        tmp: tempfile::TempDir,
        app: Router,
    }

    fn test_app(outputs: Vec<&'static str>) -> TestApp {
        test_app_with_frontend(outputs, None)
    }

    fn test_app_with_frontend(outputs: Vec<&'static str>, index_html: Option<&str>) -> TestApp {
        let tmp = tempfile::tempdir().unwrap();
        let paths = ServerPaths {
            upload_dir: tmp.path().join("uploads"),
            output_dir: tmp.path().join("outputs"),
            frontend_dir: tmp.path().join("frontend"),
        };
        std::fs::create_dir_all(&paths.upload_dir).unwrap();
        std::fs::create_dir_all(&paths.output_dir).unwrap();
        if let Some(html) = index_html {
            std::fs::create_dir_all(&paths.frontend_dir).unwrap();
            std::fs::write(paths.frontend_dir.join("index.html"), html).unwrap();
        }

        let store = JobStore::new();
        let layout = OutputLayout::new(&paths.output_dir, "htdemucs", "wav");
        let mut engine = ScriptedEngine::new(store.clone(), layout.clone());
        engine.polls_before_exit = 2;
        engine.outputs = outputs;
        let service = JobService::new(
            store,
            engine,
            layout,
            ServiceSettings {
                poll_interval: Duration::from_millis(5),
                ..Default::default()
            },
        );
        let app = router(AppState {
            service,
            paths: Arc::new(paths),
            max_upload_bytes: 1024 * 1024,
        });
        TestApp { tmp, app }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let (status, body) = send(
            app,
            Request::builder().uri(uri).body(Body::empty()).unwrap(),
        )
        .await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn multipart_request(field: &str, file_name: &str, data: &str) -> Request<Body> {
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
             Content-Type: audio/mpeg\r\n\r\n\
             {data}\r\n\
             --{BOUNDARY}--\r\n"
        );
        Request::builder()
            .method("POST")
            .uri("/separate")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn wait_done(app: &Router, job_id: &str) -> serde_json::Value {
        for _ in 0..200 {
            let (status, body) = get(app, &format!("/progress/{job_id}")).await;
            assert_eq!(status, StatusCode::OK);
            if body["status"] == "done" || body["status"] == "error" {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} did not finish");
    }

    #[test]
    fn sanitize_strips_directories_and_odd_characters() {
        assert_eq!(sanitize_file_name("song.mp3"), "song.mp3");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\music\\my song!.wav"), "my_song_.wav");
        assert_eq!(sanitize_file_name("..."), "upload");
        assert_eq!(sanitize_file_name(""), "upload");
    }

    #[tokio::test]
    async fn unknown_job_returns_not_found_shape() {
        let t = test_app(Vec::new());
        let (status, body) = get(&t.app, "/progress/does-not-exist").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, serde_json::json!({"error": "Job not found"}));
    }

    #[tokio::test]
    async fn root_falls_back_to_status_json() {
        let t = test_app(Vec::new());
        let (status, body) = get(&t.app, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"status": "API running"}));
    }

    #[tokio::test]
    async fn root_serves_frontend_index_when_present() {
        let t = test_app_with_frontend(Vec::new(), Some("<h1>stemsplit</h1>"));
        let response = t
            .app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()["content-type"].to_str().unwrap();
        assert!(content_type.starts_with("text/html"));
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"<h1>stemsplit</h1>");
    }

    #[tokio::test]
    async fn static_is_mounted_only_with_frontend_dir() {
        let t = test_app_with_frontend(Vec::new(), Some("<h1>stemsplit</h1>"));
        let request = || {
            Request::builder()
                .uri("/static/index.html")
                .body(Body::empty())
                .unwrap()
        };
        let (status, body) = send(&t.app, request()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"<h1>stemsplit</h1>");

        let bare = test_app(Vec::new());
        let (status, _) = send(&bare.app, request()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_without_leftovers() {
        let t = test_app(Vec::new());
        let data = "x".repeat(2 * 1024 * 1024);
        let (status, body) = send(&t.app, multipart_request("file", "big.wav", &data)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(body["error"].is_string());

        let leftovers = std::fs::read_dir(t.tmp.path().join("uploads"))
            .unwrap()
            .count();
        assert_eq!(leftovers, 0);
        let (_, health) = get(&t.app, "/health").await;
        assert_eq!(health["jobs"], 0);
    }

    #[tokio::test]
    async fn health_reports_job_counts() {
        let t = test_app(Vec::new());
        let (status, body) = get(&t.app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["jobs"], 0);
        assert_eq!(body["max_concurrent_jobs"], 2);
    }

    #[tokio::test]
    async fn upload_without_file_field_is_rejected() {
        let t = test_app(Vec::new());
        let (status, body) = send(&t.app, multipart_request("audio", "song.mp3", "ID3")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "missing multipart field `file`");
    }

    #[tokio::test]
    async fn upload_runs_job_and_serves_results() {
        let t = test_app(vec!["song_vocals.wav"]);

        let (status, body) = send(&t.app, multipart_request("file", "song.mp3", "ID3")).await;
        assert_eq!(status, StatusCode::OK);
        let submitted: SubmitResponse = serde_json::from_slice(&body).unwrap();

        let stored: Vec<_> = std::fs::read_dir(t.tmp.path().join("uploads"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].ends_with("_song.mp3"));
        let stem = stored[0].trim_end_matches(".mp3").to_string();

        let view = wait_done(&t.app, submitted.job_id.as_str()).await;
        let view: JobView = serde_json::from_value(view).unwrap();
        assert_eq!(view.status, JobStatus::Done);
        assert_eq!(view.progress, 100);
        assert!(view.error.is_none());
        assert_eq!(view.files.len(), 1);
        assert_eq!(view.files[0].name, "song_vocals.wav");
        assert_eq!(
            view.files[0].url,
            format!("/outputs/htdemucs/{stem}/song_vocals.wav")
        );

        let (status, bytes) = send(
            &t.app,
            Request::builder()
                .uri(&view.files[0].url)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"RIFF");
    }

    #[tokio::test]
    async fn repeated_queries_after_completion_are_identical() {
        let t = test_app(Vec::new());
        let (_, body) = send(&t.app, multipart_request("file", "a.flac", "fLaC")).await;
        let submitted: SubmitResponse = serde_json::from_slice(&body).unwrap();
        let first = wait_done(&t.app, submitted.job_id.as_str()).await;

        for _ in 0..3 {
            let (_, again) = get(&t.app, &format!("/progress/{}", submitted.job_id)).await;
            assert_eq!(again, first);
        }
        assert_eq!(first["files"], serde_json::json!([]));
    }
}
