use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use gibct_data::config::Config;
use gibct_data::error::{BuildError, IngestError, LoadError};
use gibct_data::export::{self, LoadStats};
use gibct_data::ingestion::types::{Delimiter, IngestStats, RawUpload, SourceType, UploadRecord};
use gibct_data::ingestion::write;
use gibct_data::merge::{self, write::load_canonical, BuildStats};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
struct AppState {
    db: PgPool,
    config: Arc<Config>,
}

#[derive(Serialize, Deserialize)]
struct ApiResponse {
    message: String,
    status: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    println!("🎓 Starting GIBCT data service...");

    let config = Config::from_env()?;

    println!("📦 Connecting to database...");
    let pool = gibct_data::db::connect(&config.database_url).await?;
    println!("✅ Database connected successfully");

    let addr = config.bind_addr;
    let body_limit = config.max_upload_bytes;
    let state = AppState {
        db: pool,
        config: Arc::new(config),
    };

    let app = Router::new()
        .route("/", get(health_check))
        .route("/api/health", get(health_check))
        .route("/api/sources", get(list_sources))
        .route("/api/uploads/:key", post(upload).delete(delete_upload))
        .route("/api/build", post(build))
        .route("/api/export.csv", get(export_csv))
        .route("/api/push", post(push))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state);

    println!("🚀 Server running on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Error body with the status it maps to
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl ToString) -> Self {
        ApiError {
            status,
            message: message.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("{}", self.message);
        }

        (
            self.status,
            Json(ApiResponse {
                message: self.message,
                status: "error".to_string(),
            }),
        )
            .into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        if err.is_validation() {
            ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, err)
        } else {
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err)
        }
    }
}

impl From<BuildError> for ApiError {
    fn from(err: BuildError) -> Self {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err)
    }
}

impl From<LoadError> for ApiError {
    fn from(err: LoadError) -> Self {
        ApiError::new(StatusCode::BAD_GATEWAY, err)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("Database error: {}", err))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", err))
    }
}

async fn health_check() -> Json<ApiResponse> {
    Json(ApiResponse {
        message: "GIBCT data service is running!".to_string(),
        status: "ok".to_string(),
    })
}

#[derive(Serialize)]
struct SourcesResponse {
    source_types: Vec<&'static str>,
    uploads: Vec<UploadRecord>,
    complete: bool,
}

async fn list_sources(State(state): State<AppState>) -> Result<Json<SourcesResponse>, ApiError> {
    let uploads = write::latest_uploads(&state.db).await?;
    let complete = write::is_complete(&state.db).await?;

    Ok(Json(SourcesResponse {
        source_types: SourceType::ALL.iter().map(SourceType::as_str).collect(),
        uploads,
        complete,
    }))
}

#[derive(Deserialize)]
struct UploadParams {
    #[serde(default)]
    delimiter: Delimiter,
}

async fn upload(
    State(state): State<AppState>,
    Path(source_type): Path<String>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<Json<IngestStats>, ApiError> {
    let source = source_type
        .parse::<SourceType>()
        .map_err(|e| ApiError::new(StatusCode::NOT_FOUND, e))?;

    let stats = write::ingest(&state.db, RawUpload::new(source, body.to_vec()), params.delimiter).await?;

    Ok(Json(stats))
}

async fn delete_upload(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    if write::delete_upload(&state.db, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::new(StatusCode::NOT_FOUND, format!("Upload {} not found", id)))
    }
}

#[derive(Serialize)]
struct BuildResponse {
    built: bool,
    stats: Option<BuildStats>,
}

async fn build(State(state): State<AppState>) -> Result<Json<BuildResponse>, ApiError> {
    let stats = merge::build(&state.db).await?;

    Ok(Json(BuildResponse {
        built: stats.is_some(),
        stats,
    }))
}

async fn export_csv(State(state): State<AppState>) -> Result<Response, ApiError> {
    let table = load_canonical(&state.db).await?;
    let body = export::to_csv(&table)?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"data_csv.csv\""),
        ],
        body,
    )
        .into_response())
}

async fn push(State(state): State<AppState>) -> Result<Json<LoadStats>, ApiError> {
    let table = load_canonical(&state.db).await?;
    let stats = export::bulk_load(&state.config.target, &table).await?;

    Ok(Json(stats))
}
