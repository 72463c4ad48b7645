// Client Net Worth - Web Server
// REST API with Axum: statements, snapshots and guarded ownership edits

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use chrono::NaiveDate;
use client_networth::{
    get_owners, open_database, AggregationEngine, AppConfig, ConcurrencyGuard, ItemRef, ItemSource,
    LockManager, LockOutcome, Owner, OwnerSet, OwnershipRecord, OwnershipValidator, SharedConnection,
    SnapshotError, SnapshotService, WriteError,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

const ENV_CONFIG: &str = "NETWORTH_CONFIG";

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: SharedConnection,
    guard: Arc<ConcurrencyGuard>,
}

impl AppState {
    fn snapshots(&self) -> SnapshotService {
        SnapshotService::with_database(self.db.clone())
    }

    fn owners(&self, client_id: &str) -> anyhow::Result<Vec<Owner>> {
        let conn = self
            .db
            .lock()
            .map_err(|_| anyhow::anyhow!("database mutex poisoned"))?;
        get_owners(&conn, client_id)
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    /// Failure that still carries a payload (busy lock, conflict details)
    fn rejected(data: T, message: String, code: &str) -> Self {
        Self {
            success: false,
            data: Some(data),
            error: Some(message),
            code: Some(code.to_string()),
        }
    }
}

fn failure(status: StatusCode, message: String, code: &str) -> Response {
    let body = ApiResponse::<()> {
        success: false,
        data: None,
        error: Some(message),
        code: Some(code.to_string()),
    };
    (status, Json(body)).into_response()
}

fn internal(context: &str, e: impl std::fmt::Display) -> Response {
    error!(error = %e, "{}", context);
    failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), "StorageError")
}

fn item_ref(source: &str, item_id: String) -> Result<ItemRef, Response> {
    source
        .parse::<ItemSource>()
        .map(|source| ItemRef::new(source, item_id))
        .map_err(|e| failure(StatusCode::BAD_REQUEST, e, "UnknownSource"))
}

fn write_error_response(e: WriteError) -> Response {
    match e {
        WriteError::Invalid(e) => failure(StatusCode::UNPROCESSABLE_ENTITY, e.to_string(), e.code()),
        WriteError::Locked { held_by, expires_at } => {
            let message = format!("being edited by {}", held_by);
            let body = ApiResponse::rejected(
                serde_json::json!({ "held_by": held_by, "expires_at": expires_at }),
                message,
                "Locked",
            );
            (StatusCode::LOCKED, Json(body)).into_response()
        }
        WriteError::Conflict(details) => {
            let message = format!(
                "changed by {} at {} since version {}",
                details.current.written_by, details.current.written_at, details.base_version
            );
            (
                StatusCode::CONFLICT,
                Json(ApiResponse::rejected(details, message, "Conflict")),
            )
                .into_response()
        }
        WriteError::ItemNotFound(key) => {
            failure(StatusCode::NOT_FOUND, format!("item not found: {}", key), "ItemNotFound")
        }
        WriteError::Storage(e) => internal("ownership write failed", e),
    }
}

fn snapshot_error_response(e: SnapshotError) -> Response {
    match e {
        SnapshotError::NotFound(id) => {
            failure(StatusCode::NOT_FOUND, format!("snapshot not found: {}", id), "NotFound")
        }
        other => internal("snapshot request failed", other),
    }
}

// ============================================================================
// Request / response bodies
// ============================================================================

#[derive(Deserialize)]
struct NetworthQuery {
    as_of: Option<NaiveDate>,
}

#[derive(Deserialize)]
struct CreateSnapshotRequest {
    created_by: String,
    label: Option<String>,
}

#[derive(Serialize)]
struct ValidationResponse {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    association_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Deserialize)]
struct LockRequest {
    holder: String,
    #[serde(default)]
    force: bool,
}

#[derive(Deserialize)]
struct ReleaseQuery {
    holder: String,
}

#[derive(Deserialize)]
struct OwnershipWriteRequest {
    ownership: OwnershipRecord,
    base_version: i64,
    writer: String,
    #[serde(default)]
    override_lock: bool,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/clients/:client_id/networth - Live statement
async fn get_networth(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Query(query): Query<NetworthQuery>,
) -> Response {
    let as_of = query.as_of.unwrap_or_else(|| chrono::Utc::now().date_naive());

    let owners = match state.owners(&client_id) {
        Ok(owners) => owners,
        Err(e) => return internal("loading owners failed", e),
    };

    match AggregationEngine::with_database(state.db.clone()).aggregate(&client_id, &owners, as_of) {
        Ok(matrix) => (StatusCode::OK, Json(ApiResponse::ok(matrix))).into_response(),
        Err(e) => internal("aggregation failed", e),
    }
}

/// POST /api/clients/:client_id/snapshots - Freeze the current statement
async fn create_snapshot(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Json(request): Json<CreateSnapshotRequest>,
) -> Response {
    let owners = match state.owners(&client_id) {
        Ok(owners) => owners,
        Err(e) => return internal("loading owners failed", e),
    };

    match state
        .snapshots()
        .create_snapshot(&client_id, &owners, &request.created_by, request.label.as_deref())
    {
        Ok(snapshot) => (StatusCode::CREATED, Json(ApiResponse::ok(snapshot))).into_response(),
        Err(e) => snapshot_error_response(e),
    }
}

/// GET /api/clients/:client_id/snapshots - Newest first
async fn list_snapshots(State(state): State<AppState>, Path(client_id): Path<String>) -> Response {
    match state.snapshots().list_snapshots(&client_id) {
        Ok(summaries) => (StatusCode::OK, Json(ApiResponse::ok(summaries))).into_response(),
        Err(e) => snapshot_error_response(e),
    }
}

/// GET /api/snapshots/:id
async fn get_snapshot(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.snapshots().get_snapshot(&id) {
        Ok(snapshot) => (StatusCode::OK, Json(ApiResponse::ok(snapshot))).into_response(),
        Err(e) => snapshot_error_response(e),
    }
}

/// POST /api/clients/:client_id/ownership/validate - Dry run, nothing is saved
async fn validate_ownership(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Json(record): Json<OwnershipRecord>,
) -> Response {
    let owners = match state.owners(&client_id) {
        Ok(owners) => OwnerSet::new(&owners),
        Err(e) => return internal("loading owners failed", e),
    };

    let verdict = match OwnershipValidator::new().validate(&record, owners.ids()) {
        Ok(ownership) => ValidationResponse {
            valid: true,
            association_type: Some(ownership.association_type().to_string()),
            code: None,
            message: None,
        },
        Err(e) => ValidationResponse {
            valid: false,
            association_type: None,
            code: Some(e.code().to_string()),
            message: Some(e.to_string()),
        },
    };

    (StatusCode::OK, Json(ApiResponse::ok(verdict))).into_response()
}

/// GET /api/items/:source/:item_id/version
async fn get_item_version(
    State(state): State<AppState>,
    Path((source, item_id)): Path<(String, String)>,
) -> Response {
    let item = match item_ref(&source, item_id) {
        Ok(item) => item,
        Err(response) => return response,
    };

    match state.guard.current_version(&item) {
        Ok(stamp) => (StatusCode::OK, Json(ApiResponse::ok(stamp))).into_response(),
        Err(e) => write_error_response(e),
    }
}

/// POST /api/items/:source/:item_id/lock - Edit start
async fn acquire_lock(
    State(state): State<AppState>,
    Path((source, item_id)): Path<(String, String)>,
    Json(request): Json<LockRequest>,
) -> Response {
    let item = match item_ref(&source, item_id) {
        Ok(item) => item,
        Err(response) => return response,
    };

    match state.guard.acquire_lock(&item, &request.holder, request.force) {
        Ok(LockOutcome::Acquired(lock)) => {
            (StatusCode::OK, Json(ApiResponse::ok(LockOutcome::Acquired(lock)))).into_response()
        }
        Ok(LockOutcome::Busy {
            held_by,
            expires_at,
            retry_after_secs,
        }) => {
            let message = format!("being edited by {}, retry in {} s", held_by, retry_after_secs);
            let outcome = LockOutcome::Busy {
                held_by,
                expires_at,
                retry_after_secs,
            };
            (StatusCode::LOCKED, Json(ApiResponse::rejected(outcome, message, "Locked"))).into_response()
        }
        Err(e) => write_error_response(e),
    }
}

/// DELETE /api/items/:source/:item_id/lock?holder=...
async fn release_lock(
    State(state): State<AppState>,
    Path((source, item_id)): Path<(String, String)>,
    Query(query): Query<ReleaseQuery>,
) -> Response {
    let item = match item_ref(&source, item_id) {
        Ok(item) => item,
        Err(response) => return response,
    };

    let released = state.guard.locks().release_held(&item, &query.holder);
    (
        StatusCode::OK,
        Json(ApiResponse::ok(serde_json::json!({ "released": released }))),
    )
        .into_response()
}

/// PUT /api/items/:source/:item_id/ownership - Guarded save
async fn write_ownership(
    State(state): State<AppState>,
    Path((source, item_id)): Path<(String, String)>,
    Json(request): Json<OwnershipWriteRequest>,
) -> Response {
    let item = match item_ref(&source, item_id) {
        Ok(item) => item,
        Err(response) => return response,
    };

    match state.guard.write_ownership(
        &item,
        &request.ownership,
        request.base_version,
        &request.writer,
        request.override_lock,
    ) {
        Ok(stamp) => (StatusCode::OK, Json(ApiResponse::ok(stamp))).into_response(),
        Err(e) => write_error_response(e),
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var(ENV_CONFIG)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("networth.toml"));
    let config = AppConfig::load(Some(&config_path))?;
    client_networth::init_logging(&config.logging)?;

    println!("🌐 Client Net Worth - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let conn = open_database(&config.database_path)?;
    info!(path = %config.database_path.display(), "database opened");

    // Create shared state
    let db: SharedConnection = Arc::new(Mutex::new(conn));
    let locks = Arc::new(LockManager::new(config.lock_ttl()));
    let state = AppState {
        db: db.clone(),
        guard: Arc::new(ConcurrencyGuard::new(db, locks)),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/clients/:client_id/networth", get(get_networth))
        .route(
            "/clients/:client_id/snapshots",
            post(create_snapshot).get(list_snapshots),
        )
        .route("/clients/:client_id/ownership/validate", post(validate_ownership))
        .route("/snapshots/:id", get(get_snapshot))
        .route("/items/:source/:item_id/version", get(get_item_version))
        .route(
            "/items/:source/:item_id/lock",
            post(acquire_lock).delete(release_lock),
        )
        .route("/items/:source/:item_id/ownership", put(write_ownership))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()));

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;

    println!("\n🚀 Server running on http://{}", config.server.bind_addr);
    println!("   API: http://{}/api/health", config.server.bind_addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await?;
    Ok(())
}
