// Parking Registry - Web Server
// REST API with Axum over the shared SQLite connection

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use parking_registry::{
    create_customer, create_vehicle, delete_customer, delete_vehicle, find_vehicle_by_plate,
    generate_run, get_customer, get_vehicle, import_csv, init_logging, intervals_for_vehicle,
    list_customers, list_invoices, list_vehicles, open_database, update_customer, update_vehicle,
    AppConfig, AssociationInterval, BillingError, BillingRun, CancelToken, Customer,
    CustomerInput, ImportReport, Invoice, RegistryError, SqliteBillingStore, Vehicle,
    VehicleInput,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    billing_timeout: Option<Duration>,
}

impl AppState {
    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.db
            .lock()
            .map_err(|_| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "database lock poisoned"))
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}

// ============================================================================
// Errors → HTTP
// ============================================================================

/// Error body data for a billing run that stopped part way.
#[derive(Debug, Serialize)]
struct BillingFailure {
    created: Vec<Invoice>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    billing: Option<BillingFailure>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            billing: None,
        }
    }

    fn not_found(what: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{what} not found"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, "{}", self.message);
        }
        let body = ApiResponse {
            success: false,
            data: self.billing,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

fn registry_status(err: &RegistryError) -> StatusCode {
    match err {
        RegistryError::InvalidPlate(_) | RegistryError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        RegistryError::CustomerNotFound(_) | RegistryError::VehicleNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        RegistryError::DuplicatePlate(_) | RegistryError::CustomerHasVehicles(_) => {
            StatusCode::CONFLICT
        }
        RegistryError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn billing_status(err: &BillingError) -> StatusCode {
    match err {
        BillingError::InvalidCompetence { .. } => StatusCode::BAD_REQUEST,
        BillingError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        BillingError::AmountOverflow { .. }
        | BillingError::Snapshot(_)
        | BillingError::Persistence { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        Self::new(registry_status(&err), err.to_string())
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        let mut api = Self::new(billing_status(&err), err.to_string());
        // Committed invoices stay committed; the caller needs them to retry the rest
        if let BillingError::Persistence { .. } | BillingError::Cancelled { .. } = err {
            api.billing = Some(BillingFailure {
                created: err.created().to_vec(),
            });
        }
        api
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("database error: {err}"))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
    }
}

// ============================================================================
// API Handlers
// ============================================================================

#[derive(Deserialize)]
struct VehicleFilter {
    customer_id: Option<String>,
}

#[derive(Deserialize)]
struct InvoiceFilter {
    competence: Option<String>,
}

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/customers
async fn get_customers(State(state): State<AppState>) -> ApiResult<Vec<Customer>> {
    let conn = state.conn()?;
    ok(list_customers(&conn, false)?)
}

/// POST /api/customers
async fn post_customer(
    State(state): State<AppState>,
    Json(input): Json<CustomerInput>,
) -> Result<(StatusCode, Json<ApiResponse<Customer>>), ApiError> {
    let conn = state.conn()?;
    let customer = create_customer(&conn, &input)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(customer))))
}

/// GET /api/customers/:id
async fn get_customer_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Customer> {
    let conn = state.conn()?;
    match get_customer(&conn, &id)? {
        Some(customer) => ok(customer),
        None => Err(ApiError::not_found("customer")),
    }
}

/// PUT /api/customers/:id
async fn put_customer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<CustomerInput>,
) -> ApiResult<Customer> {
    let conn = state.conn()?;
    ok(update_customer(&conn, &id, &input)?)
}

/// DELETE /api/customers/:id
async fn remove_customer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<bool> {
    let conn = state.conn()?;
    if delete_customer(&conn, &id)? {
        ok(true)
    } else {
        Err(ApiError::not_found("customer"))
    }
}

/// GET /api/vehicles?customer_id=
async fn get_vehicles(
    State(state): State<AppState>,
    Query(filter): Query<VehicleFilter>,
) -> ApiResult<Vec<Vehicle>> {
    let conn = state.conn()?;
    ok(list_vehicles(&conn, filter.customer_id.as_deref())?)
}

/// POST /api/vehicles
async fn post_vehicle(
    State(state): State<AppState>,
    Json(input): Json<VehicleInput>,
) -> Result<(StatusCode, Json<ApiResponse<Vehicle>>), ApiError> {
    let conn = state.conn()?;
    let vehicle = create_vehicle(&conn, &input)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(vehicle))))
}

/// GET /api/vehicles/:id
async fn get_vehicle_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vehicle> {
    let conn = state.conn()?;
    match get_vehicle(&conn, &id)? {
        Some(vehicle) => ok(vehicle),
        None => Err(ApiError::not_found("vehicle")),
    }
}

/// PUT /api/vehicles/:id - an owner change is recorded in the history
async fn put_vehicle(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<VehicleInput>,
) -> ApiResult<Vehicle> {
    let conn = state.conn()?;
    ok(update_vehicle(&conn, &id, &input)?)
}

/// DELETE /api/vehicles/:id
async fn remove_vehicle(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<bool> {
    let conn = state.conn()?;
    if delete_vehicle(&conn, &id)? {
        ok(true)
    } else {
        Err(ApiError::not_found("vehicle"))
    }
}

/// GET /api/vehicles/:id/history
///
/// Deleted vehicles keep their history, so this only 404s when nothing is known.
async fn get_vehicle_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<AssociationInterval>> {
    let conn = state.conn()?;
    let intervals = intervals_for_vehicle(&conn, &id)?;
    if intervals.is_empty() && get_vehicle(&conn, &id)?.is_none() {
        return Err(ApiError::not_found("vehicle"));
    }
    ok(intervals)
}

/// GET /api/vehicles/by-plate/:plate
async fn get_vehicle_by_plate(
    State(state): State<AppState>,
    Path(plate): Path<String>,
) -> ApiResult<Vehicle> {
    let conn = state.conn()?;

    // Decode URL-encoded plate ("ABC%201234")
    let decoded = urlencoding::decode(&plate)
        .map(|p| p.into_owned())
        .unwrap_or(plate);

    match find_vehicle_by_plate(&conn, &decoded)? {
        Some(vehicle) => ok(vehicle),
        None => Err(ApiError::not_found("vehicle")),
    }
}

/// POST /api/import/csv - raw CSV body
async fn post_import_csv(State(state): State<AppState>, body: Bytes) -> ApiResult<ImportReport> {
    if body.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "empty CSV body"));
    }
    let conn = state.conn()?;
    ok(import_csv(&conn, &body)?)
}

/// POST /api/billing/:competence - generate invoices for one month
async fn post_billing(
    State(state): State<AppState>,
    Path(competence): Path<String>,
) -> ApiResult<BillingRun> {
    let cancel = state
        .billing_timeout
        .map(CancelToken::with_timeout)
        .unwrap_or_default();

    let conn = state.conn()?;
    let store = SqliteBillingStore::new(&conn);
    ok(generate_run(&store, &competence, &cancel)?)
}

/// GET /api/invoices?competence=
async fn get_invoices(
    State(state): State<AppState>,
    Query(filter): Query<InvoiceFilter>,
) -> ApiResult<Vec<Invoice>> {
    let conn = state.conn()?;
    ok(list_invoices(&conn, filter.competence.as_deref())?)
}

fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/customers", get(get_customers).post(post_customer))
        .route(
            "/customers/:id",
            get(get_customer_by_id).put(put_customer).delete(remove_customer),
        )
        .route("/vehicles", get(get_vehicles).post(post_vehicle))
        .route("/vehicles/by-plate/:plate", get(get_vehicle_by_plate))
        .route(
            "/vehicles/:id",
            get(get_vehicle_by_id).put(put_vehicle).delete(remove_vehicle),
        )
        .route("/vehicles/:id/history", get(get_vehicle_history))
        .route("/import/csv", post(post_import_csv))
        .route("/billing/:competence", post(post_billing))
        .route("/invoices", get(get_invoices))
        .with_state(state)
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    println!("🅿️  Parking Registry - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = AppConfig::from_env()?;
    let conn = open_database(&config.database_path)?;
    tracing::info!(path = %config.database_path.display(), "database opened");

    // Create shared state
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        billing_timeout: config.billing_timeout,
    };

    let app = Router::new().nest("/api", api_routes(state)).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    println!("\n🚀 Server running on http://{}", config.bind_addr);
    println!("   API: http://{}/api/health", config.bind_addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await?;
    Ok(())
}
