use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::allocation::{AllocationKey, AllocationTable, UnitAllocation};
use crate::calculations::{BuildingSummary, SpaceAllocation};
use crate::catalog::{
    NewNonRentableType, NewUnitType, NonRentableAllocation, NonRentableType, Product, UnitType,
};
use crate::floor::{Floor, FloorPatch, FloorPlateTemplate, FloorType, NewFloorPlateTemplate};
use crate::metadata::{FarMetrics, MetadataUpdate, ProjectMetadata};
use crate::notify::{Notification, NotificationLog};
use crate::project::{Project, ProjectError, ProjectSnapshot};
use crate::reconcile::ReconcileReport;
use crate::remote::RecordId;
use crate::store::{AllocationChange, AllocationError};

#[derive(Clone)]
pub struct AppState {
    project: Arc<Project>,
    notifications: Arc<NotificationLog>,
}

impl AppState {
    /// `notifications` should be the sink the project was loaded with.
    pub fn new(project: Arc<Project>, notifications: Arc<NotificationLog>) -> Self {
        Self {
            project,
            notifications,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Conflict(String),
    Invalid(String),
    Upstream(String),
}

impl From<ProjectError> for ApiError {
    fn from(err: ProjectError) -> Self {
        let message = err.to_string();
        match err {
            ProjectError::NotFound { .. }
            | ProjectError::Allocation(AllocationError::UnknownAllocation(_)) => {
                ApiError::NotFound(message)
            }
            ProjectError::Validation(_) => ApiError::Invalid(message),
            ProjectError::Closed | ProjectError::Allocation(AllocationError::Closed) => {
                ApiError::Conflict(message)
            }
            ProjectError::Remote(_) | ProjectError::Transform(_) | ProjectError::Allocation(_) => {
                ApiError::Upstream(message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, "conflict", message),
            ApiError::Invalid(message) => (StatusCode::BAD_REQUEST, "invalid_request", message),
            ApiError::Upstream(message) => (StatusCode::BAD_GATEWAY, "upstream_error", message),
        };
        (status, Json(ErrorBody { error, message })).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/project", get(get_project))
        .route("/metadata", get(get_metadata).put(update_metadata))
        .route("/summary", get(get_summary))
        .route("/far", get(get_far))
        .route("/space", get(get_space))
        .route("/floors", get(list_floors).post(create_floor))
        .route("/floors/:id", put(update_floor).delete(delete_floor))
        .route("/templates", get(list_templates).post(create_template))
        .route("/templates/:id", put(update_template).delete(delete_template))
        .route("/products", get(list_products).post(create_product))
        .route("/products/:id", put(rename_product).delete(delete_product))
        .route("/products/:id/unit_types", post(create_unit_type))
        .route("/unit_types/:id", put(update_unit_type).delete(delete_unit_type))
        .route("/allocations", get(list_allocations).put(save_allocations))
        .route(
            "/allocations/:floor_id/:unit_type_id",
            get(get_allocation).put(update_allocation),
        )
        .route(
            "/non_rentable_types",
            get(list_non_rentable_types).post(create_non_rentable_type),
        )
        .route(
            "/non_rentable_types/:id",
            put(update_non_rentable_type).delete(delete_non_rentable_type),
        )
        .route(
            "/non_rentable_allocations",
            get(list_non_rentable_allocations).put(set_non_rentable_allocation),
        )
        .route("/reconcile", post(reconcile))
        .route("/notifications", get(drain_notifications))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn get_project(State(state): State<AppState>) -> Json<ProjectSnapshot> {
    Json(state.project.snapshot())
}

async fn get_metadata(State(state): State<AppState>) -> Json<ProjectMetadata> {
    Json(state.project.metadata())
}

#[derive(Debug, Deserialize)]
struct MetadataPayload {
    section: String,
    field: String,
    value: serde_json::Value,
}

async fn update_metadata(
    State(state): State<AppState>,
    Json(payload): Json<MetadataPayload>,
) -> ApiResult<ProjectMetadata> {
    let raw = match &payload.value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    let update = MetadataUpdate::parse(&payload.section, &payload.field, &raw)
        .map_err(|err| ApiError::Invalid(err.to_string()))?;
    Ok(Json(state.project.update_metadata(update).await?))
}

async fn get_summary(State(state): State<AppState>) -> Json<BuildingSummary> {
    Json(state.project.summary())
}

async fn get_far(State(state): State<AppState>) -> Json<FarMetrics> {
    Json(state.project.far_metrics())
}

async fn get_space(State(state): State<AppState>) -> Json<SpaceAllocation> {
    Json(state.project.space_allocation())
}

async fn list_floors(State(state): State<AppState>) -> Json<Vec<Floor>> {
    Json(state.project.floors())
}

#[derive(Debug, Deserialize)]
struct FloorPayload {
    label: String,
    #[serde(default)]
    template_id: Option<RecordId>,
    #[serde(default)]
    floor_type: FloorType,
}

async fn create_floor(
    State(state): State<AppState>,
    Json(payload): Json<FloorPayload>,
) -> Result<(StatusCode, Json<Floor>), ApiError> {
    let floor = state
        .project
        .add_floor(&payload.label, payload.template_id, payload.floor_type)
        .await?;
    Ok((StatusCode::CREATED, Json(floor)))
}

async fn update_floor(
    State(state): State<AppState>,
    Path(id): Path<RecordId>,
    Json(patch): Json<FloorPatch>,
) -> ApiResult<Floor> {
    Ok(Json(state.project.update_floor(id, patch).await?))
}

async fn delete_floor(
    State(state): State<AppState>,
    Path(id): Path<RecordId>,
) -> Result<StatusCode, ApiError> {
    state.project.delete_floor(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_templates(State(state): State<AppState>) -> Json<Vec<FloorPlateTemplate>> {
    Json(state.project.templates())
}

async fn create_template(
    State(state): State<AppState>,
    Json(template): Json<NewFloorPlateTemplate>,
) -> Result<(StatusCode, Json<FloorPlateTemplate>), ApiError> {
    let template = state.project.add_template(template).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

async fn update_template(
    State(state): State<AppState>,
    Path(id): Path<RecordId>,
    Json(template): Json<NewFloorPlateTemplate>,
) -> ApiResult<FloorPlateTemplate> {
    Ok(Json(state.project.update_template(id, template).await?))
}

async fn delete_template(
    State(state): State<AppState>,
    Path(id): Path<RecordId>,
) -> Result<StatusCode, ApiError> {
    state.project.delete_template(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_products(State(state): State<AppState>) -> Json<Vec<Product>> {
    Json(state.project.products())
}

#[derive(Debug, Deserialize)]
struct ProductPayload {
    name: String,
}

async fn create_product(
    State(state): State<AppState>,
    Json(payload): Json<ProductPayload>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    let product = state.project.add_product(&payload.name).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

async fn rename_product(
    State(state): State<AppState>,
    Path(id): Path<RecordId>,
    Json(payload): Json<ProductPayload>,
) -> ApiResult<Product> {
    Ok(Json(state.project.rename_product(id, &payload.name).await?))
}

async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<RecordId>,
) -> Result<StatusCode, ApiError> {
    state.project.delete_product(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_unit_type(
    State(state): State<AppState>,
    Path(product_id): Path<RecordId>,
    Json(unit_type): Json<NewUnitType>,
) -> Result<(StatusCode, Json<UnitType>), ApiError> {
    let unit_type = state.project.add_unit_type(product_id, unit_type).await?;
    Ok((StatusCode::CREATED, Json(unit_type)))
}

async fn update_unit_type(
    State(state): State<AppState>,
    Path(id): Path<RecordId>,
    Json(unit_type): Json<NewUnitType>,
) -> ApiResult<UnitType> {
    Ok(Json(state.project.update_unit_type(id, unit_type).await?))
}

async fn delete_unit_type(
    State(state): State<AppState>,
    Path(id): Path<RecordId>,
) -> Result<StatusCode, ApiError> {
    state.project.delete_unit_type(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_allocations(State(state): State<AppState>) -> Json<Vec<UnitAllocation>> {
    Json(state.project.allocation_table().allocations())
}

#[derive(Debug, Serialize, Deserialize)]
struct QuantityPayload {
    quantity: u32,
}

async fn get_allocation(
    State(state): State<AppState>,
    Path((floor_id, unit_type_id)): Path<(RecordId, RecordId)>,
) -> Json<QuantityPayload> {
    Json(QuantityPayload {
        quantity: state.project.unit_allocation(floor_id, unit_type_id),
    })
}

async fn update_allocation(
    State(state): State<AppState>,
    Path((floor_id, unit_type_id)): Path<(RecordId, RecordId)>,
    Json(payload): Json<QuantityPayload>,
) -> ApiResult<AllocationChange> {
    Ok(Json(
        state
            .project
            .update_unit_allocation(floor_id, unit_type_id, payload.quantity)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
struct BulkEntry {
    floor_id: RecordId,
    unit_type_id: RecordId,
    quantity: u32,
}

#[derive(Debug, Serialize)]
struct BulkFailure {
    key: AllocationKey,
    message: String,
}

#[derive(Debug, Serialize)]
struct BulkResponse {
    applied: Vec<AllocationChange>,
    failures: Vec<BulkFailure>,
    allocations: Vec<UnitAllocation>,
}

async fn save_allocations(
    State(state): State<AppState>,
    Json(entries): Json<Vec<BulkEntry>>,
) -> (StatusCode, Json<BulkResponse>) {
    let desired: Vec<(AllocationKey, u32)> = entries
        .into_iter()
        .map(|e| (AllocationKey::new(e.floor_id, e.unit_type_id), e.quantity))
        .collect();
    let report = state.project.save_all_allocations(desired).await;
    let status = if report.is_complete() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    let table: AllocationTable = state.project.allocation_table();
    let body = BulkResponse {
        applied: report.applied,
        failures: report
            .failures
            .into_iter()
            .map(|(key, err)| BulkFailure {
                key,
                message: err.to_string(),
            })
            .collect(),
        allocations: table.allocations(),
    };
    (status, Json(body))
}

async fn list_non_rentable_types(State(state): State<AppState>) -> Json<Vec<NonRentableType>> {
    Json(state.project.non_rentable_types())
}

async fn create_non_rentable_type(
    State(state): State<AppState>,
    Json(kind): Json<NewNonRentableType>,
) -> Result<(StatusCode, Json<NonRentableType>), ApiError> {
    let kind = state.project.add_non_rentable_type(kind).await?;
    Ok((StatusCode::CREATED, Json(kind)))
}

async fn update_non_rentable_type(
    State(state): State<AppState>,
    Path(id): Path<RecordId>,
    Json(kind): Json<NewNonRentableType>,
) -> ApiResult<NonRentableType> {
    Ok(Json(state.project.update_non_rentable_type(id, kind).await?))
}

async fn delete_non_rentable_type(
    State(state): State<AppState>,
    Path(id): Path<RecordId>,
) -> Result<StatusCode, ApiError> {
    state.project.delete_non_rentable_type(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_non_rentable_allocations(
    State(state): State<AppState>,
) -> Json<Vec<NonRentableAllocation>> {
    Json(state.project.non_rentable_allocations())
}

#[derive(Debug, Deserialize)]
struct NonRentablePayload {
    floor_id: RecordId,
    non_rentable_type_id: RecordId,
    square_footage: f64,
}

async fn set_non_rentable_allocation(
    State(state): State<AppState>,
    Json(payload): Json<NonRentablePayload>,
) -> ApiResult<NonRentableAllocation> {
    Ok(Json(
        state
            .project
            .set_non_rentable_allocation(
                payload.floor_id,
                payload.non_rentable_type_id,
                payload.square_footage,
            )
            .await?,
    ))
}

async fn reconcile(State(state): State<AppState>) -> ApiResult<ReconcileReport> {
    state
        .project
        .reconcile_non_rentable()
        .await
        .map(Json)
        .ok_or_else(|| ApiError::Conflict("a reconciliation pass is already running".into()))
}

async fn drain_notifications(State(state): State<AppState>) -> Json<Vec<Notification>> {
    Json(state.notifications.drain())
}
