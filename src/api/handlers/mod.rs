use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::middleware::{etag, Actor, IfMatch};
use crate::db::Database;
use crate::designer::{
    ConcurrencyToken, Designer, DesignerCommit, DesignerOp, DesignerView, OpOutcome,
    PublishOutcome, RestoreOutcome,
};
use crate::error::PageError;
use crate::models::*;
use crate::tree::Assembly;

// ============================================================
// Error Handling
// ============================================================

/// A [`PageError`] on its way out as an HTTP response.
#[derive(Debug)]
pub struct AppError(pub PageError);

pub type AppResult<T> = Result<T, AppError>;

impl From<PageError> for AppError {
    fn from(err: PageError) -> Self {
        Self(err)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PageError::NotFound { .. } => StatusCode::NOT_FOUND,
            PageError::Invalid(_) => StatusCode::BAD_REQUEST,
            PageError::Locked(_) => StatusCode::LOCKED,
            PageError::Conflict(_) => StatusCode::CONFLICT,
            PageError::IntegrityViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PageError::Database(_) | PageError::Serialization(_) | PageError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        // Internal details stay in the log.
        let message = if status.is_server_error() {
            tracing::error!(error = %self.0, "Internal error");
            "Internal server error".to_string()
        } else {
            tracing::warn!(code = self.0.code(), error = %self.0, "Request rejected");
            self.0.to_string()
        };

        let body = ErrorBody {
            error: message,
            code: self.0.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn designer_for(db: Database, actor: &Actor) -> Designer {
    Designer::new(db.acting_as(actor.identity()))
}

/// A body sent with the page's next token in `ETag`.
type Tagged<T> = (StatusCode, [(header::HeaderName, String); 1], Json<T>);

fn tagged<T>(status: StatusCode, token: ConcurrencyToken, body: T) -> Tagged<T> {
    (status, [(header::ETAG, etag(token))], Json(body))
}

fn component_of(outcome: OpOutcome) -> AppResult<PageComponent> {
    match outcome {
        OpOutcome::Created { component }
        | OpOutcome::Updated { component }
        | OpOutcome::Moved { component } => Ok(component),
        OpOutcome::Deleted { .. } => {
            Err(PageError::Internal("expected a component outcome".to_string()).into())
        }
    }
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Pages
// ============================================================

pub async fn list_pages(State(db): State<Database>) -> AppResult<Json<Vec<Page>>> {
    Ok(Json(db.list_pages()?))
}

pub async fn get_page(State(db): State<Database>, Path(id): Path<Uuid>) -> AppResult<Json<Page>> {
    db.get_page(id)?
        .map(Json)
        .ok_or_else(|| PageError::not_found("page", id).into())
}

pub async fn create_page(
    State(db): State<Database>,
    actor: Actor,
    Json(input): Json<CreatePageInput>,
) -> AppResult<(StatusCode, Json<Page>)> {
    let page = db.acting_as(actor.identity()).create_page(input)?;
    Ok((StatusCode::CREATED, Json(page)))
}

pub async fn update_page(
    State(db): State<Database>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdatePageInput>,
) -> AppResult<Json<Page>> {
    Ok(Json(db.acting_as(actor.identity()).update_page(id, input)?))
}

pub async fn delete_page(
    State(db): State<Database>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    db.acting_as(actor.identity()).delete_page(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================
// Components
// ============================================================

pub async fn list_components(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<PageComponent>>> {
    Ok(Json(db.list_nodes(id)?))
}

pub async fn get_component_tree(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Assembly<PageComponent>>> {
    Ok(Json(db.get_tree(id)?))
}

pub async fn create_component(
    State(db): State<Database>,
    actor: Actor,
    IfMatch(token): IfMatch,
    Path(id): Path<Uuid>,
    Json(input): Json<CreateComponentInput>,
) -> AppResult<Tagged<PageComponent>> {
    let (next, outcome) = designer_for(db, &actor).apply_one(id, token, DesignerOp::Create(input))?;
    Ok(tagged(StatusCode::CREATED, next, component_of(outcome)?))
}

pub async fn get_component(
    State(db): State<Database>,
    Path((id, key)): Path<(Uuid, String)>,
) -> AppResult<Json<PageComponent>> {
    db.get_node(id, &key)?
        .map(Json)
        .ok_or_else(|| PageError::not_found("component", key).into())
}

pub async fn update_component(
    State(db): State<Database>,
    actor: Actor,
    IfMatch(token): IfMatch,
    Path((id, key)): Path<(Uuid, String)>,
    Json(changes): Json<UpdateComponentInput>,
) -> AppResult<Tagged<PageComponent>> {
    let op = DesignerOp::Update { key, changes };
    let (next, outcome) = designer_for(db, &actor).apply_one(id, token, op)?;
    Ok(tagged(StatusCode::OK, next, component_of(outcome)?))
}

pub async fn move_component(
    State(db): State<Database>,
    actor: Actor,
    IfMatch(token): IfMatch,
    Path((id, key)): Path<(Uuid, String)>,
    Json(input): Json<MoveComponentInput>,
) -> AppResult<Tagged<PageComponent>> {
    let op = DesignerOp::Move {
        key,
        parent_key: input.parent_key,
        position: input.position,
    };
    let (next, outcome) = designer_for(db, &actor).apply_one(id, token, op)?;
    Ok(tagged(StatusCode::OK, next, component_of(outcome)?))
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteComponentQuery {
    /// Soft-delete the whole subtree.
    #[serde(default)]
    pub cascade: bool,
    /// Physically remove the subtree. Implies `cascade`.
    #[serde(default)]
    pub hard: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeletedComponents {
    pub deleted: Vec<String>,
}

pub async fn delete_component(
    State(db): State<Database>,
    actor: Actor,
    IfMatch(token): IfMatch,
    Path((id, key)): Path<(Uuid, String)>,
    Query(query): Query<DeleteComponentQuery>,
) -> AppResult<Tagged<DeletedComponents>> {
    let designer = designer_for(db, &actor);
    let (next, deleted) = if query.hard {
        designer.purge_subtree(id, token, &key)?
    } else {
        let op = DesignerOp::Delete {
            key,
            cascade: query.cascade,
        };
        match designer.apply_one(id, token, op)? {
            (next, OpOutcome::Deleted { keys }) => (next, keys),
            _ => return Err(PageError::Internal("expected a delete outcome".to_string()).into()),
        }
    };
    Ok(tagged(StatusCode::OK, next, DeletedComponents { deleted }))
}

// ============================================================
// Designer
// ============================================================

pub async fn load_designer(
    State(db): State<Database>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Tagged<DesignerView>> {
    let view = designer_for(db, &actor).load(id)?;
    Ok(tagged(StatusCode::OK, view.token, view))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApplyOpsRequest {
    pub token: ConcurrencyToken,
    #[serde(default)]
    pub ops: Vec<DesignerOp>,
}

pub async fn apply_designer_ops(
    State(db): State<Database>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(request): Json<ApplyOpsRequest>,
) -> AppResult<Json<DesignerCommit>> {
    Ok(Json(designer_for(db, &actor).apply(id, request.token, request.ops)?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishRequest {
    pub token: ConcurrencyToken,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn publish_page(
    State(db): State<Database>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(request): Json<PublishRequest>,
) -> AppResult<Json<PublishOutcome>> {
    Ok(Json(designer_for(db, &actor).publish(id, request.token, request.notes)?))
}

// ============================================================
// Versions
// ============================================================

pub async fn list_versions(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<PageVersionSummary>>> {
    Ok(Json(db.list_version_summaries(id)?))
}

pub async fn create_version(
    State(db): State<Database>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(input): Json<CreateSnapshotInput>,
) -> AppResult<(StatusCode, Json<PageVersion>)> {
    let version = db.acting_as(actor.identity()).snapshot(id, input)?;
    Ok((StatusCode::CREATED, Json(version)))
}

pub async fn get_version(
    State(db): State<Database>,
    Path((id, number)): Path<(Uuid, i64)>,
) -> AppResult<Json<PageVersion>> {
    Ok(Json(db.get_version(id, number)?))
}

pub async fn restore_version(
    State(db): State<Database>,
    actor: Actor,
    IfMatch(token): IfMatch,
    Path((id, number)): Path<(Uuid, i64)>,
) -> AppResult<Tagged<RestoreOutcome>> {
    let outcome = designer_for(db, &actor).restore(id, token, number)?;
    Ok(tagged(StatusCode::OK, outcome.token, outcome))
}
