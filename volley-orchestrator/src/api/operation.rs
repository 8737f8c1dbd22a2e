//! Operation API Handlers
//!
//! `GET` runs an operation in-line against a single `target`; `POST` launches
//! a background job over a list of `targets` and answers `201 {"jid": ...}`.

use axum::{
    Json,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use volley_core::Error;
use volley_core::dto::job::LaunchResponse;
use volley_core::dto::operation::{
    DeployRequest, ExecuteQuery, ExecuteRequest, HostQuery, ServiceQuery, ServiceRequest,
    TargetQuery, TargetsRequest, TaskPluginInfo, TaskRequest,
};

use crate::api::error::{ApiResult, ERR_NO_MATCH};
use crate::context::AppContext;
use crate::runner::{
    DeployRunner, Dispatch, ExecuteRunner, FacterRunner, PingRunner, ServiceRunner, TargetRunner,
    TaskRunner,
};

type Ctx = State<Arc<AppContext>>;

fn respond(dispatch: Dispatch) -> ApiResult<Response> {
    match dispatch {
        Dispatch::Completed(Some(event)) => {
            Ok((StatusCode::OK, Json(event.to_json())).into_response())
        }
        Dispatch::Completed(None) => Err(Error::NoMatch(ERR_NO_MATCH.to_string()).into()),
        Dispatch::Launched(jid) => {
            tracing::info!("Launched job {}", jid);
            Ok((StatusCode::CREATED, Json(LaunchResponse { jid })).into_response())
        }
    }
}

/// The single host of a synchronous request
fn single(target: Option<String>) -> Vec<String> {
    target.into_iter().collect()
}

// =============================================================================
// Target
// =============================================================================

/// GET /target?pattern=
pub async fn get_target(
    State(ctx): Ctx,
    query: Result<Query<TargetQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<String>>> {
    let Query(query) = query?;
    let hosts = TargetRunner::new(ctx).handle(query.pattern, false).await?;
    Ok(Json(hosts))
}

// =============================================================================
// Ping / Facter
// =============================================================================

/// GET /ping?target=
pub async fn get_ping(
    State(ctx): Ctx,
    query: Result<Query<HostQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query?;
    respond(PingRunner::new(ctx).handle(single(query.target), false).await?)
}

/// POST /ping
pub async fn post_ping(
    State(ctx): Ctx,
    body: Result<Json<TargetsRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(req) = body?;
    respond(PingRunner::new(ctx).handle(req.targets, true).await?)
}

/// GET /facter?target=
pub async fn get_facter(
    State(ctx): Ctx,
    query: Result<Query<HostQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query?;
    respond(FacterRunner::new(ctx).handle(single(query.target), false).await?)
}

/// POST /facter
pub async fn post_facter(
    State(ctx): Ctx,
    body: Result<Json<TargetsRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(req) = body?;
    respond(FacterRunner::new(ctx).handle(req.targets, true).await?)
}

// =============================================================================
// Service / Execute
// =============================================================================

/// GET /service?target=&name=&state=&graceful=
pub async fn get_service(
    State(ctx): Ctx,
    query: Result<Query<ServiceQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query?;
    let dispatch = ServiceRunner::new(ctx)
        .handle(
            single(query.target),
            query.name,
            query.state,
            query.graceful,
            false,
        )
        .await?;
    respond(dispatch)
}

/// POST /service
pub async fn post_service(
    State(ctx): Ctx,
    body: Result<Json<ServiceRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(req) = body?;
    let dispatch = ServiceRunner::new(ctx)
        .handle(req.targets, req.name, req.state, req.graceful, true)
        .await?;
    respond(dispatch)
}

/// GET /execute?target=&cmd=
pub async fn get_execute(
    State(ctx): Ctx,
    query: Result<Query<ExecuteQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query?;
    respond(
        ExecuteRunner::new(ctx)
            .handle(single(query.target), query.cmd, false)
            .await?,
    )
}

/// POST /execute
pub async fn post_execute(
    State(ctx): Ctx,
    body: Result<Json<ExecuteRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(req) = body?;
    respond(ExecuteRunner::new(ctx).handle(req.targets, req.cmd, true).await?)
}

// =============================================================================
// Deploy / Task
// =============================================================================

/// POST /deploy
pub async fn post_deploy(
    State(ctx): Ctx,
    body: Result<Json<DeployRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(req) = body?;
    tracing::info!("Deploying role {} on {} host(s)", req.role, req.targets.len());

    let dispatch = DeployRunner::new(ctx)
        .handle(req.targets, req.role, req.extra_vars, req.partial, true)
        .await?;
    respond(dispatch)
}

/// GET /task
pub async fn list_tasks(State(ctx): Ctx) -> Json<Vec<TaskPluginInfo>> {
    Json(TaskRunner::new(ctx).query())
}

/// POST /task
pub async fn post_task(
    State(ctx): Ctx,
    body: Result<Json<TaskRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(req) = body?;
    let dispatch = TaskRunner::new(ctx)
        .handle(req.targets, req.taskname, req.tasktype, req.taskopts, true)
        .await?;
    respond(dispatch)
}
