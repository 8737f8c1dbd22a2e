//! Job API Handlers
//!
//! HTTP endpoints for listing, inspecting, following and deleting jobs.

use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::sync::Arc;

use volley_core::dto::job::{JobListing, JobQuery, ListQuery};

use crate::api::error::ApiResult;
use crate::context::AppContext;
use crate::service::job::JobView;
use crate::service::job_service;

/// GET /jobs?detail=
pub async fn list_jobs(
    State(ctx): State<Arc<AppContext>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<JobListing>> {
    let Query(query) = query?;
    tracing::debug!("Listing jobs (detail: {})", query.detail);

    let jobs = job_service::list(ctx.store.as_ref(), query.detail).await?;
    Ok(Json(jobs))
}

/// GET /jobs/{jid}?outputs=&follow=
///
/// With `follow`, the response is a stream of newline-delimited JSON events:
/// the job snapshot, then one `{host: record}` object per new record, until
/// the job finishes.
pub async fn get_job(
    State(ctx): State<Arc<AppContext>>,
    Path(jid): Path<String>,
    query: Result<Query<JobQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query?;
    tracing::debug!("Getting job: {}", jid);

    let view = job_service::get(ctx.store.clone(), &jid, query.outputs, query.follow).await?;
    match view {
        JobView::Context(context) => Ok(Json(context).into_response()),
        JobView::Follow(follower) => {
            tracing::info!("Following job {}", jid);
            let lines = follower.into_stream().map(|event| {
                serde_json::to_vec(&event).map(|mut line| {
                    line.push(b'\n');
                    line
                })
            });
            Ok((
                [(header::CONTENT_TYPE, "application/x-ndjson")],
                Body::from_stream(lines),
            )
                .into_response())
        }
    }
}

/// DELETE /jobs/{jid}
pub async fn delete_job(
    State(ctx): State<Arc<AppContext>>,
    Path(jid): Path<String>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting job: {}", jid);

    job_service::delete(ctx.store.as_ref(), &jid).await?;
    Ok(StatusCode::NO_CONTENT)
}
