use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::credits::{CreditPricing, TransactionType};
use crate::domain::workflow::{
    AgentExecution, AgentExecutionRequest, ExecuteResponse, ExecutionStatusEvent, WorkflowType,
};
use crate::error::{ApiError, ApiResult};
use crate::services::cache::keys;
use crate::services::store::{AgentStore, EXECUTION_HISTORY_LIMIT};

/// Delay between status polls on the execution stream
const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(1000);
/// Consecutive failed polls after which the stream gives up
const MAX_STREAM_POLL_FAILURES: u32 = 5;

/// Deduct credits and start a workflow in the background
pub async fn execute_workflow(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Json(req): Json<AgentExecutionRequest>,
) -> ApiResult<(StatusCode, Json<ExecuteResponse>)> {
    let workflow: WorkflowType = req.workflow_type.parse().map_err(ApiError::bad_request)?;
    let cost = workflow.credit_cost();

    let tenant_id = state.store.active_tenant(auth.user_id).await?;
    state
        .store
        .deduct_credits(auth.user_id, cost, &format!("AI Agent Execution: {}", workflow))
        .await?;

    let execution = AgentExecution::pending(auth.user_id, tenant_id, workflow, req.input_data);
    if let Err(e) = state.store.insert_execution(&execution).await {
        let description = format!("Refund: AI Agent Execution: {}", workflow);
        if let Err(refund) = state
            .store
            .add_credits(auth.user_id, cost, TransactionType::Refund, &description)
            .await
        {
            tracing::error!(error = %refund, user_id = %auth.user_id, credits = cost, "Refund after failed insert failed");
        }
        return Err(ApiError::Internal(e));
    }

    tracing::info!(
        execution_id = %execution.id,
        user_id = %auth.user_id,
        workflow = %workflow,
        credits = cost,
        "Workflow accepted"
    );

    let response = ExecuteResponse {
        execution_id: execution.id,
        status: execution.status,
        message: "Workflow execution started".to_string(),
        credits_deducted: cost,
    };
    state.runner.spawn(execution);

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Most recent executions of the current user
pub async fn list_executions(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
) -> ApiResult<Json<Value>> {
    let executions = state
        .store
        .list_executions(auth.user_id, EXECUTION_HISTORY_LIMIT)
        .await?;

    Ok(Json(json!({ "executions": executions })))
}

/// One execution, served from cache once it has finished
pub async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path(execution_id): Path<Uuid>,
    auth: RequireAuth,
) -> ApiResult<Json<AgentExecution>> {
    if let Some(cache) = &state.cache {
        if let Some(cached) = cache
            .get::<AgentExecution>(&keys::execution(execution_id))
            .await
            .filter(|e| e.user_id == auth.user_id)
        {
            return Ok(Json(cached));
        }
    }

    let execution = state
        .store
        .get_execution(execution_id, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Execution not found"))?;

    Ok(Json(execution))
}

/// Server-sent status events until the execution finishes
pub async fn stream_execution(
    State(state): State<Arc<AppState>>,
    Path(execution_id): Path<Uuid>,
    auth: RequireAuth,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let user_id = auth.user_id;

    // Reject unknown or foreign executions before opening the stream
    state
        .store
        .get_execution(execution_id, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Execution not found"))?;

    let store = state.store.clone();
    let stream = stream::unfold(
        (store, true, false, 0u32),
        move |(store, first, done, failures): (Arc<dyn AgentStore>, bool, bool, u32)| async move {
            if done {
                return None;
            }
            if !first {
                tokio::time::sleep(STREAM_POLL_INTERVAL).await;
            }

            let polled = store.get_execution(execution_id, user_id).await;
            if let Err(e) = &polled {
                tracing::warn!(error = %e, %execution_id, failures, "Execution stream poll failed");
            }
            let (event, failures, finished) = status_event(polled, failures);
            Some((Ok(event), (store, false, finished, failures)))
        },
    );

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

/// Event for one status poll, the updated consecutive-failure count and
/// whether the stream ends after it.
fn status_event(polled: anyhow::Result<Option<AgentExecution>>, failures: u32) -> (Event, u32, bool) {
    match polled {
        Ok(Some(execution)) => {
            let status = ExecutionStatusEvent::from(&execution);
            let event = Event::default()
                .event("status")
                .data(serde_json::to_string(&status).unwrap_or_default());
            (event, 0, status.status.is_terminal())
        }
        Ok(None) => (Event::default().event("error").data("Execution not found"), 0, true),
        Err(_) if failures + 1 >= MAX_STREAM_POLL_FAILURES => (
            Event::default().event("error").data("Execution status unavailable"),
            failures + 1,
            true,
        ),
        Err(_) => (Event::default().event("heartbeat").data("{}"), failures + 1, false),
    }
}

/// Public credit pricing
pub async fn get_pricing() -> Json<CreditPricing> {
    Json(CreditPricing::current())
}
