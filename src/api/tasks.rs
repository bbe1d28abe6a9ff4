//! Task execution and cancellation endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use uuid::Uuid;

use super::types::{CancelResponse, TaskRequest, TaskResponse};
use super::AppState;
use crate::orchestrator::TaskOutcome;
use crate::report::ExecutionReport;
use crate::supervisor::{CancelOutcome, DeadlineOutcome, TaskStatus};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/execute", post(execute_task))
        .route("/cancel/:task_id", post(cancel_task))
}

/// Execute a browser automation task.
async fn execute_task(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TaskRequest>,
) -> Response {
    if let Err(message) = request.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "detail": message })),
        )
            .into_response();
    }

    Json(run_task_request(&state, request).await).into_response()
}

/// Run a validated task request to a response. The overall timeout is
/// enforced here by racing the orchestrated execution against the deadline;
/// the loser's cleanup runs asynchronously.
pub(crate) async fn run_task_request(state: &Arc<AppState>, request: TaskRequest) -> TaskResponse {
    let task_id = request
        .task_id
        .clone()
        .unwrap_or_else(|| format!("browser_{}", &Uuid::new_v4().simple().to_string()[..12]));
    let start = tokio::time::Instant::now();

    tracing::info!(
        "Starting task {}: {} (provider={}, model={}, max_steps={})",
        task_id,
        truncate(&request.task, 100),
        request.llm_provider,
        request.llm_model.as_deref().unwrap_or("default"),
        request.max_steps,
    );

    if request.debug_mode {
        tracing::info!(
            "Request settings: debug_mode={} generate_gif={} calculate_cost={} save_conversation={} customer_id={:?} session_enabled={} headless={} window={}x{} timeout={}s llm_timeout={}s step_timeout={}s",
            request.debug_mode,
            request.generate_gif,
            request.calculate_cost,
            request.save_conversation,
            request.customer_id,
            request.session_enabled,
            request.headless,
            request.window_width,
            request.window_height,
            request.timeout,
            request.llm_timeout,
            request.step_timeout,
        );
    }

    let timeout_secs = request.timeout;
    let handle = state.supervisor.register(&task_id).await;
    let execution = state.orchestrator.clone().run(handle.clone(), request);

    let outcome = state
        .supervisor
        .run_under_deadline(&handle, Duration::from_secs(timeout_secs), execution)
        .await;
    let execution_time = start.elapsed().as_secs_f64();

    match outcome {
        DeadlineOutcome::Finished(TaskOutcome::Completed(report)) => {
            state
                .supervisor
                .mark_terminal(&task_id, TaskStatus::Completed)
                .await;
            completed_response(task_id, report, execution_time)
        }
        DeadlineOutcome::Finished(TaskOutcome::Cancelled { partial_result }) => {
            tracing::info!("Task was cancelled during execution (task_id={})", task_id);
            TaskResponse {
                partial_result,
                ..TaskResponse::not_completed(task_id, "Task cancelled".to_string(), execution_time)
            }
        }
        DeadlineOutcome::Finished(TaskOutcome::Failed { error }) => {
            state
                .supervisor
                .mark_terminal(&task_id, TaskStatus::Failed)
                .await;
            tracing::error!("Task {} failed: {}", task_id, error);
            TaskResponse::not_completed(task_id, error, execution_time)
        }
        DeadlineOutcome::DeadlineExceeded => {
            tracing::warn!("Task {} timed out after {:.2}s", task_id, execution_time);
            TaskResponse::not_completed(
                task_id,
                format!("Task timed out after {} seconds", timeout_secs),
                execution_time,
            )
        }
        DeadlineOutcome::Crashed(error) => {
            tracing::error!("Task {} failed: {}", task_id, error);
            TaskResponse::not_completed(task_id, error, execution_time)
        }
    }
}

fn completed_response(
    task_id: String,
    report: ExecutionReport,
    execution_time: f64,
) -> TaskResponse {
    let success = report.derive_success();

    tracing::info!(
        "Task {} completed in {:.2}s (steps={}, success={})",
        task_id,
        execution_time,
        report.steps,
        success,
    );

    if let Some(verdict) = &report.judge_verdict {
        tracing::info!(
            "Judge verdict available for task {} ({})",
            task_id,
            if verdict.contains("PASS") { "PASS" } else { "FAIL" },
        );
    }

    if !report.errors.is_empty() {
        if report.is_rate_limit {
            tracing::warn!(
                "Rate limit detected for task {}: {}",
                task_id,
                truncate(&report.errors[0], 150),
            );
        } else if report.is_malformed_response {
            tracing::warn!(
                "Malformed model response detected for task {}: {}",
                task_id,
                truncate(&report.errors[0], 150),
            );
        }
    }

    let error = report.error_summary();
    TaskResponse {
        task_id,
        success,
        result: report.final_result,
        final_url: report.urls.last().cloned(),
        urls_visited: report.urls,
        steps_taken: report.steps,
        execution_time,
        gif_path: report.gif_path,
        error,
        judge_verdict: report.judge_verdict,
        cost: report.cost,
        cost_currency: report.cost_currency,
        llm_calls: report.llm_calls,
        debug_data: report.debug,
        conversation_path: report.conversation_path,
        downloaded_files: report.downloaded_files,
        partial_result: None,
    }
}

/// Cancel a running browser automation task.
async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Json<CancelResponse> {
    tracing::info!("Cancel request received (task_id={})", task_id);

    match state.supervisor.cancel(&task_id).await {
        CancelOutcome::Cancelled { partial_result } => {
            tracing::info!("Browser task cancelled (task_id={})", task_id);
            Json(CancelResponse {
                success: true,
                task_id,
                message: Some("Task cancelled".to_string()),
                error: None,
                partial_result,
            })
        }
        CancelOutcome::NotFound => {
            tracing::warn!("Task not found for cancellation (task_id={})", task_id);
            Json(CancelResponse {
                success: false,
                task_id,
                message: None,
                error: Some("Task not found or already completed".to_string()),
                partial_result: None,
            })
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
