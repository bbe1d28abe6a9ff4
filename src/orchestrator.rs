//! Task orchestration.
//!
//! Composes the engine for one task execution: working directories, session
//! state restore, driver construction, the agent run under cooperative
//! cancellation, live-session state export, guaranteed browser shutdown,
//! download reconciliation, and result aggregation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use uuid::Uuid;

use crate::api::types::TaskRequest;
use crate::config::Config;
use crate::downloads::DownloadReconciler;
use crate::driver::{AgentRuntime, AgentSpec, BrowserSession, ExecutionHistory, SessionSpec};
use crate::llm::LlmSelection;
use crate::report::{self, ExecutionReport, ReportOptions};
use crate::session::{Identity, IdentityLocks, SessionStore};
use crate::supervisor::{TaskHandle, TaskSupervisor};

/// Result of one orchestrated execution. Timeouts are decided one level up
/// by the supervisor's deadline; they never originate here.
#[derive(Debug)]
pub enum TaskOutcome {
    Completed(ExecutionReport),
    Cancelled { partial_result: Option<String> },
    Failed { error: String },
}

/// Drives one task end to end against the browser driver.
pub struct TaskOrchestrator {
    config: Config,
    runtime: Arc<dyn AgentRuntime>,
    session_store: SessionStore,
    identity_locks: IdentityLocks,
    reconciler: DownloadReconciler,
    supervisor: TaskSupervisor,
}

impl TaskOrchestrator {
    pub fn new(config: Config, runtime: Arc<dyn AgentRuntime>, supervisor: TaskSupervisor) -> Self {
        let session_store = SessionStore::new(config.auth_storage_dir.clone());
        let reconciler =
            DownloadReconciler::new(config.scratch_root.clone(), config.downloads_dir.clone());
        Self {
            config,
            runtime,
            session_store,
            identity_locks: IdentityLocks::new(),
            reconciler,
            supervisor,
        }
    }

    /// Execute the task. Unexpected failures are folded into
    /// [`TaskOutcome::Failed`]; best-effort sub-operations never bubble up.
    pub async fn run(self: Arc<Self>, handle: TaskHandle, request: TaskRequest) -> TaskOutcome {
        let identity = Identity::from_customer_id(request.customer_id);

        // Tasks sharing an identity share its session state files; serialize
        // them so exports never race. Tasks without persistence only touch
        // their own per-task directories and can run freely.
        let _identity_guard = if request.session_enabled {
            Some(self.identity_locks.acquire(&identity).await)
        } else {
            None
        };

        match self.execute(&handle, &request, &identity).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Task {} failed: {:#}", handle.task_id, e);
                TaskOutcome::Failed {
                    // Alternate formatting keeps the full context chain
                    error: format!("{:#}", e),
                }
            }
        }
    }

    async fn execute(
        &self,
        handle: &TaskHandle,
        request: &TaskRequest,
        identity: &Identity,
    ) -> anyhow::Result<TaskOutcome> {
        let task_dir_name = format!("task_{}", short_id());

        let download_dir = self
            .config
            .downloads_dir
            .join(identity.as_str())
            .join(&task_dir_name);
        tokio::fs::create_dir_all(&download_dir)
            .await
            .with_context(|| format!("creating download dir {}", download_dir.display()))?;
        tracing::info!("Downloads will be saved to: {}", download_dir.display());

        let conversation_path = if request.save_conversation {
            Some(self.prepare_conversation_path(identity).await?)
        } else {
            None
        };

        let storage_state = if request.session_enabled {
            self.session_store.load_storage_state(identity)
        } else {
            tracing::info!("Session persistence disabled; browser will start without state");
            None
        };

        let session = self
            .runtime
            .create_session(SessionSpec {
                headless: request.headless,
                window_width: request.window_width,
                window_height: request.window_height,
                storage_state,
                downloads_dir: download_dir.clone(),
                // Keep the browser open past the agent's lifetime so state
                // can still be exported afterwards; closing it is ours.
                keep_alive: true,
            })
            .await
            .context("creating browser session")?;

        session.start().await.context("starting browser session")?;
        tracing::info!("Browser started and control channel initialized");
        self.supervisor
            .attach_session(&handle.task_id, session.clone())
            .await;

        // Restoration must land after the control channel is up and before
        // the agent navigates anywhere.
        if request.session_enabled {
            self.session_store
                .restore_session_storage(session.as_ref(), identity)
                .await;
        }

        let gif_path = request
            .generate_gif
            .then(|| download_dir.join(format!("{}.gif", task_dir_name)));

        let run_result = self
            .drive_agent(
                handle,
                request,
                identity,
                session.clone(),
                &download_dir,
                gif_path.clone(),
                conversation_path.clone(),
            )
            .await;

        // The session is closed on every exit path; failures are logged and
        // never escalate.
        match session.stop().await {
            Ok(()) => tracing::info!("Browser closed successfully"),
            Err(e) => tracing::warn!("Error closing browser: {}", e),
        }

        let history = match run_result? {
            Some(history) => history,
            None => {
                // The stop signal fired mid-run (caller cancel or deadline)
                let partial_result = self.supervisor.get_partial_result(&handle.task_id).await;
                return Ok(TaskOutcome::Cancelled { partial_result });
            }
        };

        if self.supervisor.is_cancelled(&handle.task_id).await {
            tracing::info!(
                "Task was cancelled during execution (task_id={})",
                handle.task_id
            );
            let partial_result = self.supervisor.get_partial_result(&handle.task_id).await;
            return Ok(TaskOutcome::Cancelled { partial_result });
        }

        let downloaded_files = self.reconciler.reconcile(&download_dir);

        let options = ReportOptions {
            provider: LlmSelection::resolve(&request.llm_provider, None).provider,
            calculate_cost: request.calculate_cost,
            debug_mode: request.debug_mode,
        };
        let report = report::assemble(
            history.as_ref(),
            &options,
            downloaded_files,
            conversation_path.map(|p| p.display().to_string()),
            gif_path.map(|p| p.display().to_string()),
        );

        Ok(TaskOutcome::Completed(report))
    }

    /// Everything that needs the live session: agent construction, the run
    /// itself raced against the stop signal, and post-run state export.
    /// Returns `None` when the stop signal won the race.
    #[allow(clippy::too_many_arguments)]
    async fn drive_agent(
        &self,
        handle: &TaskHandle,
        request: &TaskRequest,
        identity: &Identity,
        session: Arc<dyn BrowserSession>,
        download_dir: &std::path::Path,
        gif_path: Option<PathBuf>,
        conversation_path: Option<PathBuf>,
    ) -> anyhow::Result<Option<Arc<dyn ExecutionHistory>>> {
        let llm = LlmSelection::resolve(&request.llm_provider, request.llm_model.as_deref());
        let page_extraction_llm = request
            .page_extraction_llm_provider
            .as_deref()
            .map(|p| LlmSelection::resolve(p, request.page_extraction_llm_model.as_deref()));

        if request.debug_mode {
            tracing::info!(
                "Agent setup: provider={} model={} vision={:?} llm_timeout={}s step_timeout={}s gif={:?}",
                llm.provider.as_str(),
                llm.model,
                request.use_vision,
                request.llm_timeout,
                request.step_timeout,
                gif_path,
            );
        }

        let agent = self
            .runtime
            .create_agent(
                AgentSpec {
                    task: request.task.clone(),
                    llm,
                    page_extraction_llm,
                    vision: request.use_vision,
                    calculate_cost: request.calculate_cost,
                    llm_timeout: Duration::from_secs(request.llm_timeout),
                    step_timeout: Duration::from_secs(request.step_timeout),
                    working_dir: download_dir.to_path_buf(),
                    gif_path,
                    conversation_path,
                },
                session.clone(),
            )
            .await
            .context("creating agent")?;
        self.supervisor
            .attach_agent(&handle.task_id, agent.clone())
            .await;

        let cancel = handle.cancel_token();
        let history = tokio::select! {
            result = agent.run(request.max_steps) => Some(result.context("agent run")?),
            _ = cancel.cancelled() => None,
        };

        // Persist state while the control channel is still open; the driver
        // cannot export from a closed session.
        if history.is_some() && request.session_enabled {
            self.session_store
                .export_storage_state(session.as_ref(), identity)
                .await;
            self.session_store
                .export_session_storage(session.as_ref(), identity)
                .await;
        }

        Ok(history)
    }

    async fn prepare_conversation_path(&self, identity: &Identity) -> anyhow::Result<PathBuf> {
        let conv_dir = self.config.conversations_dir.join(identity.as_str());
        tokio::fs::create_dir_all(&conv_dir)
            .await
            .with_context(|| format!("creating conversation dir {}", conv_dir.display()))?;

        let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        let path = conv_dir.join(format!("task_{}_{}.json", short_id(), timestamp));
        tracing::info!("Conversation will be saved to: {}", path.display());
        Ok(path)
    }
}

/// Eight hex chars of a fresh v4 id, enough to keep task dirs unique.
fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
