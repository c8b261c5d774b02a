//! Single-flight run coordination per plan scope.
//!
//! Each validation embeds one [`RunCoordinator`]. Every plan scope gets its
//! own mutex, so the check-then-start sequence of `run` and the
//! check-then-cancel sequence of `stop` are atomic for one scope while
//! different scopes never contend. The outer map lock is only held long
//! enough to find or create a scope slot.

use crate::core::error::{EngineError, EngineResult, EntityKind, TaskError};
use crate::core::types::{PlanScope, ResultId, ResultStatus, ValidationId};
use crate::execution::cancel::CancellationToken;
use crate::execution::runner::{RunContext, RunReport, SharedRunner};
use crate::results::model::{ResultUpdate, ValidationResult};
use crate::results::store::SharedStore;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Live reference to an in-flight run.
#[derive(Debug)]
pub struct RunHandle {
    result_id: ResultId,
    token: CancellationToken,
    thread: JoinHandle<()>,
}

impl RunHandle {
    /// Result the run writes to.
    pub fn result_id(&self) -> ResultId {
        self.result_id
    }

    /// Whether the worker thread is still executing.
    pub fn is_active(&self) -> bool {
        !self.thread.is_finished()
    }
}

/// Run history and in-flight run of one plan scope.
#[derive(Debug, Default)]
pub struct ScopeState {
    /// Result ids in creation order.
    pub result_ids: Vec<ResultId>,
    active: Option<RunHandle>,
    // Disconnects when the most recently started worker exits, even if the
    // run was stopped and its handle cleared.
    last_exit: Option<Receiver<()>>,
}

impl ScopeState {
    /// The in-flight run, if its worker is still executing.
    pub fn active(&self) -> Option<&RunHandle> {
        self.active.as_ref().filter(|h| h.is_active())
    }
}

type ScopeSlot = Arc<Mutex<ScopeState>>;

/// Everything a worker needs to execute one run.
#[derive(Clone)]
pub struct RunRequest {
    /// Validation being run.
    pub validation: ValidationId,
    /// Scope the run is recorded under.
    pub scope: PlanScope,
    /// Plan id as supplied by the caller.
    pub plan_id: Option<String>,
    /// Procedure handed to the runner.
    pub procedure: PathBuf,
    /// Where results are written.
    pub store: SharedStore,
    /// Who executes the procedure.
    pub runner: SharedRunner,
}

/// Per-scope run bookkeeping for one validation.
#[derive(Debug, Default)]
pub struct RunCoordinator {
    scopes: RwLock<HashMap<PlanScope, ScopeSlot>>,
}

impl RunCoordinator {
    /// Create a coordinator with no history.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, scope: &PlanScope) -> ScopeSlot {
        if let Some(slot) = self.scopes.read().get(scope) {
            return slot.clone();
        }
        self.scopes.write().entry(scope.clone()).or_default().clone()
    }

    fn existing_slot(&self, scope: &PlanScope) -> Option<ScopeSlot> {
        self.scopes.read().get(scope).cloned()
    }

    /// Result ids of one scope in creation order.
    pub fn result_ids(&self, scope: &PlanScope) -> Vec<ResultId> {
        self.existing_slot(scope)
            .map(|slot| slot.lock().result_ids.clone())
            .unwrap_or_default()
    }

    /// Most recent result id of one scope.
    pub fn latest_result_id(&self, scope: &PlanScope) -> Option<ResultId> {
        self.existing_slot(scope)
            .and_then(|slot| slot.lock().result_ids.last().copied())
    }

    /// Result ids of every scope. Order across scopes is unspecified.
    pub fn all_result_ids(&self) -> Vec<ResultId> {
        let slots: Vec<ScopeSlot> = self.scopes.read().values().cloned().collect();
        slots
            .iter()
            .flat_map(|slot| slot.lock().result_ids.clone())
            .collect()
    }

    /// Whether a run is in flight for the scope.
    pub fn is_running(&self, scope: &PlanScope) -> bool {
        self.existing_slot(scope)
            .map(|slot| slot.lock().active().is_some())
            .unwrap_or(false)
    }

    /// Record an existing result at the end of a scope's history.
    ///
    /// Used to rebuild history from a persisted store at startup.
    pub fn restore(&self, scope: &PlanScope, result_id: ResultId) {
        let slot = self.slot(scope);
        let mut state = slot.lock();
        if !state.result_ids.contains(&result_id) {
            state.result_ids.push(result_id);
        }
    }

    /// Start a run unless one is already in flight for the scope.
    ///
    /// Returns once the result is persisted and the worker is dispatched.
    /// On any error neither the store nor the scope history is touched.
    pub fn start(&self, request: RunRequest) -> EngineResult<ResultId> {
        let slot = self.slot(&request.scope);
        let mut state = slot.lock();

        if state.active().is_some() {
            return Err(EngineError::already_running(
                EntityKind::Validation,
                &request.validation,
            ));
        }

        let result =
            ValidationResult::running(request.validation.clone(), request.plan_id.clone())
                .with_arguments(json!({ "plan_id": request.plan_id }));
        let result_id = result.id;

        let token = CancellationToken::new();
        let (exit_tx, exit_rx) = channel::bounded::<()>(0);
        // The worker holds until the result is persisted; a dropped gate
        // makes it exit without touching the store.
        let (gate_tx, gate_rx) = channel::bounded::<()>(1);
        let worker = Worker {
            slot: slot.clone(),
            result_id,
            token: token.clone(),
            request: request.clone(),
            gate: gate_rx,
            _exit: exit_tx,
        };

        let thread = std::thread::Builder::new()
            .name(format!("vigil-run-{}", request.validation))
            .spawn(move || worker.run())
            .map_err(|e| {
                let message = format!("cannot spawn run worker: {}", e);
                log::error!("Validation {}: {}", request.validation, message);
                EngineError::Internal(message)
            })?;

        // On failure the gate sender drops here and the worker exits.
        request.store.insert(result)?;

        state.result_ids.push(result_id);
        state.active = Some(RunHandle {
            result_id,
            token,
            thread,
        });
        state.last_exit = Some(exit_rx);
        let _ = gate_tx.send(());

        log::info!(
            "Started validation {} ({}) as result {}",
            request.validation,
            request.scope,
            result_id
        );
        Ok(result_id)
    }

    /// Cancel the in-flight run of a scope.
    ///
    /// The result is marked `canceled` before this returns; the worker is
    /// only signalled and may still be unwinding.
    pub fn stop(
        &self,
        validation: &ValidationId,
        scope: &PlanScope,
        store: &SharedStore,
    ) -> EngineResult<ResultId> {
        let not_running = || EngineError::NotRunning {
            id: validation.to_string(),
        };
        let slot = self.existing_slot(scope).ok_or_else(not_running)?;
        let mut state = slot.lock();

        let result_id = state.active().map(|h| h.result_id).ok_or_else(not_running)?;
        store.update(result_id, ResultUpdate::status(ResultStatus::Canceled))?;

        if let Some(handle) = state.active.take() {
            handle.token.cancel();
        }
        log::warn!("Cancelled validation {} ({}), result {}", validation, scope, result_id);
        Ok(result_id)
    }

    /// Block until the most recently started worker of the scope exits.
    pub fn wait(&self, scope: &PlanScope) {
        let exit = self
            .existing_slot(scope)
            .and_then(|slot| slot.lock().last_exit.clone());
        if let Some(exit) = exit {
            // Disconnection is the signal; no message is ever sent.
            let _ = exit.recv();
        }
    }
}

struct Worker {
    slot: ScopeSlot,
    result_id: ResultId,
    token: CancellationToken,
    request: RunRequest,
    gate: Receiver<()>,
    _exit: Sender<()>,
}

impl Worker {
    fn run(self) {
        if self.gate.recv().is_err() {
            return;
        }

        let request = &self.request;
        let ctx = RunContext::new(&request.validation, &request.procedure)
            .with_plan(request.plan_id.as_deref());
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| request.runner.execute(&ctx, &self.token)))
                .unwrap_or_else(|_| Err(TaskError::Failed("task runner panicked".to_string())));

        let (status, description) = outcome_to_update(outcome);

        let mut state = self.slot.lock();
        match request
            .store
            .update(self.result_id, ResultUpdate::finished(status, description))
        {
            Ok(stored) => log::info!(
                "Validation {} ({}) finished: {}",
                request.validation,
                request.scope,
                stored.status
            ),
            Err(e) => log::error!(
                "Validation {}: failed to record result {}: {}",
                request.validation,
                self.result_id,
                e
            ),
        }

        if state.active.as_ref().map(|h| h.result_id) == Some(self.result_id) {
            state.active = None;
        }
    }
}

/// Map a runner outcome onto the final status and description of a result.
fn outcome_to_update(outcome: Result<RunReport, TaskError>) -> (ResultStatus, Value) {
    match outcome {
        Ok(report) => {
            let status = if report.succeeded() {
                ResultStatus::Success
            } else {
                ResultStatus::Failed
            };
            (status, report.to_value())
        }
        Err(TaskError::Cancelled) => (
            ResultStatus::Canceled,
            json!({ "description": "Validation was cancelled." }),
        ),
        Err(e) => (ResultStatus::Failed, json!({ "error": e.to_string() })),
    }
}
