//! Scripted task runners and fixtures shared by unit tests.

use crate::catalog::loader::{StageDefinition, ValidationDefinition};
use crate::core::error::TaskError;
use crate::execution::cancel::CancellationToken;
use crate::execution::runner::{
    RunContext, RunReport, SharedRunner, SubjectOutcome, TaskRunner,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Runner that returns the same report every time.
pub struct StaticRunner {
    report: RunReport,
}

impl StaticRunner {
    pub fn new(report: RunReport) -> SharedRunner {
        Arc::new(Self { report })
    }

    /// `{hostname: {success: true}}`
    pub fn passing() -> SharedRunner {
        Self::new(RunReport::new().with_subject("hostname", SubjectOutcome::passed()))
    }

    /// `{hostname: {success: false}}`
    pub fn failing() -> SharedRunner {
        Self::new(RunReport::new().with_subject("hostname", SubjectOutcome::failed()))
    }
}

impl TaskRunner for StaticRunner {
    fn execute(
        &self,
        _ctx: &RunContext<'_>,
        token: &CancellationToken,
    ) -> Result<RunReport, TaskError> {
        token.checkpoint()?;
        Ok(self.report.clone())
    }
}

/// Runner that fails for one plan and passes for every other.
pub struct PlanRunner {
    failing_plan: String,
}

impl PlanRunner {
    pub fn failing_for(plan: &str) -> SharedRunner {
        Arc::new(Self {
            failing_plan: plan.to_string(),
        })
    }
}

impl TaskRunner for PlanRunner {
    fn execute(
        &self,
        ctx: &RunContext<'_>,
        _token: &CancellationToken,
    ) -> Result<RunReport, TaskError> {
        let outcome = if ctx.plan_id == Some(self.failing_plan.as_str()) {
            SubjectOutcome::failed()
        } else {
            SubjectOutcome::passed()
        };
        Ok(RunReport::new().with_subject("hostname", outcome))
    }
}

/// Runner that blocks until released (then passes) or cancelled.
#[derive(Default)]
pub struct BlockingRunner {
    released: AtomicBool,
    started: AtomicUsize,
}

impl BlockingRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Let every blocked and future run finish successfully.
    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    /// Number of runs that reached the runner.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

impl TaskRunner for BlockingRunner {
    fn execute(
        &self,
        _ctx: &RunContext<'_>,
        token: &CancellationToken,
    ) -> Result<RunReport, TaskError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        loop {
            token.checkpoint()?;
            if self.released.load(Ordering::SeqCst) {
                return Ok(RunReport::new().with_subject("hostname", SubjectOutcome::passed()));
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

/// Poll `condition` until it holds or five seconds pass.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

pub fn validation_def(file: &str, name: &str, requires_plan: bool) -> ValidationDefinition {
    let path = PathBuf::from("/defs/validations").join(file);
    ValidationDefinition {
        procedure: path.clone(),
        path,
        name: name.to_string(),
        description: format!("Checks {}", name),
        requires_plan,
        reference: None,
        metadata: Vec::new(),
    }
}

pub fn stage_def(file: &str, name: &str, includes: &[&str]) -> StageDefinition {
    StageDefinition {
        path: PathBuf::from("/defs/stages").join(file),
        name: name.to_string(),
        description: format!("Stage {}", name),
        phase: "pre-deployment".to_string(),
        included_paths: includes
            .iter()
            .map(|f| PathBuf::from("../validations").join(f))
            .collect(),
    }
}
