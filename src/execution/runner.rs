//! Task runners execute the body of a validation.

use crate::core::config::RunnerConfig;
use crate::core::error::TaskError;
use crate::core::types::ValidationId;
use crate::execution::cancel::CancellationToken;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of a validation for one subject (usually a host).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectOutcome {
    /// Whether the subject passed.
    pub success: bool,
    /// Runner-specific details, kept verbatim.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl SubjectOutcome {
    /// A passing outcome with no details.
    pub fn passed() -> Self {
        Self {
            success: true,
            details: Map::new(),
        }
    }

    /// A failing outcome with no details.
    pub fn failed() -> Self {
        Self {
            success: false,
            details: Map::new(),
        }
    }

    /// Attach a detail field.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Per-subject outcomes reported by a runner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunReport(pub IndexMap<String, SubjectOutcome>);

impl RunReport {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subject outcome.
    pub fn with_subject(mut self, subject: impl Into<String>, outcome: SubjectOutcome) -> Self {
        self.0.insert(subject.into(), outcome);
        self
    }

    /// True when every subject succeeded. An empty report counts as success.
    pub fn succeeded(&self) -> bool {
        self.0.values().all(|o| o.success)
    }

    /// Serialize for storage in a result's detailed description.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

/// What a runner is asked to execute.
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    /// Validation being run.
    pub validation: &'a ValidationId,
    /// Procedure file of the validation.
    pub procedure: &'a Path,
    /// Plan the run targets, if any.
    pub plan_id: Option<&'a str>,
}

impl<'a> RunContext<'a> {
    /// Context for a run without a plan.
    pub fn new(validation: &'a ValidationId, procedure: &'a Path) -> Self {
        Self {
            validation,
            procedure,
            plan_id: None,
        }
    }

    /// Set the target plan.
    pub fn with_plan(mut self, plan_id: Option<&'a str>) -> Self {
        self.plan_id = plan_id;
        self
    }
}

/// Executes a validation procedure.
///
/// Implementations should call [`CancellationToken::checkpoint`] between
/// steps and return [`TaskError::Cancelled`] once the token is set.
pub trait TaskRunner: Send + Sync {
    /// Run the procedure described by `ctx`.
    fn execute(
        &self,
        ctx: &RunContext<'_>,
        token: &CancellationToken,
    ) -> Result<RunReport, TaskError>;
}

impl<F> TaskRunner for F
where
    F: Fn(&RunContext<'_>, &CancellationToken) -> Result<RunReport, TaskError> + Send + Sync,
{
    fn execute(
        &self,
        ctx: &RunContext<'_>,
        token: &CancellationToken,
    ) -> Result<RunReport, TaskError> {
        self(ctx, token)
    }
}

/// Runner shared by every validation in a catalog.
pub type SharedRunner = Arc<dyn TaskRunner>;

/// Runs procedures as external commands, e.g. `ansible-playbook -i hosts <path>`.
///
/// The plan id, when present, is exported to the child as `VIGIL_PLAN_ID`.
/// The child is polled until it exits. If the token is set first, the child
/// is killed and the run reports [`TaskError::Cancelled`].
#[derive(Debug, Clone)]
pub struct CommandTaskRunner {
    program: String,
    args: Vec<String>,
    subject: String,
    poll_interval: Duration,
}

impl CommandTaskRunner {
    /// Create a runner for `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self::from_config(&RunnerConfig {
            program: program.into(),
            args: Vec::new(),
            ..RunnerConfig::default()
        })
    }

    /// Create a runner from configuration.
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            subject: config.subject.clone(),
            poll_interval: config.poll_interval(),
        }
    }

    /// Set arguments passed before the procedure path.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Set the subject name used in reports.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Set how often the child is polled.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut out = String::new();
        if let Some(mut stream) = stream {
            let _ = stream.read_to_string(&mut out);
        }
        out
    })
}

impl TaskRunner for CommandTaskRunner {
    fn execute(
        &self,
        ctx: &RunContext<'_>,
        token: &CancellationToken,
    ) -> Result<RunReport, TaskError> {
        token.checkpoint()?;

        let mut command = Command::new(&self.program);
        command.args(&self.args).arg(ctx.procedure);
        if let Some(plan_id) = ctx.plan_id {
            command.env("VIGIL_PLAN_ID", plan_id);
        }
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TaskError::Failed(format!("cannot start '{}': {}", self.program, e)))?;

        // Drained on their own threads so a chatty child never blocks on a full pipe.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if token.is_cancelled() {
                log::warn!("Killing '{}' for {}", self.program, ctx.procedure.display());
                let _ = child.kill();
                let _ = child.wait();
                return Err(TaskError::Cancelled);
            }
            std::thread::sleep(self.poll_interval);
        };

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        let outcome = SubjectOutcome {
            success: status.success(),
            details: Map::new(),
        }
        .with_detail("exit_code", status.code())
        .with_detail("stdout", stdout)
        .with_detail("stderr", stderr);

        Ok(RunReport::new().with_subject(self.subject.clone(), outcome))
    }
}
