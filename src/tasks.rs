use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::process::{ExitStatus, Stdio};

use log::{debug, info, warn};
use serde::Deserialize;
use serde_inline_default::serde_inline_default;
use thiserror::Error;

use crate::expression::{self, EvaluationError, TaskEnvironment};

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("condition: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("service `{0}` is not available in this environment")]
    ServiceMissing(String),

    #[error("task `{task}` exited with {status}")]
    Exit { task: String, status: ExitStatus },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Any error a phase runner returned, tagged with the phase it aborted.
#[derive(Error, Debug)]
#[error("{phase} tasks failed: {source}")]
pub struct PhaseError {
    pub phase: Phase,
    #[source]
    pub source: TaskError,
}

/// A rollout stage with its own ordered list of tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Phase {
    PreRollout,
    PostRollout,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Phase::PreRollout => "pre-rollout",
            Phase::PostRollout => "post-rollout",
        })
    }
}

/// A command declared in the build specification.
#[serde_inline_default]
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Task {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub command: String,
    #[serde_inline_default("cli".to_string())]
    pub service: String,
    #[serde_inline_default("sh".to_string())]
    pub shell: String,
    /// Condition gating the task. Empty means the task always runs.
    #[serde(default)]
    pub when: String,
}

impl Task {
    /// Name used in log lines; falls back to the command itself.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.command)
    }
}

/// Whether `task` is eligible to run in `environment`.
/// Tasks without a condition never reach the evaluator.
pub fn should_run(task: &Task, environment: &TaskEnvironment) -> Result<bool, EvaluationError> {
    if task.when.is_empty() {
        return Ok(true);
    }
    expression::evaluate(&task.when, environment)
}

/// Hand the whole phase to `runner` and surface its error, if any.
///
/// The runner decides what executing a task means; gating and fail-fast
/// ordering are its responsibility too, see [iterate_tasks].
pub fn run_phase<R>(
    phase: Phase,
    mut runner: R,
    tasks: &[Task],
    environment: &TaskEnvironment,
) -> Result<(), PhaseError>
where
    R: FnMut(&TaskEnvironment, &[Task]) -> Result<bool, TaskError>,
{
    info!("Running {} {phase} tasks", tasks.len());
    match runner(environment, tasks) {
        Ok(ran) => {
            debug!("{phase} finished, tasks executed: {ran}");
            Ok(())
        }
        Err(source) => Err(PhaseError { phase, source }),
    }
}

/// Something that can carry out a single task.
pub trait TaskExecutor {
    fn execute(&mut self, task: &Task, environment: &TaskEnvironment) -> Result<(), TaskError>;
}

/// Build the standard phase runner: gate each task in declaration order,
/// execute the eligible ones, and stop at the first error.
///
/// With `allow_missing_service`, a task whose service is not deployed yet is
/// skipped instead of failing the phase. Pre-rollout tasks on a first deploy
/// hit this.
pub fn iterate_tasks<E: TaskExecutor>(
    mut executor: E,
    allow_missing_service: bool,
) -> impl FnMut(&TaskEnvironment, &[Task]) -> Result<bool, TaskError> {
    move |environment: &TaskEnvironment, tasks: &[Task]| {
        let mut ran = false;
        for task in tasks {
            if !should_run(task, environment)? {
                info!("Skipping task `{}`: condition `{}` is false", task.display_name(), task.when);
                continue;
            }
            info!("Executing task `{}`", task.display_name());
            match executor.execute(task, environment) {
                Ok(()) => ran = true,
                Err(TaskError::ServiceMissing(service)) if allow_missing_service => {
                    warn!("Skipping task `{}`: service `{service}` is missing", task.display_name());
                }
                Err(err) => return Err(err),
            }
        }
        Ok(ran)
    }
}

/// Runs tasks as local child processes through their declared shell.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {
    /// Services available to run tasks in. `None` accepts every service.
    pub services: Option<BTreeSet<String>>,
}

impl TaskExecutor for ShellExecutor {
    fn execute(&mut self, task: &Task, environment: &TaskEnvironment) -> Result<(), TaskError> {
        if let Some(services) = &self.services {
            if !services.contains(&task.service) {
                return Err(TaskError::ServiceMissing(task.service.clone()));
            }
        }

        let mut process = std::process::Command::new(&task.shell);
        process.arg("-c").arg(&task.command);
        for (key, value) in environment.iter() {
            process.env(key, value.to_string());
        }

        process
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map(|exit_status| {
                if exit_status.success() {
                    Ok(())
                } else {
                    Err(TaskError::Exit {
                        task: task.display_name().to_string(),
                        status: exit_status,
                    })
                }
            })?
    }
}

/// Logs tasks instead of running them.
#[derive(Debug, Default)]
pub struct DryRunExecutor {
    pub executed: Vec<String>,
}

impl TaskExecutor for DryRunExecutor {
    fn execute(&mut self, task: &Task, _environment: &TaskEnvironment) -> Result<(), TaskError> {
        info!(
            "[dry run] would run `{}` in service `{}` with {}",
            task.command, task.service, task.shell
        );
        self.executed.push(task.display_name().to_string());
        Ok(())
    }
}

impl<E: TaskExecutor + ?Sized> TaskExecutor for &mut E {
    fn execute(&mut self, task: &Task, environment: &TaskEnvironment) -> Result<(), TaskError> {
        (**self).execute(task, environment)
    }
}
