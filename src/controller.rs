//! Retry/reset controller
//!
//! Outer loop: up to `max_retry_count` attempts, each starting with a reset.
//! Inner loop: dequeue and execute until the queue is empty or the run-wide
//! task ceiling is reached. Business errors fail their element and the loop
//! moves on; any other failure ends the attempt and triggers another reset.

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::RobotSettings;
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::executor::TaskHandler;
use crate::queue::QueueSource;

/// Limits for one run
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub queue_name: String,
    pub max_retry_count: u32,
    pub max_task_count: u32,
    pub fail_on_too_many_errors: bool,
}

impl From<&RobotSettings> for ControllerSettings {
    fn from(robot: &RobotSettings) -> Self {
        Self {
            queue_name: robot.queue_name.clone(),
            max_retry_count: robot.max_retry_count,
            max_task_count: robot.max_task_count,
            fail_on_too_many_errors: robot.fail_robot_on_too_many_errors,
        }
    }
}

/// Counters of one run; zero at start, only the controller mutates them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunState {
    /// Dequeue attempts, across all retries
    pub tasks_attempted: u32,

    /// Attempts that ended in an infrastructure failure
    pub error_count: u32,

    pub completed: u32,
    pub business_failures: u32,

    /// Message of the most recent infrastructure failure
    pub last_error: Option<String>,
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub attempted: u32,
    pub completed: u32,
    pub business_failures: u32,
    pub infrastructure_errors: u32,
    pub retries_exhausted: bool,
}

/// An attempt that ended in an infrastructure failure
struct AttemptFailure {
    element: Option<(Uuid, String)>,
    message: String,
}

impl AttemptFailure {
    fn without_element(err: Error) -> Self {
        Self {
            element: None,
            message: err.to_string(),
        }
    }
}

pub struct RetryController {
    queue: Arc<dyn QueueSource>,
    handler: Arc<dyn TaskHandler>,
    env: Arc<dyn Environment>,
    settings: ControllerSettings,
}

impl RetryController {
    pub fn new(
        queue: Arc<dyn QueueSource>,
        handler: Arc<dyn TaskHandler>,
        env: Arc<dyn Environment>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            queue,
            handler,
            env,
            settings,
        }
    }

    /// Run the outer retry loop, then the final reset
    ///
    /// Returns [`Error::TooManyFailures`] when every attempt failed and the
    /// settings ask for it; otherwise a report of what happened.
    pub async fn run(&self, state: &mut RunState) -> Result<RunReport> {
        let max_retries = self.settings.max_retry_count;
        let errors_before = state.error_count;

        for attempt in 1..=max_retries {
            match self.attempt(state).await {
                Ok(()) => break,
                Err(failure) => {
                    state.error_count += 1;
                    state.last_error = Some(failure.message.clone());
                    self.report_failure(attempt, &failure).await;
                }
            }
        }

        self.finish().await;

        let failed_attempts = state.error_count - errors_before;
        let report = RunReport {
            attempted: state.tasks_attempted,
            completed: state.completed,
            business_failures: state.business_failures,
            infrastructure_errors: failed_attempts,
            retries_exhausted: failed_attempts == max_retries,
        };

        info!(
            attempted = report.attempted,
            completed = report.completed,
            business_failures = report.business_failures,
            infrastructure_errors = report.infrastructure_errors,
            "Run finished"
        );

        if report.retries_exhausted {
            if self.settings.fail_on_too_many_errors {
                return Err(Error::TooManyFailures {
                    attempts: max_retries,
                    last_error: state.last_error.clone().unwrap_or_default(),
                });
            }
            warn!(attempts = max_retries, "Every attempt failed; continuing as configured");
        }

        Ok(report)
    }

    /// Reset, then process until the queue is empty or the ceiling is hit
    async fn attempt(&self, state: &mut RunState) -> std::result::Result<(), AttemptFailure> {
        self.env.reset().await.map_err(AttemptFailure::without_element)?;

        while state.tasks_attempted < self.settings.max_task_count {
            state.tasks_attempted += 1;

            let task = match self.queue.dequeue(&self.settings.queue_name).await {
                Ok(Some(task)) => task,
                Ok(None) => {
                    info!(queue = %self.settings.queue_name, "Queue empty");
                    return Ok(());
                }
                Err(e) => return Err(AttemptFailure::without_element(e)),
            };

            match self.handler.execute(&task).await {
                Ok(()) => {
                    self.queue.mark_done(task.id).await.map_err(|e| AttemptFailure {
                        element: Some((task.id, task.reference.clone())),
                        message: e.to_string(),
                    })?;
                    state.completed += 1;
                }
                Err(err) if err.is_business() => {
                    state.business_failures += 1;
                    warn!(id = %task.id, reference = %task.reference, error = %err, "Business error");
                    self.queue
                        .mark_failed(task.id, &err.to_string())
                        .await
                        .map_err(AttemptFailure::without_element)?;
                }
                Err(err) => {
                    return Err(AttemptFailure {
                        element: Some((task.id, task.reference.clone())),
                        message: err.to_string(),
                    })
                }
            }
        }

        info!(max_task_count = self.settings.max_task_count, "Task ceiling reached");
        Ok(())
    }

    async fn report_failure(&self, attempt: u32, failure: &AttemptFailure) {
        match &failure.element {
            Some((id, reference)) => {
                error!(
                    attempt,
                    id = %id,
                    reference = %reference,
                    error = %failure.message,
                    "Process error #{}", attempt
                );
                if let Err(e) = self.queue.mark_failed(*id, &failure.message).await {
                    warn!(id = %id, error = %e, "Could not mark element as failed");
                }
            }
            None => error!(attempt, error = %failure.message, "Process error #{}", attempt),
        }
    }

    /// Final reset, close and kill; failures are only logged
    async fn finish(&self) {
        if let Err(e) = self.env.reset().await {
            warn!(error = %e.format_for_log(), "Final reset failed");
        }
        if let Err(e) = self.env.close_all().await {
            warn!(error = %e.format_for_log(), "Closing handles failed");
        }
        if let Err(e) = self.env.kill_all().await {
            warn!(error = %e.format_for_log(), "Killing processes failed");
        }
    }
}
