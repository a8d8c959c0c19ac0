use crate::day_close::Escalation;
use crate::error::AppError;
use serde::Serialize;
use tracing::warn;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::LinuxNotifier;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::WindowsNotifier;

const DISABLE_ENV_VAR: &str = "TACT_DISABLE_NOTIFICATIONS";
const APP_NAME: &str = "tact";

pub trait Notifier {
    fn notify(&self, escalation: &Escalation) -> Result<(), AppError>;
}

pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _escalation: &Escalation) -> Result<(), AppError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NotificationOutcome {
    pub sent: usize,
    pub failures: Vec<NotificationFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationFailure {
    pub task_id: String,
    pub error: String,
}

/// Surface every escalation. Failures are collected, never raised.
pub fn notify_escalations(
    notifier: &dyn Notifier,
    escalations: &[Escalation],
) -> NotificationOutcome {
    let mut outcome = NotificationOutcome::default();
    for escalation in escalations {
        match notifier.notify(escalation) {
            Ok(()) => outcome.sent += 1,
            Err(err) => {
                warn!(task_id = %escalation.task_id, error = %err, "escalation notification failed");
                outcome.failures.push(NotificationFailure {
                    task_id: escalation.task_id.clone(),
                    error: err.to_string(),
                });
            }
        }
    }
    outcome
}

pub fn notifier_from_env() -> Result<Box<dyn Notifier>, AppError> {
    if std::env::var(DISABLE_ENV_VAR).is_ok() {
        return Ok(Box::new(NoopNotifier));
    }

    match platform_notifier() {
        Ok(notifier) => Ok(notifier),
        Err(err) => match err {
            AppError::InvalidData(_) => Ok(Box::new(NoopNotifier)),
            other => Err(other),
        },
    }
}

#[cfg(target_os = "linux")]
pub fn platform_notifier() -> Result<Box<dyn Notifier>, AppError> {
    Ok(Box::new(LinuxNotifier))
}

#[cfg(windows)]
pub fn platform_notifier() -> Result<Box<dyn Notifier>, AppError> {
    Ok(Box::new(WindowsNotifier))
}

#[cfg(not(any(target_os = "linux", windows)))]
pub fn platform_notifier() -> Result<Box<dyn Notifier>, AppError> {
    Err(AppError::invalid_data(
        "notifications are not supported on this platform",
    ))
}
