use crate::day_close::Escalation;
use crate::error::AppError;
use crate::notify::{APP_NAME, Notifier};
use notify_rust::Notification;

pub struct LinuxNotifier;

impl Notifier for LinuxNotifier {
    fn notify(&self, escalation: &Escalation) -> Result<(), AppError> {
        Notification::new()
            .summary(APP_NAME)
            .body(&escalation.message())
            .show()
            .map_err(|err| AppError::io(err.to_string()))?;
        Ok(())
    }
}
