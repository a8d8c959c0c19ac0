use crate::day_close::Escalation;
use crate::error::AppError;
use crate::notify::{APP_NAME, Notifier};
use tauri_winrt_notification::Toast;

pub struct WindowsNotifier;

impl Notifier for WindowsNotifier {
    fn notify(&self, escalation: &Escalation) -> Result<(), AppError> {
        Toast::new(Toast::POWERSHELL_APP_ID)
            .title(APP_NAME)
            .text1(&escalation.title)
            .text2(&format!("Rolled over {} times", escalation.rollover_count))
            .show()
            .map_err(|err| AppError::io(err.to_string()))?;
        Ok(())
    }
}
