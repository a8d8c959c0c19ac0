use crate::model::TaskStatus;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    #[error("invalid_input - {0}")]
    InvalidInput(String),
    #[error("invalid_data - {0}")]
    InvalidData(String),
    #[error("io_error - {0}")]
    Io(String),
    #[error("storage_unavailable - {0}")]
    StorageUnavailable(String),
    #[error("not_found - {0}")]
    NotFound(String),
    #[error("admission_rejected - WIP limit reached ({active}/{limit})")]
    AdmissionRejected { active: usize, limit: u8 },
    #[error("invalid_transition - cannot {action} a task that is {status}")]
    InvalidTransition {
        status: TaskStatus,
        action: &'static str,
    },
    #[error("import_invalid - {0}")]
    ImportInvalid(String),
    #[error("sync_unavailable - {0}")]
    SyncUnavailable(String),
}

impl AppError {
    pub fn invalid_input<M: Into<String>>(message: M) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn invalid_data<M: Into<String>>(message: M) -> Self {
        Self::InvalidData(message.into())
    }

    pub fn io<M: Into<String>>(message: M) -> Self {
        Self::Io(message.into())
    }

    pub fn storage_unavailable<M: Into<String>>(message: M) -> Self {
        Self::StorageUnavailable(message.into())
    }

    pub fn not_found<M: Into<String>>(id: M) -> Self {
        Self::NotFound(id.into())
    }

    pub fn import_invalid<M: Into<String>>(message: M) -> Self {
        Self::ImportInvalid(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidData(_) => "invalid_data",
            Self::Io(_) => "io_error",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::NotFound(_) => "not_found",
            Self::AdmissionRejected { .. } => "admission_rejected",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ImportInvalid(_) => "import_invalid",
            Self::SyncUnavailable(_) => "sync_unavailable",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::InvalidInput(message)
            | Self::InvalidData(message)
            | Self::Io(message)
            | Self::StorageUnavailable(message)
            | Self::NotFound(message)
            | Self::ImportInvalid(message)
            | Self::SyncUnavailable(message) => message.clone(),
            Self::AdmissionRejected { active, limit } => {
                format!("WIP limit reached ({active}/{limit})")
            }
            Self::InvalidTransition { status, action } => {
                format!("cannot {action} a task that is {status}")
            }
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidData(err.to_string())
    }
}
