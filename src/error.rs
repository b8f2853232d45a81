use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Election failed: {reason}")]
    Election { reason: String },

    #[error("Warmup already started")]
    AlreadyStarted,

    #[error("Aborted: {cause}")]
    Aborted { cause: String },

    #[error("{task} warmup failed: {message}")]
    TaskFailed { task: String, message: String },

    #[error("{program} failed: {message}")]
    Command { program: String, message: String },

    #[error("Image copy failed: {0}")]
    Copy(String),

    #[error("Model download failed: {0}")]
    Download(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    /// True when the error reports an earlier cancellation rather than a
    /// failure of the operation that returned it.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted { .. })
    }

    pub fn election(reason: impl Into<String>) -> Self {
        Error::Election {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
