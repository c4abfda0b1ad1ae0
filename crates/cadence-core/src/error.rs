use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown timezone: {0}")]
    Timezone(String),
}

impl CoreError {
    /// Short machine-readable code for logs and the management layer.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "CONFIG_INVALID",
            CoreError::Timezone(_) => "TIMEZONE_INVALID",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
