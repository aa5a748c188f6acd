use thiserror::Error;

pub type RallyResult<T> = Result<T, RallyError>;

#[derive(Debug, Error)]
pub enum RallyError {
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl RallyError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
