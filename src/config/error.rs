use thiserror::Error;
use tracing_subscriber::util::TryInitError;

pub type Result<T> = std::result::Result<T, ErrorConfig>;

#[derive(Error, Debug)]
pub enum ErrorConfig {
    #[error("expected 2 arguments (connection string, queue name), got {given}")]
    Usage { given: usize },

    #[error("argument {position} is not valid UTF-8")]
    NotUnicode { position: usize },

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error(transparent)]
    Tracing(#[from] TryInitError),
}
