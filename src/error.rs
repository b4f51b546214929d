use thiserror::Error;

use crate::broker::BrokerError;
use crate::config::error::ErrorConfig;
use crate::worker::WorkerState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ErrorConfig),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("worker cannot start while {0:?}")]
    InvalidState(WorkerState),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
