pub mod error;
pub mod params;
pub mod rabbit;

use dotenv::dotenv;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{error::Result, rabbit::ConsumerSettings};

pub use params::ConnectionParams;

/// Load `.env` (if any), install the log subscriber and read consumer settings.
pub async fn init() -> Result<ConsumerSettings> {
    dotenv().ok();

    init_tracing()?;

    ConsumerSettings::from_env().await
}

/// `RUST_LOG` drives the filter, `info` when unset.
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()?;

    Ok(())
}
