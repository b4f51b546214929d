use crate::config::error::{ErrorConfig, Result};
use std::env;
use tracing::{debug, info};
use uuid::Uuid;

/// Consumer tuning that is not part of the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub consumer_tag: String,
    pub prefetch: Option<u16>,
    pub declare_queue: bool,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            consumer_tag: default_consumer_tag(),
            prefetch: None,
            declare_queue: false,
        }
    }
}

impl ConsumerSettings {
    /// Load consumer settings from environment variables, providing sensible defaults
    pub async fn from_env() -> Result<Self> {
        info!("Loading consumer settings from environment");
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        debug!("Getting RABBITMQ_CONSUMER_TAG from env");
        let consumer_tag = lookup("RABBITMQ_CONSUMER_TAG").unwrap_or_else(default_consumer_tag);

        debug!("Getting RABBITMQ_PREFETCH from env");
        let prefetch = match lookup("RABBITMQ_PREFETCH") {
            Some(value) => Some(value.trim().parse::<u16>().map_err(|_| {
                ErrorConfig::InvalidValue {
                    key: "RABBITMQ_PREFETCH",
                    value,
                }
            })?),
            None => None,
        };

        debug!("Getting RABBITMQ_DECLARE_QUEUE from env");
        let declare_queue = match lookup("RABBITMQ_DECLARE_QUEUE") {
            Some(value) => parse_flag("RABBITMQ_DECLARE_QUEUE", value)?,
            None => false,
        };

        Ok(Self {
            consumer_tag,
            prefetch,
            declare_queue,
        })
    }
}

fn default_consumer_tag() -> String {
    format!("queue_worker-{}", Uuid::new_v4())
}

fn parse_flag(key: &'static str, value: String) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ErrorConfig::InvalidValue { key, value }),
    }
}
