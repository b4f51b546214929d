//! Thin queue consumer: connect, register a logging handler once, let the broker
//! delete messages as they are delivered, close on shutdown.

pub mod app;
pub mod broker;
pub mod config;
pub mod error;
pub mod handler;
pub mod host;
pub mod shutdown;
pub mod worker;

pub use broker::{BrokerClient, BrokerConnector, DeliveryHandler, Fault, Message};
pub use config::ConnectionParams;
pub use error::{Error, Result};
pub use handler::LoggingHandler;
pub use host::{HostedService, run_hosted};
pub use worker::{Worker, WorkerState};
