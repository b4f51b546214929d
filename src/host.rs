use async_trait::async_trait;
use tracing::error;

use crate::error::Result;
use crate::shutdown::ShutdownToken;

/// Start/stop contract a host drives for a long-running service.
#[async_trait]
pub trait HostedService: Send {
    /// Run until `token` fires. Returns early with an error on fatal setup failure.
    async fn start(&mut self, token: ShutdownToken) -> Result<()>;

    /// Release everything `start` acquired. Must be safe to call whatever state
    /// `start` left the service in.
    async fn stop(&mut self, token: ShutdownToken) -> Result<()>;
}

/// Run `service` to completion: `start`, then always `stop`.
///
/// The first error wins; a start failure is still followed by stop.
pub async fn run_hosted<S>(service: &mut S, token: ShutdownToken) -> Result<()>
where
    S: HostedService + ?Sized,
{
    let started = service.start(token.clone()).await;
    if let Err(e) = &started {
        error!("❌ Service failed to start: {}", e);
    }

    let stopped = service.stop(token).await;
    started.and(stopped)
}
