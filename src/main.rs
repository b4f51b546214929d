use anyhow::{Context, Result};
use queue_worker::broker::RabbitMQConnector;
use queue_worker::shutdown::shutdown_channel;
use queue_worker::{app, config};
use rustls::crypto::{CryptoProvider, ring::default_provider};
use std::{env, io};

#[tokio::main]
async fn main() -> Result<()> {
    // Needed for amqps:// connection strings
    _ = CryptoProvider::install_default(default_provider());

    let (sender, token) = shutdown_channel();
    tokio::spawn(sender.shutdown_on_signal());

    app::launch(env::args_os().skip(1), &mut io::stdout(), token, || async {
        let settings = config::init().await?;
        Ok::<_, queue_worker::Error>(RabbitMQConnector::new(settings))
    })
    .await
    .context("queue worker stopped with an error")?;

    Ok(())
}
