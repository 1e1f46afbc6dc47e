//! Logic Node binary
//!
//! Registers with the directory server, joins the peer mesh and keeps the
//! heartbeat going until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;

use ed25519_dalek::SigningKey;
use quarry_node::{DirectoryClient, GridBounds, NodeCommBuilder, NodeConfig};
use quarry_proto::{CausalEnvelope, PREY_IDENTIFIER};
use quarry_transfer::{TransportConfig, TransportHandle};
use rand::rngs::OsRng;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "logic_node=info,quarry_node=info,quarry_transfer=info,quarry_proto=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Logic Node");

    let config = NodeConfig::from_env()?;
    let transport = TransportHandle::new(TransportConfig {
        bind: config.listen_addr,
        ..Default::default()
    })
    .await?;
    let advertise_addr = advertise_addr(&config, transport.local_addr()?);

    let signing_key = SigningKey::generate(&mut OsRng);
    let directory = Arc::new(DirectoryClient::new(
        config.server_addr.clone(),
        advertise_addr.clone(),
        &signing_key.verifying_key(),
        config.reregister_delay,
    ));

    let session = match directory.register().await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    };

    let identity = if config.prey {
        PREY_IDENTIFIER.to_string()
    } else {
        session.identifier.clone()
    };

    let (node, dispatcher) = NodeCommBuilder::new(identity.clone(), signing_key, transport)
        .with_advertise_addr(advertise_addr)
        .with_envelope(Arc::new(CausalEnvelope::new(identity)))
        .with_validator(Arc::new(GridBounds::new(&session.grid)))
        .with_config(config)
        .start()?;
    tokio::spawn(dispatcher.run());

    if let Err(e) = node.join_mesh(&directory).await {
        tracing::warn!("could not join mesh: {e}");
    }

    let (stop, shutdown) = watch::channel(false);
    let heartbeat = {
        let directory = Arc::clone(&directory);
        tokio::spawn(async move { directory.run_heartbeat(shutdown).await })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    let _ = stop.send(true);
    heartbeat.await?;

    Ok(())
}

/// Explicit advertise address, or the bound one with an unspecified IP
/// replaced by loopback.
fn advertise_addr(config: &NodeConfig, bound: SocketAddr) -> String {
    if let Some(addr) = &config.advertise_addr {
        return addr.clone();
    }
    if bound.ip().is_unspecified() {
        tracing::warn!(
            port = bound.port(),
            "listening on an unspecified address; advertising loopback, set QUARRY_ADVERTISE_ADDR for remote peers"
        );
        return SocketAddr::from(([127, 0, 0, 1], bound.port())).to_string();
    }
    bound.to_string()
}
