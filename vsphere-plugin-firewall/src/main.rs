//! vSphere firewall plugin - ESXi rule-set status and toggling over MQTT
//!
//! - Probes for the esxcli client at startup; refuses to load without it
//! - Listens on vsphere/firewall/command@v1, answers on vsphere/firewall/response@v1
//! - Each command runs on its own task so the MQTT loop keeps polling
//! - Ctrl-C stops new work, lets running fan-outs drain, flushes their
//!   responses to the broker, then exits

mod commands;
mod config;

use anyhow::{bail, Context, Result};
use commands::{handle_command, COMMAND_TOPIC};
use config::PluginConfig;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use vsphere_fanout::invoker::esxcli::EsxcliInvoker;
use vsphere_fanout::FirewallModule;

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("vsphere_plugin_firewall=info,vsphere_fanout=info")),
        )
        .init();

    info!("vsphere-plugin-firewall v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = PluginConfig::load()
        .await
        .context("Failed to load configuration")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (module, capability) = FirewallModule::with_esxcli(&config.engine, Some(shutdown_rx));
    if !module.is_available() {
        bail!(
            "{} not loaded: {}",
            module.name(),
            capability.reason.unwrap_or_else(|| "esxcli unavailable".to_string())
        );
    }

    let mut mqtt_options = MqttOptions::new(
        config.mqtt.client_id(),
        config.mqtt.broker_host.clone(),
        config.mqtt.broker_port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_secs.max(5)));
    mqtt_options.set_clean_session(true);

    let (client, eventloop) = AsyncClient::new(mqtt_options, 10);
    client
        .subscribe(COMMAND_TOPIC, QoS::AtLeastOnce)
        .await
        .context("Failed to subscribe to command topic")?;

    info!(
        "Connected to {}:{}, listening on {}",
        config.mqtt.broker_host, config.mqtt.broker_port, COMMAND_TOPIC
    );

    run(client, eventloop, Arc::new(module), shutdown_tx).await
}

async fn run(
    client: AsyncClient,
    mut eventloop: EventLoop,
    module: Arc<FirewallModule<EsxcliInvoker>>,
    shutdown_tx: watch::Sender<bool>,
) -> Result<()> {
    let mut tasks = JoinSet::new();
    let mut shutting_down = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !shutting_down => {
                info!("Shutdown requested, draining {} running command(s)", tasks.len());
                shutting_down = true;
                shutdown_tx.send_replace(true);
                if tasks.is_empty() {
                    break;
                }
            }

            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    error!("Command task failed: {}", e);
                }
                if shutting_down && tasks.is_empty() {
                    break;
                }
            }

            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Incoming::Publish(publish))) if publish.topic == COMMAND_TOPIC => {
                    if shutting_down {
                        warn!("Ignoring command received during shutdown");
                        continue;
                    }
                    tasks.spawn(handle_command(client.clone(), module.clone(), publish.payload.to_vec()));
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    // clean sessions drop subscriptions on reconnect
                    if let Err(e) = client.try_subscribe(COMMAND_TOPIC, QoS::AtLeastOnce) {
                        error!("Failed to resubscribe: {}", e);
                    }
                }
                Ok(other) => debug!("MQTT event: {:?}", other),
                Err(e) => {
                    error!("MQTT connection error: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            },
        }
    }

    flush_and_disconnect(&client, &mut eventloop).await;
    info!("vsphere-plugin-firewall stopped");
    Ok(())
}

/// Publishes only leave the client queue when the event loop is polled, so
/// the loop keeps running until the queued responses and the DISCONNECT are out
async fn flush_and_disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if let Err(e) = client.disconnect().await {
        warn!("Failed to queue disconnect: {}", e);
        return;
    }

    let flushed = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => debug!("Flushed response (pkid {})", pkid),
                Ok(other) => debug!("MQTT event during shutdown: {:?}", other),
                Err(e) => {
                    warn!("MQTT connection closed during shutdown: {}", e);
                    break;
                }
            }
        }
    })
    .await;

    if flushed.is_err() {
        warn!("Pending responses not flushed within {:?}", DISCONNECT_TIMEOUT);
    }
}
