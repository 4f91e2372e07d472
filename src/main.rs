//! mqttls command line client
//!
//! Connects to a broker over TLS and either streams messages from a topic or
//! publishes a single message.

use clap::{Parser, Subcommand};
use mqttls::config::ClientSettings;
use mqttls::observability::init_default_logging;
use mqttls::tls::{build_cipher_policy, platform_cipher_suites, CipherDescriptor};
use mqttls::{ClientHandle, MqttTlsClient, Notification};
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATHS: &[&str] = &["mqttls.toml", "config/mqttls.toml"];
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);

/// TLS-only MQTT client
#[derive(Parser)]
#[command(name = "mqttls")]
#[command(about = "TLS-only MQTT client with automatic reconnection")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Broker host name
    #[arg(long, global = true)]
    host: Option<String>,

    /// Broker TLS port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Client identifier (random when empty)
    #[arg(long, global = true)]
    client_id: Option<String>,

    /// CA certificate bundle (PEM)
    #[arg(long, value_name = "FILE", global = true)]
    ca: Option<PathBuf>,

    /// Client certificate (PEM)
    #[arg(long, value_name = "FILE", global = true)]
    cert: Option<PathBuf>,

    /// Client private key (PEM)
    #[arg(long, value_name = "FILE", global = true)]
    key: Option<PathBuf>,

    #[arg(long, global = true)]
    username: Option<String>,

    #[arg(long, env = "MQTTLS_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print messages from a topic filter until interrupted
    Subscribe {
        #[arg(short, long)]
        topic: String,
        #[arg(short, long, default_value_t = 0)]
        qos: u8,
        /// Print every notification as a JSON line instead of plain text
        #[arg(long)]
        json: bool,
    },
    /// Publish one message and disconnect
    Publish {
        #[arg(short, long)]
        topic: String,
        #[arg(short, long)]
        message: String,
        #[arg(short, long, default_value_t = 0)]
        qos: u8,
        #[arg(long)]
        retain: bool,
        /// Seconds to wait for the broker to accept the connection
        #[arg(long, default_value_t = 30)]
        connect_timeout: u64,
    },
    /// Show which cipher suites the TLS policy selects
    Ciphers,
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Subscribe { topic, qos, json } => {
            run_subscribe(settings, topic, qos, json).await
        }
        Commands::Publish {
            topic,
            message,
            qos,
            retain,
            connect_timeout,
        } => {
            run_publish(
                settings,
                topic,
                message,
                qos,
                retain,
                Duration::from_secs(connect_timeout),
            )
            .await
        }
        Commands::Ciphers => {
            show_ciphers();
            Ok(())
        }
        Commands::Config { show } => handle_config_command(&settings, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_settings(cli: &Cli) -> Result<ClientSettings, Box<dyn std::error::Error>> {
    let mut settings = match find_config_file(cli.config.as_deref()) {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            ClientSettings::load_from_file(&path)?
        }
        None => ClientSettings::default(),
    };

    let broker = &mut settings.broker;
    if let Some(host) = &cli.host {
        broker.host_name = host.clone();
    }
    if let Some(port) = cli.port {
        broker.port = port;
    }
    if let Some(client_id) = &cli.client_id {
        broker.client_id = client_id.clone();
    }
    if let Some(ca) = &cli.ca {
        broker.ca_cert_path = Some(ca.clone());
    }
    if let Some(cert) = &cli.cert {
        broker.client_cert_path = Some(cert.clone());
    }
    if let Some(key) = &cli.key {
        broker.client_key_path = Some(key.clone());
    }
    if let Some(username) = &cli.username {
        broker.username = Some(username.clone());
    }
    if let Some(password) = &cli.password {
        broker.password = Some(password.clone());
    }

    settings.validate()?;
    Ok(settings)
}

fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    DEFAULT_CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

async fn run_subscribe(
    settings: ClientSettings,
    topic: String,
    qos: u8,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (client, task) = MqttTlsClient::spawn_rumqtt(settings);
    let mut notifications = client.notifications();
    client.connect().await?;

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl-C, shutting down...");
                break;
            }
            notification = notifications.recv() => match notification {
                Ok(notification) => {
                    // Subscriptions do not survive a reconnect
                    if matches!(notification, Notification::Connected) {
                        client.subscribe(topic.clone(), qos).await?;
                    }
                    print_notification(&notification, json)?;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Dropped {} notifications", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    shutdown(&client, &mut notifications).await;
    task.await?;
    Ok(())
}

async fn run_publish(
    settings: ClientSettings,
    topic: String,
    message: String,
    qos: u8,
    retain: bool,
    connect_timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let (client, task) = MqttTlsClient::spawn_rumqtt(settings);
    let mut notifications = client.notifications();
    client.connect().await?;

    let connected = timeout(
        connect_timeout,
        wait_for(&mut notifications, |n| matches!(n, Notification::Connected)),
    )
    .await
    .unwrap_or(false);

    if !connected {
        client.shutdown()?;
        task.await?;
        return Err(format!("broker did not accept the connection within {connect_timeout:?}").into());
    }

    client.publish(topic, message, qos, retain).await?;
    shutdown(&client, &mut notifications).await;
    task.await?;
    Ok(())
}

fn print_notification(
    notification: &Notification,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string(notification)?);
        return Ok(());
    }
    // Log lines already reach stderr through the tracing mirror
    if let Notification::MessageReceived { topic, payload } = notification {
        println!("{topic}: {payload}");
    }
    Ok(())
}

/// Disconnect gracefully, then stop the driver
async fn shutdown(client: &ClientHandle, notifications: &mut broadcast::Receiver<Notification>) {
    if client.disconnect().await.is_ok() {
        let disconnected = timeout(
            DISCONNECT_GRACE,
            wait_for(notifications, |n| matches!(n, Notification::Disconnected)),
        )
        .await
        .unwrap_or(false);
        if !disconnected {
            warn!("Broker did not confirm the disconnect");
        }
    }
    if let Err(e) = client.shutdown() {
        warn!("Client already stopped: {}", e);
    }
}

/// Wait until `done` matches; false if the stream ends first
async fn wait_for(
    notifications: &mut broadcast::Receiver<Notification>,
    done: impl Fn(&Notification) -> bool,
) -> bool {
    loop {
        match notifications.recv().await {
            Ok(notification) if done(&notification) => return true,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return false,
        }
    }
}

fn show_ciphers() {
    let selection = build_cipher_policy(&platform_cipher_suites());
    println!("{}", selection.summary());
    if selection.fell_back() {
        println!("No strong cipher available, offering the full platform list");
    }
    for cipher in selection.ciphers.iter().map(CipherDescriptor::describe) {
        let protocol = cipher
            .protocol
            .map_or_else(|| "any".to_string(), |p| p.to_string());
        println!("  {:<48} {:>4} bits  {}", cipher.name, cipher.strength_bits, protocol);
    }
}

fn handle_config_command(
    settings: &ClientSettings,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Configuration is valid");
    if show {
        println!("{}", settings.to_toml_string()?);
    } else {
        println!(
            "Configuration OK: mqtts://{}:{}",
            settings.broker.host_name, settings.broker.port
        );
    }
    Ok(())
}
