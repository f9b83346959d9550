//! IoT starter device client - command line entry point

use clap::{Args, Parser, Subcommand};
use iotstarter::capabilities::DeviceCapabilities;
use iotstarter::config::AppConfig;
use iotstarter::error::{IotError, IotResult};
use iotstarter::observability::{init_default_logging, init_logging_with_level};
use iotstarter::profiles::{ConnectionProfile, FilePreferences, ProfileStore};
use iotstarter::protocol::{OutboundEvent, TextPayload};
use iotstarter::session::{
    Notification, NotificationEvent, SessionHandle, SessionService, SessionState, ViewKind,
};
use iotstarter::transport::mqtt::MqttTransportFactory;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, Duration};
use tracing::{error, info, warn, Level};

/// Device-side IoT starter client
#[derive(Parser)]
#[command(name = "iotstarter")]
#[command(about = "Device-side IoT starter client for the IoT Foundation broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage stored connection profiles
    Profiles {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// Connect and print inbound commands until Ctrl-C
    Run {
        /// Profile to connect with (defaults to the "default" profile)
        #[arg(short, long)]
        profile: Option<String>,
    },
    /// Connect, publish one text event, and disconnect
    Publish {
        #[arg(short, long)]
        profile: Option<String>,
        #[arg(short, long)]
        text: String,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// List stored profiles
    List,
    /// Store a profile
    Save(SaveArgs),
    /// Remove every stored profile
    Clear,
}

#[derive(Args)]
struct SaveArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    org: String,
    #[arg(long)]
    device_id: String,
    #[arg(long, env = "IOT_AUTH_TOKEN", default_value = "")]
    auth_token: String,
    /// Replace an existing profile with the same name
    #[arg(long)]
    overwrite: bool,
}

const CONNECT_WAIT: Duration = Duration::from_secs(45);
const DISCONNECT_WAIT: Duration = Duration::from_secs(5);
const PUBLISH_WAIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging_with_level(Level::DEBUG),
        _ => init_logging_with_level(Level::TRACE),
    }

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e.sanitized());
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Profiles { action } => handle_profiles(&config, action),
        Commands::Run { profile } => run_session(config, profile).await,
        Commands::Publish { profile, text } => publish_text(config, profile, text).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e.sanitized());
        process::exit(1);
    }
}

fn load_configuration(config_path: &Option<PathBuf>) -> IotResult<AppConfig> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(AppConfig::load_from_file(path)?);
    }

    for path_str in ["iotstarter.toml", "config/iotstarter.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(AppConfig::load_from_file(&path)?);
        }
    }

    info!("No configuration file found, using defaults");
    Ok(AppConfig::default())
}

fn open_store(config: &AppConfig) -> IotResult<ProfileStore<FilePreferences>> {
    let prefs = FilePreferences::open(&config.store.path)?;
    Ok(ProfileStore::open(prefs)?)
}

fn handle_profiles(config: &AppConfig, action: ProfileAction) -> IotResult<()> {
    let mut store = open_store(config)?;

    match action {
        ProfileAction::List => {
            if store.profiles().is_empty() {
                println!("No profiles stored");
            }
            for profile in store.profiles() {
                println!(
                    "{}\torg={}\tdevice={}",
                    profile.name, profile.organization, profile.device_id
                );
            }
        }
        ProfileAction::Save(args) => {
            let profile =
                ConnectionProfile::new(args.name, args.org, args.device_id, args.auth_token);
            if args.overwrite {
                store.overwrite_profile(profile)?;
            } else {
                store.save(profile)?;
            }
        }
        ProfileAction::Clear => store.clear_profiles()?,
    }
    Ok(())
}

fn select_profile(config: &AppConfig, name: Option<&str>) -> IotResult<ConnectionProfile> {
    let store = open_store(config)?;
    let profile = match name {
        Some(name) => store.find(name),
        None => store.default_profile(),
    };
    profile
        .cloned()
        .ok_or_else(|| IotError::Other(format!("No profile named {:?}", name.unwrap_or("default"))))
}

fn start_session(config: AppConfig) -> (SessionHandle, tokio::task::JoinHandle<()>) {
    SessionService::start(
        config,
        Arc::new(MqttTransportFactory),
        DeviceCapabilities::default(),
    )
}

/// Connect from the login view and wait for the outcome
async fn connect_and_wait(
    session: &SessionHandle,
    profile: ConnectionProfile,
) -> IotResult<mpsc::UnboundedReceiver<Notification>> {
    session.set_active_view(Some(ViewKind::Login)).await?;
    let mut login = session.subscribe_notifications(ViewKind::Login).await?;
    session.connect(profile).await?;

    let deadline = tokio::time::Instant::now() + CONNECT_WAIT;
    loop {
        let next = tokio::time::timeout_at(deadline, login.recv())
            .await
            .map_err(|_| IotError::Other("Timed out waiting for connection".to_string()))?;
        match next.map(|n| n.event) {
            Some(NotificationEvent::Connected) => return Ok(login),
            Some(NotificationEvent::BrokerUnavailable) => {
                return Err(IotError::Other("Broker unavailable".to_string()))
            }
            Some(NotificationEvent::Disconnected) => {
                // a broker-unavailable notice may follow
                if let Ok(Some(n)) = timeout(Duration::from_millis(50), login.recv()).await {
                    if n.event == NotificationEvent::BrokerUnavailable {
                        return Err(IotError::Other("Broker unavailable".to_string()));
                    }
                }
                return Err(IotError::Other("Connection failed".to_string()));
            }
            Some(_) => continue,
            None => return Err(IotError::Other("Session stopped".to_string())),
        }
    }
}

async fn disconnect_and_wait(
    session: &SessionHandle,
    login: &mut mpsc::UnboundedReceiver<Notification>,
) -> IotResult<()> {
    session.set_active_view(Some(ViewKind::Login)).await?;
    session.disconnect().await?;
    let waited = timeout(DISCONNECT_WAIT, async {
        while let Some(n) = login.recv().await {
            if n.event == NotificationEvent::Disconnected {
                break;
            }
        }
    })
    .await;
    if waited.is_err() {
        warn!("No disconnect confirmation before timeout");
    }
    Ok(())
}

/// Wait until every issued operation has reached the transport
async fn wait_for_pending_operations(session: &SessionHandle) -> IotResult<()> {
    let deadline = tokio::time::Instant::now() + PUBLISH_WAIT;
    while session.snapshot().await?.pending_operations > 0 {
        if tokio::time::Instant::now() >= deadline {
            warn!("Operations still pending, disconnecting anyway");
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(())
}

async fn run_session(config: AppConfig, profile: Option<String>) -> IotResult<()> {
    let profile = select_profile(&config, profile.as_deref())?;
    info!(profile = %profile.name, "Starting session");

    let (session, task) = start_session(config);
    let mut login = connect_and_wait(&session, profile).await?;

    let mut log = session.subscribe_notifications(ViewKind::Log).await?;
    session.set_active_view(Some(ViewKind::Log)).await?;
    println!("Connected. Waiting for commands, Ctrl-C to stop.");

    let mut health = interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down gracefully...");
                break;
            }
            Some(notification) = log.recv() => match notification.event {
                NotificationEvent::NewText => {
                    for line in session.take_message_log().await? {
                        println!("text: {line}");
                    }
                }
                NotificationEvent::Alert { message } => println!("ALERT: {message}"),
                _ => {}
            },
            _ = health.tick() => {
                if session.snapshot().await?.state == SessionState::Disconnected {
                    error!("Connection lost, shutting down");
                    break;
                }
            }
        }
    }

    let snapshot = session.snapshot().await?;
    if snapshot.state == SessionState::Connected {
        disconnect_and_wait(&session, &mut login).await?;
    }
    info!(
        published = snapshot.counters.publish_count,
        received = snapshot.counters.receive_count,
        "Session summary"
    );

    session.shutdown().await?;
    if let Err(e) = task.await {
        warn!("Session task ended abnormally: {}", e);
    }
    Ok(())
}

async fn publish_text(config: AppConfig, profile: Option<String>, text: String) -> IotResult<()> {
    let profile = select_profile(&config, profile.as_deref())?;
    let (session, task) = start_session(config);
    let mut login = connect_and_wait(&session, profile).await?;

    session
        .publish_event(OutboundEvent::Text(TextPayload { text }))
        .await?;
    wait_for_pending_operations(&session).await?;
    info!("Text event published");

    disconnect_and_wait(&session, &mut login).await?;
    session.shutdown().await?;
    if let Err(e) = task.await {
        warn!("Session task ended abnormally: {}", e);
    }
    Ok(())
}

fn handle_config_command(config: &AppConfig, show: bool) -> IotResult<()> {
    config.validate()?;
    if show {
        println!("Current configuration:");
        println!(
            "{}",
            toml::to_string_pretty(config).map_err(|e| IotError::Other(e.to_string()))?
        );
    }
    info!("Configuration validation complete");
    Ok(())
}
