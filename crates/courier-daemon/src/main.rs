//! courier-daemon: runs the messaging session and its HTTP gateway.
//!
//! ```text
//! courier-daemon --bridge "node ./bridge/index.js" --port 5000
//! ```
//!
//! On first run the device is not yet linked. The daemon asks for a phone
//! number (or takes `--pairing-number`) and prints a pairing code to enter on
//! the phone.

use clap::Parser;
use courier_core::bridge::{BridgeConfig, BridgeConnector};
use courier_core::credentials::FileCredentialStore;
use courier_core::event_bus::{EventBus, PAIRING_CODE};
use courier_core::pairing::{ConsolePairingInput, PairingInput, StaticPairingInput};
use courier_core::shell::split_command_line;
use courier_core::{GatewayConfig, ManagerConfig, MessageGateway, SessionManager};
use courier_http::SharedState;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "courier-daemon", version, about = "HTTP gateway for a messaging session")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 5000)]
    port: u16,

    /// Directory holding the session credentials.
    #[arg(long, env = "COURIER_SESSION_DIR", default_value = "session")]
    session_dir: String,

    /// Command line that starts the protocol bridge.
    #[arg(long, env = "COURIER_BRIDGE")]
    bridge: String,

    /// Shell used to launch the bridge (default: "$SHELL -l -c").
    #[arg(long)]
    shell_prefix: Option<String>,

    /// Phone number to pair with; prompts on the console when absent.
    #[arg(long, env = "COURIER_PAIRING_NUMBER")]
    pairing_number: Option<String>,

    /// Mirror bridge traffic to log files in this directory.
    #[arg(long)]
    bridge_log_dir: Option<String>,

    #[arg(long, default_value_t = 5000)]
    reconnect_delay_ms: u64,

    /// How long a send waits for a reconnect.
    #[arg(long, default_value_t = 3000)]
    send_grace_ms: u64,

    /// Do not reconnect after disconnects with an unrecognized reason code.
    #[arg(long)]
    no_retry_unknown_disconnects: bool,
}

impl Args {
    fn bridge_config(&self) -> Result<BridgeConfig, String> {
        let (command, args) = split_command_line(&self.bridge)?;
        let mut config = BridgeConfig::new(command, args);
        if let Some(prefix) = &self.shell_prefix {
            config = config.shell_prefix(prefix.clone());
        }
        if let Some(dir) = &self.bridge_log_dir {
            config = config.log_dir(dir.clone());
        }
        Ok(config)
    }

    fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            retry_unrecognized_disconnects: !self.no_retry_unknown_disconnects,
            ..ManagerConfig::default()
        }
    }

    fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            grace_window: Duration::from_millis(self.send_grace_ms),
        }
    }

    fn pairing_input(&self) -> Arc<dyn PairingInput> {
        match &self.pairing_number {
            Some(number) => Arc::new(StaticPairingInput::new(number.clone())),
            None => Arc::new(ConsolePairingInput),
        }
    }
}

/// Print pairing codes where the operator will see them.
fn announce_pairing_codes(event_bus: &EventBus) {
    let mut events = event_bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if event.event_type == PAIRING_CODE {
                if let Some(code) = event.payload.get("code").and_then(|c| c.as_str()) {
                    println!("Pairing code: {}", code);
                }
            }
        }
    });
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), String> {
    let connector = Arc::new(BridgeConnector::new(args.bridge_config()?));
    let credentials = Arc::new(FileCredentialStore::new(&args.session_dir));
    log::info!("Session credentials in {}", credentials.dir().display());
    let event_bus = Arc::new(EventBus::new());
    announce_pairing_codes(&event_bus);

    let manager = Arc::new(SessionManager::new(
        args.manager_config(),
        connector,
        credentials,
        args.pairing_input(),
        Arc::clone(&event_bus),
    ));
    let gateway = Arc::new(MessageGateway::new(
        Arc::clone(&manager),
        args.gateway_config(),
    ));

    let mut server =
        courier_http::start(Arc::new(SharedState::new(gateway)), &args.host, args.port).await?;

    // A failed first attempt is not retried; the next send tries again.
    let initial = Arc::clone(&manager);
    tokio::spawn(async move {
        if let Err(e) = initial.start().await {
            log::error!("Initial connection failed: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for shutdown signal: {}", e))?;
    log::info!("Shutting down");

    server.stop().await;
    if let Some(handle) = manager.current_handle() {
        handle.end().await;
    }
    Ok(())
}
