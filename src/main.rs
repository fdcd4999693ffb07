use clap::Parser;
use shack_gate::comm::SerialConnector;
use shack_gate::command::CommandServer;
use shack_gate::config::Config;
use shack_gate::consts;
use shack_gate::remote::{DiscordRest, Gateway, GatewayConfig};
use shack_gate::sync::{Inbox, SyncCore};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "config.yaml")]
    config_path: String,

    // USB Connection
    #[arg(long, default_value = "/dev/ttyACM0")]
    port_name: String,
    #[arg(long, default_value_t = 9600)]
    baud_rate: u32,

    // Command socket; overrides the config file.
    #[arg(long)]
    bind: Option<String>,
}

fn init_log() -> anyhow::Result<()> {
    let timer = fmt::time::ChronoLocal::new("%H:%M:%S%.3f".to_string());

    // Configure a custom event formatter
    let format = fmt::format()
        .with_level(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_source_location(true)
        .with_timer(timer)
        .compact();

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::DEBUG.into())
        .from_env()?
        .add_directive("tungstenite=info".parse()?)
        .add_directive("reqwest=info".parse()?)
        .add_directive("hyper=info".parse()?);

    fmt().event_format(format).with_env_filter(filter).init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_log()?;
    let args = Args::parse();

    let config = Config::from_file(&args.config_path)?;
    info!(
        "Starting {} {}. Port: {}@{} Channel: {}",
        consts::GATE_NAME,
        consts::GATE_VERSION,
        args.port_name,
        args.baud_rate,
        config.channel_id
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (update_tx, update_rx) = mpsc::channel(16);
    let (relay_tx, relay_rx) = mpsc::channel(16);

    // Remote -> device
    let gateway = Gateway::new(GatewayConfig {
        token: config.token.clone(),
        intents: config.intents,
        api_version: config.api_version,
    });
    let gateway_task = tokio::spawn(gateway.run(update_tx, shutdown_rx.clone()));

    // Command socket -> device
    let bind = args.bind.as_deref().unwrap_or(&config.command_bind);
    let server = CommandServer::bind(bind, relay_tx).await?;
    let server_task = tokio::spawn(server.run(shutdown_rx.clone()));

    let sync_config = config.sync_config();
    let rest = DiscordRest::new(&config.token, config.api_version, sync_config.remote_timeout)?;
    let connector = SerialConnector::new(&args.port_name, args.baud_rate);
    let mut core = SyncCore::new(sync_config, connector, rest);
    let mut inbox = Inbox {
        updates: update_rx,
        relay: relay_rx,
    };

    info!("shack-gate initialized.");
    let run = core.run(&mut inbox, shutdown_rx);
    tokio::pin!(run);
    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            let _ = shutdown_tx.send(true);
            run.await
        }
    };

    // Stop the gateway and the command socket as well.
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(gateway_task, server_task);

    if let Err(err) = result {
        error!("Device loop failed: {}", err);
        return Err(err.into());
    }
    Ok(())
}
