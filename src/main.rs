use std::time::Duration;

use clap::Parser;
use log::{info, warn};
use mpptread::{log_config, Config, MpptClient, Poller, Reading, Sinks};

/// Log live readings from a LiTime MPPT solar charge controller
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Advertised BLE name of the controller. Connects to the first compatible device if omitted
    #[arg(long)]
    name: Option<String>,

    /// Seconds between polls
    #[arg(long, default_value_t = 2)]
    interval: u64,

    /// Missed polls before the controller is reported offline
    #[arg(long, default_value_t = 10)]
    max_missed: u8,

    /// Drop responses with a bad MODBUS CRC
    #[arg(long)]
    verify_checksum: bool,

    /// Seconds to scan for the controller
    #[arg(long, default_value_t = 30)]
    discovery_timeout: u64,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Config {
            device_name: args.name,
            poll_interval: Duration::from_secs(args.interval),
            max_no_response_count: args.max_missed,
            verify_checksum: args.verify_checksum,
            discovery_timeout: Duration::from_secs(args.discovery_timeout),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let config = Config::from(Args::parse());
    log_config(&config);

    let sinks = Sinks::new()
        .with_all_channels(|reading: Reading| info!("{reading}"))
        .with_online_status(|online| info!("online_status = {online}"));
    let poller = Poller::new(&config, sinks);

    let client = MpptClient::new(config).await?;
    let poller = client
        .run(poller, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("Unable to listen for Ctrl-C: {err}");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("Last known status: {:?}", poller.status());
    client.stop().await
}
