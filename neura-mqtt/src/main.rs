use std::path::PathBuf;

use clap::Parser;
use neura_mqtt::{config::Config, cycle, mqtt, Result};
use neura_webdialog::ClientBuilder;
use tracing::debug;
use url::Url;

/// Runs a single poll: log in to the heat pump, read every configured value and publish it. Meant to be invoked on a
/// schedule (cron, systemd timer, ...).
#[derive(Parser, Debug)]
#[clap(
    name = "neura-mqtt",
    version,
    author,
    about = "Publishes the status of a Neura heat pump to MQTT"
)]
struct Cli {
    #[clap(
        env = "MQTT_URL",
        default_value = "mqtt://localhost:1883",
        value_hint = clap::ValueHint::Url
    )]
    url: Url,

    #[clap(short = 'u', long, env = "MQTT_USER")]
    mqtt_user: Option<String>,

    #[clap(short = 'P', long, env = "MQTT_PASSWORD", hide_env_values = true)]
    mqtt_password: Option<String>,

    /// Address of the heat pump, or the full base URL of its WebDialog pages
    #[clap(short = 'H', long, env = "NEURA_HOST")]
    neura_host: String,

    #[clap(long, env = "NEURA_USER")]
    neura_user: String,

    #[clap(long, env = "NEURA_PASSWORD", hide_env_values = true)]
    neura_password: String,

    /// JSON file listing the pages and values to publish. Defaults to the schema page.
    #[clap(short, long, env = "NEURA_CONFIG", value_hint = clap::ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Print a JSON summary of the cycle to stdout
    #[clap(long)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // stdout is reserved for `--json`
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    let args = Cli::parse();

    let config = match args.config {
        Some(ref path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.validate()?;
    debug!(pages = config.pages.len(), "Config loaded");

    let device = ClientBuilder::new(args.neura_host)
        .credentials(args.neura_user, args.neura_password)
        .timeout(config.timeout)
        .build()?;

    let mut options = mqtt::options(args.url)?;
    if let (Some(u), Some(p)) = (args.mqtt_user, args.mqtt_password) {
        options.set_credentials(u, p);
    }
    let mut publisher = mqtt::Publisher::new(options, config.timeout);

    let report = cycle::run(&device, &mut publisher, &config).await;

    if args.json {
        println!("{}", serde_json::to_string(&report)?);
    }

    Ok(())
}
