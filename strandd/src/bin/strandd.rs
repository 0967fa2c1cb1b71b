use anyhow::Context as _;
use std::path::PathBuf;
use strandd::{network::Network, secret::Secret, Config};
use structopt::StructOpt;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(StructOpt, Debug)]
struct Args {
    /// set log levels
    ///
    /// useful for trying to debug some operations happening
    /// while executing some of the commands
    #[structopt(long = "log-level", default_value = "info", global = true)]
    log_level: Level,

    /// path of the configuration file of the node
    #[structopt(long = "config")]
    config: PathBuf,

    /// set the password instead of having the problem prompted for it
    #[structopt(long = "password", env = "STRANDD_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[tokio::main]
async fn main() {
    if let Err(error) = main_run().await {
        eprintln!("{:?}", error);
        std::process::exit(1);
    }
}

async fn main_run() -> anyhow::Result<()> {
    let args = Args::from_args();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let mut config = Config::from_file(args.config).context("cannot load initial settings")?;
    config.secret.password = args.password;

    let secret = Secret::new(config.secret).context("Cannot load the node's secret")?;
    let network = Network::new(secret, config.network)
        .await
        .context("Cannot start the network")?;

    println!("peer address: {}", network.public_address());

    network.bootstrap(&config.peers).await;

    println!("ctrl-c to stop the node...");

    tokio::signal::ctrl_c()
        .await
        .context("Cannot listen to the CTRL-C signal")?;
    tracing::info!("shuting down via CTRL-C instruction");

    network.shutdown().await;

    Ok(())
}
