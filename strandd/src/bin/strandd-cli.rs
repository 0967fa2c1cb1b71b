use anyhow::{Context as _, Result};
use keynesis::key::ed25519;
use std::{path::PathBuf, sync::Arc};
use strand_lib::{Entropy, PeerAddress};
use strand_network::{SecureChannel, TcpTransport, Transport as _, Upgrade};
use strandd::{peers, secret::Secret, Config};
use structopt::StructOpt;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(StructOpt, Debug)]
struct Args {
    /// set log levels
    ///
    /// useful for trying to debug some operations happening
    /// while executing some of the commands
    #[structopt(long = "log-level", default_value = "warn", global = true)]
    log_level: Level,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// print the default configuration to the standard output
    DefaultConfig,

    /// generate a new keypair
    GenerateNewKey {
        /// path of the file to store the entropy in
        ///
        /// if no value is given, this value will be asked during the
        /// generation time
        #[structopt(long = "entropy-output")]
        entropy: Option<PathBuf>,

        /// set the password instead of having the problem prompted for it
        ///
        #[structopt(long = "password", env = "STRANDD_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// print the address other peers can dial this node at
    PeerAddress {
        /// set the password instead of having the problem prompted for it
        ///
        #[structopt(long = "password", env = "STRANDD_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// path of the configuration file of the node
        #[structopt(long = "config")]
        config: PathBuf,
    },

    /// ask a peer for the addresses of its peers
    ListPeers {
        /// set the password instead of having the problem prompted for it
        ///
        #[structopt(long = "password", env = "STRANDD_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// path of the configuration file of the node
        #[structopt(long = "config")]
        config: PathBuf,

        /// the address of the peer to ask
        peer: PeerAddress,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::from_args();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .finish();
    if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {}", error);
    }

    let result = match args.cmd {
        Command::DefaultConfig => default_config()
            .await
            .context("Cannot generate default configuration"),
        Command::GenerateNewKey { entropy, password } => generate_new_key(entropy, password)
            .await
            .context("Cannot generate new key"),
        Command::PeerAddress { password, config } => peer_address(password, config)
            .await
            .context("Cannot make the peer address"),
        Command::ListPeers {
            password,
            config,
            peer,
        } => list_peers(password, config, peer)
            .await
            .context("Cannot list the peers"),
    };

    if let Err(error) = result {
        eprintln!("{:#?}", error);
        std::process::exit(1);
    }
}

async fn default_config() -> Result<()> {
    println!("{}", Config::EXAMPLE);
    Ok(())
}

fn load_secret(password: Option<String>, config: PathBuf) -> Result<(Config, Secret)> {
    let mut config = Config::from_file(config)?;

    if password.is_some() {
        tracing::info!("using password from environment or command line parameter");
    }
    config.secret.password = password;

    let secret = Secret::new(config.secret.clone()).context("Cannot retrieve the node's secret")?;

    Ok((config, secret))
}

async fn peer_address(password: Option<String>, config: PathBuf) -> Result<()> {
    let (config, secret) = load_secret(password, config)?;

    let address = config
        .network
        .listen_address
        .without_public_key()
        .with_public_key(secret.public());

    println!("{}", address);

    Ok(())
}

async fn list_peers(password: Option<String>, config: PathBuf, peer: PeerAddress) -> Result<()> {
    let (config, secret) = load_secret(password, config)?;

    let mut transport = TcpTransport::new().with_config(config.network.transport());
    if config.network.secure_channel {
        let secure = SecureChannel::new(secret.into_secret_key());
        transport = transport.with_upgrade(Upgrade::SecureChannel(Arc::new(secure)));
    }

    let mut connection = transport
        .dial(&peer)
        .await
        .with_context(|| format!("Cannot connect to {}", peer))?;
    println!("connected ({})", connection.resolution());

    let addresses = peers::request_peers(&mut connection).await?;
    connection.close().await?;

    for address in addresses {
        println!("{}", address);
    }

    Ok(())
}

async fn generate_new_key(entropy_output: Option<PathBuf>, password: Option<String>) -> Result<()> {
    println!("Generating new entropy to use as part of the seed for the new key");
    let entropy = Entropy::generate(rand::thread_rng());

    let entropy_output = if let Some(entropy_output) = entropy_output {
        entropy_output
    } else {
        let s: String = dialoguer::Input::new()
            .with_prompt("Output file to store the entropy")
            .allow_empty(false)
            .with_initial_text("entropy.txt")
            .interact_text()
            .context("Failed to confirm entropy output file")?;
        PathBuf::from(s)
    };
    tracing::info!(file = ?entropy_output, "writing entropy in file");
    std::fs::write(&entropy_output, entropy.to_string())
        .with_context(|| format!("Cannot write entropy to file: {}", entropy_output.display()))?;

    let password = if let Some(password) = password {
        tracing::info!("using password from environment or command line parameter");
        password
    } else {
        dialoguer::Password::new()
            .with_confirmation(
                "Confirm new password",
                "Password mismatched, put your game together",
            )
            .allow_empty_password(false)
            .with_prompt("Enter new password")
            .interact()
            .context("Failed to confirm new password")?
    };

    println!("Generating new key... this may take some times...");

    let instant = std::time::Instant::now();
    let key: ed25519::SecretKey = entropy.derive_secret_key(&password);
    let elapsed = instant.elapsed().as_millis();
    tracing::info!(elapsed = %elapsed, "new key derived");

    println!("New private key generated successfully");
    println!("Public Identity: {}", key.public_key());

    Ok(())
}
