use anyhow::{Context as _, Result};
use keynesis::key::ed25519::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strand_lib::Entropy;
use structopt::StructOpt;

/// the node's identity
pub struct Secret {
    secret: SecretKey,
    public: PublicKey,
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize, Deserialize, StructOpt)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// path to the entropy file
    ///
    #[structopt(
        long = "entropy",
        default_value = "entropy.txt",
        env = "STRANDD_ENTROPY_FILE"
    )]
    #[serde(default = "default_entropy")]
    pub entropy: PathBuf,

    /// password to derive the entropy to the private key
    ///
    /// if not set, the service will ask for it
    #[structopt(long = "password", env = "STRANDD_PASSWORD", hide_env_values = true)]
    #[serde(skip)]
    #[serde(default)]
    pub password: Option<String>,
}

impl Secret {
    pub fn new(config: Config) -> Result<Self> {
        let entropy: Entropy = std::fs::read_to_string(&config.entropy)
            .with_context(|| format!("Cannot open the entropy file {}", config.entropy.display()))?
            .parse()
            .with_context(|| {
                format!(
                    "Cannot parse the entropy file: {}",
                    config.entropy.display()
                )
            })?;

        let password = if let Some(password) = config.password {
            password
        } else {
            dialoguer::Password::new()
                .allow_empty_password(true)
                .with_prompt("Enter the secret key password")
                .interact()
                .context("Cannot retrieve the entropy password")?
        };

        let secret = entropy.derive_secret_key(&password);
        let public = secret.public_key();
        tracing::info!(public = %public, "secret loaded");

        Ok(Self { secret, public })
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn into_secret_key(self) -> SecretKey {
        self.secret
    }
}

fn default_entropy() -> PathBuf {
    PathBuf::from("entropy.txt")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            entropy: default_entropy(),
            password: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaChaRng;
    use rand_core::SeedableRng as _;

    #[test]
    fn load_from_entropy_file() {
        let entropy = Entropy::generate(ChaChaRng::seed_from_u64(42));
        let path = std::env::temp_dir().join(format!("strandd-entropy-{}.txt", std::process::id()));
        std::fs::write(&path, format!("{}\n", entropy)).unwrap();

        let secret = Secret::new(Config {
            entropy: path.clone(),
            password: Some("password".to_owned()),
        })
        .unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(
            secret.public(),
            &entropy.derive_secret_key("password").public_key()
        );
    }

    #[test]
    fn missing_entropy_file() {
        let result = Secret::new(Config {
            entropy: PathBuf::from("/this/entropy/file/does/not/exist"),
            password: Some("password".to_owned()),
        });

        assert!(result.is_err());
    }
}
