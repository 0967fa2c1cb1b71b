use crate::{network, peers, secret};
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use structopt::StructOpt;

#[derive(Debug, PartialEq, Eq, Clone, StructOpt, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[structopt(flatten)]
    #[serde(default)]
    pub secret: secret::Config,

    #[structopt(flatten)]
    #[serde(default)]
    pub network: network::Config,

    #[structopt(flatten)]
    #[serde(default)]
    pub peers: peers::Config,
}

impl Config {
    pub const EXAMPLE: &'static str = include_str!("config.yaml");

    pub fn from_file<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Cannot open file: {}", path.display()))?;
        serde_yaml::from_reader(file)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }
}

/// command line parser of durations in seconds
pub(crate) fn duration(s: &str) -> Result<Duration> {
    let i = s
        .parse()
        .context("expecting to parse a duration in seconds")?;
    Ok(Duration::from_secs(i))
}

/// durations in seconds in the configuration file
pub(crate) mod seconds {
    use serde::{Deserialize as _, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
