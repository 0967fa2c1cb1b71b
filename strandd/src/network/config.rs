use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};
use strand_lib::PeerAddress;
use structopt::StructOpt;

/// network configuration of the node
///
/// set the different values that controls the nodes behavior
#[derive(StructOpt, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// this is the address the network will listen for incoming
    /// connections
    ///
    /// the public key segment, if any, is ignored: the node always
    /// advertises its own identity.
    #[structopt(long = "listen-address", default_value = "/ip4/127.0.0.1/tcp/9876")]
    #[serde(default = "default_listen_address")]
    pub listen_address: PeerAddress,

    /// maximum time to open a stream to a peer (in seconds)
    #[structopt(long = "dial-timeout", default_value = "10", parse(try_from_str = crate::config::duration))]
    #[serde(default = "default_timeout", with = "crate::config::seconds")]
    pub dial_timeout: Duration,

    /// maximum time to negotiate the upgrades with a peer and to
    /// establish the secure channel (in seconds)
    #[structopt(long = "negotiation-timeout", default_value = "10", parse(try_from_str = crate::config::duration))]
    #[serde(default = "default_timeout", with = "crate::config::seconds")]
    pub negotiation_timeout: Duration,

    /// offer the secure channel to the peers
    ///
    /// without the secure channel the connections are bare: unencrypted
    /// and unauthenticated.
    #[structopt(skip = true)]
    #[serde(default = "default_secure_channel")]
    pub secure_channel: bool,
}

fn default_listen_address() -> PeerAddress {
    PeerAddress::tcp(SocketAddr::from(([127, 0, 0, 1], 9876)))
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_secure_channel() -> bool {
    true
}

impl Config {
    pub fn transport(&self) -> strand_network::Config {
        strand_network::Config {
            dial_timeout: self.dial_timeout,
            negotiation_timeout: self.negotiation_timeout,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            dial_timeout: default_timeout(),
            negotiation_timeout: default_timeout(),
            secure_channel: default_secure_channel(),
        }
    }
}
