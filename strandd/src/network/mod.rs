pub mod config;

pub use self::config::Config;
use crate::{
    peers::{self, Peerstore},
    secret::Secret,
};
use anyhow::{Context as _, Result};
use keynesis::key::ed25519::PublicKey;
use std::sync::Arc;
use strand_lib::PeerAddress;
use strand_network::{Listening, SecureChannel, TcpTransport, Upgrade};

/// the node's network: the transport to dial the other peers, the
/// listener serving their requests and the peerstore
pub struct Network {
    transport: TcpTransport,
    listening: Listening,
    peers: Arc<Peerstore>,
    public_address: PeerAddress,
}

impl Network {
    pub async fn new(secret: Secret, config: Config) -> Result<Self> {
        let id: PublicKey = *secret.public();

        let mut transport = TcpTransport::new().with_config(config.transport());
        if config.secure_channel {
            let secure = SecureChannel::new(secret.into_secret_key());
            transport = transport.with_upgrade(Upgrade::SecureChannel(Arc::new(secure)));
        } else {
            tracing::warn!("secure channel disabled, the connections will not be encrypted");
        }

        let peers = Arc::new(Peerstore::new());

        let listening = {
            let peers = Arc::clone(&peers);
            transport
                .listen(&config.listen_address, move |connection| {
                    let peers = Arc::clone(&peers);
                    async move {
                        if let Err(error) = peers::serve(&peers, connection).await {
                            tracing::warn!(reason = %error, "Cannot serve inbound peer");
                        }
                    }
                })
                .await
                .with_context(|| format!("Cannot listen to {}", config.listen_address))?
        };

        let public_address = PeerAddress::tcp(listening.local_address()).with_public_key(&id);
        tracing::info!(public_address = %public_address, "network started");

        Ok(Self {
            transport,
            listening,
            peers,
            public_address,
        })
    }

    /// the address the other peers can dial us at
    pub fn public_address(&self) -> &PeerAddress {
        &self.public_address
    }

    pub fn peers(&self) -> &Peerstore {
        &self.peers
    }

    /// bootstrap from every configured bootstrap peer
    ///
    /// a failing bootstrap peer is logged and skipped.
    pub async fn bootstrap(&self, config: &peers::Config) -> usize {
        let mut registered = 0;

        for bootstrap in config.bootstrap.iter() {
            match self.peers.bootstrap(&self.transport, bootstrap, config).await {
                Ok(n) => registered += n,
                Err(error) => {
                    tracing::warn!(bootstrap = %bootstrap, reason = ?error, "Cannot bootstrap")
                }
            }
        }

        tracing::info!(peers = self.peers.len(), new = registered, "bootstrap done");
        registered
    }

    pub async fn shutdown(self) {
        self.listening.close().await;
        tracing::info!("network stopped");
    }
}
