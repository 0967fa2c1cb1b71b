/*!
# peerstore

the connections the node opened to other peers, by address, and the
bootstrap protocol to discover the peers of a peer:

1. the node sends a `BOOTSTRAP` request to the bootstrap peer;
2. the bootstrap peer answers with the addresses of its own peerstore;
3. the node dials the addresses it does not know yet, a few at a time,
   until they are all dialed or the deadline is reached.
*/

use anyhow::{Context as _, Result};
use futures::{future, stream, StreamExt as _};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use strand_lib::PeerAddress;
use strand_network::{Connection, ConnectionError, Transport};
use structopt::StructOpt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerstoreError {
    #[error("No connection to the peer {0}")]
    NotFound(String),
}

/// objects exchanged between the nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    #[serde(rename_all = "camelCase")]
    Bootstrap {
        #[serde(default)]
        peer_addresses: Vec<PeerAddress>,
    },
}

#[derive(StructOpt, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// the peers to bootstrap from on startup
    #[structopt(long = "bootstrap")]
    #[serde(default)]
    pub bootstrap: Vec<PeerAddress>,

    /// the maximum number of peers dialed at the same time while
    /// bootstrapping
    #[structopt(long = "bootstrap-concurrency", default_value = "8")]
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// the maximum time to spend dialing the peers of a bootstrap peer
    /// (in seconds)
    #[structopt(long = "bootstrap-deadline", default_value = "60", parse(try_from_str = crate::config::duration))]
    #[serde(default = "default_deadline", with = "crate::config::seconds")]
    pub deadline: Duration,
}

/// the connections opened to the other peers
///
/// a connection has a single owner: it is taken out of the store to be used
/// and registered again afterward.
#[derive(Default)]
pub struct Peerstore {
    connections: Mutex<HashMap<String, Connection>>,
}

fn key(address: &PeerAddress) -> String {
    address.to_string()
}

impl Peerstore {
    pub fn new() -> Self {
        Self::default()
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<String, Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// register the connection, replacing any previous connection to the
    /// same address
    pub fn register(&self, address: &PeerAddress, connection: Connection) {
        if self.connections().insert(key(address), connection).is_some() {
            tracing::debug!(peer = %address, "replacing connection");
        }
    }

    pub fn contains(&self, address: &PeerAddress) -> bool {
        self.connections().contains_key(&key(address))
    }

    /// take the connection to the given peer out of the store
    pub fn take(&self, address: &PeerAddress) -> Result<Connection, PeerstoreError> {
        let key = key(address);
        self.connections()
            .remove(&key)
            .ok_or(PeerstoreError::NotFound(key))
    }

    pub fn len(&self) -> usize {
        self.connections().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections().is_empty()
    }

    pub fn addresses(&self) -> Vec<PeerAddress> {
        self.connections()
            .keys()
            .filter_map(|address| address.parse().ok())
            .collect()
    }

    /// ask the bootstrap peer for its peers and connect to them
    ///
    /// returns the number of new peers registered. Reaching the deadline is
    /// not an error: the remaining dials are cancelled and the peers already
    /// connected are kept.
    #[tracing::instrument(skip(self, dialer, config), fields(bootstrap = %bootstrap), level = "info")]
    pub async fn bootstrap(
        &self,
        dialer: &dyn Transport,
        bootstrap: &PeerAddress,
        config: &Config,
    ) -> Result<usize> {
        let mut connection = match self.take(bootstrap) {
            Ok(connection) => connection,
            Err(_) => dialer
                .dial(bootstrap)
                .await
                .with_context(|| format!("Cannot connect to the bootstrap peer {}", bootstrap))?,
        };

        let addresses = request_peers(&mut connection)
            .await
            .with_context(|| format!("Cannot bootstrap from {}", bootstrap))?;
        self.register(bootstrap, connection);

        let addresses: Vec<PeerAddress> = addresses
            .into_iter()
            .filter(|address| address != bootstrap && !self.contains(address))
            .collect();
        tracing::info!(peers = addresses.len(), "dialing the bootstrap peer's peers");

        Ok(self
            .dial_all(dialer, addresses, config.concurrency, config.deadline)
            .await)
    }

    async fn dial_all(
        &self,
        dialer: &dyn Transport,
        addresses: Vec<PeerAddress>,
        concurrency: usize,
        deadline: Duration,
    ) -> usize {
        let mut registered = 0;

        let dials = stream::iter(addresses)
            .map(|address| async move {
                let result = dialer.dial(&address).await;
                (address, result)
            })
            .buffer_unordered(concurrency.max(1))
            .for_each(|(address, result)| {
                match result {
                    Ok(connection) => {
                        self.register(&address, connection);
                        registered += 1;
                    }
                    Err(error) => {
                        tracing::warn!(peer = %address, reason = %error, "Cannot connect to peer")
                    }
                }
                future::ready(())
            });

        if tokio::time::timeout(deadline, dials).await.is_err() {
            tracing::warn!("bootstrap deadline reached, cancelling the remaining dials");
        }

        registered
    }
}

/// send a bootstrap request and wait for the answer
pub async fn request_peers(connection: &mut Connection) -> Result<Vec<PeerAddress>> {
    connection
        .write_object(&Message::Bootstrap {
            peer_addresses: Vec::new(),
        })
        .await
        .context("Cannot send the bootstrap request")?;

    match connection
        .read_object::<Message>()
        .await
        .context("Cannot read the bootstrap response")?
    {
        Message::Bootstrap { peer_addresses } => Ok(peer_addresses),
    }
}

/// answer the requests of the remote peer until it closes the connection
pub async fn serve(peers: &Peerstore, mut connection: Connection) -> Result<(), ConnectionError> {
    loop {
        let message = match connection.read_object::<Message>().await {
            Ok(message) => message,
            Err(ConnectionError::Io(error)) if error.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(error) => return Err(error),
        };

        match message {
            Message::Bootstrap { .. } => {
                let peer_addresses = peers.addresses();
                tracing::debug!(peers = peer_addresses.len(), "answering bootstrap request");
                connection
                    .write_object(&Message::Bootstrap { peer_addresses })
                    .await?;
            }
        }
    }

    connection.close().await
}

fn default_concurrency() -> usize {
    8
}

fn default_deadline() -> Duration {
    Duration::from_secs(60)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bootstrap: Vec::new(),
            concurrency: default_concurrency(),
            deadline: default_deadline(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::{BoxFuture, FutureExt as _};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use strand_network::TransportError;

    /// answers every dial with an in memory connection served by `peers`,
    /// except the ports listed in `hang` that never connect
    struct Fake {
        peers: Arc<Peerstore>,
        hang: Vec<u16>,
        dialed: AtomicUsize,
    }

    impl Fake {
        fn new(peers: Arc<Peerstore>, hang: Vec<u16>) -> Self {
            Self {
                peers,
                hang,
                dialed: AtomicUsize::new(0),
            }
        }
    }

    impl Transport for Fake {
        fn name(&self) -> &str {
            "fake"
        }

        fn dial<'a>(
            &'a self,
            address: &'a PeerAddress,
        ) -> BoxFuture<'a, Result<Connection, TransportError>> {
            async move {
                self.dialed.fetch_add(1, Ordering::SeqCst);
                if self.hang.contains(&address.port()) {
                    future::pending::<()>().await;
                }

                let (a, b) = tokio::io::duplex(64 * 1024);
                let peers = Arc::clone(&self.peers);
                tokio::spawn(async move {
                    let _ = serve(&peers, Connection::bare(b, None)).await;
                });
                Ok(Connection::bare(a, Some(address.socket_addr())))
            }
            .boxed()
        }

        fn append_fallback(&mut self, _: Box<dyn Transport>) {}
    }

    fn address(port: u16) -> PeerAddress {
        format!("/ip4/127.0.0.1/tcp/{}", port).parse().unwrap()
    }

    fn connection() -> Connection {
        let (a, _) = tokio::io::duplex(64);
        Connection::bare(a, None)
    }

    /// a peerstore knowing the given ports
    fn knowing(ports: &[u16]) -> Arc<Peerstore> {
        let peers = Arc::new(Peerstore::new());
        for port in ports {
            peers.register(&address(*port), connection());
        }
        peers
    }

    #[tokio::test]
    async fn register_take() {
        let peers = Peerstore::new();
        assert!(peers.is_empty());

        peers.register(&address(1), connection());
        assert!(peers.contains(&address(1)));
        assert_eq!(peers.addresses(), vec![address(1)]);

        peers.take(&address(1)).unwrap();
        assert!(!peers.contains(&address(1)));
        assert!(matches!(
            peers.take(&address(1)),
            Err(PeerstoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn bootstrap_dials_the_peers_of_the_bootstrap_peer() {
        let remote = knowing(&[2, 3, 4]);
        let dialer = Fake::new(remote, Vec::new());
        let peers = Peerstore::new();
        peers.register(&address(3), connection());

        let registered = peers
            .bootstrap(&dialer, &address(1), &Config::default())
            .await
            .unwrap();

        assert_eq!(registered, 2);
        assert_eq!(peers.len(), 4);
        for port in 1..=4 {
            assert!(peers.contains(&address(port)));
        }
        // the bootstrap peer, 2 and 4
        assert_eq!(dialer.dialed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn bootstrap_reuses_the_cached_connection() {
        let remote = knowing(&[2]);
        let dialer = Fake::new(Arc::clone(&remote), Vec::new());
        let peers = Peerstore::new();
        peers.register(&address(1), dialer.dial(&address(1)).await.unwrap());

        peers
            .bootstrap(&dialer, &address(1), &Config::default())
            .await
            .unwrap();

        // 1 before bootstrapping and 2
        assert_eq!(dialer.dialed.load(Ordering::SeqCst), 2);
        assert!(peers.contains(&address(2)));
    }

    #[tokio::test]
    async fn bootstrap_deadline_keeps_the_connected_peers() {
        let remote = knowing(&[2, 3, 4]);
        let dialer = Fake::new(remote, vec![3]);
        let peers = Peerstore::new();
        let config = Config {
            bootstrap: Vec::new(),
            concurrency: 2,
            deadline: Duration::from_millis(200),
        };

        let registered = peers
            .bootstrap(&dialer, &address(1), &config)
            .await
            .unwrap();

        assert_eq!(registered, 2);
        assert!(peers.contains(&address(2)));
        assert!(!peers.contains(&address(3)));
        assert!(peers.contains(&address(4)));
    }

    #[test]
    fn message_wire_shape() {
        let message = Message::Bootstrap {
            peer_addresses: vec![address(9001)],
        };
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["type"], "BOOTSTRAP");
        assert_eq!(json["peerAddresses"][0], "/ip4/127.0.0.1/tcp/9001");
    }
}
