/*!
Transports to reach the other peers

[`TcpTransport`] is the only stream transport implemented here. It dials
and accepts the `tcp` addresses and delegates any other address to its
chain of fallback [`Transport`]s.
*/

use crate::{
    error::{NegotiationError, TransportError},
    negotiate, Connection, Upgrade, Upgrades,
};
use futures::future::{BoxFuture, FutureExt as _};
use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};
use strand_lib::PeerAddress;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::JoinHandle,
    time::timeout,
};
use tracing_futures::Instrument as _;

/// pause after a failure to accept an inbound stream (too many opened
/// files for example) before accepting again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// a way to open a [`Connection`] to a peer
pub trait Transport: Send + Sync {
    /// name of the transport, for the logs
    fn name(&self) -> &str;

    /// open a connection with the peer at the given address
    ///
    /// addresses this transport does not handle are delegated to the
    /// fallback chain, unchanged.
    fn dial<'a>(
        &'a self,
        address: &'a PeerAddress,
    ) -> BoxFuture<'a, Result<Connection, TransportError>>;

    /// append the transport at the end of the fallback chain
    fn append_fallback(&mut self, fallback: Box<dyn Transport>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// maximum time to open the TCP stream
    pub dial_timeout: Duration,
    /// maximum time to exchange the negotiation envelopes and to establish
    /// the secure channel, for both the dialed and the accepted streams
    pub negotiation_timeout: Duration,
}

pub struct TcpTransport {
    upgrades: Upgrades,
    fallback: Option<Box<dyn Transport>>,
    config: Config,
}

/// handle on the accept loop of [`TcpTransport::listen`]
///
/// dropping the handle closes the listener too.
pub struct Listening {
    local_address: SocketAddr,
    close: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(10),
            negotiation_timeout: Duration::from_secs(10),
        }
    }
}

impl TcpTransport {
    pub const NAME: &'static str = "tcp";

    pub fn new() -> Self {
        Self {
            upgrades: Upgrades::new(),
            fallback: None,
            config: Config::default(),
        }
    }

    /// add an upgrade to offer to the peers
    ///
    /// an upgrade of the same kind already registered is replaced, keeping
    /// its position in the offer.
    pub fn with_upgrade(mut self, upgrade: Upgrade) -> Self {
        self.upgrades.insert(upgrade);
        self
    }

    pub fn with_fallback(mut self, fallback: Box<dyn Transport>) -> Self {
        self.append_fallback(fallback);
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn upgrades(&self) -> &Upgrades {
        &self.upgrades
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn connect(&self, address: &PeerAddress) -> Result<Connection, TransportError> {
        if address.transport() != PeerAddress::TCP {
            return match &self.fallback {
                Some(fallback) => {
                    tracing::debug!(fallback = fallback.name(), "delegating to the fallback transport");
                    fallback.dial(address).await
                }
                None => Err(TransportError::UnsupportedTransport(
                    address.transport().to_owned(),
                )),
            };
        }

        let expected = address.public_key()?;
        let remote = address.socket_addr();

        let stream = timeout(self.config.dial_timeout, TcpStream::connect(remote))
            .await
            .map_err(|_| TransportError::Timeout(remote))?
            .map_err(|source| TransportError::Connect {
                address: remote,
                source,
            })?;

        let connection = timeout(
            self.config.negotiation_timeout,
            negotiate::dial(stream, &self.upgrades, remote, expected),
        )
        .await
        .unwrap_or(Err(NegotiationError::Timeout))
        .map_err(|source| TransportError::Negotiation {
            address: remote,
            source,
        })?;

        tracing::info!(resolution = %connection.resolution(), "connected");

        Ok(connection)
    }

    /// listen for inbound connections on the address' host and port
    ///
    /// every accepted stream is negotiated in its own task and handed to
    /// `on_connection`. A failure to negotiate is logged and only affects
    /// that stream.
    pub async fn listen<F, Fut>(
        &self,
        address: &PeerAddress,
        on_connection: F,
    ) -> Result<Listening, TransportError>
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if address.transport() != PeerAddress::TCP {
            return Err(TransportError::UnsupportedTransport(
                address.transport().to_owned(),
            ));
        }

        let bind = address.socket_addr();
        let listener = TcpListener::bind(bind)
            .await
            .map_err(|source| TransportError::Bind {
                address: bind,
                source,
            })?;
        let local_address = listener
            .local_addr()
            .map_err(|source| TransportError::Bind {
                address: bind,
                source,
            })?;

        tracing::info!(listen_address = %local_address, "listening for inbound connections");

        let (close, closed) = oneshot::channel();
        let accept_loop = AcceptLoop {
            listener,
            upgrades: self.upgrades.clone(),
            config: self.config,
            on_connection: Arc::new(on_connection),
        };
        let handle = tokio::spawn(
            accept_loop
                .run(closed)
                .instrument(tracing::info_span!("listen", address = %local_address)),
        );

        Ok(Listening {
            local_address,
            close,
            handle,
        })
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for TcpTransport {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn dial<'a>(
        &'a self,
        address: &'a PeerAddress,
    ) -> BoxFuture<'a, Result<Connection, TransportError>> {
        self.connect(address)
            .instrument(tracing::debug_span!("dial", peer = %address))
            .boxed()
    }

    fn append_fallback(&mut self, fallback: Box<dyn Transport>) {
        match &mut self.fallback {
            Some(chain) => chain.append_fallback(fallback),
            None => self.fallback = Some(fallback),
        }
    }
}

struct AcceptLoop<F> {
    listener: TcpListener,
    upgrades: Upgrades,
    config: Config,
    on_connection: Arc<F>,
}

impl<F, Fut> AcceptLoop<F>
where
    F: Fn(Connection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn run(self, mut closed: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                _ = &mut closed => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => self.spawn(stream, remote),
                    Err(error) => {
                        tracing::warn!(reason = %error, "cannot accept inbound connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        tracing::info!("stopped listening");
    }

    fn spawn(&self, stream: TcpStream, remote: SocketAddr) {
        let upgrades = self.upgrades.clone();
        let negotiation_timeout = self.config.negotiation_timeout;
        let on_connection = Arc::clone(&self.on_connection);

        let _ = tokio::spawn(
            async move {
                let negotiated = timeout(
                    negotiation_timeout,
                    negotiate::accept(stream, &upgrades, remote),
                )
                .await
                .unwrap_or(Err(NegotiationError::Timeout));

                match negotiated {
                    Ok(connection) => {
                        tracing::info!(resolution = %connection.resolution(), "accepted");
                        on_connection(connection).await
                    }
                    Err(error) => {
                        tracing::warn!(reason = %error, "cannot negotiate with inbound peer")
                    }
                }
            }
            .instrument(tracing::info_span!("accept", peer = %remote)),
        );
    }
}

impl Listening {
    /// the address the listener is bound to
    ///
    /// useful when listening on the port `0`.
    pub fn local_address(&self) -> SocketAddr {
        self.local_address
    }

    /// stop accepting inbound connections and close the listening socket
    ///
    /// the connections already accepted are not affected.
    pub async fn close(self) {
        let Self { close, handle, .. } = self;

        let _ = close.send(());
        if let Err(error) = handle.await {
            tracing::warn!(reason = %error, "accept loop did not stop cleanly");
        }
    }
}
