/*!
# Strand network stack

peers open [`Connection`]s to each other through a [`Transport`]. Before
any application data, both ends of a stream negotiate the [`Upgrades`]
they have in common:

1. the dialer sends its [`NegotiationEnvelope`] (see [`negotiate`]);
2. the listener replies with its own envelope;
3. both sides keep the upgrades they have in common. If the
   [`SecureChannel`] is one of them the peers exchange their public
   identities and run a [Noise Protocol IK] handshake authenticated with
   these identities. Every frame is then encrypted and authenticated.

Without any upgrade in common the connection is _bare_: the stream is
used as is.

```no_run
# use std::sync::Arc;
# use strand_network::{SecureChannel, TcpTransport, Transport as _, Upgrade};
# async fn example(secret: keynesis::key::ed25519::SecretKey) -> Result<(), Box<dyn std::error::Error>> {
let secure = Arc::new(SecureChannel::new(secret));
let transport = TcpTransport::new().with_upgrade(Upgrade::SecureChannel(secure));

let address = "/ip4/127.0.0.1/tcp/9001".parse()?;
let mut connection = transport.dial(&address).await?;
connection.write_object(&"hello").await?;
connection.close().await?;
# Ok(())
# }
```

[Noise Protocol IK]: https://noiseexplorer.com/patterns/IK/
*/

mod connection;
mod envelope;
mod error;
pub mod negotiate;
mod secure;
mod transport;
mod upgrade;
mod wire;

pub use self::{
    connection::Connection,
    envelope::{ChannelMaterial, NegotiationEnvelope, UpgradeDescriptor},
    error::{ConnectionError, NegotiationError, RegistryError, SealingError, TransportError},
    negotiate::Resolution,
    secure::{codec::MAX_SEALED_PAYLOAD, ChannelDirection, ChannelKey, SecureChannel},
    transport::{Config, Listening, TcpTransport, Transport},
    upgrade::{Upgrade, UpgradeKind, Upgrades},
    wire::AsyncStream,
};
