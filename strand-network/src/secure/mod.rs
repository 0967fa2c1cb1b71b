/*!
# secure channel upgrade

The secure channel holds the local identity (used for every outbound
channel, whatever the peer) and the registry of the remote peers' public
identities, keyed by their socket address. The registry is filled during the
negotiation with the peer's channel material and is used to authenticate
the [Noise **IK**] handshake that follows.

[Noise **IK**]: https://noiseexplorer.com/patterns/IK/
*/

pub(crate) mod codec;
pub(crate) mod handshake;

use crate::{envelope::ChannelMaterial, error::RegistryError};
use keynesis::key::ed25519::{PublicKey, SecretKey};
use std::{
    collections::HashMap,
    fmt,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// which side of the channel to resolve the key material for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelDirection {
    /// our own outbound channel
    Outbound,
    /// the inbound channel of the given remote peer
    InboundFor(SocketAddr),
}

/// resolved key material, see [`SecureChannel::resolve`]
#[derive(Clone)]
pub enum ChannelKey {
    Outbound(Arc<SecretKey>),
    Inbound(PublicKey),
}

/// the secure channel upgrade
///
/// this object is meant to be shared between all the connections of the
/// node (dialed or accepted). Registering and resolving the inbound
/// channels is thread safe.
pub struct SecureChannel {
    secret: Arc<SecretKey>,
    public: PublicKey,
    registry: Mutex<HashMap<SocketAddr, PublicKey>>,
}

impl SecureChannel {
    pub fn new(secret: SecretKey) -> Self {
        let public = secret.public_key();

        Self {
            secret: Arc::new(secret),
            public,
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// the public identity of the local peer
    pub fn public_identity(&self) -> &PublicKey {
        &self.public
    }

    /// the channel material we send to the remote peers during the
    /// negotiation
    pub fn material(&self) -> ChannelMaterial {
        ChannelMaterial::from_public_key(&self.public)
    }

    /// register (or replace) the inbound channel of the given peer
    ///
    /// the last registration for a given address wins.
    pub fn register_inbound(&self, peer: SocketAddr, material: PublicKey) {
        if let Some(previous) = self.registry().insert(peer, material) {
            if previous != material {
                tracing::debug!(peer = %peer, previous = %previous, "replacing inbound channel");
            }
        }
    }

    /// resolve the key material for the given direction
    pub fn resolve(&self, direction: ChannelDirection) -> Result<ChannelKey, RegistryError> {
        match direction {
            ChannelDirection::Outbound => Ok(ChannelKey::Outbound(Arc::clone(&self.secret))),
            ChannelDirection::InboundFor(peer) => self.inbound(peer).map(ChannelKey::Inbound),
        }
    }

    /// number of the registered inbound channels
    pub fn registered(&self) -> usize {
        self.registry().len()
    }

    pub(crate) fn outbound(&self) -> &SecretKey {
        &self.secret
    }

    pub(crate) fn inbound(&self, peer: SocketAddr) -> Result<PublicKey, RegistryError> {
        self.registry()
            .get(&peer)
            .copied()
            .ok_or(RegistryError::NotFound(peer))
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<SocketAddr, PublicKey>> {
        // the map is always left consistent, recover from a panicking holder
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureChannel")
            .field("id", &self.public)
            .field("registered", &self.registered())
            .finish()
    }
}

impl fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outbound(secret) => f
                .debug_tuple("Outbound")
                .field(&secret.public_key())
                .finish(),
            Self::Inbound(public) => f.debug_tuple("Inbound").field(public).finish(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand_chacha::ChaChaRng;
    use rand_core::SeedableRng as _;

    pub(crate) fn secret(seed: u64) -> SecretKey {
        SecretKey::new(&mut ChaChaRng::seed_from_u64(seed))
    }

    fn address(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn resolve_registered_inbound() {
        let channel = SecureChannel::new(secret(1));
        let peer = secret(2).public_key();

        channel.register_inbound(address(9001), peer);

        match channel.resolve(ChannelDirection::InboundFor(address(9001))) {
            Ok(ChannelKey::Inbound(key)) => assert_eq!(key, peer),
            other => panic!("unexpected resolution: {:?}", other),
        }
    }

    #[test]
    fn resolve_unregistered_inbound() {
        let channel = SecureChannel::new(secret(1));

        assert_eq!(
            channel
                .resolve(ChannelDirection::InboundFor(address(9001)))
                .unwrap_err(),
            RegistryError::NotFound(address(9001))
        );
    }

    #[test]
    fn resolve_outbound_is_own_identity() {
        let channel = SecureChannel::new(secret(1));

        match channel.resolve(ChannelDirection::Outbound) {
            Ok(ChannelKey::Outbound(key)) => {
                assert_eq!(key.public_key(), secret(1).public_key())
            }
            other => panic!("unexpected resolution: {:?}", other),
        }
        assert_eq!(
            channel.material().public_key().unwrap(),
            secret(1).public_key()
        );
    }

    #[test]
    fn last_registration_wins() {
        let channel = SecureChannel::new(secret(1));

        channel.register_inbound(address(9001), secret(2).public_key());
        channel.register_inbound(address(9001), secret(3).public_key());

        assert_eq!(channel.registered(), 1);
        assert_eq!(
            channel.inbound(address(9001)).unwrap(),
            secret(3).public_key()
        );
    }

    #[test]
    fn concurrent_registrations() {
        let channel = Arc::new(SecureChannel::new(secret(1)));
        let peer = secret(2).public_key();

        let handles: Vec<_> = (0..8u16)
            .map(|thread| {
                let channel = Arc::clone(&channel);
                std::thread::spawn(move || {
                    for i in 0..100u16 {
                        channel.register_inbound(address(thread * 100 + i), peer);
                        let _ = channel.inbound(address(i));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(channel.registered(), 800);
    }
}
