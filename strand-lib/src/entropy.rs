use keynesis::{key::ed25519::SecretKey, memsec::Scrubbed as _, Seed};
use rand_core::{CryptoRng, RngCore};
use std::{
    convert::TryFrom,
    fmt::{self, Formatter},
    str::FromStr,
};

/// 64 random bytes from which the node's identity is derived
///
/// The entropy alone is not enough to recover the identity: the secret
/// key is derived from the entropy and a password (see
/// [`Entropy::derive_secret_key`]). The entropy is stored hex encoded in a
/// file so the same identity (and the same peer address public key
/// segment) survives restarts.
#[derive(Clone, PartialEq, Eq)]
pub struct Entropy([u8; Self::SIZE]);

impl Entropy {
    pub const SIZE: usize = 64;

    pub fn generate<RNG>(mut rng: RNG) -> Self
    where
        RNG: RngCore + CryptoRng,
    {
        let mut entropy = Self([0; Self::SIZE]);

        rng.fill_bytes(&mut entropy.0);

        entropy
    }

    /// derive the identity's secret key
    ///
    /// this is deterministic: the same entropy and password always
    /// produce the same key. The derivation is purposely slow.
    pub fn derive_secret_key(self, password: &str) -> SecretKey {
        let seed = Seed::derive_from_key(self, password);

        SecretKey::new(&mut seed.into_rand_chacha())
    }
}

impl Drop for Entropy {
    fn drop(&mut self) {
        self.0.scrub()
    }
}

impl AsRef<[u8]> for Entropy {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl fmt::Display for Entropy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl fmt::Debug for Entropy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Entropy").field(&"..").finish()
    }
}

impl FromStr for Entropy {
    type Err = hex::FromHexError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.trim())
    }
}

impl<'a> TryFrom<&'a str> for Entropy {
    type Error = hex::FromHexError;
    fn try_from(value: &'a str) -> Result<Self, Self::Error> {
        let mut entropy = Entropy([0; Self::SIZE]);

        hex::decode_to_slice(value, &mut entropy.0)?;

        Ok(entropy)
    }
}
