/*!
# DER encoding of the peer's public identity

Peers are identified by an ed25519 public key. On the wire (in the
[`PeerAddress`] public key segment and in the channel material of the
negotiation) the key is encoded as a DER `SubjectPublicKeyInfo`:

```text
SEQUENCE {
  SEQUENCE { OBJECT IDENTIFIER 1.3.101.112 (Ed25519) }
  BIT STRING (32 bytes of public key)
}
```

[`PeerAddress`]: crate::PeerAddress
*/

use keynesis::key::ed25519::PublicKey;
use std::str::FromStr as _;
use thiserror::Error;

/// the fixed prefix of a DER encoded Ed25519 `SubjectPublicKeyInfo`
const DER_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

const RAW_PUBLIC_KEY_SIZE: usize = 32;

/// size in bytes of the DER encoded public key
pub const DER_PUBLIC_KEY_SIZE: usize = DER_PREFIX.len() + RAW_PUBLIC_KEY_SIZE;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum KeyDecodingError {
    #[error("Invalid hexadecimal encoding")]
    Hex(#[from] hex::FromHexError),

    #[error("Invalid DER length, expected {expected} bytes but received {received}")]
    InvalidLength { expected: usize, received: usize },

    #[error("Not a DER encoded Ed25519 public key")]
    InvalidDer,

    #[error("Invalid Ed25519 public key")]
    InvalidKey,
}

/// encode the public key as a DER `SubjectPublicKeyInfo`
pub fn encode_public_key(key: &PublicKey) -> Vec<u8> {
    let mut der = Vec::with_capacity(DER_PUBLIC_KEY_SIZE);
    der.extend_from_slice(&DER_PREFIX);
    der.extend_from_slice(key.as_ref());
    der
}

/// decode a DER `SubjectPublicKeyInfo` into an ed25519 public key
pub fn decode_public_key(der: &[u8]) -> Result<PublicKey, KeyDecodingError> {
    if der.len() != DER_PUBLIC_KEY_SIZE {
        return Err(KeyDecodingError::InvalidLength {
            expected: DER_PUBLIC_KEY_SIZE,
            received: der.len(),
        });
    }

    let (prefix, raw) = der.split_at(DER_PREFIX.len());
    if prefix != DER_PREFIX {
        return Err(KeyDecodingError::InvalidDer);
    }

    PublicKey::from_str(&hex::encode(raw)).map_err(|_| KeyDecodingError::InvalidKey)
}
