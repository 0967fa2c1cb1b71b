/*!
# negotiation envelope

first frame sent on every stream, by both sides, before any other data:

```json
{
  "tag": "NEGOTIATION",
  "offeredUpgrades": [ { "tag": "SECURE_CHANNEL" } ],
  "channelMaterial": "302a300506032b6570032100..."
}
```

`channelMaterial` is the hex encoded DER public identity of the sender, it
is `null` if the sender does not offer the secure channel.
*/

use crate::UpgradeKind;
use keynesis::key::ed25519::PublicKey;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use strand_lib::identity::{self, KeyDecodingError};

/// control frames exchanged on a stream before the application data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tag")]
pub(crate) enum Frame {
    #[serde(rename = "NEGOTIATION")]
    Negotiation(NegotiationEnvelope),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationEnvelope {
    pub offered_upgrades: Vec<UpgradeDescriptor>,
    #[serde(default)]
    pub channel_material: Option<ChannelMaterial>,
}

/// an upgrade as offered on the wire
///
/// the tag is kept as a string so that peers offering upgrades we do not
/// know about can still be understood.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpgradeDescriptor {
    tag: String,
}

/// opaque key material exchanged during the negotiation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelMaterial(Vec<u8>);

impl Frame {
    pub(crate) fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl UpgradeDescriptor {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// `None` if the tag is not known to this implementation
    pub fn kind(&self) -> Option<UpgradeKind> {
        UpgradeKind::from_tag(&self.tag)
    }
}

impl From<UpgradeKind> for UpgradeDescriptor {
    fn from(kind: UpgradeKind) -> Self {
        Self::new(kind.tag())
    }
}

impl ChannelMaterial {
    pub fn from_public_key(key: &PublicKey) -> Self {
        Self(identity::encode_public_key(key))
    }

    pub fn public_key(&self) -> Result<PublicKey, KeyDecodingError> {
        identity::decode_public_key(&self.0)
    }
}

impl AsRef<[u8]> for ChannelMaterial {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl From<ChannelMaterial> for String {
    fn from(material: ChannelMaterial) -> Self {
        hex::encode(material.0)
    }
}

impl TryFrom<String> for ChannelMaterial {
    type Error = hex::FromHexError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        hex::decode(value).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secure::tests::secret;

    #[test]
    fn wire_shape() {
        let key = secret(1).public_key();
        let frame = Frame::Negotiation(NegotiationEnvelope {
            offered_upgrades: vec![UpgradeKind::SecureChannel.into()],
            channel_material: Some(ChannelMaterial::from_public_key(&key)),
        });

        let json: serde_json::Value = serde_json::from_slice(&frame.encode().unwrap()).unwrap();

        assert_eq!(json["tag"], "NEGOTIATION");
        assert_eq!(json["offeredUpgrades"][0]["tag"], "SECURE_CHANNEL");
        assert_eq!(
            json["channelMaterial"],
            hex::encode(identity::encode_public_key(&key))
        );
    }

    #[test]
    fn decode_without_material() {
        let frame =
            Frame::decode(br#"{"tag":"NEGOTIATION","offeredUpgrades":[{"tag":"FUTURE"}]}"#)
                .unwrap();
        let Frame::Negotiation(envelope) = frame;

        assert_eq!(envelope.offered_upgrades, vec![UpgradeDescriptor::new("FUTURE")]);
        assert_eq!(envelope.offered_upgrades[0].kind(), None);
        assert!(envelope.channel_material.is_none());
    }

    #[test]
    fn application_objects_are_not_envelopes() {
        assert!(Frame::decode(br#"{"tag":"HELLO","offeredUpgrades":[]}"#).is_err());
        assert!(Frame::decode(br#"{"greeting":"hello"}"#).is_err());
        assert!(Frame::decode(b"\"hello\"").is_err());
        assert!(Frame::decode(b"not json").is_err());
    }
}
