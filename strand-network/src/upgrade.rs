use crate::{
    envelope::{NegotiationEnvelope, UpgradeDescriptor},
    SecureChannel,
};
use indexmap::IndexMap;
use std::{fmt, str::FromStr, sync::Arc};

/// the closed set of upgrades this implementation knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UpgradeKind {
    SecureChannel,
}

/// an upgrade instance that can be layered on top of a raw stream
#[derive(Debug, Clone)]
pub enum Upgrade {
    SecureChannel(Arc<SecureChannel>),
}

/// the ordered set of upgrades of a transport
///
/// there is at most one upgrade per [`UpgradeKind`]; the order is the
/// order of the first registration of each kind and is the order the
/// upgrades are offered in during the negotiation.
#[derive(Debug, Clone, Default)]
pub struct Upgrades(IndexMap<UpgradeKind, Upgrade>);

impl UpgradeKind {
    pub const fn tag(self) -> &'static str {
        match self {
            Self::SecureChannel => "SECURE_CHANNEL",
        }
    }

    /// returns `None` for tags unknown to this implementation
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "SECURE_CHANNEL" => Some(Self::SecureChannel),
            _ => None,
        }
    }
}

impl Upgrade {
    pub fn kind(&self) -> UpgradeKind {
        match self {
            Self::SecureChannel(_) => UpgradeKind::SecureChannel,
        }
    }
}

impl Upgrades {
    pub fn new() -> Self {
        Self::default()
    }

    /// add the upgrade, replacing any previous upgrade of the same kind
    pub fn insert(&mut self, upgrade: Upgrade) -> Option<Upgrade> {
        self.0.insert(upgrade.kind(), upgrade)
    }

    pub fn get(&self, kind: UpgradeKind) -> Option<&Upgrade> {
        self.0.get(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = UpgradeKind> + '_ {
        self.0.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn secure_channel(&self) -> Option<&Arc<SecureChannel>> {
        match self.get(UpgradeKind::SecureChannel)? {
            Upgrade::SecureChannel(channel) => Some(channel),
        }
    }

    /// the envelope offering these upgrades to the remote peer
    pub(crate) fn envelope(&self) -> NegotiationEnvelope {
        NegotiationEnvelope {
            offered_upgrades: self.kinds().map(UpgradeDescriptor::from).collect(),
            channel_material: self.secure_channel().map(|channel| channel.material()),
        }
    }

    /// the upgrades offered by the remote peer that we support too
    ///
    /// keeps the local order. Tags unknown to this implementation are
    /// ignored.
    pub(crate) fn intersect(&self, offered: &[UpgradeDescriptor]) -> Vec<UpgradeKind> {
        self.kinds()
            .filter(|kind| offered.iter().any(|offer| offer.kind() == Some(*kind)))
            .collect()
    }
}

impl fmt::Display for UpgradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for UpgradeKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(s).ok_or_else(|| format!("Unknown upgrade {:?}", s))
    }
}

impl From<Upgrade> for Upgrades {
    fn from(upgrade: Upgrade) -> Self {
        let mut upgrades = Self::new();
        upgrades.insert(upgrade);
        upgrades
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secure::tests::secret;

    fn secure(seed: u64) -> Upgrade {
        Upgrade::SecureChannel(Arc::new(SecureChannel::new(secret(seed))))
    }

    fn offer(tags: &[&str]) -> Vec<UpgradeDescriptor> {
        tags.iter().map(|tag| UpgradeDescriptor::new(*tag)).collect()
    }

    #[test]
    fn replacing_an_upgrade_keeps_one_per_kind() {
        let mut upgrades = Upgrades::new();
        assert!(upgrades.insert(secure(1)).is_none());
        assert!(upgrades.insert(secure(2)).is_some());

        assert_eq!(upgrades.len(), 1);
        assert_eq!(
            upgrades.secure_channel().unwrap().public_identity(),
            &secret(2).public_key()
        );
    }

    #[test]
    fn intersection() {
        let upgrades = Upgrades::from(secure(1));

        assert_eq!(
            upgrades.intersect(&offer(&["SECURE_CHANNEL"])),
            vec![UpgradeKind::SecureChannel]
        );
        assert!(upgrades.intersect(&offer(&[])).is_empty());
        assert!(Upgrades::new()
            .intersect(&offer(&["SECURE_CHANNEL"]))
            .is_empty());
    }

    #[test]
    fn unknown_tags_are_ignored() {
        let upgrades = Upgrades::from(secure(1));

        assert_eq!(
            upgrades.intersect(&offer(&["COMPRESSION", "SECURE_CHANNEL", "MPLEX"])),
            vec![UpgradeKind::SecureChannel]
        );
        assert!(upgrades.intersect(&offer(&["secure_channel"])).is_empty());
    }

    #[test]
    fn envelope_carries_material_when_secure() {
        let envelope = Upgrades::from(secure(1)).envelope();
        assert_eq!(envelope.offered_upgrades, offer(&["SECURE_CHANNEL"]));
        assert_eq!(
            envelope.channel_material.unwrap().public_key().unwrap(),
            secret(1).public_key()
        );

        let envelope = Upgrades::new().envelope();
        assert!(envelope.offered_upgrades.is_empty());
        assert!(envelope.channel_material.is_none());
    }
}
