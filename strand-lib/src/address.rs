use crate::identity;
use keynesis::key::ed25519::PublicKey;
use serde::{Deserialize, Serialize};
use std::{
    convert::TryFrom,
    fmt::{self, Formatter},
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    str::FromStr,
};
use thiserror::Error;

/// errors that may occur while parsing a [`PeerAddress`]
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AddressError {
    #[error("Malformed address {0:?}, expecting /<family>/<host>/<transport>/<port>[/<key>]")]
    MalformedAddress(String),

    #[error("Invalid network family {0:?}, expecting ip4 or ip6")]
    InvalidFamily(String),

    #[error("Invalid host {host:?} for the network family {family}")]
    InvalidHost { family: Family, host: String },

    #[error("Invalid transport {0:?}, expecting 2 to 3 lowercase letters or quic")]
    InvalidTransport(String),

    #[error("Invalid port {0:?}")]
    InvalidPort(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(#[from] identity::KeyDecodingError),

    #[error("The address does not contain a public key")]
    MissingPublicKey,
}

/// network family of the host segment of the [`PeerAddress`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Family {
    Ip4,
    Ip6,
}

/// structured address of a peer
///
/// The textual form is `/<family>/<host>/<transport>/<port>[/<public key>]`,
/// for example:
///
/// ```
/// # use strand_lib::PeerAddress;
/// let address: PeerAddress = "/ip4/127.0.0.1/tcp/9001".parse().unwrap();
///
/// assert_eq!(address.transport(), "tcp");
/// assert_eq!(address.port(), 9001);
/// assert!(!address.has_public_key());
/// ```
///
/// The public key segment is the hex encoding of the DER
/// (`SubjectPublicKeyInfo`) encoded ed25519 public key of the peer. It is
/// only decoded when requested (see [`PeerAddress::public_key`]) so that
/// addresses used to listen only can be validated without a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerAddress {
    host: IpAddr,
    transport: String,
    port: u16,
    public_key: Option<String>,
}

impl Family {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ip4 => "ip4",
            Self::Ip6 => "ip6",
        }
    }

    fn parse_host(self, host: &str) -> Result<IpAddr, AddressError> {
        let parsed = match self {
            Self::Ip4 => host.parse::<Ipv4Addr>().map(IpAddr::V4).ok(),
            Self::Ip6 => host.parse::<Ipv6Addr>().map(IpAddr::V6).ok(),
        };

        // only the canonical text, so the address formats back to itself
        parsed
            .filter(|parsed| parsed.to_string() == host)
            .ok_or_else(|| AddressError::InvalidHost {
            family: self,
            host: host.to_owned(),
        })
    }
}

impl PeerAddress {
    /// the transport tag of the only stream transport implemented
    pub const TCP: &'static str = "tcp";

    /// create a new address from its components
    pub fn new(host: IpAddr, transport: &str, port: u16) -> Result<Self, AddressError> {
        if !is_valid_transport(transport) {
            return Err(AddressError::InvalidTransport(transport.to_owned()));
        }

        Ok(Self {
            host,
            transport: transport.to_owned(),
            port,
            public_key: None,
        })
    }

    /// the `tcp` address of the given socket address
    pub fn tcp(address: SocketAddr) -> Self {
        Self {
            host: address.ip(),
            transport: Self::TCP.to_owned(),
            port: address.port(),
            public_key: None,
        }
    }

    /// parse the given address
    ///
    /// The public key segment, if any, is kept as is and only decoded
    /// when calling [`PeerAddress::public_key`].
    pub fn parse(address: &str) -> Result<Self, AddressError> {
        let malformed = || AddressError::MalformedAddress(address.to_owned());

        let segments: Vec<&str> = address
            .strip_prefix('/')
            .ok_or_else(malformed)?
            .split('/')
            .collect();

        if !(segments.len() == 4 || segments.len() == 5) || segments.iter().any(|s| s.is_empty()) {
            return Err(malformed());
        }

        let family = match segments[0] {
            "ip4" => Family::Ip4,
            "ip6" => Family::Ip6,
            family => return Err(AddressError::InvalidFamily(family.to_owned())),
        };
        let host = family.parse_host(segments[1])?;

        let transport = segments[2];
        if !is_valid_transport(transport) {
            return Err(AddressError::InvalidTransport(transport.to_owned()));
        }

        let port = parse_port(segments[3])?;

        let public_key = segments.get(4).map(|key| (*key).to_owned());

        Ok(Self {
            host,
            transport: transport.to_owned(),
            port,
            public_key,
        })
    }

    /// parse the given address and decode the public key segment
    ///
    /// fails with [`AddressError::MissingPublicKey`] if there is no key
    pub fn parse_with_key(address: &str) -> Result<(Self, PublicKey), AddressError> {
        let address = Self::parse(address)?;
        let key = address
            .public_key()
            .transpose()
            .ok_or(AddressError::MissingPublicKey)??;
        Ok((address, key))
    }

    /// check the given address is valid
    ///
    /// The public key segment is not decoded.
    pub fn validate(address: &str) -> bool {
        Self::parse(address).is_ok()
    }

    pub fn family(&self) -> Family {
        match self.host {
            IpAddr::V4(_) => Family::Ip4,
            IpAddr::V6(_) => Family::Ip6,
        }
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn transport(&self) -> &str {
        &self.transport
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn has_public_key(&self) -> bool {
        self.public_key.is_some()
    }

    pub fn public_key_hex(&self) -> Option<&str> {
        self.public_key.as_deref()
    }

    /// decode the public key segment of the address
    ///
    /// returns `Ok(None)` if the address does not have a public key segment
    pub fn public_key(&self) -> Result<Option<PublicKey>, AddressError> {
        match &self.public_key {
            None => Ok(None),
            Some(key) => {
                let der = hex::decode(key).map_err(identity::KeyDecodingError::from)?;
                Ok(Some(identity::decode_public_key(&der)?))
            }
        }
    }

    /// the same address with the given public key segment
    pub fn with_public_key(&self, key: &PublicKey) -> Self {
        Self {
            public_key: Some(hex::encode(identity::encode_public_key(key))),
            ..self.clone()
        }
    }

    /// the same address stripped of its public key segment
    pub fn without_public_key(&self) -> Self {
        Self {
            public_key: None,
            ..self.clone()
        }
    }
}

fn is_valid_transport(transport: &str) -> bool {
    transport == "quic"
        || ((2..=3).contains(&transport.len())
            && transport.bytes().all(|b| b.is_ascii_lowercase()))
}

fn parse_port(port: &str) -> Result<u16, AddressError> {
    let leading_zero = port.len() > 1 && port.starts_with('0');
    if leading_zero || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AddressError::InvalidPort(port.to_owned()));
    }

    port.parse()
        .map_err(|_| AddressError::InvalidPort(port.to_owned()))
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/{}/{}/{}/{}",
            self.family(),
            self.host,
            self.transport,
            self.port
        )?;
        if let Some(key) = &self.public_key {
            write!(f, "/{}", key)?;
        }
        Ok(())
    }
}

impl FromStr for PeerAddress {
    type Err = AddressError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'a> TryFrom<&'a str> for PeerAddress {
    type Error = AddressError;
    fn try_from(value: &'a str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<String> for PeerAddress {
    type Error = AddressError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PeerAddress> for String {
    fn from(address: PeerAddress) -> Self {
        address.to_string()
    }
}
