/*!
# Strand core types

value types shared by the network stack and the node:

* [`PeerAddress`]: the structured `/ip4/127.0.0.1/tcp/9001/<key>` address
  of a peer;
* [`identity`]: the DER encoding of the peer's ed25519 public identity;
* [`Entropy`]: the random seed the node's identity is derived from.
*/

#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

mod address;
mod entropy;
pub mod identity;

pub use self::{
    address::{AddressError, Family, PeerAddress},
    entropy::Entropy,
};
