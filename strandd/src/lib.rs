mod config;
pub mod network;
pub mod peers;
pub mod secret;

pub use self::config::Config;
