pub mod command;
pub mod config;
pub mod connection;
pub mod packet;
pub mod registry;
pub mod roster;
pub mod scanner;

mod client;
mod diff;
mod error;
mod logger;
mod types;

pub use client::{OrkliClient, OrkliClientBuilder};
pub use config::{ControllerConfig, ReconnectConfig};
pub use connection::{ConnectionManager, ConnectionOptions, ConnectionState};
pub use error::{Error, Result};
pub use logger::MessageLogMode;
pub use packet::{FrameError, Packet};
pub use registry::{reconcile, DeviceRegistry};
pub use roster::parse_roster;
pub use scanner::FrameScanner;
pub use types::*;
