//! Bridge from video motion detection alarms to OPC UA.
//!
//! Subscribes to the alarm events of one analytics source and exposes each
//! alarm as a read-only boolean variable of an OPC UA server. The server port
//! and the monitored source are runtime parameters; changing the port tears
//! the server down and brings up a fresh one.
//!
//! # Event Key Expressions
//!
//! Events are received from:
//! ```text
//! {prefix}/CameraApplicationPlatform/{source}/{label}
//! ```
//!
//! For example:
//! ```text
//! axis/event/CameraApplicationPlatform/VMD/Camera1ProfileANY
//! ```
//!
//! # Exposed Variables
//!
//! One boolean variable per alarm label, organized under the Objects folder,
//! with the string node id `ns=<namespace>;s=<label>`.

pub mod args;
pub mod bridge;
pub mod bus;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod nodes;
pub mod params;
pub mod runner;
pub mod server;
pub mod subscriber;

pub use args::BridgeArgs;
pub use bridge::{AlarmBridge, BridgeStats};
pub use config::VmdBridgeConfig;
pub use error::{BridgeError, Result};
pub use runner::BridgeRunner;
pub use server::{ServerManager, ServerState};
