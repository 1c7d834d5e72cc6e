//! wgu control - lifecycle management for the `wgu` tunnel helper
//!
//! The helper is an external program that brings a tunnel up when run as
//! `wgu up -c <config>`, announces success by printing `ready` on stdout and
//! keeps running until it is killed. This crate owns that process on behalf of
//! an interactive client:
//!
//! - [`ProcessHandle`] spawns one helper, performs the readiness handshake
//!   and forwards its stderr line by line.
//! - [`ConnectionMachine`] serializes connect/disconnect requests onto a single
//!   background task and publishes a [`StateSnapshot`] that any thread can poll.
//!
//! # Example
//!
//! ```no_run
//! use tokio_util::sync::CancellationToken;
//! use wgu_ctl::{ConnectionMachine, ConnectionPhase, HelperConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let shutdown = CancellationToken::new();
//!     let machine = ConnectionMachine::spawn(shutdown.clone());
//!
//!     let config = HelperConfig::new("/home/me/.wgu/home.conf");
//!     machine.connect(&shutdown, config).await.unwrap();
//!
//!     // Later, from a redraw loop
//!     let state = machine.state();
//!     if state.phase == ConnectionPhase::Error {
//!         eprintln!("{}", state.last_error.unwrap());
//!     }
//!
//!     shutdown.cancel();
//!     machine.terminated().await;
//! }
//! ```

pub mod commands;
pub mod config;
mod diagnostics;
mod error;
mod machine;
pub mod supervisor;

pub use config::{DEFAULT_EXECUTABLE, DEFAULT_READY_TIMEOUT, HelperConfig, bundled_executable};
pub use diagnostics::DiagnosticLine;
pub use error::{CommandError, FailureKind, MachineError, SupervisorError};
pub use machine::{
    ConnectionMachine, ConnectionPhase, DEFAULT_DIAGNOSTIC_LINES, DEFAULT_QUEUE_CAPACITY,
    MachineOptions, StateSnapshot,
};
pub use supervisor::{ProcessHandle, READY_SIGNAL};
