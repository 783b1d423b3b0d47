//! # portprobe - TCP connectivity probing
//!
//! portprobe answers one question: which ports in an inclusive range accept a
//! TCP connection on a host? It can answer it with several interchangeable
//! concurrency strategies, and every strategy gives the same answer for the
//! same target state.
//!
//! ## Strategies
//!
//! - **Sequential**: one probe at a time
//! - **Threads**: one OS thread per port
//! - **Processes**: one child process per port
//! - **Pool**: a bounded worker pool, outcomes consumed as they complete
//! - **Nonblocking**: non-blocking sockets behind one `poll(2)` wait
//! - **Cooperative** / **Structured**: single-threaded async tasks
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use portprobe::scanner::{scan, StrategyKind};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), portprobe::ScanError> {
//!     let open = scan("127.0.0.1", 1, 1024, Duration::from_secs(1), StrategyKind::Nonblocking).await?;
//!     for port in open.iter() {
//!         println!("Port {port} is open");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`types`] - Validated ports, ranges and targets
//! - [`scanner`] - The probe engine and the `ScanStrategy` trait
//! - [`config`] - Application settings
//! - [`error`] - Error types
//! - [`output`] - Result reporting
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod error;
pub mod output;
pub mod scanner;
pub mod types;

// Re-export commonly used types
pub use error::{CliError, ScanError};
pub use scanner::{scan, OpenPortSet, ScanEngine, ScanStrategy, StrategyKind};
pub use types::{Port, PortRange, ScanTarget};
