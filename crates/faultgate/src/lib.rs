//! Fault and shutdown signal handling for long-running servers.
//!
//! [`install_all`] takes over SIGINT, SIGTERM, SIGSEGV, SIGABRT, SIGFPE,
//! SIGBUS and SIGHUP, remembers whatever handler was there before so it can
//! be chained, and sets SIGPIPE to ignore. Fatal signals are reported with
//! a bounded backtrace; graceful signals open the [`ShutdownGate`] the main
//! thread parks on, or exit immediately while startup is still running.

#![deny(clippy::all)]

mod config;
mod context;
mod diagnostics;
mod dispatch;
mod error;
mod previous;
mod registry;
mod replication;
mod shutdown;
mod signal;
mod sink;
pub mod telemetry;

pub use config::FaultConfig;
pub use context::BuildIdentity;
pub use context::SignalContext;
pub use context::SignalContextBuilder;
pub use context::COMPONENT;
pub use diagnostics::capture_and_report;
pub use diagnostics::MAX_BACKTRACE_DEPTH;
pub use dispatch::bus_exit_status;
pub use dispatch::handle;
pub use dispatch::Outcome;
pub use dispatch::SEGV_EXIT_STATUS;
pub use error::FaultError;
pub use previous::InfoHandler;
pub use previous::PlainHandler;
pub use previous::PreviousHandler;
pub use previous::RawSignal;
pub use registry::install_all;
pub use registry::installed;
pub use registry::mark_startup_complete;
pub use replication::NoopReplication;
pub use replication::Replication;
pub use replication::ReplicationFlags;
pub use shutdown::Phase;
pub use shutdown::Release;
pub use shutdown::ShutdownGate;
pub use signal::SignalClass;
pub use signal::SignalKind;
pub use sink::FaultSink;
pub use sink::FdSink;
pub use sink::TracingSink;

pub type Result<T> = std::result::Result<T, FaultError>;
