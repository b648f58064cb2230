//! hostkit — a module-lifecycle runtime for long-running RPC services.
//!
//! The runtime gives a service a disciplined startup/operation/shutdown
//! lifecycle composed of independently pluggable [`Module`]s, plus an
//! inbound middleware pipeline that injects per-request context and enforces
//! authorization before a call reaches business logic.
//!
//! A caller constructs a [`ServiceHost`], registers modules, and calls
//! `start`. Modules start concurrently; any failure triggers the shutdown
//! coordinator, which stops already-started modules and reports the failure.
//! A later `stop` (or an unhandled critical error) drives the same
//! coordinator, which records the exit reason and signals waiters.

pub mod auth;
pub mod config;
pub mod context;
pub mod contracts;
pub mod errors;
pub mod rpc;
pub mod runtime;

pub use context::RequestContext;
pub use contracts::{Module, NullInstance, ServiceInstance};
pub use errors::CoreError;
pub use runtime::{ServiceExit, ServiceHost, ServiceState, ShutdownSignal};
