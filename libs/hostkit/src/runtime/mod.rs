mod host;
mod signals;
mod state;

pub use host::{ExitCallback, ServiceExit, ServiceHost, ShutdownSignal};
pub use signals::{hook_signals, wait_for_signal};
pub use state::ServiceState;
