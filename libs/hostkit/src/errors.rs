use std::sync::Arc;

/// Errors produced by the service host itself.
///
/// Module start failures carry the first failing module's error; everything
/// else is a registration or lifecycle misuse reported before any module is
/// touched.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("service already started; modules must be added before the first start")]
    AlreadyStarted,

    #[error("module '{0}' is already registered")]
    DuplicateModule(String),

    #[error("service is shutting down")]
    ShuttingDown,

    #[error("instance initialization failed: {0}")]
    Init(anyhow::Error),

    #[error("module '{module}' failed to start: {error}")]
    ModuleStart {
        module: String,
        error: Arc<anyhow::Error>,
    },
}
