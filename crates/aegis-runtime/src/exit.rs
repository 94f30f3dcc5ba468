//! Process exit codes, significant to the service manager.

/// Exit codes understood by the process-manager integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Graceful shutdown.
    Success,
    /// Recoverable failure, restart allowed.
    Recoverable,
    /// CRITICAL / deadlock detected, restart required.
    Critical,
    /// Configuration error, do not restart.
    ConfigError,
}

impl ExitCode {
    pub fn code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Recoverable => 2,
            Self::Critical => 10,
            Self::ConfigError => 77,
        }
    }
}

/// Process termination seam.
///
/// The watchdog and reaper terminate the process out-of-band; tests inject
/// a recording fake instead.
pub trait Exiter: Send + Sync + 'static {
    fn exit(&self, code: ExitCode);
}

/// Real process exit.
#[derive(Debug, Default)]
pub struct ProcessExiter;

impl Exiter for ProcessExiter {
    fn exit(&self, code: ExitCode) {
        std::process::exit(code.code());
    }
}
