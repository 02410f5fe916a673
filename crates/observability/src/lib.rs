//! Process-wide tracing setup shared by the vault binaries.

/// Subscriber installation (filters, output format).
pub mod tracing;

pub use self::tracing::LogFormat;

/// Install the process-wide subscriber using `TRIPVAULT_LOG_FORMAT`.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(LogFormat::from_env());
}
