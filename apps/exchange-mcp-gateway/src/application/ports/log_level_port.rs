//! Log Level Port (Driven Port)
//!
//! Lets the configuration service change the verbosity of the running
//! logging backend.

use crate::domain::settings::LogLevel;

/// Applies a log level to the live logging backend.
pub trait LogLevelControl: Send + Sync {
    /// Apply the level.
    ///
    /// # Errors
    ///
    /// Returns a description of why the backend refused the level.
    fn apply(&self, level: LogLevel) -> Result<(), String>;
}

/// Control that accepts every level and changes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpLogLevelControl;

impl LogLevelControl for NoOpLogLevelControl {
    fn apply(&self, _level: LogLevel) -> Result<(), String> {
        Ok(())
    }
}
