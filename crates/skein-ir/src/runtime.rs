//! Names the runtime library contributes to every program.

/// Runtime method that reports a violated property.
pub const SIGNAL_FAILURE: &str = "signalFailure";
/// Runtime method blocking the calling script for a number of seconds.
pub const WAIT_SECONDS: &str = "waitSeconds";
/// Runtime method returning the global clock in microseconds.
pub const MICROS: &str = "micros";

/// Global variable holding the current time in microseconds.
pub const GLOBAL_TIME_MICROS_VAR: &str = "__global_time_micros";
/// Per-script variable holding the time a `waitSeconds` call ends.
pub const WAIT_UNTIL_MICROS_VAR: &str = "__wait_until_micros";

/// Namespace of messages without an explicit one.
pub const DEFAULT_MESSAGE_NAMESPACE: &str = "app";
/// Namespace of messages emitted by the runtime itself.
pub const SYSTEM_MESSAGE_NAMESPACE: &str = "system";
/// Broadcast (and waited for) once all bootstrap scripts have run.
pub const BOOTSTRAP_FINISHED_MESSAGE: &str = "__BOOTSTRAP_FINISHED";

pub const MICROS_PER_SECOND: i64 = 1_000_000;
