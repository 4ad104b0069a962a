//! Stderr logging for the `nuclink` binary.
//!
//! Level comes from `--verbose` when given, otherwise from `NUCLINK_LOG`,
//! otherwise `warn`. Stdout stays reserved for `--json` output.

use flexi_logger::{Logger, LoggerHandle};

pub const LOG_ENV: &str = "NUCLINK_LOG";
const DEFAULT_LEVEL: &str = "warn";

/// Log specification for a `-v` count and an optional env override.
pub fn level_spec(verbose: u8, env: Option<&str>) -> String {
    match verbose {
        0 => env
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_LEVEL)
            .to_string(),
        1 => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Start the logger. The handle must stay alive for the process lifetime.
pub fn init_logging(verbose: u8) -> Result<LoggerHandle, String> {
    let env = std::env::var(LOG_ENV).ok();
    let spec = level_spec(verbose, env.as_deref());
    Logger::try_with_str(&spec)
        .map_err(|err| format!("invalid log level `{spec}`: {err}"))?
        .log_to_stderr()
        .format_for_stderr(flexi_logger::default_format)
        .start()
        .map_err(|err| format!("failed to start logger: {err}"))
}
