//! Logging setup shared by the binaries.
//!
//! Modules pull the log macros in through [`prelude`] so the whole crate
//! logs through one facade.

use std::io::IsTerminal;

use time::macros::format_description;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub mod prelude {
    pub use ::tracing::{debug, error, info, trace, warn};
}

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber.
///
/// Logs go to the systemd journal when the process runs as a service
/// (stdout is wired to the journal), and to stdout with a local-time
/// timestamp otherwise.
pub fn init_journald_or_stdout() {
    let under_journal =
        std::env::var_os("JOURNAL_STREAM").is_some() && !std::io::stdout().is_terminal();

    if under_journal {
        match tracing_journald::layer() {
            Ok(journald) => {
                tracing_subscriber::registry()
                    .with(env_filter())
                    .with(journald)
                    .init();
                return;
            }
            Err(e) => {
                eprintln!("journald unavailable ({e}), logging to stdout");
            }
        }
    }

    let timer = fmt::time::LocalTime::new(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    ));

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_timer(timer))
        .init();
}
