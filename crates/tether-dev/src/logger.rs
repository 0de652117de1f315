//! Logging setup for dev sessions.
//!
//! Built on `tracing`. Session components log with structured fields
//! (`service`, `function_id`, `worker_id`, `addr`), so the compact formatter
//! keeps lines short while filters can still target one subsystem.
//!
//! # Example
//!
//! ```rust,no_run
//! use tether_dev::logger::{LogOptions, init_logger};
//!
//! init_logger(LogOptions::default());
//! tracing::info!(service = "dev", "starting");
//! ```

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const VERBOSE_FILTER: &str = "tether_dev=debug,tether_runtime=debug,tether_bus=debug";
const QUIET_FILTER: &str = "tether_dev=error,tether_runtime=error,tether_bus=error";
const DEFAULT_FILTER: &str = "tether_dev=info,tether_runtime=info,tether_bus=info";

/// Verbosity and color switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Debug level for tether crates (overrides `quiet`)
    pub verbose: bool,
    /// Errors only
    pub quiet: bool,
    pub no_color: bool,
}

/// Filter chosen for `options`.
///
/// Order: `verbose`, then `quiet`, then `RUST_LOG`, then info for tether
/// crates.
pub fn filter_for(options: LogOptions) -> EnvFilter {
    if options.verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else if options.quiet {
        EnvFilter::new(QUIET_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Installs the global subscriber. Call once, before anything logs.
pub fn init_logger(options: LogOptions) {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(ansi_enabled(options))
        .compact();

    tracing_subscriber::registry()
        .with(filter_for(options))
        .with(fmt_layer)
        .init();
}

/// Whether log output gets ANSI colors. `no_color` always wins.
pub fn ansi_enabled(options: LogOptions) -> bool {
    !options.no_color && should_use_colors()
}

/// Whether colored output should be enabled.
///
/// `NO_COLOR` disables and `FORCE_COLOR` forces colors; otherwise the
/// terminal decides.
pub fn should_use_colors() -> bool {
    color_choice(
        std::env::var_os("NO_COLOR").is_some(),
        std::env::var_os("FORCE_COLOR").is_some(),
        || console::Term::stderr().features().colors_supported(),
    )
}

fn color_choice(no_color: bool, force_color: bool, terminal: impl FnOnce() -> bool) -> bool {
    if no_color {
        return false;
    }
    force_color || terminal()
}
