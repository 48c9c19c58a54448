//! `tracing` subscriber setup.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter used when `RUST_LOG` is not set. Validation output arrives under
/// the `vulkan` target and is already filtered by the messenger.
pub const DEFAULT_FILTER: &str =
    "info,vkloop=debug,vkloop_rhi=debug,vkloop_renderer=debug,vulkan=trace";

/// Installs a `tracing-subscriber` registry: `RUST_LOG` (else
/// [`DEFAULT_FILTER`]) plus a fmt layer printing targets and thread ids.
///
/// # Example
/// ```
/// vkloop_core::init_logging();
/// tracing::info!("Renderer initialized");
/// ```
pub fn init_logging() {
    init_logging_with(DEFAULT_FILTER);
}

/// Like [`init_logging`] with another fallback filter. `RUST_LOG` still
/// wins, and only the first call in a process installs anything.
pub fn init_logging_with(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();

    if result.is_err() {
        tracing::debug!("Subscriber already installed");
    }
}
