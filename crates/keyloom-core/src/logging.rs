//! Logger initialisation shared by every KeyLoom binary.

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialise the global logger once.
///
/// `default_level` applies when `RUST_LOG` is unset; repeated calls are
/// harmless so library consumers and tests can both call it.
pub fn init(default_level: &str) {
    let filter = default_level.to_string();
    INIT.call_once(move || {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
            .format_timestamp_secs()
            .init();
    });
}
