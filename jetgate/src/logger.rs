//! Logger initialization.

use std::{str::FromStr, sync::Once};

use logforth::{append::Stderr, filter::EnvFilter};

static INIT: Once = Once::new();

/// Initialize the stderr logger with the given filter string, e.g. "info"
/// or "llm=debug,config=debug". Subsequent calls are no-ops.
pub(crate) fn init(log_filter: &str) {
    let log_filter = log_filter.to_owned();

    INIT.call_once(move || {
        logforth::builder()
            .dispatch(move |dispatch| {
                let filter = EnvFilter::from_str(&log_filter).unwrap_or_else(|_| {
                    EnvFilter::from_str("info").expect("default filter should be valid")
                });

                dispatch.filter(filter).append(Stderr::default())
            })
            .apply();
    });
}
