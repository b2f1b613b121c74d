//! Helpers shared by the workspace test suites.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]

use observability_deps::tracing;
use std::sync::Once;
use tracing_subscriber::{fmt, EnvFilter};

static LOG_SETUP: Once = Once::new();

/// Install a tracing subscriber honoring `RUST_LOG`, once per process.
/// Call at the top of a test to see its log output; a no-op when `RUST_LOG`
/// is unset.
pub fn maybe_start_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        start_logging();
    }
}

/// Install the subscriber unconditionally (still once per process).
pub fn start_logging() {
    LOG_SETUP.call_once(|| {
        tracing_log::LogTracer::init().expect("log forwarder install");
        let subscriber = fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .finish();
        tracing::subscriber::set_global_default(subscriber).expect("subscriber install");
    });
}

/// Normalize an expected-SQL literal: collapse runs of whitespace to single
/// spaces and trim the ends. Lets tests write multi-line expected statements
/// readably.
pub fn squish_sql(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
