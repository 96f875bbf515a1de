use std::sync::Once;

static INIT: Once = Once::new();

/// Install a tracing subscriber for test debugging. Safe to call from
/// every test; only the first call wins.
pub fn trace_init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
