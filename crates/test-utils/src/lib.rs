// crates/test-utils/src/lib.rs

//! Fixtures shared by the `monitord` test suites: engine log lines with
//! deterministic timestamps and on-disk run directories.

pub mod log_line;
pub mod run_dir;

pub use log_line::LogLine;
pub use run_dir::{RunDir, RunDirBuilder};

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Upper bound for any single async test.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Route `tracing` output into the test harness capture.
///
/// The filter comes from `MONITORD_LOG`, falling back to `RUST_LOG` and
/// then `monitord=debug`. Safe to call from every test.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("MONITORD_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("monitord=debug"));

        fmt().with_env_filter(filter).with_test_writer().with_target(false).init();
    });
}

/// Await `fut`, failing the test if it takes longer than [`TEST_TIMEOUT`].
pub async fn with_timeout<F, T>(fut: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(TEST_TIMEOUT, fut).await {
        Ok(value) => value,
        Err(_) => panic!("test did not finish within {TEST_TIMEOUT:?}"),
    }
}
