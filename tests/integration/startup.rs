// tests/integration/startup.rs

use std::io::Write;
use std::sync::Arc;

use tempfile::NamedTempFile;

use monitord::check_log_path;
use monitord::config::load_and_validate;
use monitord::errors::MonitordError;
use monitord::fs::{FileSystem, RealFileSystem};
use monitord::recovery::{PID_FILE, PidFile};
use monitord::types::{EXIT_ALREADY_RUNNING, EXIT_FAILURE};

#[test]
fn second_instance_on_the_same_run_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let path = dir.path().join(PID_FILE);
    std::fs::write(&path, "999999\n").unwrap();

    let err = PidFile::acquire(fs.clone(), &path, std::process::id(), false, |_| true).unwrap_err();
    match err.downcast_ref::<MonitordError>() {
        Some(e @ MonitordError::AlreadyRunning { pid: 999999 }) => assert_eq!(e.exit_code(), EXIT_ALREADY_RUNNING),
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }

    // --force takes over, and the file goes away with the guard.
    let guard = PidFile::acquire(fs, &path, std::process::id(), true, |_| true).unwrap();
    assert_eq!(
        std::fs::read_to_string(&path).unwrap().trim(),
        std::process::id().to_string()
    );
    drop(guard);
    assert!(!path.exists());
}

#[test]
fn log_argument_is_checked_before_anything_runs() {
    let dir = tempfile::tempdir().unwrap();
    let err = check_log_path(&dir.path().join("nope/wf.dag.dagman.out")).unwrap_err();
    let code = err.downcast_ref::<MonitordError>().map(MonitordError::exit_code);
    assert_eq!(code, Some(EXIT_FAILURE));
}

#[test]
fn backoff_table_must_not_shrink() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[scheduler]
backoff = [[5, 10], [50, 5]]
"#
    )
    .unwrap();

    match load_and_validate(file.path()) {
        Err(MonitordError::ConfigError(msg)) => assert!(msg.contains("backoff")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn tuning_file_overrides_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[tailer]
chunk_size = 1024
appear_retries = 7

[output]
max_output_length = 100
"#
    )
    .unwrap();

    let config = load_and_validate(file.path()).unwrap();
    assert_eq!(config.tailer.chunk_size, 1024);
    assert_eq!(config.tailer.appear_retries, 7);
    assert_eq!(config.tailer.stale_polls, 17280);
    assert_eq!(config.output.max_output_length, 100);
}
