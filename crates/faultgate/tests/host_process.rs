//! End-to-end tests against the `faultgate-host` binary.
//!
//! Each test runs the host in a child process, delivers one signal kind and
//! checks the exit status and the ordered markers the host, the faultgate
//! handlers and the pre-installed "host" handlers write to stderr.

use std::os::unix::process::ExitStatusExt;
use std::process::Output;
use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const HOST_TERM_MARKER: &str = "host: previous SIGTERM handler invoked";

fn host() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("faultgate-host"));
    cmd.env_remove("FAULTGATE_FAULT_LOG")
        .env_remove("FAULTGATE_BACKTRACE_DEPTH")
        .env("RUST_LOG", "off")
        .timeout(Duration::from_secs(30));
    cmd
}

fn run(args: &[&str]) -> Output {
    host().args(args).output().expect("failed to run faultgate-host")
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn position(haystack: &str, needle: &str) -> usize {
    haystack
        .find(needle)
        .unwrap_or_else(|| panic!("{:?} not found in:\n{}", needle, haystack))
}

#[test]
fn term_after_startup_releases_gate_and_tears_down() {
    let output = run(&["--host-handler", "--raise", "term"]);
    let stderr = stderr_of(&output);

    assert_eq!(output.status.code(), Some(0), "{}", stderr);
    assert_eq!(stderr.matches(HOST_TERM_MARKER).count(), 1);
    assert!(stderr.contains("main: replication stopped=true stop_requests=1"));
    assert!(!stderr.contains("released twice"));

    let announced = position(&stderr, "SIGTERM received, shutting down");
    let chained = position(&stderr, HOST_TERM_MARKER);
    let released = position(&stderr, "main: shutdown gate released");
    let teardown = position(&stderr, "main: teardown complete");
    assert!(announced < chained);
    assert!(chained < released);
    assert!(released < teardown);
}

#[test]
fn repeated_term_releases_gate_once() {
    let output = run(&["--raise", "term", "--repeat", "2"]);
    let stderr = stderr_of(&output);

    assert_eq!(output.status.code(), Some(0), "{}", stderr);
    assert_eq!(stderr.matches("main: shutdown gate released").count(), 1);
    assert!(stderr.contains("shutdown already in progress, ignoring SIGTERM"));
    assert!(!stderr.contains("released twice"));
}

#[test]
fn early_interrupt_exits_zero_without_teardown() {
    host()
        .args(["--early", "--host-handler", "--raise", "int"])
        .assert()
        .code(0)
        .stderr(predicate::str::contains("SIGINT received, shutting down"))
        .stderr(predicate::str::contains(
            "host: previous SIGINT handler invoked",
        ))
        .stderr(predicate::str::contains(
            "startup was not complete, exiting immediately",
        ))
        .stderr(predicate::str::contains("gate released").not())
        .stderr(predicate::str::contains("teardown complete").not());
}

#[test]
fn early_terminate_without_previous_handler_exits_zero() {
    host()
        .args(["--early", "--raise", "term"])
        .assert()
        .code(0)
        .stderr(predicate::str::contains(
            "startup was not complete, exiting immediately",
        ))
        .stderr(predicate::str::contains("teardown complete").not());
}

#[test]
fn segfault_reports_backtrace_then_chains_then_exits() {
    let output = run(&["--host-handler", "--raise", "segv"]);
    let stderr = stderr_of(&output);

    assert_eq!(output.status.code(), Some(255), "{}", stderr);
    let announced = position(&stderr, "SIGSEGV received, aborting");
    let first_frame = position(&stderr, "stacktrace: frame 0: ");
    let chained = position(&stderr, "host: previous SIGSEGV handler invoked");
    assert!(announced < first_frame);
    assert!(first_frame < chained);
    assert!(!stderr.contains("still running"));
}

#[test]
fn segfault_exits_with_distinct_status_without_host_handler() {
    host()
        .args(["--raise", "segv"])
        .assert()
        .code(255)
        .stderr(predicate::str::contains("SIGSEGV received, aborting"));
}

#[test]
fn backtrace_depth_is_configurable() {
    let output = host()
        .env("FAULTGATE_BACKTRACE_DEPTH", "2")
        .args(["--raise", "segv"])
        .output()
        .unwrap();
    let stderr = stderr_of(&output);

    assert!(stderr.contains("stacktrace: frame 1: "), "{}", stderr);
    assert!(!stderr.contains("stacktrace: frame 2: "));
}

#[test]
fn segfault_on_worker_thread_reports_backtrace_and_exits() {
    let output = run(&["--host-handler", "--raise", "segv", "--from-thread"]);
    let stderr = stderr_of(&output);

    assert_eq!(output.status.code(), Some(255), "{}", stderr);
    let raised = position(&stderr, "worker: raising SIGSEGV");
    let announced = position(&stderr, "SIGSEGV received, aborting");
    let first_frame = position(&stderr, "stacktrace: frame 0: ");
    let chained = position(&stderr, "host: previous SIGSEGV handler invoked");
    assert!(raised < announced);
    assert!(announced < first_frame);
    assert!(first_frame < chained);
    assert_eq!(stderr.matches("SIGSEGV received").count(), 1);
    assert!(!stderr.contains("still running"));
}

#[test]
fn bus_error_on_worker_thread_exits_with_bus_status() {
    let output = run(&["--raise", "bus", "--from-thread"]);
    let stderr = stderr_of(&output);

    assert_eq!(output.status.code(), Some(128 + libc::SIGBUS), "{}", stderr);
    assert!(stderr.contains("stacktrace: frame 0: "));
    assert!(!stderr.contains("SIGSEGV"));
}

#[test]
fn abort_on_worker_thread_terminates_by_signal() {
    let output = run(&["--raise", "abrt", "--from-thread"]);
    let stderr = stderr_of(&output);

    assert_eq!(output.status.signal(), Some(libc::SIGABRT), "{}", stderr);
    assert!(stderr.contains("stacktrace: frame 0: "));
    assert!(!stderr.contains("SIGSEGV"));
}

#[test]
fn crash_report_starts_below_the_reporting_path() {
    let output = run(&["--raise", "segv"]);
    let stderr = stderr_of(&output);

    assert_eq!(output.status.code(), Some(255), "{}", stderr);
    let frames: Vec<&str> = stderr
        .lines()
        .filter(|line| line.contains("stacktrace: frame "))
        .collect();
    assert!(!frames.is_empty(), "{}", stderr);
    for frame in frames {
        assert!(!frame.contains("backtrace::"), "{}", frame);
        assert!(!frame.contains("faultgate::diagnostics"), "{}", frame);
    }
}

#[test]
fn abort_chains_to_previous_handler_before_terminating() {
    let output = run(&["--host-handler", "--raise", "abrt"]);
    let stderr = stderr_of(&output);

    assert_eq!(output.status.signal(), Some(libc::SIGABRT), "{}", stderr);
    let announced = position(&stderr, "SIGABRT received, aborting");
    let first_frame = position(&stderr, "stacktrace: frame 0: ");
    let chained = position(&stderr, "host: previous SIGABRT handler invoked");
    assert!(announced < first_frame);
    assert!(first_frame < chained);
}

#[test]
fn abort_with_default_disposition_terminates_by_signal() {
    let output = run(&["--raise", "abrt"]);

    assert_eq!(output.status.signal(), Some(libc::SIGABRT));
    assert!(stderr_of(&output).contains("SIGABRT received, aborting"));
}

#[test]
fn floating_point_exception_relies_on_default_action() {
    let output = run(&["--raise", "fpe"]);
    let stderr = stderr_of(&output);

    assert_eq!(output.status.signal(), Some(libc::SIGFPE), "{}", stderr);
    assert!(stderr.contains("SIGFPE received, aborting"));
    assert!(stderr.contains("stacktrace: frame 0: "));
    assert!(!stderr.contains("still running"));
}

#[test]
fn bus_error_chains_flushes_and_exits() {
    let output = run(&["--host-handler", "--raise", "bus"]);
    let stderr = stderr_of(&output);

    assert_eq!(output.status.code(), Some(128 + libc::SIGBUS), "{}", stderr);
    let first_frame = position(&stderr, "stacktrace: frame 0: ");
    let chained = position(&stderr, "host: previous SIGBUS handler invoked");
    assert!(first_frame < chained);
    assert!(!stderr.contains("still running"));
}

#[test]
fn hangup_chains_before_rolling_log() {
    let output = run(&["--host-handler", "--raise", "hup"]);
    let stderr = stderr_of(&output);

    assert_eq!(output.status.code(), Some(0), "{}", stderr);
    let chained = position(&stderr, "host: previous SIGHUP handler invoked");
    let rolled = position(&stderr, "SIGHUP received, rolling log");
    let resumed = position(&stderr, "main: still running after SIGHUP");
    assert!(chained < rolled);
    assert!(rolled < resumed);
    assert!(!stderr.contains("gate released"));
}

#[test]
fn tracing_sink_carries_fault_records() {
    let output = host()
        .env("RUST_LOG", "info")
        .args(["--tracing-sink", "--host-handler", "--raise", "hup"])
        .output()
        .unwrap();
    let stderr = stderr_of(&output);

    assert_eq!(output.status.code(), Some(0), "{}", stderr);
    let rolled = position(&stderr, "SIGHUP received, rolling log");
    let requested = position(&stderr, "log rotation requested");
    let resumed = position(&stderr, "main: still running after SIGHUP");
    assert!(rolled < requested);
    assert!(requested < resumed);
    assert!(stderr.lines().any(|line| line.contains("INFO") && line.contains("rolling log")));
}

#[test]
fn broken_pipe_surfaces_as_write_error() {
    host()
        .arg("--probe-pipe")
        .assert()
        .success()
        .stderr(predicate::str::contains("pipe: write failed: BrokenPipe"));
}

#[test]
fn fault_log_receives_crash_report() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fault.log");

    let output = host()
        .env("FAULTGATE_FAULT_LOG", &path)
        .args(["--raise", "segv"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(255));
    let log = std::fs::read_to_string(&path).unwrap();
    assert!(log.contains("WARN (signal): SIGSEGV received, aborting"));
    assert!(log.contains("stacktrace: frame 0: "));
}

#[test]
fn unwritable_fault_log_fails_setup_with_suggestion() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing").join("fault.log");

    host()
        .env("FAULTGATE_FAULT_LOG", &path)
        .assert()
        .code(74)
        .stderr(predicate::str::contains("Failed to open fault log"))
        .stderr(predicate::str::contains("FAULTGATE_FAULT_LOG"));
}
