//! Integration tests for the session lifecycle
//!
//! Ownership, teardown, signal capture and timeouts against the simulated engine.

use cprobe::safety::SessionId;
use cprobe::target::catalog::TypeCatalog;
use cprobe::target::control::ProcessControl;
use cprobe::testing::SimInferior;
use cprobe::{ProbeError, Session, SessionConfig, ValueTemplate};
use nix::sys::signal::Signal;
use std::path::Path;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn engine() -> SimInferior {
    let catalog = TypeCatalog::lp64()
        .with_struct("node", &[("value", "int"), ("next", "struct node *")])
        .unwrap();
    SimInferior::new(catalog)
        .with_libc_functions()
        .define("first_value", "int", &[("head", "struct node *")], |ctx, args| {
            let head = args[0].address()?;
            ctx.local("head", "struct node *", format!("{:#x}", head));
            let value = ctx.read_value("int", head)?;
            ctx.return_int(i128::from(value.as_i64()?))
        })
        .unwrap()
        .define("serve", "void", &[], |ctx, _| {
            ctx.spawn_thread();
            ctx.spawn_thread();
            Ok(None)
        })
        .unwrap()
        .define("wait_forever", "void", &[], |ctx, _| Err(ctx.spin()))
        .unwrap()
}

fn config(dir: &Path) -> SessionConfig {
    SessionConfig {
        crash_log_path: Some(dir.join("crash_log.txt")),
        stdout_path: dir.join("stdout.txt"),
        stderr_path: dir.join("stderr.txt"),
        ..SessionConfig::for_program("./student")
    }
}

#[test]
fn test_control_lock_is_exclusive() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::new(engine(), config(dir.path()));
    session.start().unwrap();
    assert!(session.is_active());

    let lock = session.engine().control_lock();
    assert!(lock.is_held_by(session.id()));
    let intruder = lock.try_acquire(SessionId::new());
    assert!(matches!(intruder, Err(ProbeError::Usage(_))));
    assert_eq!(lock.contentions(), 1);

    session.finish().unwrap();
    assert!(!session.is_active());
    assert_eq!(lock.owner(), None);
    assert!(matches!(
        session.value("int", 1),
        Err(ProbeError::Usage(_))
    ));
}

#[test]
fn test_launch_request_carries_output_and_environment() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.args = vec!["--fast".to_string()];
    cfg.asan_detect_leaks = true;
    cfg.environment.push(("LC_ALL".to_string(), "C".to_string()));
    let mut session = Session::new(engine(), cfg);
    session.start().unwrap();

    let request = session.engine().launch_request().unwrap().clone();
    assert_eq!(request.args, vec!["--fast"]);
    assert_eq!(request.stdout, Some(dir.path().join("stdout.txt")));
    assert!(request
        .environment
        .contains(&("ASAN_OPTIONS".to_string(), "log_path=asan_log:detect_leaks=1".to_string())));
    assert!(request
        .environment
        .contains(&("LC_ALL".to_string(), "C".to_string())));
    session.finish().unwrap();
}

#[test]
fn test_free_all_leaves_no_residual_allocations() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::new(engine(), config(dir.path()));
    session.start().unwrap();
    let before = session.engine().live_blocks();

    session
        .value(
            "struct node *",
            ValueTemplate::fields([
                ("value", ValueTemplate::int(1)),
                (
                    "next",
                    ValueTemplate::fields([
                        ("value", ValueTemplate::int(2)),
                        ("next", ValueTemplate::null()),
                    ]),
                ),
            ]),
        )
        .unwrap();
    session.string_allocated("label").unwrap();
    assert_eq!(session.marshalled_allocations(), 3);

    let report = session.free_all().unwrap();
    assert_eq!(report.released.len(), 3);
    assert!(report.is_clean());
    assert_eq!(session.marshalled_allocations(), 0);
    assert_eq!(session.engine().live_blocks(), before);
    assert_eq!(session.allocated_size(), 0);

    let again = session.free_all().unwrap();
    assert!(again.released.is_empty());
    session.finish().unwrap();
}

#[test]
fn test_keep_allocations_when_free_on_finish_is_off() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let cfg = SessionConfig {
        free_on_finish: false,
        ..config(dir.path())
    };
    let mut session = Session::new(engine(), cfg);
    session.start().unwrap();
    session.allocate("int", 3).unwrap();
    let report = session.finish().unwrap();
    assert!(report.released.is_empty());
    assert_eq!(session.engine().live_blocks(), 1);
}

#[test]
fn test_fault_signal_produces_crash_report() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::new(engine(), config(dir.path()));
    session.start().unwrap();

    let null = session.null_pointer("struct node").unwrap();
    let err = session.call("first_value", &[null.into()]).unwrap_err();
    let ProbeError::TargetSignal { signal, report } = err else {
        panic!("expected the call to stop on a signal");
    };
    assert_eq!(signal, Signal::SIGSEGV);
    assert_eq!(report.faulting_function(), Some("first_value"));
    assert_eq!(report.locals[0].name, "head");

    let written = std::fs::read_to_string(dir.path().join("crash_log.txt")).unwrap();
    assert!(written.starts_with("ERROR: Program received signal SIGSEGV"));
    assert!(written.contains("head = (struct node *) 0x0"));
    assert_eq!(session.last_crash(), Some(report.as_ref()));

    // teardown still works on a stopped target
    session.finish().unwrap();
}

#[test]
fn test_abort_from_double_free() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::new(engine(), config(dir.path()));
    session.start().unwrap();
    let block = session.allocate("long", 0).unwrap();
    session.call("free", &[block.clone().into()]).unwrap();
    let err = session.call("free", &[block.into()]).unwrap_err();
    assert!(matches!(
        err,
        ProbeError::TargetSignal {
            signal: Signal::SIGABRT,
            ..
        }
    ));
    assert_eq!(i32::from(&err), 3);
    session.finish().unwrap();
}

#[test]
fn test_timeout() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let cfg = SessionConfig {
        timeout_secs: 2,
        ..config(dir.path())
    };
    let mut session = Session::new(engine(), cfg);
    session.start().unwrap();
    assert_eq!(session.engine().pending_alarm(), Some(2));

    let err = session.call("wait_forever", &[]).unwrap_err();
    assert!(matches!(err, ProbeError::Timeout(_)));
    assert_eq!(i32::from(&err), 2);
    assert!(!dir.path().join("crash_log.txt").exists());
    session.finish().unwrap();
}

#[test]
fn test_thread_count() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::new(engine(), config(dir.path()));
    session.start().unwrap();
    assert_eq!(session.thread_count().unwrap(), 1);
    session.call("serve", &[]).unwrap();
    assert_eq!(session.thread_count().unwrap(), 3);
    session.finish().unwrap();
}

#[test]
fn test_invalid_config_is_rejected_before_launch() {
    init_logging();
    let mut session = Session::new(engine(), SessionConfig::default());
    let err = session.start().unwrap_err();
    assert!(matches!(err, ProbeError::Config(_)));
    assert!(!session.engine().is_running());
    assert_eq!(session.engine().control_lock().owner(), None);
}

#[test]
fn test_call_arity_is_checked() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::new(engine(), config(dir.path()));
    session.start().unwrap();
    let err = session.call("first_value", &[]).unwrap_err();
    assert!(matches!(err, ProbeError::Usage(_)));
    session.finish().unwrap();
}

#[test]
fn test_session_config_from_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cprobe.json");
    std::fs::write(
        &path,
        r#"{"program": "./student", "timeout_secs": 5, "free_on_finish": false}"#,
    )
    .unwrap();
    let cfg = SessionConfig::load_from_file(&path).unwrap();
    assert_eq!(cfg.timeout_secs, 5);
    assert!(!cfg.free_on_finish);
    assert_eq!(cfg.dealloc_function, "free");
}
