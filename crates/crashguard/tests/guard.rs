#![cfg(unix)]

mod common;

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use common::{LogCapture, dumps_in, recorder, segfault};
use crashguard::{
    CrashGuard, FaultReport, GlobalFilter, GuardConfig, GuardResult, PassThrough, StrategyKind,
    StructuredCall,
};
use parking_lot::Mutex;

fn structured(dir: &Path) -> CrashGuard<StructuredCall> {
    CrashGuard::builder()
        .strategy(StructuredCall::new())
        .dump_dir(dir)
        .build()
}

fn read_report(path: &Path) -> FaultReport {
    let bytes = fs::read(path).unwrap();
    facet_json::from_slice(bytes.trim_ascii_end()).unwrap()
}

// ── Structured call ──────────────────────────────────────────────

#[test]
fn completed_call_returns_its_status_and_leaves_no_dump() {
    let tmp = tempfile::tempdir().unwrap();
    let (callback, seen) = recorder();
    let guard = structured(tmp.path());

    let result = guard.run_with(GuardConfig::new().with_shared_callback(callback), || 42);

    assert_eq!(result, GuardResult::Completed(42));
    assert!(seen.lock().is_empty());
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[test]
fn fault_is_dumped_reported_and_returned_as_crash() {
    let tmp = tempfile::tempdir().unwrap();
    let (callback, seen) = recorder();
    let guard = structured(tmp.path());
    let config = GuardConfig::new()
        .with_label("myapp")
        .with_shared_callback(callback);

    let result = guard.run_with(config, segfault);

    assert_eq!(result, GuardResult::CrashIntercepted);
    let dumps = dumps_in(tmp.path(), "myapp");
    assert_eq!(dumps.len(), 1);
    assert_eq!(*seen.lock(), dumps);

    let report = read_report(&dumps[0]);
    assert_eq!(report.signal, libc::SIGSEGV);
    assert_eq!(report.signal_name, "SIGSEGV");
    assert_eq!(report.fault_address, 8);
    assert_eq!(report.pid, std::process::id());
}

#[test]
fn fault_without_callback_is_logged_once_with_the_path() {
    let tmp = tempfile::tempdir().unwrap();
    let guard = structured(tmp.path());
    let logs = LogCapture::default();

    let result = logs.scoped(|| guard.run_with(GuardConfig::new().with_label("quiet"), segfault));

    assert!(result.is_crash());
    let dumps = dumps_in(tmp.path(), "quiet");
    assert_eq!(dumps.len(), 1);
    let contents = logs.contents();
    let reports: Vec<&str> = contents
        .lines()
        .filter(|line| line.contains("intercepted crash"))
        .collect();
    assert_eq!(reports.len(), 1, "{contents}");
    assert!(reports[0].contains("WARN"));
    assert!(reports[0].contains(dumps[0].to_str().unwrap()), "{contents}");
}

#[test]
fn unwritable_dump_dir_hands_the_callback_an_empty_path() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("occupied");
    fs::write(&blocker, b"").unwrap();
    let (callback, seen) = recorder();
    let guard = structured(&blocker.join("dumps"));

    let result = guard.run_with(GuardConfig::new().with_shared_callback(callback), segfault);

    assert_eq!(result, GuardResult::CrashIntercepted);
    assert_eq!(*seen.lock(), vec![PathBuf::new()]);
}

#[test]
fn failed_dump_without_callback_is_one_warning_with_the_cause() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("occupied");
    fs::write(&blocker, b"").unwrap();
    let guard = structured(&blocker.join("dumps"));
    let logs = LogCapture::default();

    let result = logs.scoped(|| guard.run_with(GuardConfig::new().with_label("lost"), segfault));

    assert!(result.is_crash());
    let contents = logs.contents();
    let warnings: Vec<&str> = contents.lines().filter(|line| line.contains("WARN")).collect();
    assert_eq!(warnings.len(), 1, "{contents}");
    assert!(warnings[0].contains("no dump written"), "{contents}");
    assert!(warnings[0].contains("create dump directory"), "{contents}");
    assert!(!warnings[0].contains("lost-"), "{contents}");
}

#[test]
fn failed_dump_with_callback_warns_once() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("occupied");
    fs::write(&blocker, b"").unwrap();
    let (callback, seen) = recorder();
    let guard = structured(&blocker.join("dumps"));
    let logs = LogCapture::default();

    logs.scoped(|| guard.run_with(GuardConfig::new().with_shared_callback(callback), segfault));

    let contents = logs.contents();
    assert_eq!(contents.lines().filter(|line| line.contains("WARN")).count(), 1, "{contents}");
    assert_eq!(*seen.lock(), vec![PathBuf::new()]);
}

#[test]
fn repeated_faults_never_share_a_dump() {
    let tmp = tempfile::tempdir().unwrap();
    let (callback, seen) = recorder();
    let guard = structured(tmp.path());
    let config = GuardConfig::new()
        .with_label("burst")
        .with_shared_callback(callback);

    for _ in 0..5 {
        assert!(guard.run_with(config.clone(), segfault).is_crash());
    }

    assert_eq!(dumps_in(tmp.path(), "burst").len(), 5);
    assert_eq!(seen.lock().len(), 5);
}

#[test]
fn guard_keeps_working_after_a_fault() {
    let tmp = tempfile::tempdir().unwrap();
    let guard = structured(tmp.path());

    assert!(guard.run_with(GuardConfig::new().with_label("again"), segfault).is_crash());
    assert_eq!(guard.run(|| 7), GuardResult::Completed(7));
}

#[test]
fn illegal_instruction_and_abort_are_intercepted() {
    let tmp = tempfile::tempdir().unwrap();
    let guard = structured(tmp.path());

    for (label, signal, name) in [
        ("ill", libc::SIGILL, "SIGILL"),
        ("abrt", libc::SIGABRT, "SIGABRT"),
        ("fpe", libc::SIGFPE, "SIGFPE"),
    ] {
        let result = guard.run_with(GuardConfig::new().with_label(label), move || {
            common::raise(signal)
        });
        assert!(result.is_crash(), "{name}");
        let dumps = dumps_in(tmp.path(), label);
        assert_eq!(dumps.len(), 1, "{name}");
        assert_eq!(read_report(&dumps[0]).signal_name, name);
    }
}

#[test]
fn stack_overflow_is_intercepted() {
    #[allow(unconditional_recursion)]
    fn recurse(depth: u64) -> u64 {
        let frame = std::hint::black_box([depth; 32]);
        recurse(depth + 1) + frame[0]
    }

    let tmp = tempfile::tempdir().unwrap();
    let guard = CrashGuard::builder()
        .strategy(StructuredCall::with_stack_size(128 * 1024))
        .dump_dir(tmp.path())
        .build();

    let result = guard.run_with(GuardConfig::new().with_label("deep"), || {
        recurse(0) as i32
    });

    assert!(result.is_crash());
    assert_eq!(dumps_in(tmp.path(), "deep").len(), 1);
}

#[test]
fn panic_is_not_a_crash_and_reaches_the_caller() {
    let tmp = tempfile::tempdir().unwrap();
    let (callback, seen) = recorder();
    let guard = structured(tmp.path());

    let caught = panic::catch_unwind(AssertUnwindSafe(|| {
        guard.run_with(GuardConfig::new().with_shared_callback(callback), || {
            panic!("boom")
        })
    }));

    let payload = caught.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));
    assert!(seen.lock().is_empty());
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[test]
fn concurrent_faults_are_attributed_to_their_own_call() {
    let tmp = tempfile::tempdir().unwrap();
    let guard = Arc::new(structured(tmp.path()));

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let guard = Arc::clone(&guard);
            thread::spawn(move || {
                let (callback, seen) = recorder();
                let label = format!("worker{i}");
                let config = GuardConfig::new()
                    .with_label(label.clone())
                    .with_shared_callback(callback);
                let result = if i % 2 == 0 {
                    guard.run_with(config, segfault)
                } else {
                    guard.run_with(config, move || i)
                };
                (i, label, result, seen.lock().clone())
            })
        })
        .collect();

    for worker in workers {
        let (i, label, result, seen) = worker.join().unwrap();
        if i % 2 == 0 {
            assert!(result.is_crash());
            assert_eq!(seen.len(), 1);
            let name = seen[0].file_name().unwrap().to_str().unwrap();
            assert!(name.starts_with(&format!("{label}-")), "{name}");
        } else {
            assert_eq!(result, GuardResult::Completed(i));
            assert!(seen.is_empty());
        }
    }
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 4);
}

#[test]
fn nested_fault_belongs_to_the_inner_call() {
    let tmp = tempfile::tempdir().unwrap();
    let guard = Arc::new(structured(tmp.path()));
    let (outer_cb, outer_seen) = recorder();
    let (inner_cb, inner_seen) = recorder();

    let inner_guard = Arc::clone(&guard);
    let result = guard.run_with(
        GuardConfig::new()
            .with_label("outer")
            .with_shared_callback(outer_cb),
        move || {
            let inner = inner_guard.run_with(
                GuardConfig::new()
                    .with_label("inner")
                    .with_shared_callback(inner_cb),
                segfault,
            );
            if inner.is_crash() { 3 } else { 0 }
        },
    );

    assert_eq!(result, GuardResult::Completed(3));
    assert!(outer_seen.lock().is_empty());
    assert_eq!(*inner_seen.lock(), dumps_in(tmp.path(), "inner"));
    assert_eq!(inner_seen.lock().len(), 1);
}

#[test]
fn free_function_uses_explicit_overrides() {
    let (callback, seen) = recorder();

    let result = crashguard::guard(Some(callback), Some("free"), || 5);

    assert_eq!(result, GuardResult::Completed(5));
    assert!(seen.lock().is_empty());
}

// ── Strategies that end the process ──────────────────────────────

#[test]
fn child_pass_through_fault() {
    let Some(dir) = common::child_dump_dir() else {
        return;
    };
    let marker = dir.join("callback-ran");
    let guard = CrashGuard::builder()
        .strategy(PassThrough)
        .dump_dir(&dir)
        .build();
    assert_eq!(guard.strategy_kind(), StrategyKind::PassThrough);

    guard.run_with(
        GuardConfig::new()
            .with_label("passthrough")
            .with_callback(move |_: &Path| {
                let _ = fs::write(&marker, b"");
            }),
        segfault,
    );
    unreachable!("pass-through fault returned");
}

#[test]
fn pass_through_fault_behaves_as_unguarded() {
    let tmp = tempfile::tempdir().unwrap();

    let output = common::run_child("child_pass_through_fault", tmp.path(), &[]);

    assert_eq!(common::terminating_signal(&output), Some(libc::SIGSEGV));
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[test]
fn child_global_filter_fault() {
    let Some(dir) = common::child_dump_dir() else {
        return;
    };
    let marker = dir.join("callback-ran");
    let guard = CrashGuard::builder()
        .strategy(GlobalFilter)
        .dump_dir(&dir)
        .build();

    guard.run_with(
        GuardConfig::new()
            .with_label("filtered")
            .with_callback(move |dump: &Path| {
                let _ = fs::write(&marker, dump.as_os_str().as_encoded_bytes());
            }),
        segfault,
    );
    unreachable!("global filter returned after a fault");
}

#[test]
fn global_filter_dumps_reports_then_terminates() {
    let tmp = tempfile::tempdir().unwrap();

    let output = common::run_child("child_global_filter_fault", tmp.path(), &[]);

    assert_eq!(
        common::terminating_signal(&output),
        Some(libc::SIGSEGV),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let dumps = dumps_in(tmp.path(), "filtered");
    assert_eq!(dumps.len(), 1);
    let reported = fs::read_to_string(tmp.path().join("callback-ran")).unwrap();
    assert_eq!(Path::new(&reported), dumps[0]);
    assert_eq!(read_report(&dumps[0]).signal_name, "SIGSEGV");
}

#[test]
fn global_filter_completed_call_returns_normally() {
    let tmp = tempfile::tempdir().unwrap();
    let guard = CrashGuard::builder()
        .strategy(GlobalFilter)
        .dump_dir(tmp.path())
        .build();

    assert_eq!(guard.run(|| 11), GuardResult::Completed(11));
    assert_eq!(guard.strategy_kind(), StrategyKind::GlobalFilter);
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[test]
fn global_filter_regions_take_turns() {
    let tmp = tempfile::tempdir().unwrap();
    let guard = Arc::new(
        CrashGuard::builder()
            .strategy(GlobalFilter)
            .dump_dir(tmp.path())
            .build(),
    );
    let events = Arc::new(Mutex::new(Vec::new()));
    let (entered_tx, entered_rx) = mpsc::channel();

    let first = thread::spawn({
        let guard = Arc::clone(&guard);
        let events = Arc::clone(&events);
        move || {
            guard.run(move || {
                events.lock().push("first-enter");
                entered_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(200));
                events.lock().push("first-leave");
                1
            })
        }
    });
    entered_rx.recv().unwrap();
    let second = guard.run({
        let events = Arc::clone(&events);
        move || {
            events.lock().push("second-enter");
            2
        }
    });

    assert_eq!(first.join().unwrap(), GuardResult::Completed(1));
    assert_eq!(second, GuardResult::Completed(2));
    assert_eq!(
        *events.lock(),
        vec!["first-enter", "first-leave", "second-enter"]
    );
}

#[test]
fn child_global_filter_outer_fault_after_nested_call() {
    let Some(dir) = common::child_dump_dir() else {
        return;
    };
    let outer_marker = dir.join("outer-callback-ran");
    let inner_marker = dir.join("inner-callback-ran");
    let guard = Arc::new(
        CrashGuard::builder()
            .strategy(GlobalFilter)
            .dump_dir(&dir)
            .build(),
    );
    let inner_guard = Arc::clone(&guard);

    guard.run_with(
        GuardConfig::new()
            .with_label("outer")
            .with_callback(move |dump: &Path| {
                let _ = fs::write(&outer_marker, dump.as_os_str().as_encoded_bytes());
            }),
        move || {
            let inner = inner_guard.run_with(
                GuardConfig::new()
                    .with_label("inner")
                    .with_callback(move |_: &Path| {
                        let _ = fs::write(&inner_marker, b"");
                    }),
                || 1,
            );
            assert_eq!(inner, GuardResult::Completed(1));
            segfault()
        },
    );
    unreachable!("global filter returned after a fault");
}

#[test]
fn global_filter_restores_the_outer_scope_after_a_nested_call() {
    let tmp = tempfile::tempdir().unwrap();

    let output = common::run_child(
        "child_global_filter_outer_fault_after_nested_call",
        tmp.path(),
        &[],
    );

    assert_eq!(
        common::terminating_signal(&output),
        Some(libc::SIGSEGV),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let dumps = dumps_in(tmp.path(), "outer");
    assert_eq!(dumps.len(), 1);
    assert!(dumps_in(tmp.path(), "inner").is_empty());
    let reported = fs::read_to_string(tmp.path().join("outer-callback-ran")).unwrap();
    assert_eq!(Path::new(&reported), dumps[0]);
    assert!(!tmp.path().join("inner-callback-ran").exists());
}

#[test]
fn child_global_filter_fault_on_foreign_thread() {
    let Some(dir) = common::child_dump_dir() else {
        return;
    };
    let marker = dir.join("callback-ran");
    let guard = CrashGuard::builder()
        .strategy(GlobalFilter)
        .dump_dir(&dir)
        .build();

    guard.run_with(
        GuardConfig::new()
            .with_label("owner")
            .with_callback(move |_: &Path| {
                let _ = fs::write(&marker, b"");
            }),
        || thread::spawn(segfault).join().unwrap_or(1),
    );
    unreachable!("fault on a foreign thread did not end the process");
}

#[test]
fn global_filter_leaves_foreign_thread_faults_to_the_previous_handler() {
    let tmp = tempfile::tempdir().unwrap();

    let output = common::run_child("child_global_filter_fault_on_foreign_thread", tmp.path(), &[]);

    assert_eq!(
        common::terminating_signal(&output),
        Some(libc::SIGSEGV),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
}
