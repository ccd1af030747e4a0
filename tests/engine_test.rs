//! Integration tests for the operation layer.
//!
//! These exercise the full engine: guard admission, deferral and
//! cancellation, pre/post state mutation, interrupts, waiting, and
//! stop/restart behavior.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use modest_engine::op::{GuardFn, MutatorFn};
use modest_engine::state::{State, Value};
use modest_engine::{Engine, EngineConfig, InterruptHandle, Operation, PoolConfig, RunnableFn};

fn small_engine(pool_size: usize) -> Engine {
    let config = EngineConfig::new().with_pool(
        PoolConfig::new()
            .with_size(pool_size)
            .with_idle_expiration_ms(1_000),
    );
    Engine::with_config(&config).expect("valid config")
}

/// Three guard-less operations each increment a shared counter; after
/// waiting on all three the counter is exactly 3 and all are finished.
#[test]
fn trivial_counter_operations() {
    modest_engine::telemetry::init_tracing();
    let engine = small_engine(2);
    engine.start();

    let counter = Arc::new(AtomicU32::new(0));
    let mut ops = Vec::new();
    for i in 0..3 {
        let c = Arc::clone(&counter);
        let op = Operation::new(RunnableFn::new(format!("count-{i}"), move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        engine.queue(op.clone());
        ops.push(op);
    }

    for op in &ops {
        assert!(op.wait_for(false));
        assert!(op.finished());
        assert!(!op.canceled());
    }
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    engine.stop();
}

/// A deferred operation is overtaken by a later one whose post-execution
/// mutation unblocks it: final invocation order is B then A.
#[test]
fn guard_defers_until_post_execute_unblocks() {
    let engine = small_engine(1);
    engine.state().set("busy", Value::Bool(true));
    engine.start();

    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let order_a = Arc::clone(&order);
    let op_a = Operation::new(RunnableFn::new("a", move || {
        order_a.lock().push("a");
    }))
    .with_guard(GuardFn::new(|s: &State| s.get_bool("busy") == Some(false)));

    let order_b = Arc::clone(&order);
    let op_b = Operation::new(RunnableFn::new("b", move || {
        order_b.lock().push("b");
    }))
    .with_mutator(
        MutatorFn::new(|_s: &mut State| {})
            .with_post(|s: &mut State| s.set("busy", Value::Bool(false))),
    );

    engine.queue(op_a.clone());
    engine.queue(op_b.clone());

    assert!(op_b.wait_for(false));
    assert!(op_a.wait_for(false));
    assert_eq!(*order.lock(), vec!["b", "a"]);
    engine.stop();
}

/// A guard whose cancel predicate already holds cancels the operation
/// without ever invoking the runnable.
#[test]
fn must_cancel_short_circuits_execution() {
    let engine = small_engine(2);
    engine.state().set("shutdown", Value::Bool(true));
    engine.start();

    let ran = Arc::new(AtomicU32::new(0));
    let r = Arc::clone(&ran);
    let op = Operation::new(RunnableFn::new("doomed", move || {
        r.fetch_add(1, Ordering::SeqCst);
    }))
    .with_guard(
        GuardFn::new(|_s: &State| false)
            .with_cancel(|s: &State| s.get_bool("shutdown") == Some(true)),
    );

    engine.queue(op.clone());
    assert!(op.wait_for(false));
    assert!(op.canceled());
    assert!(!op.finished());
    assert!(!op.started());
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    engine.stop();
}

/// Pre-execution mutation is atomic with admission: a capacity-style guard
/// plus pre/post counters never exceed the configured limit.
#[test]
fn capacity_guard_admits_atomically() {
    let engine = small_engine(4);
    engine.state().set("active", Value::UInt32(0));
    engine.start();

    let peak = Arc::new(AtomicU32::new(0));
    let active_now = Arc::new(AtomicU32::new(0));
    let mut ops = Vec::new();
    for i in 0..12 {
        let peak = Arc::clone(&peak);
        let active_now = Arc::clone(&active_now);
        let op = Operation::new(RunnableFn::new(format!("limited-{i}"), move || {
            let now = active_now.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            active_now.fetch_sub(1, Ordering::SeqCst);
        }))
        .with_guard(GuardFn::new(|s: &State| s.get_u32("active").unwrap_or(0) < 2))
        .with_mutator(
            MutatorFn::new(|s: &mut State| {
                s.adjust("active", 1);
            })
            .with_post(|s: &mut State| {
                s.adjust("active", -1);
            }),
        );
        engine.queue(op.clone());
        ops.push(op);
    }

    for op in &ops {
        assert!(op.wait_for(false));
        assert!(op.finished());
    }
    assert!(peak.load(Ordering::SeqCst) <= 2, "guard admitted too many");
    engine.stop();
}

/// Operations with equivalent guards dispatch in queue order.
#[test]
fn fifo_order_at_equal_guards() {
    let engine = small_engine(1);
    engine.start();

    let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let mut ops = Vec::new();
    for i in 0..6u32 {
        let order = Arc::clone(&order);
        let op = Operation::new(RunnableFn::new(format!("fifo-{i}"), move || {
            order.lock().push(i);
        }))
        .with_guard(GuardFn::new(|_s: &State| true));
        engine.queue(op.clone());
        ops.push(op);
    }
    for op in &ops {
        assert!(op.wait_for(false));
    }
    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4, 5]);
    engine.stop();
}

/// Interrupting an operation that was never admitted cancels it; the
/// interrupt is idempotent.
#[test]
fn interrupt_of_deferred_operation_cancels() {
    let engine = small_engine(2);
    engine.start();

    let op = Operation::new(RunnableFn::new("held", || {}))
        .with_guard(GuardFn::new(|_s: &State| false));
    engine.queue(op.clone());
    thread::sleep(Duration::from_millis(30));
    assert!(!op.started());

    op.interrupt();
    op.interrupt();
    assert!(op.wait_for(false));
    assert!(op.canceled());
    engine.stop();
}

/// A running operation that observes its interrupt and returns early ends
/// canceled, not finished.
#[test]
fn interrupt_observed_mid_run_ends_canceled() {
    let engine = small_engine(2);
    engine.start();

    // The runnable observes the interrupt through its worker's handle.
    let op = Operation::new(RunnableFn::new("poller", move || {
        while !InterruptHandle::current().is_interrupted() {
            thread::sleep(Duration::from_millis(2));
        }
    }));
    engine.queue(op.clone());
    while !op.started() {
        thread::sleep(Duration::from_millis(2));
    }
    op.interrupt();
    assert!(op.wait_for(false));
    assert!(op.canceled());
    assert!(!op.finished());
    engine.stop();
}

/// An interruptible wait returns `false` when the waiter is interrupted;
/// the awaited operation is unaffected and still completes.
#[test]
fn interrupted_waiter_returns_early() {
    let engine = small_engine(1);
    engine.start();

    let release = Arc::new(AtomicU32::new(0));
    let r = Arc::clone(&release);
    let op = Operation::new(RunnableFn::new("slow", move || {
        while r.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(2));
        }
    }));
    engine.queue(op.clone());

    let (tx, rx) = std::sync::mpsc::channel::<InterruptHandle>();
    let waiter = {
        let op = op.clone();
        thread::spawn(move || {
            tx.send(InterruptHandle::current()).unwrap();
            op.wait_for(true)
        })
    };
    let handle = rx.recv().unwrap();
    thread::sleep(Duration::from_millis(20));
    handle.interrupt();
    assert!(!waiter.join().unwrap());

    release.store(1, Ordering::SeqCst);
    assert!(op.wait_for(false));
    assert!(op.finished());
    engine.stop();
}

/// A panicking runnable is absorbed: the operation terminates and the
/// engine keeps dispatching.
#[test]
fn panicking_runnable_still_terminates() {
    let engine = small_engine(1);
    engine.start();

    let bad = Operation::new(RunnableFn::new("bad", || panic!("kaboom")));
    engine.queue(bad.clone());
    assert!(bad.wait_for(false));
    assert!(bad.finished() || bad.canceled());

    let good = Operation::new(RunnableFn::new("good", || {}));
    engine.queue(good.clone());
    assert!(good.wait_for(false));
    assert!(good.finished());
    engine.stop();
}

/// Operations queued while stopped do not run until the next start;
/// clear_queued drops them instead.
#[test]
fn stopped_engine_keeps_queue() {
    let engine = small_engine(2);

    let op = Operation::new(RunnableFn::new("later", || {}));
    engine.queue(op.clone());
    thread::sleep(Duration::from_millis(20));
    assert!(!op.started());
    assert_eq!(engine.dispatcher().queued_count(), 1);

    engine.start();
    assert!(op.wait_for(false));
    assert!(op.finished());

    engine.stop();
    let abandoned = Operation::new(RunnableFn::new("abandoned", || {}));
    engine.queue(abandoned);
    assert_eq!(engine.dispatcher().queued_count(), 1);
    engine.dispatcher().clear_queued();
    assert_eq!(engine.dispatcher().queued_count(), 0);
}

/// External state changes re-trigger evaluation of deferred operations.
#[test]
fn state_changed_reevaluates_deferred() {
    let engine = small_engine(2);
    engine.state().set("gate", Value::Bool(false));
    engine.start();

    let op = Operation::new(RunnableFn::new("gated", || {}))
        .with_guard(GuardFn::new(|s: &State| s.get_bool("gate") == Some(true)));
    engine.queue(op.clone());
    thread::sleep(Duration::from_millis(30));
    assert!(!op.started());

    engine.state().set("gate", Value::Bool(true));
    engine.dispatcher().state_changed();
    assert!(op.wait_for(false));
    assert!(op.finished());
    engine.stop();
}
