//! End-to-end tests for the timer subsystem.

#![cfg(target_os = "linux")]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use event_machine::{Config, EventMachine, EventTimer};

use common::init_test_logging;

fn machine() -> EventMachine {
    init_test_logging();
    EventMachine::new(Config::new().capacity(8)).expect("machine creation")
}

#[test]
fn periodic_timer_fires_repeatedly() {
    let machine = machine();
    let ticks = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&ticks);
    let stopper = machine.clone();
    let timer = EventTimer::new(&machine, move || {
        if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
            stopper.terminate().expect("terminate from callback");
        }
    })
    .expect("timer creation");

    timer.start(Duration::from_millis(10)).expect("start");
    machine.run().expect("run");

    assert!(ticks.load(Ordering::SeqCst) >= 3);
    timer.destroy().expect("timer destroy");
    machine.destroy().expect("machine destroy");
}

#[test]
fn missed_intervals_are_fanned_out_as_individual_callbacks() {
    let machine = machine();
    let ticks = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&ticks);
    let stopper = machine.clone();
    let timer = EventTimer::new(&machine, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        stopper.terminate().expect("terminate from callback");
    })
    .expect("timer creation");

    timer.start(Duration::from_millis(10)).expect("start");
    // Let several intervals elapse before anyone services the loop; the
    // expiration counter accumulates them.
    thread::sleep(Duration::from_millis(105));
    machine.run().expect("run");

    // One readiness cycle must deliver every elapsed interval.
    assert!(ticks.load(Ordering::SeqCst) >= 9);
    timer.destroy().expect("timer destroy");
    machine.destroy().expect("machine destroy");
}

#[test]
fn one_shot_timer_fires_exactly_once() {
    let machine = machine();
    let ticks = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&ticks);
    let timer = EventTimer::new(&machine, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .expect("timer creation");
    timer
        .start_one_shot(Duration::from_millis(10))
        .expect("start");

    let stopper = machine.clone();
    let terminator = thread::spawn(move || {
        // Long enough for a periodic timer to have fired several times.
        thread::sleep(Duration::from_millis(80));
        stopper.terminate().expect("terminate");
    });
    machine.run().expect("run");
    terminator.join().expect("terminator join");

    assert_eq!(ticks.load(Ordering::SeqCst), 1);
    timer.destroy().expect("timer destroy");
    machine.destroy().expect("machine destroy");
}

#[test]
fn stop_disarms_a_running_timer() {
    let machine = machine();
    let ticks = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&ticks);
    let timer = EventTimer::new(&machine, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .expect("timer creation");

    timer.start(Duration::from_millis(10)).expect("start");
    timer.stop().expect("stop");
    timer.stop().expect("stop is idempotent");

    let stopper = machine.clone();
    let terminator = thread::spawn(move || {
        thread::sleep(Duration::from_millis(60));
        stopper.terminate().expect("terminate");
    });
    machine.run().expect("run");
    terminator.join().expect("terminator join");

    assert_eq!(ticks.load(Ordering::SeqCst), 0);
    timer.destroy().expect("timer destroy");
    machine.destroy().expect("machine destroy");
}

#[test]
fn restart_replaces_the_previous_schedule() {
    let machine = machine();
    let ticks = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&ticks);
    let stopper = machine.clone();
    let timer = EventTimer::new(&machine, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        stopper.terminate().expect("terminate from callback");
    })
    .expect("timer creation");

    timer.start(Duration::from_secs(60)).expect("first start");
    timer.start(Duration::from_millis(10)).expect("restart");
    machine.run().expect("run");

    assert!(ticks.load(Ordering::SeqCst) >= 1);
    timer.destroy().expect("timer destroy");
    machine.destroy().expect("machine destroy");
}
