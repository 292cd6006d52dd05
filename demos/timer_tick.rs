//! Timer demo: a periodic ticker plus a one-shot reminder, both driven
//! by one dispatch loop. Stops after five ticks.
//!
//! Linux only (timerfd).

#[cfg(target_os = "linux")]
fn main() -> event_machine::Result<()> {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use event_machine::{Config, EventMachine, EventTimer};

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let machine = EventMachine::new(Config::new().capacity(16))?;
    let ticks = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&ticks);
    let stopper = machine.clone();
    let ticker = EventTimer::new(&machine, move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(tick = n, "periodic");
        if n == 5 {
            let _ = stopper.terminate();
        }
    })?;

    let reminder = EventTimer::new(&machine, || {
        tracing::info!("one-shot fired");
    })?;

    ticker.start(Duration::from_millis(500))?;
    reminder.start_one_shot(Duration::from_millis(1200))?;

    machine.run()?;

    ticker.destroy()?;
    reminder.destroy()?;
    machine.destroy()?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("this demo requires Linux timerfd support");
}
