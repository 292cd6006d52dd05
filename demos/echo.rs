//! Line echo: watches stdin and copies everything it reads to stdout.
//!
//! Terminates on end-of-file (Ctrl-D).

use std::io::{Read, Write};

use event_machine::{Config, EventDescriptor, EventMachine, Interest};

fn main() -> event_machine::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let machine = EventMachine::new(Config::new().capacity(16))?;
    let stdin_fd = 0;

    machine.add(EventDescriptor::new(
        stdin_fd,
        Interest::READABLE,
        |machine, ready, fd| {
            if ready.is_hup() || ready.is_error() {
                let _ = machine.terminate();
                return;
            }
            let mut buf = [0u8; 4096];
            match std::io::stdin().read(&mut buf) {
                Ok(0) => {
                    tracing::info!("end of input");
                    let _ = machine.terminate();
                }
                Ok(n) => {
                    if std::io::stdout().write_all(&buf[..n]).is_err() {
                        let _ = machine.terminate();
                    }
                    let _ = std::io::stdout().flush();
                }
                Err(err) => {
                    tracing::error!(fd, error = %err, "read failed");
                    let _ = machine.terminate();
                }
            }
        },
    ))?;

    tracing::info!("echoing stdin; Ctrl-D to quit");
    machine.run()?;
    machine.destroy()?;
    Ok(())
}
