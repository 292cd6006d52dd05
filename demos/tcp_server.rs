//! Echo server: accepts TCP connections and echoes bytes back.
//!
//! Connections are watched edge-triggered, so each handler drains its
//! socket until would-block. Try it with `nc 127.0.0.1 7777`.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use parking_lot::Mutex;

use event_machine::{Config, EventDescriptor, EventMachine, Interest};

const ADDR: &str = "127.0.0.1:7777";

fn main() -> event_machine::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let listener = TcpListener::bind(ADDR).expect("bind");
    listener.set_nonblocking(true).expect("nonblocking listener");
    tracing::info!(%ADDR, "listening");

    let machine = EventMachine::new(Config::new().capacity(64))?;

    // Accepted sockets must outlive their handler invocations; the table
    // owns them until their watch is deleted.
    let connections: Arc<Mutex<HashMap<RawFd, TcpStream>>> = Arc::new(Mutex::new(HashMap::new()));

    let table = Arc::clone(&connections);
    machine.add(EventDescriptor::new(
        listener.as_raw_fd(),
        Interest::READABLE,
        move |machine, _, _| loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if stream.set_nonblocking(true).is_err() {
                        continue;
                    }
                    let fd = stream.as_raw_fd();
                    tracing::info!(fd, %peer, "connection accepted");
                    table.lock().insert(fd, stream);

                    let conns = Arc::clone(&table);
                    let result = machine.add(EventDescriptor::new(
                        fd,
                        Interest::READABLE | Interest::HUP | Interest::EDGE_TRIGGERED,
                        move |machine, ready, fd| {
                            serve(machine, &conns, ready, fd);
                        },
                    ));
                    if let Err(err) = result {
                        tracing::error!(fd, error = %err, "failed to watch connection");
                        table.lock().remove(&fd);
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    tracing::error!(error = %err, "accept failed");
                    break;
                }
            }
        },
    ))?;

    machine.run()?;
    machine.destroy()?;
    Ok(())
}

fn serve(
    machine: &EventMachine,
    connections: &Mutex<HashMap<RawFd, TcpStream>>,
    ready: Interest,
    fd: RawFd,
) {
    if ready.is_hup() || ready.is_error() {
        drop_connection(machine, connections, fd);
        return;
    }
    let Some(stream) = connections.lock().get(&fd).and_then(|s| s.try_clone().ok()) else {
        return;
    };
    let mut stream = stream;
    let mut buf = [0u8; 4096];
    // Edge-triggered: drain until would-block.
    loop {
        match stream.read(&mut buf) {
            Ok(0) => {
                drop_connection(machine, connections, fd);
                return;
            }
            Ok(n) => {
                if stream.write_all(&buf[..n]).is_err() {
                    drop_connection(machine, connections, fd);
                    return;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(err) => {
                tracing::warn!(fd, error = %err, "connection error");
                drop_connection(machine, connections, fd);
                return;
            }
        }
    }
}

fn drop_connection(
    machine: &EventMachine,
    connections: &Mutex<HashMap<RawFd, TcpStream>>,
    fd: RawFd,
) {
    tracing::info!(fd, "connection closed");
    let _ = machine.delete(fd);
    connections.lock().remove(&fd);
}
