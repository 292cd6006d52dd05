//! Minimal reactor over the platform readiness multiplexer.
//!
//! An [`EventMachine`] watches file descriptors through epoll (Linux) or
//! kqueue (macOS/BSD) and dispatches readiness to caller-registered
//! handlers on a single loop thread. Registration records are plain
//! values; callers may attach a [`DescriptorStorage`] to keep their own
//! handle on every live registration. Any thread can stop the loop
//! through the machine's termination channel, and on Linux an
//! [`EventTimer`] delivers periodic or one-shot callbacks through the
//! same loop.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`machine`] | Reactor core: registration, dispatch loop, teardown |
//! | [`descriptor`] | Registration records and the storage contract |
//! | [`interest`] | Readiness filter flags |
//! | [`event`] | Portable events and the reusable batch buffer |
//! | [`queue`] | Platform multiplexer backends |
//! | [`timer`] | timerfd countdown timers (Linux) |
//! | [`error`] | Failure taxonomy |
//!
//! # Example
//!
//! ```no_run
//! use event_machine::{Config, EventDescriptor, EventMachine, Interest};
//!
//! fn main() -> event_machine::Result<()> {
//!     let machine = EventMachine::new(Config::new().capacity(64))?;
//!
//!     let socket_fd = 0; // a descriptor you own, e.g. a listening socket
//!     machine.add(EventDescriptor::new(
//!         socket_fd,
//!         Interest::READABLE,
//!         |machine, ready, fd| {
//!             if ready.is_hup() {
//!                 let _ = machine.delete(fd);
//!                 let _ = machine.terminate();
//!             }
//!             // read from fd...
//!         },
//!     ))?;
//!
//!     // Blocks until some handler (or another thread) calls terminate.
//!     machine.run()?;
//!     machine.destroy()?;
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod descriptor;
pub mod error;
pub mod event;
pub mod interest;
pub mod machine;
pub mod queue;

#[cfg(target_os = "linux")]
pub mod timer;

mod fd;
mod wake;

pub use descriptor::{DescriptorStorage, EventDescriptor, FdMap, Handler, StorageError};
pub use error::{Error, Result};
pub use event::{Event, EventBuffer, Events};
pub use interest::Interest;
pub use machine::{Config, EventMachine, DEFAULT_CAPACITY};
pub use queue::{CtlOp, ReadinessQueue};

#[cfg(target_os = "linux")]
pub use timer::EventTimer;
