//! Device multiplexing for security keys.
//!
//! One physical key is shared by many logical channels. This crate owns the
//! device side of that arrangement:
//! - [`Device`]: FIFO write pump, broadcast receive loop, channel lock
//! - [`Registry`]: enumerates keys through registered backends and hands out
//!   shared [`Device`] handles
//! - [`CountdownTimer`]: deadline bookkeeping shared by locks, exchanges and
//!   busy-retry budgets
//!
//! Everything here runs on tokio. Constructors that start pumps must be
//! called from within a runtime.

pub mod device;
pub mod error;
pub mod registry;
pub mod timer;

pub use device::{Device, FrameListener, WeakDevice, LOCK_SLACK};
pub use error::{MuxError, Result};
pub use registry::Registry;
pub use timer::CountdownTimer;
