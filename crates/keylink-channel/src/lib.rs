//! Logical channels to a security key.
//!
//! A [`Channel`] is one client of a shared [`keylink_mux::Device`]. It owns
//! a channel id, negotiates it with the key ([`Channel::sync`]) and runs
//! command/response exchanges with fragmentation, reassembly, busy retry and
//! timeouts.
//!
//! ```no_run
//! use std::sync::Arc;
//! use keylink_channel::{Channel, ChannelConfig};
//! use keylink_mux::Registry;
//!
//! # async fn demo(registry: Arc<Registry>) -> keylink_channel::Result<()> {
//! let channel = Channel::connect(registry, None, ChannelConfig::default())?;
//! channel.sync().await?;
//! let echo = channel.ping(b"hello").await?;
//! assert_eq!(&echo[..], b"hello");
//! channel.close();
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod commands;
pub mod config;
pub mod error;
pub mod sync;

pub use channel::Channel;
pub use commands::{SW_CONDITIONS_NOT_SATISFIED, SW_INS_NOT_SUPPORTED, SW_NO_ERROR, SW_WRONG_DATA};
pub use config::{ChannelConfig, MAX_TIMEOUT, NORMAL_TIMEOUT, SHORT_TIMEOUT};
pub use error::{ChannelError, Result};
