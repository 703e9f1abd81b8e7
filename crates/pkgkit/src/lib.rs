//! # Pkgkit
//!
//! External command execution and package-manager adapters.
//!
//! ## Overview
//!
//! - [`runner`]: run a command with a timeout, bounded output capture,
//!   optional `sudo -n` elevation, cancellation and retries
//! - [`manager`]: the [`PackageManager`] contract and its apt, Homebrew,
//!   pip and snap backends
//! - [`retry`]: exponential backoff for transient failures
//!
//! ## Example
//!
//! ```ignore
//! use pkgkit::{Apt, PackageManager, SystemRunner};
//! use std::sync::Arc;
//!
//! let apt = Apt::new(Arc::new(SystemRunner::new()));
//! if !apt.is_installed("zsh", &cancel)? {
//!     apt.refresh(&cancel)?;
//!     apt.install("zsh", &cancel)?;
//! }
//! ```

pub mod error;
pub mod manager;
pub mod retry;
pub mod runner;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Error, ErrorCategory, Result};
pub use manager::{Apt, Brew, PackageManager, Pip, Snap, observe};
pub use retry::{LogCallback, RetryCallback, RetryPolicy, with_retry};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, RunOptions, SystemRunner, is_root};
