//! # Utility Types
//!
//! Small building blocks shared by the coordinators.
//!
//! ## Completion
//!
//! A [`Completion`] resolves exactly once and can be awaited from any number
//! of places through cloned [`Waiter`]s:
//!
//! ```rust
//! use avpipe::utils::Completion;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let done = Completion::<u32>::new();
//! let waiter = done.waiter();
//!
//! assert!(done.resolve(Ok(7)));
//! assert!(!done.resolve(Ok(8))); // first outcome wins
//! assert_eq!(waiter.wait().await.unwrap(), 7);
//! # }
//! ```

/// Exactly-once outcome signals
pub mod completion;

pub use completion::{Completion, Waiter};
