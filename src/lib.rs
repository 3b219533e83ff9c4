//! A Promises/A+ promise for single-threaded rust.
//!
//! A [`Promise`] is pending until it is fulfilled with a value or rejected
//! with a reason. Handlers attached with [`Promise::then`] never run inside
//! the call that attached them: they are handed to a [`Scheduler`] and run
//! later, in registration order. Bring your own scheduler or use the
//! bundled [`MicrotaskQueue`].
//!
//! Promises interoperate with foreign promise-like objects through the
//! [`Thenable`] trait.
//!
//! # Examples
//!
//! ```
//! use thenable::{Deferred, Error, MicrotaskQueue, Promise};
//! let queue = MicrotaskQueue::new();
//! let inner = Deferred::<i32, Error>::new(&queue);
//! let outer = Promise::<i32, Error>::resolve(&queue, inner.promise.clone())
//!     .catch(|reason| Err::<i32, _>(Error::Reason(format!("outer saw {reason}"))));
//! inner.reject.reject("late".into());
//! assert_eq!(
//!     queue.block_on(outer).unwrap(),
//!     Err(Error::Reason("outer saw late".into()))
//! );
//! ```
pub mod deferred;
pub mod promise;
pub mod resolution;
pub mod scheduler;

pub use deferred::{deferred, rejected, resolved, Deferred};
pub use promise::{Handler, Promise, Settled, Status};
pub use resolution::{Reject, Resolution, Resolve, Then, ThenFn, Thenable};
pub use scheduler::{MicrotaskQueue, Scheduler, Task};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A promise was resolved with itself.
    #[error("Chaining cycle detected for promise #<Promise>")]
    ChainingCycle,
    /// The scheduler ran out of work while a promise was still pending.
    #[error("the promise is still pending and nothing is left to settle it")]
    Stalled,
    #[error("{0}")]
    Reason(String),
}

impl From<&str> for Error {
    fn from(reason: &str) -> Self {
        Error::Reason(reason.to_owned())
    }
}

impl From<String> for Error {
    fn from(reason: String) -> Self {
        Error::Reason(reason)
    }
}
