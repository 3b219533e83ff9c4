//! The promise resolution procedure: settling a promise with something that
//! may itself be a promise, or look like one.
//!
use std::{cell::Cell, fmt, rc::Rc};

use crate::{Error, Promise};

/// What a promise gets resolved with.
pub enum Resolution<T, E> {
    /// A plain value. The promise is fulfilled with it as-is.
    Value(T),
    /// A promise of this crate. The resolved promise adopts its state.
    Promise(Promise<T, E>),
    /// A foreign object that may expose a `then` member.
    Thenable(Rc<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    pub fn thenable(thenable: impl Thenable<T, E> + 'static) -> Self {
        Resolution::Thenable(Rc::new(thenable))
    }
}

impl<T, E> From<T> for Resolution<T, E> {
    fn from(value: T) -> Self {
        Resolution::Value(value)
    }
}

impl<T, E> From<Promise<T, E>> for Resolution<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Resolution::Promise(promise)
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Promise(promise) => f.debug_tuple("Promise").field(promise).finish(),
            Resolution::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}

/// The callable form of a `then` member. It is invoked at most once, with
/// the receiver already captured.
pub type ThenFn<T, E> = Box<dyn FnOnce(Resolve<T, E>, Reject<T, E>) -> Result<(), E>>;

/// The result of reading a thenable's `then` member.
pub enum Then<T, E> {
    /// `then` is callable: the object is treated as a foreign promise.
    Callable(ThenFn<T, E>),
    /// `then` is missing or not callable: the object is an ordinary value,
    /// represented by the given `T`.
    Plain(T),
}

/// Anything that might be a promise from another implementation.
///
/// # Examples
///
/// ```
/// use thenable::{Error, MicrotaskQueue, Promise, Reject, Resolve, Then, Thenable};
///
/// struct Eventually(i32);
///
/// impl Thenable<i32, Error> for Eventually {
///     fn then(&self) -> Result<Then<i32, Error>, Error> {
///         let value = self.0;
///         Ok(Then::Callable(Box::new(move |resolve: Resolve<i32, Error>, _: Reject<i32, Error>| {
///             resolve.resolve(value);
///             Ok(())
///         })))
///     }
/// }
///
/// let queue = MicrotaskQueue::new();
/// let promise = Promise::<i32, Error>::resolve(&queue, thenable::Resolution::thenable(Eventually(7)));
/// assert_eq!(queue.block_on(promise).unwrap(), Ok(7));
/// ```
pub trait Thenable<T, E> {
    /// Read the `then` member. An `Err` is a failing read; the promise being
    /// resolved is rejected with it.
    fn then(&self) -> Result<Then<T, E>, E>;
}

/// One-shot guard shared by the two callbacks handed to a foreign `then`.
#[derive(Clone, Default)]
struct Latch(Rc<Cell<bool>>);

impl Latch {
    /// Returns true only for the first call across all clones.
    fn fire(&self) -> bool {
        !self.0.replace(true)
    }
}

fn fire(latch: &Option<Latch>) -> bool {
    latch.as_ref().map_or(true, Latch::fire)
}

/// Resolves a promise, running the resolution procedure on the value.
pub struct Resolve<T, E> {
    promise: Promise<T, E>,
    latch: Option<Latch>,
}

/// Rejects a promise. A no-op once the promise has settled.
pub struct Reject<T, E> {
    promise: Promise<T, E>,
    latch: Option<Latch>,
}

impl<T, E> Resolve<T, E>
where
    T: Clone + 'static,
    E: From<Error> + Clone + 'static,
{
    pub(crate) fn new(promise: Promise<T, E>) -> Self {
        Self {
            promise,
            latch: None,
        }
    }

    pub fn resolve(&self, value: impl Into<Resolution<T, E>>) {
        if fire(&self.latch) {
            resolve_promise(&self.promise, value.into());
        }
    }
}

impl<T, E> Reject<T, E>
where
    T: Clone + 'static,
    E: From<Error> + Clone + 'static,
{
    pub(crate) fn new(promise: Promise<T, E>) -> Self {
        Self {
            promise,
            latch: None,
        }
    }

    pub fn reject(&self, reason: E) {
        if fire(&self.latch) {
            self.promise.fail(reason);
        }
    }
}

impl<T, E> Clone for Resolve<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            latch: self.latch.clone(),
        }
    }
}

impl<T, E> Clone for Reject<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            latch: self.latch.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Resolve<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolve")
            .field("latched", &self.latch.is_some())
            .finish_non_exhaustive()
    }
}

impl<T, E> fmt::Debug for Reject<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reject")
            .field("latched", &self.latch.is_some())
            .finish_non_exhaustive()
    }
}

/// Settle `promise` with `value`, adopting the state of promises and
/// thenables.
pub(crate) fn resolve_promise<T, E>(promise: &Promise<T, E>, value: Resolution<T, E>)
where
    T: Clone + 'static,
    E: From<Error> + Clone + 'static,
{
    match value {
        Resolution::Promise(other) if Promise::ptr_eq(promise, &other) => {
            promise.fail(Error::ChainingCycle.into())
        }
        Resolution::Promise(other) => {
            let (fulfilled, rejected) = (promise.clone(), promise.clone());
            other.react(
                move |value| fulfilled.fulfill(value),
                move |reason| rejected.fail(reason),
            );
        }
        Resolution::Value(value) => promise.fulfill(value),
        // `then` is read once and invoked at most once.
        Resolution::Thenable(thenable) => match thenable.then() {
            Err(reason) => promise.fail(reason),
            Ok(Then::Plain(value)) => promise.fulfill(value),
            Ok(Then::Callable(then)) => {
                let latch = Latch::default();
                let resolve = Resolve {
                    promise: promise.clone(),
                    latch: Some(latch.clone()),
                };
                let reject = Reject {
                    promise: promise.clone(),
                    latch: Some(latch.clone()),
                };
                if let Err(reason) = then(resolve, reject) {
                    if latch.fire() {
                        promise.fail(reason);
                    }
                }
            }
        },
    }
}
