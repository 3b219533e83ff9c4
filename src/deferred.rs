use std::fmt;

use crate::{Error, Promise, Reject, Resolve, Resolution, Scheduler};

/// A pending promise together with the handles that settle it, for code
/// that has to settle the promise after construction.
///
/// # Examples
///
/// ```
/// use thenable::{Deferred, Error, MicrotaskQueue, Status};
/// let queue = MicrotaskQueue::new();
/// let Deferred { promise, resolve, reject: _ } = Deferred::<String, Error>::new(&queue);
/// assert_eq!(promise.status(), Status::Pending);
/// resolve.resolve("🍓".to_string());
/// assert_eq!(queue.block_on(promise).unwrap(), Ok("🍓".to_string()));
/// ```
pub struct Deferred<T, E> {
    pub promise: Promise<T, E>,
    pub resolve: Resolve<T, E>,
    pub reject: Reject<T, E>,
}

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: From<Error> + Clone + 'static,
{
    pub fn new<S>(scheduler: &S) -> Self
    where
        S: Scheduler + Clone + 'static,
    {
        let promise = Promise::new(scheduler, |_, _| Ok(()));
        Self {
            resolve: Resolve::new(promise.clone()),
            reject: Reject::new(promise.clone()),
            promise,
        }
    }

    pub fn into_parts(self) -> (Promise<T, E>, Resolve<T, E>, Reject<T, E>) {
        (self.promise, self.resolve, self.reject)
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("promise", &self.promise)
            .finish_non_exhaustive()
    }
}

/// A pending promise and its settle handles.
pub fn deferred<T, E, S>(scheduler: &S) -> Deferred<T, E>
where
    T: Clone + 'static,
    E: From<Error> + Clone + 'static,
    S: Scheduler + Clone + 'static,
{
    Deferred::new(scheduler)
}

/// Shorthand for [`Promise::resolve`].
pub fn resolved<T, E, S>(scheduler: &S, value: impl Into<Resolution<T, E>>) -> Promise<T, E>
where
    T: Clone + 'static,
    E: From<Error> + Clone + 'static,
    S: Scheduler + Clone + 'static,
{
    Promise::resolve(scheduler, value)
}

/// Shorthand for [`Promise::reject`].
pub fn rejected<T, E, S>(scheduler: &S, reason: E) -> Promise<T, E>
where
    T: Clone + 'static,
    E: From<Error> + Clone + 'static,
    S: Scheduler + Clone + 'static,
{
    Promise::reject(scheduler, reason)
}
