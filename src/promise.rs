//! The promise state machine. A promise starts pending and settles at most
//! once, either fulfilled with a value or rejected with a reason. Handlers
//! attached with [`Promise::then`] always run on a later microtask.
//!
use std::{
    cell::RefCell,
    fmt,
    future::{Future, IntoFuture},
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

use crate::{
    resolution::resolve_promise, Error, Reject, Resolution, Resolve, Scheduler, Task,
};

/// A promise handler: takes the settled value (or reason) of one promise and
/// produces what the next promise gets resolved with. `Err` rejects it.
pub type Handler<A, T, E> = Box<dyn FnOnce(A) -> Result<Resolution<T, E>, E>>;

fn boxed<A, T, E, R>(handler: impl FnOnce(A) -> Result<R, E> + 'static) -> Handler<A, T, E>
where
    A: 'static,
    T: 'static,
    E: 'static,
    R: Into<Resolution<T, E>>,
{
    Box::new(move |arg: A| -> Result<Resolution<T, E>, E> { handler(arg).map(Into::into) })
}

fn passthrough<T: 'static, E: 'static>() -> Handler<T, T, E> {
    Box::new(|value| Ok(Resolution::Value(value)))
}

fn rethrow<T: 'static, E: 'static>() -> Handler<E, T, E> {
    Box::new(|reason| Err(reason))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Fulfilled,
    Rejected,
}

/// The eventual result of an asynchronous operation.
///
/// `Promise` is a handle: clones share the same state, and
/// [`Promise::ptr_eq`] tells whether two handles are the same promise.
///
/// # Examples
///
/// ```
/// use thenable::{Error, MicrotaskQueue, Promise};
/// let queue = MicrotaskQueue::new();
/// let recovered = Promise::<String, Error>::reject(&queue, "x".into())
///     .catch(|reason| Ok(format!("{reason}!")));
/// queue.run_until_idle();
/// assert_eq!(recovered.settled(), Some(Ok("x!".to_string())));
/// ```
pub struct Promise<T, E> {
    inner: Rc<Inner<T, E>>,
}

struct Inner<T, E> {
    state: RefCell<State<T, E>>,
    scheduler: Rc<dyn Scheduler>,
}

enum State<T, E> {
    Pending(Waiting<T, E>),
    Settled(Result<T, E>),
}

struct Waiting<T, E> {
    reactions: Vec<Reaction<T, E>>,
    wakers: Vec<Waker>,
}

impl<T, E> Default for Waiting<T, E> {
    fn default() -> Self {
        Self {
            reactions: vec![],
            wakers: vec![],
        }
    }
}

/// The two halves registered by one `then`. Exactly one of them runs.
struct Reaction<T, E> {
    on_fulfilled: Box<dyn FnOnce(T)>,
    on_rejected: Box<dyn FnOnce(E)>,
}

impl<T, E> Reaction<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    fn into_task(self, outcome: &Result<T, E>) -> Task {
        match outcome {
            Ok(value) => {
                let (value, on_fulfilled) = (value.clone(), self.on_fulfilled);
                Box::new(move || on_fulfilled(value))
            }
            Err(reason) => {
                let (reason, on_rejected) = (reason.clone(), self.on_rejected);
                Box::new(move || on_rejected(reason))
            }
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: From<Error> + Clone + 'static,
{
    /// Class tag reported under reflective string conversion.
    pub const TO_STRING_TAG: &'static str = "Promise";

    /// Create a promise and run `setup` right away with its resolve and
    /// reject handles. An `Err` from `setup` rejects the promise.
    ///
    /// # Examples
    ///
    /// ```
    /// use thenable::{Error, MicrotaskQueue, Promise, Status};
    /// let queue = MicrotaskQueue::new();
    /// let promise = Promise::<i32, Error>::new(&queue, |resolve, reject| {
    ///     resolve.resolve(1);
    ///     reject.reject("too late".into());
    ///     Ok(())
    /// });
    /// assert_eq!(promise.status(), Status::Fulfilled);
    /// assert_eq!(promise.settled(), Some(Ok(1)));
    /// ```
    pub fn new<S, F>(scheduler: &S, setup: F) -> Self
    where
        S: Scheduler + Clone + 'static,
        F: FnOnce(Resolve<T, E>, Reject<T, E>) -> Result<(), E>,
    {
        Self::with_scheduler(Rc::new(scheduler.clone()), setup)
    }

    /// Like [`Promise::new`], sharing an already type-erased scheduler.
    pub fn with_scheduler<F>(scheduler: Rc<dyn Scheduler>, setup: F) -> Self
    where
        F: FnOnce(Resolve<T, E>, Reject<T, E>) -> Result<(), E>,
    {
        let promise = Self::pending(scheduler);
        if let Err(reason) = setup(Resolve::new(promise.clone()), Reject::new(promise.clone())) {
            promise.fail(reason);
        }
        promise
    }

    /// A promise resolved with `value`. Promises and thenables are adopted,
    /// not wrapped.
    pub fn resolve<S>(scheduler: &S, value: impl Into<Resolution<T, E>>) -> Self
    where
        S: Scheduler + Clone + 'static,
    {
        Self::new(scheduler, |resolve, _| {
            resolve.resolve(value);
            Ok(())
        })
    }

    /// A promise rejected with `reason`.
    pub fn reject<S>(scheduler: &S, reason: E) -> Self
    where
        S: Scheduler + Clone + 'static,
    {
        Self::new(scheduler, |_, reject| {
            reject.reject(reason);
            Ok(())
        })
    }

    pub(crate) fn pending(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            inner: Rc::new(Inner {
                state: RefCell::new(State::Pending(Waiting::default())),
                scheduler,
            }),
        }
    }

    /// Attach both handlers. The returned promise is resolved with whatever
    /// the handler that runs returns, or rejected with its error. The value
    /// type may change along the chain.
    pub fn then<U, F, R, G, Q>(&self, on_fulfilled: F, on_rejected: G) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<R, E> + 'static,
        R: Into<Resolution<U, E>>,
        G: FnOnce(E) -> Result<Q, E> + 'static,
        Q: Into<Resolution<U, E>>,
    {
        self.chain(boxed(on_fulfilled), boxed(on_rejected))
    }

    /// Attach a fulfillment handler. Rejections pass through untouched.
    ///
    /// # Examples
    ///
    /// ```
    /// use thenable::{Error, MicrotaskQueue, Promise};
    /// let queue = MicrotaskQueue::new();
    /// let text = Promise::<i32, Error>::resolve(&queue, 5).and_then(|v| Ok(v.to_string()));
    /// assert_eq!(queue.block_on(text).unwrap(), Ok("5".to_string()));
    /// ```
    pub fn and_then<U, F, R>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<R, E> + 'static,
        R: Into<Resolution<U, E>>,
    {
        self.chain(boxed(on_fulfilled), rethrow())
    }

    /// Attach a rejection handler. Values pass through untouched.
    pub fn catch<G, Q>(&self, on_rejected: G) -> Promise<T, E>
    where
        G: FnOnce(E) -> Result<Q, E> + 'static,
        Q: Into<Resolution<T, E>>,
    {
        self.then_with(None, Some(boxed(on_rejected)))
    }

    /// Attach optional handlers. A missing fulfillment handler passes the
    /// value on; a missing rejection handler passes the reason on.
    pub fn then_with(
        &self,
        on_fulfilled: Option<Handler<T, T, E>>,
        on_rejected: Option<Handler<E, T, E>>,
    ) -> Promise<T, E> {
        self.chain(
            on_fulfilled.unwrap_or_else(passthrough),
            on_rejected.unwrap_or_else(rethrow),
        )
    }

    fn chain<U>(&self, on_fulfilled: Handler<T, U, E>, on_rejected: Handler<E, U, E>) -> Promise<U, E>
    where
        U: Clone + 'static,
    {
        let derived = Promise::<U, E>::pending(self.inner.scheduler.clone());
        let (fulfilled, rejected) = (derived.clone(), derived.clone());
        self.react(
            move |value| fulfilled.conclude(on_fulfilled(value)),
            move |reason| rejected.conclude(on_rejected(reason)),
        );
        derived
    }

    /// Register a reaction pair. If the promise has already settled, the
    /// matching half is scheduled now, otherwise it is queued until
    /// settlement. Either way it never runs inside this call.
    pub(crate) fn react<F, G>(&self, on_fulfilled: F, on_rejected: G)
    where
        F: FnOnce(T) + 'static,
        G: FnOnce(E) + 'static,
    {
        let reaction = Reaction {
            on_fulfilled: Box::new(on_fulfilled),
            on_rejected: Box::new(on_rejected),
        };
        let ready = match &mut *self.inner.state.borrow_mut() {
            State::Pending(waiting) => {
                waiting.reactions.push(reaction);
                None
            }
            State::Settled(outcome) => Some(reaction.into_task(outcome)),
        };
        if let Some(task) = ready {
            self.inner.scheduler.schedule(task);
        }
    }

    fn conclude(&self, outcome: Result<Resolution<T, E>, E>) {
        match outcome {
            Ok(value) => resolve_promise(self, value),
            Err(reason) => self.fail(reason),
        }
    }

    pub(crate) fn fulfill(&self, value: T) {
        self.settle(Ok(value))
    }

    pub(crate) fn fail(&self, reason: E) {
        self.settle(Err(reason))
    }

    fn settle(&self, outcome: Result<T, E>) {
        let waiting = {
            let mut state = self.inner.state.borrow_mut();
            let State::Pending(waiting) = &mut *state else {
                return;
            };
            let waiting = std::mem::take(waiting);
            *state = State::Settled(outcome.clone());
            waiting
        };
        for reaction in waiting.reactions {
            self.inner.scheduler.schedule(reaction.into_task(&outcome));
        }
        for waker in waiting.wakers {
            waker.wake();
        }
    }
}

impl<T, E> Promise<T, E> {
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Rc::ptr_eq(&this.inner, &other.inner)
    }

    pub fn status(&self) -> Status {
        match &*self.inner.state.borrow() {
            State::Pending(_) => Status::Pending,
            State::Settled(Ok(_)) => Status::Fulfilled,
            State::Settled(Err(_)) => Status::Rejected,
        }
    }

    /// The settled value or reason, without waiting.
    pub fn settled(&self) -> Option<Result<T, E>>
    where
        T: Clone,
        E: Clone,
    {
        match &*self.inner.state.borrow() {
            State::Pending(_) => None,
            State::Settled(outcome) => Some(outcome.clone()),
        }
    }
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> fmt::Display for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[object Promise]")
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Promise");
        match &*self.inner.state.borrow() {
            State::Pending(waiting) => out
                .field("status", &Status::Pending)
                .field("reactions", &waiting.reactions.len()),
            State::Settled(Ok(value)) => out
                .field("status", &Status::Fulfilled)
                .field("value", value),
            State::Settled(Err(reason)) => out
                .field("status", &Status::Rejected)
                .field("reason", reason),
        };
        out.finish()
    }
}

/// Waits for a [`Promise`] to settle. Every task awaiting the same promise
/// is woken when it does.
///
/// # Examples
///
/// ```
/// use thenable::{Error, MicrotaskQueue, Promise};
/// use futures::executor::block_on;
/// let queue = MicrotaskQueue::new();
/// let promise = Promise::<i32, Error>::resolve(&queue, 5).and_then(|v| Ok(v * 2));
/// queue.run_until_idle();
/// assert_eq!(block_on(async { promise.await }), Ok(10));
/// ```
#[must_use = "futures do nothing unless polled or .awaited"]
pub struct Settled<T, E> {
    promise: Promise<T, E>,
}

impl<T: Clone, E: Clone> Future for Settled<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut *self.promise.inner.state.borrow_mut() {
            State::Settled(outcome) => Poll::Ready(outcome.clone()),
            State::Pending(waiting) => {
                if !waiting.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    waiting.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T: Clone, E: Clone> IntoFuture for Promise<T, E> {
    type Output = Result<T, E>;
    type IntoFuture = Settled<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        Settled { promise: self }
    }
}

impl<T, E> fmt::Debug for Settled<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settled").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{Promise, Status};
    use crate::{Error, MicrotaskQueue};
    use futures::{executor::block_on, FutureExt};
    use std::{cell::RefCell, future::IntoFuture, rc::Rc};

    #[test]
    fn starts_pending() {
        let queue = MicrotaskQueue::new();
        let promise = Promise::<i32, Error>::new(&queue, |_, _| Ok(()));
        assert_eq!(promise.status(), Status::Pending);
        assert_eq!(promise.settled(), None);
    }

    #[test]
    fn settles_at_most_once() {
        let queue = MicrotaskQueue::new();
        let promise = Promise::<i32, Error>::new(&queue, |resolve, reject| {
            resolve.resolve(1);
            reject.reject("late".into());
            resolve.resolve(2);
            Ok(())
        });
        assert_eq!(promise.settled(), Some(Ok(1)));

        let promise = Promise::<i32, Error>::new(&queue, |resolve, reject| {
            reject.reject("first".into());
            resolve.resolve(2);
            Ok(())
        });
        assert_eq!(promise.settled(), Some(Err(Error::from("first"))));
    }

    #[test]
    fn setup_error_rejects() {
        let queue = MicrotaskQueue::new();
        let promise = Promise::<i32, Error>::new(&queue, |_, _| Err("boom".into()));
        assert_eq!(promise.status(), Status::Rejected);
        assert_eq!(promise.settled(), Some(Err(Error::from("boom"))));
    }

    #[test]
    fn setup_error_after_resolve_is_ignored() {
        let queue = MicrotaskQueue::new();
        let promise = Promise::<i32, Error>::new(&queue, |resolve, _| {
            resolve.resolve(4);
            Err("boom".into())
        });
        assert_eq!(promise.settled(), Some(Ok(4)));
    }

    #[test]
    fn handler_never_runs_inside_then() {
        let queue = MicrotaskQueue::new();
        let ran = Rc::new(RefCell::new(false));
        let flag = ran.clone();
        let promise = Promise::<i32, Error>::resolve(&queue, 1);
        let derived = promise.and_then(move |v| {
            *flag.borrow_mut() = true;
            Ok(v)
        });
        assert!(!*ran.borrow());
        assert_eq!(derived.status(), Status::Pending);
        assert_eq!(queue.len(), 1);
        queue.run_until_idle();
        assert!(*ran.borrow());
        assert_eq!(derived.settled(), Some(Ok(1)));
    }

    #[test]
    fn reactions_queue_while_pending() {
        let queue = MicrotaskQueue::new();
        let deferred = crate::Deferred::<i32, Error>::new(&queue);
        let _derived = deferred.promise.and_then(|v| Ok(v));
        assert!(queue.is_empty());
        deferred.resolve.resolve(3);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn handler_error_rejects_derived() {
        let queue = MicrotaskQueue::new();
        let derived = Promise::<i32, Error>::resolve(&queue, 1)
            .and_then(|_| Err::<i32, _>(Error::from("handler failed")));
        queue.run_until_idle();
        assert_eq!(derived.settled(), Some(Err(Error::from("handler failed"))));
    }

    #[test]
    fn then_runs_only_matching_half() {
        let queue = MicrotaskQueue::new();
        let log = Rc::new(RefCell::new(vec![]));
        let (ok_log, err_log) = (log.clone(), log.clone());
        let derived = Promise::<i32, Error>::reject(&queue, "bad".into()).then(
            move |v| {
                ok_log.borrow_mut().push("fulfilled");
                Ok(v)
            },
            move |_| {
                err_log.borrow_mut().push("rejected");
                Ok(0)
            },
        );
        queue.run_until_idle();
        assert_eq!(*log.borrow(), vec!["rejected"]);
        assert_eq!(derived.settled(), Some(Ok(0)));
    }

    #[test]
    fn then_with_defaults_pass_through() {
        let queue = MicrotaskQueue::new();
        let value = Promise::<i32, Error>::resolve(&queue, 8).then_with(None, None);
        let reason = Promise::<i32, Error>::reject(&queue, "r".into()).then_with(None, None);
        queue.run_until_idle();
        assert_eq!(value.settled(), Some(Ok(8)));
        assert_eq!(reason.settled(), Some(Err(Error::from("r"))));
    }

    #[test]
    fn returning_own_derived_promise_is_a_cycle() {
        let queue = MicrotaskQueue::new();
        let slot: Rc<RefCell<Option<Promise<i32, Error>>>> = Rc::new(RefCell::new(None));
        let inside = slot.clone();
        let derived = Promise::<i32, Error>::resolve(&queue, 1).and_then::<i32, _, _>(move |_| {
            inside
                .borrow_mut()
                .take()
                .ok_or_else(|| Error::from("missing promise"))
        });
        *slot.borrow_mut() = Some(derived.clone());
        queue.run_until_idle();
        assert_eq!(derived.settled(), Some(Err(Error::ChainingCycle)));
    }

    #[test]
    fn display_reports_promise_tag() {
        let queue = MicrotaskQueue::new();
        let promise = Promise::<i32, Error>::resolve(&queue, 1);
        assert_eq!(promise.to_string(), "[object Promise]");
        assert_eq!(Promise::<i32, Error>::TO_STRING_TAG, "Promise");
    }

    #[test]
    fn debug_shows_state() {
        let queue = MicrotaskQueue::new();
        let promise = Promise::<i32, Error>::resolve(&queue, 1);
        assert_eq!(format!("{promise:?}"), "Promise { status: Fulfilled, value: 1 }");
    }

    #[test]
    fn ptr_eq_is_identity() {
        let queue = MicrotaskQueue::new();
        let a = Promise::<i32, Error>::resolve(&queue, 1);
        let b = Promise::<i32, Error>::resolve(&queue, 1);
        assert!(Promise::ptr_eq(&a, &a.clone()));
        assert!(!Promise::ptr_eq(&a, &b));
    }

    #[test]
    fn await_wakes_on_settlement() {
        let queue = MicrotaskQueue::new();
        let deferred = crate::Deferred::<i32, Error>::new(&queue);
        let mut waiting = deferred.promise.clone().into_future();
        assert_eq!((&mut waiting).now_or_never(), None);
        deferred.resolve.resolve(12);
        assert_eq!(block_on(waiting), Ok(12));
    }
}
