//! Microtask scheduling. A [`Promise`](crate::Promise) never runs a handler
//! inside the call that made it runnable; it hands a [`Task`] to a
//! [`Scheduler`] instead.
//!
use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt,
    future::{Future, IntoFuture},
    pin::pin,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll, Wake, Waker},
};

use crate::{Error, Promise};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Runs tasks later.
///
/// Implementations must run each task after the scheduling call has
/// returned and the current synchronous execution has unwound, and must run
/// tasks in the order they were scheduled.
pub trait Scheduler {
    fn schedule(&self, task: Task);
}

impl<S: Scheduler + ?Sized> Scheduler for Rc<S> {
    fn schedule(&self, task: Task) {
        (**self).schedule(task)
    }
}

/// A FIFO microtask queue. Nothing runs until the owner drains it.
///
/// # Examples
///
/// ```
/// use thenable::{MicrotaskQueue, Scheduler};
/// use std::{cell::Cell, rc::Rc};
/// let queue = MicrotaskQueue::new();
/// let ran = Rc::new(Cell::new(false));
/// let flag = ran.clone();
/// queue.schedule(Box::new(move || flag.set(true)));
/// assert!(!ran.get());
/// assert_eq!(queue.run_until_idle(), 1);
/// assert!(ran.get());
/// ```
#[derive(Clone, Default)]
pub struct MicrotaskQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl MicrotaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Run the oldest task, if any. Returns whether a task ran.
    pub fn tick(&self) -> bool {
        // The borrow must end before the task runs: tasks schedule more tasks.
        let task = self.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run tasks until the queue is empty, including tasks scheduled along
    /// the way. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.tick() {
            ran += 1;
        }
        ran
    }

    /// Drive the queue until `promise` settles.
    ///
    /// Returns [`Error::Stalled`] when the queue runs dry while the promise
    /// is still pending, since nothing left could ever settle it.
    ///
    /// # Examples
    ///
    /// ```
    /// use thenable::{Error, MicrotaskQueue, Promise};
    /// let queue = MicrotaskQueue::new();
    /// let six = Promise::<i32, Error>::resolve(&queue, 5).and_then(|v| Ok(v + 1));
    /// assert_eq!(queue.block_on(six).unwrap(), Ok(6));
    /// ```
    pub fn block_on<T, E>(&self, promise: Promise<T, E>) -> Result<Result<T, E>, Error>
    where
        T: Clone + 'static,
        E: From<Error> + Clone + 'static,
    {
        let mut fut = pin!(promise.into_future());

        let waker_impl = Arc::new(QueueWaker::default());
        let waker = Waker::from(Arc::clone(&waker_impl));
        let mut cx = Context::from_waker(&waker);

        loop {
            match fut.as_mut().poll(&mut cx) {
                Poll::Ready(res) => return Ok(res),
                Poll::Pending => {
                    if !self.tick() && !waker_impl.take_awake() {
                        return Err(Error::Stalled);
                    }
                }
            }
        }
    }
}

impl Scheduler for MicrotaskQueue {
    fn schedule(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}

impl fmt::Debug for MicrotaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicrotaskQueue")
            .field("pending", &self.len())
            .finish()
    }
}

#[derive(Default)]
struct QueueWaker {
    awake: AtomicBool,
}

impl QueueWaker {
    #[inline]
    fn take_awake(&self) -> bool {
        self.awake.swap(false, Ordering::Relaxed)
    }
}

impl Wake for QueueWaker {
    fn wake(self: Arc<Self>) {
        self.awake.store(true, Ordering::Relaxed);
    }
}
