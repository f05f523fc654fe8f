//! Designated execution context.
//!
//! Host UI toolkits run a special loop on one "main" thread; request cycles
//! start there and callback deliveries are serialized back onto it. This
//! module abstracts that as the [`ExecutionContext`] capability so the
//! engine never hard-codes a platform thread object.
//!
//! [`MainThread`] is the stock implementation: it pins the context to the
//! thread that created it and feeds a job queue drained by the paired
//! [`MainLoop`]. `MainLoop::block_on` polls a request future while still
//! running queued jobs, so awaiting a response never stalls other
//! main-context work.

use std::fmt;
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, ThreadId};

use flume::{Receiver, Sender, TryRecvError};
use tracing::{debug, error};

use crate::config::ContextConfig;

/// Unit of work queued onto the designated context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Capability describing the designated execution context.
pub trait ExecutionContext: Send + Sync {
    /// Name used in logs and affinity panics.
    fn name(&self) -> &str;

    /// Whether the caller is currently running on this context.
    fn is_current(&self) -> bool;

    /// Queue `job` to run on this context. Callable from any thread.
    fn dispatch(&self, job: Job);

    /// Panic unless running on this context.
    ///
    /// Affinity violations are structural bugs in the calling code; they are
    /// never turned into recoverable errors.
    fn assert_current(&self, operation: &str) {
        if !self.is_current() {
            let thread = thread::current();
            error!(
                context = self.name(),
                operation,
                thread = ?thread.id(),
                "called off the designated execution context"
            );
            panic!(
                "{operation} must run on the {} context, not thread {:?} ({})",
                self.name(),
                thread.id(),
                thread.name().unwrap_or("unnamed"),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// MainThread
// ---------------------------------------------------------------------------

/// [`ExecutionContext`] bound to the thread that created it.
#[derive(Clone)]
pub struct MainThread {
    name: Arc<str>,
    thread: ThreadId,
    tx: Sender<Job>,
}

impl fmt::Debug for MainThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainThread")
            .field("name", &self.name)
            .field("thread", &self.thread)
            .field("queued", &self.tx.len())
            .finish()
    }
}

impl MainThread {
    /// Bind a context named "main" to the calling thread.
    #[must_use]
    pub fn current() -> (Self, MainLoop) {
        Self::named("main")
    }

    /// Bind a context to the calling thread.
    #[must_use]
    pub fn named(name: &str) -> (Self, MainLoop) {
        let (tx, rx) = flume::unbounded();
        let thread = thread::current().id();
        let context = Self {
            name: Arc::from(name),
            thread,
            tx: tx.clone(),
        };
        let main_loop = MainLoop { thread, tx, rx };
        (context, main_loop)
    }

    #[must_use]
    pub fn from_config(config: &ContextConfig) -> (Self, MainLoop) {
        Self::named(&config.name)
    }

    /// Shared handle suitable for [`crate::dispatcher::Dispatcher::new`].
    #[must_use]
    pub fn shared(&self) -> Arc<dyn ExecutionContext> {
        Arc::new(self.clone())
    }
}

impl ExecutionContext for MainThread {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.thread
    }

    fn dispatch(&self, job: Job) {
        // Fails only once the paired MainLoop is gone; nothing will ever run it.
        if self.tx.send(job).is_err() {
            debug!(context = %self.name, "main loop dropped; discarding job");
        }
    }
}

// ---------------------------------------------------------------------------
// MainLoop
// ---------------------------------------------------------------------------

/// Drives the job queue of a [`MainThread`]. Lives on that thread.
pub struct MainLoop {
    thread: ThreadId,
    tx: Sender<Job>,
    rx: Receiver<Job>,
}

impl fmt::Debug for MainLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainLoop")
            .field("thread", &self.thread)
            .field("queued", &self.rx.len())
            .finish()
    }
}

/// Wakes [`MainLoop::block_on`] by queueing an empty job.
struct QueueWaker {
    tx: Sender<Job>,
}

impl Wake for QueueWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        let _ = self.tx.send(Box::new(|| {}));
    }
}

impl MainLoop {
    fn assert_owner(&self, operation: &str) {
        assert!(
            thread::current().id() == self.thread,
            "MainLoop::{operation} must run on the thread that created it"
        );
    }

    /// Number of jobs waiting.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    /// Block until one job is available and run it.
    pub fn tick(&self) {
        self.assert_owner("tick");
        if let Ok(job) = self.rx.recv() {
            job();
        }
    }

    /// Run queued jobs until the queue is empty, including jobs queued by
    /// the jobs themselves. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        self.assert_owner("run_until_idle");
        let mut ran = 0;
        loop {
            match self.rx.try_recv() {
                Ok(job) => {
                    job();
                    ran += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return ran,
            }
        }
    }

    /// Run `future` to completion on this thread, executing queued jobs
    /// whenever it is pending.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.assert_owner("block_on");
        let waker = Waker::from(Arc::new(QueueWaker {
            tx: self.tx.clone(),
        }));
        let mut cx = Context::from_waker(&waker);
        let mut future = pin!(future);
        loop {
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return output;
            }
            if let Ok(job) = self.rx.recv() {
                job();
            }
            self.run_until_idle();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::ResponseSlot;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn current_thread_is_current() {
        let (context, _main_loop) = MainThread::current();
        assert!(context.is_current());
        assert_eq!(context.name(), "main");
    }

    #[test]
    fn other_thread_is_not_current() {
        let (context, _main_loop) = MainThread::current();
        let on_other = thread::spawn(move || context.is_current()).join().unwrap();
        assert!(!on_other);
    }

    #[test]
    fn assert_current_panics_off_context() {
        let (context, _main_loop) = MainThread::named("ui");
        let result = thread::spawn(move || context.assert_current("deliver")).join();
        let payload = result.unwrap_err();
        let message = payload
            .downcast_ref::<String>()
            .cloned()
            .unwrap_or_default();
        assert!(message.contains("deliver must run on the ui context"));
    }

    #[test]
    fn dispatched_jobs_run_in_order() {
        let (context, main_loop) = MainThread::current();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = Arc::clone(&seen);
            context.dispatch(Box::new(move || seen.lock().push(i)));
        }
        assert_eq!(main_loop.queued(), 3);
        assert_eq!(main_loop.run_until_idle(), 3);
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn jobs_queued_by_jobs_also_run() {
        let (context, main_loop) = MainThread::current();
        let count = Arc::new(AtomicUsize::new(0));
        let inner_context = context.clone();
        let inner_count = Arc::clone(&count);
        context.dispatch(Box::new(move || {
            inner_count.fetch_add(1, Ordering::SeqCst);
            let inner_count = Arc::clone(&inner_count);
            inner_context.dispatch(Box::new(move || {
                inner_count.fetch_add(1, Ordering::SeqCst);
            }));
        }));
        assert_eq!(main_loop.run_until_idle(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn jobs_from_other_threads_run_on_main() {
        let (context, main_loop) = MainThread::current();
        let remote = context.clone();
        let observed = Arc::new(parking_lot::Mutex::new(None));
        let sink = Arc::clone(&observed);
        let checker = context.clone();
        thread::spawn(move || {
            remote.dispatch(Box::new(move || {
                *sink.lock() = Some(checker.is_current());
            }));
        })
        .join()
        .unwrap();
        main_loop.tick();
        assert_eq!(*observed.lock(), Some(true));
    }

    #[test]
    fn block_on_ready_future() {
        let (_context, main_loop) = MainThread::current();
        assert_eq!(main_loop.block_on(async { 42 }), 42);
    }

    #[test]
    fn block_on_runs_jobs_while_pending() {
        let (context, main_loop) = MainThread::current();
        let slot = ResponseSlot::new();
        let producer = slot.clone();
        context.dispatch(Box::new(move || producer.send(7).unwrap()));
        assert_eq!(main_loop.block_on(slot.receive()), Ok(7));
    }

    #[test]
    fn block_on_wakes_for_foreign_thread_send() {
        let (_context, main_loop) = MainThread::current();
        let slot = ResponseSlot::new();
        let producer = slot.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.send("from worker").unwrap();
        });
        assert_eq!(main_loop.block_on(slot.receive()), Ok("from worker"));
        handle.join().unwrap();
    }

    #[test]
    fn dispatch_after_loop_dropped_discards_job() {
        let (context, main_loop) = MainThread::current();
        drop(main_loop);
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        context.dispatch(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(context.tx.is_disconnected());
        assert_eq!(context.tx.len(), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn from_config_uses_name() {
        let config = ContextConfig {
            name: String::from("render"),
        };
        let (context, _main_loop) = MainThread::from_config(&config);
        assert_eq!(context.name(), "render");
        assert_eq!(context.shared().name(), "render");
    }
}
