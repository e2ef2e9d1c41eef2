//! Task queue that moves connection work off the accept loop.
//!
//! A fixed pool of worker tasks pulls from one shared queue, so at most
//! `workers` connections are processed at the same time while any number can
//! wait in the queue. Stopping closes the queue and waits for the workers,
//! which keep going until every queued task has run.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, error};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::server::Error;

/// A unit of work handed to the dispatcher.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct Pool {
    sender: UnboundedSender<Task>,
    workers: Vec<JoinHandle<()>>,
}

/// A bounded pool of workers consuming a task queue.
pub struct Dispatcher {
    worker_count: usize,
    running: AtomicBool,
    queued: Arc<AtomicUsize>,
    pool: Mutex<Option<Pool>>,
}

impl Dispatcher {
    /// Create a stopped dispatcher that will run `workers` tasks concurrently.
    pub fn new(workers: usize) -> Self {
        Self {
            worker_count: workers.max(1),
            running: AtomicBool::new(false),
            queued: Arc::new(AtomicUsize::new(0)),
            pool: Mutex::new(None),
        }
    }

    /// Spawn the workers on the current tokio runtime. Does nothing if already running.
    pub fn start(&self) -> Result<(), Error> {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        if pool.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::InternalError(format!("dispatcher needs a tokio runtime: {e}")))?;

        let (sender, receiver) = mpsc::unbounded_channel::<Task>();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let workers = (0..self.worker_count)
            .map(|id| runtime.spawn(worker(id, Arc::clone(&receiver), Arc::clone(&self.queued))))
            .collect();

        *pool = Some(Pool { sender, workers });
        self.running.store(true, Ordering::SeqCst);
        debug!("Dispatcher started with {} workers", self.worker_count);
        Ok(())
    }

    /// Queue a task. Fails if the dispatcher is not running.
    pub fn add_task<F>(&self, task: F) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        let pool = pool.as_ref().ok_or(Error::DispatcherStopped)?;

        self.queued.fetch_add(1, Ordering::SeqCst);
        if pool.sender.send(Box::pin(task)).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::DispatcherStopped);
        }
        Ok(())
    }

    /// Stop accepting tasks, run everything already queued, and wait for the workers.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner).take();

        let Some(Pool { sender, workers }) = pool else {
            return;
        };
        // Closing the channel lets workers drain what is left and then exit.
        drop(sender);
        for handle in workers {
            if let Err(e) = handle.await {
                error!("Dispatcher worker failed: {e}");
            }
        }
        debug!("Dispatcher stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Tasks waiting for a free worker.
    pub fn queued_tasks(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }
}

async fn worker(id: usize, queue: Arc<tokio::sync::Mutex<UnboundedReceiver<Task>>>, queued: Arc<AtomicUsize>) {
    loop {
        let task = queue.lock().await.recv().await;
        let Some(task) = task else {
            break;
        };
        queued.fetch_sub(1, Ordering::SeqCst);

        // Run in its own task so a panic is contained to that task.
        if let Err(e) = tokio::spawn(task).await {
            error!("Dispatcher worker {id}: task failed: {e}");
        }
    }
    debug!("Dispatcher worker {id} exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lifecycle() {
        let dispatcher = Dispatcher::new(2);
        assert!(!dispatcher.is_running());
        assert!(matches!(dispatcher.add_task(async {}), Err(Error::DispatcherStopped)));

        dispatcher.start().unwrap();
        assert!(dispatcher.is_running());
        dispatcher.start().unwrap();

        dispatcher.stop().await;
        assert!(!dispatcher.is_running());
        assert!(matches!(dispatcher.add_task(async {}), Err(Error::DispatcherStopped)));

        // Stopping twice is harmless.
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_stop_drains_queue() {
        let dispatcher = Dispatcher::new(1);
        dispatcher.start().unwrap();

        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let done = Arc::clone(&done);
            dispatcher.add_task(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.fetch_add(1, Ordering::SeqCst);
            }).unwrap();
        }

        dispatcher.stop().await;
        assert_eq!(done.load(Ordering::SeqCst), 10);
        assert_eq!(dispatcher.queued_tasks(), 0);
    }

    #[tokio::test]
    async fn test_single_worker_preserves_order() {
        let dispatcher = Dispatcher::new(1);
        dispatcher.start().unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = Arc::clone(&order);
            dispatcher.add_task(async move {
                order.lock().unwrap().push(i);
            }).unwrap();
        }

        dispatcher.stop().await;
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_worker_count() {
        let dispatcher = Dispatcher::new(3);
        dispatcher.start().unwrap();

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..12 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            dispatcher.add_task(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }).unwrap();
        }

        dispatcher.stop().await;
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_kill_worker() {
        let dispatcher = Dispatcher::new(1);
        dispatcher.start().unwrap();

        let done = Arc::new(AtomicBool::new(false));
        dispatcher.add_task(async { panic!("task blew up") }).unwrap();
        let flag = Arc::clone(&done);
        dispatcher.add_task(async move { flag.store(true, Ordering::SeqCst) }).unwrap();

        dispatcher.stop().await;
        assert!(done.load(Ordering::SeqCst));
    }
}
