use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::shared::error::{MediaError, MediaResult};

type Task<I, O> = Arc<dyn Fn(I) -> MediaResult<O> + Send + Sync>;

/// Bounded worker pool that hands results back in submission order.
///
/// Layout: `submit → workers [task] → collector [reorder] → on_result`
///
/// `submit` blocks while `parallelism` tasks are in flight: a permit is
/// taken from a pre-filled channel and only returned once the collector
/// has delivered that task's result. A failing or panicking task is
/// reported through `on_result` and does not affect its siblings.
pub struct AsyncExecutor<I: Send + 'static> {
    task_tx: Option<Sender<(u64, I)>>,
    permit_rx: Receiver<()>,
    workers: Vec<JoinHandle<()>>,
    collector: Option<JoinHandle<()>>,
    next_index: u64,
}

impl<I: Send + 'static> AsyncExecutor<I> {
    pub fn new<O, F, C>(parallelism: usize, task: F, mut on_result: C) -> Self
    where
        O: Send + 'static,
        F: Fn(I) -> MediaResult<O> + Send + Sync + 'static,
        C: FnMut(MediaResult<O>) + Send + 'static,
    {
        let parallelism = parallelism.max(1);
        let task: Task<I, O> = Arc::new(task);

        let (permit_tx, permit_rx) = crossbeam_channel::bounded::<()>(parallelism);
        for _ in 0..parallelism {
            // Cannot fail: the channel has exactly `parallelism` slots.
            let _ = permit_tx.send(());
        }

        let (task_tx, task_rx) = crossbeam_channel::bounded::<(u64, I)>(parallelism);
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<(u64, MediaResult<O>)>();

        let workers = (0..parallelism)
            .map(|_| spawn_worker(task.clone(), task_rx.clone(), result_tx.clone()))
            .collect();
        drop(result_tx);

        let collector = std::thread::spawn(move || {
            let mut pending: BTreeMap<u64, MediaResult<O>> = BTreeMap::new();
            let mut next = 0u64;
            for (index, result) in result_rx {
                pending.insert(index, result);
                while let Some(result) = pending.remove(&next) {
                    on_result(result);
                    next += 1;
                    let _ = permit_tx.send(());
                }
            }
        });

        Self {
            task_tx: Some(task_tx),
            permit_rx,
            workers,
            collector: Some(collector),
            next_index: 0,
        }
    }

    /// Queues `input`, blocking until a permit is free.
    pub fn submit(&mut self, input: I) -> MediaResult<()> {
        let Some(task_tx) = self.task_tx.as_ref() else {
            return Err(MediaError::InvalidArgument("executor is closed".into()));
        };
        self.permit_rx
            .recv()
            .map_err(|_| MediaError::FrameProcessing("result collector stopped".into()))?;
        task_tx
            .send((self.next_index, input))
            .map_err(|_| MediaError::FrameProcessing("all workers stopped".into()))?;
        self.next_index += 1;
        Ok(())
    }

    /// Number of tasks submitted so far.
    pub fn submitted(&self) -> u64 {
        self.next_index
    }

    /// Waits for every submitted task to be delivered, then joins all
    /// threads. Safe to call more than once.
    pub fn close(&mut self) {
        drop(self.task_tx.take());
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("Executor worker thread panicked");
            }
        }
        if let Some(collector) = self.collector.take() {
            if collector.join().is_err() {
                log::error!("Executor result callback panicked");
            }
        }
    }
}

impl<I: Send + 'static> Drop for AsyncExecutor<I> {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_worker<I, O>(
    task: Task<I, O>,
    task_rx: Receiver<(u64, I)>,
    result_tx: Sender<(u64, MediaResult<O>)>,
) -> JoinHandle<()>
where
    I: Send + 'static,
    O: Send + 'static,
{
    std::thread::spawn(move || {
        for (index, input) in task_rx {
            let result = panic::catch_unwind(AssertUnwindSafe(|| task(input)))
                .unwrap_or_else(|payload| Err(panic_error(payload)));
            if result_tx.send((index, result)).is_err() {
                break;
            }
        }
    })
}

fn panic_error(payload: Box<dyn Any + Send>) -> MediaError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    MediaError::FrameProcessing(format!("task panicked: {message}"))
}

/// Worker count used when the caller does not choose one.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
