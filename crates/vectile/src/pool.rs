//! Fixed-size worker pool with a two-priority ready queue.
//!
//! Tasks enter one shared deque from either end: `push_back` for fresh
//! work, `push_front` for work that should run before anything not yet
//! started. Finished tasks leave the workers through a completion channel
//! drained by a control thread, which invokes the finish hook exactly
//! once per task and releases it.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, unbounded};

/// A unit of background work.
pub trait Routine: Send {
    fn run(&mut self);
}

/// Boxed task, owned uniquely by the queue until a worker takes it.
pub type Task = Box<dyn Routine>;

/// Hook invoked on the control thread once per finished task. It must not
/// block and must not re-enter scheduling logic; dropping its argument is
/// the task's release point.
pub type FinishHook = Box<dyn FnMut(Task) + Send>;

struct Queue {
    tasks: VecDeque<Task>,
    open: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    ready: Condvar,
}

/// Fixed pool of worker threads draining one shared two-priority queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    done_tx: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    control: Option<JoinHandle<()>>,
}

impl WorkerPool {
    /// Pool with an explicit worker count.
    #[must_use]
    pub fn new(workers: usize, mut on_finished: FinishHook) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                tasks: VecDeque::new(),
                open: true,
            }),
            ready: Condvar::new(),
        });

        let (done_tx, done_rx) = unbounded::<Task>();

        let workers = (0..workers.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                let done_tx = done_tx.clone();
                thread::spawn(move || worker_loop(&shared, &done_tx))
            })
            .collect();

        let control = thread::spawn(move || {
            while let Ok(task) = done_rx.recv() {
                on_finished(task);
            }
        });

        Self {
            shared,
            done_tx: Some(done_tx),
            workers,
            control: Some(control),
        }
    }

    /// Pool sized for the machine: two cores are left for the controller
    /// and rendering paths, with at least one worker.
    #[must_use]
    pub fn with_default_size(on_finished: FinishHook) -> Self {
        Self::new(Self::default_worker_count(), on_finished)
    }

    /// `max(available_parallelism - 2, 1)`.
    #[must_use]
    pub fn default_worker_count() -> usize {
        thread::available_parallelism().map_or(1, |n| n.get().saturating_sub(2).max(1))
    }

    /// Queue a task behind everything already waiting.
    pub fn push_back(&self, task: Task) {
        self.push(task, false);
    }

    /// Queue a task ahead of everything not yet started.
    pub fn push_front(&self, task: Task) {
        self.push(task, true);
    }

    fn push(&self, task: Task, front: bool) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            if front {
                queue.tasks.push_front(task);
            } else {
                queue.tasks.push_back(task);
            }
        }
        self.shared.ready.notify_one();
    }

    /// Stop intake, drain queued work, and join every thread. Terminal.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            if !queue.open {
                return;
            }
            queue.open = false;
        }
        self.shared.ready.notify_all();

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }

        // Disconnect the completion channel so the control thread exits
        // after the last finished task.
        self.done_tx.take();
        if let Some(control) = self.control.take() {
            let _ = control.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared, done_tx: &Sender<Task>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    break Some(task);
                }
                if !queue.open {
                    break None;
                }
                queue = shared.ready.wait(queue).unwrap();
            }
        };

        let Some(mut task) = task else { return };
        task.run();
        let _ = done_tx.send(task);
    }
}
