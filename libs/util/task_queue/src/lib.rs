// This file is part of Aerosol.
//
// Aerosol is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Aerosol is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Aerosol.  If not, see <http://www.gnu.org/licenses/>.

//! Serialized task queues for marshalling work between execution contexts.
//!
//! A [TaskQueue] is pumped by exactly one thread at a time; every task
//! submitted through a [TaskQueueHandle] runs on that thread, in submission
//! order. The GPU rendering queue is one such queue; callers that want
//! results delivered back to themselves hand over a second handle and pump
//! their own queue.

use anyhow::Result;
use crossbeam::channel::{self, Receiver, Sender};
use log::{error, trace};
use parking_lot::Mutex;
use std::{
    sync::Arc,
    thread::{self, JoinHandle, ThreadId},
    time::Duration,
};

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Task),
    Shutdown,
}

/// The receiving half of a task queue. Owned by the thread that pumps it.
pub struct TaskQueue {
    handle: TaskQueueHandle,
    rx: Receiver<Message>,
}

/// A cheap, clonable submission handle onto a [TaskQueue].
#[derive(Clone)]
pub struct TaskQueueHandle {
    name: Arc<str>,
    tx: Sender<Message>,
    owner: Arc<Mutex<Option<ThreadId>>>,
}

impl TaskQueue {
    pub fn new(name: &str) -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            handle: TaskQueueHandle {
                name: name.into(),
                tx,
                owner: Arc::new(Mutex::new(None)),
            },
            rx,
        }
    }

    /// Create a queue and pump it forever on a fresh named thread.
    pub fn spawn(name: &str) -> Result<(TaskQueueHandle, JoinHandle<()>)> {
        let queue = Self::new(name);
        let handle = queue.handle();
        let join = thread::Builder::new()
            .name(format!("{}-queue", name))
            .spawn(move || queue.run_forever())?;
        Ok((handle, join))
    }

    pub fn handle(&self) -> TaskQueueHandle {
        self.handle.clone()
    }

    pub fn name(&self) -> &str {
        &self.handle.name
    }

    /// Mark the calling thread as the queue's execution context.
    pub fn claim_current_thread(&self) {
        let mut owner = self.handle.owner.lock();
        *owner = Some(thread::current().id());
        trace!("task queue {} claimed by {:?}", self.handle.name, *owner);
    }

    /// Pump tasks until a shutdown message arrives.
    pub fn run_forever(self) {
        self.claim_current_thread();
        loop {
            match self.rx.recv() {
                Ok(Message::Run(task)) => task(),
                Ok(Message::Shutdown) | Err(_) => {
                    trace!("task queue {} shutting down", self.handle.name);
                    return;
                }
            }
        }
    }

    /// Run at most one queued task, waiting up to `timeout` for it to arrive.
    /// Returns whether a task ran.
    pub fn pump_one(&self, timeout: Duration) -> bool {
        self.claim_current_thread();
        match self.rx.recv_timeout(timeout) {
            Ok(Message::Run(task)) => {
                task();
                true
            }
            Ok(Message::Shutdown) | Err(_) => false,
        }
    }

    /// Run every task that is already queued, without waiting for more.
    /// Returns the number of tasks that ran.
    pub fn drain(&self) -> usize {
        self.claim_current_thread();
        let mut count = 0;
        while let Ok(Message::Run(task)) = self.rx.try_recv() {
            task();
            count += 1;
        }
        count
    }
}

impl TaskQueueHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a task to run on the queue's execution context.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Message::Run(Box::new(task))).is_err() {
            error!("task submitted to dead queue {}", self.name);
        }
    }

    /// Whether the calling thread is the queue's execution context.
    pub fn is_current(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }

    /// Ask the pumping thread to stop once it reaches this message.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Message::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_tasks_in_submission_order() {
        let queue = TaskQueue::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let seen = seen.clone();
            queue.handle().submit(move || seen.lock().push(i));
        }
        assert_eq!(queue.drain(), 4);
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn is_current_tracks_the_pumping_thread() {
        let queue = TaskQueue::new("test");
        let handle = queue.handle();
        assert!(!handle.is_current());
        queue.drain();
        assert!(handle.is_current());

        let (remote, join) = TaskQueue::spawn("remote").unwrap();
        let (tx, rx) = channel::bounded(1);
        let probe = remote.clone();
        remote.submit(move || {
            tx.send(probe.is_current()).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(!remote.is_current());
        remote.shutdown();
        join.join().unwrap();
    }

    #[test]
    fn cross_thread_submission_round_trip() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (worker, join) = TaskQueue::spawn("worker").unwrap();
        let reply = TaskQueue::new("reply");
        let count = Arc::new(AtomicUsize::new(0));

        let reply_handle = reply.handle();
        let observed = count.clone();
        worker.submit(move || {
            reply_handle.submit(move || {
                observed.fetch_add(1, Ordering::SeqCst);
            });
        });

        let mut waited = 0;
        while count.load(Ordering::SeqCst) == 0 {
            reply.pump_one(Duration::from_millis(10));
            waited += 1;
            assert!(waited < 1000, "reply never arrived");
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        worker.shutdown();
        join.join().unwrap();
    }

    #[test]
    fn shutdown_stops_the_pump() {
        let (handle, join) = TaskQueue::spawn("short-lived").unwrap();
        handle.shutdown();
        join.join().unwrap();
        // Submissions after shutdown are dropped, not fatal.
        handle.submit(|| ());
    }
}
