//! Shared job queue
//!
//! A blocking double-ended queue: planned jobs are pushed at the back and
//! popped from the front, while jobs handed back by a failing worker are
//! pushed at the front so they run before any later batch.

use crate::core::GridPoint;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// What a worker can take off the queue
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Message {
    /// A grid point to evaluate
    Job(GridPoint),
    /// Tells workers to stop; every receiver puts it back for its siblings
    Stop,
}

/// Blocking job queue shared by all workers
#[derive(Debug, Default)]
pub struct JobQueue {
    items: Mutex<VecDeque<Message>>,
    available: Condvar,
}

impl JobQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue holding `points` in order
    pub fn with_jobs<I: IntoIterator<Item = GridPoint>>(points: I) -> Self {
        let queue = Self::new();
        queue
            .items
            .lock()
            .extend(points.into_iter().map(Message::Job));
        queue
    }

    /// Append a job behind all queued work
    pub fn push(&self, point: GridPoint) {
        self.push_back(Message::Job(point));
    }

    /// Put a job back in front of all queued work
    pub fn requeue(&self, point: GridPoint) {
        self.push_front(Message::Job(point));
    }

    /// Ask the workers to stop once they reach the end of the queued work
    pub fn stop(&self) {
        self.push_back(Message::Stop);
    }

    /// Put a message back at the front, used to pass `Stop` along
    pub fn push_front(&self, message: Message) {
        self.items.lock().push_front(message);
        self.available.notify_one();
    }

    fn push_back(&self, message: Message) {
        self.items.lock().push_back(message);
        self.available.notify_one();
    }

    /// Take the next message, blocking until one is available
    pub fn pop(&self) -> Message {
        let mut items = self.items.lock();
        loop {
            if let Some(message) = items.pop_front() {
                return message;
            }
            self.available.wait(&mut items);
        }
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn p(c: f64) -> GridPoint {
        GridPoint::new(c, 0.0)
    }

    #[test]
    fn test_fifo_dispatch() {
        let queue = JobQueue::with_jobs([p(1.0), p(2.0)]);
        queue.push(p(3.0));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Message::Job(p(1.0)));
        assert_eq!(queue.pop(), Message::Job(p(2.0)));
        assert_eq!(queue.pop(), Message::Job(p(3.0)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_requeue_goes_first() {
        let queue = JobQueue::with_jobs([p(1.0), p(2.0), p(3.0)]);
        let claimed = queue.pop();
        assert_eq!(claimed, Message::Job(p(1.0)));

        queue.requeue(p(1.0));
        assert_eq!(queue.pop(), Message::Job(p(1.0)));
        assert_eq!(queue.pop(), Message::Job(p(2.0)));
    }

    #[test]
    fn test_stop_queued_after_jobs() {
        let queue = JobQueue::with_jobs([p(1.0)]);
        queue.stop();
        assert_eq!(queue.pop(), Message::Job(p(1.0)));
        assert_eq!(queue.pop(), Message::Stop);
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let queue = Arc::new(JobQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };

        thread::sleep(Duration::from_millis(20));
        queue.push(p(9.0));
        assert_eq!(consumer.join().unwrap(), Message::Job(p(9.0)));
    }

    #[test]
    fn test_stop_chain_reaches_every_consumer() {
        let queue = Arc::new(JobQueue::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || loop {
                    if let Message::Stop = queue.pop() {
                        queue.push_front(Message::Stop);
                        break;
                    }
                })
            })
            .collect();

        queue.stop();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.pop(), Message::Stop);
    }
}
