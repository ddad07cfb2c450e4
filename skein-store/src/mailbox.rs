//! The proxy mailbox: a shared response queue with pollable readiness.
//!
//! The mailbox is the only object touched by both the proxy's owner and the
//! store actor. A mutex guards the deque; a condition variable unblocks
//! waiting receivers; and a flare keeps a file descriptor readable exactly
//! while responses are queued, so external poll loops can integrate without
//! threads of their own.

use crate::flare::Flare;
use parking_lot::{Condvar, Mutex};
use skein_core::{Data, Error, RequestId};
use std::collections::VecDeque;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// A response to a proxy request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The id of the originating request.
    pub id: RequestId,
    /// The outcome of the request.
    pub answer: Result<Data, Error>,
}

/// The shared response queue of one proxy.
#[derive(Debug)]
pub struct Mailbox {
    queue: Mutex<VecDeque<Response>>,
    available: Condvar,
    flare: Flare,
}

impl Mailbox {
    pub(crate) fn new() -> io::Result<Self> {
        Ok(Self {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            flare: Flare::new()?,
        })
    }

    /// The pollable readiness descriptor: readable while at least one
    /// response is queued, cleared by draining the mailbox.
    pub fn fd(&self) -> RawFd {
        self.flare.fd()
    }

    /// Number of queued responses.
    pub fn buffer_size(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether no responses are queued.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Enqueue a response, raising readiness and waking one receiver.
    pub(crate) fn push(&self, response: Response) {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            self.flare.fire();
        }
        queue.push_back(response);
        drop(queue);
        self.available.notify_one();
    }

    /// Dequeue the next response without blocking.
    pub fn try_pop(&self) -> Option<Response> {
        let mut queue = self.queue.lock();
        let response = queue.pop_front();
        if response.is_some() && queue.is_empty() {
            self.flare.extinguish();
        }
        response
    }

    /// Dequeue the next response, blocking until one arrives.
    pub fn pop(&self) -> Response {
        let mut queue = self.queue.lock();
        loop {
            if let Some(response) = queue.pop_front() {
                if queue.is_empty() {
                    self.flare.extinguish();
                }
                return response;
            }
            self.available.wait(&mut queue);
        }
    }

    /// Dequeue the next response, giving up after `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Response> {
        let mut queue = self.queue.lock();
        if queue.is_empty() && self.available.wait_for(&mut queue, timeout).timed_out() {
            return None;
        }
        let response = queue.pop_front()?;
        if queue.is_empty() {
            self.flare.extinguish();
        }
        Some(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn response(id: u64) -> Response {
        Response { id: RequestId::new(id), answer: Ok(Data::from(id)) }
    }

    #[test]
    fn push_pop_preserves_arrival_order() {
        let mailbox = Mailbox::new().unwrap();
        mailbox.push(response(1));
        mailbox.push(response(2));

        assert_eq!(mailbox.buffer_size(), 2);
        assert_eq!(mailbox.pop().id, RequestId::new(1));
        assert_eq!(mailbox.pop().id, RequestId::new(2));
        assert!(mailbox.is_empty());
    }

    #[test]
    fn readiness_tracks_queue_level() {
        let mailbox = Mailbox::new().unwrap();
        assert!(!mailbox.flare.is_fired());

        mailbox.push(response(1));
        mailbox.push(response(2));
        assert!(mailbox.flare.is_fired());

        mailbox.try_pop().unwrap();
        assert!(mailbox.flare.is_fired());

        mailbox.try_pop().unwrap();
        assert!(!mailbox.flare.is_fired());
    }

    #[test]
    fn try_pop_on_empty() {
        let mailbox = Mailbox::new().unwrap();
        assert!(mailbox.try_pop().is_none());
    }

    #[test]
    fn pop_timeout_elapses() {
        let mailbox = Mailbox::new().unwrap();
        assert!(mailbox.pop_timeout(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn pop_blocks_until_push() {
        let mailbox = Arc::new(Mailbox::new().unwrap());
        let pusher = Arc::clone(&mailbox);

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            pusher.push(response(9));
        });

        let got = mailbox.pop();
        assert_eq!(got.id, RequestId::new(9));
        handle.join().unwrap();
    }
}
