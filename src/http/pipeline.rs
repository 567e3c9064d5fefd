//! FIFO of requests whose headers are parsed but which have not been
//! dispatched yet.

use std::collections::VecDeque;

use crate::http::request::Request;

#[derive(Debug, Default)]
pub struct Pipeline {
    queue: VecDeque<Request>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail.
    pub fn enqueue(&mut self, request: Request) {
        self.queue.push_back(request);
    }

    /// Remove from the head.
    pub fn dequeue(&mut self) -> Option<Request> {
        self.queue.pop_front()
    }

    pub fn head(&self) -> Option<&Request> {
        self.queue.front()
    }

    /// The most recently enqueued request, the one the tokenizer is filling.
    pub fn tail_mut(&mut self) -> Option<&mut Request> {
        self.queue.back_mut()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop every queued request.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
