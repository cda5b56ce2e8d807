use std::collections::VecDeque;

use crate::peer::IceCandidate;

/// Remote ICE candidates that arrived before the remote description.
///
/// Candidates are held in arrival order and released exactly once, when the
/// remote description is applied. After that every candidate passes straight
/// through.
#[derive(Debug, Default)]
pub struct PendingCandidates {
    queue: VecDeque<IceCandidate>,
    remote_description_set: bool,
}

impl PendingCandidates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the candidate if it can be applied now, otherwise queues it.
    pub fn accept(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.remote_description_set {
            Some(candidate)
        } else {
            self.queue.push_back(candidate);
            None
        }
    }

    /// Record that the remote description is in place and hand back the
    /// queued candidates in arrival order.
    pub fn mark_remote_description_set(&mut self) -> Vec<IceCandidate> {
        self.remote_description_set = true;
        self.queue.drain(..).collect()
    }

    pub fn is_ready(&self) -> bool {
        self.remote_description_set
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
