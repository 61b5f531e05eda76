use std::collections::VecDeque;

/// Staged values that become visible a fixed number of frames after they
/// were produced, like an asynchronous GPU readback.
///
/// Readers always get the newest *resolved* value, never block, and can see
/// which frame it belongs to.
#[derive(Debug)]
pub struct ReadbackRing<T> {
    in_flight: VecDeque<(u64, T)>,
    latency: usize,
    resolved: Option<(u64, T)>,
}

impl<T> ReadbackRing<T> {
    /// `latency` of 0 resolves values immediately.
    pub fn new(latency: usize) -> Self {
        Self {
            in_flight: VecDeque::with_capacity(latency + 1),
            latency,
            resolved: None,
        }
    }

    pub fn latency(&self) -> usize {
        self.latency
    }

    /// Stage the value produced at `frame`, resolving whatever has aged out.
    pub fn push(&mut self, frame: u64, value: T) {
        self.in_flight.push_back((frame, value));
        while self.in_flight.len() > self.latency {
            self.resolved = self.in_flight.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&T> {
        self.resolved.as_ref().map(|(_, v)| v)
    }

    /// Frame the latest resolved value was produced in.
    pub fn latest_frame(&self) -> Option<u64> {
        self.resolved.as_ref().map(|(frame, _)| *frame)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_resolve_after_latency() {
        let mut ring = ReadbackRing::new(2);
        ring.push(1, "a");
        ring.push(2, "b");
        assert_eq!(ring.latest(), None);
        ring.push(3, "c");
        assert_eq!(ring.latest(), Some(&"a"));
        assert_eq!(ring.latest_frame(), Some(1));
        ring.push(4, "d");
        assert_eq!(ring.latest(), Some(&"b"));
    }

    #[test]
    fn test_zero_latency_is_immediate() {
        let mut ring = ReadbackRing::new(0);
        ring.push(7, 42u32);
        assert_eq!(ring.latest(), Some(&42));
        assert_eq!(ring.in_flight(), 0);
    }
}
