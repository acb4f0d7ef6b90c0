use std::collections::VecDeque;

/// Fixed-capacity FIFO of label indices with a per-index occurrence count.
///
/// Not synchronized; [`WindowTracker`](crate::WindowTracker) owns it behind a mutex.
pub(crate) struct RollingWindow {
    capacity: usize,
    slots: VecDeque<usize>,
    counts: Box<[u64]>,
}

impl RollingWindow {
    pub(crate) fn new(capacity: usize, labels: usize) -> Self {
        Self {
            capacity,
            slots: VecDeque::with_capacity(capacity),
            counts: vec![0; labels].into_boxed_slice(),
        }
    }

    /// Push `index`, evicting and returning the oldest entry if the window was full.
    pub(crate) fn push(&mut self, index: usize) -> Option<usize> {
        let evicted = if self.slots.len() == self.capacity {
            self.slots.pop_front()
        } else {
            None
        };
        if let Some(old) = evicted {
            self.counts[old] -= 1;
        }
        self.slots.push_back(index);
        self.counts[index] += 1;
        evicted
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn counts(&self) -> &[u64] {
        &self.counts
    }

    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots.iter().copied()
    }
}
