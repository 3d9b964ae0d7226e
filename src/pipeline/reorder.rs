use crate::error::PipelineError;

/// Ring arena restoring index order of out-of-order completions.
///
/// Only indices in `[next, next + capacity)` are accepted, so each one maps
/// to a distinct slot and memory never exceeds `capacity` items. Callers
/// bound in-flight work to the same capacity.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    slots: Vec<Option<T>>,
    next: usize,
    buffered: usize,
    peak: usize,
}

impl<T> ReorderBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            next: 0,
            buffered: 0,
            peak: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Next index to be emitted
    pub fn next_index(&self) -> usize {
        self.next
    }

    pub fn len(&self) -> usize {
        self.buffered
    }

    pub fn is_empty(&self) -> bool {
        self.buffered == 0
    }

    /// Most items buffered at once
    pub fn peak(&self) -> usize {
        self.peak
    }

    pub fn insert(&mut self, index: usize, item: T) -> Result<(), PipelineError> {
        if index < self.next {
            return Err(PipelineError::OutOfOrder {
                index,
                reason: format!("already written (next is {})", self.next),
            });
        }
        if index >= self.next + self.capacity() {
            return Err(PipelineError::OutOfOrder {
                index,
                reason: format!(
                    "outside the reorder window [{}, {})",
                    self.next,
                    self.next + self.capacity()
                ),
            });
        }

        let slot = index % self.capacity();
        if self.slots[slot].is_some() {
            return Err(PipelineError::OutOfOrder {
                index,
                reason: "duplicate completion".to_string(),
            });
        }

        self.slots[slot] = Some(item);
        self.buffered += 1;
        self.peak = self.peak.max(self.buffered);
        Ok(())
    }

    /// Take the item at `next_index()` if it has arrived
    pub fn pop_ready(&mut self) -> Option<(usize, T)> {
        let slot = self.next % self.capacity();
        let item = self.slots[slot].take()?;
        let index = self.next;
        self.next += 1;
        self.buffered -= 1;
        Some((index, item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn drain(buffer: &mut ReorderBuffer<usize>, out: &mut Vec<usize>) {
        while let Some((index, value)) = buffer.pop_ready() {
            assert_eq!(index, value);
            out.push(value);
        }
    }

    #[test]
    fn test_drains_in_order() {
        let mut buffer = ReorderBuffer::new(4);
        let mut out = Vec::new();

        buffer.insert(2, 2).unwrap();
        buffer.insert(1, 1).unwrap();
        drain(&mut buffer, &mut out);
        assert!(out.is_empty());

        buffer.insert(0, 0).unwrap();
        drain(&mut buffer, &mut out);
        assert_eq!(out, vec![0, 1, 2]);
        assert_eq!(buffer.next_index(), 3);
        assert!(buffer.is_empty());
        assert_eq!(buffer.peak(), 3);
    }

    #[test]
    fn test_rejects_stale_duplicate_and_far_indices() {
        let mut buffer = ReorderBuffer::new(4);
        buffer.insert(0, 0).unwrap();
        buffer.pop_ready().unwrap();

        assert!(matches!(buffer.insert(0, 0), Err(PipelineError::OutOfOrder { index: 0, .. })));
        buffer.insert(2, 2).unwrap();
        assert!(buffer.insert(2, 2).is_err());
        assert!(buffer.insert(5, 5).is_err());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_random_windowed_arrival() {
        let mut rng = SmallRng::seed_from_u64(7);
        let capacity = 8;
        let total = 500;
        let mut buffer = ReorderBuffer::new(capacity);
        let mut out = Vec::new();

        // Emulate in-flight work bounded to `capacity`: shuffle each window
        let mut next_submit = 0;
        let mut pending: Vec<usize> = Vec::new();
        while out.len() < total {
            while next_submit < total && next_submit < buffer.next_index() + capacity && pending.len() + buffer.len() < capacity {
                pending.push(next_submit);
                next_submit += 1;
            }
            pending.shuffle(&mut rng);
            let index = pending.pop().unwrap();
            buffer.insert(index, index).unwrap();
            drain(&mut buffer, &mut out);
        }

        assert_eq!(out, (0..total).collect::<Vec<_>>());
        assert!(buffer.peak() <= capacity);
    }
}
