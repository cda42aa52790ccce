use crate::telemetry::Sample;
use std::collections::VecDeque;

/// Fixed-capacity buffer of the most recent samples in arrival order. At
/// capacity, pushing evicts the oldest entry.
#[derive(Debug)]
pub struct SampleWindow {
    capacity: usize,
    buf: VecDeque<Sample>,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            buf: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, sample: Sample) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(sample);
    }

    /// Independent copy of the current contents; later pushes are never
    /// visible through it.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.buf.iter().cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(ph: f64) -> Sample {
        Sample {
            timestamp: Utc::now(),
            ph: Some(ph),
            turbidity: None,
            dissolved_solids: None,
        }
    }

    #[test]
    fn length_never_exceeds_capacity() {
        let mut window = SampleWindow::new(8);
        for i in 0..100 {
            window.push(sample(i as f64));
            assert!(window.len() <= window.capacity());
        }
        assert_eq!(window.len(), 8);
    }

    #[test]
    fn overflow_evicts_oldest_first() {
        let mut window = SampleWindow::new(3);
        for i in 1..=4 {
            window.push(sample(i as f64));
        }
        let snapshot = window.snapshot();
        assert_eq!(snapshot.len(), 3);
        // The first push was evicted; the window now starts at the second.
        assert_eq!(snapshot[0].ph, Some(2.0));
        assert_eq!(snapshot[2].ph, Some(4.0));
    }

    #[test]
    fn snapshot_is_isolated_from_later_pushes() {
        let mut window = SampleWindow::new(4);
        window.push(sample(1.0));
        window.push(sample(2.0));
        let snapshot = window.snapshot();

        window.push(sample(3.0));
        window.push(sample(4.0));
        window.push(sample(5.0));

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].ph, Some(2.0));
        assert_eq!(window.len(), 4);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut window = SampleWindow::new(0);
        window.push(sample(1.0));
        window.push(sample(2.0));
        assert_eq!(window.capacity(), 1);
        assert_eq!(window.len(), 1);
        assert_eq!(window.snapshot()[0].ph, Some(2.0));
    }
}
