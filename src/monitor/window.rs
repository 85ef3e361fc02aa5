//! Fixed-capacity rolling sample history

use std::collections::VecDeque;

/// Keeps the most recent `capacity` samples; the oldest is evicted first
#[derive(Debug, Clone)]
pub struct MetricsWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl MetricsWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn latest(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest() {
        let mut window = MetricsWindow::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            window.push(v);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.latest(), Some(4.0));
        assert_eq!(window.mean(), Some(3.0));
    }

    #[test]
    fn test_empty_window() {
        let mut window = MetricsWindow::new(0);
        assert_eq!(window.capacity(), 1);
        assert_eq!(window.mean(), None);
        assert_eq!(window.latest(), None);
        window.push(5.0);
        window.clear();
        assert!(window.is_empty());
    }
}
