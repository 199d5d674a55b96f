use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};

pub const DEFAULT_WINDOW_CAPACITY: usize = 2000;

#[derive(Debug, Clone, Copy)]
struct Sample(f64);

impl PartialEq for Sample {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Sample {}

impl PartialOrd for Sample {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Sample {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Default)]
struct Multiset {
    counts: BTreeMap<Sample, usize>,
    len: usize,
}

impl Multiset {
    fn insert(&mut self, sample: Sample) {
        *self.counts.entry(sample).or_insert(0) += 1;
        self.len += 1;
    }

    fn remove(&mut self, sample: Sample) -> bool {
        let Some(count) = self.counts.get_mut(&sample) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            self.counts.remove(&sample);
        }
        self.len -= 1;
        true
    }

    fn first(&self) -> Option<Sample> {
        self.counts.keys().next().copied()
    }

    fn last(&self) -> Option<Sample> {
        self.counts.keys().next_back().copied()
    }

    fn pop_first(&mut self) -> Option<Sample> {
        let sample = self.first()?;
        self.remove(sample);
        Some(sample)
    }

    fn pop_last(&mut self) -> Option<Sample> {
        let sample = self.last()?;
        self.remove(sample);
        Some(sample)
    }

    fn clear(&mut self) {
        self.counts.clear();
        self.len = 0;
    }
}

/// Median over the most recent `capacity` samples.
///
/// Samples are kept twice: once in arrival order so the oldest can be evicted,
/// and once split across two ordered multisets around the median. `lower` holds
/// the smaller half and is never shorter than `upper` nor longer by more than one,
/// so both insertion and eviction cost O(log n).
#[derive(Debug)]
pub struct SlidingMedian {
    window: VecDeque<f64>,
    capacity: usize,
    lower: Multiset,
    upper: Multiset,
}

impl Default for SlidingMedian {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

impl SlidingMedian {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            lower: Multiset::default(),
            upper: Multiset::default(),
        }
    }

    /// Adds a sample, evicting the oldest one when the window is full.
    /// Returns `false` and leaves the window untouched for NaN or infinite input.
    pub fn push(&mut self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }

        if self.window.len() >= self.capacity {
            if let Some(oldest) = self.window.pop_front() {
                self.remove_ordered(Sample(oldest));
            }
        }

        self.window.push_back(value);
        self.insert_ordered(Sample(value));
        true
    }

    pub fn median(&self) -> Option<f64> {
        let low = self.lower.last()?;
        if self.lower.len > self.upper.len {
            return Some(low.0);
        }
        let high = self.upper.first()?;
        Some((low.0 + high.0) / 2.0)
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.lower.clear();
        self.upper.clear();
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples in arrival order, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.window.iter().copied()
    }

    fn insert_ordered(&mut self, sample: Sample) {
        match self.lower.last() {
            Some(boundary) if sample > boundary => self.upper.insert(sample),
            _ => self.lower.insert(sample),
        }
        self.rebalance();
    }

    fn remove_ordered(&mut self, sample: Sample) {
        let in_lower = self.lower.last().is_some_and(|boundary| sample <= boundary);
        if !(in_lower && self.lower.remove(sample)) {
            self.upper.remove(sample);
        }
        self.rebalance();
    }

    fn rebalance(&mut self) {
        while self.lower.len > self.upper.len + 1 {
            if let Some(moved) = self.lower.pop_last() {
                self.upper.insert(moved);
            }
        }
        while self.upper.len > self.lower.len {
            if let Some(moved) = self.upper.pop_first() {
                self.lower.insert(moved);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted_median(values: &[f64]) -> f64 {
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        }
    }

    #[test]
    fn test_empty_window_has_no_median() {
        let median = SlidingMedian::new(8);
        assert!(median.is_empty());
        assert_eq!(median.median(), None);
    }

    #[test]
    fn test_eviction_keeps_last_samples() {
        let mut median = SlidingMedian::new(3);
        for value in [5.0, 1.0, 3.0, 9.0] {
            median.push(value);
        }

        assert_eq!(median.samples().collect::<Vec<_>>(), vec![1.0, 3.0, 9.0]);
        assert_eq!(median.median(), Some(3.0));
    }

    #[test]
    fn test_even_count_averages_central_values() {
        let mut median = SlidingMedian::new(4);
        median.push(2.0);
        median.push(4.0);
        assert_eq!(median.median(), Some(3.0));
    }

    #[test]
    fn test_matches_sorting_reference() {
        let values: Vec<f64> = (0..57u32)
            .map(|i| ((i * 7919) % 101) as f64 - 50.0 + (i % 3) as f64 * 0.25)
            .collect();

        let mut median = SlidingMedian::new(values.len());
        for (i, value) in values.iter().enumerate() {
            median.push(*value);
            assert_eq!(median.median(), Some(sorted_median(&values[..=i])));
        }
    }

    #[test]
    fn test_window_overflow_matches_tail() {
        let capacity = 16;
        let values: Vec<f64> = (0..100u32).map(|i| ((i * 37) % 23) as f64).collect();

        let mut median = SlidingMedian::new(capacity);
        for value in &values {
            median.push(*value);
        }

        let tail = &values[values.len() - capacity..];
        assert_eq!(median.len(), capacity);
        assert_eq!(median.samples().collect::<Vec<_>>(), tail.to_vec());
        assert_eq!(median.median(), Some(sorted_median(tail)));
    }

    #[test]
    fn test_duplicates_evict_cleanly() {
        let mut median = SlidingMedian::new(3);
        for value in [4.0, 4.0, 4.0, 1.0, 1.0, 1.0] {
            median.push(value);
        }
        assert_eq!(median.median(), Some(1.0));
    }

    #[test]
    fn test_rejects_non_finite() {
        let mut median = SlidingMedian::new(4);
        assert!(!median.push(f64::NAN));
        assert!(!median.push(f64::INFINITY));
        assert!(median.is_empty());

        assert!(median.push(1.5));
        assert_eq!(median.median(), Some(1.5));
    }

    #[test]
    fn test_reset() {
        let mut median = SlidingMedian::new(4);
        median.push(1.0);
        median.push(2.0);
        median.reset();

        assert_eq!(median.len(), 0);
        assert_eq!(median.median(), None);

        median.push(7.0);
        assert_eq!(median.median(), Some(7.0));
    }

    #[test]
    fn test_zero_capacity_holds_one_sample() {
        let mut median = SlidingMedian::new(0);
        assert_eq!(median.capacity(), 1);

        median.push(3.0);
        median.push(8.0);
        assert_eq!(median.len(), 1);
        assert_eq!(median.median(), Some(8.0));
    }
}
