//! Splitting a record set into ordered upload batches.

use std::num::NonZeroUsize;

use crate::record::CleanRecord;

/// One contiguous slice of an entity's records.
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    /// 0-based position.
    pub index: usize,
    /// Number of batches in the partition.
    pub total: usize,
    pub records: &'a [CleanRecord],
}

impl<'a> Batch<'a> {
    /// A single batch holding every record (single-shot upload).
    pub fn whole(records: &'a [CleanRecord]) -> Self {
        Self {
            index: 0,
            total: 1,
            records,
        }
    }

    pub fn is_first(&self) -> bool {
        self.index == 0
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Split `records` into chunks of at most `batch_size`, preserving order.
///
/// Only the last batch may be smaller. Empty input gives no batches.
pub fn partition(records: &[CleanRecord], batch_size: NonZeroUsize) -> Vec<Batch<'_>> {
    let total = records.len().div_ceil(batch_size.get());
    records
        .chunks(batch_size.get())
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            total,
            records: chunk,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CleanValue;

    fn records(n: usize) -> Vec<CleanRecord> {
        (0..n)
            .map(|i| {
                let mut r = CleanRecord::new();
                r.push("code", CleanValue::Integer(i as i64));
                r
            })
            .collect()
    }

    fn size(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_empty_input_gives_no_batches() {
        assert!(partition(&[], size(10)).is_empty());
    }

    #[test]
    fn test_master_table_scenario() {
        let recs = records(2500);
        let batches = partition(&recs, size(200));
        assert_eq!(batches.len(), 13);
        assert!(batches[..12].iter().all(|b| b.len() == 200));
        assert_eq!(batches[12].len(), 100);
        assert!(batches.iter().all(|b| b.total == 13));
        assert!(batches[0].is_first());
        assert!(!batches[1].is_first());
    }

    #[test]
    fn test_concatenation_reproduces_input() {
        for n in [0usize, 1, 2, 7, 10, 11, 99] {
            let recs = records(n);
            for b in 1..=12 {
                let batches = partition(&recs, size(b));
                let joined: Vec<CleanRecord> = batches
                    .iter()
                    .flat_map(|batch| batch.records.iter().cloned())
                    .collect();
                assert_eq!(joined, recs, "n={} b={}", n, b);

                for (i, batch) in batches.iter().enumerate() {
                    assert_eq!(batch.index, i);
                    if i + 1 < batches.len() {
                        assert_eq!(batch.len(), b);
                    } else {
                        assert!(batch.len() >= 1 && batch.len() <= b);
                    }
                }
            }
        }
    }

    #[test]
    fn test_batch_larger_than_input() {
        let recs = records(3);
        let batches = partition(&recs, size(500));
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[0].total, 1);
    }

    #[test]
    fn test_whole_batch() {
        let recs = records(4);
        let batch = Batch::whole(&recs);
        assert!(batch.is_first());
        assert_eq!(batch.total, 1);
        assert_eq!(batch.len(), 4);
    }
}
