// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Error, Result};

/// A row-major block of integer samples.
///
/// Rows are time-ordered scans, columns are the monitored channels (0/1
/// levels) followed by one trailing tick counter column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBatch {
    data: Vec<i64>,
    columns: usize,
}

impl SampleBatch {
    pub fn new(columns: usize) -> Self {
        SampleBatch {
            data: Vec::new(),
            columns,
        }
    }

    pub fn from_flat(data: Vec<i64>, columns: usize) -> Result<Self> {
        if columns == 0 || data.len() % columns != 0 {
            return Err(Error::InvalidParameter(format!(
                "{} samples cannot be split into rows of {} columns",
                data.len(),
                columns
            )));
        }
        Ok(SampleBatch { data, columns })
    }

    pub fn from_rows<R: AsRef<[i64]>>(rows: &[R]) -> Result<Self> {
        let columns = rows.first().map_or(0, |row| row.as_ref().len());
        let mut batch = SampleBatch::new(columns);
        for row in rows {
            batch.push_row(row.as_ref())?;
        }
        Ok(batch)
    }

    pub fn push_row(&mut self, row: &[i64]) -> Result<()> {
        if row.len() != self.columns {
            return Err(Error::InvalidParameter(format!(
                "Row of {} values does not match batch width {}",
                row.len(),
                self.columns
            )));
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn rows(&self) -> usize {
        if self.columns == 0 {
            0
        } else {
            self.data.len() / self.columns
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&[i64]> {
        let start = index.checked_mul(self.columns)?;
        self.data.get(start..start + self.columns)
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[i64]> {
        self.data.chunks_exact(self.columns.max(1))
    }

    pub fn last_row(&self) -> Option<&[i64]> {
        self.data.rchunks_exact(self.columns.max(1)).next()
    }

    /// Tick counter value of the given row.
    pub fn tick(&self, row: usize) -> Option<i64> {
        self.row(row).and_then(|row| row.last().copied())
    }

    pub fn ticks(&self) -> impl Iterator<Item = i64> + '_ {
        self.iter_rows().map(|row| row[row.len() - 1])
    }

    pub fn ticks_mut(&mut self) -> impl Iterator<Item = &mut i64> {
        self.data
            .chunks_exact_mut(self.columns.max(1))
            .filter_map(|row| row.last_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows() {
        let batch = SampleBatch::from_rows(&[[0, 1, 10], [1, 1, 11]]).unwrap();
        assert_eq!(batch.rows(), 2);
        assert_eq!(batch.columns(), 3);
        assert_eq!(batch.row(1), Some(&[1, 1, 11][..]));
        assert_eq!(batch.row(2), None);
        assert_eq!(batch.last_row(), Some(&[1, 1, 11][..]));
        assert_eq!(batch.ticks().collect::<Vec<_>>(), vec![10, 11]);
    }

    #[test]
    fn test_from_flat_rejects_partial_rows() {
        assert!(SampleBatch::from_flat(vec![1, 2, 3], 2).is_err());
        assert!(SampleBatch::from_flat(vec![1, 2], 0).is_err());
        let batch = SampleBatch::from_flat(vec![1, 2, 3, 4], 2).unwrap();
        assert_eq!(batch.tick(1), Some(4));
        assert_eq!(batch.tick(2), None);
    }

    #[test]
    fn test_ticks_mut() {
        let mut batch = SampleBatch::from_rows(&[[0, 5], [1, 6]]).unwrap();
        batch.ticks_mut().for_each(|tick| *tick += 100);
        assert_eq!(batch.ticks().collect::<Vec<_>>(), vec![105, 106]);
        assert_eq!(batch.row(0), Some(&[0, 105][..]));
    }

    #[test]
    fn test_empty_batch() {
        let batch = SampleBatch::new(3);
        assert!(batch.is_empty());
        assert_eq!(batch.rows(), 0);
        assert!(batch.last_row().is_none());
        assert_eq!(batch.row(0), None);
        assert_eq!(batch.tick(0), None);
    }
}
