//! Fragment buffers: `PartedData` accumulates a known-size inbound payload,
//! `BlockSizedData` slices a known-size outbound payload into indexed blocks.

use crate::error::{BridgeError, Result};

/// Accumulator for an in-flight upload of known total size.
#[derive(Debug, Clone, Default)]
pub struct PartedData {
    expected_size: usize,
    data: Vec<u8>,
}

impl PartedData {
    pub fn new(expected_size: usize) -> Self {
        Self {
            expected_size,
            data: Vec::with_capacity(expected_size.min(1 << 20)),
        }
    }

    /// Resets the buffer to accept a fresh upload of `expected_size` bytes.
    pub fn reset(&mut self, expected_size: usize) {
        self.expected_size = expected_size;
        self.data.clear();
    }

    pub fn expected_size(&self) -> usize {
        self.expected_size
    }

    pub fn current_size(&self) -> usize {
        self.data.len()
    }

    pub fn remain_size(&self) -> usize {
        self.expected_size.saturating_sub(self.data.len())
    }

    pub fn is_complete(&self) -> bool {
        self.data.len() == self.expected_size
    }

    /// Appends `part` to the buffer. Fails without mutating state if doing
    /// so would push `current_size` past `expected_size`.
    pub fn add_part(&mut self, part: &[u8]) -> Result<()> {
        if self.data.len() + part.len() > self.expected_size {
            return Err(BridgeError::FragmentOverflow {
                current: self.data.len(),
                incoming: part.len(),
                expected: self.expected_size,
            });
        }
        self.data.extend_from_slice(part);
        Ok(())
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Slices a fixed byte buffer into `block_size`-sized chunks on demand.
#[derive(Debug, Clone)]
pub struct BlockSizedData {
    data: Vec<u8>,
    block_size: usize,
}

impl BlockSizedData {
    pub fn new(data: Vec<u8>, block_size: usize) -> Self {
        assert!(block_size > 0, "block_size must be nonzero");
        Self { data, block_size }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Returns `(is_last, slice)` for the block at `index`, or an error if
    /// `index * block_size >= len`.
    pub fn get(&self, index: usize) -> Result<(bool, &[u8])> {
        let start = index
            .checked_mul(self.block_size)
            .ok_or(BridgeError::BlockIndexOutOfRange {
                index,
                len: self.data.len(),
                block_size: self.block_size,
            })?;
        if start >= self.data.len() {
            return Err(BridgeError::BlockIndexOutOfRange {
                index,
                len: self.data.len(),
                block_size: self.block_size,
            });
        }
        let end = (start + self.block_size).min(self.data.len());
        let is_last = end == self.data.len();
        Ok((is_last, &self.data[start..end]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_part_tracks_current_size() {
        let mut p = PartedData::new(5);
        assert!(!p.is_complete());
        p.add_part(b"ab").unwrap();
        assert_eq!(p.current_size(), 2);
        p.add_part(b"cde").unwrap();
        assert!(p.is_complete());
        assert_eq!(p.data(), b"abcde");
    }

    #[test]
    fn add_part_rejects_overflow_without_mutating() {
        let mut p = PartedData::new(3);
        p.add_part(b"ab").unwrap();
        let err = p.add_part(b"cd").unwrap_err();
        assert!(matches!(err, BridgeError::FragmentOverflow { .. }));
        // state must be unchanged after a failed add_part
        assert_eq!(p.current_size(), 2);
        assert!(!p.is_complete());
    }

    #[test]
    fn reset_clears_buffer_and_expected_size() {
        let mut p = PartedData::new(3);
        p.add_part(b"ab").unwrap();
        p.reset(10);
        assert_eq!(p.expected_size(), 10);
        assert_eq!(p.current_size(), 0);
    }

    #[test]
    fn block_sized_data_last_block_detection() {
        let b = BlockSizedData::new(vec![0u8; 10], 4);
        let (is_last, slice) = b.get(0).unwrap();
        assert!(!is_last);
        assert_eq!(slice.len(), 4);
        let (is_last, slice) = b.get(1).unwrap();
        assert!(!is_last);
        assert_eq!(slice.len(), 4);
        let (is_last, slice) = b.get(2).unwrap();
        assert!(is_last);
        assert_eq!(slice.len(), 2);
    }

    #[test]
    fn block_sized_data_out_of_range_index() {
        let b = BlockSizedData::new(vec![0u8; 10], 4);
        assert!(b.get(3).is_err());
    }

    #[test]
    fn block_sized_data_exact_multiple_last_block() {
        let b = BlockSizedData::new(vec![0u8; 8], 4);
        let (is_last, slice) = b.get(1).unwrap();
        assert!(is_last);
        assert_eq!(slice.len(), 4);
        assert!(b.get(2).is_err());
    }
}
