use basalt_mmap::SegmentError;

pub type RegionResult<T> = Result<T, RegionError>;

#[derive(Debug, thiserror::Error)]
pub enum RegionError {
    #[error("offset {offset} + count {count} exceeds buffer length {len}")]
    OutOfRange {
        offset: usize,
        count: usize,
        len: usize,
    },

    #[error("capacity {0} cannot back a ring buffer")]
    InvalidCapacity(u64),

    #[error("segment header is inconsistent: {0}")]
    Corrupt(&'static str),

    #[error(transparent)]
    Segment(#[from] SegmentError),
}

impl RegionError {
    pub fn is_platform_unsupported(&self) -> bool {
        matches!(self, RegionError::Segment(SegmentError::PlatformUnsupported))
    }
}

/// Rejects `offset + count` ranges that do not fit a buffer of `len` bytes.
#[inline]
pub fn check_range(offset: usize, count: usize, len: usize) -> RegionResult<()> {
    match offset.checked_add(count) {
        Some(end) if end <= len => Ok(()),
        _ => Err(RegionError::OutOfRange { offset, count, len }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_checks_do_not_overflow() {
        assert!(check_range(0, 10, 10).is_ok());
        assert!(check_range(10, 0, 10).is_ok());
        assert!(check_range(4, 7, 10).is_err());
        assert!(check_range(usize::MAX, 1, 10).is_err());
    }

    #[test]
    fn platform_unsupported_is_recognised() {
        assert!(RegionError::from(SegmentError::PlatformUnsupported).is_platform_unsupported());
        assert!(!RegionError::InvalidCapacity(0).is_platform_unsupported());
    }
}
