use std::ops::Range;

use packdrop_protocol::types::PartLimits;

use crate::TransferError;

/// Number of parts a file of `size_bytes` splits into.
///
/// An empty file still yields one (empty) part: the service expects at
/// least one part per file.
pub fn plan(size_bytes: u64, part_size_bytes: u64) -> Result<u64, TransferError> {
    if part_size_bytes == 0 {
        return Err(TransferError::InvalidSize(
            "part size must be greater than zero".into(),
        ));
    }
    Ok(size_bytes.div_ceil(part_size_bytes).max(1))
}

/// Byte range covered by the 0-based part `index`.
///
/// Indices past the end of the file yield an empty range at `size_bytes`.
pub fn part_range(size_bytes: u64, part_size_bytes: u64, index: u64) -> Range<u64> {
    let start = index.saturating_mul(part_size_bytes).min(size_bytes);
    let end = start.saturating_add(part_size_bytes).min(size_bytes);
    start..end
}

/// Checks a plan against the limits stated at file registration.
///
/// The last part is exempt from the minimum size, so a single-part plan
/// never violates it.
pub fn check_limits(
    part_count: u64,
    part_size_bytes: u64,
    limits: &PartLimits,
) -> Result<(), TransferError> {
    if limits.max_part_count > 0 && part_count > limits.max_part_count {
        return Err(TransferError::LimitExceeded(format!(
            "{part_count} parts exceeds maximum of {}",
            limits.max_part_count
        )));
    }
    if limits.max_part_size > 0 && part_size_bytes > limits.max_part_size {
        return Err(TransferError::LimitExceeded(format!(
            "part size {part_size_bytes} exceeds maximum of {}",
            limits.max_part_size
        )));
    }
    if limits.min_part_size > 0 && part_count > 1 && part_size_bytes < limits.min_part_size {
        return Err(TransferError::LimitExceeded(format!(
            "part size {part_size_bytes} is below minimum of {}",
            limits.min_part_size
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn zero_part_size_rejected() {
        assert!(matches!(plan(10, 0), Err(TransferError::InvalidSize(_))));
        assert!(matches!(plan(0, 0), Err(TransferError::InvalidSize(_))));
    }

    #[test]
    fn empty_file_is_one_part() {
        assert_eq!(plan(0, 100 * MIB).unwrap(), 1);
        assert_eq!(part_range(0, 100 * MIB, 0), 0..0);
    }

    #[test]
    fn scenario_250_mib() {
        let size = 250 * MIB;
        let part = 100 * MIB;
        assert_eq!(plan(size, part).unwrap(), 3);
        assert_eq!(part_range(size, part, 0), 0..100 * MIB);
        assert_eq!(part_range(size, part, 1), 100 * MIB..200 * MIB);
        assert_eq!(part_range(size, part, 2), 200 * MIB..250 * MIB);
    }

    #[test]
    fn exact_multiple_has_no_trailing_part() {
        assert_eq!(plan(300, 100).unwrap(), 3);
        assert_eq!(part_range(300, 100, 2), 200..300);
        assert!(part_range(300, 100, 3).is_empty());
    }

    #[test]
    fn count_matches_ceiling_formula() {
        for size in 0..=64u64 {
            for part in 1..=17u64 {
                let expected = std::cmp::max(1, (size + part - 1) / part);
                assert_eq!(plan(size, part).unwrap(), expected, "size={size} part={part}");
            }
        }
    }

    #[test]
    fn ranges_tile_the_file() {
        let size = 1003;
        let part = 100;
        let count = plan(size, part).unwrap();
        let mut next = 0;
        for i in 0..count {
            let r = part_range(size, part, i);
            assert_eq!(r.start, next);
            assert!(r.end - r.start <= part);
            next = r.end;
        }
        assert_eq!(next, size);
    }

    #[test]
    fn huge_sizes_do_not_overflow() {
        assert_eq!(plan(u64::MAX, 1).unwrap(), u64::MAX);
        assert_eq!(plan(u64::MAX, u64::MAX).unwrap(), 1);
        assert_eq!(part_range(u64::MAX, u64::MAX, 5), u64::MAX..u64::MAX);
    }

    #[test]
    fn limits_unset_accept_anything() {
        check_limits(1_000_000, 1, &PartLimits::default()).unwrap();
    }

    #[test]
    fn limits_max_count() {
        let limits = PartLimits {
            max_part_count: 10,
            ..Default::default()
        };
        check_limits(10, MIB, &limits).unwrap();
        assert!(matches!(
            check_limits(11, MIB, &limits),
            Err(TransferError::LimitExceeded(_))
        ));
    }

    #[test]
    fn limits_part_size_bounds() {
        let limits = PartLimits {
            max_part_count: 0,
            min_part_size: 5 * MIB,
            max_part_size: 5 * 1024 * MIB,
        };
        check_limits(3, 100 * MIB, &limits).unwrap();
        assert!(check_limits(3, MIB, &limits).is_err());
        assert!(check_limits(2, 6 * 1024 * MIB, &limits).is_err());
        // A single (last) part may be smaller than the minimum.
        check_limits(1, MIB, &limits).unwrap();
    }
}
