//! Compression levels and their bucket mapping
//!
//! Levels run from [`MIN_LEVEL`] to [`MAX_LEVEL`]. Level 0 means "any level",
//! which is served as level 1. All non-positive "fast" levels share bucket 0
//! because they never need more memory than level 1.
//!
//! ```text
//! level:  -15 ... -1  0  1  2  3 ... 15
//! bucket:   0 ...  0  0  0  1  2 ... 14
//! ```

use std::time::Duration;
use tracing::warn;

/// Window log cap applied regardless of the requested level
pub const MAX_WINDOW_LOG: u32 = 17;

/// Largest input a single stream is sized for (one compressed extent)
pub const MAX_INPUT: usize = 1 << MAX_WINDOW_LOG;

pub const MIN_LEVEL: i32 = -15;
pub const MAX_LEVEL: i32 = 15;
pub const DEFAULT_LEVEL: i32 = 3;

/// Number of per-level buckets
pub const BUCKETS: usize = MAX_LEVEL as usize;

/// Bucket of [`MAX_LEVEL`], the protected forward-progress class
pub const TOP_BUCKET: usize = BUCKETS - 1;

/// Idle time before a workspace becomes a reclaim candidate.
/// 307s keeps the timer from lining up with periodic commit work.
pub const RECLAIM_THRESHOLD: Duration = Duration::from_secs(307);

/// Platform page size used for staging and output pages
pub const PAGE_SIZE: usize = 4096;

/// Below this many input bytes the "is it shrinking" check is not applied
pub const INCOMPRESSIBLE_PROBE: usize = 8192;

/// Map a level to its bucket index.
#[inline]
pub fn clip_level(level: i32) -> usize {
    (level - 1).max(0) as usize
}

/// Level 0 means the caller does not care; use level 1.
#[inline]
pub fn normalize_level(level: i32) -> i32 {
    if level == 0 {
        1
    } else {
        level
    }
}

/// Normalize and clamp into `[MIN_LEVEL, MAX_LEVEL]`.
pub fn resolve_level(level: i32) -> i32 {
    let level = normalize_level(level);
    let clamped = level.clamp(MIN_LEVEL, MAX_LEVEL);
    if clamped != level {
        warn!(level, clamped, "compression level out of range, clamping");
    }
    clamped
}

/// All valid levels in ascending order, 0 excluded
pub fn levels() -> impl Iterator<Item = i32> {
    (MIN_LEVEL..=MAX_LEVEL).filter(|&l| l != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_folds_fast_levels() {
        assert_eq!(clip_level(MIN_LEVEL), 0);
        assert_eq!(clip_level(-1), 0);
        assert_eq!(clip_level(0), 0);
        assert_eq!(clip_level(1), 0);
        assert_eq!(clip_level(2), 1);
        assert_eq!(clip_level(MAX_LEVEL), TOP_BUCKET);
    }

    #[test]
    fn test_resolve_level() {
        assert_eq!(resolve_level(0), 1);
        assert_eq!(resolve_level(7), 7);
        assert_eq!(resolve_level(99), MAX_LEVEL);
        assert_eq!(resolve_level(-99), MIN_LEVEL);
    }

    #[test]
    fn test_levels_skip_zero() {
        assert!(levels().all(|l| l != 0));
        assert_eq!(levels().count(), (MAX_LEVEL - MIN_LEVEL) as usize);
    }
}
