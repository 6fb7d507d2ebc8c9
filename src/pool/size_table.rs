//! Workspace size table
//!
//! Memory needed per bucket, made monotonic so that a workspace sized for
//! bucket `b` can serve every bucket `<= b`.

use crate::codec::Codec;
use crate::level::{clip_level, levels, BUCKETS, MAX_INPUT};
use tracing::debug;

/// Required workspace memory per bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeTable {
    sizes: [usize; BUCKETS],
}

impl SizeTable {
    /// Scan levels from lowest to highest, keeping a running maximum.
    ///
    /// A level may need less memory than a lower one; the running maximum
    /// hides that so reuse across buckets is always safe. All fast levels land
    /// in bucket 0 with the level 1 size.
    pub fn build<C: Codec>(codec: &C) -> Self {
        let mut sizes = [0usize; BUCKETS];
        let mut max_size = 0;

        for level in levels() {
            let params = codec.params_for(level, MAX_INPUT);
            let level_size = codec
                .cstream_bound(&params)
                .max(codec.dstream_bound(MAX_INPUT));
            max_size = max_size.max(level_size);
            sizes[clip_level(level)] = max_size;
        }

        debug!(codec = codec.name(), ?sizes, "Built workspace size table");
        Self { sizes }
    }

    /// Size for a bucket index
    pub fn size_for(&self, bucket: usize) -> usize {
        self.sizes[bucket]
    }

    /// Size for a raw level
    pub fn for_level(&self, level: i32) -> usize {
        self.sizes[clip_level(level)]
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.sizes.iter().copied().enumerate()
    }
}
