//! A single pooled workspace

use crate::codec::Codec;
use crate::level::{clip_level, PAGE_SIZE};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Codec scratch memory plus bookkeeping.
///
/// `bucket` is fixed at construction. `req_level` is the raw level of the
/// current borrower and 0 while the workspace sits idle in the pool.
pub struct Workspace<C: Codec> {
    pub(crate) id: u64,
    pub(crate) scratch: C::Context,
    pub(crate) buf: Box<[u8]>,
    pub(crate) size: usize,
    pub(crate) bucket: usize,
    pub(crate) req_level: i32,
    pub(crate) last_used: Instant,
}

impl<C: Codec> Workspace<C> {
    /// Allocate a workspace for `level`, sized by the table entry for its bucket.
    ///
    /// Returns `None` when the codec context or the staging page cannot be
    /// allocated.
    pub(crate) fn alloc(codec: &C, level: i32, size: usize) -> Option<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(PAGE_SIZE).ok()?;
        buf.resize(PAGE_SIZE, 0);

        let scratch = codec.alloc_context(size)?;

        Some(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            scratch,
            buf: buf.into_boxed_slice(),
            size,
            bucket: clip_level(level),
            req_level: level,
            last_used: Instant::now(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Memory this workspace was sized for
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bucket the memory was sized for
    pub fn bucket(&self) -> usize {
        self.bucket
    }

    /// Raw level of the current borrower, 0 when idle
    pub fn requested_level(&self) -> i32 {
        self.req_level
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Borrowed by the bucket it was sized for
    pub(crate) fn at_home(&self) -> bool {
        clip_level(self.req_level) == self.bucket
    }

    pub fn scratch(&self) -> &C::Context {
        &self.scratch
    }
}

impl<C: Codec> fmt::Debug for Workspace<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("bucket", &self.bucket)
            .field("req_level", &self.req_level)
            .finish()
    }
}

impl<C: Codec> fmt::Display for Workspace<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Workspace(id={}, bucket={}, size={})", self.id, self.bucket, self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MockCodec;

    #[test]
    fn test_workspace_alloc() {
        let codec = MockCodec::new();
        let ws = Workspace::alloc(&codec, 5, 7 * 1024).expect("alloc");
        assert_eq!(ws.bucket(), 4);
        assert_eq!(ws.requested_level(), 5);
        assert_eq!(ws.size(), 7 * 1024);
        assert_eq!(ws.scratch().size(), 7 * 1024);
        assert_eq!(ws.buf.len(), PAGE_SIZE);
        assert!(ws.at_home());
    }

    #[test]
    fn test_fast_level_lands_in_bucket_zero() {
        let codec = MockCodec::new();
        let ws = Workspace::alloc(&codec, -7, 1024).expect("alloc");
        assert_eq!(ws.bucket(), 0);
        assert!(ws.at_home());
    }

    #[test]
    fn test_ids_are_unique() {
        let codec = MockCodec::new();
        let a = Workspace::alloc(&codec, 1, 1024).expect("alloc");
        let b = Workspace::alloc(&codec, 1, 1024).expect("alloc");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_alloc_failure() {
        let codec = MockCodec::new();
        codec.set_fail_alloc(true);
        assert!(Workspace::alloc(&codec, 1, 1024).is_none());
    }
}
