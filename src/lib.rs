// zstd-wsm - zstd workspace management for transparent filesystem compression
// Level-indexed workspace pool, LRU reclaim and page-streaming drivers

#![warn(rust_2018_idioms)]

pub mod codec;
pub mod config;
pub mod level;
pub mod metrics;
pub mod pool;
pub mod stream;

// Re-exports for convenience
pub use codec::{Codec, CodecError, CodecParams, MockCodec, Progress, ZstdCodec};
pub use config::PoolConfig;
pub use level::{clip_level, DEFAULT_LEVEL, MAX_LEVEL, MIN_LEVEL, PAGE_SIZE};
pub use pool::{PoolStats, SizeTable, Workspace, WorkspaceGuard, WorkspaceManager};
pub use stream::{
    alloc_page, CompressedExtent, CompressedPages, InodeRef, MemMapping, Origin, Page,
    PageMapping,
};

/// Error types
pub mod error {
    use crate::codec::CodecError;
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        /// The codec rejected the stream. Carries the owner of the data for diagnostics.
        #[error("{op} failed (level {level}, root {root} inode {ino} offset {offset}): {source}")]
        Codec {
            op: &'static str,
            level: i32,
            root: u64,
            ino: u64,
            offset: u64,
            #[source]
            source: CodecError,
        },

        /// Compression did not shrink the data or overflowed the page budget.
        /// Callers store the range uncompressed.
        #[error("Compressed output too big: {total_out} bytes out for {total_in} bytes in")]
        TooBig { total_in: usize, total_out: usize },

        #[error("Corrupt compressed data: {0}")]
        Corrupt(String),

        #[error("Short read: expected {expected} bytes, decompressed {got}")]
        ShortRead { expected: usize, got: usize },

        #[error("Out of memory allocating {0} bytes")]
        OutOfMemory(usize),

        #[error("Mapping error: {0}")]
        Mapping(String),

        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        #[error("Config error: {0}")]
        Config(String),
    }

    impl Error {
        /// True for the expected "not worth compressing" outcome.
        pub fn is_too_big(&self) -> bool {
            matches!(self, Error::TooBig { .. })
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
