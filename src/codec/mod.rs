//! Codec adapters
//!
//! A codec is the streaming compressor a workspace provisions memory for.
//! The pool never looks inside a codec: it sizes workspaces with
//! [`Codec::cstream_bound`] / [`Codec::dstream_bound`], creates scratch state
//! with [`Codec::alloc_context`], and the streaming drivers push bytes through
//! the step functions.
//!
//! # Architecture
//!
//! ```text
//! Codec
//!   ├─→ ZstdCodec  (zstd raw streaming encoder/decoder)
//!   └─→ MockCodec  (run-length framing, injectable allocation failure)
//! ```

pub mod mock;
pub mod zstd;

pub use self::mock::MockCodec;
pub use self::zstd::ZstdCodec;

use std::fmt;

/// Match finder strategy, ordered by cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Strategy {
    Fast,
    DFast,
    Greedy,
    Lazy,
    Lazy2,
    BtLazy2,
    BtOpt,
}

/// Compression parameters derived for a level and input length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecParams {
    pub level: i32,
    pub window_log: u32,
    pub chain_log: u32,
    pub hash_log: u32,
    pub search_log: u32,
    pub min_match: u32,
    pub target_length: u32,
    pub strategy: Strategy,
}

/// Outcome of one streaming call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Input bytes consumed
    pub read: usize,
    /// Output bytes produced
    pub written: usize,
    /// Work still pending inside the codec; 0 means the stream or frame ended
    pub remaining: usize,
}

/// Error reported by a codec call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecError {
    pub code: Option<i32>,
    pub message: String,
}

impl CodecError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (error {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        Self {
            code: err.raw_os_error(),
            message: err.to_string(),
        }
    }
}

pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Streaming compression library driven through a pooled workspace.
///
/// Every call on a context happens while the caller exclusively holds the
/// workspace that owns it.
pub trait Codec: Send + Sync + 'static {
    /// Per-workspace scratch state
    type Context: Send + 'static;

    fn name(&self) -> &'static str;

    /// Parameters for compressing `src_len` bytes at `level`
    fn params_for(&self, level: i32, src_len: usize) -> CodecParams;

    /// Memory a compression stream needs for `params`
    fn cstream_bound(&self, params: &CodecParams) -> usize;

    /// Memory a decompression stream needs for a window of `max_window` bytes
    fn dstream_bound(&self, max_window: usize) -> usize;

    /// Fallible allocation of scratch state sized for `size` bytes.
    /// `None` is treated as transient memory pressure.
    fn alloc_context(&self, size: usize) -> Option<Self::Context>;

    fn init_compress(
        &self,
        ctx: &mut Self::Context,
        params: &CodecParams,
        pledged_len: usize,
    ) -> CodecResult<()>;

    fn compress_step(
        &self,
        ctx: &mut Self::Context,
        src: &[u8],
        dst: &mut [u8],
    ) -> CodecResult<Progress>;

    /// Flush and close the frame. `remaining == 0` once everything is out.
    fn end_stream(&self, ctx: &mut Self::Context, dst: &mut [u8]) -> CodecResult<Progress>;

    fn init_decompress(&self, ctx: &mut Self::Context, max_window: usize) -> CodecResult<()>;

    fn decompress_step(
        &self,
        ctx: &mut Self::Context,
        src: &[u8],
        dst: &mut [u8],
    ) -> CodecResult<Progress>;
}

/// ceil(log2(n)), at least 1
pub(crate) fn ceil_log2(n: usize) -> u32 {
    if n <= 1 {
        1
    } else {
        usize::BITS - (n - 1).leading_zeros()
    }
}
