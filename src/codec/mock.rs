//! Mock codec for testing
//!
//! A small run-length codec with the same streaming contract as zstd, plus
//! switches to make context allocation fail. Clones share state so a test can
//! keep a handle while the pool owns the codec.

use super::{Codec, CodecError, CodecParams, CodecResult, Progress, Strategy};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

const MAGIC: [u8; 4] = *b"RLE1";

/// Error code reported for a bad frame header
pub const ERR_UNKNOWN_FRAME: i32 = 10;

/// Error code reported for a run with a non-zero terminator byte
pub const ERR_CORRUPTION: i32 = 20;

#[derive(Debug, Default)]
struct MockState {
    fail_alloc: AtomicBool,
    allocs: AtomicUsize,
    alloc_failures: AtomicUsize,
}

/// In-memory run-length codec
#[derive(Debug, Clone, Default)]
pub struct MockCodec {
    state: Arc<MockState>,
}

/// Scratch state for [`MockCodec`]
#[derive(Debug, Default)]
pub struct MockContext {
    size: usize,
    // compression
    pending: VecDeque<u8>,
    run: Option<(u8, u8)>,
    ended: bool,
    // decompression
    header_seen: usize,
    count: Option<u8>,
    out_run: (u8, u8),
    frame_done: bool,
}

impl MockContext {
    /// Size this context was allocated for
    pub fn size(&self) -> usize {
        self.size
    }

    fn drain_into(&mut self, dst: &mut [u8]) -> usize {
        let n = self.pending.len().min(dst.len());
        for (slot, byte) in dst.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        n
    }

    fn flush_run(&mut self) {
        if let Some((byte, count)) = self.run.take() {
            self.pending.push_back(count);
            self.pending.push_back(byte);
        }
    }
}

impl MockCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following context allocation fail (or succeed again)
    pub fn set_fail_alloc(&self, fail: bool) {
        self.state.fail_alloc.store(fail, Ordering::SeqCst);
    }

    /// Successful context allocations so far
    pub fn allocs(&self) -> usize {
        self.state.allocs.load(Ordering::SeqCst)
    }

    /// Refused context allocations so far
    pub fn alloc_failures(&self) -> usize {
        self.state.alloc_failures.load(Ordering::SeqCst)
    }

    /// Per-level memory, deliberately not monotonic (odd levels cost more)
    fn level_cost(level: i32) -> usize {
        match level {
            l if l <= 0 => 2,
            l if l % 2 == 1 => l as usize + 2,
            l => l as usize,
        }
    }
}

impl Codec for MockCodec {
    type Context = MockContext;

    fn name(&self) -> &'static str {
        "mock-rle"
    }

    fn params_for(&self, level: i32, _src_len: usize) -> CodecParams {
        CodecParams {
            level,
            window_log: 17,
            chain_log: 0,
            hash_log: 0,
            search_log: 0,
            min_match: 1,
            target_length: 0,
            strategy: Strategy::Fast,
        }
    }

    fn cstream_bound(&self, params: &CodecParams) -> usize {
        Self::level_cost(params.level) * 1024
    }

    fn dstream_bound(&self, _max_window: usize) -> usize {
        2048
    }

    fn alloc_context(&self, size: usize) -> Option<MockContext> {
        if self.state.fail_alloc.load(Ordering::SeqCst) {
            self.state.alloc_failures.fetch_add(1, Ordering::SeqCst);
            return None;
        }
        self.state.allocs.fetch_add(1, Ordering::SeqCst);
        Some(MockContext {
            size,
            ..MockContext::default()
        })
    }

    fn init_compress(
        &self,
        ctx: &mut MockContext,
        _params: &CodecParams,
        _pledged_len: usize,
    ) -> CodecResult<()> {
        ctx.pending.clear();
        ctx.pending.extend(MAGIC);
        ctx.run = None;
        ctx.ended = false;
        Ok(())
    }

    fn compress_step(
        &self,
        ctx: &mut MockContext,
        src: &[u8],
        dst: &mut [u8],
    ) -> CodecResult<Progress> {
        if ctx.ended {
            return Err(CodecError::with_code(1, "stage wrong: stream already ended"));
        }
        let mut written = ctx.drain_into(dst);
        let mut read = 0;
        for &byte in src {
            if !ctx.pending.is_empty() {
                break;
            }
            match ctx.run {
                Some((b, count)) if b == byte && count < u8::MAX => ctx.run = Some((b, count + 1)),
                _ => {
                    ctx.flush_run();
                    ctx.run = Some((byte, 1));
                }
            }
            read += 1;
            written += ctx.drain_into(&mut dst[written..]);
        }
        Ok(Progress {
            read,
            written,
            remaining: ctx.pending.len(),
        })
    }

    fn end_stream(&self, ctx: &mut MockContext, dst: &mut [u8]) -> CodecResult<Progress> {
        if !ctx.ended {
            ctx.flush_run();
            ctx.pending.extend([0, 0]);
            ctx.ended = true;
        }
        let written = ctx.drain_into(dst);
        Ok(Progress {
            read: 0,
            written,
            remaining: ctx.pending.len(),
        })
    }

    fn init_decompress(&self, ctx: &mut MockContext, _max_window: usize) -> CodecResult<()> {
        ctx.header_seen = 0;
        ctx.count = None;
        ctx.out_run = (0, 0);
        ctx.frame_done = false;
        Ok(())
    }

    fn decompress_step(
        &self,
        ctx: &mut MockContext,
        src: &[u8],
        dst: &mut [u8],
    ) -> CodecResult<Progress> {
        let mut read = 0;
        let mut written = 0;
        loop {
            let (byte, left) = ctx.out_run;
            if left > 0 {
                if written == dst.len() {
                    break;
                }
                dst[written] = byte;
                written += 1;
                ctx.out_run = (byte, left - 1);
                continue;
            }
            if ctx.frame_done || read == src.len() {
                break;
            }
            let next = src[read];
            read += 1;
            if ctx.header_seen < MAGIC.len() {
                if next != MAGIC[ctx.header_seen] {
                    return Err(CodecError::with_code(
                        ERR_UNKNOWN_FRAME,
                        "unknown frame descriptor",
                    ));
                }
                ctx.header_seen += 1;
                continue;
            }
            match ctx.count.take() {
                None => ctx.count = Some(next),
                Some(0) if next == 0 => ctx.frame_done = true,
                Some(0) => {
                    return Err(CodecError::with_code(ERR_CORRUPTION, "corruption detected"))
                }
                Some(count) => ctx.out_run = (next, count),
            }
        }
        let remaining = usize::from(!(ctx.frame_done && ctx.out_run.1 == 0));
        Ok(Progress {
            read,
            written,
            remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(codec: &MockCodec, ctx: &mut MockContext, data: &[u8]) -> CodecResult<Vec<u8>> {
        let params = codec.params_for(1, data.len());
        codec.init_compress(ctx, &params, data.len())?;
        let mut out = Vec::new();
        let mut buf = [0u8; 3];
        let mut pos = 0;
        while pos < data.len() {
            let p = codec.compress_step(ctx, &data[pos..], &mut buf)?;
            pos += p.read;
            out.extend_from_slice(&buf[..p.written]);
        }
        loop {
            let p = codec.end_stream(ctx, &mut buf)?;
            out.extend_from_slice(&buf[..p.written]);
            if p.remaining == 0 {
                return Ok(out);
            }
        }
    }

    #[test]
    fn test_mock_roundtrip_small_buffers() -> CodecResult<()> {
        let codec = MockCodec::new();
        let mut ctx = codec.alloc_context(1024).expect("context");
        let data = b"aaaaabbbcdddddddddddd".to_vec();
        let encoded = encode(&codec, &mut ctx, &data)?;

        codec.init_decompress(&mut ctx, 1 << 17)?;
        let mut decoded = Vec::new();
        let mut buf = [0u8; 4];
        let mut pos = 0;
        loop {
            let p = codec.decompress_step(&mut ctx, &encoded[pos..], &mut buf)?;
            pos += p.read;
            decoded.extend_from_slice(&buf[..p.written]);
            if p.remaining == 0 {
                break;
            }
        }
        assert_eq!(decoded, data);
        assert_eq!(pos, encoded.len());
        Ok(())
    }

    #[test]
    fn test_mock_long_runs_compress() -> CodecResult<()> {
        let codec = MockCodec::new();
        let mut ctx = codec.alloc_context(1024).expect("context");
        let encoded = encode(&codec, &mut ctx, &[0u8; 1000])?;
        // magic + 4 runs + terminator
        assert_eq!(encoded.len(), 4 + 4 * 2 + 2);
        Ok(())
    }

    #[test]
    fn test_mock_bad_header() {
        let codec = MockCodec::new();
        let mut ctx = codec.alloc_context(1024).expect("context");
        codec.init_decompress(&mut ctx, 1 << 17).expect("init");
        let mut buf = [0u8; 8];
        let err = codec.decompress_step(&mut ctx, b"XXXX", &mut buf).unwrap_err();
        assert_eq!(err.code, Some(ERR_UNKNOWN_FRAME));
    }

    #[test]
    fn test_mock_alloc_switch() {
        let codec = MockCodec::new();
        let handle = codec.clone();
        assert!(codec.alloc_context(10).is_some());
        handle.set_fail_alloc(true);
        assert!(codec.alloc_context(10).is_none());
        handle.set_fail_alloc(false);
        assert!(codec.alloc_context(10).is_some());
        assert_eq!(handle.allocs(), 2);
        assert_eq!(handle.alloc_failures(), 1);
    }
}
