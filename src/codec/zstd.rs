//! zstd adapter
//!
//! Wraps the raw streaming encoder/decoder of the `zstd` crate. A context
//! keeps one compression and one decompression stream alive, so a pooled
//! workspace reuses the library's internal tables instead of rebuilding them
//! per I/O.

use super::{ceil_log2, Codec, CodecError, CodecParams, CodecResult, Progress, Strategy};
use crate::level::{MAX_INPUT, MAX_WINDOW_LOG};
use ::zstd::stream::raw::{CParameter, DParameter, Decoder, Encoder, Operation, OutBuffer};
use tracing::{debug, warn};

/// Smallest window zstd accepts
const MIN_WINDOW_LOG: u32 = 10;

/// Block size ceiling
const MAX_BLOCK: usize = 128 * 1024;

/// Fixed overhead of a compression context (entropy tables, sequence headers)
const CCTX_OVERHEAD: usize = 24 * 1024;

/// Fixed overhead of a decompression context
const DCTX_OVERHEAD: usize = 96 * 1024;

/// Optimal parser scratch used by `BtOpt`
const OPT_SPACE: usize = (4096 + 1) * (8 + 28) + (53 + 36 + 32 + 256) * 4;

/// Default parameters for sources of at most 128 KiB.
/// Row 0 is the base for negative levels.
/// (window, chain, hash, search, min_match, target_length, strategy)
const PARAMS_128K: [(u32, u32, u32, u32, u32, u32, Strategy); 16] = [
    (17, 12, 12, 1, 5, 1, Strategy::Fast),
    (17, 12, 13, 1, 6, 0, Strategy::Fast),
    (17, 13, 15, 1, 5, 0, Strategy::Fast),
    (17, 15, 16, 2, 5, 0, Strategy::DFast),
    (17, 17, 17, 2, 4, 0, Strategy::DFast),
    (17, 16, 17, 3, 4, 2, Strategy::Greedy),
    (17, 16, 17, 3, 4, 4, Strategy::Lazy),
    (17, 16, 17, 3, 4, 8, Strategy::Lazy2),
    (17, 16, 17, 4, 4, 8, Strategy::Lazy2),
    (17, 16, 17, 5, 4, 8, Strategy::Lazy2),
    (17, 16, 17, 6, 4, 8, Strategy::Lazy2),
    (17, 17, 17, 5, 4, 8, Strategy::BtLazy2),
    (17, 18, 17, 7, 4, 12, Strategy::BtLazy2),
    (17, 18, 17, 3, 4, 12, Strategy::BtOpt),
    (17, 18, 17, 4, 4, 16, Strategy::BtOpt),
    (17, 18, 17, 6, 3, 256, Strategy::BtOpt),
];

/// zstd streaming codec
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdCodec;

/// Scratch state owned by one workspace.
///
/// The `size` passed to `alloc_context` is only an accounting figure; the
/// zstd library sizes its own context memory.
pub struct ZstdContext {
    encoder: Encoder<'static>,
    decoder: Decoder<'static>,
}

impl ZstdCodec {
    pub fn new() -> Self {
        Self
    }
}

fn codec_err(op: &str, err: std::io::Error) -> CodecError {
    let mut err = CodecError::from(err);
    err.message = format!("{}: {}", op, err.message);
    err
}

impl Codec for ZstdCodec {
    type Context = ZstdContext;

    fn name(&self) -> &'static str {
        "zstd"
    }

    fn params_for(&self, level: i32, src_len: usize) -> CodecParams {
        if src_len > MAX_INPUT {
            warn!(src_len, max = MAX_INPUT, "zstd input larger than a compressed extent");
        }
        let row = level.clamp(0, PARAMS_128K.len() as i32 - 1) as usize;
        let (window, chain, hash, search, min_match, target_length, strategy) = PARAMS_128K[row];

        // Shrink the window to the source, then cap it.
        let src_log = ceil_log2(src_len.max(1)).max(MIN_WINDOW_LOG);
        let window_log = window.min(src_log).min(MAX_WINDOW_LOG);
        let bt = u32::from(strategy >= Strategy::BtLazy2);

        CodecParams {
            level,
            window_log,
            chain_log: chain.min(window_log + bt),
            hash_log: hash.min(window_log + 1),
            search_log: search,
            min_match,
            target_length,
            strategy,
        }
    }

    fn cstream_bound(&self, params: &CodecParams) -> usize {
        let window = 1usize << params.window_log;
        let block = window.min(MAX_BLOCK);
        let hash = 4usize << params.hash_log;
        let chain = if params.strategy == Strategy::Fast {
            0
        } else {
            4usize << params.chain_log
        };
        let divider = if params.min_match == 3 { 3 } else { 4 };
        let seqs = (block / divider) * 11 + block;
        let opt = if params.strategy >= Strategy::BtOpt {
            OPT_SPACE
        } else {
            0
        };
        // input buffer holds window + block, output buffer one compressed block
        let buffers = window + block + block + (block >> 8) + 64;

        CCTX_OVERHEAD + hash + chain + seqs + opt + buffers
    }

    fn dstream_bound(&self, max_window: usize) -> usize {
        let block = max_window.min(MAX_BLOCK);
        DCTX_OVERHEAD + block + max_window + block + 2 * 32
    }

    fn alloc_context(&self, size: usize) -> Option<ZstdContext> {
        let encoder = match Encoder::new(crate::level::DEFAULT_LEVEL) {
            Ok(encoder) => encoder,
            Err(e) => {
                debug!(size, error = %e, "zstd compression context allocation failed");
                return None;
            }
        };
        let decoder = match Decoder::new() {
            Ok(decoder) => decoder,
            Err(e) => {
                debug!(size, error = %e, "zstd decompression context allocation failed");
                return None;
            }
        };
        Some(ZstdContext { encoder, decoder })
    }

    fn init_compress(
        &self,
        ctx: &mut ZstdContext,
        params: &CodecParams,
        pledged_len: usize,
    ) -> CodecResult<()> {
        let encoder = &mut ctx.encoder;
        encoder.reinit().map_err(|e| codec_err("reset", e))?;
        encoder
            .set_parameter(CParameter::CompressionLevel(params.level))
            .map_err(|e| codec_err("set level", e))?;
        encoder
            .set_parameter(CParameter::WindowLog(params.window_log))
            .map_err(|e| codec_err("set window", e))?;
        encoder
            .set_pledged_src_size(Some(pledged_len as u64))
            .map_err(|e| codec_err("pledge size", e))?;
        Ok(())
    }

    fn compress_step(
        &self,
        ctx: &mut ZstdContext,
        src: &[u8],
        dst: &mut [u8],
    ) -> CodecResult<Progress> {
        let status = ctx
            .encoder
            .run_on_buffers(src, dst)
            .map_err(|e| codec_err("compress", e))?;
        Ok(Progress {
            read: status.bytes_read,
            written: status.bytes_written,
            remaining: status.remaining,
        })
    }

    fn end_stream(&self, ctx: &mut ZstdContext, dst: &mut [u8]) -> CodecResult<Progress> {
        let mut out = OutBuffer::around(dst);
        let remaining = ctx
            .encoder
            .finish(&mut out, true)
            .map_err(|e| codec_err("end stream", e))?;
        Ok(Progress {
            read: 0,
            written: out.pos(),
            remaining,
        })
    }

    fn init_decompress(&self, ctx: &mut ZstdContext, max_window: usize) -> CodecResult<()> {
        let decoder = &mut ctx.decoder;
        decoder.reinit().map_err(|e| codec_err("reset", e))?;
        decoder
            .set_parameter(DParameter::WindowLogMax(ceil_log2(max_window)))
            .map_err(|e| codec_err("set window", e))?;
        Ok(())
    }

    fn decompress_step(
        &self,
        ctx: &mut ZstdContext,
        src: &[u8],
        dst: &mut [u8],
    ) -> CodecResult<Progress> {
        let status = ctx
            .decoder
            .run_on_buffers(src, dst)
            .map_err(|e| codec_err("decompress", e))?;
        Ok(Progress {
            read: status.bytes_read,
            written: status.bytes_written,
            remaining: status.remaining,
        })
    }
}
