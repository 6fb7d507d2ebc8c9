//! Page-streaming decompression

use super::codec_failure;
use super::mapping::{CompressedExtent, Origin};
use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::level::{MAX_INPUT, PAGE_SIZE};
use crate::metrics;
use crate::pool::Workspace;
use tracing::debug;

/// Decompress an extent into `dest` through the workspace's staging page.
///
/// Stops when `dest` is full, the compressed input is used up, or the frame
/// ends. Any part of `dest` left unfilled is zeroed. Returns the number of
/// decompressed bytes written.
pub fn decompress_pages<C: Codec>(
    codec: &C,
    ws: &mut Workspace<C>,
    extent: &CompressedExtent,
    dest: &mut [u8],
) -> Result<usize> {
    let origin = Origin {
        inode: extent.inode,
        offset: extent.start,
    };
    let mut srclen = extent.len;
    let total_pages = srclen.div_ceil(PAGE_SIZE);
    if total_pages == 0 || extent.pages.len() < total_pages {
        return Err(Error::Corrupt(format!(
            "extent of {} bytes backed by {} pages",
            srclen,
            extent.pages.len()
        )));
    }

    codec
        .init_decompress(&mut ws.scratch, MAX_INPUT)
        .map_err(|e| codec_failure(codec.name(), "decompression init", 0, origin, e))?;

    let mut index = 0;
    let mut in_pos = 0;
    let mut in_size = srclen.min(PAGE_SIZE);
    let mut total_out = 0;

    loop {
        let page = extent
            .pages
            .get(index)
            .filter(|page| page.len() >= in_size)
            .ok_or_else(|| {
                Error::Corrupt(format!(
                    "page {} of extent at inode {} offset {} holds fewer than {} bytes",
                    index, origin.inode.ino, origin.offset, in_size
                ))
            })?;
        let step = codec
            .decompress_step(&mut ws.scratch, &page[in_pos..in_size], &mut ws.buf[..])
            .map_err(|e| codec_failure(codec.name(), "decompression", 0, origin, e))?;
        in_pos += step.read;

        let buf_start = total_out;
        total_out += step.written;
        if buf_start < dest.len() {
            let n = step.written.min(dest.len() - buf_start);
            dest[buf_start..buf_start + n].copy_from_slice(&ws.buf[..n]);
        }

        if total_out >= dest.len() {
            break;
        }
        if in_pos >= srclen {
            break;
        }
        // end of frame
        if step.remaining == 0 {
            break;
        }

        if in_pos == in_size {
            index += 1;
            if index >= total_pages {
                return Err(Error::Corrupt(format!(
                    "compressed stream of inode {} at offset {} runs past its {} pages",
                    origin.inode.ino, origin.offset, total_pages
                )));
            }
            srclen -= PAGE_SIZE;
            in_pos = 0;
            in_size = srclen.min(PAGE_SIZE);
        }
    }

    let filled = total_out.min(dest.len());
    dest[filled..].fill(0);

    metrics::record_stream_bytes("in", extent.len);
    metrics::record_stream_bytes("out", filled);
    debug!(
        ino = origin.inode.ino,
        offset = origin.offset,
        compressed = extent.len,
        filled,
        "Decompressed extent"
    );
    Ok(filled)
}

/// Decompress a single sector of compressed bytes into
/// `dest_page[dest_off..dest_off + dest_len]` in one codec call.
///
/// Short output zero-fills the rest of the range and yields
/// [`Error::ShortRead`]; a codec failure zero-fills the whole range.
pub fn decompress_range<C: Codec>(
    codec: &C,
    ws: &mut Workspace<C>,
    data_in: &[u8],
    dest_page: &mut [u8],
    dest_off: usize,
    dest_len: usize,
    origin: Origin,
) -> Result<()> {
    let end = dest_off
        .checked_add(dest_len)
        .filter(|&end| end <= dest_page.len() && dest_len <= PAGE_SIZE)
        .ok_or_else(|| {
            Error::InvalidArgument(format!(
                "range {}+{} does not fit a {} byte page",
                dest_off,
                dest_len,
                dest_page.len()
            ))
        })?;
    let dest = &mut dest_page[dest_off..end];

    let result = codec
        .init_decompress(&mut ws.scratch, MAX_INPUT)
        .map_err(|e| codec_failure(codec.name(), "decompression init", 0, origin, e))
        .and_then(|()| {
            codec
                .decompress_step(&mut ws.scratch, data_in, &mut ws.buf[..dest_len])
                .map_err(|e| codec_failure(codec.name(), "decompression", 0, origin, e))
        });

    let step = match result {
        Ok(step) => step,
        Err(e) => {
            dest.fill(0);
            return Err(e);
        }
    };

    let copied = step.written;
    dest[..copied].copy_from_slice(&ws.buf[..copied]);
    if copied < dest_len {
        dest[copied..].fill(0);
        return Err(Error::ShortRead {
            expected: dest_len,
            got: copied,
        });
    }
    metrics::record_stream_bytes("out", copied);
    Ok(())
}
