//! Page-streaming compression

use super::mapping::{alloc_page, CompressedPages, Origin, Page, PageMapping};
use super::codec_failure;
use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::level::{INCOMPRESSIBLE_PROBE, MAX_INPUT, PAGE_SIZE};
use crate::metrics;
use crate::pool::Workspace;
use tracing::debug;

/// Bytes from `start` to the end of its page, bounded by `end`
fn input_len(end: u64, start: u64) -> usize {
    let page_end = (start / PAGE_SIZE as u64 + 1) * PAGE_SIZE as u64;
    (end.min(page_end) - start) as usize
}

/// Page holding `start` plus the offset and length of input within it
fn map_input<M: PageMapping + ?Sized>(
    mapping: &M,
    end: u64,
    start: u64,
) -> Result<(&[u8], usize, usize)> {
    let page = mapping.page(start / PAGE_SIZE as u64)?;
    let off = (start % PAGE_SIZE as u64) as usize;
    let len = input_len(end, start);
    if page.len() < off + len {
        return Err(Error::Mapping(format!(
            "page {} of inode {} holds {} bytes, need {}",
            start / PAGE_SIZE as u64,
            mapping.inode().ino,
            page.len(),
            off + len
        )));
    }
    Ok((page, off, len))
}

fn too_big(total_in: usize, total_out: usize) -> Error {
    debug!(total_in, total_out, "Compression not worth it");
    Error::TooBig {
        total_in,
        total_out,
    }
}

/// Compress `len` bytes of `mapping` starting at file offset `start` into at
/// most `max_out_pages` freshly allocated pages.
///
/// Returns [`Error::TooBig`] once the output outgrows the page budget, once
/// more than 8 KiB of input has not shrunk, or when the finished output is not
/// smaller than the input.
pub fn compress_pages<C, M>(
    codec: &C,
    ws: &mut Workspace<C>,
    mapping: &M,
    start: u64,
    len: usize,
    max_out_pages: usize,
) -> Result<CompressedPages>
where
    C: Codec,
    M: PageMapping + ?Sized,
{
    if len == 0 || max_out_pages == 0 {
        return Err(Error::InvalidArgument(format!(
            "nothing to compress: {} bytes into {} pages",
            len, max_out_pages
        )));
    }
    if len > MAX_INPUT {
        return Err(Error::InvalidArgument(format!(
            "{} bytes exceeds the {} byte extent limit",
            len, MAX_INPUT
        )));
    }
    let orig_end = start
        .checked_add(len as u64)
        .filter(|&end| end <= mapping.len())
        .ok_or_else(|| {
            Error::Mapping(format!(
                "range {}+{} beyond end of inode {}",
                start,
                len,
                mapping.inode().ino
            ))
        })?;

    let level = ws.req_level;
    let origin = Origin {
        inode: mapping.inode(),
        offset: start,
    };
    let params = codec.params_for(level, len);
    codec
        .init_compress(&mut ws.scratch, &params, len)
        .map_err(|e| codec_failure(codec.name(), "compression init", level, origin, e))?;

    let mut start = start;
    let mut len = len;
    let (mut in_page, mut in_off, mut cur_len) = map_input(mapping, orig_end, start)?;
    let mut in_pos = 0;

    let mut pages: Vec<Page> = Vec::new();
    pages
        .try_reserve_exact(max_out_pages)
        .map_err(|_| Error::OutOfMemory(max_out_pages * PAGE_SIZE))?;
    let mut max_out = max_out_pages * PAGE_SIZE;
    let mut out = alloc_page()?;
    let mut out_pos = 0;
    let mut out_size = max_out.min(PAGE_SIZE);

    let mut tot_in = 0;
    let mut tot_out = 0;

    loop {
        let step = codec
            .compress_step(
                &mut ws.scratch,
                &in_page[in_off + in_pos..in_off + cur_len],
                &mut out[out_pos..out_size],
            )
            .map_err(|e| codec_failure(codec.name(), "compression", level, origin, e))?;
        in_pos += step.read;
        out_pos += step.written;

        // growing instead of shrinking
        if tot_in + in_pos > INCOMPRESSIBLE_PROBE && tot_in + in_pos < tot_out + out_pos {
            return Err(too_big(tot_in + in_pos, tot_out + out_pos));
        }

        if out_pos >= max_out {
            return Err(too_big(tot_in + in_pos, tot_out + out_pos));
        }

        if out_pos == out_size {
            tot_out += PAGE_SIZE;
            max_out -= PAGE_SIZE;
            if pages.len() + 1 == max_out_pages {
                return Err(too_big(tot_in + in_pos, tot_out));
            }
            pages.push(std::mem::replace(&mut out, alloc_page()?));
            out_pos = 0;
            out_size = max_out.min(PAGE_SIZE);
        }

        if in_pos >= len {
            tot_in += in_pos;
            break;
        }

        if in_pos == cur_len {
            tot_in += cur_len;
            start += cur_len as u64;
            len -= cur_len;
            (in_page, in_off, cur_len) = map_input(mapping, orig_end, start)?;
            in_pos = 0;
        }
    }

    loop {
        let step = codec
            .end_stream(&mut ws.scratch, &mut out[out_pos..out_size])
            .map_err(|e| codec_failure(codec.name(), "compression end", level, origin, e))?;
        out_pos += step.written;
        if step.remaining == 0 {
            tot_out += out_pos;
            break;
        }
        if out_pos >= max_out {
            return Err(too_big(tot_in, tot_out + out_pos));
        }
        if out_pos < out_size {
            continue;
        }

        tot_out += PAGE_SIZE;
        max_out -= PAGE_SIZE;
        if pages.len() + 1 == max_out_pages {
            return Err(too_big(tot_in, tot_out));
        }
        pages.push(std::mem::replace(&mut out, alloc_page()?));
        out_pos = 0;
        out_size = max_out.min(PAGE_SIZE);
    }
    if out_pos > 0 {
        pages.push(out);
    }

    if tot_out >= tot_in {
        return Err(too_big(tot_in, tot_out));
    }

    metrics::record_stream_bytes("in", tot_in);
    metrics::record_stream_bytes("out", tot_out);
    debug!(
        level,
        ino = origin.inode.ino,
        offset = origin.offset,
        tot_in,
        tot_out,
        pages = pages.len(),
        "Compressed range"
    );

    Ok(CompressedPages {
        pages,
        total_in: tot_in,
        total_out: tot_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{MockCodec, ZstdCodec};
    use crate::stream::mapping::{InodeRef, MemMapping};

    fn workspace<C: Codec>(codec: &C, level: i32) -> Workspace<C> {
        Workspace::alloc(codec, level, 0).expect("workspace")
    }

    #[test]
    fn test_input_len() {
        assert_eq!(input_len(10_000, 0), PAGE_SIZE);
        assert_eq!(input_len(10_000, 100), PAGE_SIZE - 100);
        assert_eq!(input_len(10_000, 8192), 10_000 - 8192);
    }

    #[test]
    fn test_compress_unaligned_start() -> Result<()> {
        let codec = MockCodec::new();
        let mut ws = workspace(&codec, 1);
        let data = vec![b'z'; 3 * PAGE_SIZE];
        let mapping = MemMapping::from_bytes(&data)?;

        let out = compress_pages(&codec, &mut ws, &mapping, 100, 2 * PAGE_SIZE, 4)?;
        assert_eq!(out.total_in, 2 * PAGE_SIZE);
        assert!(out.total_out < out.total_in);
        assert_eq!(out.page_count(), 1);
        Ok(())
    }

    #[test]
    fn test_zstd_compresses_text() -> Result<()> {
        let codec = ZstdCodec::new();
        let mut ws = workspace(&codec, 3);
        let data = b"page streaming through a pooled workspace\n".repeat(400);
        let mapping = MemMapping::new(InodeRef::new(5, 260), &data)?;

        let out = compress_pages(&codec, &mut ws, &mapping, 0, data.len(), 8)?;
        assert_eq!(out.total_in, data.len());
        assert!(out.total_out < PAGE_SIZE);
        Ok(())
    }

    #[test]
    fn test_incompressible_mock_is_too_big() -> Result<()> {
        // every byte differs from its neighbour: each turns into a 2-byte run
        let codec = MockCodec::new();
        let mut ws = workspace(&codec, 1);
        let data: Vec<u8> = (0..4 * PAGE_SIZE).map(|i| (i % 251) as u8).collect();
        let mapping = MemMapping::from_bytes(&data)?;

        let err = compress_pages(&codec, &mut ws, &mapping, 0, data.len(), 16).unwrap_err();
        assert!(err.is_too_big());
        Ok(())
    }

    #[test]
    fn test_page_budget_exhausted() -> Result<()> {
        let codec = MockCodec::new();
        let mut ws = workspace(&codec, 1);
        let data: Vec<u8> = (0..2 * PAGE_SIZE).map(|i| (i % 7) as u8).collect();
        let mapping = MemMapping::from_bytes(&data)?;

        let err = compress_pages(&codec, &mut ws, &mapping, 0, data.len(), 1).unwrap_err();
        assert!(err.is_too_big());
        Ok(())
    }

    #[test]
    fn test_range_past_end() -> Result<()> {
        let codec = MockCodec::new();
        let mut ws = workspace(&codec, 1);
        let mapping = MemMapping::from_bytes(&[0u8; 100])?;
        let err = compress_pages(&codec, &mut ws, &mapping, 50, 100, 1).unwrap_err();
        assert!(matches!(err, Error::Mapping(_)));
        Ok(())
    }

    /// Claims a full page but hands out 100 bytes
    struct ShortMapping {
        data: Vec<u8>,
    }

    impl PageMapping for ShortMapping {
        fn inode(&self) -> InodeRef {
            InodeRef::new(5, 270)
        }

        fn len(&self) -> u64 {
            PAGE_SIZE as u64
        }

        fn page(&self, _index: u64) -> Result<&[u8]> {
            Ok(&self.data[..])
        }
    }

    #[test]
    fn test_short_page_is_mapping_error() {
        let codec = MockCodec::new();
        let mut ws = workspace(&codec, 1);
        let mapping = ShortMapping {
            data: vec![b'a'; 100],
        };
        let err = compress_pages(&codec, &mut ws, &mapping, 0, PAGE_SIZE, 1).unwrap_err();
        assert!(matches!(err, Error::Mapping(_)), "{:?}", err);
    }

    #[test]
    fn test_empty_input_rejected() -> Result<()> {
        let codec = MockCodec::new();
        let mut ws = workspace(&codec, 1);
        let mapping = MemMapping::from_bytes(&[0u8; 100])?;
        let err = compress_pages(&codec, &mut ws, &mapping, 0, 0, 1).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        Ok(())
    }
}
