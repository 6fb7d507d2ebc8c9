//! Streaming drivers
//!
//! Push file pages through a codec using a borrowed workspace. Compression
//! reads from a [`PageMapping`] and fills freshly allocated output pages up to
//! a page budget; decompression reads compressed pages through the
//! workspace's one-page staging buffer into a flat destination.
//!
//! "Too big" is an expected outcome, not a failure: the caller stores the
//! range uncompressed. Codec errors carry the owning inode and file offset.

mod compress;
mod decompress;
mod mapping;

pub use compress::compress_pages;
pub use decompress::{decompress_pages, decompress_range};
pub use mapping::{
    alloc_page, CompressedExtent, CompressedPages, InodeRef, MemMapping, Origin, Page, PageMapping,
};

use crate::codec::{Codec, CodecError};
use crate::error::{Error, Result};
use crate::pool::WorkspaceGuard;
use tracing::error;

/// Log a codec failure with its owner and wrap it.
fn codec_failure(
    codec_name: &str,
    op: &'static str,
    level: i32,
    origin: Origin,
    source: CodecError,
) -> Error {
    error!(
        codec = codec_name,
        op,
        level,
        code = ?source.code,
        root = origin.inode.root,
        ino = origin.inode.ino,
        offset = origin.offset,
        error = %source.message,
        "Codec stream failed"
    );
    Error::Codec {
        op,
        level,
        root: origin.inode.root,
        ino: origin.inode.ino,
        offset: origin.offset,
        source,
    }
}

impl<C: Codec> WorkspaceGuard<C> {
    /// Compress `len` bytes at `start` with the level this workspace was borrowed for.
    pub fn compress<M: PageMapping + ?Sized>(
        &mut self,
        mapping: &M,
        start: u64,
        len: usize,
        max_out_pages: usize,
    ) -> Result<CompressedPages> {
        let (codec, ws) = self.parts();
        compress_pages(codec, ws, mapping, start, len, max_out_pages)
    }

    pub fn decompress(&mut self, extent: &CompressedExtent, dest: &mut [u8]) -> Result<usize> {
        let (codec, ws) = self.parts();
        decompress_pages(codec, ws, extent, dest)
    }

    pub fn decompress_range(
        &mut self,
        data_in: &[u8],
        dest_page: &mut [u8],
        dest_off: usize,
        dest_len: usize,
        origin: Origin,
    ) -> Result<()> {
        let (codec, ws) = self.parts();
        decompress_range(codec, ws, data_in, dest_page, dest_off, dest_len, origin)
    }
}
