//! Page sources and page-granular buffers

use crate::error::{Error, Result};
use crate::level::PAGE_SIZE;

/// One page of memory
pub type Page = Box<[u8]>;

/// Allocate a zeroed page, failing instead of aborting when memory is short.
pub fn alloc_page() -> Result<Page> {
    let mut page = Vec::new();
    page.try_reserve_exact(PAGE_SIZE)
        .map_err(|_| Error::OutOfMemory(PAGE_SIZE))?;
    page.resize(PAGE_SIZE, 0);
    Ok(page.into_boxed_slice())
}

/// Owner of the data being compressed, for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct InodeRef {
    pub root: u64,
    pub ino: u64,
}

impl InodeRef {
    pub fn new(root: u64, ino: u64) -> Self {
        Self { root, ino }
    }
}

/// File offset inside an inode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Origin {
    pub inode: InodeRef,
    pub offset: u64,
}

/// Read-only, page-granular view of a file's contents
pub trait PageMapping {
    fn inode(&self) -> InodeRef;

    /// Bytes addressable through this mapping
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The full page holding file offset `index * PAGE_SIZE`
    fn page(&self, index: u64) -> Result<&[u8]>;
}

/// In-memory [`PageMapping`]
#[derive(Debug, Clone)]
pub struct MemMapping {
    inode: InodeRef,
    pages: Vec<Page>,
    len: u64,
}

impl MemMapping {
    /// Copy `data` into pages; the last page is zero padded.
    pub fn new(inode: InodeRef, data: &[u8]) -> Result<Self> {
        let pages = split_pages(data)?;
        Ok(Self {
            inode,
            pages,
            len: data.len() as u64,
        })
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::new(InodeRef::default(), data)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

impl PageMapping for MemMapping {
    fn inode(&self) -> InodeRef {
        self.inode
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn page(&self, index: u64) -> Result<&[u8]> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.pages.get(i))
            .map(|page| &page[..])
            .ok_or_else(|| {
                Error::Mapping(format!(
                    "page {} beyond end of inode {} ({} bytes)",
                    index, self.inode.ino, self.len
                ))
            })
    }
}

/// Split bytes into zero-padded pages
pub(crate) fn split_pages(data: &[u8]) -> Result<Vec<Page>> {
    let mut pages = Vec::new();
    pages
        .try_reserve_exact(data.len().div_ceil(PAGE_SIZE))
        .map_err(|_| Error::OutOfMemory(data.len()))?;
    for chunk in data.chunks(PAGE_SIZE) {
        let mut page = alloc_page()?;
        page[..chunk.len()].copy_from_slice(chunk);
        pages.push(page);
    }
    Ok(pages)
}

/// Output of a successful compression
#[derive(Debug, Clone)]
pub struct CompressedPages {
    /// Output pages, the last one partially used
    pub pages: Vec<Page>,
    /// Input bytes consumed
    pub total_in: usize,
    /// Compressed bytes across `pages`
    pub total_out: usize,
}

impl CompressedPages {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Compressed bytes as one contiguous buffer
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_out);
        let mut left = self.total_out;
        for page in &self.pages {
            let n = left.min(page.len());
            out.extend_from_slice(&page[..n]);
            left -= n;
        }
        out
    }
}

/// A compressed extent as read back from disk
#[derive(Debug, Clone)]
pub struct CompressedExtent {
    pub pages: Vec<Page>,
    /// Compressed length in bytes
    pub len: usize,
    /// File offset of the decompressed data
    pub start: u64,
    pub inode: InodeRef,
}

impl CompressedExtent {
    pub fn from_bytes(data: &[u8], start: u64, inode: InodeRef) -> Result<Self> {
        Ok(Self {
            pages: split_pages(data)?,
            len: data.len(),
            start,
            inode,
        })
    }

    pub fn from_compressed(compressed: CompressedPages, start: u64, inode: InodeRef) -> Self {
        Self {
            pages: compressed.pages,
            len: compressed.total_out,
            start,
            inode,
        }
    }
}
