//! Index B-tree (C6): open/parse a CDX-family file, descend for exact,
//! range and prefix search.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fs::File;
use std::path::{Path, PathBuf};

use mmap_rs::{Mmap, MmapFlags, MmapOptions};

use crate::error::{Error, Result};

use super::cache::PageCache;
use super::header::{INDEX_HEADER_SIZE, IndexHeader};
use super::page::{IndexPage, PAGE_SIZE};

/// Orders two keys of equal (padded) length. The default is lexicographic
/// unsigned-byte order; callers may supply an alternative collation.
pub trait KeyComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

pub struct LexicographicComparator;

impl KeyComparator for LexicographicComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

fn io_err(e: impl std::fmt::Display) -> Error {
    Error::Io(std::io::Error::other(e.to_string()))
}

pub struct IndexEngine {
    path: PathBuf,
    mmap: Mmap,
    header: IndexHeader,
    cache: RefCell<PageCache>,
    comparator: Box<dyn KeyComparator>,
}

impl IndexEngine {
    pub fn open(path: impl AsRef<Path>, cache_capacity: usize) -> Result<IndexEngine> {
        Self::open_with_comparator(path, cache_capacity, Box::new(LexicographicComparator))
    }

    pub fn open_with_comparator(
        path: impl AsRef<Path>,
        cache_capacity: usize,
        comparator: Box<dyn KeyComparator>,
    ) -> Result<IndexEngine> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::NotFound(path.display().to_string()));
        }

        let file = File::open(path)?;
        let size = file.metadata()?.len() as usize;
        if size < INDEX_HEADER_SIZE {
            return Err(Error::InvalidHeader("index file shorter than 512-byte header".into()));
        }

        let mmap = unsafe {
            MmapOptions::new(size)
                .map_err(io_err)?
                .with_file(&file, 0)
                .with_flags(MmapFlags::SHARED)
                .map()
                .map_err(io_err)?
        };

        let header = IndexHeader::from_bytes(&mmap.as_slice()[..INDEX_HEADER_SIZE])?;

        Ok(IndexEngine {
            path: path.to_path_buf(),
            mmap,
            header,
            cache: RefCell::new(PageCache::new(cache_capacity)),
            comparator,
        })
    }

    pub fn close(self) -> Result<()> {
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    fn page_offset(&self, page_index: u32) -> usize {
        INDEX_HEADER_SIZE + page_index as usize * PAGE_SIZE
    }

    pub fn read_page(&self, page_index: u32) -> Result<IndexPage> {
        if let Some(page) = self.cache.borrow_mut().get(page_index) {
            return Ok(page);
        }

        let offset = self.page_offset(page_index);
        if offset + PAGE_SIZE > self.mmap.len() {
            return Err(Error::InvalidPage(format!("page {page_index} beyond end of file")));
        }

        let slice = &self.mmap.as_slice()[offset..offset + PAGE_SIZE];
        let page = IndexPage::from_bytes(page_index, slice, self.header.key_length)?;
        self.cache.borrow_mut().put(page_index, page.clone());
        Ok(page)
    }

    fn normalize_key(&self, key: &[u8]) -> Result<Vec<u8>> {
        let kl = self.header.key_length as usize;
        if key.len() > kl {
            return Err(Error::KeyTooLong { got: key.len(), expected: kl });
        }
        let mut out = vec![b' '; kl];
        out[..key.len()].copy_from_slice(key);
        Ok(out)
    }

    fn descend_branch(&self, page: &IndexPage, key: &[u8]) -> u32 {
        for entry in &page.entries {
            if self.comparator.compare(&entry.key, key) != Ordering::Less {
                return entry.pointer;
            }
        }
        page.entries.last().map(|e| e.pointer).unwrap_or(0)
    }

    fn leaf_for(&self, key: &[u8]) -> Result<IndexPage> {
        if self.header.is_empty_tree() {
            return Err(Error::NotFound(format!(
                "key {:?} not found in empty index",
                String::from_utf8_lossy(key)
            )));
        }
        let mut page = self.read_page(self.header.root_page as u32)?;
        while !page.is_leaf() {
            let child = self.descend_branch(&page, key);
            page = self.read_page(child)?;
        }
        Ok(page)
    }

    fn leaf_start_pos(page: &IndexPage, key: &[u8], cmp: &dyn KeyComparator) -> usize {
        page.entries
            .iter()
            .position(|e| cmp.compare(&e.key, key) != Ordering::Less)
            .unwrap_or(page.entries.len())
    }

    pub fn search_exact(&self, key: &[u8]) -> Result<u32> {
        let key = self.normalize_key(key)?;
        let page = self.leaf_for(&key)?;
        match page
            .entries
            .binary_search_by(|e| self.comparator.compare(&e.key, &key))
        {
            Ok(idx) => Ok(page.entries[idx].pointer),
            Err(_) => Err(Error::NotFound(format!(
                "key {:?} not found in index",
                String::from_utf8_lossy(&key)
            ))),
        }
    }

    pub fn search_range<'a>(&'a self, lo: &[u8], hi: &[u8]) -> Result<RangeScan<'a>> {
        let lo = self.normalize_key(lo)?;
        let hi = self.normalize_key(hi)?;
        let page = self.leaf_for(&lo)?;
        let pos = Self::leaf_start_pos(&page, &lo, self.comparator.as_ref());
        Ok(RangeScan {
            engine: self,
            current_page: Some(page),
            pos,
            hi,
            prefix: None,
        })
    }

    pub fn search_prefix<'a>(&'a self, prefix: &[u8]) -> Result<RangeScan<'a>> {
        let kl = self.header.key_length as usize;
        if prefix.len() > kl {
            return Err(Error::KeyTooLong { got: prefix.len(), expected: kl });
        }
        let mut lo = vec![b' '; kl];
        lo[..prefix.len()].copy_from_slice(prefix);
        let mut hi = vec![0xFFu8; kl];
        hi[..prefix.len()].copy_from_slice(prefix);

        let page = self.leaf_for(&lo)?;
        let pos = Self::leaf_start_pos(&page, &lo, self.comparator.as_ref());
        Ok(RangeScan {
            engine: self,
            current_page: Some(page),
            pos,
            hi,
            prefix: Some(prefix.to_vec()),
        })
    }
}

/// A finite, lazily-advancing scan over a range or prefix of keys, following
/// leaf right-sibling pointers as it exhausts each page.
pub struct RangeScan<'a> {
    engine: &'a IndexEngine,
    current_page: Option<IndexPage>,
    pos: usize,
    hi: Vec<u8>,
    prefix: Option<Vec<u8>>,
}

impl Iterator for RangeScan<'_> {
    type Item = Result<(Vec<u8>, u32)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let page = self.current_page.as_ref()?;
            if self.pos >= page.entries.len() {
                let right = page.right_sibling;
                if right < 0 {
                    return None;
                }
                match self.engine.read_page(right as u32) {
                    Ok(next_page) => {
                        self.current_page = Some(next_page);
                        self.pos = 0;
                        continue;
                    }
                    Err(e) => return Some(Err(e)),
                }
            }

            let entry = &page.entries[self.pos];
            self.pos += 1;

            if self.engine.comparator.compare(&entry.key, &self.hi) == Ordering::Greater {
                return None;
            }
            if let Some(prefix) = &self.prefix {
                if !entry.key.starts_with(prefix.as_slice()) {
                    return None;
                }
            }
            return Some(Ok((entry.key.clone(), entry.pointer)));
        }
    }
}
