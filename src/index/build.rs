//! Index bulk-build (C10): the one index write path this crate implements.
//! Consumes a stream of `(key, record_index)` pairs and writes a fresh
//! bottom-up B-tree, no incremental insert/delete.

use std::path::Path;

use crate::error::{Error, Result};

use super::header::{INDEX_HEADER_SIZE, IndexHeader};
use super::page::{ATTR_LEAF, ATTR_ROOT, PAGE_HEADER_SIZE, PAGE_SIZE, IndexPage, PageEntry};

fn normalize(key: &[u8], key_length: u16) -> Vec<u8> {
    let kl = key_length as usize;
    let mut out = vec![b' '; kl];
    let n = key.len().min(kl);
    out[..n].copy_from_slice(&key[..n]);
    out
}

/// Build a new CDX-family file at `output_path` from `pairs`. `pairs` is
/// expected sorted ascending by key; this function sorts defensively so an
/// unsorted input still produces a correct tree.
pub fn build_from_pairs(
    output_path: impl AsRef<Path>,
    key_length: u16,
    pairs: impl IntoIterator<Item = (Vec<u8>, u32)>,
) -> Result<()> {
    if !(1..=240).contains(&key_length) {
        return Err(Error::InvalidKeyLength(key_length as usize));
    }

    let entry_size = key_length as usize + 4;
    let max_entries_per_page = (PAGE_SIZE - PAGE_HEADER_SIZE) / entry_size;
    if max_entries_per_page == 0 {
        return Err(Error::InvalidKeyLength(key_length as usize));
    }

    let mut pairs: Vec<(Vec<u8>, u32)> = pairs
        .into_iter()
        .map(|(k, r)| (normalize(&k, key_length), r))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut leaf_chunks: Vec<&[(Vec<u8>, u32)]> = pairs.chunks(max_entries_per_page).collect();
    if leaf_chunks.is_empty() {
        leaf_chunks.push(&[]);
    }

    let mut pages: Vec<IndexPage> = Vec::new();
    for (i, chunk) in leaf_chunks.iter().enumerate() {
        let left = if i == 0 { -1 } else { (i - 1) as i32 };
        let right = if i + 1 < leaf_chunks.len() { (i + 1) as i32 } else { -1 };
        let entries = chunk
            .iter()
            .map(|(k, r)| PageEntry { key: k.clone(), pointer: *r })
            .collect::<Vec<_>>();
        let is_sole_layer = leaf_chunks.len() == 1;
        pages.push(IndexPage {
            page_index: i as u32,
            attributes: if is_sole_layer { ATTR_ROOT | ATTR_LEAF } else { ATTR_LEAF },
            key_count: entries.len() as u16,
            left_sibling: left,
            right_sibling: right,
            entries,
        });
    }

    let leaf_layer_len = pages.len();
    let mut layer_start = 0usize;
    let mut layer_len = leaf_layer_len;
    let mut root_page_index = 0u32;

    while layer_len > 1 {
        let separators: Vec<(Vec<u8>, u32)> = pages[layer_start..layer_start + layer_len]
            .iter()
            .map(|p| {
                let key = p
                    .entries
                    .last()
                    .map(|e| e.key.clone())
                    .unwrap_or_else(|| vec![0u8; key_length as usize]);
                (key, p.page_index)
            })
            .collect();

        let next_layer_start = pages.len();
        let chunks: Vec<&[(Vec<u8>, u32)]> = separators.chunks(max_entries_per_page).collect();
        let n_new = chunks.len();

        for (i, chunk) in chunks.iter().enumerate() {
            let page_index = (next_layer_start + i) as u32;
            let left = if i == 0 { -1 } else { (next_layer_start + i - 1) as i32 };
            let right = if i + 1 < n_new { (next_layer_start + i + 1) as i32 } else { -1 };
            let entries = chunk
                .iter()
                .map(|(k, r)| PageEntry { key: k.clone(), pointer: *r })
                .collect::<Vec<_>>();
            pages.push(IndexPage {
                page_index,
                attributes: if n_new == 1 { ATTR_ROOT } else { 0 },
                key_count: entries.len() as u16,
                left_sibling: left,
                right_sibling: right,
                entries,
            });
        }

        if n_new == 1 {
            root_page_index = next_layer_start as u32;
        }
        layer_start = next_layer_start;
        layer_len = n_new;
    }

    if pages.len() == leaf_layer_len {
        // A single leaf page is already the root (marked above).
        root_page_index = 0;
    }

    let mut header = IndexHeader::new(key_length)?;
    header.root_page = root_page_index as i32;

    let mut buf = vec![0u8; INDEX_HEADER_SIZE + pages.len() * PAGE_SIZE];
    buf[..INDEX_HEADER_SIZE].copy_from_slice(&header.to_bytes());
    for page in &pages {
        let offset = INDEX_HEADER_SIZE + page.page_index as usize * PAGE_SIZE;
        buf[offset..offset + PAGE_SIZE].copy_from_slice(&page.to_bytes(key_length));
    }

    std::fs::write(output_path, buf)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::index::btree::IndexEngine;

    #[test]
    fn test_build_single_page_tree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.cdx");
        let pairs = vec![(b"B".to_vec(), 2u32), (b"A".to_vec(), 1u32)];
        build_from_pairs(&path, 1, pairs).unwrap();

        let engine = IndexEngine::open(&path, 4).unwrap();
        assert_eq!(engine.search_exact(b"A").unwrap(), 1);
        assert_eq!(engine.search_exact(b"B").unwrap(), 2);
    }

    #[test]
    fn test_build_multi_level_tree_matches_linear_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.cdx");

        let key_length = 4u16;
        let mut pairs: Vec<(Vec<u8>, u32)> = Vec::new();
        for i in 0..500u32 {
            pairs.push((format!("{i:04}").into_bytes(), i));
        }

        build_from_pairs(&path, key_length, pairs.clone()).unwrap();
        let engine = IndexEngine::open(&path, 8).unwrap();

        for (key, record_index) in &pairs {
            assert_eq!(engine.search_exact(key).unwrap(), *record_index);
        }
        assert!(matches!(engine.search_exact(b"9999"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_build_rejects_invalid_key_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.cdx");
        let result = build_from_pairs(&path, 0, Vec::<(Vec<u8>, u32)>::new());
        assert!(matches!(result, Err(Error::InvalidKeyLength(0))));
    }
}
