//! Index header (C6): the 512-byte header block of a CDX-family index file.

use crate::bytes;
use crate::error::{Error, Result};

pub const INDEX_HEADER_SIZE: usize = 512;
const EXPR_AREA_OFFSET: usize = 256;
const EXPR_AREA_LEN: usize = INDEX_HEADER_SIZE - EXPR_AREA_OFFSET;

/// The index file's 512-byte header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHeader {
    pub root_page: i32,
    pub free_page_head: i32,
    pub version: u32,
    pub key_length: u16,
    pub index_options: u8,
    pub signature: u8,
    pub sort_order: u16,
    key_expr: Vec<u8>,
    for_expr: Vec<u8>,
}

impl IndexHeader {
    pub fn new(key_length: u16) -> Result<IndexHeader> {
        if !(1..=240).contains(&key_length) {
            return Err(Error::InvalidKeyLength(key_length as usize));
        }
        Ok(IndexHeader {
            root_page: -1,
            free_page_head: -1,
            version: 1,
            key_length,
            index_options: 0,
            signature: 0,
            sort_order: 0,
            key_expr: Vec::new(),
            for_expr: Vec::new(),
        })
    }

    pub fn from_bytes(buf: &[u8]) -> Result<IndexHeader> {
        if buf.len() < INDEX_HEADER_SIZE {
            return Err(Error::InvalidHeader("index header shorter than 512 bytes".into()));
        }

        let root_page = bytes::read_i32(&buf[0..4]);
        let free_page_head = bytes::read_i32(&buf[4..8]);
        let version = bytes::read_u32(&buf[8..12]);
        let key_length = bytes::read_u16(&buf[12..14]);
        let index_options = buf[14];
        let signature = buf[15];
        let sort_order = bytes::read_u16(&buf[16..18]);
        let key_expr_len = bytes::read_u16(&buf[18..20]) as usize;
        let for_expr_len = bytes::read_u16(&buf[20..22]) as usize;

        if !(1..=240).contains(&key_length) {
            return Err(Error::InvalidKeyLength(key_length as usize));
        }
        if key_expr_len + for_expr_len > EXPR_AREA_LEN {
            return Err(Error::InvalidHeader(
                "key/for expression lengths exceed header capacity".into(),
            ));
        }

        let expr_area = &buf[EXPR_AREA_OFFSET..INDEX_HEADER_SIZE];
        let key_expr = expr_area[..key_expr_len].to_vec();
        let for_expr = expr_area[key_expr_len..key_expr_len + for_expr_len].to_vec();

        Ok(IndexHeader {
            root_page,
            free_page_head,
            version,
            key_length,
            index_options,
            signature,
            sort_order,
            key_expr,
            for_expr,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; INDEX_HEADER_SIZE];
        bytes::write_i32(&mut buf[0..4], self.root_page);
        bytes::write_i32(&mut buf[4..8], self.free_page_head);
        bytes::write_u32(&mut buf[8..12], self.version);
        bytes::write_u16(&mut buf[12..14], self.key_length);
        buf[14] = self.index_options;
        buf[15] = self.signature;
        bytes::write_u16(&mut buf[16..18], self.sort_order);
        bytes::write_u16(&mut buf[18..20], self.key_expr.len() as u16);
        bytes::write_u16(&mut buf[20..22], self.for_expr.len() as u16);

        let expr_area = &mut buf[EXPR_AREA_OFFSET..INDEX_HEADER_SIZE];
        expr_area[..self.key_expr.len()].copy_from_slice(&self.key_expr);
        expr_area[self.key_expr.len()..self.key_expr.len() + self.for_expr.len()]
            .copy_from_slice(&self.for_expr);

        buf
    }

    /// The key expression bytes, opaque to this crate: compiled expression
    /// evaluation is out of scope.
    pub fn key_expression(&self) -> &[u8] {
        &self.key_expr
    }

    /// The optional FOR-expression bytes. Exposed for callers, never
    /// evaluated here.
    pub fn for_expression(&self) -> &[u8] {
        &self.for_expr
    }

    pub fn is_empty_tree(&self) -> bool {
        self.root_page < 0
    }
}
