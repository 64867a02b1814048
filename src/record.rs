//! Record engine (C3).
//!
//! Files are memory-mapped, following the reader/writer split this corpus
//! uses for its own page-oriented tablespace files: a read is a slice of the
//! map, a write mutates it directly, and growth remaps after extending the
//! backing file.

use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use mmap_rs::{Mmap, MmapFlags, MmapMut, MmapOptions};

use crate::error::{Error, Result};
use crate::field::{self, Value, civil_from_days};
use crate::header::{
    DbfHeader, FIELD_DESCRIPTOR_SIZE, FieldDescriptor, HEADER_SIZE, TERMINATOR, VERSION_FOXBASE,
    VERSION_WITH_MEMO, build_header,
};
use crate::txn;

const DELETED_MARKER: u8 = 0x2A;
const LIVE_MARKER: u8 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overwrite {
    ErrorIfExists,
    Truncate,
}

#[derive(Debug, Clone, Copy)]
pub struct CreateOptions {
    pub overwrite: Overwrite,
}

impl Default for CreateOptions {
    fn default() -> Self {
        CreateOptions {
            overwrite: Overwrite::ErrorIfExists,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    pub include_deleted: bool,
    pub chunk_size: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        StreamOptions {
            include_deleted: false,
            chunk_size: 256,
        }
    }
}

/// A parsed record: its index, deletion flag, and field values in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub index: u32,
    pub deleted: bool,
    pub values: Vec<(String, Value)>,
}

impl Record {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }
}

enum Backing {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl Backing {
    fn as_slice(&self) -> &[u8] {
        match self {
            Backing::ReadOnly(m) => m.as_slice(),
            Backing::ReadWrite(m) => m.as_slice(),
        }
    }

    fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        match self {
            Backing::ReadWrite(m) => Ok(m.as_mut_slice()),
            Backing::ReadOnly(_) => Err(Error::NotWritable),
        }
    }
}

fn io_err(e: impl std::fmt::Display) -> Error {
    Error::Io(std::io::Error::other(e.to_string()))
}

/// Owns a record file's handle, header and field schema.
pub struct RecordEngine {
    path: PathBuf,
    mode: AccessMode,
    backing: Backing,
    header: DbfHeader,
    fields: Vec<FieldDescriptor>,
}

impl RecordEngine {
    pub fn open(path: impl AsRef<Path>, mode: AccessMode) -> Result<RecordEngine> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::NotFound(path.display().to_string()));
        }

        let backing = Self::map(path, mode)?;
        let header = DbfHeader::from_bytes(&backing.as_slice()[..HEADER_SIZE])?;
        let fields = Self::parse_fields(backing.as_slice(), &header)?;

        Ok(RecordEngine {
            path: path.to_path_buf(),
            mode,
            backing,
            header,
            fields,
        })
    }

    pub fn create(
        path: impl AsRef<Path>,
        fields: Vec<FieldDescriptor>,
        options: CreateOptions,
    ) -> Result<RecordEngine> {
        let path = path.as_ref();
        if fields.is_empty() {
            return Err(Error::InvalidFieldDescriptor(
                "at least one field is required".into(),
            ));
        }
        if path.exists() {
            match options.overwrite {
                Overwrite::ErrorIfExists => {
                    return Err(Error::FileExists(path.display().to_string()));
                }
                Overwrite::Truncate => {}
            }
        }

        let has_memo = fields.iter().any(|f| f.field_type == field::FieldType::Memo);
        let version = if has_memo {
            VERSION_WITH_MEMO
        } else {
            VERSION_FOXBASE
        };
        let header = build_header(&fields, version)?;

        let mut buf = Vec::with_capacity(header.header_length as usize);
        buf.extend_from_slice(&header.to_bytes());
        for f in &fields {
            buf.extend_from_slice(&f.to_bytes());
        }
        buf.push(TERMINATOR);

        std::fs::write(path, &buf)?;

        Self::open(path, AccessMode::ReadWrite)
    }

    pub fn close(mut self) -> Result<()> {
        self.flush()
    }

    fn map(path: &Path, mode: AccessMode) -> Result<Backing> {
        let file = match mode {
            AccessMode::ReadOnly => File::open(path)?,
            AccessMode::ReadWrite => OpenOptions::new().read(true).write(true).open(path)?,
        };
        let size = file.metadata()?.len() as usize;
        if size < HEADER_SIZE {
            return Err(Error::InvalidHeader("file shorter than 32-byte header".into()));
        }

        unsafe {
            Ok(match mode {
                AccessMode::ReadOnly => Backing::ReadOnly(
                    MmapOptions::new(size)
                        .map_err(io_err)?
                        .with_file(&file, 0)
                        .with_flags(MmapFlags::SHARED)
                        .map()
                        .map_err(io_err)?,
                ),
                AccessMode::ReadWrite => Backing::ReadWrite(
                    MmapOptions::new(size)
                        .map_err(io_err)?
                        .with_file(&file, 0)
                        .with_flags(MmapFlags::SHARED)
                        .map_mut()
                        .map_err(io_err)?,
                ),
            })
        }
    }

    fn parse_fields(buf: &[u8], header: &DbfHeader) -> Result<Vec<FieldDescriptor>> {
        let count = header.field_count();
        if count == 0 {
            return Err(Error::InvalidFieldDescriptor("no field descriptors".into()));
        }
        let mut fields = Vec::with_capacity(count);
        for i in 0..count {
            let start = HEADER_SIZE + i * FIELD_DESCRIPTOR_SIZE;
            fields.push(FieldDescriptor::from_bytes(&buf[start..start + FIELD_DESCRIPTOR_SIZE])?);
        }
        let terminator_pos = HEADER_SIZE + count * FIELD_DESCRIPTOR_SIZE;
        if buf.get(terminator_pos) != Some(&TERMINATOR) {
            return Err(Error::InvalidHeader("missing field descriptor terminator".into()));
        }
        Ok(fields)
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.mode {
            AccessMode::ReadWrite => Ok(()),
            AccessMode::ReadOnly => Err(Error::NotWritable),
        }
    }

    fn flush(&mut self) -> Result<()> {
        if let Backing::ReadWrite(m) = &self.backing {
            m.flush(0..m.len()).map_err(io_err)?;
        }
        Ok(())
    }

    fn reload_header(&mut self) -> Result<()> {
        self.header = DbfHeader::from_bytes(&self.backing.as_slice()[..HEADER_SIZE])?;
        Ok(())
    }

    fn record_offset(&self, index: u32) -> usize {
        self.header.header_length as usize + (index as usize) * (self.header.record_length as usize)
    }

    fn write_header(&mut self) -> Result<()> {
        let bytes = self.header.to_bytes();
        self.backing.as_mut_slice()?[..HEADER_SIZE].copy_from_slice(&bytes);
        Ok(())
    }

    fn touch_last_update(&mut self) {
        self.header.last_update = today();
    }

    fn grow_to(&mut self, new_len: usize) -> Result<()> {
        if new_len <= self.backing.as_slice().len() {
            return Ok(());
        }
        self.ensure_writable()?;
        self.flush()?;

        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.set_len(new_len as u64)?;

        let mmap = unsafe {
            MmapOptions::new(new_len)
                .map_err(io_err)?
                .with_file(&file, 0)
                .with_flags(MmapFlags::SHARED)
                .map_mut()
                .map_err(io_err)?
        };
        self.backing = Backing::ReadWrite(mmap);
        Ok(())
    }

    fn encode_record(&self, values: &[(String, Value)], deleted: bool) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.header.record_length as usize);
        out.push(if deleted { DELETED_MARKER } else { LIVE_MARKER });
        for f in &self.fields {
            let value = values
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(&f.name))
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| field::default_value(f.field_type));
            out.extend_from_slice(&field::encode(f.field_type, &value, f.length as usize, f.decimals)?);
        }
        Ok(out)
    }

    fn parse_record(&self, index: u32, slice: &[u8]) -> Result<Record> {
        let deleted = slice[0] == DELETED_MARKER;
        let mut values = Vec::with_capacity(self.fields.len());
        let mut pos = 1;
        for f in &self.fields {
            let w = f.length as usize;
            let v = field::decode(f.field_type, &slice[pos..pos + w], f.decimals)?;
            values.push((f.name.clone(), v));
            pos += w;
        }
        Ok(Record { index, deleted, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &DbfHeader {
        &self.header
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn open_needs_recovery(&self) -> bool {
        self.header.needs_recovery()
    }

    pub fn record_count(&self) -> u32 {
        self.header.record_count
    }

    pub fn active_count(&self) -> u32 {
        (0..self.header.record_count)
            .filter(|&i| self.backing.as_slice()[self.record_offset(i)] != DELETED_MARKER)
            .count() as u32
    }

    pub fn deleted_count(&self) -> u32 {
        self.header.record_count - self.active_count()
    }

    pub fn read(&self, index: u32) -> Result<Record> {
        if index >= self.header.record_count {
            return Err(Error::IndexOutOfRange {
                index,
                count: self.header.record_count,
            });
        }
        let offset = self.record_offset(index);
        let len = self.header.record_length as usize;
        let slice = &self.backing.as_slice()[offset..offset + len];
        self.parse_record(index, slice)
    }

    pub fn read_all(&self, include_deleted: bool) -> Result<Vec<Record>> {
        let mut out = Vec::with_capacity(self.header.record_count as usize);
        for i in 0..self.header.record_count {
            let rec = self.read(i)?;
            if include_deleted || !rec.deleted {
                out.push(rec);
            }
        }
        Ok(out)
    }

    pub fn stream(&self, options: StreamOptions) -> RecordStream<'_> {
        RecordStream {
            engine: self,
            cursor: 0,
            include_deleted: options.include_deleted,
        }
    }

    fn append_internal(&mut self, values: &[(String, Value)]) -> Result<u32> {
        self.ensure_writable()?;
        let index = self.header.record_count;
        let rec_len = self.header.record_length as usize;
        let offset = self.record_offset(index);
        self.grow_to(offset + rec_len)?;

        let bytes = self.encode_record(values, false)?;
        self.backing.as_mut_slice()?[offset..offset + rec_len].copy_from_slice(&bytes);
        self.header.record_count += 1;
        Ok(index)
    }

    pub fn append(&mut self, values: &[(String, Value)]) -> Result<u32> {
        let index = self.append_internal(values)?;
        self.touch_last_update();
        self.write_header()?;
        Ok(index)
    }

    pub fn batch_append(&mut self, values_list: &[Vec<(String, Value)>]) -> Result<Vec<u32>> {
        let mut indices = Vec::with_capacity(values_list.len());
        for values in values_list {
            indices.push(self.append_internal(values)?);
        }
        self.touch_last_update();
        self.write_header()?;
        Ok(indices)
    }

    pub fn update(&mut self, index: u32, partial_values: &[(String, Value)]) -> Result<()> {
        self.ensure_writable()?;
        let existing = self.read(index)?;
        let mut merged = existing.values;
        for (name, v) in partial_values {
            if let Some(slot) = merged.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
                slot.1 = v.clone();
            }
        }
        let bytes = self.encode_record(&merged, existing.deleted)?;
        let offset = self.record_offset(index);
        let len = bytes.len();
        self.backing.as_mut_slice()?[offset..offset + len].copy_from_slice(&bytes);
        Ok(())
    }

    pub fn batch_update(&mut self, updates: &[(u32, Vec<(String, Value)>)]) -> Result<()> {
        for (index, partial) in updates {
            self.update(*index, partial)?;
        }
        Ok(())
    }

    fn set_deleted(&mut self, index: u32, deleted: bool) -> Result<()> {
        self.ensure_writable()?;
        if index >= self.header.record_count {
            return Err(Error::IndexOutOfRange {
                index,
                count: self.header.record_count,
            });
        }
        let offset = self.record_offset(index);
        self.backing.as_mut_slice()?[offset] = if deleted { DELETED_MARKER } else { LIVE_MARKER };
        Ok(())
    }

    pub fn mark_deleted(&mut self, index: u32) -> Result<()> {
        self.set_deleted(index, true)
    }

    pub fn undelete(&mut self, index: u32) -> Result<()> {
        self.set_deleted(index, false)
    }

    pub fn batch_delete(&mut self, indices: &[u32]) -> Result<()> {
        for &index in indices {
            self.mark_deleted(index)?;
        }
        Ok(())
    }

    /// Write a new file containing only the live records. The header is
    /// otherwise identical to the source's: only `record_count` differs.
    pub fn pack(&self, output_path: impl AsRef<Path>) -> Result<RecordEngine> {
        let live = self.read_all(false)?;
        let mut out = RecordEngine::create(
            output_path.as_ref(),
            self.fields.clone(),
            CreateOptions {
                overwrite: Overwrite::Truncate,
            },
        )?;

        out.header.version = self.header.version;
        out.header.last_update = self.header.last_update;
        out.header.encryption_flag = self.header.encryption_flag;
        out.header.has_index = self.header.has_index;
        out.header.language_driver = self.header.language_driver;
        out.write_header()?;

        let values_list: Vec<Vec<(String, Value)>> = live.into_iter().map(|r| r.values).collect();
        out.batch_append(&values_list)?;
        Ok(out)
    }

    /// Run `f` under a shadow-copy transaction. The snapshot is taken before
    /// the transaction-flag byte is touched, so a failed `f` leaves the file
    /// byte-identical to its state before this call, flag included. On
    /// success the flag is cleared before the backup is discarded.
    pub fn with_transaction<T>(&mut self, f: impl FnOnce(&mut RecordEngine) -> Result<T>) -> Result<T> {
        self.ensure_writable()?;
        self.flush()?;

        let path = self.path.clone();
        let result = txn::with_transaction(&path, || {
            self.header.transaction_flag = 1;
            self.write_header()?;
            self.flush()?;

            let value = f(self)?;

            self.header.transaction_flag = 0;
            self.write_header()?;
            self.flush()?;
            Ok(value)
        });

        if result.is_err() {
            self.reload_header()?;
        }
        result
    }
}

impl Display for RecordEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RecordEngine(path={}, {})", self.path.display(), self.header)
    }
}

/// A restartable, demand-driven iterator over a record file's records.
pub struct RecordStream<'a> {
    engine: &'a RecordEngine,
    cursor: u32,
    include_deleted: bool,
}

impl Iterator for RecordStream<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Result<Record>> {
        while self.cursor < self.engine.header.record_count {
            let i = self.cursor;
            self.cursor += 1;
            match self.engine.read(i) {
                Ok(rec) if !self.include_deleted && rec.deleted => continue,
                other => return Some(other),
            }
        }
        None
    }
}

fn today() -> (u8, u8, u8) {
    use std::time::{SystemTime, UNIX_EPOCH};
    let days = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
        / 86_400;
    let (y, m, d) = civil_from_days(days);
    (((y - 1900).clamp(0, 255)) as u8, m as u8, d as u8)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::field::{FieldType, Logical};
    use crate::header::FieldDescriptor;

    fn sample_fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor {
                name: "NAME".into(),
                field_type: FieldType::Character,
                length: 10,
                decimals: 0,
            },
            FieldDescriptor {
                name: "AGE".into(),
                field_type: FieldType::Numeric,
                length: 3,
                decimals: 0,
            },
            FieldDescriptor {
                name: "ACTIVE".into(),
                field_type: FieldType::Logical,
                length: 1,
                decimals: 0,
            },
        ]
    }

    #[test]
    fn test_create_append_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.dbf");

        let mut engine = RecordEngine::create(&path, sample_fields(), CreateOptions::default()).unwrap();
        engine
            .append(&[
                ("NAME".into(), Value::Character("Alice".into())),
                ("AGE".into(), Value::Numeric(30.0)),
                ("ACTIVE".into(), Value::Logical(Logical::True)),
            ])
            .unwrap();
        engine.close().unwrap();

        let reopened = RecordEngine::open(&path, AccessMode::ReadOnly).unwrap();
        assert_eq!(reopened.record_count(), 1);
        let rec = reopened.read(0).unwrap();
        assert!(!rec.deleted);
        assert_eq!(rec.get("NAME"), Some(&Value::Character("Alice".into())));
        assert_eq!(rec.get("AGE"), Some(&Value::Numeric(30.0)));
        assert_eq!(rec.get("ACTIVE"), Some(&Value::Logical(Logical::True)));
    }

    #[test]
    fn test_delete_and_pack() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.dbf");
        let packed_path = dir.path().join("t_packed.dbf");

        let mut engine = RecordEngine::create(&path, sample_fields(), CreateOptions::default()).unwrap();
        engine.header.language_driver = 0x4D;
        engine.write_header().unwrap();
        for name in ["R0", "R1", "R2"] {
            engine
                .append(&[("NAME".into(), Value::Character(name.into()))])
                .unwrap();
        }
        engine.mark_deleted(1).unwrap();

        let packed = engine.pack(&packed_path).unwrap();
        assert_eq!(packed.record_count(), 2);
        assert_eq!(packed.read(0).unwrap().get("NAME"), Some(&Value::Character("R0".into())));
        assert_eq!(packed.read(1).unwrap().get("NAME"), Some(&Value::Character("R2".into())));
        assert_eq!(packed.header().version, engine.header().version);
        assert_eq!(packed.header().language_driver, 0x4D);
    }

    #[test]
    fn test_read_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.dbf");
        let engine = RecordEngine::create(&path, sample_fields(), CreateOptions::default()).unwrap();
        assert!(matches!(engine.read(0), Err(Error::IndexOutOfRange { .. })));
    }

    #[test]
    fn test_create_zero_fields_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.dbf");
        let result = RecordEngine::create(&path, vec![], CreateOptions::default());
        assert!(matches!(result, Err(Error::InvalidFieldDescriptor(_))));
    }

    #[test]
    fn test_create_rejects_mismatched_fixed_width_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad_width.dbf");
        let fields = vec![crate::header::FieldDescriptor {
            name: "WHEN".into(),
            field_type: FieldType::Integer,
            length: 10,
            decimals: 0,
        }];
        let result = RecordEngine::create(&path, fields, CreateOptions::default());
        assert!(matches!(result, Err(Error::InvalidFieldDescriptor(_))));
    }

    #[test]
    fn test_readonly_engine_rejects_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ro.dbf");
        RecordEngine::create(&path, sample_fields(), CreateOptions::default())
            .unwrap()
            .close()
            .unwrap();

        let mut engine = RecordEngine::open(&path, AccessMode::ReadOnly).unwrap();
        let result = engine.append(&[("NAME".into(), Value::Character("X".into()))]);
        assert!(matches!(result, Err(Error::NotWritable)));
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("txn.dbf");
        let mut engine = RecordEngine::create(&path, sample_fields(), CreateOptions::default()).unwrap();
        engine
            .append(&[("NAME".into(), Value::Character("Existing".into()))])
            .unwrap();

        let before = std::fs::read(&path).unwrap();

        let result: Result<()> = engine.with_transaction(|e| {
            e.append(&[("NAME".into(), Value::Character("Ghost".into()))])?;
            Err(Error::NotWritable)
        });

        assert!(matches!(result, Err(Error::TransactionRolledBack(_))));
        assert_eq!(engine.record_count(), 1);
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_stream_skips_deleted_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.dbf");
        let mut engine = RecordEngine::create(&path, sample_fields(), CreateOptions::default()).unwrap();
        for name in ["A", "B", "C"] {
            engine
                .append(&[("NAME".into(), Value::Character(name.into()))])
                .unwrap();
        }
        engine.mark_deleted(1).unwrap();

        let names: Vec<String> = engine
            .stream(StreamOptions::default())
            .map(|r| match r.unwrap().get("NAME").unwrap() {
                Value::Character(s) => s.clone(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(names, vec!["A", "C"]);
    }
}
