//! Coordinator (C5): binds a record engine to a memo store and translates
//! between user-facing text and memo-block references transparently.

use std::path::Path;

use crate::error::Result;
use crate::field::{FieldType, MemoRef, Value};
use crate::memo::MemoStore;
use crate::record::{Record, RecordEngine};
use crate::txn;

/// Binds a [`RecordEngine`] and a [`MemoStore`], resolving memo fields
/// transparently at the API boundary.
pub struct Coordinator {
    records: RecordEngine,
    memos: MemoStore,
}

impl Coordinator {
    pub fn new(records: RecordEngine, memos: MemoStore) -> Coordinator {
        Coordinator { records, memos }
    }

    pub fn close(self) -> Result<()> {
        self.records.close()?;
        self.memos.close()
    }

    pub fn records(&self) -> &RecordEngine {
        &self.records
    }

    pub fn memos(&self) -> &MemoStore {
        &self.memos
    }

    fn memo_field_names(&self) -> Vec<String> {
        self.records
            .fields()
            .iter()
            .filter(|f| f.field_type == FieldType::Memo)
            .map(|f| f.name.clone())
            .collect()
    }

    /// Resolve a record's memo fields from references to text payloads.
    fn resolve(&self, mut rec: Record) -> Result<Record> {
        for (name, value) in rec.values.iter_mut() {
            if self.memo_field_names().iter().any(|n| n == name) {
                if let Value::Memo(memo_ref) = value {
                    let text = if memo_ref.is_empty() {
                        String::new()
                    } else {
                        self.memos.read(memo_ref.0)?
                    };
                    *value = Value::Character(text);
                }
            }
        }
        Ok(rec)
    }

    /// Convert caller-supplied text for memo fields into memo-block
    /// references, writing the payload to the memo store as needed.
    fn materialize_memos(
        &mut self,
        values: &[(String, Value)],
        existing: Option<&Record>,
    ) -> Result<Vec<(String, Value)>> {
        let memo_names = self.memo_field_names();
        let mut out = Vec::with_capacity(values.len());

        for (name, value) in values {
            if memo_names.iter().any(|n| n == name) {
                match value {
                    Value::Character(text) => {
                        let existing_ref = existing
                            .and_then(|r| r.get(name))
                            .and_then(|v| match v {
                                Value::Memo(m) => Some(*m),
                                _ => None,
                            })
                            .unwrap_or(MemoRef::EMPTY);

                        let new_ref = if text.is_empty() {
                            MemoRef::EMPTY
                        } else if existing_ref.is_empty() {
                            MemoRef(self.memos.write(text)?)
                        } else {
                            MemoRef(self.memos.update(existing_ref.0, text)?)
                        };
                        out.push((name.clone(), Value::Memo(new_ref)));
                    }
                    Value::Memo(_) => out.push((name.clone(), value.clone())),
                    other => out.push((name.clone(), other.clone())),
                }
            } else {
                out.push((name.clone(), value.clone()));
            }
        }

        Ok(out)
    }

    pub fn append(&mut self, values: &[(String, Value)]) -> Result<u32> {
        let materialized = self.materialize_memos(values, None)?;
        self.records.append(&materialized)
    }

    pub fn update(&mut self, index: u32, partial_values: &[(String, Value)]) -> Result<()> {
        let existing = self.records.read(index)?;
        let materialized = self.materialize_memos(partial_values, Some(&existing))?;
        self.records.update(index, &materialized)
    }

    /// Read a record with its memo fields resolved to text.
    pub fn read(&self, index: u32) -> Result<Record> {
        let rec = self.records.read(index)?;
        self.resolve(rec)
    }

    pub fn read_all(&self, include_deleted: bool) -> Result<Vec<Record>> {
        self.records
            .read_all(include_deleted)?
            .into_iter()
            .map(|r| self.resolve(r))
            .collect()
    }

    pub fn with_transaction<T>(&mut self, f: impl FnOnce(&mut Coordinator) -> Result<T>) -> Result<T> {
        let record_path = self.records.path().to_path_buf();
        let memo_path = self.memos.path().to_path_buf();

        txn::with_transaction2(&record_path, &memo_path, move || f(self))
    }

    /// Run the memo store's `compact`, then rewrite every live record's memo
    /// references to point at the relocated runs, in one operation.
    pub fn compact_memos(&mut self, memo_output_path: impl AsRef<Path>) -> Result<()> {
        let memo_names = self.memo_field_names();
        let live = self.records.read_all(false)?;

        let mut live_refs = Vec::new();
        for rec in &live {
            for name in &memo_names {
                if let Some(Value::Memo(m)) = rec.get(name) {
                    if !m.is_empty() {
                        live_refs.push(m.0);
                    }
                }
            }
        }

        let (new_store, mapping) = self.memos.compact(memo_output_path, &live_refs)?;

        for rec in &live {
            let mut updates = Vec::new();
            for name in &memo_names {
                if let Some(Value::Memo(m)) = rec.get(name) {
                    if let Some(&new_block) = mapping.get(&m.0) {
                        updates.push((name.clone(), Value::Memo(MemoRef(new_block))));
                    }
                }
            }
            if !updates.is_empty() {
                self.records.update(rec.index, &updates)?;
            }
        }

        self.memos = new_store;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::field::FieldType;
    use crate::header::FieldDescriptor;
    use crate::record::{AccessMode, CreateOptions};

    fn build_coordinator(dir: &Path) -> Coordinator {
        let fields = vec![
            FieldDescriptor {
                name: "TITLE".into(),
                field_type: FieldType::Character,
                length: 20,
                decimals: 0,
            },
            FieldDescriptor {
                name: "BODY".into(),
                field_type: FieldType::Memo,
                length: 10,
                decimals: 0,
            },
        ];
        let records = RecordEngine::create(dir.join("m.dbf"), fields, CreateOptions::default()).unwrap();
        let memos = MemoStore::create(dir.join("m.dbt"), 512).unwrap();
        Coordinator::new(records, memos)
    }

    #[test]
    fn test_memo_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = build_coordinator(dir.path());

        let body = "x".repeat(1200);
        coordinator
            .append(&[
                ("TITLE".into(), Value::Character("T".into())),
                ("BODY".into(), Value::Character(body.clone())),
            ])
            .unwrap();

        let rec = coordinator.read(0).unwrap();
        assert_eq!(rec.get("BODY"), Some(&Value::Character(body)));
    }

    #[test]
    fn test_memo_update_grows() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = build_coordinator(dir.path());

        coordinator
            .append(&[
                ("TITLE".into(), Value::Character("T".into())),
                ("BODY".into(), Value::Character("x".repeat(1200))),
            ])
            .unwrap();

        let bigger = "y".repeat(3000);
        coordinator
            .update(0, &[("BODY".into(), Value::Character(bigger.clone()))])
            .unwrap();

        let rec = coordinator.read(0).unwrap();
        assert_eq!(rec.get("BODY"), Some(&Value::Character(bigger)));
    }

    #[test]
    fn test_coordinator_transaction_rolls_back_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = build_coordinator(dir.path());
        coordinator
            .append(&[
                ("TITLE".into(), Value::Character("T".into())),
                ("BODY".into(), Value::Character("hello".into())),
            ])
            .unwrap();

        let records_before = std::fs::read(coordinator.records().path()).unwrap();
        let memos_before = std::fs::read(coordinator.memos().path()).unwrap();

        let result: Result<()> = coordinator.with_transaction(|c| {
            c.append(&[
                ("TITLE".into(), Value::Character("Ghost".into())),
                ("BODY".into(), Value::Character("z".repeat(2000))),
            ])?;
            Err(crate::error::Error::NotWritable)
        });

        assert!(result.is_err());
        assert_eq!(std::fs::read(coordinator.records().path()).unwrap(), records_before);
        assert_eq!(std::fs::read(coordinator.memos().path()).unwrap(), memos_before);
    }
}
