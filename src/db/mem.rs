//! In-memory reference engine.
//!
//! [`MemDb`] implements the [`Database`] savepoint contract over a `BTreeMap`
//! plus a stack of per-savepoint write buffers. Reads materialize the current
//! view (committed state with every staged buffer applied in order), which
//! keeps the engine obviously correct at the cost of copying; it is intended
//! for tests and local development, not production data volumes.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Mutex;
use std::time::SystemTime;

use super::Database;
use crate::error::StoreError;

#[derive(Clone, Debug)]
enum WriteOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
    DeleteAll,
    WriteAlarm(Option<SystemTime>),
}

struct Savepoint {
    name: String,
    ops: Vec<WriteOp>,
}

struct MemDbInner {
    committed: BTreeMap<Vec<u8>, Vec<u8>>,
    alarm: Option<SystemTime>,
    stack: Vec<Savepoint>,
}

impl MemDbInner {
    /// Materializes committed state plus every staged buffer, bottom-up.
    fn view(&self) -> (BTreeMap<Vec<u8>, Vec<u8>>, Option<SystemTime>) {
        let mut map = self.committed.clone();
        let mut alarm = self.alarm;
        for sp in &self.stack {
            apply_ops(&mut map, &mut alarm, &sp.ops);
        }
        (map, alarm)
    }

    /// Index of the named savepoint, searching from the innermost out.
    fn find(&self, name: &str) -> Result<usize, StoreError> {
        self.stack
            .iter()
            .rposition(|sp| sp.name == name)
            .ok_or_else(|| StoreError::UnknownSavepoint {
                name: name.to_string(),
            })
    }

    /// Stages an op under the innermost savepoint, or applies it directly
    /// when no transaction is open (autocommit).
    fn stage(&mut self, op: WriteOp) {
        match self.stack.last_mut() {
            Some(sp) => sp.ops.push(op),
            None => {
                let (committed, alarm) = (&mut self.committed, &mut self.alarm);
                apply_ops(committed, alarm, std::slice::from_ref(&op));
            }
        }
    }
}

fn apply_ops(
    map: &mut BTreeMap<Vec<u8>, Vec<u8>>,
    alarm: &mut Option<SystemTime>,
    ops: &[WriteOp],
) {
    for op in ops {
        match op {
            WriteOp::Put(k, v) => {
                map.insert(k.clone(), v.clone());
            }
            WriteOp::Delete(k) => {
                map.remove(k);
            }
            WriteOp::DeleteAll => map.clear(),
            WriteOp::WriteAlarm(t) => *alarm = *t,
        }
    }
}

/// In-memory [`Database`] with full savepoint support.
pub struct MemDb {
    inner: Mutex<MemDbInner>,
}

impl MemDb {
    /// Creates an empty engine with no alarm set.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemDbInner {
                committed: BTreeMap::new(),
                alarm: None,
                stack: Vec::new(),
            }),
        }
    }

    /// True while the named savepoint is open. Useful for asserting that a
    /// commit has not yet happened when an external call observes the store.
    pub fn has_savepoint(&self, name: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .stack
            .iter()
            .any(|sp| sp.name == name)
    }

    /// The alarm value in committed storage, ignoring staged writes.
    pub fn committed_alarm(&self) -> Option<SystemTime> {
        self.inner.lock().unwrap().alarm
    }

    /// Number of keys in committed storage, ignoring staged writes.
    pub fn committed_len(&self) -> usize {
        self.inner.lock().unwrap().committed.len()
    }
}

impl Default for MemDb {
    fn default() -> Self {
        Self::new()
    }
}

impl Database for MemDb {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let (view, _) = inner.view();
        Ok(view.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.stage(WriteOp::Put(key.to_vec(), value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let existed = inner.view().0.contains_key(key);
        inner.stage(WriteOp::Delete(key.to_vec()));
        Ok(existed)
    }

    fn delete_all(&self) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let count = inner.view().0.len();
        inner.stage(WriteOp::DeleteAll);
        Ok(count)
    }

    fn list(
        &self,
        begin: &[u8],
        end: Option<&[u8]>,
        limit: Option<usize>,
        reverse: bool,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let (view, _) = inner.view();
        let upper = match end {
            Some(e) => Bound::Excluded(e.to_vec()),
            None => Bound::Unbounded,
        };
        let range = view.range((Bound::Included(begin.to_vec()), upper));
        let take = limit.unwrap_or(usize::MAX);
        let rows: Vec<(Vec<u8>, Vec<u8>)> = if reverse {
            range
                .rev()
                .take(take)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        } else {
            range
                .take(take)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        Ok(rows)
    }

    fn read_alarm(&self) -> Result<Option<SystemTime>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.view().1)
    }

    fn write_alarm(&self, time: Option<SystemTime>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.stage(WriteOp::WriteAlarm(time));
        Ok(())
    }

    fn savepoint(&self, name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.stack.push(Savepoint {
            name: name.to_string(),
            ops: Vec::new(),
        });
        Ok(())
    }

    fn release(&self, name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let idx = inner.find(name)?;
        // Releasing merges this savepoint and everything nested inside it.
        let merged: Vec<WriteOp> = inner
            .stack
            .drain(idx..)
            .flat_map(|sp| sp.ops.into_iter())
            .collect();
        match inner.stack.last_mut() {
            Some(parent) => parent.ops.extend(merged),
            None => {
                let inner = &mut *inner;
                apply_ops(&mut inner.committed, &mut inner.alarm, &merged);
            }
        }
        Ok(())
    }

    fn rollback_to(&self, name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let idx = inner.find(name)?;
        inner.stack.truncate(idx + 1);
        inner.stack[idx].ops.clear();
        Ok(())
    }
}
