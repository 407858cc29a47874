//! Row-level locks.

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use keel_result::{Error, Result};
use keel_types::{RowId, TxnId};
use rustc_hash::{FxHashMap, FxHashSet};

/// Row lock strength, weakest first.
///
/// | held \ requested | KeyShare | Share | NoKeyExclusive | Exclusive |
/// |------------------|:-------:|:-----:|:--------------:|:---------:|
/// | KeyShare         |         |       |                |     X     |
/// | Share            |         |       |       X        |     X     |
/// | NoKeyExclusive   |         |   X   |       X        |     X     |
/// | Exclusive        |    X    |   X   |       X        |     X     |
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockMode {
    /// Taken while checking that a referenced key exists. Only blocks deletes
    /// and key changes.
    KeyShare,
    /// Taken while checking that no row still references a key. Blocks every
    /// update.
    Share,
    /// Taken by updates that leave key columns alone.
    NoKeyExclusive,
    /// Taken by deletes and key-column updates.
    Exclusive,
}

impl LockMode {
    pub const ALL: [LockMode; 4] = [
        LockMode::KeyShare,
        LockMode::Share,
        LockMode::NoKeyExclusive,
        LockMode::Exclusive,
    ];

    /// Whether two different transactions may hold `self` and `other` on the
    /// same row at once.
    pub fn conflicts_with(self, other: LockMode) -> bool {
        use LockMode::*;
        match (self, other) {
            (Exclusive, _) | (_, Exclusive) => true,
            (NoKeyExclusive, NoKeyExclusive) => true,
            (NoKeyExclusive, Share) | (Share, NoKeyExclusive) => true,
            _ => false,
        }
    }

    /// True when holding `self` blocks every request `other` would block.
    pub fn covers(self, other: LockMode) -> bool {
        LockMode::ALL
            .iter()
            .all(|m| !other.conflicts_with(*m) || self.conflicts_with(*m))
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LockMode::KeyShare => "FOR KEY SHARE",
            LockMode::Share => "FOR SHARE",
            LockMode::NoKeyExclusive => "FOR NO KEY UPDATE",
            LockMode::Exclusive => "FOR UPDATE",
        };
        f.write_str(s)
    }
}

type LockKey = (String, RowId);

#[derive(Debug, Default)]
struct LockTable {
    holders: FxHashMap<LockKey, Vec<(TxnId, LockMode)>>,
    by_txn: FxHashMap<TxnId, FxHashSet<LockKey>>,
}

impl LockTable {
    fn blocker(&self, key: &LockKey, txn: TxnId, mode: LockMode) -> Option<(TxnId, LockMode)> {
        self.holders.get(key).and_then(|held| {
            held.iter()
                .find(|(holder, held_mode)| *holder != txn && mode.conflicts_with(*held_mode))
                .copied()
        })
    }

    fn grant(&mut self, key: LockKey, txn: TxnId, mode: LockMode) {
        let held = self.holders.entry(key.clone()).or_default();
        let already = held
            .iter()
            .any(|(holder, held_mode)| *holder == txn && held_mode.covers(mode));
        if !already {
            held.push((txn, mode));
        }
        self.by_txn.entry(txn).or_default().insert(key);
    }
}

/// Blocking row lock table shared by every transaction of an engine.
#[derive(Debug, Default)]
pub struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> Result<MutexGuard<'_, LockTable>> {
        self.table
            .lock()
            .map_err(|_| Error::Internal("lock table mutex poisoned".into()))
    }

    /// Acquire `mode` on `(table, row_id)` for `txn`, waiting at most `timeout`.
    ///
    /// Re-acquiring a mode the transaction already covers is a no-op. A
    /// transaction never waits on itself.
    pub fn acquire(
        &self,
        txn: TxnId,
        table: &str,
        row_id: RowId,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<()> {
        let key: LockKey = (table.to_string(), row_id);
        let start = Instant::now();
        let deadline = start + timeout;
        let mut guard = self.guard()?;
        loop {
            let Some((holder, held_mode)) = guard.blocker(&key, txn, mode) else {
                guard.grant(key, txn, mode);
                tracing::trace!(
                    "[LOCK] granted txn={} table={} row={} mode={:?}",
                    txn,
                    table,
                    row_id,
                    mode
                );
                return Ok(());
            };
            let now = Instant::now();
            if now >= deadline {
                let waited_ms = now.duration_since(start).as_millis() as u64;
                tracing::warn!(
                    "[LOCK] timeout txn={} table={} row={} mode={:?} holder={} held={:?} waited_ms={}",
                    txn,
                    table,
                    row_id,
                    mode,
                    holder,
                    held_mode,
                    waited_ms
                );
                return Err(Error::LockTimeout {
                    table: table.to_string(),
                    row_id,
                    waited_ms,
                });
            }
            tracing::trace!(
                "[LOCK] wait txn={} table={} row={} mode={:?} holder={} held={:?}",
                txn,
                table,
                row_id,
                mode,
                holder,
                held_mode
            );
            let (next, _) = self
                .released
                .wait_timeout(guard, deadline - now)
                .map_err(|_| Error::Internal("lock table mutex poisoned".into()))?;
            guard = next;
        }
    }

    /// Release every lock held by `txn` and wake waiters.
    pub fn release_all(&self, txn: TxnId) -> Result<usize> {
        let mut guard = self.guard()?;
        let keys = guard.by_txn.remove(&txn).unwrap_or_default();
        let count = keys.len();
        for key in keys {
            if let Some(held) = guard.holders.get_mut(&key) {
                held.retain(|(holder, _)| *holder != txn);
                if held.is_empty() {
                    guard.holders.remove(&key);
                }
            }
        }
        drop(guard);
        if count > 0 {
            self.released.notify_all();
        }
        tracing::trace!("[LOCK] release txn={} rows={}", txn, count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LockMode::*;

    #[test]
    fn conflict_matrix() {
        let expected = [
            (KeyShare, [false, false, false, true]),
            (Share, [false, false, true, true]),
            (NoKeyExclusive, [false, true, true, true]),
            (Exclusive, [true, true, true, true]),
        ];
        for (held, row) in expected {
            for (requested, conflicts) in LockMode::ALL.iter().zip(row) {
                assert_eq!(
                    held.conflicts_with(*requested),
                    conflicts,
                    "held {:?} requested {:?}",
                    held,
                    requested
                );
            }
        }
    }

    #[test]
    fn coverage() {
        assert!(Exclusive.covers(KeyShare));
        assert!(NoKeyExclusive.covers(Share));
        assert!(!Share.covers(NoKeyExclusive));
        assert!(!KeyShare.covers(Share));
        assert!(Share.covers(Share));
    }

    #[test]
    fn same_transaction_never_blocks_itself() {
        let locks = LockManager::new();
        let t = Duration::from_millis(10);
        locks.acquire(1, "t", 0, Share, t).expect("share");
        locks.acquire(1, "t", 0, Exclusive, t).expect("upgrade");
        assert!(matches!(
            locks.acquire(2, "t", 0, KeyShare, t),
            Err(Error::LockTimeout { .. })
        ));
        assert_eq!(locks.release_all(1).expect("release"), 1);
        locks.acquire(2, "t", 0, KeyShare, t).expect("after release");
    }
}
