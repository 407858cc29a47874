//! Transaction id allocation.
//!
//! Every transaction gets a fresh id and a start timestamp. The timestamp is
//! the transaction's logical "now": audit entries and `updated_at` stamps
//! written anywhere inside the transaction all carry the same instant.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use keel_result::{Error, Result};
use keel_types::TxnId;
use time::OffsetDateTime;

/// First id handed out by a fresh manager.
const TXN_ID_FIRST: TxnId = 1;

/// Reserved; never handed out.
const TXN_ID_LAST: TxnId = TxnId::MAX;

/// Identity and start instant of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionSnapshot {
    pub txn_id: TxnId,
    pub started_at: OffsetDateTime,
}

/// Hands out transaction ids. Clones share one counter.
///
/// Commit and rollback state lives with the transaction itself; the manager
/// only guarantees ids are unique and increasing.
#[derive(Clone, Debug)]
pub struct TxnIdManager {
    next_txn_id: Arc<AtomicU64>,
}

impl TxnIdManager {
    pub fn new() -> Self {
        Self {
            next_txn_id: Arc::new(AtomicU64::new(TXN_ID_FIRST)),
        }
    }

    /// Begin a new transaction stamped with the current wall-clock time.
    pub fn begin_transaction(&self) -> Result<TransactionSnapshot> {
        self.begin_transaction_at(OffsetDateTime::now_utc())
    }

    /// Begin a new transaction with an explicit logical start instant.
    pub fn begin_transaction_at(&self, started_at: OffsetDateTime) -> Result<TransactionSnapshot> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        if txn_id == TXN_ID_LAST {
            return Err(Error::Internal("transaction id space exhausted".into()));
        }
        tracing::trace!("[TXN] begin txn={} started_at={}", txn_id, started_at);
        Ok(TransactionSnapshot { txn_id, started_at })
    }
}

impl Default for TxnIdManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn ids_are_monotonic_from_one() {
        let manager = TxnIdManager::new();
        let a = manager.begin_transaction().expect("begin");
        let b = manager.clone().begin_transaction().expect("begin");
        assert_eq!(a.txn_id, TXN_ID_FIRST);
        assert!(b.txn_id > a.txn_id);
    }

    #[test]
    fn explicit_start_instant_is_kept() {
        let manager = TxnIdManager::new();
        let t = manager
            .begin_transaction_at(datetime!(2024-01-01 0:00 UTC))
            .expect("begin");
        assert_eq!(t.started_at, datetime!(2024-01-01 0:00 UTC));
    }
}
