//! In-memory task ledger.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use unimgr_core::{TaskId, TenantId};

use super::{TaskLedger, TaskLedgerEntry};
use crate::error::{Error, Result};

/// In-memory task ledger; entries are kept in append order.
#[derive(Debug, Default)]
pub struct InMemoryTaskLedger {
    entries: RwLock<Vec<TaskLedgerEntry>>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl InMemoryTaskLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskLedger for InMemoryTaskLedger {
    async fn append(&self, entry: TaskLedgerEntry) -> Result<()> {
        let mut entries = self.entries.write().map_err(poison_err)?;
        entries.push(entry);
        drop(entries);
        Ok(())
    }

    async fn mark_completed(&self, task_id: &TaskId, at: DateTime<Utc>) -> Result<bool> {
        let mut entries = self.entries.write().map_err(poison_err)?;
        let updated = match entries.iter_mut().find(|e| e.task_id == *task_id) {
            Some(entry) if entry.completed_at.is_none() => {
                entry.completed_at = Some(at);
                true
            }
            _ => false,
        };
        drop(entries);
        Ok(updated)
    }

    async fn get(&self, tenant_id: &TenantId, task_id: &TaskId) -> Result<Option<TaskLedgerEntry>> {
        let result = {
            let entries = self.entries.read().map_err(poison_err)?;
            entries
                .iter()
                .find(|e| e.tenant_id == *tenant_id && e.task_id == *task_id)
                .cloned()
        };
        Ok(result)
    }

    async fn list(
        &self,
        tenant_id: &TenantId,
        target_id: Option<Uuid>,
    ) -> Result<Vec<TaskLedgerEntry>> {
        let result = {
            let entries = self.entries.read().map_err(poison_err)?;
            entries
                .iter()
                .rev()
                .filter(|e| e.tenant_id == *tenant_id)
                .filter(|e| target_id.is_none_or(|t| e.target_id == t))
                .cloned()
                .collect()
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{CustomerTaskKind, TargetType};

    fn entry(tenant: TenantId, target: Uuid) -> TaskLedgerEntry {
        TaskLedgerEntry::new(
            tenant,
            TaskId::generate(),
            TargetType::Universe,
            target,
            CustomerTaskKind::Delete,
            "orders",
        )
    }

    #[tokio::test]
    async fn completion_is_written_once() -> Result<()> {
        let ledger = InMemoryTaskLedger::new();
        let e = entry(TenantId::generate(), Uuid::new_v4());
        ledger.append(e.clone()).await?;

        let first = Utc::now();
        assert!(ledger.mark_completed(&e.task_id, first).await?);
        assert!(!ledger.mark_completed(&e.task_id, Utc::now()).await?);

        let stored = ledger.get(&e.tenant_id, &e.task_id).await?;
        assert_eq!(stored.and_then(|s| s.completed_at), Some(first));
        Ok(())
    }

    #[tokio::test]
    async fn list_is_tenant_scoped_and_newest_first() -> Result<()> {
        let ledger = InMemoryTaskLedger::new();
        let tenant = TenantId::generate();
        let target = Uuid::new_v4();
        let older = entry(tenant, target);
        let newer = entry(tenant, Uuid::new_v4());
        let foreign = entry(TenantId::generate(), target);
        for e in [&older, &newer, &foreign] {
            ledger.append(e.clone()).await?;
        }

        let all: Vec<TaskId> = ledger.list(&tenant, None).await?.into_iter().map(|e| e.task_id).collect();
        assert_eq!(all, vec![newer.task_id, older.task_id]);

        let scoped = ledger.list(&tenant, Some(target)).await?;
        assert_eq!(scoped.len(), 1);
        assert!(ledger.get(&tenant, &foreign.task_id).await?.is_none());
        Ok(())
    }

    #[test]
    fn friendly_title_reflects_completion() {
        let mut e = entry(TenantId::generate(), Uuid::new_v4());
        assert_eq!(e.friendly_title(), "Deleting Universe orders");
        e.completed_at = Some(Utc::now());
        assert_eq!(e.friendly_title(), "Deleted Universe orders");
    }
}
