use sismo_core::{NormalizedRow, SnapshotRow};
use sismo_storage::{StoreError, TableStore};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceReport {
    pub deleted: usize,
    pub inserted: Vec<SnapshotRow>,
}

/// Full-table replace: delete every stored row, then insert the new batch.
///
/// The two phases are not atomic. A failure after the delete phase leaves the
/// table empty or partially filled, and nothing is rolled back.
pub struct SnapshotReplacer<'a> {
    store: &'a dyn TableStore,
}

impl<'a> SnapshotReplacer<'a> {
    pub fn new(store: &'a dyn TableStore) -> Self {
        Self { store }
    }

    pub async fn replace(&self, rows: Vec<NormalizedRow>) -> Result<ReplaceReport, StoreError> {
        let existing = self.store.scan_all().await?;
        let keys: Vec<String> = existing.into_iter().map(|row| row.record_id).collect();
        let deleted = self.store.delete_batch(&keys).await?;
        info!(scanned = keys.len(), deleted, store = %self.store.describe(), "cleared previous snapshot");

        let mut inserted = Vec::with_capacity(rows.len());
        for (idx, row) in rows.into_iter().enumerate() {
            let row = SnapshotRow::assign(row, idx + 1);
            self.store.put(&row).await?;
            debug!(record_id = %row.record_id, sequence_number = %row.sequence_number, "inserted row");
            inserted.push(row);
        }
        info!(inserted = inserted.len(), "stored new snapshot");

        Ok(ReplaceReport { deleted, inserted })
    }
}
