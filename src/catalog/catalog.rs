use std::collections::BTreeMap;
use std::sync::Arc;

use log::{info, warn};
use parking_lot::{Mutex, RwLock};

use super::snapshot::MvCatalogSnapshot;
use super::table::BaseTable;
use super::versions::PartitionVersionOracle;
use super::view::MaterializedView;
use crate::common::{CatalogError, PartitionId, Version};
use crate::query::planner::logical::OperatorNode;

/// Publisher of catalog snapshots.
///
/// Readers take an `Arc` to the current snapshot and keep it for as long as
/// they like. Every mutation builds a new snapshot from a copy of the current
/// one and swaps it in; snapshots already handed out never change.
#[derive(Debug, Default)]
pub struct MvCatalog {
    current: RwLock<Arc<MvCatalogSnapshot>>,
    /// Serializes writers so concurrent mutations never lose an update
    writer: Mutex<()>,
}

impl MvCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently published snapshot
    pub fn snapshot(&self) -> Arc<MvCatalogSnapshot> {
        self.current.read().clone()
    }

    fn mutate<T, F>(&self, what: &str, edit: F) -> Result<T, CatalogError>
    where
        F: FnOnce(&mut MvCatalogSnapshot) -> Result<T, CatalogError>,
    {
        let _writer = self.writer.lock();
        let mut next = MvCatalogSnapshot::clone(&self.current.read());
        let out = edit(&mut next)?;
        next.bump_version();
        let version = next.version();
        *self.current.write() = Arc::new(next);
        info!("Published catalog snapshot {} ({})", version, what);
        Ok(out)
    }

    pub fn register_table(&self, table: BaseTable) -> Result<(), CatalogError> {
        let name = table.name().to_string();
        self.mutate(&format!("register table {}", name), |snap| {
            if snap.table(&name).is_some() {
                return Err(CatalogError::TableAlreadyExists(name.clone()));
            }
            snap.tables_mut().insert(name.clone(), table);
            Ok(())
        })
    }

    /// Adds a partition to a base table; views registered earlier do not cover it
    pub fn add_partition(&self, table: &str, partition: &str) -> Result<PartitionId, CatalogError> {
        let id = PartitionId::new(table, partition);
        self.mutate(&format!("add partition {}", id), |snap| {
            let base = snap
                .tables_mut()
                .get_mut(table)
                .ok_or_else(|| CatalogError::TableNotFound(table.to_string()))?;
            if !base.add_partition(id.clone()) {
                return Err(CatalogError::PartitionAlreadyExists(id.clone()));
            }
            Ok(id.clone())
        })
    }

    /// Registers a view, capturing the current version of every partition it reads
    pub fn register_view(
        &self,
        name: &str,
        definition: OperatorNode,
        oracle: &dyn PartitionVersionOracle,
    ) -> Result<Arc<MaterializedView>, CatalogError> {
        let view = MaterializedView::new(name, definition)?;
        self.mutate(&format!("register view {}", name), |snap| {
            if snap.view(name).is_some() {
                return Err(CatalogError::ViewAlreadyExists(name.to_string()));
            }
            let captured = capture(snap, &view, oracle)?;
            let view = Arc::new(view.with_captured(captured));
            snap.views_mut().insert(name.to_string(), view.clone());
            Ok(view)
        })
    }

    /// Re-captures a view's partition versions after an external refresh
    pub fn refresh_view(
        &self,
        name: &str,
        oracle: &dyn PartitionVersionOracle,
    ) -> Result<Arc<MaterializedView>, CatalogError> {
        self.mutate(&format!("refresh view {}", name), |snap| {
            let view = snap
                .view(name)
                .cloned()
                .ok_or_else(|| CatalogError::ViewNotFound(name.to_string()))?;
            let captured = capture(snap, &view, oracle)?;
            let view = Arc::new(view.with_captured(captured));
            snap.views_mut().insert(name.to_string(), view.clone());
            Ok(view)
        })
    }

    pub fn drop_view(&self, name: &str) -> Result<(), CatalogError> {
        self.mutate(&format!("drop view {}", name), |snap| {
            snap.views_mut()
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| CatalogError::ViewNotFound(name.to_string()))
        })
    }
}

fn capture(
    snap: &MvCatalogSnapshot,
    view: &MaterializedView,
    oracle: &dyn PartitionVersionOracle,
) -> Result<BTreeMap<PartitionId, Version>, CatalogError> {
    let mut captured = BTreeMap::new();
    for table_name in view.base_tables() {
        let table = snap
            .table(table_name)
            .ok_or_else(|| CatalogError::TableNotFound(table_name.clone()))?;
        for partition in table.partitions() {
            let version = oracle.current_version(partition).ok_or_else(|| {
                warn!("No version recorded for partition {}", partition);
                CatalogError::UnknownPartitionVersion(partition.clone())
            })?;
            captured.insert(partition.clone(), version);
        }
    }
    Ok(captured)
}
