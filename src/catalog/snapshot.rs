// MV Catalog Snapshot
//
// An immutable, versioned view of the base tables and materialized views.
// A compilation holds one snapshot for its whole rewrite pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::table::BaseTable;
use super::view::MaterializedView;

#[derive(Debug, Clone, Default)]
pub struct MvCatalogSnapshot {
    version: u64,
    tables: BTreeMap<String, BaseTable>,
    views: BTreeMap<String, Arc<MaterializedView>>,
}

impl MvCatalogSnapshot {
    /// An empty snapshot at version 0
    pub fn empty() -> Self {
        Self::default()
    }

    /// Publication counter; higher means newer
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn table(&self, name: &str) -> Option<&BaseTable> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &BaseTable> {
        self.tables.values()
    }

    pub fn view(&self, name: &str) -> Option<&Arc<MaterializedView>> {
        self.views.get(name)
    }

    /// Views in name order
    pub fn views(&self) -> impl Iterator<Item = &Arc<MaterializedView>> {
        self.views.values()
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub(crate) fn tables_mut(&mut self) -> &mut BTreeMap<String, BaseTable> {
        &mut self.tables
    }

    pub(crate) fn views_mut(&mut self) -> &mut BTreeMap<String, Arc<MaterializedView>> {
        &mut self.views
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }
}
