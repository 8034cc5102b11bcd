// Freshness Validator
//
// A view may only answer a query if it has seen every committed change to
// the partitions the query would read. Partition versions are the only
// staleness signal; statistics never make a view stale.

use std::collections::BTreeSet;

use log::warn;
use serde::Serialize;

use crate::catalog::snapshot::MvCatalogSnapshot;
use crate::catalog::versions::PartitionVersionOracle;
use crate::catalog::view::MaterializedView;
use crate::common::{PartitionId, RewriteError, Version};

/// Outcome of comparing captured and current partition versions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Freshness {
    Fresh,
    /// Some partitions lag, none by more than the configured tolerance
    WithinTolerance { max_lag: u64 },
    /// `captured` is `None` when the view never covered the partition
    Stale {
        partition: PartitionId,
        captured: Option<Version>,
        current: Version,
    },
}

/// Checks `view` against every partition of `tables`.
///
/// Tables are visited in name order and partitions in table order, so the
/// first stale partition reported is deterministic.
pub fn check_freshness(
    view: &MaterializedView,
    tables: &BTreeSet<String>,
    snapshot: &MvCatalogSnapshot,
    oracle: &dyn PartitionVersionOracle,
    tolerance: Option<u64>,
) -> Result<Freshness, RewriteError> {
    for partition in view.captured().keys() {
        let owned = view.base_tables().contains(&partition.table)
            && snapshot
                .table(&partition.table)
                .is_some_and(|t| t.has_partition(partition));
        if !owned {
            warn!("View {} captured unknown partition {}", view.name(), partition);
            return Err(RewriteError::CorruptCapture {
                view: view.name().to_string(),
                partition: partition.clone(),
            });
        }
    }

    let mut max_lag = 0;
    for table_name in tables {
        let table = snapshot.table(table_name).ok_or_else(|| {
            warn!("Table {} is not in catalog snapshot {}", table_name, snapshot.version());
            RewriteError::UnknownTable(table_name.clone())
        })?;
        for partition in table.partitions() {
            let current = oracle.current_version(partition).ok_or_else(|| {
                warn!("No current version for partition {}", partition);
                RewriteError::MissingPartition {
                    table: table_name.clone(),
                    partition: partition.clone(),
                }
            })?;
            let captured = view.captured_version(partition);
            let lag = match captured {
                Some(captured) if current <= captured => continue,
                Some(captured) => current - captured,
                // never covered: no tolerance applies
                None => {
                    return Ok(Freshness::Stale {
                        partition: partition.clone(),
                        captured,
                        current,
                    });
                }
            };
            if tolerance.is_some_and(|t| lag <= t) {
                max_lag = max_lag.max(lag);
            } else {
                return Ok(Freshness::Stale {
                    partition: partition.clone(),
                    captured,
                    current,
                });
            }
        }
    }

    Ok(if max_lag == 0 {
        Freshness::Fresh
    } else {
        Freshness::WithinTolerance { max_lag }
    })
}
