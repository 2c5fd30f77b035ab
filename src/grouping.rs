use std::collections::BTreeMap;

use crate::catalog::CatalogRow;
use crate::domain::GroupKey;

/// Partitions rows by (model, experiment). Keys iterate in sorted order and
/// rows keep the order in which they were encountered.
pub fn group_rows(rows: Vec<CatalogRow>) -> BTreeMap<GroupKey, Vec<CatalogRow>> {
    let mut groups = BTreeMap::<GroupKey, Vec<CatalogRow>>::new();
    for row in rows {
        groups
            .entry(GroupKey::new(row.model.as_str(), row.experiment.as_str()))
            .or_default()
            .push(row);
    }
    groups
}

/// Experiments available per model.
pub fn models_of(
    groups: &BTreeMap<GroupKey, Vec<CatalogRow>>,
) -> BTreeMap<&str, Vec<&str>> {
    let mut models = BTreeMap::<&str, Vec<&str>>::new();
    for key in groups.keys() {
        models
            .entry(key.model.as_str())
            .or_default()
            .push(key.experiment.as_str());
    }
    models
}
