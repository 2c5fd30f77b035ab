use std::fmt;
use std::sync::Arc;

use crate::catalog::CatalogRow;
use crate::domain::GroupKey;
use crate::error::ClimError;
use crate::lazy::LazyDataset;
use crate::zarr::DatasetStore;

type Task<T> = Box<dyn FnOnce() -> Result<T, ClimError> + Send>;

/// A computation described up front and run later by the executor.
/// Building one performs no work.
pub struct Deferred<T> {
    label: String,
    task: Task<T>,
}

impl<T> Deferred<T> {
    pub fn new(
        label: impl Into<String>,
        task: impl FnOnce() -> Result<T, ClimError> + Send + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            task: Box::new(task),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn force(self) -> Result<T, ClimError> {
        (self.task)()
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").field("label", &self.label).finish()
    }
}

#[derive(Clone)]
pub struct LazyDatasetLoader<S: DatasetStore> {
    store: Arc<S>,
}

impl<S: DatasetStore + 'static> LazyDatasetLoader<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn deferred_open(&self, key: GroupKey, rows: Vec<CatalogRow>) -> Deferred<LazyDataset> {
        let store = Arc::clone(&self.store);
        Deferred::new(format!("open {key}"), move || {
            open_group(store.as_ref(), &key, &rows)
        })
    }
}

/// Opens the single dataset of a group, normalizes its time axis and drops
/// bounds variables. Data variables are not read.
pub fn open_group<S: DatasetStore + ?Sized>(
    store: &S,
    key: &GroupKey,
    rows: &[CatalogRow],
) -> Result<LazyDataset, ClimError> {
    let [row] = rows else {
        return Err(ClimError::MultipleMatch {
            group: key.clone(),
            count: rows.len(),
        });
    };
    let open_error = |message: String| ClimError::DatasetOpen {
        locator: row.locator.clone(),
        group: key.clone(),
        message,
    };

    let dataset = store
        .open(&row.locator)
        .map_err(|err| open_error(err.to_string()))?;
    let axis = dataset
        .time_axis()
        .cloned()
        .ok_or_else(|| open_error(ClimError::MissingTimeAxis(key.to_string()).to_string()))?;
    let dataset = if axis.is_standard() {
        dataset
    } else {
        let calendar = axis.calendar();
        let axis = axis
            .normalized()
            .map_err(|err| open_error(err.to_string()))?;
        tracing::debug!(group = %key, %calendar, "converted time axis to timestamps");
        dataset
            .with_time_axis(axis)
            .map_err(|err| open_error(err.to_string()))?
    };
    Ok(dataset.drop_bounds())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;

    use super::*;

    struct CountingStore {
        opened: AtomicUsize,
    }

    impl DatasetStore for CountingStore {
        fn open(&self, locator: &str) -> Result<LazyDataset, ClimError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Err(ClimError::Store(format!("{locator} unreachable")))
        }
    }

    #[test]
    fn building_a_node_does_not_touch_the_store() {
        let store = Arc::new(CountingStore {
            opened: AtomicUsize::new(0),
        });
        let loader = LazyDatasetLoader::new(Arc::clone(&store));
        let key = GroupKey::new("M1", "ssp585");
        let node = loader.deferred_open(key.clone(), vec![CatalogRow::new("M1", "ssp585", "a")]);
        assert_eq!(store.opened.load(Ordering::SeqCst), 0);
        assert_eq!(node.label(), "open M1/ssp585");

        let err = node.force().unwrap_err();
        assert_eq!(store.opened.load(Ordering::SeqCst), 1);
        assert_matches!(err, ClimError::DatasetOpen { locator, group, .. } => {
            assert_eq!(locator, "a");
            assert_eq!(group, key);
        });
    }
}
