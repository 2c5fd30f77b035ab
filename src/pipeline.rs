use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::catalog::{CatalogClient, CatalogRow};
use crate::climatology::{ClimatologyResult, climatology, ensure_window_covered};
use crate::concat::concat_by_time;
use crate::domain::{GroupKey, Query, YearWindow};
use crate::error::ClimError;
use crate::executor::GraphExecutor;
use crate::grouping::{group_rows, models_of};
use crate::lazy::LazyDataset;
use crate::loader::{Deferred, LazyDatasetLoader};
use crate::merge::{MergedClimatology, merge_models};
use crate::zarr::DatasetStore;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClimatologyRequest {
    pub query: Query,
    pub window: YearWindow,
}

/// A group or model left out of the result under `SkipFailed`.
#[derive(Debug, Clone, Serialize)]
pub struct ExcludedGroup {
    pub stage: String,
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub climatology: MergedClimatology,
    pub excluded: Vec<ExcludedGroup>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub query: String,
    /// Experiments found for every model.
    pub models: BTreeMap<String, Vec<String>>,
    pub groups: Vec<SearchGroup>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchGroup {
    pub model: String,
    pub experiment: String,
    pub rows: Vec<CatalogRow>,
}

pub struct Pipeline<C: CatalogClient, S: DatasetStore> {
    catalog: C,
    loader: LazyDatasetLoader<S>,
    executor: GraphExecutor,
}

impl<C: CatalogClient, S: DatasetStore + 'static> Pipeline<C, S> {
    pub fn new(catalog: C, store: S, executor: GraphExecutor) -> Self {
        Self {
            catalog,
            loader: LazyDatasetLoader::new(Arc::new(store)),
            executor,
        }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn search(&self, query: &Query, sink: &dyn ProgressSink) -> Result<SearchResult, ClimError> {
        sink.event(ProgressEvent {
            message: format!("phase=Search; query {query}"),
            elapsed: None,
        });
        let groups = group_rows(self.catalog.search(query)?);
        let models = models_of(&groups)
            .into_iter()
            .map(|(model, experiments)| {
                let experiments = experiments.into_iter().map(str::to_string).collect();
                (model.to_string(), experiments)
            })
            .collect();
        let groups = groups
            .into_iter()
            .map(|(key, rows)| SearchGroup {
                model: key.model,
                experiment: key.experiment,
                rows,
            })
            .collect();
        Ok(SearchResult {
            query: query.to_string(),
            models,
            groups,
        })
    }

    pub fn run(
        &self,
        request: &ClimatologyRequest,
        sink: &dyn ProgressSink,
    ) -> Result<PipelineOutput, ClimError> {
        let query = &request.query;
        let window = request.window;
        sink.event(ProgressEvent {
            message: format!("phase=Search; query {query}"),
            elapsed: None,
        });
        let rows = self.catalog.search(query)?;
        if rows.is_empty() {
            return Err(ClimError::NoMatchingDatasets(query.to_string()));
        }
        let groups = group_rows(rows);
        tracing::info!(groups = groups.len(), window = %window, "catalog search finished");

        let loads = groups
            .into_iter()
            .map(|(key, rows)| (key.clone(), self.loader.deferred_open(key, rows)))
            .collect::<BTreeMap<GroupKey, Deferred<LazyDataset>>>();
        let loaded = self.executor.realize_all("Load", loads, sink)?;
        let mut excluded = loaded
            .failures
            .into_iter()
            .map(|(key, err)| ExcludedGroup {
                stage: "Load".to_string(),
                key: key.to_string(),
                reason: err.to_string(),
            })
            .collect::<Vec<_>>();

        let mut by_model = BTreeMap::<String, Vec<LazyDataset>>::new();
        for (key, dataset) in loaded.values {
            by_model.entry(key.model).or_default().push(dataset);
        }
        let reductions = by_model
            .into_iter()
            .map(|(model, datasets)| {
                let label = format!("climatology {model}");
                let node = Deferred::new(label, {
                    let model = model.clone();
                    move || reduce_model(&model, &datasets, window)
                });
                (model, node)
            })
            .collect::<BTreeMap<_, _>>();
        let reduced = self.executor.realize_all("Reduce", reductions, sink)?;
        excluded.extend(reduced.failures.into_iter().map(|(model, err)| ExcludedGroup {
            stage: "Reduce".to_string(),
            key: model,
            reason: err.to_string(),
        }));

        let climatology = merge_models(reduced.values.into_values().collect())?;
        sink.event(ProgressEvent {
            message: format!("phase=Merge; {} models", climatology.models().len()),
            elapsed: None,
        });
        Ok(PipelineOutput {
            climatology,
            excluded,
        })
    }
}

/// Reads the window slab of every experiment of `model`, joins them along
/// time and averages.
fn reduce_model(
    model: &str,
    datasets: &[LazyDataset],
    window: YearWindow,
) -> Result<ClimatologyResult, ClimError> {
    let mut years = Vec::new();
    for dataset in datasets {
        let axis = dataset
            .time_axis()
            .ok_or_else(|| ClimError::MissingTimeAxis(model.to_string()))?;
        years.extend(axis.years()?);
    }
    ensure_window_covered(model, &years, window)?;
    let slabs = datasets
        .iter()
        .map(|dataset| dataset.read_window(window))
        .collect::<Result<Vec<_>, _>>()?;
    let series = concat_by_time(model, slabs)?;
    climatology(&series, window)
}
