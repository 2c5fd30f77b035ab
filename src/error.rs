use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::GroupKey;

#[derive(Debug, Error, Diagnostic)]
pub enum ClimError {
    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("no catalog entries match query {0}")]
    NoMatchingDatasets(String),

    #[error("group {group} matched {count} catalog rows, expected exactly one")]
    #[diagnostic(help("narrow the query (member_id, grid_label, table_id) so each model/experiment resolves to one dataset"))]
    MultipleMatch { group: GroupKey, count: usize },

    #[error("failed to open dataset {locator} for group {group}: {message}")]
    DatasetOpen {
        locator: String,
        group: GroupKey,
        message: String,
    },

    #[error("storage request failed: {0}")]
    Store(String),

    #[error("malformed dataset: {0}")]
    MalformedDataset(String),

    #[error("unsupported calendar: {0}")]
    UnsupportedCalendar(String),

    #[error("cannot decode time axis: {0}")]
    TimeDecode(String),

    #[error("dataset for {0} has no time coordinate")]
    MissingTimeAxis(String),

    #[error("invalid year window {start}-{end}: start must not exceed end")]
    InvalidYearWindow { start: i32, end: i32 },

    #[error(
        "model {model} has no data in {year1}-{year2} (series covers {first}-{last})"
    )]
    EmptyWindow {
        model: String,
        year1: i32,
        year2: i32,
        first: i32,
        last: i32,
    },

    #[error("cannot concatenate datasets of model {model}: {reason}")]
    Concatenation { model: String, reason: String },

    #[error("cannot merge model climatologies: {0}")]
    Merge(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("executor failure: {0}")]
    Executor(String),

    #[error("missing config file climatology.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
