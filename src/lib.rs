pub mod calendar;
pub mod catalog;
pub mod climatology;
pub mod concat;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod error;
pub mod executor;
pub mod grouping;
pub mod lazy;
pub mod loader;
pub mod merge;
pub mod output;
pub mod pipeline;
pub mod snapshot;
pub mod zarr;
