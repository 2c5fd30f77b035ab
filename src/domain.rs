use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ClimError;

pub const MODEL_COLUMN: &str = "source_id";
pub const EXPERIMENT_COLUMN: &str = "experiment_id";

/// Identity of one logical dataset: a model run for one experiment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub model: String,
    pub experiment: String,
}

impl GroupKey {
    pub fn new(model: impl Into<String>, experiment: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            experiment: experiment.into(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.model, self.experiment)
    }
}

/// Maps the short facet names accepted on the command line and in config
/// files onto catalog column names.
pub fn facet_column(name: &str) -> &str {
    match name {
        "model" => MODEL_COLUMN,
        "experiment" => EXPERIMENT_COLUMN,
        "variable" => "variable_id",
        "table" => "table_id",
        "member" => "member_id",
        "grid" => "grid_label",
        "institution" => "institution_id",
        other => other,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    facets: BTreeMap<String, Vec<String>>,
    require_all_on: Vec<String>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_facet<I, V>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.add_facet(name, values);
        self
    }

    pub fn add_facet<I, V>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let entry = self
            .facets
            .entry(facet_column(name.trim()).to_string())
            .or_default();
        for value in values {
            let value = value.into();
            if !entry.contains(&value) {
                entry.push(value);
            }
        }
    }

    /// Replaces any values already requested for `name`.
    pub fn set_facet<I, V>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.facets.remove(facet_column(name.trim()));
        self.add_facet(name, values);
    }

    pub fn require_all_on(mut self, column: &str) -> Self {
        let column = facet_column(column).to_string();
        if !self.require_all_on.contains(&column) {
            self.require_all_on.push(column);
        }
        self
    }

    pub fn facets(&self) -> &BTreeMap<String, Vec<String>> {
        &self.facets
    }

    pub fn required_columns(&self) -> &[String] {
        &self.require_all_on
    }

    pub fn validate(&self) -> Result<(), ClimError> {
        if self.facets.is_empty() {
            return Err(ClimError::InvalidQuery(
                "at least one facet filter is required".to_string(),
            ));
        }
        if let Some((name, _)) = self.facets.iter().find(|(_, values)| values.is_empty()) {
            return Err(ClimError::InvalidQuery(format!(
                "facet {name} has no values"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self
            .facets
            .iter()
            .map(|(name, values)| format!("{name}={}", values.join(",")))
            .collect::<Vec<_>>();
        write!(f, "{{{}}}", parts.join(" "))
    }
}

/// One `name=value[,value...]` filter as written on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetFilter {
    pub name: String,
    pub values: Vec<String>,
}

impl FromStr for FacetFilter {
    type Err = ClimError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (name, rest) = value
            .split_once('=')
            .ok_or_else(|| ClimError::InvalidQuery(format!("expected name=value, got {value}")))?;
        let name = name.trim();
        let values = rest
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        if name.is_empty() || values.is_empty() {
            return Err(ClimError::InvalidQuery(format!(
                "expected name=value, got {value}"
            )));
        }
        Ok(Self {
            name: facet_column(name).to_string(),
            values,
        })
    }
}

/// Closed interval of calendar years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearWindow {
    start: i32,
    end: i32,
}

impl YearWindow {
    pub fn new(start: i32, end: i32) -> Result<Self, ClimError> {
        if start > end {
            return Err(ClimError::InvalidYearWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> i32 {
        self.start
    }

    pub fn end(&self) -> i32 {
        self.end
    }

    pub fn contains(&self, year: i32) -> bool {
        self.start <= year && year <= self.end
    }
}

impl fmt::Display for YearWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for YearWindow {
    type Err = ClimError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let invalid = || ClimError::InvalidQuery(format!("invalid year window: {value}"));
        // a leading '-' is the sign of the start year, not the separator
        let (start, end) = trimmed
            .split_once(':')
            .or_else(|| {
                let (at, _) = trimmed.char_indices().skip(1).find(|(_, c)| *c == '-')?;
                Some((&trimmed[..at], &trimmed[at + 1..]))
            })
            .ok_or_else(invalid)?;
        let start = start.trim().parse::<i32>().map_err(|_| invalid())?;
        let end = end.trim().parse::<i32>().map_err(|_| invalid())?;
        Self::new(start, end)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn facet_aliases_map_to_columns() {
        let query = Query::new()
            .with_facet("model", ["M1", "M2"])
            .with_facet("experiment", ["ssp585"]);
        assert!(query.facets().contains_key("source_id"));
        assert!(query.facets().contains_key("experiment_id"));
        assert_eq!(query.facets()["source_id"], vec!["M1", "M2"]);
    }

    #[test]
    fn empty_query_is_rejected() {
        let err = Query::new().validate().unwrap_err();
        assert_matches!(err, ClimError::InvalidQuery(_));
    }

    #[test]
    fn parse_facet_filter() {
        let filter: FacetFilter = "variable=tas,pr".parse().unwrap();
        assert_eq!(filter.name, "variable_id");
        assert_eq!(filter.values, vec!["tas", "pr"]);
        assert!("variable".parse::<FacetFilter>().is_err());
    }

    #[test]
    fn parse_year_window() {
        let window: YearWindow = "2015-2020".parse().unwrap();
        assert_eq!((window.start(), window.end()), (2015, 2020));
        assert!(window.contains(2015) && window.contains(2020));
        assert!(!window.contains(2021));

        let err = "2020:2015".parse::<YearWindow>().unwrap_err();
        assert_matches!(err, ClimError::InvalidYearWindow { start: 2020, end: 2015 });
    }

    #[test]
    fn parse_year_window_with_negative_start() {
        let window: YearWindow = "-50-2020".parse().unwrap();
        assert_eq!((window.start(), window.end()), (-50, 2020));
        let window: YearWindow = "-100:-50".parse().unwrap();
        assert_eq!((window.start(), window.end()), (-100, -50));
        assert_matches!("-2020".parse::<YearWindow>(), Err(ClimError::InvalidQuery(_)));
    }
}
