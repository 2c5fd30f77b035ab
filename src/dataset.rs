//! In-memory labelled arrays: the value type flowing through the pipeline.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ndarray::{Array1, ArrayD, Axis, IxDyn};
use serde_json::Value;

use crate::calendar::TimeAxis;
use crate::error::ClimError;

pub const TIME_DIM: &str = "time";
pub const MODEL_DIM: &str = "model";

pub type Attrs = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    dims: Vec<String>,
    data: ArrayD<f64>,
    attrs: Attrs,
}

impl Variable {
    pub fn new<D: Into<String>>(
        dims: impl IntoIterator<Item = D>,
        data: ArrayD<f64>,
    ) -> Result<Self, ClimError> {
        let dims = dims.into_iter().map(Into::into).collect::<Vec<String>>();
        check_rank(&dims, data.ndim())?;
        Ok(Self {
            dims,
            data,
            attrs: Attrs::new(),
        })
    }

    pub fn with_attrs(mut self, attrs: Attrs) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|name| name == dim)
    }

    pub fn into_parts(self) -> (Vec<String>, ArrayD<f64>, Attrs) {
        (self.dims, self.data, self.attrs)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CoordValues {
    Numeric(ArrayD<f64>),
    Time(TimeAxis),
    Labels(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Coordinate {
    dims: Vec<String>,
    values: CoordValues,
    attrs: Attrs,
}

impl Coordinate {
    /// One-dimensional numeric coordinate along `dim`.
    pub fn numeric(dim: &str, values: Vec<f64>) -> Self {
        Self {
            dims: vec![dim.to_string()],
            values: CoordValues::Numeric(Array1::from(values).into_dyn()),
            attrs: Attrs::new(),
        }
    }

    pub fn numeric_nd<D: Into<String>>(
        dims: impl IntoIterator<Item = D>,
        values: ArrayD<f64>,
    ) -> Result<Self, ClimError> {
        let dims = dims.into_iter().map(Into::into).collect::<Vec<String>>();
        check_rank(&dims, values.ndim())?;
        Ok(Self {
            dims,
            values: CoordValues::Numeric(values),
            attrs: Attrs::new(),
        })
    }

    pub fn time(axis: TimeAxis) -> Self {
        Self {
            dims: vec![TIME_DIM.to_string()],
            values: CoordValues::Time(axis),
            attrs: Attrs::new(),
        }
    }

    pub fn labels(dim: &str, labels: Vec<String>) -> Self {
        Self {
            dims: vec![dim.to_string()],
            values: CoordValues::Labels(labels),
            attrs: Attrs::new(),
        }
    }

    pub fn with_attrs(mut self, attrs: Attrs) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn values(&self) -> &CoordValues {
        &self.values
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    pub fn shape(&self) -> Vec<usize> {
        match &self.values {
            CoordValues::Numeric(values) => values.shape().to_vec(),
            CoordValues::Time(axis) => vec![axis.len()],
            CoordValues::Labels(labels) => vec![labels.len()],
        }
    }

    /// Values of a one-dimensional numeric coordinate.
    pub fn as_slice(&self) -> Option<&[f64]> {
        match &self.values {
            CoordValues::Numeric(values) if values.ndim() == 1 => values.as_slice(),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<&TimeAxis> {
        match &self.values {
            CoordValues::Time(axis) => Some(axis),
            _ => None,
        }
    }

    pub fn as_labels(&self) -> Option<&[String]> {
        match &self.values {
            CoordValues::Labels(labels) => Some(labels),
            _ => None,
        }
    }

    pub fn has_dim(&self, dim: &str) -> bool {
        self.dims.iter().any(|name| name == dim)
    }

    pub(crate) fn into_parts(self) -> (Vec<String>, CoordValues, Attrs) {
        (self.dims, self.values, self.attrs)
    }

    pub(crate) fn from_parts(dims: Vec<String>, values: CoordValues, attrs: Attrs) -> Self {
        Self {
            dims,
            values,
            attrs,
        }
    }
}

/// Named coordinates and data variables sharing one set of dimensions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    coords: BTreeMap<String, Coordinate>,
    data_vars: BTreeMap<String, Variable>,
    attrs: Attrs,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_coord(mut self, name: &str, coord: Coordinate) -> Result<Self, ClimError> {
        self.insert_coord(name, coord)?;
        Ok(self)
    }

    pub fn with_var(mut self, name: &str, var: Variable) -> Result<Self, ClimError> {
        self.insert_var(name, var)?;
        Ok(self)
    }

    pub fn with_attrs(mut self, attrs: Attrs) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn insert_coord(&mut self, name: &str, coord: Coordinate) -> Result<(), ClimError> {
        if coord.as_time().is_some() && name != TIME_DIM {
            return Err(ClimError::MalformedDataset(format!(
                "time axis stored under {name}, expected {TIME_DIM}"
            )));
        }
        self.check_shape(name, &coord.dims, &coord.shape())?;
        self.data_vars.remove(name);
        self.coords.insert(name.to_string(), coord);
        Ok(())
    }

    pub fn insert_var(&mut self, name: &str, var: Variable) -> Result<(), ClimError> {
        if self.coords.contains_key(name) {
            return Err(ClimError::MalformedDataset(format!(
                "{name} is already a coordinate"
            )));
        }
        self.check_shape(name, &var.dims, var.data.shape())?;
        self.data_vars.insert(name.to_string(), var);
        Ok(())
    }

    fn check_shape(&self, name: &str, dims: &[String], shape: &[usize]) -> Result<(), ClimError> {
        let known = self.dims_excluding(Some(name));
        for (dim, &size) in dims.iter().zip(shape) {
            if let Some(&existing) = known.get(dim) {
                if existing != size {
                    return Err(ClimError::MalformedDataset(format!(
                        "{name}: dimension {dim} has size {size}, dataset has {existing}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Dimension sizes across every coordinate and variable.
    pub fn dims(&self) -> BTreeMap<String, usize> {
        self.dims_excluding(None)
    }

    fn dims_excluding(&self, skip: Option<&str>) -> BTreeMap<String, usize> {
        let mut dims = BTreeMap::new();
        let keep = |name: &String| skip != Some(name.as_str());
        for (_, coord) in self.coords.iter().filter(|(name, _)| keep(name)) {
            for (dim, size) in coord.dims.iter().zip(coord.shape()) {
                dims.entry(dim.clone()).or_insert(size);
            }
        }
        for (_, var) in self.data_vars.iter().filter(|(name, _)| keep(name)) {
            for (dim, &size) in var.dims.iter().zip(var.data.shape()) {
                dims.entry(dim.clone()).or_insert(size);
            }
        }
        dims
    }

    pub fn coord(&self, name: &str) -> Option<&Coordinate> {
        self.coords.get(name)
    }

    pub fn var(&self, name: &str) -> Option<&Variable> {
        self.data_vars.get(name)
    }

    pub fn coords(&self) -> &BTreeMap<String, Coordinate> {
        &self.coords
    }

    pub fn data_vars(&self) -> &BTreeMap<String, Variable> {
        &self.data_vars
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    /// Coordinate and data variable names, coordinates first.
    pub fn names(&self) -> Vec<&str> {
        self.coords
            .keys()
            .chain(self.data_vars.keys())
            .map(String::as_str)
            .collect()
    }

    pub fn time_axis(&self) -> Option<&TimeAxis> {
        self.coords.get(TIME_DIM).and_then(Coordinate::as_time)
    }

    /// Replaces the time coordinate; the new axis must keep the same length.
    pub fn with_time_axis(mut self, axis: TimeAxis) -> Result<Self, ClimError> {
        let current = self
            .time_axis()
            .map(TimeAxis::len)
            .ok_or_else(|| ClimError::MalformedDataset("dataset has no time axis".to_string()))?;
        if current != axis.len() {
            return Err(ClimError::MalformedDataset(format!(
                "time axis length changed from {current} to {}",
                axis.len()
            )));
        }
        let attrs = self.coords[TIME_DIM].attrs.clone();
        self.coords
            .insert(TIME_DIM.to_string(), Coordinate::time(axis).with_attrs(attrs));
        Ok(self)
    }

    pub fn drop_names<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        for name in names {
            self.coords.remove(name.as_ref());
            self.data_vars.remove(name.as_ref());
        }
        self
    }

    /// Removes every coordinate and variable describing cell boundaries
    /// (`time_bounds`, `lat_bnds`, ...).
    pub fn drop_bounds(self) -> Self {
        let bounds = self
            .names()
            .into_iter()
            .filter(|name| is_bounds_name(name))
            .map(str::to_string)
            .collect::<Vec<_>>();
        self.drop_names(&bounds)
    }

    /// Splits off the data variables, leaving coordinates and attributes.
    pub(crate) fn split_data_vars(mut self) -> (Self, BTreeMap<String, Variable>) {
        let data_vars = std::mem::take(&mut self.data_vars);
        (self, data_vars)
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        BTreeMap<String, Coordinate>,
        BTreeMap<String, Variable>,
        Attrs,
    ) {
        (self.coords, self.data_vars, self.attrs)
    }

    /// Index values of the one-dimensional numeric coordinate named `dim`.
    pub fn index(&self, dim: &str) -> Option<&[f64]> {
        self.coords
            .get(dim)
            .filter(|coord| coord.dims.len() == 1 && coord.dims[0] == dim)
            .and_then(Coordinate::as_slice)
    }

    /// Conforms every array along `dim` to `target`; positions absent from
    /// the current index are filled with NaN.
    pub fn reindex(self, dim: &str, target: &[f64]) -> Result<Self, ClimError> {
        let current = self.index(dim).ok_or_else(|| {
            ClimError::MalformedDataset(format!("dimension {dim} has no numeric index"))
        })?;
        if current == target {
            return Ok(self);
        }
        let positions = current
            .iter()
            .enumerate()
            .map(|(pos, value)| (index_key(*value), pos))
            .collect::<HashMap<_, _>>();
        let mapping = target
            .iter()
            .map(|value| positions.get(&index_key(*value)).copied())
            .collect::<Vec<_>>();

        let (coords, data_vars, attrs) = self.into_parts();
        let mut out = Dataset::new().with_attrs(attrs);
        for (name, coord) in coords {
            let (dims, values, coord_attrs) = coord.into_parts();
            let values = if name == dim {
                CoordValues::Numeric(Array1::from(target.to_vec()).into_dyn())
            } else {
                match (dims.iter().position(|d| d == dim), values) {
                    (None, values) => values,
                    (Some(axis), CoordValues::Numeric(array)) => {
                        CoordValues::Numeric(reindex_axis(&array, axis, &mapping))
                    }
                    (Some(_), _) => {
                        return Err(ClimError::MalformedDataset(format!(
                            "coordinate {name} along {dim} cannot be reindexed"
                        )));
                    }
                }
            };
            out.coords
                .insert(name, Coordinate::from_parts(dims, values, coord_attrs));
        }
        for (name, var) in data_vars {
            let data = match var.axis_of(dim) {
                Some(axis) => reindex_axis(&var.data, axis, &mapping),
                None => var.data,
            };
            out.data_vars.insert(
                name,
                Variable {
                    dims: var.dims,
                    data,
                    attrs: var.attrs,
                },
            );
        }
        Ok(out)
    }
}

pub fn is_bounds_name(name: &str) -> bool {
    name.contains("_bounds") || name.contains("_bnds") || name == "bounds" || name == "bnds"
}

fn check_rank(dims: &[String], ndim: usize) -> Result<(), ClimError> {
    if dims.len() != ndim {
        return Err(ClimError::MalformedDataset(format!(
            "{} dimension names for a {ndim}-dimensional array",
            dims.len()
        )));
    }
    Ok(())
}

fn index_key(value: f64) -> u64 {
    if value == 0.0 { 0.0f64.to_bits() } else { value.to_bits() }
}

fn reindex_axis(data: &ArrayD<f64>, axis: usize, mapping: &[Option<usize>]) -> ArrayD<f64> {
    let mut shape = data.shape().to_vec();
    shape[axis] = mapping.len();
    let mut out = ArrayD::from_elem(IxDyn(&shape), f64::NAN);
    for (new_pos, old_pos) in mapping.iter().enumerate() {
        if let Some(old_pos) = old_pos {
            out.index_axis_mut(Axis(axis), new_pos)
                .assign(&data.index_axis(Axis(axis), *old_pos));
        }
    }
    out
}

/// Union of several index coordinates. Identical indexes are returned
/// unchanged; otherwise the sorted union of all values.
pub fn union_index(indexes: &[&[f64]]) -> Vec<f64> {
    let Some(first) = indexes.first() else {
        return Vec::new();
    };
    if indexes.iter().all(|index| index == first) {
        return first.to_vec();
    }
    let mut values = indexes
        .iter()
        .flat_map(|index| index.iter().copied())
        .collect::<Vec<_>>();
    values.sort_by(f64::total_cmp);
    values.dedup_by(|a, b| index_key(*a) == index_key(*b));
    values
}

/// Outer-joins the index coordinates of every dimension except `skip`.
/// Dimensions without an index in any dataset must agree in size.
pub fn align_outer(datasets: Vec<Dataset>, skip: &str) -> Result<Vec<Dataset>, String> {
    let dims = datasets
        .iter()
        .flat_map(|dataset| dataset.dims().into_keys())
        .filter(|dim| dim != skip)
        .collect::<BTreeSet<_>>();

    let mut datasets = datasets;
    for dim in dims {
        let indexed = datasets
            .iter()
            .filter(|dataset| dataset.index(&dim).is_some())
            .count();
        let present = datasets
            .iter()
            .filter(|dataset| dataset.dims().contains_key(&dim))
            .count();
        if indexed == 0 {
            let sizes = datasets
                .iter()
                .filter_map(|dataset| dataset.dims().get(&dim).copied())
                .collect::<Vec<_>>();
            if sizes.windows(2).any(|pair| pair[0] != pair[1]) {
                return Err(format!(
                    "dimension {dim} has no coordinate and differing sizes {sizes:?}"
                ));
            }
            continue;
        }
        if indexed != present {
            return Err(format!(
                "dimension {dim} has a coordinate in only {indexed} of {present} datasets"
            ));
        }
        let target = {
            let indexes = datasets
                .iter()
                .filter_map(|dataset| dataset.index(&dim))
                .collect::<Vec<_>>();
            union_index(&indexes)
        };
        datasets = datasets
            .into_iter()
            .map(|dataset| {
                if dataset.index(&dim).is_some() {
                    dataset.reindex(&dim, &target).map_err(|err| err.to_string())
                } else {
                    Ok(dataset)
                }
            })
            .collect::<Result<Vec<_>, String>>()?;
    }
    Ok(datasets)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn grid(lat: Vec<f64>, lon: Vec<f64>) -> Dataset {
        let data = ArrayD::from_elem(IxDyn(&[lat.len(), lon.len()]), 1.0);
        Dataset::new()
            .with_coord("lat", Coordinate::numeric("lat", lat))
            .unwrap()
            .with_coord("lon", Coordinate::numeric("lon", lon))
            .unwrap()
            .with_var("tas", Variable::new(["lat", "lon"], data).unwrap())
            .unwrap()
    }

    #[test]
    fn mismatched_dimension_sizes_are_rejected() {
        let dataset = grid(vec![0.0, 1.0], vec![10.0]);
        let wrong = ArrayD::zeros(IxDyn(&[3, 1]));
        let err = dataset
            .with_var("pr", Variable::new(["lat", "lon"], wrong).unwrap())
            .unwrap_err();
        assert_matches!(err, ClimError::MalformedDataset(_));
    }

    #[test]
    fn bounds_names_are_recognized() {
        assert!(is_bounds_name("time_bounds"));
        assert!(is_bounds_name("lat_bnds"));
        assert!(!is_bounds_name("tas"));
        assert!(!is_bounds_name("boundary_layer_height"));
    }

    #[test]
    fn reindex_fills_new_positions_with_nan() {
        let dataset = grid(vec![0.0, 1.0], vec![10.0, 20.0]);
        let dataset = dataset.reindex("lat", &[-1.0, 0.0, 1.0]).unwrap();
        let tas = dataset.var("tas").unwrap().data();
        assert_eq!(tas.shape(), &[3, 2]);
        assert!(tas[[0, 0]].is_nan());
        assert_eq!(tas[[1, 1]], 1.0);
        assert_eq!(dataset.index("lat").unwrap(), &[-1.0, 0.0, 1.0]);
    }

    #[test]
    fn union_keeps_identical_indexes_untouched() {
        let a = [3.0, 2.0, 1.0];
        assert_eq!(union_index(&[&a, &a]), vec![3.0, 2.0, 1.0]);
        let b = [1.0, 4.0];
        assert_eq!(union_index(&[&a, &b]), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn align_outer_joins_grids() {
        let a = grid(vec![0.0, 1.0], vec![10.0]);
        let b = grid(vec![1.0, 2.0], vec![10.0]);
        let aligned = align_outer(vec![a, b], TIME_DIM).unwrap();
        for dataset in &aligned {
            assert_eq!(dataset.index("lat").unwrap(), &[0.0, 1.0, 2.0]);
        }
        let first = aligned[0].var("tas").unwrap().data();
        assert_eq!(first.shape(), &[3, 1]);
        assert!(first[[2, 0]].is_nan());
    }
}
