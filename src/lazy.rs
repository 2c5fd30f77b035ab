//! Datasets whose data variables stay in storage until a time range is read.
//!
//! Opening a store only reads coordinates. The Reduce phase asks for the
//! steps of one year window through [`LazyDataset::read_window`], so chunks
//! outside the window are never fetched.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use ndarray::{ArrayD, Axis, IxDyn, Slice};

use crate::calendar::TimeAxis;
use crate::dataset::{
    Attrs, CoordValues, Coordinate, Dataset, TIME_DIM, Variable, is_bounds_name,
};
use crate::domain::YearWindow;
use crate::error::ClimError;

/// A stored array that can be read one slab at a time.
pub trait ArraySource: Send + Sync {
    fn shape(&self) -> Vec<usize>;

    /// Reads `range` along `axis` and every other axis in full, or the whole
    /// array when `selection` is `None`.
    fn read(&self, selection: Option<(usize, Range<usize>)>) -> Result<ArrayD<f64>, ClimError>;
}

impl ArraySource for ArrayD<f64> {
    fn shape(&self) -> Vec<usize> {
        ndarray::ArrayBase::shape(self).to_vec()
    }

    fn read(&self, selection: Option<(usize, Range<usize>)>) -> Result<ArrayD<f64>, ClimError> {
        Ok(match selection {
            Some((axis, range)) => self.slice_axis(Axis(axis), Slice::from(range)).to_owned(),
            None => self.clone(),
        })
    }
}

#[derive(Clone)]
pub struct LazyVariable {
    dims: Vec<String>,
    shape: Vec<usize>,
    source: Arc<dyn ArraySource>,
    attrs: Attrs,
}

impl LazyVariable {
    pub fn new<D: Into<String>>(
        dims: impl IntoIterator<Item = D>,
        source: Arc<dyn ArraySource>,
    ) -> Result<Self, ClimError> {
        let dims = dims.into_iter().map(Into::into).collect::<Vec<String>>();
        let shape = source.shape();
        if dims.len() != shape.len() {
            return Err(ClimError::MalformedDataset(format!(
                "{} dimension names for a {}-dimensional array",
                dims.len(),
                shape.len()
            )));
        }
        Ok(Self {
            dims,
            shape,
            source,
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

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|name| name == dim)
    }

    pub fn load(&self) -> Result<Variable, ClimError> {
        self.materialize(None)
    }

    /// Reads `range` along `dim`; variables without that dimension are read whole.
    pub fn load_range(&self, dim: &str, range: Range<usize>) -> Result<Variable, ClimError> {
        self.materialize(self.axis_of(dim).map(|axis| (axis, range)))
    }

    fn materialize(&self, selection: Option<(usize, Range<usize>)>) -> Result<Variable, ClimError> {
        let data = match selection {
            Some((axis, range)) if range.is_empty() => {
                let mut shape = self.shape.clone();
                shape[axis] = 0;
                ArrayD::zeros(IxDyn(&shape))
            }
            selection => self.source.read(selection)?,
        };
        Ok(Variable::new(self.dims.clone(), data)?.with_attrs(self.attrs.clone()))
    }
}

impl From<Variable> for LazyVariable {
    fn from(var: Variable) -> Self {
        let (dims, data, attrs) = var.into_parts();
        Self {
            dims,
            shape: data.shape().to_vec(),
            source: Arc::new(data),
            attrs,
        }
    }
}

impl fmt::Debug for LazyVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyVariable")
            .field("dims", &self.dims)
            .field("shape", &self.shape)
            .finish()
    }
}

/// In-memory coordinates plus data variables backed by storage.
#[derive(Debug, Clone, Default)]
pub struct LazyDataset {
    coords: Dataset,
    data_vars: BTreeMap<String, LazyVariable>,
}

impl LazyDataset {
    /// Starts from the coordinates and attributes of `coords`; its data
    /// variables become in-memory sources.
    pub fn new(coords: Dataset) -> Self {
        Self::from(coords)
    }

    pub fn insert_var(&mut self, name: &str, var: LazyVariable) -> Result<(), ClimError> {
        if self.coords.coord(name).is_some() {
            return Err(ClimError::MalformedDataset(format!(
                "{name} is already a coordinate"
            )));
        }
        let known = self.dims_excluding(name);
        for (dim, &size) in var.dims.iter().zip(&var.shape) {
            if let Some(&existing) = known.get(dim) {
                if existing != size {
                    return Err(ClimError::MalformedDataset(format!(
                        "{name}: dimension {dim} has size {size}, dataset has {existing}"
                    )));
                }
            }
        }
        self.data_vars.insert(name.to_string(), var);
        Ok(())
    }

    pub fn coords(&self) -> &BTreeMap<String, Coordinate> {
        self.coords.coords()
    }

    pub fn coord(&self, name: &str) -> Option<&Coordinate> {
        self.coords.coord(name)
    }

    pub fn index(&self, dim: &str) -> Option<&[f64]> {
        self.coords.index(dim)
    }

    pub fn data_vars(&self) -> &BTreeMap<String, LazyVariable> {
        &self.data_vars
    }

    pub fn var(&self, name: &str) -> Option<&LazyVariable> {
        self.data_vars.get(name)
    }

    pub fn attrs(&self) -> &Attrs {
        self.coords.attrs()
    }

    pub fn dims(&self) -> BTreeMap<String, usize> {
        self.dims_excluding("")
    }

    fn dims_excluding(&self, skip: &str) -> BTreeMap<String, usize> {
        let mut dims = self.coords.dims();
        for (_, var) in self.data_vars.iter().filter(|(name, _)| name.as_str() != skip) {
            for (dim, &size) in var.dims.iter().zip(&var.shape) {
                dims.entry(dim.clone()).or_insert(size);
            }
        }
        dims
    }

    pub fn time_axis(&self) -> Option<&TimeAxis> {
        self.coords.time_axis()
    }

    pub fn with_time_axis(mut self, axis: TimeAxis) -> Result<Self, ClimError> {
        self.coords = self.coords.with_time_axis(axis)?;
        Ok(self)
    }

    pub fn drop_bounds(mut self) -> Self {
        self.coords = self.coords.drop_bounds();
        self.data_vars.retain(|name, _| !is_bounds_name(name));
        self
    }

    /// Reads every variable in full.
    pub fn load(&self) -> Result<Dataset, ClimError> {
        let mut out = self.coords.clone();
        for (name, var) in &self.data_vars {
            out.insert_var(name, var.load()?)?;
        }
        Ok(out)
    }

    /// Steps `[first, last]` of the time axis whose year lies in `window`,
    /// as a half-open range; empty when no step does.
    pub fn window_range(&self, window: YearWindow) -> Result<Range<usize>, ClimError> {
        let axis = self
            .time_axis()
            .ok_or_else(|| ClimError::MalformedDataset("dataset has no time axis".to_string()))?;
        let inside = axis
            .years()?
            .into_iter()
            .enumerate()
            .filter(|(_, year)| window.contains(*year))
            .map(|(step, _)| step)
            .collect::<Vec<_>>();
        Ok(match (inside.first(), inside.last()) {
            (Some(&first), Some(&last)) => first..last + 1,
            _ => 0..0,
        })
    }

    /// Materializes the time steps covering `window`, reading only that slab
    /// of every time-dependent variable.
    pub fn read_window(&self, window: YearWindow) -> Result<Dataset, ClimError> {
        let range = self.window_range(window)?;
        self.read_time(range)
    }

    pub fn read_time(&self, range: Range<usize>) -> Result<Dataset, ClimError> {
        let steps = range.clone().collect::<Vec<_>>();
        let mut out = Dataset::new().with_attrs(self.attrs().clone());
        for (name, coord) in self.coords() {
            let Some(axis) = coord.dims().iter().position(|dim| dim == TIME_DIM) else {
                out.insert_coord(name, coord.clone())?;
                continue;
            };
            let sliced = match coord.values() {
                CoordValues::Time(time) => Coordinate::time(time.select(&steps)),
                CoordValues::Numeric(values) => Coordinate::numeric_nd(
                    coord.dims().to_vec(),
                    values.slice_axis(Axis(axis), Slice::from(range.clone())).to_owned(),
                )?,
                CoordValues::Labels(_) => {
                    return Err(ClimError::MalformedDataset(format!(
                        "coordinate {name} along {TIME_DIM} cannot be sliced"
                    )));
                }
            };
            out.insert_coord(name, sliced.with_attrs(coord.attrs().clone()))?;
        }
        for (name, var) in &self.data_vars {
            out.insert_var(name, var.load_range(TIME_DIM, range.clone())?)?;
        }
        tracing::trace!(steps = steps.len(), "read time slab");
        Ok(out)
    }
}

impl From<Dataset> for LazyDataset {
    fn from(dataset: Dataset) -> Self {
        let (coords, data_vars) = dataset.split_data_vars();
        Self {
            coords,
            data_vars: data_vars
                .into_iter()
                .map(|(name, var)| (name, LazyVariable::from(var)))
                .collect(),
        }
    }
}
