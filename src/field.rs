//! Labeled multi-dimensional arrays.
//!
//! A [`Field`] is an `ndarray` array whose axes are identified by name, plus
//! named coordinate arrays and string attributes. Arithmetic between fields
//! aligns axes by name (not position) and broadcasts over dimensions that only
//! one operand has, which lets transform functions combine e.g. a
//! `(time, pfull, lat, lon)` field with a `(time, lat, lon)` one.
use indexmap::IndexMap;
use itertools::Itertools;
use ndarray::{ArrayD, ArrayView1, Axis, IxDyn, Zip};

use crate::error::{CalcError, CalcResult};
use crate::names::{LAT_STR, LON_STR, PFULL_STR, PHALF_STR, PLEVEL_STR, TIME_STR, YEAR_STR};

/// Dimension order used when a stage needs a predictable layout
/// (time first, then vertical, then horizontal).
const CANONICAL_DIM_ORDER: &[&str] = &[TIME_STR, YEAR_STR, PHALF_STR, PFULL_STR, PLEVEL_STR, LAT_STR, LON_STR];

/// A coordinate array: values along one or more named dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct Coord {
    pub dims: Vec<String>,
    pub values: ArrayD<f64>,
}

impl Coord {
    pub fn new<S: ToString>(dims: &[S], values: ArrayD<f64>) -> CalcResult<Self> {
        if dims.len() != values.ndim() {
            return Err(CalcError::shape_mismatch(format!(
                "coordinate given {} dimension names for a {}-D array",
                dims.len(),
                values.ndim()
            ))
            .into());
        }
        Ok(Self { dims: dims.iter().map(|d| d.to_string()).collect(), values })
    }

    /// A one-dimensional coordinate along `dim`.
    pub fn dim1<S: ToString>(dim: S, values: Vec<f64>) -> Self {
        let n = values.len();
        let values = ArrayD::from_shape_vec(IxDyn(&[n]), values)
            .expect("a vector always reshapes to its own length");
        Self { dims: vec![dim.to_string()], values }
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn rename_dim(&mut self, old: &str, new: &str) {
        for d in self.dims.iter_mut() {
            if d == old {
                *d = new.to_string();
            }
        }
    }
}

/// A named, labeled array with coordinates and attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    dims: Vec<String>,
    values: ArrayD<f64>,
    coords: IndexMap<String, Coord>,
    pub attrs: IndexMap<String, String>,
}

impl Field {
    pub fn new<N: ToString, S: ToString>(name: N, dims: &[S], values: ArrayD<f64>) -> CalcResult<Self> {
        let name = name.to_string();
        if dims.len() != values.ndim() {
            return Err(CalcError::shape_mismatch(format!(
                "field '{name}' given {} dimension names for a {}-D array",
                dims.len(),
                values.ndim()
            ))
            .into());
        }
        let dims = dims.iter().map(|d| d.to_string()).collect_vec();
        if !dims.iter().all_unique() {
            return Err(CalcError::shape_mismatch(format!("field '{name}' has repeated dimensions {dims:?}")).into());
        }
        Ok(Self { name, dims, values, coords: IndexMap::new(), attrs: IndexMap::new() })
    }

    /// A zero-dimensional field holding one value.
    pub fn scalar<N: ToString>(name: N, value: f64) -> Self {
        Self {
            name: name.to_string(),
            dims: vec![],
            values: ArrayD::from_elem(IxDyn(&[]), value),
            coords: IndexMap::new(),
            attrs: IndexMap::new(),
        }
    }

    /// Make a field whose data are the values of a coordinate. A one-dimensional
    /// coordinate is also attached to the new field as its own dimension coordinate.
    pub fn from_coord<N: ToString>(name: N, coord: &Coord) -> Self {
        let mut field = Self {
            name: name.to_string(),
            dims: coord.dims.clone(),
            values: coord.values.clone(),
            coords: IndexMap::new(),
            attrs: IndexMap::new(),
        };
        if coord.dims.len() == 1 {
            field.coords.insert(coord.dims[0].clone(), coord.clone());
        }
        field
    }

    pub fn with_name<N: ToString>(mut self, name: N) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn values(&self) -> &ArrayD<f64> {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut ArrayD<f64> {
        &mut self.values
    }

    pub fn shape(&self) -> &[usize] {
        self.values.shape()
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn dim_index(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    pub fn has_dim(&self, dim: &str) -> bool {
        self.dim_index(dim).is_some()
    }

    pub fn dim_len(&self, dim: &str) -> Option<usize> {
        self.dim_index(dim).map(|i| self.values.shape()[i])
    }

    fn require_dim(&self, dim: &str) -> CalcResult<usize> {
        self.dim_index(dim)
            .ok_or_else(|| CalcError::missing_dimension(&self.name, &[dim]).into())
    }

    pub fn coords(&self) -> &IndexMap<String, Coord> {
        &self.coords
    }

    pub fn coord(&self, name: &str) -> Option<&Coord> {
        self.coords.get(name)
    }

    pub fn has_coord(&self, name: &str) -> bool {
        self.coords.contains_key(name)
    }

    pub fn require_coord(&self, name: &str) -> CalcResult<&Coord> {
        self.coords
            .get(name)
            .ok_or_else(|| CalcError::missing_coordinate(&self.name, name).into())
    }

    /// True if every dimension of `coord` is one of ours, with the same length.
    pub fn coord_fits(&self, coord: &Coord) -> bool {
        coord
            .dims
            .iter()
            .zip(coord.values.shape())
            .all(|(d, &n)| self.dim_len(d) == Some(n))
    }

    /// Attach (or replace) a coordinate. Its dimensions must all be dimensions of
    /// this field with matching lengths.
    pub fn set_coord<S: ToString>(&mut self, name: S, coord: Coord) -> CalcResult<()> {
        let name = name.to_string();
        if !self.coord_fits(&coord) {
            return Err(CalcError::shape_mismatch(format!(
                "coordinate '{name}' with dims {:?} and shape {:?} does not fit field '{}' with dims {:?} and shape {:?}",
                coord.dims,
                coord.values.shape(),
                self.name,
                self.dims,
                self.shape()
            ))
            .into());
        }
        self.coords.insert(name, coord);
        Ok(())
    }

    /// Attach a coordinate if it fits, returning whether it was attached.
    pub fn try_set_coord<S: ToString>(&mut self, name: S, coord: Coord) -> bool {
        if self.coord_fits(&coord) {
            self.coords.insert(name.to_string(), coord);
            true
        } else {
            false
        }
    }

    pub fn remove_coord(&mut self, name: &str) -> Option<Coord> {
        self.coords.shift_remove(name)
    }

    /// Keep only the coordinates for which `keep` returns `true`.
    pub fn retain_coords<F: FnMut(&str) -> bool>(&mut self, mut keep: F) {
        self.coords.retain(|k, _| keep(k));
    }

    /// Rename a dimension and/or coordinate everywhere it appears.
    pub fn rename(&mut self, old: &str, new: &str) {
        if old == new {
            return;
        }
        for d in self.dims.iter_mut() {
            if d == old {
                *d = new.to_string();
            }
        }
        let coords = std::mem::take(&mut self.coords);
        self.coords = coords
            .into_iter()
            .map(|(k, mut c)| {
                c.rename_dim(old, new);
                if k == old {
                    (new.to_string(), c)
                } else {
                    (k, c)
                }
            })
            .collect();
    }

    /// Select the given indices along `dim`. Coordinates along `dim` are subset to match.
    pub fn isel(&self, dim: &str, indices: &[usize]) -> CalcResult<Self> {
        let iax = self.require_dim(dim)?;
        let n = self.values.shape()[iax];
        if let Some(&bad) = indices.iter().find(|&&i| i >= n) {
            return Err(CalcError::shape_mismatch(format!(
                "index {bad} out of bounds for dimension '{dim}' of length {n} in '{}'",
                self.name
            ))
            .into());
        }
        let values = self.values.select(Axis(iax), indices);
        let coords = self
            .coords
            .iter()
            .map(|(k, c)| {
                let c = match c.dims.iter().position(|d| d == dim) {
                    Some(ic) => Coord { dims: c.dims.clone(), values: c.values.select(Axis(ic), indices) },
                    None => c.clone(),
                };
                (k.clone(), c)
            })
            .collect();
        Ok(Self { name: self.name.clone(), dims: self.dims.clone(), values, coords, attrs: self.attrs.clone() })
    }

    /// Select one index along `dim`, dropping the dimension and its coordinates.
    pub fn index_dim(&self, dim: &str, index: usize) -> CalcResult<Self> {
        let mut out = self.isel(dim, &[index])?;
        let iax = out.require_dim(dim)?;
        out.values = out.values.index_axis_move(Axis(iax), 0);
        out.dims.remove(iax);
        out.coords.retain(|_, c| !c.dims.iter().any(|d| d == dim));
        Ok(out)
    }

    /// Slice `dim` to the half-open index range `start..end` (negative `end` counts from the back).
    pub fn slice_dim(&self, dim: &str, start: isize, end: Option<isize>) -> CalcResult<Self> {
        let iax = self.require_dim(dim)?;
        let n = self.values.shape()[iax] as isize;
        let stop = end.map(|e| if e < 0 { n + e } else { e }).unwrap_or(n);
        let indices = (start.max(0)..stop.max(0)).map(|i| i as usize).collect_vec();
        self.isel(dim, &indices)
    }

    /// Reduce over `dim` with `f` applied to each 1-D lane. The dimension and
    /// every coordinate along it are dropped.
    pub fn reduce_dim<F: FnMut(ArrayView1<f64>) -> f64>(&self, dim: &str, f: F) -> CalcResult<Self> {
        let iax = self.require_dim(dim)?;
        let values = self.values.map_axis(Axis(iax), f);
        let mut dims = self.dims.clone();
        dims.remove(iax);
        let coords = self
            .coords
            .iter()
            .filter(|(_, c)| !c.dims.iter().any(|d| d == dim))
            .map(|(k, c)| (k.clone(), c.clone()))
            .collect();
        Ok(Self { name: self.name.clone(), dims, values, coords, attrs: self.attrs.clone() })
    }

    /// Sum over `dim`, skipping NaNs.
    pub fn nansum(&self, dim: &str) -> CalcResult<Self> {
        self.reduce_dim(dim, |lane| nansum(lane))
    }

    /// Mean over `dim`, skipping NaNs.
    pub fn mean(&self, dim: &str) -> CalcResult<Self> {
        self.reduce_dim(dim, |lane| nanmean(lane))
    }

    /// Population standard deviation over `dim`, skipping NaNs.
    pub fn std(&self, dim: &str) -> CalcResult<Self> {
        self.reduce_dim(dim, |lane| nanstd(lane))
    }

    /// Weighted mean over `dim`. Points where the data are NaN do not contribute
    /// their weight. `weights` must broadcast against this field.
    pub fn weighted_mean(&self, dim: &str, weights: &Field) -> CalcResult<Self> {
        let iax = self.require_dim(dim)?;
        let w = weights.broadcast_to(&self.dims, self.shape())?;
        let values = Zip::from(self.values.lanes(Axis(iax)))
            .and(w.lanes(Axis(iax)))
            .map_collect(|x, w| weighted_nanmean(x, w));
        let mut dims = self.dims.clone();
        dims.remove(iax);
        let coords = self
            .coords
            .iter()
            .filter(|(_, c)| !c.dims.iter().any(|d| d == dim))
            .map(|(k, c)| (k.clone(), c.clone()))
            .collect();
        Ok(Self { name: self.name.clone(), dims, values, coords, attrs: self.attrs.clone() })
    }

    /// First difference along `dim` (`x[i+1] - x[i]`), one element shorter.
    pub fn diff(&self, dim: &str) -> CalcResult<Self> {
        let upper = self.slice_dim(dim, 1, None)?;
        let lower = self.slice_dim(dim, 0, Some(-1))?;
        let mut out = upper.clone();
        out.values = &upper.values - &lower.values;
        out.coords.retain(|_, c| !c.dims.iter().any(|d| d == dim));
        Ok(out)
    }

    /// Rename dimension `old_dim` to `new_dim` and replace its coordinate with `coord`.
    /// Any coordinate along the old dimension is dropped.
    pub fn replace_dim(&mut self, old_dim: &str, new_dim: &str, coord: Option<Coord>) -> CalcResult<()> {
        let iax = self.require_dim(old_dim)?;
        self.coords.retain(|_, c| !c.dims.iter().any(|d| d == old_dim));
        self.dims[iax] = new_dim.to_string();
        if let Some(c) = coord {
            self.set_coord(new_dim, c)?;
        }
        Ok(())
    }

    /// Apply `f` to every value.
    pub fn map<F: FnMut(f64) -> f64>(&self, mut f: F) -> Self {
        let mut out = self.clone();
        out.values.mapv_inplace(|v| f(v));
        out
    }

    pub fn scale(&self, factor: f64) -> Self {
        self.map(|v| v * factor)
    }

    /// Combine two fields element-wise after aligning their dimensions by name.
    ///
    /// The output dimensions are this field's, followed by any of `other`'s that this
    /// field lacks. Coordinates from both are kept, this field's taking precedence.
    pub fn zip_with<F: FnMut(f64, f64) -> f64>(&self, other: &Field, mut f: F) -> CalcResult<Self> {
        let mut dims = self.dims.clone();
        let mut shape = self.shape().to_vec();
        for (d, &n) in other.dims.iter().zip(other.shape()) {
            match self.dim_len(d) {
                Some(m) if m != n => {
                    return Err(CalcError::shape_mismatch(format!(
                        "dimension '{d}' has length {m} in '{}' but {n} in '{}'",
                        self.name, other.name
                    ))
                    .into())
                }
                Some(_) => {}
                None => {
                    dims.push(d.clone());
                    shape.push(n);
                }
            }
        }

        let a = self.broadcast_to(&dims, &shape)?;
        let b = other.broadcast_to(&dims, &shape)?;
        let values = Zip::from(&a).and(&b).map_collect(|&x, &y| f(x, y));

        let mut out = Self { name: self.name.clone(), dims, values, coords: IndexMap::new(), attrs: self.attrs.clone() };
        for (k, c) in self.coords.iter().chain(other.coords.iter()) {
            if !out.coords.contains_key(k) {
                out.try_set_coord(k, c.clone());
            }
        }
        Ok(out)
    }

    pub fn add(&self, other: &Field) -> CalcResult<Self> {
        self.zip_with(other, |a, b| a + b)
    }

    pub fn sub(&self, other: &Field) -> CalcResult<Self> {
        self.zip_with(other, |a, b| a - b)
    }

    pub fn mul(&self, other: &Field) -> CalcResult<Self> {
        self.zip_with(other, |a, b| a * b)
    }

    pub fn div(&self, other: &Field) -> CalcResult<Self> {
        self.zip_with(other, |a, b| a / b)
    }

    /// Return this field's values laid out along `target_dims` with shape `target_shape`,
    /// broadcasting over dimensions it does not have.
    pub fn broadcast_to(&self, target_dims: &[String], target_shape: &[usize]) -> CalcResult<ArrayD<f64>> {
        let mut positions = Vec::with_capacity(self.dims.len());
        for d in self.dims.iter() {
            let pos = target_dims.iter().position(|t| t == d).ok_or_else(|| {
                CalcError::shape_mismatch(format!(
                    "cannot broadcast '{}' with dims {:?} to dims {target_dims:?}",
                    self.name, self.dims
                ))
            })?;
            positions.push(pos);
        }
        let mut perm = (0..self.dims.len()).collect_vec();
        perm.sort_by_key(|&i| positions[i]);

        let mut view = self.values.view().permuted_axes(perm.as_slice());
        for (i, d) in target_dims.iter().enumerate() {
            if !self.dims.contains(d) {
                view = view.insert_axis(Axis(i));
            }
        }
        let broadcast = view.broadcast(target_shape).ok_or_else(|| {
            CalcError::shape_mismatch(format!(
                "cannot broadcast '{}' with shape {:?} to shape {target_shape:?}",
                self.name,
                self.shape()
            ))
        })?;
        Ok(broadcast.to_owned())
    }

    /// Reorder the dimensions. `order` must be a permutation of the current dimensions.
    pub fn transpose<S: AsRef<str>>(&self, order: &[S]) -> CalcResult<Self> {
        if order.len() != self.dims.len() {
            return Err(CalcError::shape_mismatch(format!(
                "cannot transpose '{}' with dims {:?} to {} dims",
                self.name,
                self.dims,
                order.len()
            ))
            .into());
        }
        let perm = order
            .iter()
            .map(|d| self.require_dim(d.as_ref()))
            .collect::<CalcResult<Vec<_>>>()?;
        let values = self.values.view().permuted_axes(perm.as_slice()).to_owned();
        let dims = order.iter().map(|d| d.as_ref().to_string()).collect();
        Ok(Self { name: self.name.clone(), dims, values, coords: self.coords.clone(), attrs: self.attrs.clone() })
    }

    /// Transpose to time, vertical, lat, lon order; unrecognized dimensions keep
    /// their relative order and go last.
    pub fn transpose_canonical(&self) -> CalcResult<Self> {
        let mut order = CANONICAL_DIM_ORDER
            .iter()
            .filter(|d| self.has_dim(d))
            .map(|d| d.to_string())
            .collect_vec();
        for d in self.dims.iter() {
            if !order.contains(d) {
                order.push(d.clone());
            }
        }
        self.transpose(&order)
    }

    /// Select the single index along `dim` whose coordinate value is within `tol`
    /// of `value`, keeping the dimension (length 1).
    pub fn sel_nearest(&self, dim: &str, value: f64, tol: f64) -> CalcResult<Self> {
        let coord = self.require_coord(dim)?;
        let idx = coord
            .values
            .iter()
            .position(|&v| (v - value).abs() <= tol)
            .ok_or_else(|| {
                CalcError::shape_mismatch(format!("no '{dim}' coordinate value of '{}' matches {value}", self.name))
            })?;
        self.isel(dim, &[idx])
    }

    /// Drop length-1 dimensions (and their coordinates).
    pub fn squeeze(&self) -> Self {
        let mut out = self.clone();
        let mut iax = 0;
        while iax < out.dims.len() {
            if out.values.shape()[iax] == 1 {
                let dim = out.dims.remove(iax);
                out.values = out.values.index_axis_move(Axis(iax), 0);
                out.coords.retain(|_, c| !c.dims.contains(&dim));
            } else {
                iax += 1;
            }
        }
        out
    }
}

impl approx::AbsDiffEq for Field {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        f64::EPSILON
    }

    /// Equal if dimensions, shape, and every value match; NaNs compare equal to NaNs.
    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        if self.dims != other.dims || self.shape() != other.shape() {
            return false;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .all(|(a, b)| (a.is_nan() && b.is_nan()) || f64::abs_diff_eq(a, b, epsilon))
    }
}

fn nansum(lane: ArrayView1<f64>) -> f64 {
    lane.iter().filter(|v| !v.is_nan()).sum()
}

fn nanmean(lane: ArrayView1<f64>) -> f64 {
    let (sum, n) = lane
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

fn nanstd(lane: ArrayView1<f64>) -> f64 {
    let mean = nanmean(lane);
    if mean.is_nan() {
        return f64::NAN;
    }
    let (sq, n) = lane
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, n), v| (s + (v - mean).powi(2), n + 1));
    (sq / n as f64).sqrt()
}

fn weighted_nanmean(x: ArrayView1<f64>, w: ArrayView1<f64>) -> f64 {
    let (num, den) = x
        .iter()
        .zip(w.iter())
        .filter(|(v, _)| !v.is_nan())
        .fold((0.0, 0.0), |(num, den), (v, w)| (num + v * w, den + w));
    num / den
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn time_lat_field() -> Field {
        let values = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]].into_dyn();
        let mut f = Field::new("x", &["time", "lat"], values).unwrap();
        f.set_coord("lat", Coord::dim1("lat", vec![-10.0, 0.0, 10.0])).unwrap();
        f.set_coord("time", Coord::dim1("time", vec![0.0, 31.0])).unwrap();
        f
    }

    #[test]
    fn test_broadcast_add_by_name() {
        let a = time_lat_field();
        let b = Field::new("y", &["lat"], array![10.0, 20.0, 30.0].into_dyn()).unwrap();
        let c = a.add(&b).unwrap();
        assert_eq!(c.dims(), ["time", "lat"]);
        assert_abs_diff_eq!(c.values()[[1, 2]], 36.0);

        // Other operand has a dimension we lack: it is appended.
        let c = b.mul(&a).unwrap();
        assert_eq!(c.dims(), ["lat", "time"]);
        assert_abs_diff_eq!(c.values()[[2, 1]], 180.0);
        assert!(c.has_coord("time"));
    }

    #[test]
    fn test_mismatched_lengths_error() {
        let a = time_lat_field();
        let b = Field::new("y", &["lat"], array![1.0, 2.0].into_dyn()).unwrap();
        let err = a.add(&b).unwrap_err();
        assert!(matches!(err.current_context(), CalcError::ShapeMismatch(_)));
    }

    #[test]
    fn test_reductions_skip_nan() {
        let values = array![[1.0, f64::NAN], [3.0, 5.0]].into_dyn();
        let f = Field::new("x", &["time", "lat"], values).unwrap();
        let s = f.nansum("time").unwrap();
        assert_eq!(s.dims(), ["lat"]);
        assert_abs_diff_eq!(s.values()[[0]], 4.0);
        assert_abs_diff_eq!(s.values()[[1]], 5.0);

        let m = f.mean("lat").unwrap();
        assert_abs_diff_eq!(m.values()[[0]], 1.0);
        assert_abs_diff_eq!(m.values()[[1]], 4.0);

        let sd = f.std("lat").unwrap();
        assert_abs_diff_eq!(sd.values()[[1]], 1.0);
    }

    #[test]
    fn test_weighted_mean() {
        let f = time_lat_field();
        let w = Field::new("w", &["time"], array![1.0, 3.0].into_dyn()).unwrap();
        let m = f.weighted_mean("time", &w).unwrap();
        assert_eq!(m.dims(), ["lat"]);
        assert_abs_diff_eq!(m.values()[[0]], 3.25);
        assert!(!m.has_coord("time"));
        assert!(m.has_coord("lat"));
    }

    #[test]
    fn test_rename_and_isel() {
        let mut f = time_lat_field();
        f.rename("lat", "latitude");
        assert_eq!(f.dims(), ["time", "latitude"]);
        assert_eq!(f.coord("latitude").unwrap().dims, ["latitude"]);

        let sub = f.isel("latitude", &[0, 2]).unwrap();
        assert_eq!(sub.shape(), [2, 2]);
        assert_eq!(sub.coord("latitude").unwrap().to_vec(), vec![-10.0, 10.0]);
        assert!(f.isel("latitude", &[3]).is_err());
    }

    #[test]
    fn test_diff_and_transpose() {
        let f = time_lat_field();
        let d = f.diff("lat").unwrap();
        assert_eq!(d.shape(), [2, 2]);
        assert_abs_diff_eq!(d.values()[[0, 0]], 1.0);
        assert!(!d.has_coord("lat"));

        let t = Field::new("x", &["lat", "time"], ArrayD::zeros(IxDyn(&[3, 2])))
            .unwrap()
            .transpose_canonical()
            .unwrap();
        assert_eq!(t.dims(), ["time", "lat"]);
    }

    #[test]
    fn test_index_dim() {
        let f = time_lat_field();
        let one = f.index_dim("time", 1).unwrap();
        assert_eq!(one.dims(), ["lat"]);
        assert_eq!(one.values().iter().copied().collect::<Vec<_>>(), vec![4.0, 5.0, 6.0]);
        assert!(!one.has_coord("time"));
        assert!(one.has_coord("lat"));
    }

    #[test]
    fn test_coord_must_fit() {
        let mut f = time_lat_field();
        assert!(!f.try_set_coord("pk", Coord::dim1("phalf", vec![0.0, 1.0])));
        assert!(f.set_coord("lat", Coord::dim1("lat", vec![0.0])).is_err());
    }
}
