//! Descriptions of variables, projects, models, and runs, and the interface to
//! the raw data source.
//!
//! These are owned by the caller and shared by reference (or `Arc`) across
//! calculations; a calculation never modifies them.
use std::fmt::Debug;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::{CatalogDefaults, DtypeInTime, DtypeInVert, IntervalIn};
use crate::error::{CalcError, CalcResult};
use crate::field::{Coord, Field};
use crate::names::GridAttr;
use crate::times::{IntervalOut, TimeOffset};

/// Function computing a variable from its inputs, in the order they were declared.
pub type TransformFn = Arc<dyn Fn(&[InputData]) -> CalcResult<Field> + Send + Sync>;

/// How a variable is defined vertically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VertDef {
    /// Not vertically defined
    #[default]
    None,
    /// Defined at full (layer center) levels
    Full,
    /// Defined at half (layer interface) levels
    Half,
}

impl VertDef {
    pub fn is_defined(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// The two pressure pseudo-variables, computed from surface pressure and the
/// vertical coordinate rather than read from the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum PressureKind {
    /// Full-level pressure
    #[strum(serialize = "p")]
    P,
    /// Level thickness
    #[strum(serialize = "dp")]
    Dp,
}

impl FromStr for PressureKind {
    type Err = CalcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "p" => Ok(Self::P),
            "dp" => Ok(Self::Dp),
            _ => Err(CalcError::unknown_pseudo_variable(s)),
        }
    }
}

/// An input to a variable's transform function.
#[derive(Clone)]
pub enum VarInput {
    Var(Arc<Var>),
    /// A numeric constant substituted directly
    Constant(f64),
}

impl Debug for VarInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Var(v) => write!(f, "Var({})", v.name),
            Self::Constant(c) => write!(f, "Constant({c})"),
        }
    }
}

impl From<Arc<Var>> for VarInput {
    fn from(value: Arc<Var>) -> Self {
        Self::Var(value)
    }
}

impl From<f64> for VarInput {
    fn from(value: f64) -> Self {
        Self::Constant(value)
    }
}

/// A loaded input handed to a transform function.
#[derive(Debug, Clone, PartialEq)]
pub enum InputData {
    Field(Field),
    Constant(f64),
}

impl InputData {
    /// The input as a field; constants become scalar fields.
    pub fn to_field(&self) -> Field {
        match self {
            Self::Field(f) => f.clone(),
            Self::Constant(c) => Field::scalar("constant", *c),
        }
    }

    pub fn as_field(&self) -> Option<&Field> {
        match self {
            Self::Field(f) => Some(f),
            Self::Constant(_) => None,
        }
    }
}

/// A physical variable: either read from the data source or computed from other variables.
#[derive(Clone)]
pub struct Var {
    pub name: String,
    pub domain: String,
    pub units: String,
    pub description: String,
    pub def_time: bool,
    pub def_vert: VertDef,
    pub def_lat: bool,
    pub def_lon: bool,
    /// Inputs of `func`; empty for variables read directly
    pub variables: Vec<VarInput>,
    pub func: Option<TransformFn>,
    /// Values outside this inclusive range are unphysical
    pub valid_range: Option<(f64, f64)>,
    /// Factor converting to the units used for presentation
    pub plot_units_conv: f64,
    /// Same as `plot_units_conv`, for the vertical integral
    pub vert_int_plot_units_conv: f64,
}

impl Debug for Var {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Var")
            .field("name", &self.name)
            .field("domain", &self.domain)
            .field("units", &self.units)
            .field("def_time", &self.def_time)
            .field("def_vert", &self.def_vert)
            .field("variables", &self.variables)
            .field("has_func", &self.func.is_some())
            .finish()
    }
}

impl Var {
    /// A time-dependent, horizontally-defined atmospheric variable with no
    /// vertical dependence; adjust with the `with_*` methods.
    pub fn new<S: ToString>(name: S) -> Self {
        Self {
            name: name.to_string(),
            domain: "atmos".to_string(),
            units: String::new(),
            description: String::new(),
            def_time: true,
            def_vert: VertDef::None,
            def_lat: true,
            def_lon: true,
            variables: vec![],
            func: None,
            valid_range: None,
            plot_units_conv: 1.0,
            vert_int_plot_units_conv: 1.0,
        }
    }

    pub fn with_units<S: ToString>(mut self, units: S) -> Self {
        self.units = units.to_string();
        self
    }

    pub fn with_description<S: ToString>(mut self, description: S) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_domain<S: ToString>(mut self, domain: S) -> Self {
        self.domain = domain.to_string();
        self
    }

    pub fn with_def_time(mut self, def_time: bool) -> Self {
        self.def_time = def_time;
        self
    }

    pub fn with_def_vert(mut self, def_vert: VertDef) -> Self {
        self.def_vert = def_vert;
        self
    }

    pub fn with_horizontal(mut self, def_lat: bool, def_lon: bool) -> Self {
        self.def_lat = def_lat;
        self.def_lon = def_lon;
        self
    }

    /// Compute this variable from `variables` with `func`.
    pub fn with_transform<F>(mut self, variables: Vec<VarInput>, func: F) -> Self
    where
        F: Fn(&[InputData]) -> CalcResult<Field> + Send + Sync + 'static,
    {
        self.variables = variables;
        self.func = Some(Arc::new(func));
        self
    }

    pub fn with_valid_range(mut self, min: f64, max: f64) -> Self {
        self.valid_range = Some((min, max));
        self
    }

    pub fn with_plot_units_conv(mut self, conv: f64, vert_int_conv: f64) -> Self {
        self.plot_units_conv = conv;
        self.vert_int_plot_units_conv = vert_int_conv;
        self
    }

    /// Surface pressure, fetched to build pressure and thickness fields.
    pub fn ps() -> Self {
        Self::new("ps").with_units("Pa").with_description("Surface pressure.")
    }

    /// Pressure (`p`) or pressure thickness (`dp`) of model levels.
    pub fn pressure(kind: PressureKind) -> Self {
        let description = match kind {
            PressureKind::P => "Pressure of model levels.",
            PressureKind::Dp => "Pressure thickness of model levels.",
        };
        Self::new(kind)
            .with_units("Pa")
            .with_description(description)
            .with_def_vert(VertDef::Full)
    }

    /// The pressure pseudo-variable this is, if any.
    ///
    /// Inside the crate pseudo-variables are always a [`PressureKind`], so an
    /// unrecognized name can only arise where one is parsed from a string, which
    /// fails with [`CalcError::UnknownPseudoVariable`].
    pub fn pressure_kind(&self) -> Option<PressureKind> {
        PressureKind::from_str(&self.name).ok()
    }

    /// Replace values outside [`Var::valid_range`] with NaN.
    pub fn mask_unphysical(&self, data: &Field) -> Field {
        match self.valid_range {
            Some((lo, hi)) => data.map(|v| if v < lo || v > hi { f64::NAN } else { v }),
            None => data.clone(),
        }
    }

    /// Convert to presentation units.
    pub fn to_plot_units(&self, data: &Field, vert_int: bool) -> Field {
        let conv = if vert_int { self.vert_int_plot_units_conv } else { self.plot_units_conv };
        data.scale(conv)
    }
}

/// Attributes of a calculation passed to the data source with each request.
#[derive(Debug, Clone, PartialEq)]
pub struct DataLoaderAttrs {
    pub domain: String,
    pub intvl_in: IntervalIn,
    pub dtype_in_time: DtypeInTime,
    pub dtype_in_vert: Option<DtypeInVert>,
    pub intvl_out: IntervalOut,
}

/// The source of raw model output.
pub trait DataSource: Send + Sync {
    /// Load `var` between `start` and `end` (inclusive) as a field with a `time`
    /// dimension when the variable is time-defined. Returned fields may use any of
    /// the raw-data aliases of grid attributes; they are renamed by the caller.
    fn load_variable(
        &self,
        var: &Var,
        start: NaiveDateTime,
        end: NaiveDateTime,
        time_offset: Option<&TimeOffset>,
        attrs: &DataLoaderAttrs,
    ) -> CalcResult<Field>;
}

/// A collection of models whose outputs are saved together.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub direc_out: PathBuf,
    /// Root of the tar archives; archiving is skipped when `None`.
    pub tar_direc_out: Option<PathBuf>,
    pub defaults: CatalogDefaults,
}

impl Project {
    pub fn new<S: ToString, P: Into<PathBuf>>(name: S, direc_out: P, tar_direc_out: Option<PathBuf>) -> Self {
        Self { name: name.to_string(), direc_out: direc_out.into(), tar_direc_out, defaults: Default::default() }
    }
}

/// A model: its canonical grid and the names of its runs.
#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub runs: Vec<String>,
    pub grid: IndexMap<GridAttr, Coord>,
    pub defaults: CatalogDefaults,
}

impl Model {
    pub fn new<S: ToString>(name: S) -> Self {
        Self { name: name.to_string(), runs: vec![], grid: IndexMap::new(), defaults: Default::default() }
    }

    pub fn with_run<S: ToString>(mut self, run: S) -> Self {
        self.runs.push(run.to_string());
        self
    }

    pub fn with_grid_attr(mut self, attr: GridAttr, coord: Coord) -> Self {
        self.grid.insert(attr, coord);
        self
    }

    pub fn grid_attr(&self, attr: GridAttr) -> Option<&Coord> {
        self.grid.get(&attr)
    }

    /// A grid attribute as a field, failing if the model lacks it.
    pub fn grid_field(&self, attr: GridAttr) -> CalcResult<Field> {
        self.grid_attr(attr)
            .map(|c| Field::from_coord(attr.internal_name(), c))
            .ok_or_else(|| CalcError::missing_coordinate(&self.name, attr).into())
    }

    pub fn has_run(&self, run: &str) -> bool {
        self.runs.iter().any(|r| r == run)
    }
}

/// One simulation of a model, with its default dates and where its data come from.
#[derive(Clone)]
pub struct Run {
    pub name: String,
    pub default_start_date: NaiveDateTime,
    pub default_end_date: NaiveDateTime,
    pub data_source: Arc<dyn DataSource>,
    pub defaults: CatalogDefaults,
}

impl Debug for Run {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Run")
            .field("name", &self.name)
            .field("default_start_date", &self.default_start_date)
            .field("default_end_date", &self.default_end_date)
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl Run {
    pub fn new<S: ToString>(
        name: S,
        default_start_date: NaiveDateTime,
        default_end_date: NaiveDateTime,
        data_source: Arc<dyn DataSource>,
    ) -> Self {
        Self {
            name: name.to_string(),
            default_start_date,
            default_end_date,
            data_source,
            defaults: Default::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: CatalogDefaults) -> Self {
        self.defaults = defaults;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_pressure_kind() {
        assert_eq!("dp".parse::<PressureKind>().unwrap(), PressureKind::Dp);
        let err = "pfull".parse::<PressureKind>().unwrap_err();
        assert!(matches!(err, CalcError::UnknownPseudoVariable(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
        assert_eq!(Var::pressure(PressureKind::P).pressure_kind(), Some(PressureKind::P));
        assert_eq!(Var::ps().pressure_kind(), None);
    }

    #[test]
    fn test_mask_and_plot_units() {
        let var = Var::new("precip").with_valid_range(0.0, 1.0).with_plot_units_conv(86400.0, 1.0);
        let data = Field::new("precip", &["lat"], array![-1.0, 0.5, 2.0].into_dyn()).unwrap();
        let masked = var.mask_unphysical(&data);
        assert!(masked.values()[[0]].is_nan());
        assert!(masked.values()[[2]].is_nan());
        assert_abs_diff_eq!(var.to_plot_units(&masked, false).values()[[1]], 43200.0);
    }

    #[test]
    fn test_transform_called_with_inputs() {
        let a = Arc::new(Var::new("a"));
        let var = Var::new("twice_a").with_transform(vec![a.into(), 2.0.into()], |inputs| {
            inputs[0].to_field().mul(&inputs[1].to_field())
        });
        let field = Field::new("a", &["lat"], array![1.0, 2.0].into_dyn()).unwrap();
        let func = var.func.as_ref().unwrap();
        let out = func(&[InputData::Field(field), InputData::Constant(2.0)]).unwrap();
        assert_eq!(out.values().iter().copied().collect::<Vec<_>>(), vec![2.0, 4.0]);
    }

    #[test]
    fn test_model_grid() {
        let model = Model::new("am2")
            .with_run("control")
            .with_grid_attr(GridAttr::Lat, Coord::dim1("lat", vec![-45.0, 45.0]));
        assert!(model.has_run("control"));
        assert!(!model.has_run("warming"));
        assert_eq!(model.grid_field(GridAttr::Lat).unwrap().dims(), ["lat"]);
        assert!(model.grid_field(GridAttr::Bk).is_err());
    }
}
