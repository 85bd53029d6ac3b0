//! Loading the inputs of a calculation: raw fields from the data source, grid
//! attributes from the model, and the pressure pseudo-variables.
//!
//! Everything leaving this module uses the internal names of [`crate::names`],
//! carries the model's grid attributes, and (if time-defined) is restricted to the
//! months of the calculation's output interval.
use chrono::NaiveDateTime;
use error_stack::ResultExt;
use strum::IntoEnumIterator;

use crate::catalog::{DataLoaderAttrs, InputData, Model, PressureKind, Run, Var, VarInput, VertDef};
use crate::config::{DtypeInTime, DtypeInVert};
use crate::error::{CalcError, CalcResult};
use crate::field::{Coord, Field};
use crate::names::{GridAttr, PFULL_STR, PLEVEL_STR, TIME_STR};
use crate::resolver::VerticalCoords;
use crate::times::{to_desired_dates, TimeOffset};
use crate::vertcoord::to_pfull_from_phalf;

const GRID_RTOL: f64 = 1e-5;
const GRID_ATOL: f64 = 1e-8;

/// Rename any raw-data aliases of grid attributes to their internal names.
pub fn rename_grid_aliases(field: &mut Field) {
    for attr in GridAttr::iter() {
        for alias in attr.aliases() {
            if *alias != attr.internal_name() && (field.has_dim(alias) || field.has_coord(alias)) {
                field.rename(alias, attr.internal_name());
            }
        }
    }
}

fn allclose(a: &Coord, b: &Coord) -> bool {
    a.dims == b.dims
        && a.values.shape() == b.values.shape()
        && a
            .values
            .iter()
            .zip(b.values.iter())
            .all(|(x, y)| (x - y).abs() <= GRID_ATOL + GRID_RTOL * y.abs())
}

/// Make the field's grid attributes agree with the model's.
///
/// For each grid attribute of the model, in [`GridAttr`] order: values equal to
/// the model's are kept; values within floating-point tolerance of them are
/// silently replaced by them; other values are reported and replaced where the
/// shapes allow. Attributes the field lacks are copied from the model if they
/// lie along the field's dimensions.
pub fn reconcile_grid(field: &mut Field, model: &Model) {
    for attr in GridAttr::iter() {
        let Some(model_coord) = model.grid_attr(attr) else {
            continue;
        };
        let name = attr.internal_name();
        match field.coord(name) {
            Some(c) if c == model_coord => {}
            Some(c) if allclose(c, model_coord) => {
                log::debug!(
                    "Values for '{name}' are nearly (but not exactly) the same in the data and model '{}'; using the model's",
                    model.name
                );
                field.try_set_coord(name, model_coord.clone());
            }
            Some(c) => {
                log::info!(
                    "Model coordinates for '{name}' do not match those in the data: {:?} vs. {:?}",
                    c.to_vec(),
                    model_coord.to_vec()
                );
                field.try_set_coord(name, model_coord.clone());
            }
            None => {
                field.try_set_coord(name, model_coord.clone());
            }
        }
    }
}

/// Loads the inputs of one calculation, remembering surface pressure and the
/// vertical coordinates between loads.
pub struct VariableLoader<'a> {
    model: &'a Model,
    run: &'a Run,
    attrs: DataLoaderAttrs,
    time_offset: Option<TimeOffset>,
    months: Vec<u32>,
    ps: Option<Field>,
    level: Option<Coord>,
    pfull_coord: Option<Coord>,
}

impl<'a> VariableLoader<'a> {
    pub fn new(model: &'a Model, run: &'a Run, attrs: DataLoaderAttrs, time_offset: Option<TimeOffset>) -> Self {
        let months = attrs.intvl_out.month_indices();
        Self { model, run, attrs, time_offset, months, ps: None, level: None, pfull_coord: None }
    }

    fn dtype_in_vert(&self) -> CalcResult<DtypeInVert> {
        self.attrs
            .dtype_in_vert
            .ok_or_else(|| CalcError::unknown_vertical_encoding("none").into())
    }

    /// The full-level coordinate of hybrid data, once a vertically defined field has been loaded
    pub fn pfull_coord(&self) -> Option<&Coord> {
        self.pfull_coord.as_ref()
    }

    /// Surface pressure, if it has been loaded
    pub fn cached_surface_pressure(&self) -> Option<&Field> {
        self.ps.as_ref()
    }

    /// Load one input of a transform function.
    pub fn load_input(&mut self, input: &VarInput, start: NaiveDateTime, end: NaiveDateTime) -> CalcResult<InputData> {
        match input {
            VarInput::Constant(c) => Ok(InputData::Constant(*c)),
            VarInput::Var(var) => Ok(InputData::Field(self.load(var, start, end)?)),
        }
    }

    /// Load a variable between `start` and `end`.
    pub fn load(&mut self, var: &Var, start: NaiveDateTime, end: NaiveDateTime) -> CalcResult<Field> {
        log::info!("Getting input data: {}", var.name);
        if let Some(kind) = var.pressure_kind() {
            let data = self.pressure(kind, start, end)?;
            return if data.has_dim(TIME_STR) { to_desired_dates(&data, &self.months) } else { Ok(data) };
        }

        if var.func.is_none() {
            if let Some(attr) = GridAttr::from_intrinsic_var_name(&var.name) {
                return self.model.grid_field(attr);
            }
        }

        let data = self.fetch(var, start, end)?;
        if var.def_time && self.attrs.dtype_in_time != DtypeInTime::Av && data.has_dim(TIME_STR) {
            to_desired_dates(&data, &self.months)
        } else {
            Ok(data)
        }
    }

    /// Fetch a variable from the data source, computing it from its inputs if it
    /// has a transform function, and normalize its grid.
    fn fetch(&mut self, var: &Var, start: NaiveDateTime, end: NaiveDateTime) -> CalcResult<Field> {
        let mut data = match &var.func {
            Some(func) => {
                let mut inputs = Vec::with_capacity(var.variables.len());
                for input in var.variables.iter() {
                    inputs.push(self.load_input(input, start, end)?);
                }
                func(&inputs).attach_printable_lazy(|| format!("while computing '{}'", var.name))?
            }
            None => self
                .run
                .data_source
                .load_variable(var, start, end, self.time_offset.as_ref(), &self.attrs)
                .attach_printable_lazy(|| format!("while loading '{}' from run '{}'", var.name, self.run.name))?,
        };
        rename_grid_aliases(&mut data);
        reconcile_grid(&mut data, self.model);

        if self.attrs.dtype_in_vert == Some(DtypeInVert::Pressure) && self.level.is_none() {
            self.level = data.coord(PLEVEL_STR).cloned();
        }
        let is_sigma = self.attrs.dtype_in_vert == Some(DtypeInVert::Sigma);
        if is_sigma && var.def_vert.is_defined() && self.pfull_coord.is_none() {
            self.pfull_coord = data.coord(PFULL_STR).cloned();
        }
        if is_sigma && var.def_vert == VertDef::Half {
            let pfull = self
                .pfull_coord
                .as_ref()
                .or_else(|| self.model.grid_attr(GridAttr::Pfull))
                .cloned()
                .ok_or_else(|| CalcError::missing_coordinate(&var.name, PFULL_STR))?;
            data = to_pfull_from_phalf(&data, &pfull)?.with_name(&var.name);
        }
        Ok(data)
    }

    /// Surface pressure over the whole date range, fetched and reconciled only once.
    pub fn surface_pressure(&mut self, start: NaiveDateTime, end: NaiveDateTime) -> CalcResult<Field> {
        if let Some(ps) = &self.ps {
            return Ok(ps.clone());
        }
        let ps = self.fetch(&Var::ps(), start, end)?;
        self.ps = Some(ps.clone());
        Ok(ps)
    }

    /// Surface pressure restricted to the months of the output interval.
    pub fn surface_pressure_on_desired_dates(&mut self, start: NaiveDateTime, end: NaiveDateTime) -> CalcResult<Field> {
        let ps = self.surface_pressure(start, end)?;
        if ps.has_dim(TIME_STR) {
            to_desired_dates(&ps, &self.months)
        } else {
            Ok(ps)
        }
    }

    /// Full-level pressure or level thickness over the whole date range.
    pub fn pressure(&mut self, kind: PressureKind, start: NaiveDateTime, end: NaiveDateTime) -> CalcResult<Field> {
        let encoding = self.dtype_in_vert()?;
        let ps = self.surface_pressure(start, end)?;
        let coords = VerticalCoords::new(encoding, self.model, self.level.as_ref())?;
        coords.pressure(kind, &ps)
    }
}
