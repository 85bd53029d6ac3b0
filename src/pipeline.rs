//! The reduction stages applied to a computed field, in order: vertical
//! reduction, then time (and region) reductions.
//!
//! Each stage is a separate type consuming the previous one, so a field can
//! only move forward through the pipeline:
//!
//! ```text
//! RawField --reduce_vertically--> VertReducedField --reduce_in_time--> OutputBundle
//! ```
use chrono::NaiveDateTime;
use indexmap::IndexMap;

use crate::catalog::{PressureKind, Var};
use crate::config::{DtypeInTime, DtypeInVert, VertReduction};
use crate::error::{CalcError, CalcResult};
use crate::field::{Coord, Field};
use crate::loader::VariableLoader;
use crate::names::{GRAV_EARTH, TIME_STR};
use crate::netcdf_io::Dataset;
use crate::reductions::{OutputReduction, TimeReduction};
use crate::regions::Region;
use crate::times::{time_weights, yearly_average};
use crate::units::vert_int_units;
use crate::vertcoord::{int_dp_g, to_hpa, vert_coord_name};

/// Suffix of the auxiliary coordinate holding a region's average pressure
pub const REGION_PRESSURE_SUFFIX: &str = "_pressure";

/// The result of one output reduction.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputData {
    /// The reduced field on the full grid
    Gridded(Field),
    /// The reduced regional average, keyed by region name
    Regional(IndexMap<String, Field>),
}

impl OutputData {
    /// The fields as they are written to a file: a gridded output is one variable
    /// named after the calculation's variable, a regional output one variable per region.
    pub fn to_dataset(&self, var_name: &str) -> Dataset {
        match self {
            Self::Gridded(f) => Dataset::from_field(f.clone().with_name(var_name)),
            Self::Regional(regions) => {
                let mut ds = Dataset::new();
                for (name, f) in regions {
                    ds.insert(f.clone().with_name(name));
                }
                ds
            }
        }
    }

    /// Rebuild from a file's contents, the inverse of [`OutputData::to_dataset`].
    pub fn from_dataset(ds: Dataset, var_name: &str, regional: bool) -> CalcResult<Self> {
        if regional {
            Ok(Self::Regional(ds.fields))
        } else {
            ds.fields
                .get(var_name)
                .cloned()
                .map(Self::Gridded)
                .ok_or_else(|| CalcError::context(format!("no variable '{var_name}' in the output file")).into())
        }
    }

    fn for_each_field<F: FnMut(&mut Field)>(&mut self, mut f: F) {
        match self {
            Self::Gridded(field) => f(field),
            Self::Regional(regions) => regions.values_mut().for_each(f),
        }
    }

    /// Apply `f` to every field, stopping at the first error.
    pub fn try_map_fields<F: FnMut(Field) -> CalcResult<Field>>(self, mut f: F) -> CalcResult<Self> {
        match self {
            Self::Gridded(field) => Ok(Self::Gridded(f(field)?)),
            Self::Regional(regions) => regions
                .into_iter()
                .map(|(name, field)| Ok((name, f(field)?)))
                .collect::<CalcResult<IndexMap<_, _>>>()
                .map(Self::Regional),
        }
    }

    /// Set the `units` and `description` attributes of every field, rewriting the
    /// units for a vertical integral.
    pub fn add_metadata(&mut self, units: &str, description: &str, dtype_out_vert: Option<VertReduction>) {
        let units = match dtype_out_vert {
            Some(VertReduction::VertInt) => vert_int_units(units),
            _ => units.to_string(),
        };
        self.for_each_field(|f| {
            f.attrs.insert("units".to_string(), units.clone());
            f.attrs.insert("description".to_string(), description.to_string());
        });
    }
}

/// The outputs of one calculation, keyed by reduction and ordered by label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputBundle {
    outputs: IndexMap<OutputReduction, OutputData>,
}

impl OutputBundle {
    fn from_unsorted(mut outputs: IndexMap<OutputReduction, OutputData>) -> Self {
        outputs.sort_by(|a, _, b, _| a.label().cmp(&b.label()));
        Self { outputs }
    }

    /// See [`OutputData::add_metadata`].
    pub fn add_metadata(&mut self, units: &str, description: &str, dtype_out_vert: Option<VertReduction>) {
        for data in self.outputs.values_mut() {
            data.add_metadata(units, description, dtype_out_vert);
        }
    }

    pub fn get(&self, reduction: &OutputReduction) -> Option<&OutputData> {
        self.outputs.get(reduction)
    }

    pub fn labels(&self) -> Vec<String> {
        self.outputs.keys().map(|k| k.label()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OutputReduction, &OutputData)> {
        self.outputs.iter()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// Settings shared by the pipeline stages.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings<'a> {
    pub var: &'a Var,
    pub dtype_in_time: DtypeInTime,
    pub dtype_in_vert: Option<DtypeInVert>,
    pub dtype_out_vert: Option<VertReduction>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl PipelineSettings<'_> {
    /// Whether the data vary in time, so that reductions across years apply
    pub fn time_defined(&self) -> bool {
        self.var.def_time && self.dtype_in_time != DtypeInTime::Av
    }

    /// Whether region outputs should carry the regional average pressure
    pub fn wants_region_pressure(&self) -> bool {
        self.var.def_vert.is_defined()
            && self.dtype_in_vert == Some(DtypeInVert::Sigma)
            && self.dtype_out_vert.is_none()
    }
}

/// The output of the transform function, before any reduction.
#[derive(Debug, Clone)]
pub struct RawField(Field);

impl RawField {
    pub fn new(field: Field) -> Self {
        Self(field)
    }

    /// Apply the requested vertical reduction, if any, to a vertically defined field:
    /// the mass-weighted integral `sum(x * dp) / g`, or for `vert_av` that integral
    /// divided by the column mass `ps / g`.
    pub fn reduce_vertically(
        self,
        settings: &PipelineSettings,
        loader: &mut VariableLoader,
    ) -> CalcResult<VertReducedField> {
        let field = self.0;
        let Some(mode) = settings.dtype_out_vert.filter(|_| settings.var.def_vert.is_defined()) else {
            return Ok(VertReducedField(field));
        };
        vert_coord_name(&field)?;

        let dp = loader.load(&Var::pressure(PressureKind::Dp), settings.start, settings.end)?;
        let mut reduced = int_dp_g(&field, &dp)?;
        if mode == VertReduction::VertAv {
            let ps = loader.surface_pressure_on_desired_dates(settings.start, settings.end)?;
            reduced = reduced.scale(GRAV_EARTH).div(&ps)?;
        }
        Ok(VertReducedField(reduced.with_name(&field.name)))
    }
}

/// A field after vertical reduction, ready for the time reductions.
#[derive(Debug, Clone)]
pub struct VertReducedField(Field);

impl VertReducedField {
    pub fn field(&self) -> &Field {
        &self.0
    }

    /// Apply every output reduction, returning the results ordered by label.
    pub fn reduce_in_time(
        self,
        reductions: &[OutputReduction],
        regions: &[Region],
        settings: &PipelineSettings,
        loader: &mut VariableLoader,
    ) -> CalcResult<OutputBundle> {
        let full = self.0;
        let dt = if settings.time_defined() && full.has_dim(TIME_STR) {
            Some(time_weights(&full)?)
        } else {
            None
        };
        let yearly = match &dt {
            Some(dt) => yearly_average(&full, dt)?,
            None => full.clone(),
        };

        let mut outputs = IndexMap::new();
        for reduction in reductions {
            let data = match reduction {
                OutputReduction::Gridded(r) => OutputData::Gridded(r.apply(&yearly)?),
                OutputReduction::Regional(r) => {
                    OutputData::Regional(region_calcs(*r, &full, dt.as_ref(), regions, settings, loader)?)
                }
            };
            outputs.insert(*reduction, data);
        }
        Ok(OutputBundle::from_unsorted(outputs))
    }
}

/// Apply `reduction` in every region. For hybrid-coordinate data that were not
/// vertically reduced, each region's output also gets the same reduction of the
/// pressure (hPa) as a `<region>_pressure` coordinate; for `std` the pressure
/// average is attached instead.
fn region_calcs(
    reduction: TimeReduction,
    full: &Field,
    dt: Option<&Field>,
    regions: &[Region],
    settings: &PipelineSettings,
    loader: &mut VariableLoader,
) -> CalcResult<IndexMap<String, Field>> {
    let pressure = if settings.wants_region_pressure() {
        Some(loader.load(&Var::pressure(PressureKind::P), settings.start, settings.end)?)
    } else {
        None
    };

    let mut out = IndexMap::new();
    for region in regions {
        let mut data = region.reduce(reduction, full, dt)?;
        if let Some(p) = &pressure {
            let p_reduction = if reduction == TimeReduction::Std { TimeReduction::Av } else { reduction };
            let p_dt = dt.filter(|_| p.has_dim(TIME_STR));
            let p_reg = to_hpa(&region.reduce(p_reduction, p, p_dt)?);
            let coord = Coord::new(p_reg.dims(), p_reg.values().clone())?;
            let name = format!("{}{REGION_PRESSURE_SUFFIX}", region.name);
            if !data.try_set_coord(&name, coord) {
                log::debug!("Region pressure for '{}' does not fit its output; not attached", region.name);
            }
        }
        out.insert(region.name.clone(), data);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    use crate::reductions::normalize_reductions;
    use crate::test_utils::{
        example_loader_attrs, example_model, example_regions, example_run, example_start_end, t_surf, temp,
        SyntheticSource,
    };

    fn settings(var: &Var, dtype_out_vert: Option<VertReduction>) -> PipelineSettings<'_> {
        let (start, end) = example_start_end();
        PipelineSettings {
            var,
            dtype_in_time: DtypeInTime::Ts,
            dtype_in_vert: Some(DtypeInVert::Sigma),
            dtype_out_vert,
            start,
            end,
        }
    }

    #[test]
    fn test_vert_av_of_constant_is_constant() {
        let model = example_model();
        let run = example_run(SyntheticSource::shared());
        let var = temp();
        let s = settings(&var, Some(VertReduction::VertAv));
        let mut loader = VariableLoader::new(&model, &run, example_loader_attrs(), None);
        let data = loader.load(&var, s.start, s.end).unwrap().map(|_| 5.0);
        let reduced = RawField::new(data).reduce_vertically(&s, &mut loader).unwrap();
        assert_eq!(reduced.field().dims(), ["time", "lat", "lon"]);
        assert!(reduced.field().values().iter().all(|v| (v - 5.0).abs() < 1e-9));
    }

    #[test]
    fn test_vert_int_needs_vertical_dim() {
        let model = example_model();
        let run = example_run(SyntheticSource::shared());
        let var = temp();
        let s = settings(&var, Some(VertReduction::VertInt));
        let mut loader = VariableLoader::new(&model, &run, example_loader_attrs(), None);
        let flat = loader.load(&t_surf(), s.start, s.end).unwrap();
        let err = RawField::new(flat).reduce_vertically(&s, &mut loader).unwrap_err();
        assert!(matches!(err.current_context(), CalcError::MissingDimension { .. }));
    }

    #[test]
    fn test_time_and_region_reductions() {
        let model = example_model();
        let run = example_run(SyntheticSource::shared());
        let var = t_surf();
        let s = settings(&var, None);
        let mut loader = VariableLoader::new(&model, &run, example_loader_attrs(), None);
        let data = loader.load(&var, s.start, s.end).unwrap();
        let reductions = normalize_reductions(
            ["reg.av", "ts", "av", "std"].iter().map(|l| l.parse::<OutputReduction>().unwrap()),
        );
        let bundle = RawField::new(data)
            .reduce_vertically(&s, &mut loader)
            .unwrap()
            .reduce_in_time(&reductions, &example_regions(), &s, &mut loader)
            .unwrap();
        assert_eq!(bundle.labels(), ["av", "reg.av", "std", "ts"]);

        let Some(OutputData::Gridded(ts)) = bundle.get(&"ts".parse().unwrap()) else {
            panic!("ts should be gridded");
        };
        assert_eq!(ts.dims(), ["year", "lat", "lon"]);
        let Some(OutputData::Gridded(std)) = bundle.get(&"std".parse().unwrap()) else {
            panic!("std should be gridded");
        };
        // Each year's mean increases by 1.2 (0.1 per month)
        assert_abs_diff_eq!(std.values()[[0, 0]], (2.0f64 * 1.2 * 1.2 / 3.0).sqrt(), epsilon = 1e-2);

        let Some(OutputData::Regional(regs)) = bundle.get(&"reg.av".parse().unwrap()) else {
            panic!("reg.av should be regional");
        };
        assert_eq!(regs.keys().collect::<Vec<_>>(), ["globe", "nh", "nh_land"]);
        assert_eq!(regs["nh"].ndim(), 0);
    }

    #[test]
    fn test_region_pressure_attached() {
        let model = example_model();
        let run = example_run(SyntheticSource::shared());
        let var = temp();
        let s = settings(&var, None);
        let mut loader = VariableLoader::new(&model, &run, example_loader_attrs(), None);
        let data = loader.load(&var, s.start, s.end).unwrap();
        let reductions = normalize_reductions(["reg.ts".parse::<OutputReduction>().unwrap()]);
        let bundle = RawField::new(data)
            .reduce_vertically(&s, &mut loader)
            .unwrap()
            .reduce_in_time(&reductions, &example_regions(), &s, &mut loader)
            .unwrap();
        let Some(OutputData::Regional(regs)) = bundle.get(&reductions[0]) else {
            panic!("reg.ts should be regional");
        };
        let globe = &regs["globe"];
        assert_eq!(globe.dims(), ["year", "pfull"]);
        let p = globe.coord("globe_pressure").unwrap();
        assert_eq!(p.dims, ["year", "pfull"]);
        // Pressure increases downward and is in hPa
        assert!(p.values.iter().all(|&v| v > 0.0 && v < 1100.0));
    }

    #[test]
    fn test_metadata() {
        let mut data = OutputData::Gridded(Field::scalar("x", 1.0));
        data.add_metadata("K", "Temperature", Some(VertReduction::VertInt));
        let OutputData::Gridded(f) = data else { unreachable!() };
        assert_eq!(f.attrs["units"], "(vertical integral of K): K kg m^-2");
        assert_eq!(f.attrs["description"], "Temperature");
    }
}
