//! The calculation orchestrator: one variable of one run over one date range,
//! from raw data through every requested reduction to files on disk.
//!
//! A [`Calc`] is validated on construction. [`Calc::compute`] consumes it and
//! returns a [`CompletedCalc`] owning the freshly computed [`OutputBundle`], so
//! a calculation can only be computed once; build a new [`Calc`] to recompute.
//! Results are read back with [`Calc::load`] or [`CompletedCalc::load`], which
//! look in memory, then in the primary store, then in the archive.
use std::fmt::Display;
use std::sync::Arc;

use chrono::{Datelike, NaiveDateTime};
use error_stack::ResultExt;
use indexmap::IndexMap;
use serde::Serialize;

use crate::archive::{ArchiveService, NativeTarArchive};
use crate::catalog::{DataLoaderAttrs, Model, Project, Run, Var};
use crate::config::{
    CalcOptions, DateRange, DtypeInTime, DtypeInVert, IntervalIn, ResolutionChain, VertReduction,
};
use crate::error::{CalcError, CalcResult};
use crate::field::Field;
use crate::loader::VariableLoader;
use crate::logging::traced_stage;
use crate::names::{PFULL_STR, PLEVEL_STR, TIME_STR, YEAR_STR};
use crate::persist::{OutputPaths, PersistenceManager};
use crate::pipeline::{OutputBundle, OutputData, PipelineSettings, RawField, REGION_PRESSURE_SUFFIX};
use crate::reductions::{normalize_reductions, OutputReduction};
use crate::regions::Region;
use crate::times::{year_label, IntervalOut, TimeOffset};

/// Name the full-level coordinate is moved to when a region's own pressure takes its place
pub const PFULL_REF_STR: &str = "pfull_ref";

/// Everything that identifies a calculation, with all defaults resolved.
///
/// Saved (as JSON) in the `calc_options` attribute of every output file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalcIdentity {
    pub project: String,
    pub model: String,
    pub run: String,
    pub var: String,
    pub date_range: DateRange,
    pub intvl_in: IntervalIn,
    pub intvl_out: IntervalOut,
    pub dtype_in_time: DtypeInTime,
    pub dtype_in_vert: Option<DtypeInVert>,
    /// Never empty; deduplicated and sorted by label
    pub dtype_out_time: Vec<OutputReduction>,
    pub dtype_out_vert: Option<VertReduction>,
    pub level: Option<f64>,
    pub time_offset: Option<TimeOffset>,
    pub regions: Vec<String>,
}

impl CalcIdentity {
    /// The years covered, as used in file names
    pub fn year_label(&self) -> String {
        year_label(self.date_range.start.year(), self.date_range.end.year())
    }
}

/// Subsetting and conversions applied to a result after it is loaded.
///
/// The cached copy of a result is never subset; these apply only to what is returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOptions {
    /// Return only this region of a regional output. On hybrid coordinates without
    /// vertical reduction, the region's pressure becomes the `pfull` coordinate and
    /// the nominal levels move to `pfull_ref`.
    pub region: Option<String>,
    /// Indices along the `year` dimension (or `time`, if there is no `year`)
    pub time: Option<Vec<usize>>,
    /// Index of the model level to select on hybrid coordinates. On pressure levels
    /// any value selects the calculation's configured `level` instead.
    pub vert: Option<usize>,
    /// Not implemented
    pub lat: Option<f64>,
    /// Not implemented
    pub lon: Option<f64>,
    /// Replace values outside the variable's valid range with NaN
    pub mask_unphysical: bool,
    /// Convert to the variable's presentation units
    pub plot_units: bool,
}

/// A calculation ready to compute, or to load previously computed results.
pub struct Calc<'a> {
    model: &'a Model,
    run: &'a Run,
    var: &'a Var,
    regions: Vec<Region>,
    identity: CalcIdentity,
    persistence: PersistenceManager,
    cache: IndexMap<OutputReduction, OutputData>,
}

impl Display for Calc<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let id = &self.identity;
        write!(f, "Calc object: {}, {}, {}, {}", id.var, id.intvl_out.label(), id.model, id.run)
    }
}

impl<'a> Calc<'a> {
    /// Validate a calculation and resolve its defaults.
    ///
    /// Input settings missing from `options` are taken from the run, then the model,
    /// then the project. A missing date range means the run's default dates.
    pub fn new(
        project: &'a Project,
        model: &'a Model,
        run: &'a Run,
        var: &'a Var,
        regions: Vec<Region>,
        options: CalcOptions,
    ) -> CalcResult<Self> {
        if !model.has_run(&run.name) {
            return Err(CalcError::RunNotInModel { model: model.name.clone(), run: run.name.clone() }.into());
        }

        let given = options.as_defaults();
        let chain = ResolutionChain::new()
            .then("calculation options", &given)
            .then(format!("run '{}'", run.name), &run.defaults)
            .then(format!("model '{}'", model.name), &model.defaults)
            .then(format!("project '{}'", project.name), &project.defaults);
        let intvl_in = chain.require("intvl_in", |d| d.intvl_in)?;
        let dtype_in_time = chain.require("dtype_in_time", |d| d.dtype_in_time)?;
        let dtype_in_vert = chain.find(|d| d.dtype_in_vert);

        let date_range = match options.date_range {
            Some(range) => range,
            None => DateRange::new(run.default_start_date, run.default_end_date)?,
        };

        let dtype_out_time = normalize_reductions(options.dtype_out_time.into_vec());
        if dtype_out_time.is_empty() {
            return Err(CalcError::invalid_config("at least one output time reduction is required").into());
        }
        let time_defined = var.def_time && dtype_in_time != DtypeInTime::Av;
        if !time_defined {
            if let Some(r) = dtype_out_time.iter().find(|r| r.is_time_defined()) {
                return Err(CalcError::time_reduction_on_timeless(&var.name, r).into());
            }
        }
        if regions.is_empty() {
            if let Some(r) = dtype_out_time.iter().find(|r| r.is_regional()) {
                return Err(CalcError::MissingRegions(r.label()).into());
            }
        }

        let identity = CalcIdentity {
            project: project.name.clone(),
            model: model.name.clone(),
            run: run.name.clone(),
            var: var.name.clone(),
            date_range,
            intvl_in,
            intvl_out: options.intvl_out,
            dtype_in_time,
            dtype_in_vert,
            dtype_out_time,
            dtype_out_vert: options.dtype_out_vert,
            level: options.level,
            time_offset: options.time_offset,
            regions: regions.iter().map(|r| r.name.clone()).collect(),
        };
        let paths = OutputPaths::new(project, model, run, &identity);
        let persistence = PersistenceManager::new(paths, Arc::new(NativeTarArchive));

        Ok(Self { model, run, var, regions, identity, persistence, cache: IndexMap::new() })
    }

    /// Use `archive` to maintain the run's tar archive instead of the built-in tar writer.
    pub fn with_archive(mut self, archive: Arc<dyn ArchiveService>) -> Self {
        self.persistence = PersistenceManager::new(self.persistence.paths().clone(), archive);
        self
    }

    pub fn identity(&self) -> &CalcIdentity {
        &self.identity
    }

    pub fn paths(&self) -> &OutputPaths {
        self.persistence.paths()
    }

    fn settings(&self) -> PipelineSettings<'a> {
        PipelineSettings {
            var: self.var,
            dtype_in_time: self.identity.dtype_in_time,
            dtype_in_vert: self.identity.dtype_in_vert,
            dtype_out_vert: self.identity.dtype_out_vert,
            start: self.identity.date_range.start,
            end: self.identity.date_range.end,
        }
    }

    /// Load the inputs, apply the transform function and every reduction, and save
    /// each output, also to the run's archive if `write_to_tar` is set.
    pub fn compute(self, write_to_tar: bool) -> CalcResult<CompletedCalc<'a>> {
        log::info!("Computing {self}");
        let settings = self.settings();
        let attrs = DataLoaderAttrs {
            domain: self.var.domain.clone(),
            intvl_in: self.identity.intvl_in,
            dtype_in_time: self.identity.dtype_in_time,
            dtype_in_vert: self.identity.dtype_in_vert,
            intvl_out: self.identity.intvl_out.clone(),
        };
        let mut loader = VariableLoader::new(self.model, self.run, attrs, self.identity.time_offset);

        let raw = self.compute_raw(&mut loader, settings.start, settings.end)?;
        let vert_reduced = traced_stage(log::Level::Info, "Applying vertical reduction", || {
            RawField::new(raw).reduce_vertically(&settings, &mut loader)
        })?;
        let mut bundle = traced_stage(log::Level::Info, "Applying time reductions", || {
            vert_reduced.reduce_in_time(&self.identity.dtype_out_time, &self.regions, &settings, &mut loader)
        })?;
        bundle.add_metadata(&self.var.units, &self.var.description, self.identity.dtype_out_vert);

        let global_attrs = self.global_attrs()?;
        traced_stage(log::Level::Info, "Saving outputs", || -> CalcResult<()> {
            for (reduction, data) in bundle.iter() {
                self.persistence.save(data, reduction, &global_attrs, write_to_tar)?;
            }
            Ok(())
        })?;

        Ok(CompletedCalc { calc: self, bundle })
    }

    fn compute_raw(&self, loader: &mut VariableLoader, start: NaiveDateTime, end: NaiveDateTime) -> CalcResult<Field> {
        let Some(func) = &self.var.func else {
            return traced_stage(log::Level::Info, "Loading input data", || loader.load(self.var, start, end));
        };
        let inputs = traced_stage(log::Level::Info, "Loading input data", || {
            self.var
                .variables
                .iter()
                .map(|input| loader.load_input(input, start, end))
                .collect::<CalcResult<Vec<_>>>()
        })?;
        let out = traced_stage(log::Level::Info, "Applying transform function", || func(&inputs))
            .attach_printable_lazy(|| format!("while computing '{}'", self.var.name))?;
        Ok(out.with_name(&self.var.name))
    }

    fn global_attrs(&self) -> CalcResult<IndexMap<String, String>> {
        let options = serde_json::to_string(&self.identity)
            .change_context_lazy(|| CalcError::context("serializing the calculation options"))?;
        let history = format!(
            "{}: computed by aoscalc v{}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            env!("CARGO_PKG_VERSION")
        );
        Ok(IndexMap::from([("calc_options".to_string(), options), ("history".to_string(), history)]))
    }

    /// Load the output for `label` (e.g. `"av"`, `"reg.ts"`) from memory, the primary
    /// store, or the archive, in that order, then apply `opts`.
    pub fn load(&mut self, label: &str, opts: &LoadOptions) -> CalcResult<OutputData> {
        let reduction: OutputReduction = label.parse()?;
        let data = match self.cache.get(&reduction) {
            Some(data) => data.clone(),
            None => {
                let data = self
                    .persistence
                    .load(&reduction)
                    .attach_printable_lazy(|| format!("while loading '{label}' of {self}"))?;
                self.cache.insert(reduction, data.clone());
                data
            }
        };
        self.subset(data, &reduction, opts)
    }

    fn subset(&self, data: OutputData, reduction: &OutputReduction, opts: &LoadOptions) -> CalcResult<OutputData> {
        if opts.lat.is_some() || opts.lon.is_some() {
            return Err(CalcError::unimplemented("subsetting results by latitude or longitude").into());
        }

        let data = match (&opts.region, data) {
            (None, data) => data,
            (Some(_), OutputData::Gridded(_)) => {
                return Err(CalcError::unimplemented(format!("selecting a region from the gridded output '{reduction}'")).into())
            }
            (Some(name), OutputData::Regional(mut regions)) => {
                let mut field = regions.shift_remove(name).ok_or_else(|| CalcError::NotFound {
                    key: format!("region '{name}'"),
                    searched: vec![self.paths().file_name(reduction)],
                })?;
                if self.settings().wants_region_pressure() {
                    use_region_pressure(&mut field, name);
                }
                OutputData::Regional(IndexMap::from([(name.clone(), field)]))
            }
        };

        let vert_int = self.identity.dtype_out_vert == Some(VertReduction::VertInt);
        data.try_map_fields(|mut field| {
            if let Some(indices) = &opts.time {
                field = select_time(&field, indices)?;
            }
            if let Some(index) = opts.vert {
                field = self.select_level(&field, index)?;
            }
            if opts.mask_unphysical {
                field = self.var.mask_unphysical(&field);
            }
            if opts.plot_units {
                field = self.var.to_plot_units(&field, vert_int);
            }
            Ok(field)
        })
    }

    fn select_level(&self, field: &Field, index: usize) -> CalcResult<Field> {
        match self.identity.dtype_in_vert {
            Some(DtypeInVert::Sigma) => {
                let dim = if field.has_dim(PFULL_REF_STR) { PFULL_REF_STR } else { PFULL_STR };
                field.index_dim(dim, index)
            }
            Some(DtypeInVert::Pressure) => {
                let level = self.identity.level.ok_or_else(|| {
                    CalcError::invalid_config("selecting a pressure level requires the calculation's 'level'")
                })?;
                let coord = field.require_coord(PLEVEL_STR)?;
                let in_pa = coord.values.iter().any(|v| v.abs() > 1.0e4);
                let target = if in_pa { level * 100.0 } else { level };
                field.sel_nearest(PLEVEL_STR, target, 1e-6 * target.abs().max(1.0))?.index_dim(PLEVEL_STR, 0)
            }
            None => Err(CalcError::unknown_vertical_encoding("none").into()),
        }
    }
}

/// Make a region's average pressure the `pfull` coordinate, keeping the nominal
/// levels as `pfull_ref` and dropping other auxiliary coordinates.
fn use_region_pressure(field: &mut Field, region: &str) {
    let pressure_name = format!("{region}{REGION_PRESSURE_SUFFIX}");
    if !field.has_coord(&pressure_name) {
        return;
    }
    field.rename(PFULL_STR, PFULL_REF_STR);
    field.rename(&pressure_name, PFULL_STR);
    let dims = field.dims().to_vec();
    field.retain_coords(|k| k == PFULL_STR || dims.iter().any(|d| d == k));
}

fn select_time(field: &Field, indices: &[usize]) -> CalcResult<Field> {
    let dim = [YEAR_STR, TIME_STR]
        .into_iter()
        .find(|d| field.has_dim(d))
        .ok_or_else(|| CalcError::missing_dimension(&field.name, &[YEAR_STR, TIME_STR]))?;
    field.isel(dim, indices)
}

/// A computed calculation and its outputs.
pub struct CompletedCalc<'a> {
    calc: Calc<'a>,
    bundle: OutputBundle,
}

impl<'a> CompletedCalc<'a> {
    /// The outputs as computed, ordered by label
    pub fn bundle(&self) -> &OutputBundle {
        &self.bundle
    }

    pub fn calc(&self) -> &Calc<'a> {
        &self.calc
    }

    pub fn into_bundle(self) -> OutputBundle {
        self.bundle
    }

    /// As [`Calc::load`], but answered from the computed outputs when possible.
    pub fn load(&mut self, label: &str, opts: &LoadOptions) -> CalcResult<OutputData> {
        let reduction: OutputReduction = label.parse()?;
        match self.bundle.get(&reduction) {
            Some(data) => self.calc.subset(data.clone(), &reduction, opts),
            None => self.calc.load(label, opts),
        }
    }
}
