//! A small synthetic catalog for tests: one project, one model on a 4x4 grid
//! with three hybrid levels, and a run whose data come from [`SyntheticSource`].
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, NaiveDateTime};
use ndarray::{ArrayD, IxDyn};

use crate::archive::{ArchiveService, NativeTarArchive};
use crate::calc::CalcIdentity;
use crate::catalog::{DataLoaderAttrs, DataSource, Model, Project, Run, Var, VertDef};
use crate::config::{CatalogDefaults, DateRange, DtypeInTime, DtypeInVert, IntervalIn};
use crate::error::{CalcError, CalcResult};
use crate::field::{Coord, Field};
use crate::names::GridAttr;
use crate::reductions::{normalize_reductions, OutputReduction};
use crate::regions::{LandMaskMode, LatLonBox, Region};
use crate::times::{apply_time_offset, datetime_to_days, months_in_range, IntervalOut, TimeOffset};

pub const EXAMPLE_LATS: [f64; 4] = [-60.0, -20.0, 20.0, 60.0];
pub const EXAMPLE_LONS: [f64; 4] = [45.0, 135.0, 225.0, 315.0];
pub const EXAMPLE_PK: [f64; 4] = [0.0, 5000.0, 2000.0, 0.0];
pub const EXAMPLE_BK: [f64; 4] = [0.0, 0.2, 0.6, 1.0];
pub const EXAMPLE_PFULL: [f64; 3] = [150.0, 450.0, 800.0];
pub const EXAMPLE_LEVELS: [f64; 3] = [1000.0, 500.0, 200.0];

pub fn ymd(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .expect("test dates should be valid")
}

/// Default date range of the example run: three model years, 0004 to 0006.
pub fn example_start_end() -> (NaiveDateTime, NaiveDateTime) {
    (ymd(4, 1, 1), ymd(6, 12, 31))
}

fn lat_lon_coord(f: impl Fn(usize, usize) -> f64) -> Coord {
    let values = ArrayD::from_shape_fn(IxDyn(&[EXAMPLE_LATS.len(), EXAMPLE_LONS.len()]), |ix| f(ix[0], ix[1]));
    Coord { dims: vec!["lat".to_string(), "lon".to_string()], values }
}

pub fn example_model() -> Model {
    Model::new("example_model")
        .with_run("example_run")
        .with_grid_attr(GridAttr::Lat, Coord::dim1("lat", EXAMPLE_LATS.to_vec()))
        .with_grid_attr(GridAttr::Lon, Coord::dim1("lon", EXAMPLE_LONS.to_vec()))
        .with_grid_attr(
            GridAttr::SfcArea,
            lat_lon_coord(|ilat, _| 1.0e12 * EXAMPLE_LATS[ilat].to_radians().cos()),
        )
        // Land in the two western columns of the northern hemisphere
        .with_grid_attr(
            GridAttr::LandMask,
            lat_lon_coord(|ilat, ilon| if ilat >= 2 && ilon < 2 { 1.0 } else { 0.0 }),
        )
        .with_grid_attr(GridAttr::Pk, Coord::dim1("phalf", EXAMPLE_PK.to_vec()))
        .with_grid_attr(GridAttr::Bk, Coord::dim1("phalf", EXAMPLE_BK.to_vec()))
        .with_grid_attr(GridAttr::Phalf, Coord::dim1("phalf", vec![0.0, 300.0, 600.0, 1000.0]))
        .with_grid_attr(GridAttr::Pfull, Coord::dim1("pfull", EXAMPLE_PFULL.to_vec()))
        .with_grid_attr(GridAttr::Level, Coord::dim1("level", EXAMPLE_LEVELS.to_vec()))
}

pub fn example_run(source: Arc<SyntheticSource>) -> Run {
    let (start, end) = example_start_end();
    Run::new("example_run", start, end, source).with_defaults(CatalogDefaults {
        intvl_in: Some(IntervalIn::Monthly),
        dtype_in_time: Some(DtypeInTime::Ts),
        dtype_in_vert: Some(DtypeInVert::Sigma),
    })
}

pub fn example_project(direc_out: &Path, tar_direc_out: Option<&Path>) -> Project {
    Project::new("example_proj", direc_out, tar_direc_out.map(|p| p.to_path_buf()))
}

/// What a calculation on the example run hands to its data source by default.
pub fn example_loader_attrs() -> DataLoaderAttrs {
    DataLoaderAttrs {
        domain: "atmos".to_string(),
        intvl_in: IntervalIn::Monthly,
        dtype_in_time: DtypeInTime::Ts,
        dtype_in_vert: Some(DtypeInVert::Sigma),
        intvl_out: IntervalOut::Annual,
    }
}

/// The identity of an annual calculation of [`t_surf`] over the example run's default dates.
pub fn example_identity(reductions: &[&str]) -> CalcIdentity {
    let (start, end) = example_start_end();
    CalcIdentity {
        project: "example_proj".to_string(),
        model: "example_model".to_string(),
        run: "example_run".to_string(),
        var: "t_surf".to_string(),
        date_range: DateRange::new(start, end).expect("example dates should be ordered"),
        intvl_in: IntervalIn::Monthly,
        intvl_out: IntervalOut::Annual,
        dtype_in_time: DtypeInTime::Ts,
        dtype_in_vert: Some(DtypeInVert::Sigma),
        dtype_out_time: normalize_reductions(
            reductions.iter().map(|l| l.parse::<OutputReduction>().expect("test labels should be valid")),
        ),
        dtype_out_vert: None,
        level: None,
        time_offset: None,
        regions: vec![],
    }
}

pub fn example_regions() -> Vec<Region> {
    vec![
        Region::globe(),
        Region::new("nh", vec![LatLonBox::lat_band(0.0, 90.0)]).with_description("Northern hemisphere"),
        Region::new("nh_land", vec![LatLonBox::lat_band(0.0, 90.0)])
            .with_description("Northern hemisphere land")
            .with_mask_mode(LandMaskMode::StrictLand),
    ]
}

/// Surface temperature, read directly from the data source.
pub fn t_surf() -> Var {
    Var::new("t_surf")
        .with_units("K")
        .with_description("Surface air temperature")
        .with_valid_range(150.0, 350.0)
}

/// Temperature on full model levels.
pub fn temp() -> Var {
    Var::new("temp")
        .with_units("K")
        .with_description("Air temperature")
        .with_def_vert(VertDef::Full)
}

/// A time-independent field.
pub fn zsurf_like() -> Var {
    Var::new("orog").with_units("m").with_description("Orography").with_def_time(false)
}

/// Raw data source fabricating deterministic monthly fields on the example grid.
///
/// Vertically defined variables are given on `pfull`/`phalf` for hybrid data and
/// on `lev` (an alias of `level`) for pressure data; latitude is always given as
/// `latitude` so that callers must rename it. Every request is counted by variable
/// name.
#[derive(Debug, Default)]
pub struct SyntheticSource {
    fetches: Mutex<HashMap<String, usize>>,
}

impl SyntheticSource {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fetch_count(&self, name: &str) -> usize {
        self.fetches.lock().map(|m| m.get(name).copied().unwrap_or(0)).unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.lock().map(|m| m.values().sum()).unwrap_or(0)
    }

    fn record(&self, name: &str) {
        if let Ok(mut m) = self.fetches.lock() {
            *m.entry(name.to_string()).or_default() += 1;
        }
    }
}

fn days_in_month(year: i32, month: u32) -> f64 {
    let first = NaiveDate::from_ymd_opt(year, month, 1);
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    match (first, next) {
        (Some(a), Some(b)) => (b - a).num_days() as f64,
        _ => 30.0,
    }
}

impl DataSource for SyntheticSource {
    fn load_variable(
        &self,
        var: &Var,
        start: NaiveDateTime,
        end: NaiveDateTime,
        time_offset: Option<&TimeOffset>,
        attrs: &DataLoaderAttrs,
    ) -> CalcResult<Field> {
        self.record(&var.name);

        let months = if var.def_time { months_in_range(start.date(), end.date()) } else { vec![] };
        let (vert_dim, vert_coord) = match (var.def_vert, attrs.dtype_in_vert) {
            (VertDef::None, _) => (None, vec![]),
            (_, Some(DtypeInVert::Pressure)) => (Some("lev"), EXAMPLE_LEVELS.to_vec()),
            (VertDef::Half, _) => (Some("phalf"), vec![0.0, 300.0, 600.0, 1000.0]),
            (VertDef::Full, _) => (Some("pfull"), EXAMPLE_PFULL.to_vec()),
        };

        let mut dims = vec![];
        let mut shape = vec![];
        if var.def_time {
            dims.push("time");
            shape.push(months.len());
        }
        if let Some(d) = vert_dim {
            dims.push(d);
            shape.push(vert_coord.len());
        }
        dims.extend(["latitude", "lon"]);
        shape.extend([EXAMPLE_LATS.len(), EXAMPLE_LONS.len()]);

        let is_ps = var.name == "ps";
        let has_time = var.def_time;
        let has_vert = vert_dim.is_some();
        let values = ArrayD::from_shape_fn(IxDyn(&shape), |ix| {
            let mut k = 0;
            let it = if has_time {
                k += 1;
                ix[0] as f64
            } else {
                0.0
            };
            let iv = if has_vert {
                k += 1;
                ix[k - 1] as f64
            } else {
                0.0
            };
            let (ilat, ilon) = (ix[k] as f64, ix[k + 1] as f64);
            if is_ps {
                1.0e5 - 1000.0 * ilat + 10.0 * ((it as usize % 12) as f64)
            } else {
                280.0 + 0.1 * it + 2.0 * ilat + 0.5 * ilon - 10.0 * iv
            }
        });

        let mut field = Field::new(&var.name, &dims, values)?;
        field.set_coord("latitude", Coord::dim1("latitude", EXAMPLE_LATS.to_vec()))?;
        field.set_coord("lon", Coord::dim1("lon", EXAMPLE_LONS.to_vec()))?;
        if let Some(d) = vert_dim {
            field.set_coord(d, Coord::dim1(d, vert_coord))?;
        }
        if var.def_time {
            let times = months.iter().map(|&(y, m)| datetime_to_days(ymd(y, m, 15))).collect();
            let weights = months.iter().map(|&(y, m)| days_in_month(y, m)).collect();
            field.set_coord("time", Coord::dim1("time", times))?;
            field.set_coord("time_weights", Coord::dim1("time", weights))?;
            if let Some(offset) = time_offset {
                apply_time_offset(&mut field, offset)?;
            }
        }
        field.attrs.insert("units".to_string(), var.units.clone());
        Ok(field)
    }
}


/// Archive maintenance that works like [`NativeTarArchive`] except that deleting
/// an entry always fails, as it does with a `tar` lacking `--delete`.
#[derive(Debug, Default)]
pub struct NoDeleteArchive {
    delete_attempts: Mutex<usize>,
}

impl NoDeleteArchive {
    pub fn delete_attempts(&self) -> usize {
        self.delete_attempts.lock().map(|n| *n).unwrap_or(0)
    }
}

impl ArchiveService for NoDeleteArchive {
    fn ensure_exists(&self, archive: &Path) -> CalcResult<()> {
        NativeTarArchive.ensure_exists(archive)
    }

    fn contains(&self, archive: &Path, entry: &str) -> CalcResult<bool> {
        NativeTarArchive.contains(archive, entry)
    }

    fn append_entry(&self, archive: &Path, file: &Path, entry: &str) -> CalcResult<()> {
        NativeTarArchive.append_entry(archive, file, entry)
    }

    fn delete_entry(&self, archive: &Path, entry: &str) -> CalcResult<()> {
        if let Ok(mut n) = self.delete_attempts.lock() {
            *n += 1;
        }
        Err(CalcError::ArchiveCommandFailed {
            command: format!("tar --delete --file={} {entry}", archive.display()),
            status: "exit status: 2".to_string(),
        }
        .into())
    }

    fn extract_entry(&self, archive: &Path, entry: &str, dest_dir: &Path) -> CalcResult<Option<PathBuf>> {
        NativeTarArchive.extract_entry(archive, entry, dest_dir)
    }
}
