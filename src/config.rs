//! Calculation options and the resolution of catalog defaults.
//!
//! The options for one calculation are described by [`CalcOptions`], which can
//! be written in TOML:
//!
//! ```toml
//! date_range = ["0004-01-01", "0006-12-31"]
//! intvl_in = "monthly"
//! intvl_out = "djf"
//! dtype_in_time = "ts"
//! dtype_in_vert = "sigma"
//! dtype_out_time = ["av", "reg.ts"]
//! dtype_out_vert = "vert_int"
//! time_offset = { hours = -3 }
//! ```
//!
//! `intvl_out` may also be a month number (e.g. `intvl_out = 7`) and
//! `dtype_out_time` may be a single label. When loaded with
//! [`CalcOptions::from_toml_str`] or [`CalcOptions::from_toml_file`],
//! environment variables prefixed with `AOSCALC_` (e.g. `AOSCALC_INTVL_OUT=jja`)
//! override values from the TOML.
//!
//! Options left unset here (`intvl_in`, `dtype_in_time`, `dtype_in_vert`) fall
//! back to the defaults carried by the run, model, and project, in that order,
//! through a [`ResolutionChain`].
use std::path::Path;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use error_stack::ResultExt;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CalcError, CalcResult};
use crate::reductions::{OneOrMany, OutputReduction, TimeReduction};
use crate::times::{IntervalOut, TimeOffset};

const ENV_PREFIX: &str = "AOSCALC_";

/// Time resolution of the input data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
pub enum IntervalIn {
    #[serde(rename = "annual")]
    #[strum(serialize = "annual")]
    Annual,
    #[serde(rename = "monthly")]
    #[strum(serialize = "monthly")]
    Monthly,
    #[serde(rename = "daily")]
    #[strum(serialize = "daily")]
    Daily,
    #[serde(rename = "6hr")]
    #[strum(serialize = "6hr")]
    SixHourly,
    #[serde(rename = "3hr")]
    #[strum(serialize = "3hr")]
    ThreeHourly,
}

/// What the time axis of the input data represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DtypeInTime {
    /// Instantaneous values
    Inst,
    /// Averages over the period of each time step
    Ts,
    /// A single value averaged over a date range
    Av,
    /// Averages over each year of a date range
    AvTs,
}

/// Vertical coordinate of the input data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DtypeInVert {
    /// Fixed pressure levels
    Pressure,
    /// Hybrid sigma-pressure levels
    Sigma,
}

impl FromStr for DtypeInVert {
    type Err = CalcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pressure" => Ok(Self::Pressure),
            "sigma" => Ok(Self::Sigma),
            _ => Err(CalcError::unknown_vertical_encoding(s)),
        }
    }
}

/// Mass-weighted vertical reduction of the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VertReduction {
    VertAv,
    VertInt,
}

/// An inclusive range of dates. Configured as two strings, each either a date
/// (`"0004-01-01"`) or a date and time (`"0004-01-01T00:00:00"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[String; 2]", into = "[String; 2]")]
pub struct DateRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self, CalcError> {
        if end < start {
            return Err(CalcError::invalid_config(format!("date range ends ({end}) before it starts ({start})")));
        }
        Ok(Self { start, end })
    }
}

fn parse_datetime(s: &str) -> Result<NaiveDateTime, CalcError> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| CalcError::invalid_config(format!("could not parse '{s}' as a date")))
}

impl TryFrom<[String; 2]> for DateRange {
    type Error = CalcError;

    fn try_from(value: [String; 2]) -> Result<Self, Self::Error> {
        Self::new(parse_datetime(&value[0])?, parse_datetime(&value[1])?)
    }
}

impl From<DateRange> for [String; 2] {
    fn from(value: DateRange) -> Self {
        let fmt = "%Y-%m-%dT%H:%M:%S";
        [value.start.format(fmt).to_string(), value.end.format(fmt).to_string()]
    }
}

fn default_dtype_out_time() -> OneOrMany<OutputReduction> {
    OneOrMany::One(OutputReduction::Gridded(TimeReduction::Av))
}

/// Options describing one calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalcOptions {
    /// Dates to compute over; the run's default dates if omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intvl_in: Option<IntervalIn>,
    #[serde(default)]
    pub intvl_out: IntervalOut,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype_in_time: Option<DtypeInTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype_in_vert: Option<DtypeInVert>,
    #[serde(default = "default_dtype_out_time")]
    pub dtype_out_time: OneOrMany<OutputReduction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype_out_vert: Option<VertReduction>,
    /// Pressure level (hPa) to select when loading pressure-level output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_offset: Option<TimeOffset>,
}

impl Default for CalcOptions {
    fn default() -> Self {
        Self {
            date_range: None,
            intvl_in: None,
            intvl_out: IntervalOut::Annual,
            dtype_in_time: None,
            dtype_in_vert: None,
            dtype_out_time: default_dtype_out_time(),
            dtype_out_vert: None,
            level: None,
            time_offset: None,
        }
    }
}

impl CalcOptions {
    /// Layer a TOML string and then `AOSCALC_` environment variables over the defaults.
    pub fn from_toml_str(s: &str) -> CalcResult<Self> {
        Self::extract(Figment::from(Serialized::defaults(Self::default())).merge(Toml::string(s)))
            .attach_printable("while reading calculation options from a TOML string")
    }

    pub fn from_toml_file(p: &Path) -> CalcResult<Self> {
        Self::extract(Figment::from(Serialized::defaults(Self::default())).merge(Toml::file(p)))
            .attach_printable_lazy(|| format!("while reading calculation options from {}", p.display()))
    }

    fn extract(figment: Figment) -> CalcResult<Self> {
        figment
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(|e| CalcError::invalid_config(e).into())
    }

    pub fn with_date_range(mut self, start: NaiveDateTime, end: NaiveDateTime) -> CalcResult<Self> {
        self.date_range = Some(DateRange::new(start, end)?);
        Ok(self)
    }

    pub fn with_dtype_out_time<I: IntoIterator<Item = OutputReduction>>(mut self, reductions: I) -> Self {
        self.dtype_out_time = OneOrMany::Many(reductions.into_iter().collect());
        self
    }

    /// The input-data settings given directly on the calculation, as the first link
    /// of a [`ResolutionChain`].
    pub fn as_defaults(&self) -> CatalogDefaults {
        CatalogDefaults {
            intvl_in: self.intvl_in,
            dtype_in_time: self.dtype_in_time,
            dtype_in_vert: self.dtype_in_vert,
        }
    }
}

/// Input-data settings that a run, model, or project may provide for calculations
/// that do not set them explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogDefaults {
    #[serde(default)]
    pub intvl_in: Option<IntervalIn>,
    #[serde(default)]
    pub dtype_in_time: Option<DtypeInTime>,
    #[serde(default)]
    pub dtype_in_vert: Option<DtypeInVert>,
}

/// An ordered list of named sources of defaults, queried first to last.
#[derive(Debug, Default)]
pub struct ResolutionChain<'a> {
    sources: Vec<(String, &'a CatalogDefaults)>,
}

impl<'a> ResolutionChain<'a> {
    pub fn new() -> Self {
        Self { sources: vec![] }
    }

    pub fn then<S: ToString>(mut self, name: S, defaults: &'a CatalogDefaults) -> Self {
        self.sources.push((name.to_string(), defaults));
        self
    }

    /// The first value present in any source, if any.
    pub fn find<T, F: Fn(&CatalogDefaults) -> Option<T>>(&self, get: F) -> Option<T> {
        self.sources.iter().find_map(|(_, d)| get(d))
    }

    /// The first value present in any source, or [`CalcError::NotFound`] listing
    /// the sources searched.
    pub fn require<T, F: Fn(&CatalogDefaults) -> Option<T>>(&self, key: &str, get: F) -> CalcResult<T> {
        self.find(get).ok_or_else(|| {
            CalcError::NotFound {
                key: key.to_string(),
                searched: self.sources.iter().map(|(n, _)| n.clone()).collect(),
            }
            .into()
        })
    }
}
