//! Calendar utilities: output intervals, month selection, the stored time
//! coordinate, yearly averaging, and time offsets.
//!
//! Times are stored in fields as a `time` coordinate of days since
//! 0001-01-01 00:00 in the proleptic Gregorian calendar, so that model years
//! such as 0004 are representable and round-trip through netCDF unchanged.
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime};
use itertools::Itertools;
use ndarray::{ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::{CalcError, CalcResult};
use crate::field::{Coord, Field};
use crate::names::{TIME_STR, TIME_WEIGHTS_STR, YEAR_STR};

/// Units attribute written for the time coordinate
pub const TIME_UNITS: &str = "days since 0001-01-01 00:00:00";
pub const TIME_CALENDAR: &str = "proleptic_gregorian";

const MONTH_LETTERS: &str = "jfmamjjasond";
const MONTH_ABBREVS: [&str; 12] = ["jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec"];

fn time_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .expect("0001-01-01 is a valid date")
}

/// Convert a datetime to the stored time coordinate value.
pub fn datetime_to_days(t: NaiveDateTime) -> f64 {
    let delta = t - time_epoch();
    delta.num_seconds() as f64 / 86400.0
}

/// Convert a stored time coordinate value back to a datetime (to the nearest second).
pub fn days_to_datetime(days: f64) -> NaiveDateTime {
    time_epoch() + Duration::seconds((days * 86400.0).round() as i64)
}

/// The sub-annual interval over which to compute.
///
/// Serializes as "ann", a season string (e.g. "djf", "jjas"), or a month number (1-12).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "RawInterval", into = "RawInterval")]
pub enum IntervalOut {
    #[default]
    Annual,
    /// Consecutive months identified by their first letters, e.g. "djf"
    Season(String),
    /// A single calendar month, 1 = January
    Month(u32),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawInterval {
    Month(u32),
    Label(String),
}

impl TryFrom<RawInterval> for IntervalOut {
    type Error = CalcError;

    fn try_from(value: RawInterval) -> Result<Self, Self::Error> {
        match value {
            RawInterval::Month(m) => IntervalOut::month(m),
            RawInterval::Label(s) => s.parse(),
        }
    }
}

impl From<IntervalOut> for RawInterval {
    fn from(value: IntervalOut) -> Self {
        match value {
            IntervalOut::Month(m) => RawInterval::Month(m),
            other => RawInterval::Label(other.to_string()),
        }
    }
}

impl IntervalOut {
    pub fn month(m: u32) -> Result<Self, CalcError> {
        if (1..=12).contains(&m) {
            Ok(Self::Month(m))
        } else {
            Err(CalcError::invalid_config(format!("month index must be 1-12, got {m}")))
        }
    }

    /// The calendar months (1-12) covered by this interval.
    pub fn month_indices(&self) -> Vec<u32> {
        match self {
            IntervalOut::Annual => (1..=12).collect(),
            IntervalOut::Month(m) => vec![*m],
            IntervalOut::Season(s) => {
                // Validated on construction, so the season is found within two cycles of the letters
                let doubled = MONTH_LETTERS.repeat(2);
                let start = doubled.find(s.as_str()).unwrap_or(0);
                (start..start + s.len()).map(|i| (i % 12) as u32 + 1).collect()
            }
        }
    }

    /// The label used in output file names.
    pub fn label(&self) -> String {
        match self {
            IntervalOut::Annual => "ann".to_string(),
            IntervalOut::Season(s) => s.clone(),
            IntervalOut::Month(m) => MONTH_ABBREVS[(*m as usize) - 1].to_string(),
        }
    }
}

impl FromStr for IntervalOut {
    type Err = CalcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s == "ann" {
            return Ok(Self::Annual);
        }
        if let Ok(m) = s.parse::<u32>() {
            return Self::month(m);
        }
        if let Some(i) = MONTH_ABBREVS.iter().position(|&a| a == s) {
            return Ok(Self::Month(i as u32 + 1));
        }
        if s.len() >= 2 && s.len() <= 12 && MONTH_LETTERS.repeat(2).contains(s.as_str()) {
            return Ok(Self::Season(s));
        }
        Err(CalcError::invalid_config(format!("'{s}' is not a valid output interval")))
    }
}

impl Display for IntervalOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntervalOut::Month(m) => write!(f, "{m}"),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// Offset applied to raw time values to correct metadata errors, e.g. 3-hourly
/// data stamped at the end rather than the start of each interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeOffset {
    #[serde(default)]
    pub months: i32,
    #[serde(default)]
    pub days: i64,
    #[serde(default)]
    pub hours: i64,
}

impl TimeOffset {
    pub fn apply(&self, t: NaiveDateTime) -> Option<NaiveDateTime> {
        let t = if self.months >= 0 {
            t.checked_add_months(Months::new(self.months as u32))?
        } else {
            t.checked_sub_months(Months::new(self.months.unsigned_abs()))?
        };
        t.checked_add_signed(Duration::days(self.days) + Duration::hours(self.hours))
    }
}

/// Shift every value of a field's time coordinate by `offset`.
pub fn apply_time_offset(field: &mut Field, offset: &TimeOffset) -> CalcResult<()> {
    let coord = field.require_coord(TIME_STR)?;
    let mut shifted = Vec::with_capacity(coord.len());
    for &days in coord.values.iter() {
        let t = days_to_datetime(days);
        let t2 = offset
            .apply(t)
            .ok_or_else(|| CalcError::invalid_config(format!("time offset {offset:?} overflows {t}")))?;
        shifted.push(datetime_to_days(t2));
    }
    let dims = coord.dims.clone();
    let values = ArrayD::from_shape_vec(IxDyn(&[shifted.len()]), shifted)
        .change_shape_err(TIME_STR)?;
    field.set_coord(TIME_STR, Coord { dims, values })
}

trait ShapeErr<T> {
    fn change_shape_err(self, what: &str) -> CalcResult<T>;
}

impl<T> ShapeErr<T> for Result<T, ndarray::ShapeError> {
    fn change_shape_err(self, what: &str) -> CalcResult<T> {
        self.map_err(|e| CalcError::shape_mismatch(format!("{what}: {e}")).into())
    }
}

/// The datetimes of a field's time coordinate.
pub fn field_times(field: &Field) -> CalcResult<Vec<NaiveDateTime>> {
    let coord = field.require_coord(TIME_STR)?;
    Ok(coord.values.iter().map(|&d| days_to_datetime(d)).collect())
}

/// Indices of the time steps that fall in one of `months`.
pub fn extract_months(times: &[NaiveDateTime], months: &[u32]) -> Vec<usize> {
    times
        .iter()
        .enumerate()
        .filter(|(_, t)| months.contains(&t.month()))
        .map(|(i, _)| i)
        .collect()
}

/// Restrict a field to the time steps falling in `months`.
pub fn to_desired_dates(field: &Field, months: &[u32]) -> CalcResult<Field> {
    let times = field_times(field)?;
    let keep = extract_months(&times, months);
    field.isel(TIME_STR, &keep)
}

/// The time-step weights (in days) of a field, defaulting to equal weights.
pub fn time_weights(field: &Field) -> CalcResult<Field> {
    match field.coord(TIME_WEIGHTS_STR) {
        Some(c) => Ok(Field::from_coord(TIME_WEIGHTS_STR, c)),
        None => {
            let n = field
                .dim_len(TIME_STR)
                .ok_or_else(|| CalcError::missing_dimension(&field.name, &[TIME_STR]))?;
            log::debug!("No time weights on '{}', weighting its {n} time steps equally", field.name);
            Ok(Field::from_coord(TIME_WEIGHTS_STR, &Coord::dim1(TIME_STR, vec![1.0; n])))
        }
    }
}

/// Average within each calendar year, weighting each time step by `dt`.
///
/// Time steps where the data are NaN do not contribute their weight. The result
/// has a `year` dimension in place of `time`, with the years as its coordinate.
pub fn yearly_average(field: &Field, dt: &Field) -> CalcResult<Field> {
    let itime = field
        .dim_index(TIME_STR)
        .ok_or_else(|| CalcError::missing_dimension(&field.name, &[TIME_STR]))?;
    let times = field_times(field)?;
    let mut by_year: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (i, t) in times.iter().enumerate() {
        by_year.entry(t.year()).or_default().push(i);
    }

    let mut dims = field.dims().to_vec();
    let weights = dt.broadcast_to(&dims, field.shape())?;
    let mut annual = Vec::with_capacity(by_year.len());
    for inds in by_year.values() {
        let x = field.values().select(Axis(itime), inds);
        let w = weights.select(Axis(itime), inds);
        let num = ndarray::Zip::from(&x).and(&w).map_collect(|&x, &w| if x.is_nan() { 0.0 } else { x * w });
        let den = ndarray::Zip::from(&x).and(&w).map_collect(|&x, &w| if x.is_nan() { 0.0 } else { w });
        let num = num.sum_axis(Axis(itime));
        let den = den.sum_axis(Axis(itime));
        annual.push((num / den).insert_axis(Axis(itime)));
    }
    let views = annual.iter().map(|a| a.view()).collect_vec();
    let values = ndarray::concatenate(Axis(itime), &views).change_shape_err("yearly average")?;

    dims[itime] = YEAR_STR.to_string();
    let mut out = Field::new(&field.name, &dims, values)?;
    for (k, c) in field.coords() {
        if !c.dims.iter().any(|d| d == TIME_STR) {
            out.try_set_coord(k, c.clone());
        }
    }
    out.set_coord(YEAR_STR, Coord::dim1(YEAR_STR, by_year.keys().map(|&y| y as f64).collect()))?;
    out.attrs = field.attrs.clone();
    Ok(out)
}

/// The year label used in file names: "0004" or "0004-0006".
pub fn year_label(start_year: i32, end_year: i32) -> String {
    if start_year == end_year {
        format!("{start_year:04}")
    } else {
        format!("{start_year:04}-{end_year:04}")
    }
}

/// Months between two dates, sorted and deduplicated, as (year, month) pairs.
pub fn months_in_range(start: NaiveDate, end: NaiveDate) -> Vec<(i32, u32)> {
    let mut out = vec![];
    let mut d = start.with_day(1).unwrap_or(start);
    while d <= end {
        out.push((d.year(), d.month()));
        match d.checked_add_months(Months::new(1)) {
            Some(next) => d = next,
            None => break,
        }
    }
    out.into_iter().dedup().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rstest::rstest;

    fn dt(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    #[rstest]
    #[case("ann", vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12])]
    #[case("djf", vec![12, 1, 2])]
    #[case("JJA", vec![6, 7, 8])]
    #[case("jjas", vec![6, 7, 8, 9])]
    #[case("3", vec![3])]
    #[case("oct", vec![10])]
    fn test_month_indices(#[case] label: &str, #[case] expected: Vec<u32>) {
        let intvl: IntervalOut = label.parse().unwrap();
        assert_eq!(intvl.month_indices(), expected);
    }

    #[test]
    fn test_bad_intervals() {
        assert!("xyz".parse::<IntervalOut>().is_err());
        assert!("13".parse::<IntervalOut>().is_err());
        assert!(IntervalOut::month(0).is_err());
    }

    #[test]
    fn test_interval_labels() {
        assert_eq!(IntervalOut::Annual.label(), "ann");
        assert_eq!(IntervalOut::Month(1).label(), "jan");
        assert_eq!(IntervalOut::Season("djf".into()).label(), "djf");
    }

    #[test]
    fn test_time_roundtrip_early_years() {
        let t = dt(4, 7, 15);
        let days = datetime_to_days(t);
        assert_eq!(days_to_datetime(days), t);
        assert_abs_diff_eq!(datetime_to_days(dt(1, 1, 2)), 1.0);
    }

    #[test]
    fn test_time_offset() {
        let off = TimeOffset { months: 0, days: 0, hours: -3 };
        let t = off.apply(dt(5, 1, 1)).unwrap();
        assert_eq!(t, NaiveDate::from_ymd_opt(4, 12, 31).unwrap().and_hms_opt(21, 0, 0).unwrap());

        let off = TimeOffset { months: -1, days: 1, hours: 0 };
        assert_eq!(off.apply(dt(5, 3, 31)).unwrap(), dt(5, 3, 1));
    }

    #[test]
    fn test_yearly_average_weighted() {
        let times = [dt(4, 1, 15), dt(4, 2, 15), dt(5, 1, 15), dt(5, 2, 15)];
        let values = ndarray::array![1.0, 3.0, f64::NAN, 10.0].into_dyn();
        let mut f = Field::new("x", &["time"], values).unwrap();
        f.set_coord("time", Coord::dim1("time", times.iter().map(|&t| datetime_to_days(t)).collect()))
            .unwrap();
        let w = Field::from_coord("time_weights", &Coord::dim1("time", vec![31.0, 28.0, 31.0, 28.0]));

        let yr = yearly_average(&f, &w).unwrap();
        assert_eq!(yr.dims(), ["year"]);
        assert_eq!(yr.coord("year").unwrap().to_vec(), vec![4.0, 5.0]);
        assert_abs_diff_eq!(yr.values()[[0]], (31.0 + 3.0 * 28.0) / 59.0, epsilon = 1e-12);
        assert_abs_diff_eq!(yr.values()[[1]], 10.0);
    }

    #[test]
    fn test_extract_months() {
        let times = [dt(4, 1, 15), dt(4, 6, 15), dt(4, 12, 15), dt(5, 1, 15)];
        assert_eq!(extract_months(&times, &[12, 1, 2]), vec![0, 2, 3]);
    }

    #[test]
    fn test_year_label() {
        assert_eq!(year_label(4, 6), "0004-0006");
        assert_eq!(year_label(1979, 1979), "1979");
    }

    #[test]
    fn test_interval_serde() {
        #[derive(Deserialize)]
        struct T {
            a: IntervalOut,
            b: IntervalOut,
        }
        let t: T = toml::from_str("a = 'djf'\nb = 7").unwrap();
        assert_eq!(t.a, IntervalOut::Season("djf".into()));
        assert_eq!(t.b, IntervalOut::Month(7));
    }
}
