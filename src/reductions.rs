//! Time reductions and the labels identifying them in outputs.
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CalcError, CalcResult};
use crate::field::Field;
use crate::names::YEAR_STR;

const REGION_PREFIX: &str = "reg.";

/// A reduction over time, applied after averaging within each year.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum TimeReduction {
    /// The series of yearly averages
    Ts,
    /// Mean over all years
    Av,
    /// Population standard deviation across years
    Std,
}

impl TimeReduction {
    /// Whether this reduction needs a time dimension to be meaningful
    pub fn is_time_defined(&self) -> bool {
        matches!(self, Self::Ts | Self::Std)
    }

    /// Apply to a series of yearly averages.
    ///
    /// Data without a `year` dimension (time-independent data) pass through `av` unchanged.
    pub fn apply(&self, yearly: &Field) -> CalcResult<Field> {
        let has_year = yearly.has_dim(YEAR_STR);
        match self {
            Self::Ts => Ok(yearly.clone()),
            Self::Av if has_year => yearly.mean(YEAR_STR),
            Self::Av => Ok(yearly.clone()),
            Self::Std if has_year => yearly.std(YEAR_STR),
            Self::Std => Err(CalcError::time_reduction_on_timeless(&yearly.name, self).into()),
        }
    }
}

/// One entry of a calculation's output time reductions: either a reduction of the
/// whole gridded field or the same reduction applied to each region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OutputReduction {
    Gridded(TimeReduction),
    Regional(TimeReduction),
}

impl OutputReduction {
    pub fn label(&self) -> String {
        self.to_string()
    }

    pub fn time_reduction(&self) -> TimeReduction {
        match self {
            Self::Gridded(r) | Self::Regional(r) => *r,
        }
    }

    pub fn is_regional(&self) -> bool {
        matches!(self, Self::Regional(_))
    }

    /// True for `ts`, `std`, `reg.ts`, and `reg.std`.
    pub fn is_time_defined(&self) -> bool {
        self.time_reduction().is_time_defined()
    }
}

impl Display for OutputReduction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gridded(r) => write!(f, "{r}"),
            Self::Regional(r) => write!(f, "{REGION_PREFIX}{r}"),
        }
    }
}

impl FromStr for OutputReduction {
    type Err = CalcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (regional, base) = match s.strip_prefix(REGION_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let red = TimeReduction::from_str(base)
            .map_err(|_| CalcError::invalid_config(format!("unknown output time reduction '{s}'")))?;
        Ok(if regional { Self::Regional(red) } else { Self::Gridded(red) })
    }
}

impl TryFrom<String> for OutputReduction {
    type Error = CalcError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OutputReduction> for String {
    fn from(value: OutputReduction) -> Self {
        value.label()
    }
}

// Ordered by label so that outputs enumerate deterministically.
impl PartialOrd for OutputReduction {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OutputReduction {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.label().cmp(&other.label())
    }
}

/// Either a single reduction or a list of them, as accepted in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(x) => vec![x],
            Self::Many(v) => v,
        }
    }
}

impl<T> From<Vec<T>> for OneOrMany<T> {
    fn from(value: Vec<T>) -> Self {
        Self::Many(value)
    }
}

/// Deduplicate and sort reductions by label.
pub fn normalize_reductions<I: IntoIterator<Item = OutputReduction>>(reductions: I) -> Vec<OutputReduction> {
    let set: std::collections::BTreeSet<OutputReduction> = reductions.into_iter().collect();
    set.into_iter().collect()
}
