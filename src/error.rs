//! Common errors across the aoscalc crate
use std::path::PathBuf;

pub type CalcResult<T> = error_stack::Result<T, CalcError>;

/// Broad classes of [`CalcError`], used by callers to decide whether
/// a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The calculation was described incorrectly; retrying will not help.
    Configuration,
    /// The input data is inconsistent with what the calculation requires.
    DataIntegrity,
    /// Reading or writing the primary store or the archive failed.
    Storage,
}

/// Possible errors while loading, computing, saving, or retrieving a calculation.
///
/// Each error type that carries data has a similarly named associated function
/// that creates it with some generics to make it more convenient to use.
#[derive(Debug, thiserror::Error)]
pub enum CalcError {
    /// A pressure pseudo-variable other than "p" or "dp" was requested
    #[error("Unknown pressure pseudo-variable '{0}', expected 'p' or 'dp'")]
    UnknownPseudoVariable(String),

    /// The input vertical coordinate type was not recognized, or was missing
    /// where one is required
    #[error("Unknown or missing input vertical encoding: '{0}', expected 'pressure' or 'sigma'")]
    UnknownVerticalEncoding(String),

    /// A time-defined reduction was requested for data without time dependence
    #[error("Variable '{var}' has no time dependence for the time reduction '{reduction}'")]
    TimeReductionOnTimeless { var: String, reduction: String },

    /// Functionality that deliberately has no implementation
    #[error("Not implemented: {0}")]
    Unimplemented(String),

    /// The run given is not one of the model's runs
    #[error("Model '{model}' has no run '{run}'")]
    RunNotInModel { model: String, run: String },

    /// Region reductions were requested with no regions configured
    #[error("Region reduction '{0}' requested but no regions were given")]
    MissingRegions(String),

    /// A configuration value could not be parsed or is inconsistent
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configuration value was not found in any of the sources searched
    #[error("No value for '{key}' found in any of: {}", .searched.join(", "))]
    NotFound { key: String, searched: Vec<String> },

    /// Pressure levels were not ordered so that every level thickness is positive
    #[error("Pressure level thicknesses not all > 0: {0:?}")]
    NonMonotonicPressure(Vec<f64>),

    /// An array lacks a dimension required for an operation
    #[error("Array '{array}' has no dimension matching any of: {}", .expected.join(", "))]
    MissingDimension { array: String, expected: Vec<String> },

    /// A coordinate or grid attribute required for an operation is absent
    #[error("Array '{array}' has no coordinate '{coord}'")]
    MissingCoordinate { array: String, coord: String },

    /// Two arrays (or an array and a dimension) could not be aligned
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// An output file could not be written
    #[error("Could not write {}", .0.display())]
    CouldNotWrite(PathBuf),

    /// An input or output file could not be read
    #[error("Could not read {}", .0.display())]
    CouldNotRead(PathBuf),

    /// The external archive tool exited with an error
    #[error("Archive command '{command}' exited with status {status}")]
    ArchiveCommandFailed { command: String, status: String },

    /// Wrapper type used to add information to an inner error.
    #[error("{0}")]
    Context(String),
}

impl CalcError {
    pub fn unknown_pseudo_variable<S: ToString>(name: S) -> Self {
        Self::UnknownPseudoVariable(name.to_string())
    }

    pub fn unknown_vertical_encoding<S: ToString>(value: S) -> Self {
        Self::UnknownVerticalEncoding(value.to_string())
    }

    pub fn time_reduction_on_timeless<V: ToString, R: ToString>(var: V, reduction: R) -> Self {
        Self::TimeReductionOnTimeless { var: var.to_string(), reduction: reduction.to_string() }
    }

    pub fn unimplemented<S: ToString>(what: S) -> Self {
        Self::Unimplemented(what.to_string())
    }

    pub fn invalid_config<S: ToString>(msg: S) -> Self {
        Self::InvalidConfig(msg.to_string())
    }

    pub fn missing_dimension<S: ToString>(array: S, expected: &[&str]) -> Self {
        Self::MissingDimension {
            array: array.to_string(),
            expected: expected.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn missing_coordinate<A: ToString, C: ToString>(array: A, coord: C) -> Self {
        Self::MissingCoordinate { array: array.to_string(), coord: coord.to_string() }
    }

    pub fn shape_mismatch<S: ToString>(msg: S) -> Self {
        Self::ShapeMismatch(msg.to_string())
    }

    pub fn could_not_write<P: Into<PathBuf>>(p: P) -> Self {
        Self::CouldNotWrite(p.into())
    }

    pub fn could_not_read<P: Into<PathBuf>>(p: P) -> Self {
        Self::CouldNotRead(p.into())
    }

    pub fn context<S: ToString>(ctx: S) -> Self {
        Self::Context(ctx.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownPseudoVariable(_)
            | Self::UnknownVerticalEncoding(_)
            | Self::TimeReductionOnTimeless { .. }
            | Self::Unimplemented(_)
            | Self::RunNotInModel { .. }
            | Self::MissingRegions(_)
            | Self::InvalidConfig(_)
            | Self::NotFound { .. } => ErrorKind::Configuration,
            Self::NonMonotonicPressure(_)
            | Self::MissingDimension { .. }
            | Self::MissingCoordinate { .. }
            | Self::ShapeMismatch(_) => ErrorKind::DataIntegrity,
            Self::CouldNotWrite(_)
            | Self::CouldNotRead(_)
            | Self::ArchiveCommandFailed { .. }
            | Self::Context(_) => ErrorKind::Storage,
        }
    }
}
