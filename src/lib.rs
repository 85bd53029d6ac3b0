pub mod error;
pub mod logging;
pub mod names;
pub mod field;
pub mod times;
pub mod units;
pub mod vertcoord;
pub mod config;
pub mod reductions;
pub mod regions;
pub mod catalog;
pub mod resolver;
pub mod loader;
pub mod pipeline;
pub mod netcdf_io;
pub mod archive;
pub mod persist;
pub mod calc;
pub mod test_utils;

pub use calc::{Calc, CalcIdentity, CompletedCalc, LoadOptions};
pub use error::{CalcError, CalcResult};
