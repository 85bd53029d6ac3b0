//! Internal names for dimensions, coordinates, and grid attributes.
//!
//! Raw model output uses many spellings for the same coordinate (e.g. "lat",
//! "latitude", "y"). Everything loaded into a calculation is renamed to the
//! internal names here so that later stages can rely on them.
use strum::{Display, EnumIter, IntoStaticStr};

pub const LAT_STR: &str = "lat";
pub const LAT_BOUNDS_STR: &str = "lat_bounds";
pub const LON_STR: &str = "lon";
pub const LON_BOUNDS_STR: &str = "lon_bounds";
pub const ZSURF_STR: &str = "zsurf";
pub const SFC_AREA_STR: &str = "sfc_area";
pub const LAND_MASK_STR: &str = "land_mask";
pub const PK_STR: &str = "pk";
pub const BK_STR: &str = "bk";
pub const PHALF_STR: &str = "phalf";
pub const PFULL_STR: &str = "pfull";
pub const PLEVEL_STR: &str = "level";
pub const TIME_STR: &str = "time";
pub const TIME_WEIGHTS_STR: &str = "time_weights";
pub const YEAR_STR: &str = "year";

/// Standard gravitational acceleration at the Earth's surface (m s^-2)
pub const GRAV_EARTH: f64 = 9.80665;

/// The grid attributes reconciled between a run's data and its model.
///
/// The declaration order is the order in which reconciliation happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, IntoStaticStr)]
pub enum GridAttr {
    #[strum(serialize = "lat")]
    Lat,
    #[strum(serialize = "lat_bounds")]
    LatBounds,
    #[strum(serialize = "lon")]
    Lon,
    #[strum(serialize = "lon_bounds")]
    LonBounds,
    #[strum(serialize = "zsurf")]
    Zsurf,
    #[strum(serialize = "sfc_area")]
    SfcArea,
    #[strum(serialize = "land_mask")]
    LandMask,
    #[strum(serialize = "pk")]
    Pk,
    #[strum(serialize = "bk")]
    Bk,
    #[strum(serialize = "phalf")]
    Phalf,
    #[strum(serialize = "pfull")]
    Pfull,
    #[strum(serialize = "level")]
    Level,
}

impl GridAttr {
    /// The name this attribute has inside a calculation
    pub fn internal_name(&self) -> &'static str {
        self.into()
    }

    /// All names this attribute may have in raw data, including the internal one
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            GridAttr::Lat => &["lat", "latitude", "LATITUDE", "y", "yto"],
            GridAttr::LatBounds => &["latb", "lat_bnds", "lat_bounds"],
            GridAttr::Lon => &["lon", "longitude", "LONGITUDE", "x", "xto"],
            GridAttr::LonBounds => &["lonb", "lon_bnds", "lon_bounds"],
            GridAttr::Zsurf => &["zsurf"],
            GridAttr::SfcArea => &["area", "sfc_area"],
            GridAttr::LandMask => &["land_mask"],
            GridAttr::Pk => &["pk"],
            GridAttr::Bk => &["bk"],
            GridAttr::Phalf => &["phalf"],
            GridAttr::Pfull => &["pfull"],
            GridAttr::Level => &["level", "lev", "plev"],
        }
    }

    /// Grid attributes that can be requested directly as input variables
    /// and are read straight from the model rather than the data source.
    pub fn from_intrinsic_var_name(name: &str) -> Option<Self> {
        match name {
            LAT_STR => Some(GridAttr::Lat),
            LON_STR => Some(GridAttr::Lon),
            PLEVEL_STR => Some(GridAttr::Level),
            PK_STR => Some(GridAttr::Pk),
            BK_STR => Some(GridAttr::Bk),
            SFC_AREA_STR => Some(GridAttr::SfcArea),
            _ => None,
        }
    }
}
