//! Named geographic regions and the area-weighted reductions over them.
use serde::{Deserialize, Serialize};

use crate::error::{CalcError, CalcResult};
use crate::field::Field;
use crate::names::{LAND_MASK_STR, LAT_STR, LON_STR, SFC_AREA_STR};
use crate::reductions::TimeReduction;
use crate::times::yearly_average;

/// How the land fraction restricts a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LandMaskMode {
    /// Land and ocean alike
    #[default]
    None,
    /// Weight by land fraction
    Land,
    /// Weight by ocean fraction
    Ocean,
    /// Only cells that are (nearly) all land
    StrictLand,
    /// Only cells that are (nearly) all ocean
    StrictOcean,
}

impl LandMaskMode {
    fn weight(&self, land_frac: f64) -> f64 {
        match self {
            Self::None => 1.0,
            Self::Land => land_frac,
            Self::Ocean => 1.0 - land_frac,
            Self::StrictLand => (land_frac >= 0.99) as u8 as f64,
            Self::StrictOcean => (land_frac <= 0.01) as u8 as f64,
        }
    }
}

/// A latitude/longitude box, in degrees. Longitudes are compared modulo 360, so
/// a box may cross the prime meridian (e.g. west = 340, east = 20).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLonBox {
    pub lat_south: f64,
    pub lat_north: f64,
    pub lon_west: f64,
    pub lon_east: f64,
}

impl LatLonBox {
    pub fn new(lat_bounds: (f64, f64), lon_bounds: (f64, f64)) -> Self {
        Self { lat_south: lat_bounds.0, lat_north: lat_bounds.1, lon_west: lon_bounds.0, lon_east: lon_bounds.1 }
    }

    /// A box covering every longitude
    pub fn lat_band(lat_south: f64, lat_north: f64) -> Self {
        Self::new((lat_south, lat_north), (0.0, 360.0))
    }

    fn contains_lat(&self, lat: f64) -> bool {
        lat >= self.lat_south && lat <= self.lat_north
    }

    fn contains_lon(&self, lon: f64) -> bool {
        if self.lon_east - self.lon_west >= 360.0 {
            return true;
        }
        let lon = lon.rem_euclid(360.0);
        let west = self.lon_west.rem_euclid(360.0);
        let east = self.lon_east.rem_euclid(360.0);
        if west <= east {
            lon >= west && lon <= east
        } else {
            lon >= west || lon <= east
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// The region is the union of these boxes
    pub boxes: Vec<LatLonBox>,
    #[serde(default)]
    pub mask_mode: LandMaskMode,
}

impl Region {
    pub fn new<S: ToString>(name: S, boxes: Vec<LatLonBox>) -> Self {
        Self { name: name.to_string(), description: String::new(), boxes, mask_mode: LandMaskMode::None }
    }

    pub fn with_description<S: ToString>(mut self, description: S) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_mask_mode(mut self, mode: LandMaskMode) -> Self {
        self.mask_mode = mode;
        self
    }

    /// The whole globe
    pub fn globe() -> Self {
        Self::new("globe", vec![LatLonBox::lat_band(-90.0, 90.0)]).with_description("All latitudes and longitudes")
    }

    /// Spatial weights over the field's horizontal dimensions: cell area (or the cosine
    /// of latitude when no area is known) inside the region, zero outside.
    fn weights(&self, field: &Field) -> CalcResult<Field> {
        let lat = field.require_coord(LAT_STR)?.clone();
        let mut w = Field::from_coord("weights", &lat).map(|v| {
            if self.boxes.iter().any(|b| b.contains_lat(v)) {
                v.to_radians().cos()
            } else {
                0.0
            }
        });

        if let Some(lon) = field.coord(LON_STR).filter(|_| field.has_dim(LON_STR)) {
            let lon_w = Field::from_coord("weights", lon);
            // A point must be inside one box in both directions, so test lat and lon jointly.
            let lat_f = Field::from_coord(LAT_STR, &lat);
            let inside = lat_f.zip_with(&lon_w, |la, lo| {
                self.boxes.iter().any(|b| b.contains_lat(la) && b.contains_lon(lo)) as u8 as f64
            })?;
            w = inside.zip_with(&w, |inside, cos_lat| inside * cos_lat)?;
        }

        if let Some(area) = field.coord(SFC_AREA_STR).filter(|c| field.coord_fits(c)) {
            let area = Field::from_coord(SFC_AREA_STR, area);
            w = w.zip_with(&area, |w, a| if w > 0.0 { a } else { 0.0 })?;
        }

        if self.mask_mode != LandMaskMode::None {
            let land = field
                .coord(LAND_MASK_STR)
                .filter(|c| field.coord_fits(c))
                .ok_or_else(|| CalcError::missing_coordinate(&field.name, LAND_MASK_STR))?;
            let land = Field::from_coord(LAND_MASK_STR, land);
            w = w.zip_with(&land, |w, frac| w * self.mask_mode.weight(frac))?;
        }
        Ok(w)
    }

    /// Area-weighted mean over the region, skipping NaNs.
    pub fn area_average(&self, field: &Field) -> CalcResult<Field> {
        let w = self.weights(field)?;
        let num = field.zip_with(&w, |x, w| if x.is_nan() || w == 0.0 { 0.0 } else { x * w })?;
        let den = field.zip_with(&w, |x, w| if x.is_nan() { 0.0 } else { w })?;
        let mut num = num.nansum(LAT_STR)?;
        let mut den = den.nansum(LAT_STR)?;
        if num.has_dim(LON_STR) {
            num = num.nansum(LON_STR)?;
            den = den.nansum(LON_STR)?;
        }
        let mut avg = num.div(&den)?.with_name(&self.name);
        avg.attrs = field.attrs.clone();
        avg.retain_coords(|k| k != SFC_AREA_STR && k != LAND_MASK_STR);
        Ok(avg)
    }

    /// Yearly series of the regional average. `dt` holds the time weights of
    /// time-defined data and is `None` for data without time dependence.
    pub fn ts(&self, field: &Field, dt: Option<&Field>) -> CalcResult<Field> {
        let avg = self.area_average(field)?;
        match dt {
            Some(dt) => yearly_average(&avg, dt),
            None => Ok(avg),
        }
    }

    /// Apply `reduction` to this region: the regional average, averaged within each
    /// year, then reduced across years.
    pub fn reduce(&self, reduction: TimeReduction, field: &Field, dt: Option<&Field>) -> CalcResult<Field> {
        let ts = self.ts(field, dt)?;
        reduction.apply(&ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    use crate::field::Coord;

    fn lat_lon_field() -> Field {
        let values = array![[1.0, 2.0], [3.0, f64::NAN], [5.0, 6.0]].into_dyn();
        let mut f = Field::new("x", &["lat", "lon"], values).unwrap();
        f.set_coord("lat", Coord::dim1("lat", vec![-60.0, 0.0, 60.0])).unwrap();
        f.set_coord("lon", Coord::dim1("lon", vec![90.0, 270.0])).unwrap();
        f
    }

    #[test]
    fn test_box_wraps_meridian() {
        let b = LatLonBox::new((-10.0, 10.0), (340.0, 20.0));
        assert!(b.contains_lon(350.0));
        assert!(b.contains_lon(-5.0));
        assert!(b.contains_lon(10.0));
        assert!(!b.contains_lon(90.0));
    }

    #[test]
    fn test_globe_average_cos_lat() {
        let avg = Region::globe().area_average(&lat_lon_field()).unwrap();
        assert_eq!(avg.ndim(), 0);
        // cos(60) = 0.5 at the poleward rows, 1 at the equator, NaN skipped
        let expected = (0.5 * (1.0 + 2.0 + 5.0 + 6.0) + 3.0) / (0.5 * 4.0 + 1.0);
        assert_abs_diff_eq!(avg.values().first().copied().unwrap(), expected, epsilon = 1e-12);
        assert_eq!(avg.name, "globe");
    }

    #[test]
    fn test_box_selection() {
        let nh_east = Region::new("nh_east", vec![LatLonBox::new((30.0, 90.0), (0.0, 180.0))]);
        let avg = nh_east.area_average(&lat_lon_field()).unwrap();
        assert_abs_diff_eq!(avg.values().first().copied().unwrap(), 5.0);
    }

    #[test]
    fn test_area_weights_and_land_mask() {
        let mut f = lat_lon_field();
        let area = array![[1.0, 1.0], [1.0, 1.0], [1.0, 3.0]].into_dyn();
        f.set_coord("sfc_area", Coord::new(&["lat", "lon"], area).unwrap()).unwrap();
        let land = array![[0.0, 0.0], [0.0, 0.0], [1.0, 0.0]].into_dyn();
        f.set_coord("land_mask", Coord::new(&["lat", "lon"], land).unwrap()).unwrap();

        let globe = Region::globe().area_average(&f).unwrap();
        assert_abs_diff_eq!(globe.values().first().copied().unwrap(), (1.0 + 2.0 + 3.0 + 5.0 + 18.0) / 7.0, epsilon = 1e-12);

        let land_only = Region::globe().with_mask_mode(LandMaskMode::StrictLand).area_average(&f).unwrap();
        assert_abs_diff_eq!(land_only.values().first().copied().unwrap(), 5.0);

        let no_mask = lat_lon_field();
        let err = Region::globe().with_mask_mode(LandMaskMode::Ocean).area_average(&no_mask).unwrap_err();
        assert!(matches!(err.current_context(), CalcError::MissingCoordinate { .. }));
    }

    #[test]
    fn test_region_reduce_over_years() {
        let mut f = Field::new("x", &["time", "lat"], array![[1.0, 3.0], [5.0, 7.0]].into_dyn()).unwrap();
        f.set_coord("lat", Coord::dim1("lat", vec![0.0, 0.0])).unwrap();
        let times = vec![
            crate::times::datetime_to_days(crate::test_utils::ymd(4, 6, 15)),
            crate::times::datetime_to_days(crate::test_utils::ymd(5, 6, 15)),
        ];
        f.set_coord("time", Coord::dim1("time", times)).unwrap();
        let dt = crate::times::time_weights(&f).unwrap();

        let ts = Region::globe().reduce(TimeReduction::Ts, &f, Some(&dt)).unwrap();
        assert_eq!(ts.dims(), ["year"]);
        assert_eq!(ts.values().iter().copied().collect::<Vec<_>>(), vec![2.0, 6.0]);
        let std = Region::globe().reduce(TimeReduction::Std, &f, Some(&dt)).unwrap();
        assert_abs_diff_eq!(std.values().first().copied().unwrap(), 2.0);

        let timeless = f.isel("time", &[0]).unwrap().squeeze();
        let av = Region::globe().reduce(TimeReduction::Av, &timeless, None).unwrap();
        assert_abs_diff_eq!(av.values().first().copied().unwrap(), 2.0);
        assert!(Region::globe().reduce(TimeReduction::Std, &timeless, None).is_err());
    }
}
