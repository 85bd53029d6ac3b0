//! Vertical coordinate math for pressure and hybrid sigma-pressure grids.
//!
//! Hybrid coordinates define half-level pressures as `ps * bk + pk`; full
//! levels sit between them. Pressure-coordinate data instead give nominal
//! level pressures, from which thicknesses are built using the surface
//! pressure to trim the lowest above-ground level and mask the rest.
use itertools::Itertools;
use ndarray::{Axis, Zip};

use crate::error::{CalcError, CalcResult};
use crate::field::{Coord, Field};
use crate::names::{GRAV_EARTH, PFULL_STR, PHALF_STR, PLEVEL_STR};

/// Default bottom edge of the lowest pressure level in [`dp_from_p`], in Pa.
pub const DEFAULT_P_BOT: f64 = 1.1e5;
/// Default bottom edge in [`level_thickness`], in Pa (one standard atmosphere).
/// Not used by the calculation pipeline; kept for library callers.
pub const DEFAULT_P_BOT_STD: f64 = 1.01325e5;

fn max_abs(field: &Field) -> f64 {
    field.values().iter().fold(f64::NAN, |acc, v| acc.max(v.abs()))
}

/// Force pressure data in either hPa or Pa to be in Pa.
///
/// Values whose magnitude never reaches 1200 (400 for thicknesses) are assumed to be hPa.
pub fn to_pascal(arr: &Field, is_dp: bool) -> Field {
    let threshold = if is_dp { 400.0 } else { 1200.0 };
    if max_abs(arr) < threshold {
        log::debug!("Conversion applied: hPa -> Pa to array '{}'", arr.name);
        arr.scale(100.0)
    } else {
        arr.clone()
    }
}

/// Convert pressure data from Pa to hPa if they appear to be in Pa.
pub fn to_hpa(arr: &Field) -> Field {
    if max_abs(arr) > 1200.0 {
        log::debug!("Conversion applied: Pa -> hPa to array '{}'", arr.name);
        arr.map(|v| v / 100.0)
    } else {
        arr.clone()
    }
}

/// Name of the vertical dimension of `arr`: `level` for pressure data or `pfull` for hybrid data.
pub fn vert_coord_name(arr: &Field) -> CalcResult<&'static str> {
    [PLEVEL_STR, PFULL_STR]
        .into_iter()
        .find(|d| arr.has_dim(d))
        .ok_or_else(|| CalcError::missing_dimension(&arr.name, &[PLEVEL_STR, PFULL_STR]).into())
}

/// Whether the values increase with index. Fails if any adjacent values are equal.
pub fn does_coord_increase_w_index(values: &[f64]) -> CalcResult<bool> {
    let diffs = values.iter().tuple_windows().map(|(a, b)| b - a).collect_vec();
    if diffs.iter().any(|d| *d == 0.0 || d.is_nan()) {
        return Err(CalcError::NonMonotonicPressure(diffs).into());
    }
    Ok(diffs.first().map(|d| *d > 0.0).unwrap_or(true))
}

/// Pressure at the half levels of hybrid sigma-pressure coordinates.
pub fn phalf_from_ps(bk: &Field, pk: &Field, ps: &Field) -> CalcResult<Field> {
    ps.mul(bk)?.add(pk)?.with_name(PHALF_STR).transpose_canonical()
}

/// Average adjacent half-level values onto full levels.
pub fn to_pfull_from_phalf(arr: &Field, pfull_coord: &Coord) -> CalcResult<Field> {
    let mut top = arr.slice_dim(PHALF_STR, 1, None)?;
    let mut bot = arr.slice_dim(PHALF_STR, 0, Some(-1))?;
    top.replace_dim(PHALF_STR, PFULL_STR, Some(pfull_coord.clone()))?;
    bot.replace_dim(PHALF_STR, PFULL_STR, Some(pfull_coord.clone()))?;
    Ok(bot.add(&top)?.scale(0.5))
}

/// Compute values at half levels from full levels, given the values at the top of the
/// atmosphere and at the surface. Interior half levels average the bounding full levels.
pub fn to_phalf_from_pfull(arr: &Field, val_toa: f64, val_sfc: f64) -> CalcResult<Field> {
    let iax = arr
        .dim_index(PFULL_STR)
        .ok_or_else(|| CalcError::missing_dimension(&arr.name, &[PFULL_STR]))?;
    let n = arr.shape()[iax];
    if n < 2 {
        return Err(CalcError::shape_mismatch(format!("'{}' needs at least two full levels", arr.name)).into());
    }
    let vals = arr.values();
    let upper = vals.slice_axis(Axis(iax), (1..n).into());
    let lower = vals.slice_axis(Axis(iax), (0..n - 1).into());
    let interior = (&upper + &lower) * 0.5;

    let mut edge_shape = arr.shape().to_vec();
    edge_shape[iax] = 1;
    let toa = ndarray::ArrayD::from_elem(edge_shape.clone(), val_toa);
    let sfc = ndarray::ArrayD::from_elem(edge_shape, val_sfc);
    let values = ndarray::concatenate(Axis(iax), &[toa.view(), interior.view(), sfc.view()])
        .map_err(|e| CalcError::shape_mismatch(e.to_string()))?;

    let mut dims = arr.dims().to_vec();
    dims[iax] = PHALF_STR.to_string();
    let mut out = Field::new(&arr.name, &dims, values)?;
    for (k, c) in arr.coords() {
        if !c.dims.iter().any(|d| d == PFULL_STR) {
            out.try_set_coord(k, c.clone());
        }
    }
    out.attrs = arr.attrs.clone();
    Ok(out)
}

/// Pressure at full levels of hybrid coordinates from surface pressure.
pub fn pfull_from_ps(bk: &Field, pk: &Field, ps: &Field, pfull_coord: &Coord) -> CalcResult<Field> {
    to_pfull_from_phalf(&phalf_from_ps(bk, pk, ps)?, pfull_coord)
}

/// Difference adjacent half levels onto full levels.
pub fn d_deta_from_phalf(arr: &Field, pfull_coord: &Coord) -> CalcResult<Field> {
    let mut d = arr.diff(PHALF_STR)?;
    d.replace_dim(PHALF_STR, PFULL_STR, Some(pfull_coord.clone()))?;
    Ok(d)
}

/// Derivative along `pfull` with respect to the level index, by centered differences
/// in the interior and one-sided differences at the first and last levels.
pub fn d_deta_from_pfull(arr: &Field) -> CalcResult<Field> {
    let iax = arr
        .dim_index(PFULL_STR)
        .ok_or_else(|| CalcError::missing_dimension(&arr.name, &[PFULL_STR]))?;
    let n = arr.shape()[iax];
    if n < 2 {
        return Err(CalcError::shape_mismatch(format!("'{}' needs at least two full levels", arr.name)).into());
    }
    let vals = arr.values();
    let mut out = arr.clone();
    let deriv = out.values_mut();
    for k in 0..n {
        let (hi, lo, denom) = if k == 0 {
            (1, 0, 1.0)
        } else if k == n - 1 {
            (n - 1, n - 2, 1.0)
        } else {
            (k + 1, k - 1, 2.0)
        };
        let d = (&vals.index_axis(Axis(iax), hi) - &vals.index_axis(Axis(iax), lo)) / denom;
        deriv.index_axis_mut(Axis(iax), k).assign(&d);
    }
    Ok(out)
}

/// Pressure thickness of hybrid full levels from surface pressure.
pub fn dp_from_ps(bk: &Field, pk: &Field, ps: &Field, pfull_coord: &Coord) -> CalcResult<Field> {
    d_deta_from_phalf(&phalf_from_ps(bk, pk, ps)?, pfull_coord)
}

/// Level thickness of pressure-coordinate data, incorporating surface pressure.
///
/// Level edges are halfway between the given levels, bounded by `p_bot` below and
/// `p_top` above. A level entirely above the surface (surface pressure at least its
/// lower edge pressure) keeps its nominal thickness. A level the surface cuts through
/// extends from its upper edge down to the surface. Levels entirely underground are NaN.
///
/// Fails with [`CalcError::NonMonotonicPressure`] unless every nominal edge
/// thickness is positive, i.e. the levels must be ordered surface to top.
pub fn dp_from_p(p: &Field, ps: &Field, p_top: f64, p_bot: f64) -> CalcResult<Field> {
    let p_str = [PLEVEL_STR, "plev"]
        .into_iter()
        .find(|d| p.has_dim(d))
        .ok_or_else(|| CalcError::missing_dimension(&p.name, &[PLEVEL_STR, "plev"]))?;
    let p_vals = to_pascal(p, false).values().iter().copied().collect_vec();

    let mut edges = Vec::with_capacity(p_vals.len() + 1);
    edges.push(p_bot);
    edges.extend(p_vals.iter().tuple_windows().map(|(a, b)| 0.5 * (a + b)));
    edges.push(p_top);
    let edge_below = edges[..edges.len() - 1].to_vec();
    let edge_above = edges[1..].to_vec();
    let dp = edge_below.iter().zip(edge_above.iter()).map(|(b, a)| b - a).collect_vec();
    if !dp.iter().all(|d| *d > 0.0) {
        return Err(CalcError::NonMonotonicPressure(dp).into());
    }

    let level_field = |name: &str, values: Vec<f64>| {
        let mut f = Field::from_coord(name, &Coord::dim1(p_str, values));
        if let Some(c) = p.coord(p_str) {
            f.try_set_coord(p_str, c.clone());
        }
        f
    };
    let upper = level_field("p_edge_above", edge_above);
    let lower = level_field("p_edge_below", edge_below);
    let dp = level_field("dp", dp);

    let mut dims = ps.dims().to_vec();
    dims.push(p_str.to_string());
    let mut shape = ps.shape().to_vec();
    shape.push(p.dim_len(p_str).unwrap_or(0));
    let ps_b = ps.broadcast_to(&dims, &shape)?;
    let up_b = upper.broadcast_to(&dims, &shape)?;
    let lo_b = lower.broadcast_to(&dims, &shape)?;
    let dp_b = dp.broadcast_to(&dims, &shape)?;

    let values = Zip::from(&ps_b)
        .and(&up_b)
        .and(&lo_b)
        .and(&dp_b)
        .map_collect(|&ps, &upper, &lower, &dp| {
            if ps >= lower {
                dp
            } else if ps > upper {
                // The surface falls within this level
                ps - upper
            } else {
                f64::NAN
            }
        });

    let mut out = Field::new("dp", &dims, values)?;
    for (k, c) in ps.coords().iter().chain(p.coords().iter()) {
        out.try_set_coord(k, c.clone());
    }
    out.transpose_canonical()
}

/// Thickness of each pressure level, without reference to surface pressure.
/// A library utility; the pipeline uses [`dp_from_p`] instead.
///
/// The lowest level extends from `p_bot` to halfway to the next level, the top level
/// from halfway below it to `p_top`, and interior levels between the midpoints.
pub fn level_thickness(p: &Field, p_top: f64, p_bot: f64) -> CalcResult<Field> {
    let p_vals = to_pascal(p, false).values().iter().copied().collect_vec();
    let n = p_vals.len();
    if n < 2 || p.ndim() != 1 {
        return Err(CalcError::shape_mismatch(format!(
            "level thickness needs a 1-D array of at least two levels, got '{}' with shape {:?}",
            p.name,
            p.shape()
        ))
        .into());
    }
    let mut dp = vec![0.0; n];
    dp[0] = p_bot - 0.5 * (p_vals[0] + p_vals[1]);
    for k in 1..n - 1 {
        dp[k] = 0.5 * (p_vals[k - 1] - p_vals[k + 1]);
    }
    dp[n - 1] = 0.5 * (p_vals[n - 2] + p_vals[n - 1]) - p_top;

    let mut out = p.clone().with_name("dp");
    out.values_mut().iter_mut().zip(dp).for_each(|(v, d)| *v = d);
    Ok(out)
}

/// Mass-weighted vertical integral: the NaN-skipping sum of `arr * dp / g` over
/// the vertical dimension of `dp`.
pub fn int_dp_g(arr: &Field, dp: &Field) -> CalcResult<Field> {
    let dim = vert_coord_name(dp)?;
    let dp = to_pascal(dp, true);
    let integral = arr.mul(&dp)?.nansum(dim)?;
    Ok(integral.scale(1.0 / GRAV_EARTH).with_name(&arr.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, ArrayD, IxDyn};

    fn levels() -> Field {
        let mut p = Field::new("level", &["level"], array![1000.0, 850.0, 500.0, 200.0].into_dyn()).unwrap();
        p.set_coord("level", Coord::dim1("level", vec![1000.0, 850.0, 500.0, 200.0])).unwrap();
        p
    }

    #[test]
    fn test_to_pascal_heuristic() {
        let p = levels();
        assert_abs_diff_eq!(to_pascal(&p, false).values()[[0]], 1e5);
        let dp = Field::new("dp", &["level"], array![500.0, 300.0].into_dyn()).unwrap();
        assert_abs_diff_eq!(to_pascal(&dp, true).values()[[0]], 500.0);
        assert_abs_diff_eq!(to_hpa(&to_pascal(&p, false)).values()[[3]], 200.0);
    }

    #[test]
    fn test_dp_from_p_conserves_mass() {
        let p = levels();
        let ps = Field::new("ps", &["lat"], array![101000.0, 90000.0, 70000.0, 40000.0].into_dyn()).unwrap();
        let dp = dp_from_p(&p, &ps, 0.0, DEFAULT_P_BOT).unwrap();
        assert_eq!(dp.dims(), ["level", "lat"]);

        let total = dp.nansum("level").unwrap();
        for (i, &sfc) in [101000.0, 90000.0, 70000.0, 40000.0].iter().enumerate() {
            assert_abs_diff_eq!(total.values()[[i]], sfc, epsilon = 1e-6);
        }
        // ps = 700 hPa: 1000 hPa is underground, 850 hPa (925 to 675 hPa) is cut by the surface
        assert!(dp.values()[[0, 2]].is_nan());
        assert_abs_diff_eq!(dp.values()[[1, 2]], 70000.0 - 67500.0);
        assert_abs_diff_eq!(dp.values()[[2, 2]], 67500.0 - 35000.0);
        assert_abs_diff_eq!(dp.values()[[3, 2]], 35000.0);
        // ps = 1010 hPa cuts the lowest level, leaving the rest nominal
        assert_abs_diff_eq!(dp.values()[[0, 0]], 101000.0 - 92500.0);
        assert_abs_diff_eq!(dp.values()[[1, 0]], 25000.0);
    }

    #[test]
    fn test_dp_from_p_surface_on_level_edge() {
        let ps = Field::new("ps", &["lat"], array![92500.0].into_dyn()).unwrap();
        let dp = dp_from_p(&levels(), &ps, 0.0, DEFAULT_P_BOT).unwrap();
        assert!(dp.values()[[0, 0]].is_nan());
        assert_abs_diff_eq!(dp.values()[[1, 0]], 25000.0);
        assert_abs_diff_eq!(dp.nansum("level").unwrap().values()[[0]], 92500.0, epsilon = 1e-6);
    }

    #[test]
    fn test_dp_from_p_rejects_nonmonotonic() {
        let p = Field::new("level", &["level"], array![200.0, 500.0, 850.0].into_dyn()).unwrap();
        let ps = Field::scalar("ps", 1e5);
        let err = dp_from_p(&p, &ps, 0.0, DEFAULT_P_BOT).unwrap_err();
        assert!(matches!(err.current_context(), CalcError::NonMonotonicPressure(_)));
    }

    #[test]
    fn test_half_full_roundtrip_linear() {
        let phalf = array![0.0, 10.0, 20.0, 30.0, 40.0].into_dyn();
        let arr = Field::new("x", &["phalf"], phalf.clone()).unwrap();
        let pfull_coord = Coord::dim1("pfull", vec![5.0, 15.0, 25.0, 35.0]);
        let full = to_pfull_from_phalf(&arr, &pfull_coord).unwrap();
        assert_eq!(full.dims(), ["pfull"]);
        assert_eq!(full.values().iter().copied().collect_vec(), vec![5.0, 15.0, 25.0, 35.0]);
        assert!(full.has_coord("pfull"));

        let back = to_phalf_from_pfull(&full, -1.0, -1.0).unwrap();
        assert_eq!(back.dims(), ["phalf"]);
        for k in 1..4 {
            assert_abs_diff_eq!(back.values()[[k]], phalf[[k]], epsilon = 1e-12);
        }
        assert_abs_diff_eq!(back.values()[[0]], -1.0);
    }

    #[test]
    fn test_hybrid_pressure() {
        let bk = Field::new("bk", &["phalf"], array![0.0, 0.5, 1.0].into_dyn()).unwrap();
        let pk = Field::new("pk", &["phalf"], array![0.0, 1000.0, 0.0].into_dyn()).unwrap();
        let ps = Field::new("ps", &["lat"], array![1e5, 8e4].into_dyn()).unwrap();
        let pfull_coord = Coord::dim1("pfull", vec![250.0, 750.0]);

        let phalf = phalf_from_ps(&bk, &pk, &ps).unwrap();
        assert_eq!(phalf.dims(), ["phalf", "lat"]);
        assert_abs_diff_eq!(phalf.values()[[1, 1]], 41000.0);

        let dp = dp_from_ps(&bk, &pk, &ps, &pfull_coord).unwrap();
        assert_eq!(dp.dims(), ["pfull", "lat"]);
        let col = dp.nansum("pfull").unwrap();
        assert_abs_diff_eq!(col.values()[[0]], 1e5);
        assert_abs_diff_eq!(col.values()[[1]], 8e4);

        let pfull = pfull_from_ps(&bk, &pk, &ps, &pfull_coord).unwrap();
        assert_abs_diff_eq!(pfull.values()[[0, 0]], 25500.0);
    }

    #[test]
    fn test_d_deta_from_pfull() {
        let arr = Field::new("x", &["pfull"], array![1.0, 2.0, 4.0, 8.0].into_dyn()).unwrap();
        let d = d_deta_from_pfull(&arr).unwrap();
        assert_eq!(d.values().iter().copied().collect_vec(), vec![1.0, 1.5, 3.0, 4.0]);
    }

    #[test]
    fn test_level_thickness() {
        let dp = level_thickness(&levels(), 0.0, DEFAULT_P_BOT_STD).unwrap();
        assert_abs_diff_eq!(dp.values()[[0]], 101325.0 - 92500.0);
        assert_abs_diff_eq!(dp.values()[[1]], 25000.0);
        assert_abs_diff_eq!(dp.values()[[3]], 35000.0);
    }

    #[test]
    fn test_int_dp_g() {
        let arr = Field::new("x", &["pfull", "lat"], ArrayD::from_elem(IxDyn(&[2, 3]), 2.0)).unwrap();
        let dp = Field::new("dp", &["pfull"], array![40000.0, 60000.0].into_dyn()).unwrap();
        let int = int_dp_g(&arr, &dp).unwrap();
        assert_eq!(int.dims(), ["lat"]);
        assert_abs_diff_eq!(int.values()[[1]], 2.0 * 1e5 / GRAV_EARTH, epsilon = 1e-9);
    }

    #[test]
    fn test_coord_direction() {
        assert!(!does_coord_increase_w_index(&[1000.0, 500.0]).unwrap());
        assert!(does_coord_increase_w_index(&[1.0, 2.0, 3.0]).unwrap());
        assert!(does_coord_increase_w_index(&[1.0, 1.0]).is_err());
    }
}
