//! Pressure and pressure-thickness fields for either kind of vertical coordinate.
use crate::catalog::{Model, PressureKind};
use crate::config::DtypeInVert;
use crate::error::{CalcError, CalcResult};
use crate::field::{Coord, Field};
use crate::names::{GridAttr, PFULL_STR, PLEVEL_STR};
use crate::vertcoord::{dp_from_p, dp_from_ps, pfull_from_ps, to_pascal, DEFAULT_P_BOT};

/// Top edge of the highest pressure level, in Pa.
pub const DEFAULT_P_TOP: f64 = 0.0;

/// The vertical coordinate of a calculation's input data, with everything needed to
/// turn surface pressure into level pressures.
#[derive(Debug, Clone)]
pub enum VerticalCoords {
    /// Fixed pressure levels
    Pressure { level: Field },
    /// Hybrid sigma-pressure levels: half-level pressure is `ps * bk + pk`
    Sigma { pk: Field, bk: Field, pfull: Coord },
}

impl VerticalCoords {
    /// Build from the model's grid.
    ///
    /// For pressure data, `level` (the level coordinate found in the loaded data)
    /// takes precedence over the model's; for hybrid data the model's full-level
    /// coordinate is used.
    pub fn new(encoding: DtypeInVert, model: &Model, level: Option<&Coord>) -> CalcResult<Self> {
        match encoding {
            DtypeInVert::Pressure => {
                let level = match level {
                    Some(c) => Field::from_coord(PLEVEL_STR, c),
                    None => model.grid_field(GridAttr::Level)?,
                };
                Ok(Self::Pressure { level })
            }
            DtypeInVert::Sigma => {
                let pfull = model
                    .grid_attr(GridAttr::Pfull)
                    .ok_or_else(|| CalcError::missing_coordinate(&model.name, PFULL_STR))?
                    .clone();
                Ok(Self::Sigma { pk: model.grid_field(GridAttr::Pk)?, bk: model.grid_field(GridAttr::Bk)?, pfull })
            }
        }
    }

    /// The input vertical encoding these coordinates describe, for library callers.
    pub fn encoding(&self) -> DtypeInVert {
        match self {
            Self::Pressure { .. } => DtypeInVert::Pressure,
            Self::Sigma { .. } => DtypeInVert::Sigma,
        }
    }

    /// Full-level pressure or level thickness (Pa) given surface pressure `ps`.
    ///
    /// On pressure levels, `p` is the level coordinate itself and does not depend on `ps`.
    pub fn pressure(&self, kind: PressureKind, ps: &Field) -> CalcResult<Field> {
        let out = match (self, kind) {
            (Self::Pressure { level }, PressureKind::P) => to_pascal(level, false),
            (Self::Pressure { level }, PressureKind::Dp) => dp_from_p(level, ps, DEFAULT_P_TOP, DEFAULT_P_BOT)?,
            (Self::Sigma { pk, bk, pfull }, PressureKind::P) => pfull_from_ps(bk, pk, ps, pfull)?,
            (Self::Sigma { pk, bk, pfull }, PressureKind::Dp) => dp_from_ps(bk, pk, ps, pfull)?,
        };
        let mut out = out.with_name(kind);
        out.attrs.insert("units".to_string(), "Pa".to_string());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn sigma_model() -> Model {
        Model::new("toy")
            .with_grid_attr(GridAttr::Pk, Coord::dim1("phalf", vec![0.0, 5000.0, 0.0]))
            .with_grid_attr(GridAttr::Bk, Coord::dim1("phalf", vec![0.0, 0.5, 1.0]))
            .with_grid_attr(GridAttr::Pfull, Coord::dim1("pfull", vec![300.0, 800.0]))
            .with_grid_attr(GridAttr::Level, Coord::dim1("level", vec![1000.0, 500.0]))
    }

    #[test]
    fn test_sigma_pressure() {
        let coords = VerticalCoords::new(DtypeInVert::Sigma, &sigma_model(), None).unwrap();
        let ps = Field::new("ps", &["lat"], array![1.0e5, 8.0e4].into_dyn()).unwrap();

        let p = coords.pressure(PressureKind::P, &ps).unwrap();
        assert_eq!(p.name, "p");
        assert_eq!(p.dims(), ["pfull", "lat"]);
        // Half levels at ps = 1e5: 0, 55000, 100000
        assert_abs_diff_eq!(p.values()[[0, 0]], 27500.0);
        assert_abs_diff_eq!(p.values()[[1, 0]], 77500.0);

        let dp = coords.pressure(PressureKind::Dp, &ps).unwrap();
        let column: f64 = dp.values().index_axis(ndarray::Axis(1), 1).sum();
        assert_abs_diff_eq!(column, 8.0e4);
    }

    #[test]
    fn test_pressure_levels() {
        let model = sigma_model();
        let coords = VerticalCoords::new(DtypeInVert::Pressure, &model, None).unwrap();
        let ps = Field::new("ps", &["lat"], array![1.0e5, 8.0e4].into_dyn()).unwrap();
        let p = coords.pressure(PressureKind::P, &ps).unwrap();
        assert_eq!(p.values().iter().copied().collect::<Vec<_>>(), vec![1.0e5, 5.0e4]);

        let dp = coords.pressure(PressureKind::Dp, &ps).unwrap();
        assert_eq!(dp.dims(), ["level", "lat"]);
        assert_abs_diff_eq!(dp.values()[[0, 0]], 25000.0);
        assert_abs_diff_eq!(dp.values()[[1, 0]], 75000.0);
        assert_abs_diff_eq!(dp.values()[[0, 1]], 5000.0);

        // A level coordinate from the data wins over the model's
        let data_level = Coord::dim1("level", vec![850.0, 200.0]);
        let coords = VerticalCoords::new(DtypeInVert::Pressure, &model, Some(&data_level)).unwrap();
        let p = coords.pressure(PressureKind::P, &ps).unwrap();
        assert_abs_diff_eq!(p.values()[[0]], 85000.0);
    }

    #[test]
    fn test_missing_hybrid_coefficients() {
        let model = Model::new("bare");
        let err = VerticalCoords::new(DtypeInVert::Sigma, &model, None).unwrap_err();
        assert!(matches!(err.current_context(), CalcError::MissingCoordinate { .. }));
    }
}
