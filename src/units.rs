use std::fmt::Display;

#[derive(Debug)]
pub struct UnknownUnitError {
    pub quantity: &'static str,
    pub unit: String,
}

impl UnknownUnitError {
    fn new<S: ToString>(quantity: &'static str, unit: S) -> Self {
        Self { quantity, unit: unit.to_string() }
    }
}

impl Display for UnknownUnitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unknown {} unit '{}'", self.quantity, self.unit)
    }
}

impl std::error::Error for UnknownUnitError {}

/// Multiply a pressure in `old_unit` by this to get it in `new_unit`.
/// A library utility for callers converting their own pressure data.
pub fn pressure_conv_factor(old_unit: &str, new_unit: &str) -> Result<f64, UnknownUnitError> {
    let fac1 = pascals_per(old_unit)?;
    let fac2 = pascals_per(new_unit)?;
    Ok(fac1 / fac2)
}

fn pascals_per(unit: &str) -> Result<f64, UnknownUnitError> {
    match unit {
        "Pa" | "pa" => Ok(1.0),
        "hPa" | "hpa" | "mb" | "mbar" => Ok(100.0),
        "kPa" | "kpa" => Ok(1000.0),
        _ => Err(UnknownUnitError::new("pressure", unit)),
    }
}

/// Units of the mass-weighted vertical integral of a quantity with `units`.
pub fn vert_int_units(units: &str) -> String {
    if units.is_empty() {
        "(vertical integral of quantity with unspecified units)".to_string()
    } else {
        format!("(vertical integral of {units}): {units} kg m^-2")
    }
}
