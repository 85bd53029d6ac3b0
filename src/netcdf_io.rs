//! Reading and writing calculation outputs as netCDF files.
//!
//! Outputs are written in the 64-bit offset classic format. Every coordinate
//! used by any field is written once, as its own variable; coordinates that are
//! not dimension coordinates are listed in each field's `coordinates` attribute
//! (as in the CF conventions) so that reading can reattach them.
use std::path::Path;

use error_stack::ResultExt;
use indexmap::IndexMap;
use itertools::Itertools;
use ndarray::ArrayD;
use netcdf::{
    types::{FloatType, IntType, NcVariableType},
    AttributeValue, Extents,
};

use crate::error::{CalcError, CalcResult};
use crate::field::{Coord, Field};
use crate::names::TIME_STR;
use crate::times::{TIME_CALENDAR, TIME_UNITS};

const COORDINATES_ATTR: &str = "coordinates";

/// An ordered collection of fields plus global attributes, as stored in one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub fields: IndexMap<String, Field>,
    pub attrs: IndexMap<String, String>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_field(field: Field) -> Self {
        let mut ds = Self::new();
        ds.insert(field);
        ds
    }

    /// Add a field under its name, replacing any field already stored under that name.
    pub fn insert(&mut self, field: Field) {
        self.fields.insert(field.name.clone(), field);
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Add every field of `other`, replacing fields with the same names. Global
    /// attributes of `other` likewise take precedence.
    pub fn update(&mut self, other: Dataset) {
        for (_, field) in other.fields {
            self.insert(field);
        }
        self.attrs.extend(other.attrs);
    }

    /// Write to a new file at `path`, overwriting any existing file.
    pub fn write(&self, path: &Path) -> CalcResult<()> {
        let mut file = netcdf::create_with(path, netcdf::Options::_64BIT_OFFSET)
            .change_context_lazy(|| CalcError::could_not_write(path))?;

        for (dim, len) in self.dimensions()? {
            file.add_dimension(&dim, len)
                .change_context_lazy(|| CalcError::context(format!("adding dimension '{dim}'")))
                .change_context_lazy(|| CalcError::could_not_write(path))?;
        }

        let coords = self.coordinates();
        for (name, coord) in coords.iter() {
            if self.fields.contains_key(name) {
                log::debug!("Not writing coordinate '{name}' since a data variable has the same name");
                continue;
            }
            let attrs = if name == TIME_STR {
                vec![("units", TIME_UNITS), ("calendar", TIME_CALENDAR)]
            } else {
                vec![]
            };
            write_variable(&mut file, name, &coord.dims, &coord.values, attrs.into_iter())
                .change_context_lazy(|| CalcError::could_not_write(path))?;
        }

        for (name, field) in self.fields.iter() {
            let aux = field
                .coords()
                .keys()
                .filter(|k| !field.dims().contains(k))
                .join(" ");
            let mut attrs = field.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect_vec();
            if !aux.is_empty() {
                attrs.push((COORDINATES_ATTR, aux.as_str()));
            }
            write_variable(&mut file, name, field.dims(), field.values(), attrs.into_iter())
                .change_context_lazy(|| CalcError::could_not_write(path))?;
        }

        for (k, v) in self.attrs.iter() {
            file.add_attribute(k, v.as_str())
                .change_context_lazy(|| CalcError::context(format!("adding global attribute '{k}'")))
                .change_context_lazy(|| CalcError::could_not_write(path))?;
        }
        Ok(())
    }

    /// Read a file written by [`Dataset::write`] (or any file of numeric variables).
    pub fn read(path: &Path) -> CalcResult<Self> {
        let file = netcdf::open(path).change_context_lazy(|| CalcError::could_not_read(path))?;

        let mut arrays = IndexMap::new();
        let mut aux_names = vec![];
        for var in file.variables() {
            let name = var.name();
            let dims = var.dimensions().iter().map(|d| d.name()).collect_vec();
            let values = numeric_values(&var).change_context_lazy(|| CalcError::could_not_read(path))?;
            let mut attrs = IndexMap::new();
            for att in var.attributes() {
                let value = att
                    .value()
                    .change_context_lazy(|| CalcError::context(format!("reading attribute '{}' of '{name}'", att.name())))
                    .change_context_lazy(|| CalcError::could_not_read(path))?;
                if let Some(s) = attr_to_string(value) {
                    attrs.insert(att.name().to_string(), s);
                }
            }
            if let Some(aux) = attrs.get(COORDINATES_ATTR) {
                aux_names.extend(aux.split_whitespace().map(|s| s.to_string()));
            }
            arrays.insert(name, (dims, values, attrs));
        }

        let is_coord = |name: &str, dims: &[String]| {
            (dims.len() == 1 && dims[0] == name) || aux_names.iter().any(|a| a == name)
        };

        let mut ds = Dataset::new();
        for (name, (dims, values, attrs)) in arrays.iter() {
            if is_coord(name, dims) {
                continue;
            }
            let mut field = Field::new(name, dims, values.clone())
                .change_context_lazy(|| CalcError::could_not_read(path))?;
            let wanted = attrs
                .get(COORDINATES_ATTR)
                .map(|s| s.split_whitespace().map(|s| s.to_string()).collect_vec())
                .unwrap_or_default();
            for coord_name in dims.iter().chain(wanted.iter()) {
                if let Some((cdims, cvalues, _)) = arrays.get(coord_name) {
                    field.try_set_coord(coord_name, Coord { dims: cdims.clone(), values: cvalues.clone() });
                }
            }
            field.attrs = attrs
                .iter()
                .filter(|(k, _)| k.as_str() != COORDINATES_ATTR)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            ds.insert(field);
        }

        for att in file.attributes() {
            let value = att
                .value()
                .change_context_lazy(|| CalcError::context(format!("reading global attribute '{}'", att.name())))
                .change_context_lazy(|| CalcError::could_not_read(path))?;
            if let Some(s) = attr_to_string(value) {
                ds.attrs.insert(att.name().to_string(), s);
            }
        }
        Ok(ds)
    }

    /// The length of every dimension used by a field or coordinate.
    fn dimensions(&self) -> CalcResult<IndexMap<String, usize>> {
        let mut dims: IndexMap<String, usize> = IndexMap::new();
        let arrays = self.fields.values().flat_map(|f| {
            std::iter::once((f.name.as_str(), f.dims(), f.shape()))
                .chain(f.coords().iter().map(|(k, c)| (k.as_str(), c.dims.as_slice(), c.values.shape())))
        });
        for (name, names, shape) in arrays {
            for (d, &n) in names.iter().zip(shape) {
                match dims.get(d) {
                    Some(&m) if m != n => {
                        return Err(CalcError::shape_mismatch(format!(
                            "dimension '{d}' has length {m} in one field but {n} in '{name}'"
                        ))
                        .into())
                    }
                    Some(_) => {}
                    None => {
                        dims.insert(d.clone(), n);
                    }
                }
            }
        }
        Ok(dims)
    }

    /// Every coordinate of every field, the first occurrence of each name winning.
    fn coordinates(&self) -> IndexMap<String, Coord> {
        let mut coords = IndexMap::new();
        for field in self.fields.values() {
            for (k, c) in field.coords() {
                if !coords.contains_key(k) {
                    coords.insert(k.clone(), c.clone());
                }
            }
        }
        coords
    }
}

fn write_variable<'a, S: AsRef<str>, I: Iterator<Item = (&'a str, &'a str)>>(
    file: &mut netcdf::FileMut,
    name: &str,
    dims: &[S],
    values: &ArrayD<f64>,
    attrs: I,
) -> CalcResult<()> {
    let dims = dims.iter().map(|d| d.as_ref()).collect_vec();
    let mut var = file
        .add_variable::<f64>(name, &dims)
        .change_context_lazy(|| CalcError::context(format!("adding variable '{name}'")))?;
    for (k, v) in attrs {
        var.put_attribute(k, v)
            .change_context_lazy(|| CalcError::context(format!("adding attribute '{k}' to '{name}'")))?;
    }
    if dims.is_empty() {
        let value = values.first().copied().unwrap_or(f64::NAN);
        var.put_value(value, Extents::All)
            .change_context_lazy(|| CalcError::context(format!("writing scalar '{name}'")))?;
    } else {
        var.put(values.as_standard_layout().view(), Extents::All)
            .change_context_lazy(|| CalcError::context(format!("writing values of '{name}'")))?;
    }
    Ok(())
}

/// Read any numeric variable as `f64`. Text and user-defined types are not supported.
fn numeric_values(var: &netcdf::Variable) -> CalcResult<ArrayD<f64>> {
    match var.vartype() {
        NcVariableType::Int(IntType::I8 | IntType::I16 | IntType::I32 | IntType::I64)
        | NcVariableType::Int(IntType::U8 | IntType::U16 | IntType::U32 | IntType::U64)
        | NcVariableType::Float(FloatType::F32 | FloatType::F64) => var
            .get::<f64, _>(Extents::All)
            .change_context_lazy(|| CalcError::context(format!("reading values of '{}'", var.name()))),
        other => Err(CalcError::context(format!(
            "variable '{}' has non-numeric type {other:?}",
            var.name()
        ))
        .into()),
    }
}

fn attr_to_string(value: AttributeValue) -> Option<String> {
    match value {
        AttributeValue::Str(s) => Some(s),
        AttributeValue::Double(v) => Some(v.to_string()),
        AttributeValue::Float(v) => Some(v.to_string()),
        AttributeValue::Int(v) => Some(v.to_string()),
        AttributeValue::Short(v) => Some(v.to_string()),
        AttributeValue::Schar(v) => Some(v.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn example_dataset() -> Dataset {
        let mut f = Field::new("t_surf", &["time", "lat"], array![[280.0, 290.0], [281.0, f64::NAN]].into_dyn())
            .unwrap();
        f.set_coord("time", Coord::dim1("time", vec![1095.5, 1126.0])).unwrap();
        f.set_coord("lat", Coord::dim1("lat", vec![-45.0, 45.0])).unwrap();
        f.set_coord("sfc_area", Coord::dim1("lat", vec![1.0, 2.0])).unwrap();
        f.attrs.insert("units".to_string(), "K".to_string());
        let mut ds = Dataset::from_field(f);
        ds.insert(Field::scalar("global_mean", 285.0));
        ds.attrs.insert("history".to_string(), "created for a test".to_string());
        ds
    }

    #[test]
    fn test_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.nc");
        let ds = example_dataset();
        ds.write(&path).unwrap();

        let back = Dataset::read(&path).unwrap();
        assert_eq!(back.fields.keys().collect_vec(), ["t_surf", "global_mean"]);
        let f = back.get("t_surf").unwrap();
        assert_abs_diff_eq!(f, ds.get("t_surf").unwrap());
        assert_eq!(f.attrs.get("units").map(|s| s.as_str()), Some("K"));
        assert!(!f.attrs.contains_key("coordinates"));
        assert_eq!(f.coord("sfc_area").unwrap().to_vec(), vec![1.0, 2.0]);
        assert_eq!(f.coord("time").unwrap().to_vec(), vec![1095.5, 1126.0]);
        assert_abs_diff_eq!(back.get("global_mean").unwrap().values().first().copied().unwrap(), 285.0);
        assert_eq!(back.attrs.get("history").map(|s| s.as_str()), Some("created for a test"));
    }

    #[test]
    fn test_inconsistent_dims() {
        let mut ds = example_dataset();
        ds.insert(Field::new("bad", &["lat"], array![1.0, 2.0, 3.0].into_dyn()).unwrap());
        let dir = tempfile::tempdir().unwrap();
        let err = ds.write(&dir.path().join("bad.nc")).unwrap_err();
        assert!(matches!(err.current_context(), CalcError::ShapeMismatch(_)));
    }

    #[test]
    fn test_read_missing_file() {
        let err = Dataset::read(Path::new("/nonexistent/file.nc")).unwrap_err();
        assert!(matches!(err.current_context(), CalcError::CouldNotRead(_)));
    }
}
