//! Where calculation outputs live, and saving them to and loading them from
//! the primary netCDF store and the run's tar archive.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use error_stack::ResultExt;
use indexmap::IndexMap;

use crate::archive::ArchiveService;
use crate::calc::CalcIdentity;
use crate::catalog::{Model, Project, Run};
use crate::config::{DtypeInTime, DtypeInVert, IntervalIn, VertReduction};
use crate::error::{CalcError, CalcResult};
use crate::netcdf_io::Dataset;
use crate::pipeline::OutputData;
use crate::reductions::OutputReduction;
use crate::times::{year_label, IntervalOut};

/// Name of the archive holding every output of one run
pub const ARCHIVE_FILE_NAME: &str = "data.tar";

/// Label describing an output: interval, time reduction, and vertical reduction,
/// e.g. `ann.av` or `djf.reg.ts.vert_int`.
pub fn data_out_label(
    intvl_out: &IntervalOut,
    reduction: &OutputReduction,
    dtype_out_vert: Option<VertReduction>,
) -> String {
    let mut label = format!("{}.{}", intvl_out.label(), reduction.label());
    if let Some(vert) = dtype_out_vert {
        label.push('.');
        label.push_str(&vert.to_string());
    }
    label
}

/// Label describing the input data, e.g. `from_monthly_ts_sigma`.
pub fn data_in_label(intvl_in: IntervalIn, dtype_in_time: DtypeInTime, dtype_in_vert: Option<DtypeInVert>) -> String {
    let mut label = format!("from_{intvl_in}_{dtype_in_time}");
    if let Some(vert) = dtype_in_vert {
        label.push('_');
        label.push_str(&vert.to_string());
    }
    label
}

/// The file names and directories of one calculation's outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPaths {
    pub var_name: String,
    pub dir_out: PathBuf,
    /// `None` if the project does not archive its outputs
    pub tar_path: Option<PathBuf>,
    intvl_out: IntervalOut,
    dtype_out_vert: Option<VertReduction>,
    in_label: String,
    model: String,
    run: String,
    yr_label: String,
}

impl OutputPaths {
    pub fn new(project: &Project, model: &Model, run: &Run, identity: &CalcIdentity) -> Self {
        let dir_out = project
            .direc_out
            .join(&project.name)
            .join(&model.name)
            .join(&run.name)
            .join(&identity.var);
        let tar_path = project
            .tar_direc_out
            .as_ref()
            .map(|t| t.join(&project.name).join(&model.name).join(&run.name).join(ARCHIVE_FILE_NAME));
        let in_label = data_in_label(identity.intvl_in, identity.dtype_in_time, identity.dtype_in_vert);
        let yr_label = identity.year_label();
        Self {
            var_name: identity.var.clone(),
            dir_out,
            tar_path,
            intvl_out: identity.intvl_out.clone(),
            dtype_out_vert: identity.dtype_out_vert,
            in_label,
            model: model.name.clone(),
            run: run.name.clone(),
            yr_label,
        }
    }

    /// `<var>.<out_label>.<in_label>.<model>.<run>.<years>.nc`
    pub fn file_name(&self, reduction: &OutputReduction) -> String {
        let out_label = data_out_label(&self.intvl_out, reduction, self.dtype_out_vert);
        [
            self.var_name.as_str(),
            &out_label,
            &self.in_label,
            &self.model,
            &self.run,
            &self.yr_label,
            "nc",
        ]
        .join(".")
        .replace("..", ".")
    }

    pub fn path_out(&self, reduction: &OutputReduction) -> PathBuf {
        self.dir_out.join(self.file_name(reduction))
    }
}

/// Saves outputs to the primary store (and optionally the archive) and loads them back.
#[derive(Clone)]
pub struct PersistenceManager {
    paths: OutputPaths,
    archive: Arc<dyn ArchiveService>,
}

impl std::fmt::Debug for PersistenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceManager").field("paths", &self.paths).finish()
    }
}

impl PersistenceManager {
    pub fn new(paths: OutputPaths, archive: Arc<dyn ArchiveService>) -> Self {
        Self { paths, archive }
    }

    pub fn paths(&self) -> &OutputPaths {
        &self.paths
    }

    /// Write one output to its file, then to the archive if `write_to_tar` is set
    /// and the project has an archive directory. `global_attrs` are added to the file.
    pub fn save(
        &self,
        data: &OutputData,
        reduction: &OutputReduction,
        global_attrs: &IndexMap<String, String>,
        write_to_tar: bool,
    ) -> CalcResult<PathBuf> {
        let path = self.save_file(data, reduction, global_attrs)?;
        if write_to_tar {
            self.write_to_tar(reduction, &path)?;
        }
        log::info!("\t{}", path.display());
        Ok(path)
    }

    /// Region outputs are merged into any existing file for the same reduction, so
    /// that regions computed separately accumulate; an unreadable file counts as empty.
    fn save_file(
        &self,
        data: &OutputData,
        reduction: &OutputReduction,
        global_attrs: &IndexMap<String, String>,
    ) -> CalcResult<PathBuf> {
        let path = self.paths.path_out(reduction);
        std::fs::create_dir_all(&self.paths.dir_out)
            .change_context_lazy(|| CalcError::could_not_write(&self.paths.dir_out))?;

        let mut ds = if reduction.is_regional() && path.exists() {
            Dataset::read(&path).unwrap_or_else(|e| {
                log::debug!("Could not read existing region file {}, replacing it: {e:?}", path.display());
                Dataset::new()
            })
        } else {
            Dataset::new()
        };
        ds.update(data.to_dataset(&self.paths.var_name));
        ds.attrs.extend(global_attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
        ds.write(&path)?;
        Ok(path)
    }

    /// Replace this output's entry in the run's archive with the file at `path`.
    fn write_to_tar(&self, reduction: &OutputReduction, path: &Path) -> CalcResult<()> {
        let Some(tar_path) = &self.paths.tar_path else {
            return Ok(());
        };
        let entry = self.paths.file_name(reduction);
        self.archive.ensure_exists(tar_path)?;

        let scratch = tempfile::tempdir().change_context_lazy(|| CalcError::context("creating a scratch directory"))?;
        if let Some(old) = self.archive.extract_entry(tar_path, &entry, scratch.path())? {
            std::fs::remove_file(&old).change_context_lazy(|| CalcError::could_not_write(&old))?;
            if let Err(e) = self.archive.delete_entry(tar_path, &entry) {
                log::warn!(
                    "Deleting the old copy of {entry} from {} failed, so the archive may now hold two copies. \
                     If using the system tar program, an old version of tar (especially on a Mac) is the most likely cause; \
                     consider a newer tar or disabling archive output. Error: {e:?}",
                    tar_path.display()
                );
            }
        }
        self.archive.append_entry(tar_path, path, &entry)
    }

    /// Load an output from its file in the primary store.
    pub fn load_from_disk(&self, reduction: &OutputReduction) -> CalcResult<OutputData> {
        let path = self.paths.path_out(reduction);
        let ds = Dataset::read(&path)?;
        OutputData::from_dataset(ds, &self.paths.var_name, reduction.is_regional())
            .change_context_lazy(|| CalcError::could_not_read(&path))
    }

    /// Load an output from the run's archive.
    pub fn load_from_tar(&self, reduction: &OutputReduction) -> CalcResult<OutputData> {
        let entry = self.paths.file_name(reduction);
        let tar_path = self
            .paths
            .tar_path
            .as_ref()
            .ok_or_else(|| CalcError::context(format!("no archive configured to look for {entry} in")))?;
        let scratch = tempfile::tempdir().change_context_lazy(|| CalcError::context("creating a scratch directory"))?;
        let extracted = self
            .archive
            .extract_entry(tar_path, &entry, scratch.path())?
            .ok_or_else(|| CalcError::could_not_read(tar_path.join(&entry)))?;
        let ds = Dataset::read(&extracted)?;
        OutputData::from_dataset(ds, &self.paths.var_name, reduction.is_regional())
            .change_context_lazy(|| CalcError::could_not_read(tar_path))
    }

    /// Load an output from the primary store, falling back on the archive.
    pub fn load(&self, reduction: &OutputReduction) -> CalcResult<OutputData> {
        match self.load_from_disk(reduction) {
            Ok(data) => Ok(data),
            Err(disk_err) => {
                log::info!(
                    "Could not load {} from the primary store, trying the archive",
                    self.paths.file_name(reduction)
                );
                self.load_from_tar(reduction)
                    .attach_printable_lazy(|| format!("primary store error: {disk_err:?}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    use crate::archive::{list_entries, NativeTarArchive};
    use crate::field::{Coord, Field};
    use crate::test_utils::{
        example_identity, example_model, example_project, example_run, NoDeleteArchive, SyntheticSource,
    };

    fn manager(root: &Path, reductions: &[&str]) -> PersistenceManager {
        manager_with_archive(root, reductions, Arc::new(NativeTarArchive))
    }

    fn manager_with_archive(root: &Path, reductions: &[&str], archive: Arc<dyn ArchiveService>) -> PersistenceManager {
        let project = example_project(&root.join("out"), Some(&root.join("tar")));
        let model = example_model();
        let run = example_run(SyntheticSource::shared());
        let identity = example_identity(reductions);
        PersistenceManager::new(OutputPaths::new(&project, &model, &run, &identity), archive)
    }

    fn region_output(name: &str, value: f64) -> OutputData {
        let mut f = Field::new(name, &["year"], array![value, value + 1.0].into_dyn()).unwrap();
        f.set_coord("year", Coord::dim1("year", vec![4.0, 5.0])).unwrap();
        OutputData::Regional([(name.to_string(), f)].into_iter().collect())
    }

    #[test]
    fn test_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), &["av"]);
        let name = m.paths().file_name(&"reg.av".parse().unwrap());
        assert_eq!(name, "t_surf.ann.reg.av.from_monthly_ts_sigma.example_model.example_run.0004-0006.nc");
        let path = m.paths().path_out(&"av".parse().unwrap());
        assert!(path.ends_with("example_proj/example_model/example_run/t_surf/t_surf.ann.av.from_monthly_ts_sigma.example_model.example_run.0004-0006.nc"));
        assert!(m.paths().tar_path.as_ref().unwrap().ends_with("example_proj/example_model/example_run/data.tar"));
    }

    #[test]
    fn test_labels() {
        let reduction: OutputReduction = "ts".parse().unwrap();
        assert_eq!(data_out_label(&IntervalOut::Month(7), &reduction, Some(VertReduction::VertInt)), "jul.ts.vert_int");
        assert_eq!(data_in_label(IntervalIn::SixHourly, DtypeInTime::Inst, None), "from_6hr_inst");
    }

    #[test]
    fn test_region_merge_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), &["reg.av"]);
        let reduction: OutputReduction = "reg.av".parse().unwrap();
        let attrs = IndexMap::new();

        m.save(&region_output("globe", 1.0), &reduction, &attrs, false).unwrap();
        m.save(&region_output("globe", 1.0), &reduction, &attrs, false).unwrap();
        let OutputData::Regional(regs) = m.load_from_disk(&reduction).unwrap() else {
            panic!("expected regional output");
        };
        assert_eq!(regs.len(), 1);

        m.save(&region_output("nh", 10.0), &reduction, &attrs, false).unwrap();
        let OutputData::Regional(regs) = m.load_from_disk(&reduction).unwrap() else {
            panic!("expected regional output");
        };
        assert_eq!(regs.keys().collect::<Vec<_>>(), ["globe", "nh"]);
        assert_eq!(regs["globe"].values().iter().copied().collect::<Vec<_>>(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_corrupt_region_file_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), &["reg.av"]);
        let reduction: OutputReduction = "reg.av".parse().unwrap();
        let path = m.paths().path_out(&reduction);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"not a netcdf file").unwrap();

        m.save(&region_output("globe", 1.0), &reduction, &IndexMap::new(), false).unwrap();
        assert!(m.load_from_disk(&reduction).is_ok());
    }

    #[test]
    fn test_archive_single_entry_with_newest_content() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), &["av"]);
        let reduction: OutputReduction = "av".parse().unwrap();
        let attrs = IndexMap::new();
        let data = |v: f64| OutputData::Gridded(Field::new("t_surf", &["lat"], array![v, v].into_dyn()).unwrap());

        m.save(&data(1.0), &reduction, &attrs, true).unwrap();
        m.save(&data(2.0), &reduction, &attrs, true).unwrap();
        let tar_path = m.paths().tar_path.clone().unwrap();
        let name = m.paths().file_name(&reduction);
        assert_eq!(list_entries(&tar_path).unwrap(), [name]);

        std::fs::remove_file(m.paths().path_out(&reduction)).unwrap();
        let OutputData::Gridded(f) = m.load(&reduction).unwrap() else {
            panic!("expected gridded output");
        };
        assert_eq!(f.values().iter().copied().collect::<Vec<_>>(), vec![2.0, 2.0]);
    }

    #[test]
    fn test_failed_archive_delete_still_saves() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(NoDeleteArchive::default());
        let m = manager_with_archive(dir.path(), &["av"], archive.clone());
        let reduction: OutputReduction = "av".parse().unwrap();
        let attrs = IndexMap::new();
        let data = |v: f64| OutputData::Gridded(Field::new("t_surf", &["lat"], array![v, v].into_dyn()).unwrap());

        m.save(&data(1.0), &reduction, &attrs, true).unwrap();
        assert_eq!(archive.delete_attempts(), 0);
        m.save(&data(2.0), &reduction, &attrs, true).unwrap();
        assert_eq!(archive.delete_attempts(), 1);

        let tar_path = m.paths().tar_path.clone().unwrap();
        assert_eq!(list_entries(&tar_path).unwrap().len(), 2);
        let OutputData::Gridded(f) = m.load_from_tar(&reduction).unwrap() else {
            panic!("expected gridded output");
        };
        assert_eq!(f.values().iter().copied().collect::<Vec<_>>(), vec![2.0, 2.0]);
    }

    #[test]
    fn test_load_missing_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), &["av"]);
        assert!(m.load(&"av".parse().unwrap()).is_err());
    }
}
