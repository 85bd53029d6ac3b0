//! Secondary storage of output files in one tar archive per run.
//!
//! Tar archives can be appended to but have no native way to replace an entry,
//! so updating a file means deleting the old entry and appending the new one.
//! The [`ArchiveService`] trait hides how that deletion is done: either by
//! rewriting the archive ([`NativeTarArchive`]) or by calling the system `tar`
//! program ([`SystemTarArchive`]).
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::Command;

use error_stack::ResultExt;

use crate::error::{CalcError, CalcResult};

/// Operations on a tar archive of output files, identified by entry name.
pub trait ArchiveService: Send + Sync {
    /// Create an empty archive (and its parent directories) if none exists.
    fn ensure_exists(&self, archive: &Path) -> CalcResult<()>;

    /// Whether the archive has an entry named `entry`.
    fn contains(&self, archive: &Path, entry: &str) -> CalcResult<bool>;

    /// Add the file at `file` to the end of the archive as `entry`.
    fn append_entry(&self, archive: &Path, file: &Path, entry: &str) -> CalcResult<()>;

    /// Remove every entry named `entry`.
    fn delete_entry(&self, archive: &Path, entry: &str) -> CalcResult<()>;

    /// Extract `entry` into `dest_dir`, returning the extracted file's path, or
    /// `None` if the archive has no such entry.
    fn extract_entry(&self, archive: &Path, entry: &str, dest_dir: &Path) -> CalcResult<Option<PathBuf>>;
}

/// Names of all entries in the archive, in order.
pub fn list_entries(archive: &Path) -> CalcResult<Vec<String>> {
    let file = File::open(archive).change_context_lazy(|| CalcError::could_not_read(archive))?;
    let mut tar = tar::Archive::new(file);
    let mut names = vec![];
    for entry in tar.entries().change_context_lazy(|| CalcError::could_not_read(archive))? {
        let entry = entry.change_context_lazy(|| CalcError::could_not_read(archive))?;
        let path = entry.path().change_context_lazy(|| CalcError::could_not_read(archive))?;
        names.push(path.to_string_lossy().to_string());
    }
    Ok(names)
}

/// Archive maintenance done entirely with the `tar` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeTarArchive;

impl NativeTarArchive {
    /// Byte offset just past the last entry, where new entries must start
    /// (overwriting the end-of-archive blocks).
    fn end_of_entries(archive: &Path) -> CalcResult<u64> {
        let file = File::open(archive).change_context_lazy(|| CalcError::could_not_read(archive))?;
        let mut tar = tar::Archive::new(file);
        let mut end = 0;
        for entry in tar.entries().change_context_lazy(|| CalcError::could_not_read(archive))? {
            let entry = entry.change_context_lazy(|| CalcError::could_not_read(archive))?;
            let padded_size = entry.size().div_ceil(512) * 512;
            end = end.max(entry.raw_file_position() + padded_size);
        }
        Ok(end)
    }
}

impl ArchiveService for NativeTarArchive {
    fn ensure_exists(&self, archive: &Path) -> CalcResult<()> {
        if let Some(parent) = archive.parent() {
            // create_dir_all succeeds if another process created the directory first
            std::fs::create_dir_all(parent).change_context_lazy(|| CalcError::could_not_write(parent))?;
        }
        match OpenOptions::new().write(true).create_new(true).open(archive) {
            Ok(file) => {
                let mut builder = tar::Builder::new(file);
                builder.finish().change_context_lazy(|| CalcError::could_not_write(archive))?;
                log::debug!("Created empty archive {}", archive.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e).change_context_lazy(|| CalcError::could_not_write(archive)),
        }
    }

    fn contains(&self, archive: &Path, entry: &str) -> CalcResult<bool> {
        Ok(list_entries(archive)?.iter().any(|n| n == entry))
    }

    fn append_entry(&self, archive: &Path, file: &Path, entry: &str) -> CalcResult<()> {
        let end = Self::end_of_entries(archive)?;
        let mut out = OpenOptions::new()
            .read(true)
            .write(true)
            .open(archive)
            .change_context_lazy(|| CalcError::could_not_write(archive))?;
        out.set_len(end).change_context_lazy(|| CalcError::could_not_write(archive))?;
        out.seek(SeekFrom::Start(end)).change_context_lazy(|| CalcError::could_not_write(archive))?;

        let mut builder = tar::Builder::new(out);
        builder
            .append_path_with_name(file, entry)
            .change_context_lazy(|| CalcError::could_not_read(file))
            .change_context_lazy(|| CalcError::could_not_write(archive))?;
        builder.finish().change_context_lazy(|| CalcError::could_not_write(archive))?;
        Ok(())
    }

    fn delete_entry(&self, archive: &Path, entry: &str) -> CalcResult<()> {
        if !self.contains(archive, entry)? {
            return Ok(());
        }

        let dir = archive.parent().unwrap_or(Path::new("."));
        let tmp = tempfile::NamedTempFile::new_in(dir).change_context_lazy(|| CalcError::could_not_write(dir))?;
        let mut builder = tar::Builder::new(tmp);

        let file = File::open(archive).change_context_lazy(|| CalcError::could_not_read(archive))?;
        let mut tar = tar::Archive::new(file);
        for old in tar.entries().change_context_lazy(|| CalcError::could_not_read(archive))? {
            let mut old = old.change_context_lazy(|| CalcError::could_not_read(archive))?;
            let path = old
                .path()
                .change_context_lazy(|| CalcError::could_not_read(archive))?
                .into_owned();
            if path.to_string_lossy() == entry {
                continue;
            }
            let mut header = old.header().clone();
            builder
                .append_data(&mut header, &path, &mut old)
                .change_context_lazy(|| CalcError::could_not_write(archive))?;
        }

        let tmp = builder.into_inner().change_context_lazy(|| CalcError::could_not_write(archive))?;
        tmp.persist(archive)
            .map_err(|e| e.error)
            .change_context_lazy(|| CalcError::could_not_write(archive))?;
        Ok(())
    }

    /// If the archive holds several copies of `entry`, the last one wins.
    fn extract_entry(&self, archive: &Path, entry: &str, dest_dir: &Path) -> CalcResult<Option<PathBuf>> {
        let file = File::open(archive).change_context_lazy(|| CalcError::could_not_read(archive))?;
        let mut tar = tar::Archive::new(file);
        let dest = dest_dir.join(entry);
        let mut found = false;
        for e in tar.entries().change_context_lazy(|| CalcError::could_not_read(archive))? {
            let mut e = e.change_context_lazy(|| CalcError::could_not_read(archive))?;
            let is_match = e
                .path()
                .change_context_lazy(|| CalcError::could_not_read(archive))?
                .to_string_lossy()
                == entry;
            if is_match {
                if found {
                    std::fs::remove_file(&dest).change_context_lazy(|| CalcError::could_not_write(&dest))?;
                }
                e.unpack(&dest).change_context_lazy(|| CalcError::could_not_write(&dest))?;
                found = true;
            }
        }
        Ok(found.then_some(dest))
    }
}

/// Like [`NativeTarArchive`], except that entries are deleted by running
/// `tar --delete`, which must be GNU tar or another implementation supporting it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTarArchive;

impl ArchiveService for SystemTarArchive {
    fn ensure_exists(&self, archive: &Path) -> CalcResult<()> {
        NativeTarArchive.ensure_exists(archive)
    }

    fn contains(&self, archive: &Path, entry: &str) -> CalcResult<bool> {
        NativeTarArchive.contains(archive, entry)
    }

    fn append_entry(&self, archive: &Path, file: &Path, entry: &str) -> CalcResult<()> {
        NativeTarArchive.append_entry(archive, file, entry)
    }

    fn delete_entry(&self, archive: &Path, entry: &str) -> CalcResult<()> {
        let file_arg = format!("--file={}", archive.display());
        let command = format!("tar --delete {file_arg} {entry}");
        let status = Command::new("tar")
            .arg("--delete")
            .arg(&file_arg)
            .arg(entry)
            .status()
            .map_err(|e| CalcError::ArchiveCommandFailed { command: command.clone(), status: e.to_string() })?;
        if status.success() {
            Ok(())
        } else {
            Err(CalcError::ArchiveCommandFailed { command, status: status.to_string() }.into())
        }
    }

    fn extract_entry(&self, archive: &Path, entry: &str, dest_dir: &Path) -> CalcResult<Option<PathBuf>> {
        NativeTarArchive.extract_entry(archive, entry, dest_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let p = dir.join(name);
        let mut f = File::create(&p).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        p
    }

    #[test]
    fn test_append_delete_extract() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("sub").join("data.tar");
        let svc = NativeTarArchive;
        svc.ensure_exists(&archive).unwrap();
        assert!(list_entries(&archive).unwrap().is_empty());

        let a = write_file(dir.path(), "a.nc", "first a");
        let b = write_file(dir.path(), "b.nc", "only b");
        svc.append_entry(&archive, &a, "a.nc").unwrap();
        svc.append_entry(&archive, &b, "b.nc").unwrap();
        assert_eq!(list_entries(&archive).unwrap(), ["a.nc", "b.nc"]);

        svc.delete_entry(&archive, "a.nc").unwrap();
        assert_eq!(list_entries(&archive).unwrap(), ["b.nc"]);
        // Deleting an absent entry does nothing
        svc.delete_entry(&archive, "a.nc").unwrap();

        let a = write_file(dir.path(), "a.nc", "second a");
        svc.append_entry(&archive, &a, "a.nc").unwrap();
        assert_eq!(list_entries(&archive).unwrap(), ["b.nc", "a.nc"]);

        let out = tempfile::tempdir().unwrap();
        let extracted = svc.extract_entry(&archive, "a.nc", out.path()).unwrap().unwrap();
        assert_eq!(std::fs::read_to_string(extracted).unwrap(), "second a");
        assert!(svc.extract_entry(&archive, "c.nc", out.path()).unwrap().is_none());
    }

    #[test]
    fn test_ensure_exists_keeps_contents() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("data.tar");
        let svc = NativeTarArchive;
        svc.ensure_exists(&archive).unwrap();
        let a = write_file(dir.path(), "a.nc", "a");
        svc.append_entry(&archive, &a, "a.nc").unwrap();
        svc.ensure_exists(&archive).unwrap();
        assert!(svc.contains(&archive, "a.nc").unwrap());
    }

    #[test]
    fn test_long_entry_names() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("data.tar");
        let svc = NativeTarArchive;
        svc.ensure_exists(&archive).unwrap();
        let long_name = format!("{}.nc", "x".repeat(120));
        let f = write_file(dir.path(), "long.nc", "long");
        svc.append_entry(&archive, &f, &long_name).unwrap();
        svc.append_entry(&archive, &f, "short.nc").unwrap();
        svc.delete_entry(&archive, "short.nc").unwrap();
        assert_eq!(list_entries(&archive).unwrap(), [long_name]);
    }

    #[test]
    fn test_extract_prefers_last_copy() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("data.tar");
        let svc = NativeTarArchive;
        svc.ensure_exists(&archive).unwrap();
        let old = write_file(dir.path(), "old.nc", "old");
        let new = write_file(dir.path(), "new.nc", "new");
        svc.append_entry(&archive, &old, "a.nc").unwrap();
        svc.append_entry(&archive, &new, "a.nc").unwrap();
        assert_eq!(list_entries(&archive).unwrap(), ["a.nc", "a.nc"]);

        let out = tempfile::tempdir().unwrap();
        let extracted = svc.extract_entry(&archive, "a.nc", out.path()).unwrap().unwrap();
        assert_eq!(std::fs::read_to_string(extracted).unwrap(), "new");
    }
}
