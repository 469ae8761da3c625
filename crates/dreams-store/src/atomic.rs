use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::StoreError;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Replace `path` with `bytes` so readers see either the old or the new document.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|err| StoreError::io(parent, err))?;

    let (tmp_path, mut file) =
        open_unique_tmp_file(path, parent).map_err(|err| StoreError::io(parent, err))?;
    let written = file.write_all(bytes).and_then(|()| file.sync_all());
    drop(file);

    if let Err(err) = written.and_then(|()| replace(&tmp_path, path)) {
        remove_tmp_best_effort(&tmp_path);
        return Err(StoreError::io(path, err));
    }
    Ok(())
}

fn replace(tmp_path: &Path, path: &Path) -> io::Result<()> {
    match fs::rename(tmp_path, path) {
        // `rename` does not overwrite on Windows.
        Err(err) if cfg!(windows) && path.exists() => {
            fs::remove_file(path).or_else(|remove_err| {
                if remove_err.kind() == io::ErrorKind::NotFound {
                    Ok(())
                } else {
                    Err(err)
                }
            })?;
            fs::rename(tmp_path, path)
        }
        other => other,
    }
}

fn remove_tmp_best_effort(tmp_path: &Path) {
    if let Err(err) = fs::remove_file(tmp_path) {
        if err.kind() != io::ErrorKind::NotFound {
            tracing::debug!(
                target: "dreams.store",
                path = %tmp_path.display(),
                error = %err,
                "failed to remove temporary file"
            );
        }
    }
}

fn open_unique_tmp_file(dest: &Path, parent: &Path) -> io::Result<(PathBuf, fs::File)> {
    let file_name = dest
        .file_name()
        .ok_or_else(|| io::Error::other("destination path has no file name"))?;
    let pid = std::process::id();

    loop {
        let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(format!(".tmp.{pid}.{counter}"));
        let tmp_path = parent.join(tmp_name);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrites_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dreams.json");

        atomic_write(&path, b"[1]").unwrap();
        atomic_write(&path, b"[2]").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "[2]");
        let entries: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("dreams.json")]);
    }
}
