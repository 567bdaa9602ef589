//! Filesystem helpers.
//!
//! Durable state is always replaced as a whole file: the data is written to a
//! temporary sibling, synced, and renamed over the target. Readers see either
//! the previous complete file or the new one, never a partial write.

use log::warn;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Path of the temporary file used while replacing `target`
pub fn temp_path_for(target: &Path) -> PathBuf {
    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    target.with_file_name(format!(".{}.tmp", file_name))
}

/// Atomic write: write data to a temporary file, then rename into place.
///
/// The temp file lives in the same directory as `target` so the rename never
/// crosses filesystems. On any failure the temp file is removed and the
/// previous contents of `target` are left untouched.
pub fn atomic_write(target: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(dir) = target.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }

    let tmp_path = temp_path_for(target);

    let result = (|| {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, target)
    })();

    if let Err(e) = &result {
        warn!(
            "failed to replace {} via {}: {}",
            target.display(),
            tmp_path.display(),
            e
        );
        let _ = fs::remove_file(&tmp_path);
    }

    result
}
