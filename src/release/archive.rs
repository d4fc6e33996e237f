use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::error::{AppError, Result};

/// Extract a gzipped tarball into `dest` and return the content root.
///
/// Hosting providers wrap the tree in one top-level directory (`owner-repo-sha/`);
/// when the archive holds exactly one directory and nothing else, that directory
/// is the content root. Entries escaping `dest` are refused by `tar`.
pub fn extract(archive_path: &Path, dest: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dest)?;

    let file = File::open(archive_path).map_err(|e| {
        AppError::Archive(format!("cannot open {}: {e}", archive_path.display()))
    })?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);
    archive
        .unpack(dest)
        .map_err(|e| AppError::Archive(format!("cannot unpack {}: {e}", archive_path.display())))?;

    content_root(dest)
}

fn content_root(dest: &Path) -> Result<PathBuf> {
    let entries: Vec<_> = std::fs::read_dir(dest)?
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        // GNU tar global headers can leave a pax file next to the root dir
        .filter(|e| e.file_name() != "pax_global_header")
        .collect();

    if entries.is_empty() {
        return Err(AppError::Archive("archive contains no files".to_string()));
    }
    if let [only] = entries.as_slice() {
        if only.file_type()?.is_dir() {
            return Ok(only.path());
        }
    }
    Ok(dest.to_path_buf())
}
