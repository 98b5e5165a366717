use crate::protocol::VersionedArtifact;
use crate::shared::checksum::{sha256_file, short_checksum};
use crate::shared::fs_atomic::{remove_if_exists, staging_path};
use std::fs;
use std::path::{Path, PathBuf};

/// `<base>_v<attempt>_<checksum8>.<ext>` next to `output`.
pub fn versioned_path(output: &Path, attempt: u32, checksum: &str) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let suffix = format!("_v{attempt}_{}", short_checksum(checksum));
    let name = match output.extension() {
        Some(ext) => format!("{stem}{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}{suffix}"),
    };
    output.with_file_name(name)
}

/// Copies the current output aside before correction cycle `attempt`
/// overwrites it. The copy is staged and renamed, so an interrupted backup
/// never leaves a truncated versioned file.
pub fn back_up_output(output: &Path, attempt: u32) -> std::io::Result<VersionedArtifact> {
    let checksum = sha256_file(output)?;
    let path = versioned_path(output, attempt, &checksum);
    if path.is_file() && sha256_file(&path)? == checksum {
        return Ok(VersionedArtifact {
            attempt,
            path,
            checksum,
        });
    }
    let staged = staging_path(&path);
    if let Err(err) = fs::copy(output, &staged).and_then(|_| fs::rename(&staged, &path)) {
        let _ = remove_if_exists(&staged);
        return Err(err);
    }
    Ok(VersionedArtifact {
        attempt,
        path,
        checksum,
    })
}
