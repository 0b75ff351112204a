use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use super::PLUGIN_BUNDLE_DIR;

/// Archive `src_dir` as `plugin_bundle/…` into `dest_tar`.
///
/// The archive is assembled next to `dest_tar` and only renamed into place once
/// complete, so a failure never leaves a partial file at the destination.
pub fn create_tar_gz(src_dir: &Path, dest_tar: &Path) -> Result<()> {
    let parent = match dest_tar.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let staged = NamedTempFile::new_in(&parent)
        .with_context(|| format!("failed to create temporary archive in {}", parent.display()))?;

    let encoder = GzEncoder::new(staged.as_file(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for entry in WalkDir::new(src_dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", src_dir.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src_dir)
            .with_context(|| format!("{} escapes the bundle", entry.path().display()))?;
        let name = Path::new(PLUGIN_BUNDLE_DIR).join(relative);
        if entry.file_type().is_dir() {
            builder
                .append_dir(&name, entry.path())
                .with_context(|| format!("failed to add {} to bundle", name.display()))?;
        } else if entry.file_type().is_file() {
            builder
                .append_path_with_name(entry.path(), &name)
                .with_context(|| format!("failed to add {} to bundle", name.display()))?;
        }
    }
    builder
        .into_inner()
        .and_then(|gz| gz.finish())
        .with_context(|| format!("failed to finish bundle {}", dest_tar.display()))?;

    staged
        .persist_noclobber(dest_tar)
        .map_err(|err| anyhow!("failed to write {}: {}", dest_tar.display(), err.error))?;
    Ok(())
}

/// Extract a bundle into `dest_dir` and return the bundle root inside it.
pub fn extract_tar_gz(src_tar: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let file = File::open(src_tar)
        .with_context(|| format!("failed to open bundle {}", src_tar.display()))?;
    tar::Archive::new(GzDecoder::new(file))
        .unpack(dest_dir)
        .with_context(|| format!("failed to extract bundle {}", src_tar.display()))?;

    let root = dest_dir.join(PLUGIN_BUNDLE_DIR);
    Ok(if root.is_dir() {
        root
    } else {
        dest_dir.to_path_buf()
    })
}
