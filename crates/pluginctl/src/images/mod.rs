//! Image transfer seam and image reference helpers.

use std::path::{Path, PathBuf};

use anyhow::Result;

pub mod oci;
pub mod tarball;

pub use oci::OciImageOperations;

/// Registry operations the bundle workflows depend on.
pub trait ImageOperations {
    /// Pull `image` and write the files it carries into `dest_dir`.
    fn download_image_and_save_files_to_dir(&self, image: &str, dest_dir: &Path) -> Result<()>;

    /// Pull `image` into a portable tarball at `dest_tar_file`.
    fn copy_image_to_tar(&self, image: &str, dest_tar_file: &Path) -> Result<()>;

    /// Push the image stored in `src_tar_file` to `dest_repo`, keeping its tag.
    fn copy_image_from_tar(&self, src_tar_file: &Path, dest_repo: &str) -> Result<()>;

    /// Publish `file_paths` as the layers of `image_with_tag`.
    fn push_image(&self, image_with_tag: &str, file_paths: &[PathBuf]) -> Result<()>;
}

impl<T: ImageOperations + ?Sized> ImageOperations for &T {
    fn download_image_and_save_files_to_dir(&self, image: &str, dest_dir: &Path) -> Result<()> {
        (**self).download_image_and_save_files_to_dir(image, dest_dir)
    }

    fn copy_image_to_tar(&self, image: &str, dest_tar_file: &Path) -> Result<()> {
        (**self).copy_image_to_tar(image, dest_tar_file)
    }

    fn copy_image_from_tar(&self, src_tar_file: &Path, dest_repo: &str) -> Result<()> {
        (**self).copy_image_from_tar(src_tar_file, dest_repo)
    }

    fn push_image(&self, image_with_tag: &str, file_paths: &[PathBuf]) -> Result<()> {
        (**self).push_image(image_with_tag, file_paths)
    }
}

/// Split `repo[:tag]` or `repo@digest` into the repository and the tag or digest.
pub fn split_tag(image: &str) -> (&str, Option<&str>) {
    if let Some((repo, digest)) = image.split_once('@') {
        return (repo, Some(digest));
    }
    let last_slash = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[last_slash..].rfind(':') {
        Some(pos) => {
            let split = last_slash + pos;
            (&image[..split], Some(&image[split + 1..]))
        }
        None => (image, None),
    }
}

pub fn strip_tag(image: &str) -> &str {
    split_tag(image).0
}

/// Registry host of an image reference (`host[:port]`), or `docker.io` when the
/// reference has no explicit registry.
pub fn registry_host(image: &str) -> &str {
    match image.split_once('/') {
        Some((first, _)) if first.contains(['.', ':']) || first == "localhost" => first,
        _ => "docker.io",
    }
}

/// Directory of an image repository: `host/a/b/name:tag` becomes `host/a/b`.
pub fn image_repository_base(image: &str) -> &str {
    let repo = strip_tag(image);
    repo.rsplit_once('/').map(|(base, _)| base).unwrap_or("")
}

/// `image` relative to `base`, optionally without its tag or digest.
///
/// `base` may carry a trailing slash. Images outside `base` are returned unchanged
/// apart from the tag handling.
pub fn relative_image_path(image: &str, base: &str, with_tag: bool) -> String {
    let base = base.trim_end_matches('/');
    let relative = if base.is_empty() {
        image
    } else {
        image
            .strip_prefix(base)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(image)
    };
    if with_tag {
        relative.to_string()
    } else {
        strip_tag(relative).to_string()
    }
}

/// Join a repository root and a relative image path with exactly one `/`.
pub fn join_image_path(repo: &str, relative: &str) -> String {
    let repo = repo.trim_end_matches('/');
    let relative = relative.trim_start_matches('/');
    match (repo.is_empty(), relative.is_empty()) {
        (true, _) => relative.to_string(),
        (_, true) => repo.to_string(),
        _ => format!("{repo}/{relative}"),
    }
}

/// `…/plugin-inventory:latest` becomes `…/plugin-inventory-metadata:latest`.
pub fn metadata_image_name(inventory_image: &str) -> String {
    match split_tag(inventory_image) {
        (repo, Some(tag)) if inventory_image.contains('@') => format!("{repo}-metadata@{tag}"),
        (repo, Some(tag)) => format!("{repo}-metadata:{tag}"),
        (repo, None) => format!("{repo}-metadata"),
    }
}
