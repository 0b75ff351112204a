#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow, bail};
use plugin_inventory::{
    Artifact, INVENTORY_DB_FILE_NAME, PluginGroup, PluginGroupPluginEntry, PluginIdentifier,
    PluginInventory, PluginInventoryEntry, SqliteInventory, Target,
};
use pluginctl::config::Settings;
use pluginctl::images::ImageOperations;
use pluginctl::signature::{InventoryImageVerifier, SignatureVerifier, VerificationContext};
use tempfile::TempDir;

pub const PREFIX: &str = "registry.example.com/cli/plugins";
pub const INVENTORY_IMAGE: &str = "registry.example.com/cli/plugins/plugin-inventory:latest";
pub const ESSENTIALS_GROUP: &str = "pluginctl-core/essentials";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Download(String),
    CopyToTar(String, String),
    CopyFromTar(String, String),
    Push(String, Vec<String>),
}

/// In-memory registry recording every call made through [`ImageOperations`].
#[derive(Default)]
pub struct FakeRegistry {
    /// Files served by `download_image_and_save_files_to_dir`, keyed by image.
    pub images: BTreeMap<String, Vec<(String, Vec<u8>)>>,
    /// Images whose copy or push fails. Downloads fail for images not in `images`.
    pub failing: Vec<String>,
    pub calls: RefCell<Vec<Call>>,
    /// Contents of every pushed file, keyed by image then file name.
    pub pushed: RefCell<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl FakeRegistry {
    pub fn with_inventory(db: &Path) -> Self {
        let mut registry = Self::default();
        registry.serve(
            INVENTORY_IMAGE,
            INVENTORY_DB_FILE_NAME,
            fs::read(db).expect("read inventory fixture"),
        );
        registry
    }

    pub fn serve(&mut self, image: &str, file: &str, data: Vec<u8>) {
        self.images
            .entry(image.to_string())
            .or_default()
            .push((file.to_string(), data));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn copied_to_tar(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::CopyToTar(image, _) => Some(image),
                _ => None,
            })
            .collect()
    }

    fn check(&self, image: &str) -> Result<()> {
        if self.failing.iter().any(|f| f == image) {
            bail!("registry refused '{image}'");
        }
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl ImageOperations for FakeRegistry {
    fn download_image_and_save_files_to_dir(&self, image: &str, dest_dir: &Path) -> Result<()> {
        self.calls.borrow_mut().push(Call::Download(image.to_string()));
        let files = self
            .images
            .get(image)
            .ok_or_else(|| anyhow!("image '{image}' not found"))?;
        for (name, data) in files {
            fs::write(dest_dir.join(name), data)?;
        }
        Ok(())
    }

    fn copy_image_to_tar(&self, image: &str, dest_tar_file: &Path) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(Call::CopyToTar(image.to_string(), file_name(dest_tar_file)));
        self.check(image)?;
        fs::write(dest_tar_file, image.as_bytes())?;
        Ok(())
    }

    fn copy_image_from_tar(&self, src_tar_file: &Path, dest_repo: &str) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(Call::CopyFromTar(file_name(src_tar_file), dest_repo.to_string()));
        self.check(dest_repo)?;
        if !src_tar_file.is_file() {
            bail!("{} does not exist", src_tar_file.display());
        }
        Ok(())
    }

    fn push_image(&self, image_with_tag: &str, file_paths: &[PathBuf]) -> Result<()> {
        self.calls.borrow_mut().push(Call::Push(
            image_with_tag.to_string(),
            file_paths.iter().map(|p| file_name(p)).collect(),
        ));
        self.check(image_with_tag)?;
        let mut files = BTreeMap::new();
        for path in file_paths {
            files.insert(file_name(path), fs::read(path)?);
        }
        self.pushed
            .borrow_mut()
            .insert(image_with_tag.to_string(), files);
        Ok(())
    }
}

/// Verifier that accepts or rejects every image and records what it saw.
#[derive(Default)]
pub struct FakeVerifier {
    pub reject: bool,
    pub verified: RefCell<Vec<String>>,
}

impl SignatureVerifier for FakeVerifier {
    fn verify(&self, _ctx: &VerificationContext, images: &[String]) -> Result<()> {
        self.verified.borrow_mut().extend(images.iter().cloned());
        if self.reject {
            bail!("no matching signatures");
        }
        Ok(())
    }
}

pub fn accepting_verifier() -> InventoryImageVerifier<FakeVerifier> {
    InventoryImageVerifier::new(Settings::default(), FakeVerifier::default())
}

pub fn image(os: &str, target: Target, name: &str, version: &str) -> String {
    format!("{PREFIX}/{os}/amd64/{target}/{name}:{version}")
}

fn artifact(os: &str, target: Target, name: &str, version: &str) -> Artifact {
    Artifact {
        os: os.to_string(),
        arch: "amd64".to_string(),
        digest: format!("{name}-{os}-{version}"),
        image: image(os, target, name, version),
        signature_digest: None,
    }
}

pub fn plugin(
    name: &str,
    target: Target,
    recommended: &str,
    artifacts: &[(&str, &str)],
) -> PluginInventoryEntry {
    let mut by_version: BTreeMap<String, Vec<Artifact>> = BTreeMap::new();
    for (version, os) in artifacts {
        by_version
            .entry(version.to_string())
            .or_default()
            .push(artifact(os, target, name, version));
    }
    PluginInventoryEntry {
        name: name.to_string(),
        target,
        vendor: "acme".to_string(),
        publisher: "cli".to_string(),
        description: format!("{name} plugin"),
        hidden: false,
        recommended_version: recommended.to_string(),
        artifacts: by_version,
    }
}

pub fn group(
    vendor: &str,
    publisher: &str,
    name: &str,
    version: &str,
    plugins: &[(&str, Target, &str)],
) -> PluginGroup {
    let entries = plugins
        .iter()
        .map(|(name, target, version)| PluginGroupPluginEntry {
            plugin: PluginIdentifier {
                name: name.to_string(),
                target: *target,
                version: version.to_string(),
            },
            mandatory: true,
        })
        .collect();
    PluginGroup {
        vendor: vendor.to_string(),
        publisher: publisher.to_string(),
        name: name.to_string(),
        description: format!("{name} group"),
        hidden: false,
        recommended_version: version.to_string(),
        versions: BTreeMap::from([(version.to_string(), entries)]),
    }
}

/// Inventory used across the bundle tests:
///
/// - `foo@global`: v0.0.1 (linux), v0.0.2 (darwin, linux), recommended v0.0.2
/// - `bar@kubernetes`: v0.0.1 (linux)
/// - `baz@global` and `baz@kubernetes`: v1.0.0 (linux)
/// - `login@global`: v0.1.0 (linux), the essentials plugin
/// - groups `acme-cli/default:v1.0.0` (bar), `acme-cli/all:v1.0.0` (foo v0, bar)
///   and `pluginctl-core/essentials:v1.0.0` (login)
pub fn build_inventory(dir: &Path) -> PathBuf {
    let db = dir.join(INVENTORY_DB_FILE_NAME);
    let inventory = SqliteInventory::new(&db, PREFIX);
    inventory.create_schema().expect("schema");
    for entry in [
        plugin(
            "foo",
            Target::Global,
            "v0.0.2",
            &[("v0.0.1", "linux"), ("v0.0.2", "darwin"), ("v0.0.2", "linux")],
        ),
        plugin("bar", Target::Kubernetes, "v0.0.1", &[("v0.0.1", "linux")]),
        plugin("baz", Target::Global, "v1.0.0", &[("v1.0.0", "linux")]),
        plugin("baz", Target::Kubernetes, "v1.0.0", &[("v1.0.0", "linux")]),
        plugin("login", Target::Global, "v0.1.0", &[("v0.1.0", "linux")]),
    ] {
        inventory.insert_plugin(&entry).expect("insert plugin");
    }
    for entry in [
        group(
            "acme",
            "cli",
            "default",
            "v1.0.0",
            &[("bar", Target::Kubernetes, "v0.0.1")],
        ),
        group(
            "acme",
            "cli",
            "all",
            "v1.0.0",
            &[
                ("foo", Target::Global, "v0"),
                ("bar", Target::Kubernetes, "v0.0.1"),
            ],
        ),
        group(
            "pluginctl",
            "core",
            "essentials",
            "v1.0.0",
            &[("login", Target::Global, "v0.1.0")],
        ),
    ] {
        inventory.insert_plugin_group(&entry, false).expect("insert group");
    }
    db
}

pub struct Fixture {
    pub temp: TempDir,
    pub registry: FakeRegistry,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("temp dir");
        let fixture_dir = temp.path().join("fixture");
        fs::create_dir_all(&fixture_dir).expect("fixture dir");
        let db = build_inventory(&fixture_dir);
        let registry = FakeRegistry::with_inventory(&db);
        Self { temp, registry }
    }

    pub fn bundle_path(&self) -> PathBuf {
        self.temp.path().join("bundle.tar.gz")
    }
}
