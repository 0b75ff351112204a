//! Portable image tarballs.
//!
//! A tarball is a gzip-compressed tar with an `index.json` describing the image and
//! its content-addressed blobs stored under `blobs/sha256/<hex>`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const INDEX_PATH: &str = "index.json";
const TARBALL_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobDescriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TarballIndex {
    version: u32,
    reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
    config: BlobDescriptor,
    layers: Vec<BlobDescriptor>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageBlob {
    pub descriptor: BlobDescriptor,
    pub data: Vec<u8>,
}

impl ImageBlob {
    pub fn new(media_type: &str, data: Vec<u8>, annotations: BTreeMap<String, String>) -> Self {
        Self {
            descriptor: BlobDescriptor {
                media_type: media_type.to_string(),
                digest: sha256_digest(&data),
                size: data.len() as u64,
                annotations,
            },
            data,
        }
    }
}

/// An image held in memory: its source reference, tag, config and layers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageTarball {
    pub reference: String,
    pub tag: Option<String>,
    pub config: ImageBlob,
    pub layers: Vec<ImageBlob>,
}

pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

fn blob_path(digest: &str) -> String {
    format!(
        "blobs/sha256/{}",
        digest.strip_prefix("sha256:").unwrap_or(digest)
    )
}

fn append_file<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    data: &[u8],
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    builder
        .append_data(&mut header, path, data)
        .with_context(|| format!("failed to add {path} to image tarball"))
}

pub fn write_image_tarball(path: &Path, image: &ImageTarball) -> Result<()> {
    let index = TarballIndex {
        version: TARBALL_VERSION,
        reference: image.reference.clone(),
        tag: image.tag.clone(),
        config: image.config.descriptor.clone(),
        layers: image.layers.iter().map(|l| l.descriptor.clone()).collect(),
    };
    let index_bytes = serde_json::to_vec_pretty(&index).context("failed to encode index.json")?;

    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    append_file(&mut builder, INDEX_PATH, &index_bytes)?;

    let mut written = HashSet::new();
    for blob in std::iter::once(&image.config).chain(image.layers.iter()) {
        if written.insert(blob.descriptor.digest.clone()) {
            append_file(&mut builder, &blob_path(&blob.descriptor.digest), &blob.data)?;
        }
    }

    builder
        .into_inner()
        .and_then(|gz| gz.finish())
        .with_context(|| format!("failed to finish {}", path.display()))?;
    Ok(())
}

pub fn read_image_tarball(path: &Path) -> Result<ImageTarball> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    let mut files: HashMap<String, Vec<u8>> = HashMap::new();
    for entry in archive
        .entries()
        .with_context(|| format!("{} is not an image tarball", path.display()))?
    {
        let mut entry = entry.with_context(|| format!("corrupt entry in {}", path.display()))?;
        let name = entry.path()?.to_string_lossy().into_owned();
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("failed to read {name} from {}", path.display()))?;
        files.insert(name, data);
    }

    let index_bytes = files
        .get(INDEX_PATH)
        .ok_or_else(|| anyhow!("{INDEX_PATH} missing from {}", path.display()))?;
    let index: TarballIndex = serde_json::from_slice(index_bytes)
        .with_context(|| format!("{INDEX_PATH} in {} is invalid", path.display()))?;
    if index.version != TARBALL_VERSION {
        bail!(
            "unsupported image tarball version {} in {}",
            index.version,
            path.display()
        );
    }

    let load = |descriptor: &BlobDescriptor| -> Result<ImageBlob> {
        let data = files
            .get(&blob_path(&descriptor.digest))
            .cloned()
            .ok_or_else(|| anyhow!("blob {} missing from {}", descriptor.digest, path.display()))?;
        let actual = sha256_digest(&data);
        if actual != descriptor.digest {
            bail!(
                "digest mismatch in {}: expected {}, found {}",
                path.display(),
                descriptor.digest,
                actual
            );
        }
        Ok(ImageBlob {
            descriptor: descriptor.clone(),
            data,
        })
    };

    let config = load(&index.config)?;
    let layers = index.layers.iter().map(load).collect::<Result<Vec<_>>>()?;
    Ok(ImageTarball {
        reference: index.reference,
        tag: index.tag,
        config,
        layers,
    })
}
