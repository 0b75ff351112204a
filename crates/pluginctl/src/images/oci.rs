#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use flate2::read::GzDecoder;
use oci_distribution::Reference;
use oci_distribution::client::{
    Certificate, CertificateEncoding, Client, ClientConfig, ClientProtocol, Config, ImageData,
    ImageLayer,
};
use oci_distribution::manifest::{
    IMAGE_CONFIG_MEDIA_TYPE, IMAGE_DOCKER_LAYER_GZIP_MEDIA_TYPE, IMAGE_DOCKER_LAYER_TAR_MEDIA_TYPE,
    IMAGE_LAYER_GZIP_MEDIA_TYPE, IMAGE_LAYER_MEDIA_TYPE,
};
use oci_distribution::secrets::RegistryAuth;
use tokio::runtime::Runtime;
use tracing::{debug, info};

use super::tarball::{ImageBlob, ImageTarball, read_image_tarball, write_image_tarball};
use super::{ImageOperations, registry_host, split_tag};
use crate::config::{RegistryOptions, Settings};

pub const ANNOTATION_TITLE: &str = "org.opencontainers.image.title";

const OCTET_STREAM_MEDIA_TYPE: &str = "application/octet-stream";
const JSON_MEDIA_TYPE: &str = "application/json";
const ACCEPTED_LAYER_MEDIA_TYPES: &[&str] = &[
    IMAGE_LAYER_MEDIA_TYPE,
    IMAGE_LAYER_GZIP_MEDIA_TYPE,
    IMAGE_DOCKER_LAYER_TAR_MEDIA_TYPE,
    IMAGE_DOCKER_LAYER_GZIP_MEDIA_TYPE,
    OCTET_STREAM_MEDIA_TYPE,
    JSON_MEDIA_TYPE,
    "application/vnd.oci.image.layer.v1.tar+zstd",
    "application/vnd.cncf.openpolicyagent.layer.v1.tar+gzip",
    "application/vnd.dev.cosign.simplesigning.v1+json",
    "text/plain",
];

/// [`ImageOperations`] against real OCI registries.
///
/// The workflows are synchronous, so this owns a current-thread runtime and blocks
/// on each registry call.
pub struct OciImageOperations {
    settings: Settings,
    runtime: Runtime,
}

impl OciImageOperations {
    pub fn new(settings: Settings) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start registry runtime")?;
        Ok(Self { settings, runtime })
    }

    fn client_for(&self, image: &str) -> Result<(Client, RegistryAuth)> {
        let options = self.settings.registry_options(image);
        let client = Client::new(client_config(&options)?);
        let auth = match (&options.username, &options.password) {
            (Some(user), Some(password)) => RegistryAuth::Basic(user.clone(), password.clone()),
            _ => RegistryAuth::Anonymous,
        };
        Ok((client, auth))
    }

    fn pull(&self, image: &str) -> Result<ImageData> {
        let reference = parse_reference(image)?;
        let (client, auth) = self.client_for(image)?;
        debug!(image, host = registry_host(image), "pulling image");
        self.runtime
            .block_on(client.pull(&reference, &auth, ACCEPTED_LAYER_MEDIA_TYPES.to_vec()))
            .with_context(|| format!("failed to pull image '{image}'"))
    }

    fn push(&self, image: &str, layers: Vec<ImageLayer>, config: Config) -> Result<()> {
        let reference = parse_reference(image)?;
        let (client, auth) = self.client_for(image)?;
        debug!(image, layers = layers.len(), "pushing image");
        let response = self
            .runtime
            .block_on(client.push(&reference, &layers, config, &auth, None))
            .with_context(|| format!("failed to push image '{image}'"))?;
        info!(image, manifest = %response.manifest_url, "pushed image");
        Ok(())
    }
}

fn client_config(options: &RegistryOptions) -> Result<ClientConfig> {
    let mut extra_root_certificates = Vec::new();
    if let Some(path) = &options.ca_cert_file {
        let data = fs::read(path)
            .with_context(|| format!("failed to read CA certificate {}", path.display()))?;
        extra_root_certificates.push(Certificate {
            encoding: CertificateEncoding::Pem,
            data,
        });
    }
    Ok(ClientConfig {
        protocol: if options.insecure {
            ClientProtocol::Http
        } else {
            ClientProtocol::Https
        },
        accept_invalid_certificates: options.skip_cert_verify,
        extra_root_certificates,
        ..Default::default()
    })
}

fn parse_reference(image: &str) -> Result<Reference> {
    image
        .parse::<Reference>()
        .map_err(|err| anyhow!("invalid image reference '{image}': {err}"))
}

fn is_tar_layer(media_type: &str) -> bool {
    media_type == IMAGE_LAYER_MEDIA_TYPE || media_type == IMAGE_DOCKER_LAYER_TAR_MEDIA_TYPE
}

fn is_tar_gzip_layer(media_type: &str) -> bool {
    media_type == IMAGE_LAYER_GZIP_MEDIA_TYPE || media_type == IMAGE_DOCKER_LAYER_GZIP_MEDIA_TYPE
}

/// File name for a raw layer: its title annotation, or its digest.
fn layer_file_name(layer: &ImageLayer) -> Result<String> {
    let title = layer
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(ANNOTATION_TITLE))
        .cloned();
    match title {
        Some(title) => Path::new(&title)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("layer title '{title}' is not a file name")),
        None => Ok(layer.sha256_digest()),
    }
}

fn to_blob(media_type: &str, data: Vec<u8>, annotations: Option<BTreeMap<String, String>>) -> ImageBlob {
    ImageBlob::new(media_type, data, annotations.unwrap_or_default())
}

impl ImageOperations for OciImageOperations {
    fn download_image_and_save_files_to_dir(&self, image: &str, dest_dir: &Path) -> Result<()> {
        let pulled = self.pull(image)?;
        fs::create_dir_all(dest_dir)
            .with_context(|| format!("failed to create {}", dest_dir.display()))?;
        for layer in pulled.layers {
            if is_tar_gzip_layer(&layer.media_type) {
                tar::Archive::new(GzDecoder::new(layer.data.as_slice()))
                    .unpack(dest_dir)
                    .with_context(|| format!("failed to unpack layer of '{image}'"))?;
            } else if is_tar_layer(&layer.media_type) {
                tar::Archive::new(layer.data.as_slice())
                    .unpack(dest_dir)
                    .with_context(|| format!("failed to unpack layer of '{image}'"))?;
            } else {
                let path = dest_dir.join(layer_file_name(&layer)?);
                fs::write(&path, &layer.data)
                    .with_context(|| format!("failed to write {}", path.display()))?;
            }
        }
        Ok(())
    }

    fn copy_image_to_tar(&self, image: &str, dest_tar_file: &Path) -> Result<()> {
        let pulled = self.pull(image)?;
        let tarball = ImageTarball {
            reference: image.to_string(),
            tag: split_tag(image).1.map(str::to_string),
            config: to_blob(
                &pulled.config.media_type,
                pulled.config.data,
                pulled.config.annotations.map(|a| a.into_iter().collect()),
            ),
            layers: pulled
                .layers
                .into_iter()
                .map(|layer| {
                    to_blob(
                        &layer.media_type,
                        layer.data,
                        layer.annotations.map(|a| a.into_iter().collect()),
                    )
                })
                .collect(),
        };
        write_image_tarball(dest_tar_file, &tarball)
    }

    fn copy_image_from_tar(&self, src_tar_file: &Path, dest_repo: &str) -> Result<()> {
        let tarball = read_image_tarball(src_tar_file)?;
        let destination = match tarball.tag.as_deref() {
            Some(digest) if digest.contains(':') => dest_repo.to_string(),
            Some(tag) => format!("{dest_repo}:{tag}"),
            None => dest_repo.to_string(),
        };
        let config = Config::new(
            tarball.config.data,
            tarball.config.descriptor.media_type,
            non_empty(tarball.config.descriptor.annotations).map(|a| a.into_iter().collect()),
        );
        let layers = tarball
            .layers
            .into_iter()
            .map(|blob| {
                ImageLayer::new(
                    blob.data,
                    blob.descriptor.media_type,
                    non_empty(blob.descriptor.annotations).map(|a| a.into_iter().collect()),
                )
            })
            .collect();
        self.push(&destination, layers, config)
    }

    fn push_image(&self, image_with_tag: &str, file_paths: &[PathBuf]) -> Result<()> {
        if file_paths.is_empty() {
            bail!("no files to publish as '{image_with_tag}'");
        }
        let mut layers = Vec::with_capacity(file_paths.len());
        for path in file_paths {
            let data =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            let title = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| anyhow!("{} has no file name", path.display()))?;
            layers.push(ImageLayer::new(
                data,
                OCTET_STREAM_MEDIA_TYPE.to_string(),
                Some([(ANNOTATION_TITLE.to_string(), title)].into_iter().collect()),
            ));
        }
        let config = Config::new(b"{}".to_vec(), IMAGE_CONFIG_MEDIA_TYPE.to_string(), None);
        self.push(image_with_tag, layers, config)
    }
}

fn non_empty(map: BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    (!map.is_empty()).then_some(map)
}
