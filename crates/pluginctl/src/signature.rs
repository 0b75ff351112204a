#![forbid(unsafe_code)]

//! Inventory image signature verification.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::pkcs8::DecodePublicKey;
use ed25519_dalek::{Signature, VerifyingKey};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{RegistryOptions, Settings};
use crate::images::{ImageOperations, registry_host, split_tag, strip_tag};

pub const SIGNATURE_PAYLOAD_FILE: &str = "payload.json";
pub const SIGNATURE_FILE: &str = "payload.sig";

/// Registry settings a verifier needs to reach the signatures of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationContext {
    pub registry_host: String,
    pub options: RegistryOptions,
}

impl VerificationContext {
    pub fn for_image(settings: &Settings, image: &str) -> Self {
        Self {
            registry_host: registry_host(image).to_string(),
            options: settings.registry_options(image),
        }
    }
}

pub trait SignatureVerifier {
    fn verify(&self, ctx: &VerificationContext, images: &[String]) -> Result<()>;
}

impl<T: SignatureVerifier + ?Sized> SignatureVerifier for &T {
    fn verify(&self, ctx: &VerificationContext, images: &[String]) -> Result<()> {
        (**self).verify(ctx, images)
    }
}

impl<T: SignatureVerifier + ?Sized> SignatureVerifier for Box<T> {
    fn verify(&self, ctx: &VerificationContext, images: &[String]) -> Result<()> {
        (**self).verify(ctx, images)
    }
}

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature artifact for '{image}' is missing {file}")]
    MissingFile { image: String, file: &'static str },
    #[error("signature artifact for '{image}' is malformed: {reason}")]
    Malformed { image: String, reason: String },
    #[error("signature of '{image}' was issued for '{signed}'")]
    IdentityMismatch { image: String, signed: String },
    #[error("signature of '{image}' does not match the trusted public key")]
    Invalid { image: String },
    #[error(
        "no signature public key configured; set signature.public_key or add '{image}' to the verification skip list"
    )]
    NoPublicKey { image: String },
}

/// Applies the skip list, then delegates to a [`SignatureVerifier`].
pub struct InventoryImageVerifier<V> {
    settings: Settings,
    verifier: V,
}

impl<V: SignatureVerifier> InventoryImageVerifier<V> {
    pub fn new(settings: Settings, verifier: V) -> Self {
        Self { settings, verifier }
    }

    pub fn verify_inventory_image_signature(&self, image: &str) -> Result<()> {
        let image = image.trim();
        let skipped = self
            .settings
            .signature
            .skip_list
            .iter()
            .any(|entry| entry.trim() == image);
        if skipped {
            if !self.settings.signature.suppress_skip_warning {
                warn!(
                    image,
                    "skipping signature verification; the image is on the verification skip list"
                );
            }
            return Ok(());
        }

        let ctx = VerificationContext::for_image(&self.settings, image);
        debug!(image, host = %ctx.registry_host, "verifying inventory image signature");
        self.verifier
            .verify(&ctx, &[image.to_string()])
            .with_context(|| format!("signature verification failed for image '{image}'"))
    }
}

/// Used when no public key is configured: every image not on the skip list fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredVerifier;

impl SignatureVerifier for UnconfiguredVerifier {
    fn verify(&self, _ctx: &VerificationContext, images: &[String]) -> Result<()> {
        match images.first() {
            Some(image) => Err(SignatureError::NoPublicKey {
                image: image.clone(),
            }
            .into()),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SignaturePayload {
    critical: Critical,
}

#[derive(Debug, Deserialize)]
struct Critical {
    identity: Identity,
}

#[derive(Debug, Deserialize)]
struct Identity {
    #[serde(rename = "docker-reference")]
    docker_reference: String,
}

/// Verifies Ed25519 signatures published next to each image as `<repo>:<tag>.sig`.
///
/// The signature image carries `payload.json`, whose `critical.identity.docker-reference`
/// names the signed repository, and `payload.sig`, the base64 signature over the
/// payload bytes.
pub struct Ed25519SignatureVerifier<I> {
    images: I,
    key: VerifyingKey,
}

impl<I: ImageOperations> Ed25519SignatureVerifier<I> {
    pub fn new(images: I, key: VerifyingKey) -> Self {
        Self { images, key }
    }

    pub fn from_pem_file(images: I, path: &Path) -> Result<Self> {
        let pem = fs::read_to_string(path)
            .with_context(|| format!("failed to read public key {}", path.display()))?;
        let key = VerifyingKey::from_public_key_pem(&pem).context("failed to parse public key")?;
        Ok(Self::new(images, key))
    }

    fn verify_image(&self, image: &str) -> Result<()> {
        let scratch = tempfile::TempDir::new().context("failed to create signature scratch dir")?;
        let signature_image = signature_image(image);
        self.images
            .download_image_and_save_files_to_dir(&signature_image, scratch.path())
            .with_context(|| format!("failed to download signature image '{signature_image}'"))?;

        let payload_path = scratch.path().join(SIGNATURE_PAYLOAD_FILE);
        let signature_path = scratch.path().join(SIGNATURE_FILE);
        let payload = fs::read(&payload_path).map_err(|_| SignatureError::MissingFile {
            image: image.to_string(),
            file: SIGNATURE_PAYLOAD_FILE,
        })?;
        let encoded = fs::read_to_string(&signature_path).map_err(|_| SignatureError::MissingFile {
            image: image.to_string(),
            file: SIGNATURE_FILE,
        })?;

        let malformed = |reason: String| SignatureError::Malformed {
            image: image.to_string(),
            reason,
        };
        let raw = STANDARD
            .decode(encoded.trim())
            .map_err(|err| malformed(format!("{SIGNATURE_FILE}: {err}")))?;
        let signature = Signature::from_slice(&raw)
            .map_err(|err| malformed(format!("{SIGNATURE_FILE}: {err}")))?;
        self.key
            .verify_strict(&payload, &signature)
            .map_err(|_| SignatureError::Invalid {
                image: image.to_string(),
            })?;

        let parsed: SignaturePayload = serde_json::from_slice(&payload)
            .map_err(|err| malformed(format!("{SIGNATURE_PAYLOAD_FILE}: {err}")))?;
        let signed = parsed.critical.identity.docker_reference;
        if signed != strip_tag(image) {
            return Err(SignatureError::IdentityMismatch {
                image: image.to_string(),
                signed,
            }
            .into());
        }
        Ok(())
    }
}

impl<I: ImageOperations> SignatureVerifier for Ed25519SignatureVerifier<I> {
    fn verify(&self, ctx: &VerificationContext, images: &[String]) -> Result<()> {
        for image in images {
            debug!(image, host = %ctx.registry_host, "checking ed25519 signature");
            self.verify_image(image)?;
            info!(image, "signature verified");
        }
        Ok(())
    }
}

/// `repo:tag` becomes `repo:tag.sig`; `repo@sha256:abc` becomes `repo:sha256-abc.sig`.
pub fn signature_image(image: &str) -> String {
    match split_tag(image) {
        (repo, Some(digest)) if image.contains('@') => {
            format!("{repo}:{}.sig", digest.replace(':', "-"))
        }
        (repo, Some(tag)) => format!("{repo}:{tag}.sig"),
        (repo, None) => format!("{repo}:latest.sig"),
    }
}
