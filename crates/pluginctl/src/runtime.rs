#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::config::{Settings, parse_bool_flag, parse_image_list};

pub const ENV_CONFIG: &str = "PLUGINCTL_CONFIG";
pub const ENV_SIGNATURE_SKIP_LIST: &str =
    "PLUGINCTL_PLUGIN_DISCOVERY_IMAGE_SIGNATURE_VERIFICATION_SKIP_LIST";
pub const ENV_SUPPRESS_SKIP_WARNING: &str =
    "PLUGINCTL_SUPPRESS_SKIP_SIGNATURE_VERIFICATION_WARNING";
pub const ENV_INVENTORY_IMAGE: &str = "PLUGINCTL_PLUGIN_INVENTORY_IMAGE";
pub const ENV_ESSENTIALS_GROUP: &str = "PLUGINCTL_ESSENTIALS_PLUGIN_GROUP";
pub const ENV_SIGNATURE_PUBLIC_KEY: &str = "PLUGINCTL_SIGNATURE_PUBLIC_KEY";

pub struct RuntimeState {
    pub settings: Settings,
    /// Where each layer of the settings came from, in application order.
    pub provenance: Vec<String>,
    pub warnings: Vec<String>,
}

pub type RuntimeContext = Arc<RuntimeState>;

impl RuntimeState {
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pluginctl").join("config.toml"))
}

/// Resolve settings from defaults, the config file and the process environment.
pub fn resolve_runtime(cli_config: Option<&Path>) -> Result<RuntimeContext> {
    resolve_runtime_with_env(cli_config, |key| std::env::var(key).ok())
}

/// Same as [`resolve_runtime`] with an explicit environment lookup.
pub fn resolve_runtime_with_env<F>(cli_config: Option<&Path>, env: F) -> Result<RuntimeContext>
where
    F: Fn(&str) -> Option<String>,
{
    let mut provenance = vec!["defaults".to_string()];
    let mut warnings = Vec::new();

    let explicit = cli_config
        .map(Path::to_path_buf)
        .or_else(|| env(ENV_CONFIG).map(PathBuf::from));
    let mut settings = match explicit {
        Some(path) => {
            let settings = Settings::load(&path)?;
            provenance.push(format!("file {}", path.display()));
            settings
        }
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => {
                let settings = Settings::load(&path)?;
                provenance.push(format!("file {}", path.display()));
                settings
            }
            None => Settings::default(),
        },
    };

    if let Some(image) = env(ENV_INVENTORY_IMAGE).filter(|v| !v.trim().is_empty()) {
        settings.plugin_inventory_image = image.trim().to_string();
        provenance.push(format!("env {ENV_INVENTORY_IMAGE}"));
    }
    if let Some(group) = env(ENV_ESSENTIALS_GROUP).filter(|v| !v.trim().is_empty()) {
        settings.essentials_plugin_group = group.trim().to_string();
        provenance.push(format!("env {ENV_ESSENTIALS_GROUP}"));
    }
    if let Some(flag) = env(ENV_SUPPRESS_SKIP_WARNING) {
        settings.signature.suppress_skip_warning = parse_bool_flag(&flag);
        provenance.push(format!("env {ENV_SUPPRESS_SKIP_WARNING}"));
    }
    if let Some(list) = env(ENV_SIGNATURE_SKIP_LIST) {
        let images = parse_image_list(&list);
        if !images.is_empty() && !settings.signature.suppress_skip_warning {
            warnings.push(format!(
                "signature verification is skipped for {} image(s) listed in {ENV_SIGNATURE_SKIP_LIST}",
                images.len()
            ));
        }
        settings.signature.skip_list.extend(images);
        provenance.push(format!("env {ENV_SIGNATURE_SKIP_LIST}"));
    }
    if let Some(key) = env(ENV_SIGNATURE_PUBLIC_KEY).filter(|v| !v.trim().is_empty()) {
        settings.signature.public_key = Some(PathBuf::from(key.trim()));
        provenance.push(format!("env {ENV_SIGNATURE_PUBLIC_KEY}"));
    }

    for (host, options) in &settings.registries {
        if options.skip_cert_verify {
            warnings.push(format!("TLS certificate verification disabled for {host}"));
        }
    }

    debug!(?provenance, "resolved pluginctl settings");
    Ok(Arc::new(RuntimeState {
        settings,
        provenance,
        warnings,
    }))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn environment_overrides_config_file() {
        let temp = tempfile::TempDir::new().expect("temp dir");
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            plugin_inventory_image = "file.example.com/plugins/plugin-inventory:latest"

            [signature]
            skip_list = ["file.example.com/plugins/plugin-inventory:latest"]
            "#,
        )
        .expect("write config");

        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_INVENTORY_IMAGE, "env.example.com/plugins/plugin-inventory:v2"),
            (ENV_SIGNATURE_SKIP_LIST, " env.example.com/plugins/plugin-inventory:v2 "),
            (ENV_SUPPRESS_SKIP_WARNING, "true"),
        ]);
        let runtime = resolve_runtime_with_env(Some(&path), |key| {
            env.get(key).map(|v| v.to_string())
        })
        .expect("resolve");

        let settings = &runtime.settings;
        assert_eq!(
            settings.plugin_inventory_image,
            "env.example.com/plugins/plugin-inventory:v2"
        );
        assert_eq!(settings.signature.skip_list.len(), 2);
        assert!(settings.signature.suppress_skip_warning);
        assert_eq!(runtime.provenance[1], format!("file {}", path.display()));
        assert!(runtime.warnings().is_empty());
    }

    #[test]
    fn skip_list_warning_follows_the_suppress_flag() {
        let skip = "registry.example.com/cli/plugins/plugin-inventory:latest";
        let resolve = |suppress: Option<&str>| {
            let temp = tempfile::TempDir::new().expect("temp dir");
            let path = temp.path().join("config.toml");
            std::fs::write(&path, "").expect("write config");
            resolve_runtime_with_env(Some(&path), |key| match key {
                ENV_SIGNATURE_SKIP_LIST => Some(skip.to_string()),
                ENV_SUPPRESS_SKIP_WARNING => suppress.map(str::to_string),
                _ => None,
            })
            .expect("resolve")
        };

        let warned = resolve(None);
        assert_eq!(warned.warnings().len(), 1);
        assert!(warned.warnings()[0].contains(ENV_SIGNATURE_SKIP_LIST));

        assert_eq!(resolve(Some("false")).warnings().len(), 1);

        let suppressed = resolve(Some("true"));
        assert!(suppressed.warnings().is_empty());
        assert_eq!(suppressed.settings.signature.skip_list, vec![skip.to_string()]);
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let result = resolve_runtime_with_env(Some(Path::new("/nonexistent/pluginctl.toml")), |_| {
            None
        });
        assert!(result.is_err());
    }
}
