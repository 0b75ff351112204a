mod common;

use std::fs;

use anyhow::Result;
use plugin_inventory::{
    InventoryMetadata, PluginGroupIdentifier, PluginIdentifier, SqliteInventoryMetadata, Target,
};
use pluginctl::airgapped::archive::extract_tar_gz;
use pluginctl::airgapped::{
    DownloadOutcome, DownloadPluginBundleOptions, ImageCopyInfo, PLUGIN_MIGRATION_MANIFEST_FILE,
    PluginBundleDownloader, PluginMigrationManifest,
};
use pluginctl::config::Settings;
use pluginctl::signature::InventoryImageVerifier;

use common::{
    ESSENTIALS_GROUP, FakeVerifier, Fixture, INVENTORY_IMAGE, accepting_verifier, image,
};

fn options(fixture: &Fixture) -> DownloadPluginBundleOptions {
    DownloadPluginBundleOptions {
        plugin_inventory_image: INVENTORY_IMAGE.to_string(),
        to_tar: Some(fixture.bundle_path()),
        essentials_plugin_group: Some(ESSENTIALS_GROUP.to_string()),
        ..Default::default()
    }
}

fn download(fixture: &Fixture, options: DownloadPluginBundleOptions) -> Result<DownloadOutcome> {
    PluginBundleDownloader::new(options, &fixture.registry, accepting_verifier())
        .download_plugin_bundle()
}

fn bundle_manifest(outcome: DownloadOutcome) -> PluginMigrationManifest {
    match outcome {
        DownloadOutcome::Bundle { manifest, .. } => manifest,
        DownloadOutcome::DryRun(_) => panic!("expected a bundle"),
    }
}

#[test]
fn group_selection_bundles_only_group_and_essentials_plugins() {
    let fixture = Fixture::new();
    let outcome = download(
        &fixture,
        DownloadPluginBundleOptions {
            groups: vec!["acme-cli/default:v1.0.0".to_string()],
            ..options(&fixture)
        },
    )
    .expect("download bundle");
    let manifest = bundle_manifest(outcome);

    assert_eq!(
        manifest.images_to_copy,
        vec![
            ImageCopyInfo {
                source_tar_file_path: "plugin-inventory-image.tar.gz".into(),
                relative_image_path: "plugin-inventory".into(),
            },
            ImageCopyInfo {
                source_tar_file_path: "bar-kubernetes-linux_amd64-v0.0.1.tar.gz".into(),
                relative_image_path: "linux/amd64/kubernetes/bar".into(),
            },
            ImageCopyInfo {
                source_tar_file_path: "login-global-linux_amd64-v0.1.0.tar.gz".into(),
                relative_image_path: "linux/amd64/global/login".into(),
            },
        ]
    );
    assert_eq!(
        manifest.relative_inventory_image_path_with_tag,
        "plugin-inventory:latest"
    );
    assert_eq!(
        manifest.inventory_metadata_image.relative_image_path_with_tag,
        "plugin-inventory-metadata:latest"
    );
    assert!(
        fixture
            .registry
            .copied_to_tar()
            .iter()
            .all(|image| !image.contains("/foo:"))
    );
}

#[test]
fn bundle_archive_carries_manifest_and_selected_metadata() {
    let fixture = Fixture::new();
    download(
        &fixture,
        DownloadPluginBundleOptions {
            groups: vec!["acme-cli/default:v1.0.0".to_string()],
            ..options(&fixture)
        },
    )
    .expect("download bundle");

    let out = fixture.temp.path().join("extracted");
    let root = extract_tar_gz(&fixture.bundle_path(), &out).expect("extract");
    let manifest =
        PluginMigrationManifest::read(&root.join(PLUGIN_MIGRATION_MANIFEST_FILE)).expect("manifest");
    for image in &manifest.images_to_copy {
        assert!(root.join(&image.source_tar_file_path).is_file());
    }

    let metadata =
        SqliteInventoryMetadata::new(root.join(&manifest.inventory_metadata_image.source_file_path));
    let mut plugins = metadata.get_plugin_identifiers().expect("plugins");
    plugins.sort();
    assert_eq!(
        plugins,
        vec![
            PluginIdentifier {
                name: "bar".into(),
                target: Target::Kubernetes,
                version: "v0.0.1".into(),
            },
            PluginIdentifier {
                name: "login".into(),
                target: Target::Global,
                version: "v0.1.0".into(),
            },
        ]
    );
    let mut groups = metadata.get_plugin_group_identifiers().expect("groups");
    groups.sort();
    assert_eq!(
        groups,
        vec![
            PluginGroupIdentifier::from_id("acme-cli/default:v1.0.0").expect("id"),
            PluginGroupIdentifier::from_id("pluginctl-core/essentials:v1.0.0").expect("id"),
        ]
    );
}

#[test]
fn group_plugins_keep_only_the_recommended_version() {
    let fixture = Fixture::new();
    download(
        &fixture,
        DownloadPluginBundleOptions {
            groups: vec!["acme-cli/all".to_string()],
            ..options(&fixture)
        },
    )
    .expect("download bundle");

    let copied = fixture.registry.copied_to_tar();
    assert!(copied.contains(&image("linux", Target::Global, "foo", "v0.0.2")));
    assert!(copied.contains(&image("darwin", Target::Global, "foo", "v0.0.2")));
    assert!(!copied.contains(&image("linux", Target::Global, "foo", "v0.0.1")));
}

#[test]
fn explicit_plugins_keep_every_requested_version() {
    let fixture = Fixture::new();
    download(
        &fixture,
        DownloadPluginBundleOptions {
            plugins: vec!["foo@global:v0".to_string()],
            ..options(&fixture)
        },
    )
    .expect("download bundle");

    let copied = fixture.registry.copied_to_tar();
    assert!(copied.contains(&image("linux", Target::Global, "foo", "v0.0.1")));
    assert!(copied.contains(&image("linux", Target::Global, "foo", "v0.0.2")));
}

#[test]
fn group_and_explicit_selection_are_unioned_without_duplicates() {
    let fixture = Fixture::new();
    download(
        &fixture,
        DownloadPluginBundleOptions {
            groups: vec!["acme-cli/all:v1.0.0".to_string()],
            plugins: vec!["foo@global:v0.0.2".to_string(), "bar@k8s".to_string()],
            ..options(&fixture)
        },
    )
    .expect("download bundle");

    let copied = fixture.registry.copied_to_tar();
    assert_eq!(
        copied,
        vec![
            INVENTORY_IMAGE.to_string(),
            image("darwin", Target::Global, "foo", "v0.0.2"),
            image("linux", Target::Global, "foo", "v0.0.2"),
            image("linux", Target::Kubernetes, "bar", "v0.0.1"),
            image("linux", Target::Global, "login", "v0.1.0"),
        ]
    );
}

#[test]
fn explicit_versions_survive_a_group_that_pruned_the_same_plugin() {
    let fixture = Fixture::new();
    let outcome = download(
        &fixture,
        DownloadPluginBundleOptions {
            groups: vec!["acme-cli/all".to_string()],
            plugins: vec!["foo@global:v0".to_string()],
            ..options(&fixture)
        },
    )
    .expect("download bundle");

    let copied = fixture.registry.copied_to_tar();
    for version in ["v0.0.1", "v0.0.2"] {
        let foo = image("linux", Target::Global, "foo", version);
        assert_eq!(
            copied.iter().filter(|img| **img == foo).count(),
            1,
            "{foo} in {copied:?}"
        );
    }
    let darwin = image("darwin", Target::Global, "foo", "v0.0.2");
    assert_eq!(copied.iter().filter(|img| **img == darwin).count(), 1);

    let manifest = bundle_manifest(outcome);
    let mut files: Vec<&str> = manifest
        .images_to_copy
        .iter()
        .map(|info| info.source_tar_file_path.as_str())
        .collect();
    let total = files.len();
    files.sort();
    files.dedup();
    assert_eq!(files.len(), total);
    assert!(files.contains(&"foo-global-linux_amd64-v0.0.1.tar.gz"));
}

#[test]
fn no_selection_bundles_every_plugin() {
    let fixture = Fixture::new();
    let manifest = bundle_manifest(download(&fixture, options(&fixture)).expect("download"));
    // inventory + foo (3) + bar + baz (2) + login
    assert_eq!(manifest.images_to_copy.len(), 8);
}

#[test]
fn refresh_configuration_only_bundles_just_the_inventory() {
    let fixture = Fixture::new();
    let manifest = bundle_manifest(
        download(
            &fixture,
            DownloadPluginBundleOptions {
                refresh_configuration_only: true,
                ..options(&fixture)
            },
        )
        .expect("download"),
    );
    assert_eq!(manifest.images_to_copy.len(), 1);
    assert_eq!(fixture.registry.copied_to_tar(), vec![INVENTORY_IMAGE.to_string()]);
}

#[test]
fn dry_run_lists_images_without_side_effects() {
    let fixture = Fixture::new();
    let outcome = download(
        &fixture,
        DownloadPluginBundleOptions {
            groups: vec!["acme-cli/default:v1.0.0".to_string()],
            dry_run: true,
            ..options(&fixture)
        },
    )
    .expect("dry run");

    let DownloadOutcome::DryRun(listing) = outcome else {
        panic!("expected a dry run listing");
    };
    assert_eq!(
        listing.images,
        vec![
            INVENTORY_IMAGE.to_string(),
            image("linux", Target::Kubernetes, "bar", "v0.0.1"),
            image("linux", Target::Global, "login", "v0.1.0"),
        ]
    );
    assert!(!fixture.bundle_path().exists());
    assert!(fixture.registry.copied_to_tar().is_empty());

    let yaml = serde_yaml_bw::to_string(&listing).expect("yaml");
    assert!(yaml.contains("images:"));
}

#[test]
fn dry_run_ignores_an_existing_destination() {
    let fixture = Fixture::new();
    fs::write(fixture.bundle_path(), b"keep").expect("existing bundle");
    let outcome = download(
        &fixture,
        DownloadPluginBundleOptions {
            groups: vec!["acme-cli/default:v1.0.0".to_string()],
            dry_run: true,
            ..options(&fixture)
        },
    )
    .expect("dry run");

    assert!(matches!(outcome, DownloadOutcome::DryRun(_)));
    assert_eq!(fs::read(fixture.bundle_path()).expect("read"), b"keep");
    assert!(fixture.registry.copied_to_tar().is_empty());
}

#[test]
fn unknown_group_is_reported_verbatim() {
    let fixture = Fixture::new();
    let err = download(
        &fixture,
        DownloadPluginBundleOptions {
            groups: vec!["does-not-exist".to_string()],
            ..options(&fixture)
        },
    )
    .unwrap_err();
    assert!(
        format!("{err:#}").contains(r#"incorrect plugin group "does-not-exist" specified"#),
        "{err:#}"
    );

    let err = download(
        &fixture,
        DownloadPluginBundleOptions {
            groups: vec!["acme-cli/missing:v1.0.0".to_string()],
            ..options(&fixture)
        },
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains(r#"incorrect plugin group "acme-cli/missing:v1.0.0""#));
    assert!(fixture.registry.copied_to_tar().is_empty());
}

#[test]
fn ambiguous_and_missing_plugins_are_rejected() {
    let fixture = Fixture::new();
    let err = download(
        &fixture,
        DownloadPluginBundleOptions {
            plugins: vec!["baz".to_string()],
            ..options(&fixture)
        },
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("unable to uniquely identify plugin 'baz'"));

    let err = download(
        &fixture,
        DownloadPluginBundleOptions {
            plugins: vec!["nope@global".to_string()],
            ..options(&fixture)
        },
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains(r#"incorrect plugin "nope@global" specified"#));
    assert!(fixture.registry.copied_to_tar().is_empty());
}

#[test]
fn unavailable_essentials_group_is_skipped() {
    let fixture = Fixture::new();
    for essentials in ["pluginctl-core/missing", "not a group id"] {
        let bundle = fixture.temp.path().join(format!("{}.tar.gz", essentials.len()));
        let manifest = bundle_manifest(
            download(
                &fixture,
                DownloadPluginBundleOptions {
                    to_tar: Some(bundle),
                    groups: vec!["acme-cli/default".to_string()],
                    essentials_plugin_group: Some(essentials.to_string()),
                    ..options(&fixture)
                },
            )
            .expect("download"),
        );
        assert_eq!(manifest.images_to_copy.len(), 2);
    }
}

#[test]
fn central_configuration_names_the_essentials_group() {
    let mut fixture = Fixture::new();
    fixture.registry.serve(
        INVENTORY_IMAGE,
        "central_config.yaml",
        b"cli.core.essentials_plugin_group_name: acme-cli/all\n".to_vec(),
    );
    download(
        &fixture,
        DownloadPluginBundleOptions {
            groups: vec!["acme-cli/default".to_string()],
            ..options(&fixture)
        },
    )
    .expect("download");
    let copied = fixture.registry.copied_to_tar();
    assert!(copied.contains(&image("linux", Target::Global, "foo", "v0.0.2")));
    assert!(!copied.contains(&image("linux", Target::Global, "login", "v0.1.0")));
}

#[test]
fn signature_failure_aborts_before_any_transfer() {
    let fixture = Fixture::new();
    let verifier = InventoryImageVerifier::new(
        Settings::default(),
        FakeVerifier {
            reject: true,
            ..Default::default()
        },
    );
    let err = PluginBundleDownloader::new(options(&fixture), &fixture.registry, verifier)
        .download_plugin_bundle()
        .unwrap_err();
    assert!(format!("{err:#}").contains("signature verification failed for image"));
    assert!(fixture.registry.calls().is_empty());
    assert!(!fixture.bundle_path().exists());
}

#[test]
fn skip_listed_inventory_is_not_verified() {
    let fixture = Fixture::new();
    let mut settings = Settings::default();
    settings.signature.skip_list = vec![INVENTORY_IMAGE.to_string()];
    settings.signature.suppress_skip_warning = true;
    let verifier = InventoryImageVerifier::new(
        settings,
        FakeVerifier {
            reject: true,
            ..Default::default()
        },
    );
    PluginBundleDownloader::new(
        DownloadPluginBundleOptions {
            refresh_configuration_only: true,
            ..options(&fixture)
        },
        &fixture.registry,
        verifier,
    )
    .download_plugin_bundle()
    .expect("skip-listed image downloads");
    assert!(fixture.bundle_path().is_file());
}

#[test]
fn existing_or_misplaced_destination_fails_fast() {
    let fixture = Fixture::new();
    fs::write(fixture.bundle_path(), b"keep").expect("existing bundle");
    let err = download(&fixture, options(&fixture)).unwrap_err();
    assert!(err.to_string().contains("file already exists"));
    assert_eq!(fs::read(fixture.bundle_path()).expect("read"), b"keep");

    let err = download(
        &fixture,
        DownloadPluginBundleOptions {
            to_tar: Some(fixture.temp.path().join("missing").join("bundle.tar.gz")),
            ..options(&fixture)
        },
    )
    .unwrap_err();
    assert!(err.to_string().contains("does not exist"));
    assert!(fixture.registry.calls().is_empty());
}

#[test]
fn transfer_failures_name_the_phase_and_image() {
    let mut fixture = Fixture::new();
    fixture.registry.failing.push(INVENTORY_IMAGE.to_string());
    let err = download(&fixture, options(&fixture)).unwrap_err();
    assert!(
        format!("{err:#}").contains(&format!(
            "error while downloading and saving plugin images: failed to download plugin inventory image '{INVENTORY_IMAGE}'"
        )),
        "{err:#}"
    );
    assert!(!fixture.bundle_path().exists());

    let mut fixture = Fixture::new();
    let bar = image("linux", Target::Kubernetes, "bar", "v0.0.1");
    fixture.registry.failing.push(bar.clone());
    let err = download(
        &fixture,
        DownloadPluginBundleOptions {
            groups: vec!["acme-cli/default".to_string()],
            ..options(&fixture)
        },
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains(&format!("failed to download image '{bar}'")));
    assert!(!fixture.bundle_path().exists());
}
