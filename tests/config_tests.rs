// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use hyperpos_scanner::constants::DEFAULT_CONTAINER_WIDTH;
use hyperpos_scanner::{Config, Locale, ScannerVariant};

#[test]
fn test_config_default() {
    let config = Config::default();

    assert_eq!(config.variant, ScannerVariant::Library);
    assert!(!config.multi_scan, "Single-scan should be the default");
    assert_eq!(config.container_width, DEFAULT_CONTAINER_WIDTH);
    assert!(config.sound_enabled && config.haptics_enabled);
}

#[test]
fn test_config_profile_applies_multi_scan() {
    let config = Config {
        variant: ScannerVariant::Web,
        multi_scan: true,
        ..Config::default()
    };
    let profile = config.profile();
    assert_eq!(profile.variant, ScannerVariant::Web);
    assert!(profile.multi_scan);
}

#[test]
fn test_config_storage_override() {
    let config = Config {
        storage_path: Some("/tmp/hyperpos/pending.json".into()),
        ..Config::default()
    };
    assert_eq!(
        config.storage_path().unwrap(),
        std::path::PathBuf::from("/tmp/hyperpos/pending.json")
    );
}

#[test]
fn test_config_json_field_names() {
    let json = serde_json::to_value(Config {
        locale: Locale::Arabic,
        ..Config::default()
    })
    .unwrap();
    assert_eq!(json["variant"], "Library");
    assert_eq!(json["locale"], "Arabic");
    assert_eq!(json["multi_scan"], false);
}
