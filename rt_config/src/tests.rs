use super::RuntimeConfig;

#[test]
fn default_config_has_sane_defaults() {
    let config = RuntimeConfig::default();
    assert_eq!(config.worker_threads, 4);
    assert!(!config.default_block_parent);
    assert!(!config.default_ignore_child_errors);
}

#[test]
fn parse_overrides_only_the_fields_it_mentions() {
    let config = RuntimeConfig::parse("worker_threads = 8\n").unwrap();
    assert_eq!(config.worker_threads, 8);
    assert!(!config.default_block_parent, "unmentioned fields keep their default");
}

#[test]
fn parse_rejects_malformed_toml() {
    assert!(RuntimeConfig::parse("not = [valid").is_err());
}

#[test]
fn load_falls_back_to_defaults_when_the_file_is_missing() {
    let config = RuntimeConfig::load("/nonexistent/path/to/runtime.toml").unwrap();
    assert_eq!(config, RuntimeConfig::default());
}

#[test]
fn exceeds_supervision_depth_is_diagnostic_only() {
    let config = RuntimeConfig::default();
    assert!(!config.exceeds_supervision_depth(config.max_supervision_depth));
    assert!(config.exceeds_supervision_depth(config.max_supervision_depth + 1));
}
