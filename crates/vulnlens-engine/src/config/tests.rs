use super::*;
use pretty_assertions::assert_eq;
use vulnlens_classifier::MaxFeatures;

#[test]
fn test_empty_file_gives_defaults() {
    let settings = Settings::from_toml("").unwrap();
    assert_eq!(settings.embedding.model_id, "microsoft/codebert-base");
    assert_eq!(settings.embedding.max_length, 512);
    assert_eq!(settings.artifacts.dir, PathBuf::from("models"));
    assert_eq!(settings.rules.patterns_dir, None);
    assert_eq!(settings.training, ForestParams::default());
}

#[test]
fn test_default_forest_matches_sklearn_defaults() {
    let params = Settings::default().training;
    assert_eq!(params.n_trees, 100);
    assert_eq!(params.max_depth, 0);
    assert_eq!(params.min_samples_split, 2);
    assert_eq!(params.min_samples_leaf, 1);
    assert_eq!(params.max_features, MaxFeatures::Sqrt);
    assert!(params.bootstrap);
}

#[test]
fn test_partial_sections() {
    let settings = Settings::from_toml(
        r#"
        [embedding]
        batch_size = 4
        cache_size = 0

        [artifacts]
        dir = "/var/lib/vulnlens"

        [rules]
        patterns_dir = "config/patterns"

        [training]
        n_trees = 10
        max_features = 16
        "#,
    )
    .unwrap();
    assert_eq!(settings.embedding.batch_size, 4);
    assert_eq!(settings.embedding.cache_size, 0);
    assert_eq!(settings.embedding.max_length, 512);
    assert_eq!(settings.artifacts.dir, PathBuf::from("/var/lib/vulnlens"));
    assert_eq!(settings.rules.patterns_dir, Some(PathBuf::from("config/patterns")));
    assert_eq!(settings.training.n_trees, 10);
    assert_eq!(settings.training.max_features, MaxFeatures::Count(16));
    assert_eq!(settings.training.seed, 42);
}

#[test]
fn test_invalid_training_section_is_config_error() {
    assert!(matches!(
        Settings::from_toml("[training]\nn_trees = 0\n"),
        Err(VulnLensError::Config(_))
    ));
    assert!(matches!(
        Settings::from_toml("[training]\nmax_features = \"half\"\n"),
        Err(VulnLensError::Config(_))
    ));
}

#[test]
fn test_missing_explicit_file_is_error_but_default_is_not() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    assert!(matches!(Settings::from_file(&missing), Err(VulnLensError::Config(_))));
    assert!(Settings::from_file_or_default(&missing).is_ok());

    let present = dir.path().join("vulnlens.toml");
    std::fs::write(&present, "[artifacts]\ndir = \"trained\"\n").unwrap();
    let settings = Settings::from_file_or_default(&present).unwrap();
    assert_eq!(settings.artifacts.dir, PathBuf::from("trained"));
}

#[test]
fn test_example_config_parses() {
    let example = include_str!("../../../../vulnlens.example.toml");
    let settings = Settings::from_toml(example).unwrap();
    assert_eq!(settings.training.n_trees, 100);
}
