use crate::{
    config::{StorageConfig, constants::LOG_FILE_PATH},
    models::{BackendKind, ValidationError},
};

use super::*;

#[test]
fn test_load_configuration() {
    let config = load_configuration("./testdata/config.toml").expect("failed to load config");

    assert_eq!(config.general.verbose, true);
    assert_eq!(config.general.default_persona.as_deref(), Some("writer"));

    let log = &config.log;
    assert_eq!(log.level.as_deref(), Some("debug"));
    let log_filters = log.filters.as_deref().unwrap_or_default();
    assert_eq!(log_filters.len(), 1);
    assert_eq!(log_filters[0].module.as_deref(), Some("secretary::backend"));
    assert_eq!(log.file.path, "/var/logs/secretary.log");
    assert_eq!(log.file.append, true);

    let backend = &config.backend;
    assert_eq!(backend.connections.len(), 2);
    assert_eq!(backend.timeout_secs, Some(60));

    let deepseek = backend
        .connections
        .iter()
        .find(|c| c.alias() == Some("deepseek"))
        .unwrap();
    assert_eq!(deepseek.enabled(), true);
    assert_eq!(deepseek.kind(), &BackendKind::DeepSeek);
    assert_eq!(deepseek.endpoint(), "https://api.deepseek.com");
    assert_eq!(deepseek.api_key(), Some("sk-deepseek"));

    match &config.storage {
        StorageConfig::Sqlite(sqlite) => {
            assert_eq!(sqlite.path.as_deref(), Some("/var/lib/secretary/chat.db"));
        }
    }

    assert_eq!(config.personas.len(), 2);
    let writer = &config.personas["writer"];
    assert_eq!(writer.provider, "deepseek");
    assert_eq!(writer.max_output_tokens, Some(8000));
    assert_eq!(writer.temperature, Some(1.3));
}

#[test]
fn test_build_personas() {
    let config = load_configuration("./testdata/config.toml").expect("failed to load config");
    let personas = config.build_personas().expect("failed to build personas");
    assert_eq!(personas.len(), 2);

    // BTreeMap keeps personas sorted by id
    let vision = &personas[0];
    assert_eq!(vision.id(), "vision");
    assert!(vision.supports_file("image/png"));
    assert!(vision.supports_file("text/plain"));
    assert!(!vision.supports_file("application/pdf"));

    let writer = &personas[1];
    assert_eq!(writer.id(), "writer");
    assert_eq!(writer.sampling().temperature, Some(1.3));
    assert!(!writer.supports_file("image/png"));
}

#[test]
fn test_load_configuration_with_some_default_fields() {
    let config =
        load_configuration("./testdata/config_with_default.toml").expect("failed to load config");

    let log = &config.log;
    assert_eq!(log.level.as_deref(), Some("info"));
    assert_eq!(log.file.path, LOG_FILE_PATH);
    assert_eq!(config.general.verbose, false);

    match &config.storage {
        StorageConfig::Sqlite(sqlite) => assert_eq!(sqlite.path, None),
    }

    let connection = &config.backend.connections[0];
    assert_eq!(connection.name(), "openai");

    let personas = config.build_personas().expect("failed to build personas");
    assert_eq!(personas.len(), 1);
    // Defaults of the openai kind
    assert!(personas[0].supports_file("image/jpeg"));
    assert!(personas[0].supports_file("application/pdf"));
}

#[test]
fn test_build_personas_requires_one() {
    let err = Configuration::default().build_personas().unwrap_err();
    assert_eq!(
        err.downcast_ref::<ValidationError>(),
        Some(&ValidationError::NoPersonas)
    );
}

#[test]
fn test_resolve_path() {
    let ret = resolve_path("$TEST_PATH/${USER_PATH}/config.toml").expect("failed to resolve path");
    assert_eq!(ret, "//config.toml");

    let dir = "/tmp/test";
    let user_path = "user_path";
    unsafe {
        std::env::set_var("TEST_PATH", dir);
        std::env::set_var("USER_PATH", user_path);
    }
    let ret = resolve_path("$TEST_PATH/${USER_PATH}/config.toml").expect("failed to resolve path");
    assert_eq!(ret, format!("{dir}/{user_path}/config.toml"));
}

#[test]
fn test_basename() {
    assert_eq!(basename("src/session/mod.rs"), "mod.rs");
    assert_eq!(basename("main.rs"), "main.rs");
}
