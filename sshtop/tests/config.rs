//! Config loading, validation and persistence.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sshtop::config::{
    validate_hostname, validate_server_name, validate_username, AuthMethod, Config, ConfigError,
    ServerEntry,
};
use sshtop_engine::{Auth, MonitorSettings, Secret, StaticSecret};

const SAMPLE: &str = r#"
monitoring:
  poll_interval: 1.5
  max_retries: 4
display:
  low_threshold: 20
servers:
  - name: web-1
    host: 10.0.0.5
    username: ops
    key_path: ~/.ssh/id_ed25519
  - name: db
    host: db.internal
    port: 2222
    username: postgres
    auth: password
    password_env: DB_PASS
"#;

fn parse(text: &str) -> Result<Config, ConfigError> {
    Config::from_yaml(text, Path::new("test.yaml"))
}

fn server_error(text: &str) -> (String, &'static str) {
    match parse(text) {
        Err(ConfigError::Server { server, field, .. }) => (server, field),
        other => panic!("expected a server error, got {other:?}"),
    }
}

fn one_server(fields: &str) -> String {
    format!("servers:\n  - {}\n", fields.replace('\n', "\n    "))
}

#[test]
fn sample_parses_with_defaults_filled_in() {
    let cfg = parse(SAMPLE).unwrap();
    let settings = cfg.settings().unwrap();
    assert_eq!(settings.poll_interval, Duration::from_millis(1500));
    assert_eq!(settings.max_retries, 4);
    assert_eq!(
        settings.history_capacity,
        MonitorSettings::default().history_capacity
    );
    assert_eq!(cfg.display.low_threshold, 20.0);
    assert_eq!(cfg.display.medium_threshold, 70.0);

    assert_eq!(cfg.servers.len(), 2);
    assert_eq!(cfg.servers[0].port, 22);
    assert_eq!(cfg.servers[0].auth, AuthMethod::Key);
    assert_eq!(cfg.servers[1].port, 2222);
    assert_eq!(cfg.servers[1].auth, AuthMethod::Password);
    assert_eq!(cfg.servers[1].password_env.as_deref(), Some("DB_PASS"));
}

#[test]
fn empty_file_is_an_empty_config() {
    let cfg = parse("{}").unwrap();
    assert!(cfg.servers.is_empty());
    cfg.settings().unwrap();
}

#[test]
fn invalid_servers_name_server_and_field() {
    let cases = [
        ("name: ''\nhost: h\nusername: u\nkey_path: k", "name"),
        ("name: a\nhost: -bad.example\nusername: u\nkey_path: k", "host"),
        ("name: a\nhost: bad_host\nusername: u\nkey_path: k", "host"),
        ("name: a\nhost: 999.1.1.1\nusername: u\nkey_path: k", "host"),
        ("name: a\nhost: h\nusername: 9ops\nkey_path: k", "username"),
        ("name: a\nhost: h\nusername: u\nport: 0\nkey_path: k", "port"),
        ("name: a\nhost: h\nusername: u", "key_path"),
    ];
    for (fields, want) in cases {
        let (_, field) = server_error(&one_server(fields));
        assert_eq!(field, want, "for {fields:?}");
    }
}

#[test]
fn out_of_range_port_fails_to_parse() {
    let text = one_server("name: a\nhost: h\nusername: u\nport: 70000\nkey_path: k");
    assert!(matches!(parse(&text), Err(ConfigError::Parse { .. })));
}

#[test]
fn duplicate_names_are_rejected() {
    let text = "servers:\n  - {name: a, host: h1, username: u, key_path: k}\n  - {name: a, host: h2, username: u, key_path: k}\n";
    let (server, field) = server_error(text);
    assert_eq!(server, "a");
    assert_eq!(field, "name");
}

#[test]
fn bad_monitoring_and_display_values_are_rejected() {
    for text in [
        "monitoring: {poll_interval: 0}",
        "monitoring: {command_timeout: -1}",
        "monitoring: {history_capacity: 0}",
        "display: {low_threshold: 80, medium_threshold: 50}",
        "display: {medium_threshold: 120}",
    ] {
        assert!(
            matches!(parse(text), Err(ConfigError::Setting { .. })),
            "{text} should be rejected"
        );
    }
}

#[test]
fn field_validators_follow_the_naming_rules() {
    assert!(validate_server_name(&"x".repeat(64)).is_ok());
    assert!(validate_server_name(&"x".repeat(65)).is_err());
    assert!(validate_server_name("tab\there").is_err());

    assert!(validate_hostname("::1").is_ok());
    assert!(validate_hostname("a-b.example.com").is_ok());
    assert!(validate_hostname("123").is_err());
    assert!(validate_hostname(&format!("{}.com", "a".repeat(64))).is_err());

    assert!(validate_username("_svc.backup-1").is_ok());
    assert!(validate_username(&"u".repeat(33)).is_err());
    assert!(validate_username("has space").is_err());
}

#[test]
fn save_then_load_round_trips_without_secrets() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.yaml");

    let mut cfg = parse(SAMPLE).unwrap();
    cfg.add_server(ServerEntry {
        name: "cache".into(),
        host: "cache.internal".into(),
        port: 22,
        username: "ops".into(),
        auth: AuthMethod::Password,
        key_path: None,
        password_env: None,
    })
    .unwrap();
    cfg.save(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(!text.contains("password:"));
    assert!(!path.with_extension("yaml.tmp").exists());

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded, cfg);

    let mut loaded = loaded;
    assert!(loaded.remove_server("web-1").is_some());
    assert!(loaded.remove_server("web-1").is_none());
    loaded.save(&path).unwrap();
    assert_eq!(Config::load(&path).unwrap().servers.len(), 2);
}

#[test]
fn add_server_rejects_duplicates_and_invalid_entries() {
    let mut cfg = parse(SAMPLE).unwrap();
    let mut dup = cfg.servers[0].clone();
    dup.host = "elsewhere".into();
    assert!(cfg.add_server(dup).is_err());

    let mut bad = cfg.servers[0].clone();
    bad.name = "fresh".into();
    bad.username = String::new();
    assert!(cfg.add_server(bad).is_err());
    assert_eq!(cfg.servers.len(), 2);
}

#[test]
fn missing_file_loads_as_default_but_unreadable_yaml_does_not() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.yaml");
    assert_eq!(Config::load_or_default(&missing).unwrap(), Config::default());
    assert!(matches!(
        Config::load(&missing),
        Err(ConfigError::Read { .. })
    ));

    let broken = dir.path().join("broken.yaml");
    std::fs::write(&broken, "servers: [").unwrap();
    let err = Config::load_or_default(&broken).unwrap_err();
    assert!(err.to_string().contains("broken.yaml"));
}

#[test]
fn entries_become_engine_targets() {
    let cfg = parse(SAMPLE).unwrap();
    let settings = cfg.settings().unwrap();

    let web = cfg.servers[0].to_target(&settings, None).unwrap();
    assert_eq!(web.address(), "ops@10.0.0.5:22");
    assert!(matches!(&web.auth, Auth::Key { path } if path.ends_with(".ssh/id_ed25519")));
    assert_eq!(web.connection_timeout, settings.connection_timeout);

    // password servers need a secret source
    assert!(cfg.servers[1].to_target(&settings, None).is_err());
    let secret = Arc::new(StaticSecret::new(Secret::new("pw")));
    let db = cfg.servers[1].to_target(&settings, Some(secret)).unwrap();
    assert_eq!(db.port, 2222);
    assert_eq!(db.auth.kind(), "password");
}
