use sg_domain::config::{Config, ConfigSeverity};

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 3400);
}

#[test]
fn explicit_zero_host_parses() {
    let toml_str = r#"
[server]
host = "0.0.0.0"
port = 3500
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 3500);
}

#[test]
fn default_cors_allows_only_localhost() {
    let config = Config::default();
    assert!(config
        .server
        .cors
        .allowed_origins
        .contains(&"http://localhost:*".to_string()));
    assert!(config
        .server
        .cors
        .allowed_origins
        .contains(&"http://127.0.0.1:*".to_string()));
}

#[test]
fn empty_file_yields_documented_defaults() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config.sessions.timeout_secs, 1800);
    assert_eq!(config.sessions.sweep_interval_secs, 60);
    assert_eq!(config.sessions.max_sessions, 1000);
    assert_eq!(config.pool.max_connections, 10);
    assert_eq!(config.pool.max_queue_size, 100);
    assert_eq!(config.pool.request_timeout_ms, 30_000);
    assert_eq!(config.pool.worker_count, 4);
    assert_eq!(config.servers.max_servers, 50);
    assert!(config.transport.compat_init);
    assert_eq!(
        config.transport.compat_versions,
        vec!["2025-06-18", "2025-03-26", "2024-11-05"]
    );
}

#[test]
fn full_file_parses_every_section() {
    let toml_str = r#"
[sessions]
timeout_secs = 120
sweep_interval_secs = 10
max_sessions = 5

[pool]
max_connections = 2
max_queue_size = 1
request_timeout_ms = 250
worker_count = 2

[servers]
max_servers = 2

[transport]
compat_init = false
compat_versions = ["2024-11-05"]

[observability]
service_name = "sg-test"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.sessions.max_sessions, 5);
    assert_eq!(config.pool.max_queue_size, 1);
    assert_eq!(config.servers.max_servers, 2);
    assert!(!config.transport.compat_init);
    assert_eq!(config.observability.service_name, "sg-test");
    assert!(config
        .validate()
        .iter()
        .all(|i| i.severity != ConfigSeverity::Error));
}

#[test]
fn zero_workers_fails_validation() {
    let toml_str = r#"
[pool]
worker_count = 0
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|i| i.field == "pool.worker_count" && i.severity == ConfigSeverity::Error));
}
