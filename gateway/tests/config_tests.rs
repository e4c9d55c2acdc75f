use casperflow_gateway::{GatewayConfig, GatewayError};
use casperflow_ledger::TESTNET_RPC;
use pretty_assertions::assert_eq;
use std::io::Write;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn defaults_target_testnet() {
    let config = GatewayConfig::default();

    assert_eq!(config.port, 3000);
    assert_eq!(config.network, "testnet");
    assert_eq!(config.ledger.chain_name, "casper-test");
    assert_eq!(config.ledger.endpoints, vec![TESTNET_RPC.to_string()]);
    assert_eq!(config.ledger.per_attempt_timeout_ms, 15_000);
    assert_eq!(config.ledger.total_deadline_ms, 60_000);
    assert!(config.database.is_none());
    config.validate().unwrap();
}

#[test]
fn missing_path_means_defaults() {
    assert_eq!(
        GatewayConfig::load_or_default(None).unwrap(),
        GatewayConfig::default()
    );
}

#[test]
fn partial_file_keeps_other_defaults() {
    let file = write_config(
        r#"{
            "port": 8080,
            "database": "/var/lib/casperflow/subscriptions.db",
            "ledger": { "endpoints": ["http://127.0.0.1:7777/rpc"], "per_attempt_timeout_ms": 500 }
        }"#,
    );
    let config = GatewayConfig::load(file.path()).unwrap();

    assert_eq!(config.port, 8080);
    assert_eq!(config.bind_addr(), "0.0.0.0:8080");
    assert_eq!(config.ledger.endpoints, vec!["http://127.0.0.1:7777/rpc"]);
    assert_eq!(config.ledger.per_attempt_timeout_ms, 500);
    assert_eq!(config.ledger.total_deadline_ms, 60_000);
    assert_eq!(config.ledger.chain_name, "casper-test");
}

#[test]
fn nodes_flag_replaces_endpoints() {
    let config = GatewayConfig::default().with_nodes(vec![
        "http://a:7777/rpc".to_string(),
        "http://b:7777/rpc".to_string(),
    ]);
    assert_eq!(config.ledger.endpoints.len(), 2);

    let unchanged = GatewayConfig::default().with_nodes(Vec::new());
    assert_eq!(unchanged.ledger.endpoints, vec![TESTNET_RPC.to_string()]);
}

#[test]
fn invalid_json_is_parse_error() {
    let file = write_config("{ port: ");
    assert!(matches!(
        GatewayConfig::load(file.path()),
        Err(GatewayError::Parse { .. })
    ));
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        GatewayConfig::load(&dir.path().join("absent.json")),
        Err(GatewayError::Io { .. })
    ));
}

#[test]
fn bad_merchant_key_is_rejected() {
    let file = write_config(r#"{ "merchant": "not-a-key" }"#);
    assert!(matches!(
        GatewayConfig::load(file.path()),
        Err(GatewayError::Config(_))
    ));
}

#[test]
fn bad_endpoint_is_rejected() {
    let file = write_config(r#"{ "ledger": { "endpoints": ["ftp://node/rpc"] } }"#);
    assert!(matches!(
        GatewayConfig::load(file.path()),
        Err(GatewayError::Ledger(_))
    ));
}
