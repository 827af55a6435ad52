//! Integration tests for loading the group configuration from disk.

use std::io::Write;

use group_comm::{ConfigError, Group, NodeConfig, PeerAddress};

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_group_in_file_order() {
    let file = write_config(
        r#"{"group": [
            {"peer_id": 5, "port": 5000},
            {"peer_id": 6, "port": 5001},
            {"peer_id": 7, "port": 5002}
        ]}"#,
    );
    let group = Group::load(file.path()).unwrap();
    assert_eq!(
        group.members(),
        &[
            PeerAddress::new(5, 5000),
            PeerAddress::new(6, 5001),
            PeerAddress::new(7, 5002),
        ]
    );

    let node = NodeConfig::new(group, 6, 5001).unwrap();
    assert_eq!(node.local, PeerAddress::new(6, 5001));
}

#[test]
fn missing_file_is_a_config_fault() {
    let dir = tempfile::tempdir().unwrap();
    let err = Group::load(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, ConfigError::GroupFile { .. }));
    assert!(err.to_string().contains("absent.json"));
}

#[test]
fn unknown_identity_is_a_config_fault() {
    let file = write_config(r#"{"group": [{"peer_id": 1, "port": 5000}]}"#);
    let group = Group::load(file.path()).unwrap();
    assert!(matches!(
        NodeConfig::new(group, 2, 5000),
        Err(ConfigError::UnknownPeer { id: 2, port: 5000 })
    ));
}

#[test]
fn non_json_file_is_a_config_fault() {
    let file = write_config("group: [1, 2, 3]");
    assert!(matches!(Group::load(file.path()), Err(ConfigError::Json(_))));
}
