use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use replica_ledger::application::simulation::Simulation;
use replica_ledger::config::SimulationConfig;
use replica_ledger::domain::crypto::Address;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

fn workload(rows: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "at,node,to,amount,type").unwrap();
    write!(file, "{rows}").unwrap();
    file
}

/// Addresses the binary derives for a default configuration with `nodes`.
fn addresses(nodes: usize) -> Vec<Address> {
    let config = SimulationConfig {
        nodes,
        ..Default::default()
    };
    Simulation::from_config(&config)
        .unwrap()
        .nodes()
        .iter()
        .map(|node| node.address())
        .collect()
}

const RING: &str = "1,0,1,1,send\n1,1,2,2,send\n1,2,3,3,send\n1,3,4,4,send\n1,4,0,5,send\n";

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let input = workload(RING);
    let addresses = addresses(5);

    let mut cmd = Command::new(cargo_bin!("replica-ledger"));
    cmd.arg(input.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("node,account,balance,nonce"))
        // Node 0 pays 1 and receives 5 from node 4.
        .stdout(predicate::str::contains(format!("0,{},104,1", addresses[0])))
        // Node 3's view of node 4: pays 5, receives 4.
        .stdout(predicate::str::contains(format!("3,{},99,1", addresses[4])));

    Ok(())
}

#[test]
fn test_cli_every_node_reports_every_account() -> Result<(), Box<dyn std::error::Error>> {
    let input = workload(RING);

    let mut cmd = Command::new(cargo_bin!("replica-ledger"));
    cmd.arg(input.path()).args(["--policy", "latency", "--delta", "2"]);

    let output = cmd.output()?;
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout)?;
    assert_eq!(stdout.lines().count(), 1 + 5 * 5);
    Ok(())
}

#[test]
fn test_cli_skips_malformed_rows() -> Result<(), Box<dyn std::error::Error>> {
    let input = workload("1,0,1,10,send\n2,0,1,ten,send\n3,0,1,5,burn\n");
    let addresses = addresses(5);

    let mut cmd = Command::new(cargo_bin!("replica-ledger"));
    cmd.arg(input.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error reading workload entry"))
        .stdout(predicate::str::contains(format!("2,{},110,0", addresses[1])));

    Ok(())
}

#[test]
fn test_cli_reads_config_file() -> Result<(), Box<dyn std::error::Error>> {
    let input = workload("1,0,2,10,send\n");
    let mut config = NamedTempFile::new()?;
    write!(
        config,
        r#"{{ "nodes": 3, "policy": {{ "kind": "latency", "delta": 1 }},
             "network": {{ "latency": 1, "jitter": 0 }} }}"#
    )?;

    let mut cmd = Command::new(cargo_bin!("replica-ledger"));
    cmd.arg(input.path()).arg("--config").arg(config.path());

    let output = cmd.output()?;
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout)?;
    assert_eq!(stdout.lines().count(), 1 + 3 * 3);
    Ok(())
}

#[test]
fn test_cli_rejects_invalid_configuration() {
    let input = workload(RING);

    let mut cmd = Command::new(cargo_bin!("replica-ledger"));
    cmd.arg(input.path()).args(["--nodes", "0"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("at least one node"));
}

#[test]
fn test_cli_rejects_unknown_node_in_workload() {
    let input = workload("1,0,9,1,send\n");

    let mut cmd = Command::new(cargo_bin!("replica-ledger"));
    cmd.arg(input.path());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("unknown node 9"));
}

#[test]
fn test_cli_missing_input_file() {
    let mut cmd = Command::new(cargo_bin!("replica-ledger"));
    cmd.arg("does/not/exist.csv");

    cmd.assert().failure();
}

#[test]
fn test_cli_channel_transport() -> Result<(), Box<dyn std::error::Error>> {
    let input = workload(RING);
    let addresses = addresses(5);

    let mut cmd = Command::new(cargo_bin!("replica-ledger"));
    cmd.arg(input.path()).args([
        "--transport",
        "channel",
        "--tick-ms",
        "2",
        "--latency",
        "1",
        "--jitter",
        "0",
        "--steps",
        "2000",
    ]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(format!("4,{},104,1", addresses[0])));

    Ok(())
}
