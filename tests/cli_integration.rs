// CLI integration tests: one response line on stdout, exit status from the code.
use std::net::TcpListener;
use std::process::{Command, Output};

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_xray-bridge");
    Command::new(exe)
}

fn first_line(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .expect("response line")
        .to_string()
}

#[test]
fn version_prints_crate_version() {
    let output = cmd().arg("version").output().expect("version");
    assert!(output.status.success());
    assert_eq!(first_line(&output), env!("CARGO_PKG_VERSION"));
}

#[test]
fn keygen_prints_three_fields() {
    let output = cmd().args(["keygen", "x25519"]).output().expect("keygen");
    assert!(output.status.success());
    let line = first_line(&output);
    let fields: Vec<&str> = line.split('|').collect();
    assert_eq!(fields.len(), 4);
    assert_eq!(fields[0], "0");
}

#[test]
fn keygen_with_short_seed_exits_with_code_200() {
    let output = cmd()
        .args(["keygen", "wg", "--seed", "AAAA"])
        .output()
        .expect("keygen");
    assert_eq!(output.status.code(), Some(200));
    assert_eq!(first_line(&output), "200|Invalid length of X25519 private key.");
}

#[test]
fn uuid_from_short_name_is_stable() {
    let first = cmd().args(["uuid", "example"]).output().expect("uuid");
    let second = cmd().args(["uuid", "example"]).output().expect("uuid");
    assert!(first.status.success());
    assert_eq!(first_line(&first), first_line(&second));
}

#[test]
fn cert_then_cert_hash_from_file() {
    let output = cmd()
        .args(["cert", "--domain", "cli.test", "--expire-hours", "48"])
        .output()
        .expect("cert");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("utf8");
    let message = stdout.strip_prefix("0|").expect("success prefix");
    let cert_pem = message.split_once('|').expect("cert|key").0;

    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("cert.pem");
    std::fs::write(&path, cert_pem).expect("write pem");
    let hash = cmd()
        .args(["cert-hash", path.to_str().expect("utf8 path")])
        .output()
        .expect("cert-hash");
    assert!(hash.status.success());
    assert!(first_line(&hash).starts_with("0|"));
}

#[test]
fn ping_unreachable_port_is_code_100() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    let output = cmd()
        .args(["ping", "--url", &format!("http://127.0.0.1:{port}/generate_204")])
        .output()
        .expect("ping");
    assert_eq!(output.status.code(), Some(100));
    assert!(first_line(&output).starts_with("100|"));
}

#[test]
fn test_config_with_invalid_json_exits_with_code_1() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("config.json");
    std::fs::write(&path, "{ not json").expect("write");
    let output = cmd()
        .args(["test-config", "--config", path.to_str().expect("utf8"), "--port", "1080"])
        .output()
        .expect("test-config");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn missing_config_file_is_a_usage_error() {
    let output = cmd()
        .args(["run", "--config", "/nonexistent/xray-bridge/config.json"])
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(6));
    assert!(first_line(&output).starts_with("6|failed to read config file"));
}

#[test]
fn unknown_subcommand_is_a_usage_error() {
    let output = cmd().arg("frobnicate").output().expect("cli");
    assert_eq!(output.status.code(), Some(6));
}

#[test]
fn post_quantum_keys_follow_the_seed() {
    let seed = "A".repeat(86);
    let first = cmd().args(["mlkem768", "--seed", &seed]).output().expect("mlkem768");
    let second = cmd().args(["mlkem768", "--seed", &seed]).output().expect("mlkem768");
    assert!(first.status.success());
    assert_eq!(first_line(&first), first_line(&second));
    assert_eq!(first_line(&first).split('|').count(), 4);

    let short = cmd().args(["mldsa65", "--seed", "AAAA"]).output().expect("mldsa65");
    assert_eq!(short.status.code(), Some(200));
    assert_eq!(first_line(&short), "200|Invalid length of ML-DSA-65 seed.");
}

#[test]
fn vless_enc_prints_four_pairs() {
    let output = cmd().arg("vless-enc").output().expect("vless-enc");
    assert!(output.status.success());
    let line = first_line(&output);
    let fields: Vec<&str> = line.split('|').skip(1).collect();
    assert_eq!(fields.len(), 4);
    assert!(fields[0].starts_with("mlkem768x25519plus.native.600s."));
    assert!(fields[3].starts_with("mlkem768x25519plus.native.0rtt."));
}

#[test]
fn ping_through_unreachable_proxy_endpoint_is_code_100() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    let output = cmd()
        .args(["ping", "--proxy", &format!("127.0.0.1:{port}"), "--url", "http://a.test/"])
        .output()
        .expect("ping");
    assert_eq!(output.status.code(), Some(100));
}
