//! Purpose: Host-facing operations over the process-wide instance manager.
//! Exports: Lifecycle, probe, config test, version and key generation entry points.
//! Role: Stable Rust boundary used by the C ABI and the CLI; every failure becomes a
//! `Response`.
//! Invariants: One `InstanceManager<CoreEngine>` per process, created on first use.
//! Invariants: Stop operations always succeed; start operations reject occupied slots.
use std::sync::OnceLock;

pub use crate::core::error::{Error, ErrorKind, to_response_code};
pub use crate::core::response::Response;
pub use crate::keygen::{CertificateOptions, KeyAlgorithm};
pub use crate::probe::DEFAULT_PROBE_URL;

use crate::config_test;
use crate::engine::{self, CoreEngine};
use crate::keygen;
use crate::lifecycle::{InstanceManager, SERVER_STARTED, SERVER_STOPPED};
use crate::probe;

static MANAGER: OnceLock<InstanceManager<CoreEngine>> = OnceLock::new();

pub fn manager() -> &'static InstanceManager<CoreEngine> {
    MANAGER.get_or_init(|| InstanceManager::new(CoreEngine::new()))
}

pub fn start_server(config: &str) -> Response {
    Response::from_result(manager().start_server(config), SERVER_STARTED)
}

pub fn stop_server() -> Response {
    manager().stop_server();
    Response::success(SERVER_STOPPED)
}

pub fn is_server_started() -> bool {
    manager().is_server_started()
}

pub fn start(handle: &str, config: &str) -> Response {
    Response::from_result(manager().start(handle, config), SERVER_STARTED)
}

pub fn stop(handle: &str) -> Response {
    manager().stop(handle);
    Response::success(SERVER_STOPPED)
}

pub fn is_started(handle: &str) -> bool {
    manager().is_started(handle)
}

pub fn test_config(config: &str, port: i32, target: &str) -> Response {
    config_test::test_config(manager(), config, port, target)
}

pub fn ping(port: i32, target: &str) -> Response {
    probe::probe_port(port, target)
}

/// Probes through an arbitrary `host:port` HTTP proxy; empty means direct.
pub fn ping_via(endpoint: &str, target: &str) -> Response {
    probe::probe_endpoint(endpoint, target)
}

pub fn engine_version() -> &'static str {
    engine::version()
}

pub fn generate_key(algorithm: KeyAlgorithm, seed: &str) -> Response {
    into_response(keygen::generate_key(algorithm, seed))
}

pub fn generate_uuid(input: &str) -> Response {
    into_response(keygen::uuid(input))
}

pub fn generate_mldsa65(seed: &str) -> Response {
    into_response(keygen::mldsa65(seed))
}

pub fn generate_mlkem768(seed: &str) -> Response {
    into_response(keygen::mlkem768(seed))
}

pub fn generate_vless_encryption() -> Response {
    into_response(keygen::vless_encryption())
}

pub fn generate_certificate(options: &CertificateOptions) -> Response {
    into_response(keygen::generate_certificate(options))
}

/// Same as `generate_certificate`, with options given as camelCase JSON.
pub fn generate_certificate_json(options: &str) -> Response {
    let parsed = serde_json::from_str::<CertificateOptions>(options).map_err(|err| {
        Error::new(ErrorKind::InvalidInput)
            .with_message("invalid certificate options json")
            .with_source(err)
    });
    match parsed {
        Ok(options) => generate_certificate(&options),
        Err(err) => Response::from(&err),
    }
}

pub fn cert_chain_hash(pem_or_path: &str) -> Response {
    into_response(keygen::cert_chain_hash(pem_or_path))
}

/// Closes every registered instance, best effort at process exit. Later calls may start
/// instances again.
pub fn shutdown() {
    if let Some(manager) = MANAGER.get() {
        manager.shutdown();
    }
}

fn into_response(result: Result<String, Error>) -> Response {
    match result {
        Ok(message) => Response::success(message),
        Err(err) => Response::from(&err),
    }
}
