//! Purpose: C ABI bridge for host applications (libxray_bridge).
//! Exports: `xray_*` functions declared in `include/xray_bridge.h`.
//! Role: Marshals C strings to `api` calls and encodes every outcome as `code|message` text.
//! Invariants: Returned strings are owned by the caller and released with `xray_string_free`.
//! Invariants: Null or non-UTF-8 arguments yield a `Usage` response, never a crash.
//! Invariants: Interior NULs in outgoing text become U+FFFD, so no returned string is truncated
//! or null.
//! Notes: Booleans cross the boundary as 0/1.
use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use crate::api::{self, CertificateOptions, Error, ErrorKind, KeyAlgorithm, Response};
use crate::logging;

#[unsafe(no_mangle)]
pub extern "C" fn xray_start_server(config: *const c_char) -> *mut c_char {
    respond_with(|| Ok(api::start_server(required(config, "config")?)))
}

#[unsafe(no_mangle)]
pub extern "C" fn xray_stop_server() -> *mut c_char {
    respond(api::stop_server())
}

#[unsafe(no_mangle)]
pub extern "C" fn xray_is_server_started() -> i32 {
    i32::from(api::is_server_started())
}

#[unsafe(no_mangle)]
pub extern "C" fn xray_start(handle: *const c_char, config: *const c_char) -> *mut c_char {
    respond_with(|| {
        let handle = required(handle, "handle")?;
        let config = required(config, "config")?;
        Ok(api::start(handle, config))
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn xray_stop(handle: *const c_char) -> *mut c_char {
    respond_with(|| Ok(api::stop(required(handle, "handle")?)))
}

#[unsafe(no_mangle)]
pub extern "C" fn xray_is_started(handle: *const c_char) -> i32 {
    match required(handle, "handle") {
        Ok(handle) => i32::from(api::is_started(handle)),
        Err(_) => 0,
    }
}

/// A null `url` probes the default generate_204 endpoint.
#[unsafe(no_mangle)]
pub extern "C" fn xray_test_config(
    config: *const c_char,
    port: i32,
    url: *const c_char,
) -> *mut c_char {
    respond_with(|| {
        let config = required(config, "config")?;
        let url = optional(url, "url")?.unwrap_or(api::DEFAULT_PROBE_URL);
        Ok(api::test_config(config, port, url))
    })
}

/// Port 0 probes directly; a null `url` probes the default endpoint.
#[unsafe(no_mangle)]
pub extern "C" fn xray_ping(port: i32, url: *const c_char) -> *mut c_char {
    respond_with(|| {
        let url = optional(url, "url")?.unwrap_or(api::DEFAULT_PROBE_URL);
        Ok(api::ping(port, url))
    })
}

/// Probes through `endpoint` (`host:port`); null or empty probes directly.
#[unsafe(no_mangle)]
pub extern "C" fn xray_probe(endpoint: *const c_char, url: *const c_char) -> *mut c_char {
    respond_with(|| {
        let endpoint = optional(endpoint, "endpoint")?.unwrap_or_default();
        let url = optional(url, "url")?.unwrap_or(api::DEFAULT_PROBE_URL);
        Ok(api::ping_via(endpoint, url))
    })
}

/// Plain version text, not a response.
#[unsafe(no_mangle)]
pub extern "C" fn xray_version() -> *mut c_char {
    to_c_string(api::engine_version())
}

#[unsafe(no_mangle)]
pub extern "C" fn xray_x25519_genkey(seed: *const c_char) -> *mut c_char {
    respond_with(|| {
        let seed = optional(seed, "seed")?.unwrap_or_default();
        Ok(api::generate_key(KeyAlgorithm::X25519, seed))
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn xray_x25519_genkey_wg(seed: *const c_char) -> *mut c_char {
    respond_with(|| {
        let seed = optional(seed, "seed")?.unwrap_or_default();
        Ok(api::generate_key(KeyAlgorithm::X25519Wg, seed))
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn xray_uuid(input: *const c_char) -> *mut c_char {
    respond_with(|| Ok(api::generate_uuid(optional(input, "input")?.unwrap_or_default())))
}

#[unsafe(no_mangle)]
pub extern "C" fn xray_mldsa65(seed: *const c_char) -> *mut c_char {
    respond_with(|| Ok(api::generate_mldsa65(optional(seed, "seed")?.unwrap_or_default())))
}

#[unsafe(no_mangle)]
pub extern "C" fn xray_mlkem768(seed: *const c_char) -> *mut c_char {
    respond_with(|| Ok(api::generate_mlkem768(optional(seed, "seed")?.unwrap_or_default())))
}

#[unsafe(no_mangle)]
pub extern "C" fn xray_vless_enc() -> *mut c_char {
    respond(api::generate_vless_encryption())
}

#[unsafe(no_mangle)]
pub extern "C" fn xray_cert_chain_hash(pem_or_path: *const c_char) -> *mut c_char {
    respond_with(|| Ok(api::cert_chain_hash(required(pem_or_path, "pem_or_path")?)))
}

/// `options` is camelCase JSON (`domains`, `commonName`, `organization`, `isCa`,
/// `expireHours`); null means defaults, which require at least one domain.
#[unsafe(no_mangle)]
pub extern "C" fn xray_generate_cert(options: *const c_char) -> *mut c_char {
    respond_with(|| match optional(options, "options")? {
        Some(json) => Ok(api::generate_certificate_json(json)),
        None => Ok(api::generate_certificate(&CertificateOptions::default())),
    })
}

/// Returns 1 when a subscriber was installed, 0 if one already existed.
#[unsafe(no_mangle)]
pub extern "C" fn xray_init_logging(level: *const c_char) -> i32 {
    let directive = optional(level, "level")
        .ok()
        .flatten()
        .unwrap_or(logging::DEFAULT_DIRECTIVE);
    i32::from(logging::init_tracing(directive))
}

/// Closes every running instance; call once before unloading the library.
#[unsafe(no_mangle)]
pub extern "C" fn xray_shutdown() {
    api::shutdown();
}

#[unsafe(no_mangle)]
pub extern "C" fn xray_string_free(value: *mut c_char) {
    if value.is_null() {
        return;
    }
    unsafe {
        drop(CString::from_raw(value));
    }
}

fn required<'a>(value: *const c_char, name: &str) -> Result<&'a str, Error> {
    optional(value, name)?
        .ok_or_else(|| Error::new(ErrorKind::Usage).with_message(format!("{name} is null")))
}

fn optional<'a>(value: *const c_char, name: &str) -> Result<Option<&'a str>, Error> {
    if value.is_null() {
        return Ok(None);
    }
    unsafe { CStr::from_ptr(value) }
        .to_str()
        .map(Some)
        .map_err(|_| {
            Error::new(ErrorKind::Usage).with_message(format!("{name} is not valid UTF-8"))
        })
}

fn respond_with(call: impl FnOnce() -> Result<Response, Error>) -> *mut c_char {
    match call() {
        Ok(response) => respond(response),
        Err(err) => respond(Response::from(&err)),
    }
}

fn respond(response: Response) -> *mut c_char {
    to_c_string(&response.encode())
}

fn to_c_string(input: &str) -> *mut c_char {
    let bytes = input.replace('\0', "\u{fffd}").into_bytes();
    // SAFETY: every NUL was replaced above.
    unsafe { CString::from_vec_unchecked(bytes) }.into_raw()
}
