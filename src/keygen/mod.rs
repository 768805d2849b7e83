//! Purpose: Key material helpers used to configure the engine.
//! Exports: `KeyAlgorithm`, `generate_key`, `x25519`, `x25519_wg`, `uuid`, certificate and
//! post-quantum helpers.
//! Role: Pure functions; each returns its outputs joined with the response delimiter.
//! Invariants: A present seed must decode to the algorithm's exact seed length or the call
//! fails with `InvalidKeyLength`.
//! Invariants: X25519 private keys are clamped before the public key is derived.
mod cert;
mod pq;

pub use cert::{CertificateOptions, cert_chain_hash, generate_certificate};
pub use pq::{
    INVALID_MLDSA65_SEED, INVALID_MLKEM768_SEED, VLESS_ENCRYPTION_METHOD, mldsa65, mlkem768,
    vless_encryption,
};

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::core::error::{Error, ErrorKind};
use crate::core::response::join_fields;

const KEY_LEN: usize = 32;
const MAX_UUID_NAME_LEN: usize = 30;

pub const INVALID_KEY_LENGTH: &str = "Invalid length of X25519 private key.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// URL-safe base64 without padding, as used by REALITY configs.
    X25519,
    /// Standard padded base64, as used by WireGuard configs.
    X25519Wg,
}

impl KeyAlgorithm {
    fn engine(self) -> &'static base64::engine::GeneralPurpose {
        match self {
            KeyAlgorithm::X25519 => &URL_SAFE_NO_PAD,
            KeyAlgorithm::X25519Wg => &STANDARD,
        }
    }
}

/// Returns `private|public|hash`, deriving from `seed` when non-empty.
pub fn generate_key(algorithm: KeyAlgorithm, seed: &str) -> Result<String, Error> {
    let encoding = algorithm.engine();
    let mut private: [u8; KEY_LEN] = seed_or_random(seed, encoding, INVALID_KEY_LENGTH)?;
    clamp(&mut private);
    let secret = StaticSecret::from(private);
    let public = PublicKey::from(&secret);
    let hash = blake3::hash(public.as_bytes());

    Ok(join_fields(&[
        &encoding.encode(secret.to_bytes()),
        &encoding.encode(public.as_bytes()),
        &encoding.encode(hash.as_bytes()),
    ]))
}

pub fn x25519(seed: &str) -> Result<String, Error> {
    generate_key(KeyAlgorithm::X25519, seed)
}

pub fn x25519_wg(seed: &str) -> Result<String, Error> {
    generate_key(KeyAlgorithm::X25519Wg, seed)
}

/// Decodes a non-empty `seed` to exactly `N` bytes, or draws `N` random bytes.
fn seed_or_random<const N: usize>(
    seed: &str,
    encoding: &base64::engine::GeneralPurpose,
    invalid_length: &'static str,
) -> Result<[u8; N], Error> {
    if seed.is_empty() {
        return random_bytes();
    }
    encoding
        .decode(seed.trim())
        .ok()
        .and_then(|decoded| <[u8; N]>::try_from(decoded).ok())
        .ok_or_else(|| Error::new(ErrorKind::InvalidKeyLength).with_message(invalid_length))
}

fn random_bytes<const N: usize>() -> Result<[u8; N], Error> {
    let mut bytes = [0u8; N];
    getrandom::fill(&mut bytes).map_err(|err| {
        Error::new(ErrorKind::KeyGeneration)
            .with_message(format!("failed to read randomness: {err}"))
    })?;
    Ok(bytes)
}

fn clamp(key: &mut [u8; KEY_LEN]) {
    key[0] &= 248;
    key[31] &= 127;
    key[31] |= 64;
}

/// Empty input yields a random v4 UUID; short names map to v5 in the nil namespace;
/// anything longer must already be a UUID and is normalised.
pub fn uuid(input: &str) -> Result<String, Error> {
    if input.is_empty() {
        return Ok(::uuid::Uuid::new_v4().to_string());
    }
    if input.len() <= MAX_UUID_NAME_LEN {
        return Ok(::uuid::Uuid::new_v5(&::uuid::Uuid::nil(), input.as_bytes()).to_string());
    }
    ::uuid::Uuid::parse_str(input)
        .map(|id| id.to_string())
        .map_err(|err| {
            Error::new(ErrorKind::InvalidInput)
                .with_message("input must be at most 30 bytes or a UUID")
                .with_source(err)
        })
}

#[cfg(test)]
mod tests {
    use super::{INVALID_KEY_LENGTH, KeyAlgorithm, generate_key, uuid, x25519, x25519_wg};
    use crate::core::error::ErrorKind;
    use base64::Engine as _;
    use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};

    fn split(output: &str) -> Vec<String> {
        output.split('|').map(str::to_string).collect()
    }

    #[test]
    fn random_keys_have_three_fields_and_clamped_private() {
        let fields = split(&x25519("").expect("keygen"));
        assert_eq!(fields.len(), 3);
        let private = URL_SAFE_NO_PAD.decode(&fields[0]).expect("decode");
        assert_eq!(private.len(), 32);
        assert_eq!(private[0] & 7, 0);
        assert_eq!(private[31] & 0xc0, 0x40);
        assert_ne!(x25519("").expect("keygen"), x25519("").expect("keygen"));
    }

    #[test]
    fn seeded_keys_are_deterministic() {
        let seed = URL_SAFE_NO_PAD.encode([7u8; 32]);
        let first = x25519(&seed).expect("keygen");
        assert_eq!(first, x25519(&seed).expect("keygen"));

        let clamped = {
            let mut key = [7u8; 32];
            key[0] &= 248;
            key[31] = (key[31] & 127) | 64;
            URL_SAFE_NO_PAD.encode(key)
        };
        assert_eq!(split(&first)[0], clamped);
        assert_eq!(x25519(&clamped).expect("keygen"), first);
    }

    #[test]
    fn wireguard_variant_uses_standard_base64() {
        let seed = STANDARD.encode([9u8; 32]);
        let fields = split(&x25519_wg(&seed).expect("keygen"));
        assert!(fields.iter().all(|field| field.ends_with('=')));
        assert_eq!(STANDARD.decode(&fields[1]).expect("public").len(), 32);
    }

    #[test]
    fn wrong_seed_length_is_rejected() {
        for algorithm in [KeyAlgorithm::X25519, KeyAlgorithm::X25519Wg] {
            let short = match algorithm {
                KeyAlgorithm::X25519 => URL_SAFE_NO_PAD.encode([1u8; 31]),
                KeyAlgorithm::X25519Wg => STANDARD.encode([1u8; 31]),
            };
            let err = generate_key(algorithm, &short).expect_err("31 bytes");
            assert_eq!(err.kind(), ErrorKind::InvalidKeyLength);
            assert_eq!(err.message(), Some(INVALID_KEY_LENGTH));
        }
        let err = x25519("not base64 !!").expect_err("undecodable");
        assert_eq!(err.kind(), ErrorKind::InvalidKeyLength);
    }

    #[test]
    fn uuid_variants() {
        let random = uuid("").expect("v4");
        assert_eq!(random.len(), 36);
        assert_eq!(&random[14..15], "4");

        let named = uuid("example").expect("v5");
        assert_eq!(named, uuid("example").expect("v5"));
        assert_eq!(&named[14..15], "5");

        let existing = "A1B2C3D4-E5F6-4711-8899-AABBCCDDEEFF";
        assert_eq!(uuid(existing).expect("parse"), existing.to_ascii_lowercase());

        let err = uuid(&"x".repeat(31)).expect_err("too long");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
