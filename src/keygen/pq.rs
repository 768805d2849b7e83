//! Purpose: Post-quantum key material for engine configs.
//! Exports: `mldsa65`, `mlkem768`, `vless_encryption`, seed error messages.
//! Role: Seed-or-random generators; seeds and keys use URL-safe base64 without padding.
//! Invariants: ML-DSA-65 seeds are 32 bytes, ML-KEM-768 seeds are 64 bytes (`d || z`).
//! Invariants: A given seed always yields the same public material.
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ml_dsa::{KeyGen, MlDsa65};
use ml_kem::{EncodedSizeUser, KemCore, MlKem768};
use x25519_dalek::{PublicKey, StaticSecret};

use super::{KEY_LEN, clamp, random_bytes, seed_or_random};
use crate::core::error::Error;
use crate::core::response::join_fields;

const MLDSA65_SEED_LEN: usize = 32;
const MLKEM768_SEED_LEN: usize = 64;

pub const INVALID_MLDSA65_SEED: &str = "Invalid length of ML-DSA-65 seed.";
pub const INVALID_MLKEM768_SEED: &str = "Invalid length of ML-KEM-768 seed.";

/// Hybrid method name carried by both sides of a VLESS encryption pair.
pub const VLESS_ENCRYPTION_METHOD: &str = "mlkem768x25519plus.native";
const VLESS_SERVER_MODE: &str = "600s";
const VLESS_CLIENT_MODE: &str = "0rtt";

/// Returns `seed|verify_key`.
pub fn mldsa65(seed: &str) -> Result<String, Error> {
    let seed: [u8; MLDSA65_SEED_LEN] =
        seed_or_random(seed, &URL_SAFE_NO_PAD, INVALID_MLDSA65_SEED)?;
    let keypair = MlDsa65::key_gen_internal(&seed.into());
    Ok(join_fields(&[
        &URL_SAFE_NO_PAD.encode(seed),
        &URL_SAFE_NO_PAD.encode(keypair.verifying_key().encode()),
    ]))
}

/// Returns `seed|client|hash`, where `client` is the encapsulation key and `hash` its blake3.
pub fn mlkem768(seed: &str) -> Result<String, Error> {
    let seed: [u8; MLKEM768_SEED_LEN] =
        seed_or_random(seed, &URL_SAFE_NO_PAD, INVALID_MLKEM768_SEED)?;
    let client = mlkem768_client(&seed);
    Ok(join_fields(&[
        &URL_SAFE_NO_PAD.encode(seed),
        &URL_SAFE_NO_PAD.encode(&client),
        &URL_SAFE_NO_PAD.encode(blake3::hash(&client).as_bytes()),
    ]))
}

/// Returns `x25519_decryption|x25519_encryption|mlkem768_decryption|mlkem768_encryption`
/// from fresh keys.
pub fn vless_encryption() -> Result<String, Error> {
    let x25519_private = random_bytes::<KEY_LEN>()?;
    let mlkem_seed = random_bytes::<MLKEM768_SEED_LEN>()?;
    Ok(vless_pairs(x25519_private, &mlkem_seed))
}

fn vless_pairs(
    mut x25519_private: [u8; KEY_LEN],
    mlkem_seed: &[u8; MLKEM768_SEED_LEN],
) -> String {
    clamp(&mut x25519_private);
    let secret = StaticSecret::from(x25519_private);
    let public = PublicKey::from(&secret);
    let client = mlkem768_client(mlkem_seed);
    join_fields(&[
        &vless_field(VLESS_SERVER_MODE, &secret.to_bytes()),
        &vless_field(VLESS_CLIENT_MODE, public.as_bytes()),
        &vless_field(VLESS_SERVER_MODE, mlkem_seed),
        &vless_field(VLESS_CLIENT_MODE, &client),
    ])
}

fn vless_field(mode: &str, key: &[u8]) -> String {
    format!("{VLESS_ENCRYPTION_METHOD}.{mode}.{}", URL_SAFE_NO_PAD.encode(key))
}

fn mlkem768_client(seed: &[u8; MLKEM768_SEED_LEN]) -> Vec<u8> {
    let mut d = [0u8; 32];
    let mut z = [0u8; 32];
    d.copy_from_slice(&seed[..32]);
    z.copy_from_slice(&seed[32..]);
    let (_decapsulation, encapsulation) = MlKem768::generate_deterministic(&d.into(), &z.into());
    encapsulation.as_bytes().to_vec()
}
