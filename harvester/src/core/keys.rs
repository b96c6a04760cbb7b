// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

//! Key derivation and invoice-metadata encryption.
//!
//! Private keys are derived with PBKDF2-HMAC-SHA-256 (1 iteration, 32-byte
//! output) over the 32-byte master key, salted with `"meta"` (metadata
//! encryption) or `"adnl"` (ADNL address). The ADNL address is
//! SHA-256(`0xC6B41348` ‖ public key). These constants are wire-compatible
//! and must not change.

use anyhow::{anyhow, bail, Context as _};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use curve25519_dalek::montgomery::MontgomeryPoint;
use ed25519_dalek::{Signature, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};

use crate::core::{AccountId, Bits256};

pub const META_SALT: &[u8] = b"meta";
pub const ADNL_SALT: &[u8] = b"adnl";

const ADNL_TYPE_PREFIX: [u8; 4] = [0xc6, 0xb4, 0x13, 0x48];
const NONCE_LEN: usize = 12;
const ROLE_LEN: usize = 4;
const SIGNATURE_LEN: usize = 64;
const KEY_LEN: usize = 32;

/// PBKDF2-HMAC-SHA-256 with a single iteration and a 32-byte output reduces
/// to one HMAC block: `U1 = PRF(password, salt ‖ INT_BE(1))`.
fn pbkdf2_one(master: &[u8], salt: &[u8]) -> [u8; 32] {
    let mut mac =
        <Hmac<Sha256> as Mac>::new_from_slice(master).expect("hmac accepts any key length");
    mac.update(salt);
    mac.update(&1u32.to_be_bytes());
    mac.finalize().into_bytes().into()
}

fn derive_key(master_hex: &str, salt: &[u8]) -> anyhow::Result<SigningKey> {
    let master = hex::decode(master_hex).context("master key is not hex")?;
    if master.len() != 32 {
        bail!("key must be 32 bytes long");
    }
    let seed = pbkdf2_one(&master, salt);
    Ok(SigningKey::from_bytes(&seed))
}

/// Private key used for invoice-metadata encryption.
pub fn get_encryption_key(master_hex: &str) -> anyhow::Result<SigningKey> {
    derive_key(master_hex, META_SALT)
}

/// ADNL address of the payment-provider tonsite derived from the master key.
pub fn get_adnl_address(master_hex: &str) -> anyhow::Result<Bits256> {
    let key = derive_key(master_hex, ADNL_SALT)?;
    let mut hasher = Sha256::new();
    hasher.update(ADNL_TYPE_PREFIX);
    hasher.update(key.verifying_key().as_bytes());
    Ok(Bits256(hasher.finalize().into()))
}

/// X25519 secret scalar bytes of an Ed25519 key (SHA-512 of the seed).
fn x25519_scalar_bytes(key: &SigningKey) -> [u8; 32] {
    let hash = Sha512::digest(key.to_bytes());
    let mut scalar = [0u8; 32];
    scalar.copy_from_slice(&hash[..32]);
    scalar
}

fn shared_key(scalar: [u8; 32], peer_public: [u8; 32], salt: &[u8]) -> [u8; 32] {
    let shared = MontgomeryPoint(peer_public).mul_clamped(scalar);
    let mut hasher = Sha256::new();
    hasher.update(shared.to_bytes());
    hasher.update(salt);
    hasher.finalize().into()
}

/// The salt is pinned to the human form of account `0:0` until the protocol
/// defines a per-merchant value.
fn encryption_salt() -> String {
    AccountId::new(0, [0u8; 32]).to_human(true, false)
}

/// Encrypt `data` so that only the holder of `receiver_public` (an X25519
/// public key committed through the key-commit endpoint) can read it.
///
/// Envelope: `our-x25519-public (32) ‖ nonce (12) ‖ ciphertext`.
pub fn encrypt_metadata(
    our_key: &SigningKey,
    receiver_public: &[u8],
    data: &[u8],
) -> anyhow::Result<Vec<u8>> {
    let receiver: [u8; 32] = receiver_public
        .try_into()
        .map_err(|_| anyhow!("invalid receiver key length: {}", receiver_public.len()))?;

    let scalar = x25519_scalar_bytes(our_key);
    let key = shared_key(scalar, receiver, encryption_salt().as_bytes());
    let our_public = MontgomeryPoint::mul_base_clamped(scalar);

    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), data)
        .map_err(|_| anyhow!("encryption failed"))?;

    let mut out = Vec::with_capacity(32 + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(our_public.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Payer-side decryption of an [encrypt_metadata] envelope.
pub fn decrypt_metadata(receiver_scalar: [u8; 32], envelope: &[u8]) -> anyhow::Result<Vec<u8>> {
    if envelope.len() < 32 + NONCE_LEN {
        bail!("envelope too short");
    }
    let sender_public: [u8; 32] = envelope[..32].try_into().expect("checked length");
    let nonce = &envelope[32..32 + NONCE_LEN];
    let ciphertext = &envelope[32 + NONCE_LEN..];

    let key = shared_key(receiver_scalar, sender_public, encryption_salt().as_bytes());
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| anyhow!("decryption failed"))
}

/// Validate a committed encryption key: `signed` is
/// `signature (64) ‖ role (4) ‖ key (32)` where the signature by `public_hex`
/// covers the key bytes and the role must be `"meta"`. Returns the bare key.
pub fn parse_signed_encryption_key(public_hex: &str, signed_hex: &str) -> anyhow::Result<Vec<u8>> {
    let public = hex::decode(public_hex).context("public key is not hex")?;
    let public: [u8; 32] = public
        .try_into()
        .map_err(|_| anyhow!("invalid public key"))?;
    let verifying = VerifyingKey::from_bytes(&public).context("invalid public key")?;

    let signed = hex::decode(signed_hex).context("signed key is not hex")?;
    if signed.len() != SIGNATURE_LEN + ROLE_LEN + KEY_LEN {
        bail!("invalid encryption key len");
    }
    if &signed[SIGNATURE_LEN..SIGNATURE_LEN + ROLE_LEN] != META_SALT {
        bail!("invalid encryption key role");
    }
    let signature = Signature::from_bytes(
        signed[..SIGNATURE_LEN]
            .try_into()
            .expect("checked length"),
    );
    let key = &signed[SIGNATURE_LEN + ROLE_LEN..];
    verifying
        .verify(key, &signature)
        .map_err(|_| anyhow!("invalid encryption key signature"))?;
    Ok(key.to_vec())
}
