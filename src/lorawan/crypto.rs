//! AES-128 and AES-CMAC helpers for the join procedure
//!
//! Thin wrappers over the RustCrypto `aes` and `cmac` crates:
//! - single-key ECB encrypt/decrypt over zero-padded buffers
//! - CMAC-based 4-byte MIC computation and constant-time verification
//! - Join-Accept encryption (AES *decrypt* on the server side)

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use cmac::{Cmac, Mac};

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// MIC size in bytes
pub const MIC_SIZE: usize = 4;

/// 128-bit AES key
pub type AesKey = [u8; 16];

/// Zero-pad `data` up to the next 16-byte boundary.
///
/// Already-aligned input (including empty input) is returned unchanged.
pub fn pad16(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    let rem = out.len() % BLOCK_SIZE;
    if rem != 0 {
        out.resize(out.len() + BLOCK_SIZE - rem, 0);
    }
    out
}

/// AES-128-ECB encrypt of a zero-padded copy of `data`.
pub fn aes128_encrypt(key: &AesKey, data: &[u8]) -> Vec<u8> {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut buf = pad16(data);
    for block in buf.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    buf
}

/// AES-128-ECB decrypt of a zero-padded copy of `data`.
pub fn aes128_decrypt(key: &AesKey, data: &[u8]) -> Vec<u8> {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut buf = pad16(data);
    for block in buf.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    buf
}

/// Encrypt exactly one block, used for session key derivation.
pub fn aes128_encrypt_block(key: &AesKey, block: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut out = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut out);
    out.into()
}

fn cmac(key: &AesKey) -> Cmac<Aes128> {
    <Cmac<Aes128> as Mac>::new(GenericArray::from_slice(key))
}

/// Full 16-byte AES-CMAC digest of `data`.
pub fn aes128_cmac(key: &AesKey, data: &[u8]) -> [u8; BLOCK_SIZE] {
    let mut mac = cmac(key);
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// LoRaWAN MIC: the first four bytes of the CMAC digest.
pub fn compute_mic(key: &AesKey, data: &[u8]) -> [u8; MIC_SIZE] {
    let digest = aes128_cmac(key, data);
    let mut mic = [0u8; MIC_SIZE];
    mic.copy_from_slice(&digest[..MIC_SIZE]);
    mic
}

/// Check a received MIC against `data` in constant time.
pub fn verify_mic(key: &AesKey, data: &[u8], mic: &[u8; MIC_SIZE]) -> bool {
    let mut mac = cmac(key);
    mac.update(data);
    mac.verify_truncated_left(mic).is_ok()
}

/// Encrypt a Join-Accept body (`body ∥ mic`) for the air.
///
/// End devices only carry the AES encrypt primitive, so the server applies
/// the decrypt transform and the device's encrypt recovers the plaintext.
pub fn encrypt_join_accept(key: &AesKey, plaintext: &[u8]) -> Vec<u8> {
    aes128_decrypt(key, plaintext)
}

/// Device-side inverse of [`encrypt_join_accept`].
pub fn decrypt_join_accept(key: &AesKey, ciphertext: &[u8]) -> Vec<u8> {
    aes128_encrypt(key, ciphertext)
}
