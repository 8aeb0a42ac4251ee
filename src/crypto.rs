//! AES-CBC encryption primitive for wallet private keys at rest (§6).
//!
//! `key = secret[:32]`, `iv = secret[-16:]`, matching the original
//! `djtezos`/`djblockchain` cipher derivation. No authentication: the secret
//! is pre-shared and the core trusts it. Threaded through explicitly as a
//! [`Secret`] value rather than read from ambient environment inside the
//! primitive itself (§9 Design Notes).

use aes::Aes256;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

/// The process-wide master secret. Holding it as a distinct type (rather
/// than a bare `String`) keeps it from being passed where a plain password
/// or account name was meant.
#[derive(Clone)]
pub struct Secret(Vec<u8>);

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret").field("len", &self.0.len()).finish()
    }
}

impl Secret {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().into_bytes())
    }

    fn key(&self) -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        let padded = pad_to(&self.0, KEY_LEN);
        key.copy_from_slice(&padded[..KEY_LEN]);
        key
    }

    fn iv(&self) -> [u8; IV_LEN] {
        let mut iv = [0u8; IV_LEN];
        let padded = pad_to(&self.0, IV_LEN);
        let len = padded.len();
        iv.copy_from_slice(&padded[len - IV_LEN..]);
        iv
    }
}

/// Pads (by repeating) a short secret up to `len` bytes so key/IV derivation
/// never panics on slicing a secret shorter than 32 bytes. Production
/// deployments are expected to supply a secret of sufficient length; this
/// only guards test/dev secrets.
fn pad_to(bytes: &[u8], len: usize) -> Vec<u8> {
    if bytes.len() >= len {
        return bytes.to_vec();
    }
    if bytes.is_empty() {
        return vec![0u8; len];
    }
    bytes.iter().cycle().take(len).copied().collect()
}

/// Encrypts `plaintext` with AES-256-CBC/PKCS7 under `secret`'s derived
/// key/IV. Returns `None` when `plaintext` is empty, mirroring the original
/// "null or empty ciphertext decrypts to null" convention in the other
/// direction.
pub fn encrypt(secret: &Secret, plaintext: &[u8]) -> Option<Vec<u8>> {
    if plaintext.is_empty() {
        return None;
    }
    let enc = Aes256CbcEnc::new(&secret.key().into(), &secret.iv().into());
    Some(enc.encrypt_padded_vec_mut::<cbc::cipher::block_padding::Pkcs7>(plaintext))
}

/// Decrypts `ciphertext` previously produced by [`encrypt`]. Null or empty
/// ciphertext decrypts to `None` (§6).
pub fn decrypt(secret: &Secret, ciphertext: &[u8]) -> Option<Vec<u8>> {
    if ciphertext.is_empty() {
        return None;
    }
    let dec = Aes256CbcDec::new(&secret.key().into(), &secret.iv().into());
    dec.decrypt_padded_vec_mut::<cbc::cipher::block_padding::Pkcs7>(ciphertext)
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_private_key_bytes() {
        let secret = Secret::new("a-sufficiently-long-process-wide-secret-value!!");
        let private_key = b"\x5f\xf2\x7f\xf6\xfd\xad\x75\x3a\x0a\xe3\x59\xc3\x61\xd2\x92\x97";
        let ciphertext = encrypt(&secret, private_key).expect("non-empty plaintext encrypts");
        assert_ne!(ciphertext, private_key);
        let plaintext = decrypt(&secret, &ciphertext).expect("round trip decrypts");
        assert_eq!(plaintext, private_key);
    }

    #[test]
    fn empty_ciphertext_decrypts_to_none() {
        let secret = Secret::new("another-process-wide-secret-value");
        assert!(decrypt(&secret, &[]).is_none());
        assert!(encrypt(&secret, &[]).is_none());
    }

    #[test]
    fn short_secret_still_derives_a_stable_key_iv() {
        let secret = Secret::new("short");
        let plaintext = b"wallet-key-bytes";
        let ciphertext = encrypt(&secret, plaintext).unwrap();
        assert_eq!(decrypt(&secret, &ciphertext).unwrap(), plaintext);
    }
}
