// SPDX-License-Identifier: MIT

//! Symmetric codec for opaque byte payloads.
//!
//! AES in CBC mode with PKCS#7 padding. The IV is the first cipher block of
//! the key itself: issued tokens must keep decrypting across deployments
//! and restarts, so the IV cannot be random per call. This codec carries no
//! authentication tag; integrity comes from the MAC layers wrapped around
//! it, and callers treat an inner-signature failure as a decryption failure.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

/// AES block size in bytes.
const BLOCK_SIZE: usize = 16;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Symmetric codec errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Key is not 16, 24 or 32 bytes.
    #[error("Key length must be 16, 24 or 32 bytes")]
    InvalidKeyLength,

    /// Ciphertext is empty, misaligned, or unpads incorrectly (wrong key
    /// or corrupted input).
    #[error("Decryption failed")]
    DecryptionFailed,
}

/// Encrypt `plaintext` under `key`. Output length is always a whole number
/// of blocks; empty input round-trips through one padding block.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let iv = &key[..key.len().min(BLOCK_SIZE)];
    match key.len() {
        16 => Ok(Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidKeyLength)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
        24 => Ok(Aes192CbcEnc::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidKeyLength)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
        32 => Ok(Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidKeyLength)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
        _ => Err(CryptoError::InvalidKeyLength),
    }
}

/// Decrypt `ciphertext` under `key` and strip the padding.
pub fn decrypt(ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::DecryptionFailed);
    }
    let iv = &key[..key.len().min(BLOCK_SIZE)];
    match key.len() {
        16 => Aes128CbcDec::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidKeyLength)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed),
        24 => Aes192CbcDec::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidKeyLength)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed),
        32 => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidKeyLength)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed),
        _ => Err(CryptoError::InvalidKeyLength),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_32: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn test_roundtrip_all_key_sizes() {
        let plaintext = b"the quick brown fox jumps over the lazy dog";
        for key in [
            &b"0123456789abcdef"[..],
            &b"0123456789abcdef01234567"[..],
            KEY_32,
        ] {
            let ct = encrypt(plaintext, key).unwrap();
            assert_ne!(ct.as_slice(), &plaintext[..]);
            assert_eq!(ct.len() % 16, 0);
            let pt = decrypt(&ct, key).unwrap();
            assert_eq!(pt, plaintext);
        }
    }

    #[test]
    fn test_roundtrip_lengths() {
        // Exercise padding across a full block span, including empty input.
        for len in 0..=48 {
            let plaintext: Vec<u8> = (0..len as u8).collect();
            let ct = encrypt(&plaintext, KEY_32).unwrap();
            assert_eq!(decrypt(&ct, KEY_32).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_invalid_key_length() {
        assert_eq!(
            encrypt(b"data", b"short-key").unwrap_err(),
            CryptoError::InvalidKeyLength
        );
        assert_eq!(
            decrypt(&[0u8; 16], b"short-key").unwrap_err(),
            CryptoError::InvalidKeyLength
        );
    }

    #[test]
    fn test_misaligned_ciphertext_rejected() {
        let ct = encrypt(b"data", KEY_32).unwrap();
        assert_eq!(
            decrypt(&ct[..ct.len() - 1], KEY_32).unwrap_err(),
            CryptoError::DecryptionFailed
        );
        assert_eq!(decrypt(&[], KEY_32).unwrap_err(), CryptoError::DecryptionFailed);
    }

    #[test]
    fn test_wrong_key_fails_or_garbles() {
        // With a wrong key, either the padding check trips or the output is
        // garbage; it must never equal the plaintext.
        let plaintext = b"sensitive inner credential text";
        let ct = encrypt(plaintext, KEY_32).unwrap();
        let other_key = b"fedcba9876543210fedcba9876543210";
        match decrypt(&ct, other_key) {
            Err(CryptoError::DecryptionFailed) => {}
            Err(e) => panic!("unexpected error: {e}"),
            Ok(pt) => assert_ne!(pt, plaintext),
        }
    }
}
