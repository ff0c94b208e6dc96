use rand::RngCore;
use ring::aead::{self, UnboundKey, AES_256_GCM};
use ring::hkdf::{Salt, HKDF_SHA256};
use thiserror::Error;

const VAULT_INFO: &[u8] = b"cloudmesh-vault-key";
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("process master key is not exactly 32 raw bytes")]
    CryptoKeyInvalid,

    #[error("ciphertext is corrupt or was not produced by this vault")]
    CiphertextCorrupt,
}

/// AES-256-GCM wrapper around token plaintext, keyed by a process-scoped
/// 32-byte master key loaded once at startup and held for the process lifetime.
pub struct VaultService {
    key_bytes: [u8; 32],
}

impl VaultService {
    /// `master_key` must be exactly 32 raw bytes (already decoded from its hex
    /// configuration form by the caller).
    pub fn new(master_key: &[u8]) -> Result<Self, VaultError> {
        let key_bytes: [u8; 32] = master_key
            .try_into()
            .map_err(|_| VaultError::CryptoKeyInvalid)?;
        Ok(Self { key_bytes })
    }

    fn derive_aead_key(&self) -> Result<aead::LessSafeKey, VaultError> {
        // HKDF over the 32-byte master key with a fixed, code-level info string.
        // Not a second configured key: the public contract is still one 32-byte
        // AES_MASTER_KEY, this is purely how those bytes become an AEAD key.
        let salt = Salt::new(HKDF_SHA256, &[0u8; 32]);
        let prk = salt.extract(&self.key_bytes);
        let okm = prk
            .expand(&[VAULT_INFO], HKDF_SHA256)
            .map_err(|_| VaultError::CryptoKeyInvalid)?;
        let mut derived = [0u8; 32];
        okm.fill(&mut derived)
            .map_err(|_| VaultError::CryptoKeyInvalid)?;
        let unbound = UnboundKey::new(&AES_256_GCM, &derived).map_err(|_| VaultError::CryptoKeyInvalid)?;
        Ok(aead::LessSafeKey::new(unbound))
    }

    /// `Encrypt(plaintext) -> ciphertext-hex`. Nonce is random per call, so two
    /// calls on identical plaintext never produce identical ciphertext.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let key = self.derive_aead_key()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.as_bytes().to_vec();
        key.seal_in_place_append_tag(nonce, aead::Aad::empty(), &mut in_out)
            .map_err(|_| VaultError::CryptoKeyInvalid)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);

        Ok(to_hex(&sealed))
    }

    /// `Decrypt(ciphertext-hex) -> plaintext`. Fails with `CiphertextCorrupt`
    /// on malformed hex, short input, or an AEAD tag mismatch.
    pub fn decrypt(&self, ciphertext_hex: &str) -> Result<String, VaultError> {
        let sealed = from_hex(ciphertext_hex).ok_or(VaultError::CiphertextCorrupt)?;
        if sealed.len() < NONCE_LEN {
            return Err(VaultError::CiphertextCorrupt);
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = aead::Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| VaultError::CiphertextCorrupt)?;

        let key = self.derive_aead_key()?;
        let mut in_out = ciphertext.to_vec();
        let plaintext = key
            .open_in_place(nonce, aead::Aad::empty(), &mut in_out)
            .map_err(|_| VaultError::CiphertextCorrupt)?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| VaultError::CiphertextCorrupt)
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> VaultService {
        VaultService::new(&[7u8; 32]).unwrap()
    }

    #[test]
    fn round_trips_arbitrary_plaintext() {
        let vault = vault();
        let plaintext = "rt1-refresh-token-value";
        let ciphertext = vault.encrypt(plaintext).unwrap();
        assert_eq!(vault.decrypt(&ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn nonce_randomness_defeats_identical_ciphertexts() {
        let vault = vault();
        let a = vault.encrypt("same plaintext").unwrap();
        let b = vault.encrypt("same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_master_key_of_wrong_length() {
        assert!(VaultService::new(&[1u8; 31]).is_err());
        assert!(VaultService::new(&[1u8; 33]).is_err());
    }

    #[test]
    fn rejects_corrupt_ciphertext() {
        let vault = vault();
        let mut ciphertext = vault.encrypt("hello").unwrap();
        ciphertext.push_str("00");
        assert!(matches!(
            vault.decrypt(&ciphertext),
            Err(VaultError::CiphertextCorrupt)
        ));
    }

    #[test]
    fn rejects_non_hex_input() {
        let vault = vault();
        assert!(matches!(
            vault.decrypt("not-hex-at-all!"),
            Err(VaultError::CiphertextCorrupt)
        ));
    }
}
