//! # Login cryptography
//!
//! - AES-128 in 8-bit CFB mode, keyed and IV'd with the shared secret. The
//!   cipher objects are stream ciphers: they are created once per connection
//!   and carry their feedback state across every chunk they touch.
//! - The server's RSA key pair used to receive the shared secret.
//! - The SHA-1 "server hash" in its signed two's-complement hex form.
//! - Offline-mode UUIDs (version 3 over `OfflinePlayer:<name>`).

use aes::cipher::inout::InOutBuf;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes128;
use md5::Md5;
use rsa::pkcs8::EncodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use uuid::Uuid;

use crate::error::{ProtocolError, Result};

pub type Aes128Cfb8Enc = cfb8::Encryptor<Aes128>;
pub type Aes128Cfb8Dec = cfb8::Decryptor<Aes128>;

/// Length of the shared secret and therefore the AES key
pub const SHARED_SECRET_LEN: usize = 16;

/// Length of the verify token the server issues
pub const VERIFY_TOKEN_LEN: usize = 4;

/// RSA modulus size used by the vanilla protocol
pub const RSA_KEY_BITS: usize = 1024;

/// Build the encrypting and decrypting halves for one connection
pub fn create_ciphers(shared_secret: &[u8]) -> Result<(Aes128Cfb8Enc, Aes128Cfb8Dec)> {
    if shared_secret.len() != SHARED_SECRET_LEN {
        return Err(ProtocolError::ValueOutOfRange(format!(
            "shared secret must be {SHARED_SECRET_LEN} bytes, got {}",
            shared_secret.len()
        )));
    }
    let enc = Aes128Cfb8Enc::new_from_slices(shared_secret, shared_secret)
        .map_err(|_| ProtocolError::EncryptionFailure)?;
    let dec = Aes128Cfb8Dec::new_from_slices(shared_secret, shared_secret)
        .map_err(|_| ProtocolError::DecryptionFailure)?;
    Ok((enc, dec))
}

/// Encrypt `data` in place, advancing the cipher state
pub fn encrypt_in_place(cipher: &mut Aes128Cfb8Enc, data: &mut [u8]) {
    let (blocks, _) = InOutBuf::from(data).into_chunks();
    cipher.encrypt_blocks_inout_mut(blocks);
}

/// Decrypt `data` in place, advancing the cipher state
pub fn decrypt_in_place(cipher: &mut Aes128Cfb8Dec, data: &mut [u8]) {
    let (blocks, _) = InOutBuf::from(data).into_chunks();
    cipher.decrypt_blocks_inout_mut(blocks);
}

/// The server's RSA identity for the login encryption handshake
pub struct ServerKeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
    public_der: Vec<u8>,
}

impl ServerKeyPair {
    /// Generate a fresh key pair; done once at startup
    pub fn generate() -> Result<Self> {
        let mut rng = rand_core::OsRng;
        let private = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| ProtocolError::ConfigError(format!("RSA key generation failed: {e}")))?;
        let public = RsaPublicKey::from(&private);
        let public_der = public
            .to_public_key_der()
            .map_err(|e| ProtocolError::ConfigError(format!("RSA key encoding failed: {e}")))?
            .as_bytes()
            .to_vec();
        Ok(Self {
            private,
            public,
            public_der,
        })
    }

    /// X.509 SubjectPublicKeyInfo DER, as sent in the encryption request
    pub fn public_der(&self) -> &[u8] {
        &self.public_der
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// PKCS#1 v1.5 decrypt a value the client encrypted with our public key
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.private
            .decrypt(Pkcs1v15Encrypt, ciphertext)
            .map_err(|_| ProtocolError::DecryptionFailure)
    }
}

impl std::fmt::Debug for ServerKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerKeyPair")
            .field("public_der_len", &self.public_der.len())
            .finish_non_exhaustive()
    }
}

/// Hash the given parts with SHA-1 and render the signed hex digest
pub fn minecraft_digest(parts: &[&[u8]]) -> String {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    let mut digest: [u8; 20] = hasher.finalize().into();

    let negative = digest[0] & 0x80 != 0;
    if negative {
        let mut carry = true;
        for byte in digest.iter_mut().rev() {
            *byte = !*byte;
            if carry {
                let (value, overflow) = byte.overflowing_add(1);
                *byte = value;
                carry = overflow;
            }
        }
    }

    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    let trimmed = hex.trim_start_matches('0');
    let body = if trimmed.is_empty() { "0" } else { trimmed };
    if negative {
        format!("-{body}")
    } else {
        body.to_string()
    }
}

/// Server hash sent to the session service during online-mode login
pub fn server_hash(server_id: &str, shared_secret: &[u8], public_der: &[u8]) -> String {
    minecraft_digest(&[server_id.as_bytes(), shared_secret, public_der])
}

/// UUID a vanilla server assigns to `username` in offline mode
pub fn offline_uuid(username: &str) -> Uuid {
    let digest: [u8; 16] = Md5::digest(format!("OfflinePlayer:{username}").as_bytes()).into();
    uuid::Builder::from_md5_bytes(digest).into_uuid()
}

/// Random verify token for an encryption request
pub fn verify_token() -> [u8; VERIFY_TOKEN_LEN] {
    rand::random()
}
