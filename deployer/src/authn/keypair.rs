//! RSA key pairs owned by a target server
//!
//! The private key is held as a PEM string wrapped in a [`SecretString`] and
//! is only parsed into an RSA key for the duration of a single signing
//! operation. On disk it only ever appears as a [`SealedKey`], an encrypted
//! PKCS#8 document.

use pkcs8::pkcs5::pbes2;
use pkcs8::PrivateKeyInfo;
use rand::RngCore;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use tracing::debug;

use crate::errors::DeployError;
use crate::utils::md5_hex;

/// Smallest modulus accepted when generating keys
pub const MIN_KEY_BITS: usize = 2048;

/// PBKDF2 rounds used when sealing a private key
pub const SEAL_ITERATIONS: u32 = 100_000;

const ENCRYPTED_PEM_LABEL: &str = "ENCRYPTED PRIVATE KEY";

/// A private key and the public key derived from it
#[derive(Debug)]
pub struct KeyPair {
    private_pem: SecretString,
    public_pem: String,
}

/// Stored form of a key pair: the private key as a passphrase-encrypted
/// PKCS#8 PEM next to the plain public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedKey {
    privkey: String,
    pubkey: String,
}

impl SealedKey {
    /// Public key in SPKI PEM form
    pub fn public_key_pem(&self) -> &str {
        &self.pubkey
    }

    /// Identifier of the sealed pair's public key
    pub fn key_id(&self) -> String {
        key_id(&self.pubkey)
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self {
            private_pem: SecretString::from(self.private_pem.expose_secret().to_string()),
            public_pem: self.public_pem.clone(),
        }
    }
}

impl KeyPair {
    /// Generate a fresh 2048-bit key pair
    pub fn generate() -> Result<Self, DeployError> {
        Self::generate_with_bits(MIN_KEY_BITS)
    }

    /// Generate a fresh key pair with the given modulus size
    pub fn generate_with_bits(bits: usize) -> Result<Self, DeployError> {
        if bits < MIN_KEY_BITS {
            return Err(DeployError::ValidationError(format!(
                "Key size must be at least {} bits, got {}",
                MIN_KEY_BITS, bits
            )));
        }

        debug!("Generating {}-bit RSA key", bits);
        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
            .map_err(|e| DeployError::InvalidKey(format!("Could not generate key: '{}'", e)))?;

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| DeployError::InvalidKey(format!("Could not export private key: '{}'", e)))?;

        Ok(Self {
            public_pem: derive_public_pem(&private_key)?,
            private_pem: SecretString::from(private_pem.as_str().to_string()),
        })
    }

    /// Accept a PEM private key (PKCS#8 or PKCS#1) after checking it is
    /// well formed, deriving the public key alongside it
    pub fn from_private_pem(pem: &str) -> Result<Self, DeployError> {
        if pem.trim().is_empty() {
            return Err(DeployError::ValidationError(
                "Deployment key is a required field".to_string(),
            ));
        }

        let private_key = open_private_key(pem)?;

        Ok(Self {
            public_pem: derive_public_pem(&private_key)?,
            private_pem: SecretString::from(pem.trim().to_string()),
        })
    }

    /// Public key in SPKI PEM form
    pub fn public_key_pem(&self) -> &str {
        &self.public_pem
    }

    /// Private key in PEM form
    pub fn private_key(&self) -> &SecretString {
        &self.private_pem
    }

    /// Stable identifier of this pair's public key
    pub fn key_id(&self) -> String {
        key_id(&self.public_pem)
    }

    /// Encrypt the private key under `passphrase` for storage
    pub fn seal(&self, passphrase: &SecretString) -> Result<SealedKey, DeployError> {
        let private_key = open_private_key(self.private_pem.expose_secret())?;
        let der = private_key
            .to_pkcs8_der()
            .map_err(|e| DeployError::InvalidKey(format!("Could not export private key: '{}'", e)))?;
        let info = PrivateKeyInfo::try_from(der.as_bytes())
            .map_err(|e| DeployError::InvalidKey(format!("Could not export private key: '{}'", e)))?;

        let mut salt = [0u8; 16];
        let mut iv = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut iv);
        let params = pbes2::Parameters::pbkdf2_sha256_aes256cbc(SEAL_ITERATIONS, &salt, &iv)
            .map_err(|e| DeployError::InvalidKey(format!("Could not encrypt private key: '{}'", e)))?;

        let encrypted = info
            .encrypt_with_params(params, passphrase.expose_secret().as_bytes())
            .map_err(|e| DeployError::InvalidKey(format!("Could not encrypt private key: '{}'", e)))?
            .to_pem(ENCRYPTED_PEM_LABEL, LineEnding::LF)
            .map_err(|e| DeployError::InvalidKey(format!("Could not export private key: '{}'", e)))?;

        Ok(SealedKey {
            privkey: encrypted.as_str().to_string(),
            pubkey: self.public_pem.clone(),
        })
    }

    /// Decrypt a stored key. The public half is re-derived, so a tampered
    /// `pubkey` is ignored.
    pub fn unseal(sealed: &SealedKey, passphrase: &SecretString) -> Result<Self, DeployError> {
        let private_key =
            RsaPrivateKey::from_pkcs8_encrypted_pem(&sealed.privkey, passphrase.expose_secret().as_bytes())
                .map_err(|e| DeployError::InvalidKey(format!("Could not decrypt private key: '{}'", e)))?;
        private_key
            .validate()
            .map_err(|e| DeployError::InvalidKey(format!("Could not process private key: '{}'", e)))?;

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| DeployError::InvalidKey(format!("Could not export private key: '{}'", e)))?;

        Ok(Self {
            public_pem: derive_public_pem(&private_key)?,
            private_pem: SecretString::from(private_pem.as_str().to_string()),
        })
    }

    /// Sign data with PKCS#1 v1.5 over SHA-1, the digest beacons verify with
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, DeployError> {
        let private_key = open_private_key(self.private_pem.expose_secret())?;
        let signing_key = SigningKey::<Sha1>::new(private_key);
        let signature = signing_key
            .try_sign(data)
            .map_err(|e| DeployError::InvalidKey(format!("Could not sign data: '{}'", e)))?;
        Ok(signature.to_vec())
    }
}

/// Check a signature against a PEM public key.
///
/// Returns `Ok(false)` for a well-formed signature that does not match; a
/// malformed key or a signature of the wrong length is an error.
pub fn verify(data: &[u8], signature: &[u8], public_pem: &str) -> Result<bool, DeployError> {
    let public_key = RsaPublicKey::from_public_key_pem(public_pem)
        .map_err(|e| DeployError::InvalidKey(format!("Could not process public key: '{}'", e)))?;

    if signature.len() != public_key.size() {
        return Err(DeployError::ValidationError(format!(
            "Malformed signature: expected {} bytes, got {}",
            public_key.size(),
            signature.len()
        )));
    }

    let signature = Signature::try_from(signature)
        .map_err(|e| DeployError::ValidationError(format!("Malformed signature: {}", e)))?;

    let verifying_key = VerifyingKey::<Sha1>::new(public_key);
    Ok(verifying_key.verify(data, &signature).is_ok())
}

/// Lowercase hex MD5 of a public key PEM
pub fn key_id(public_pem: &str) -> String {
    md5_hex(public_pem.trim().as_bytes())
}

fn open_private_key(pem: &str) -> Result<RsaPrivateKey, DeployError> {
    let private_key = match RsaPrivateKey::from_pkcs8_pem(pem) {
        Ok(key) => key,
        Err(pkcs8_err) => RsaPrivateKey::from_pkcs1_pem(pem).map_err(|pkcs1_err| {
            DeployError::InvalidKey(format!(
                "Could not process private key: '{}' (as PKCS#1: '{}')",
                pkcs8_err, pkcs1_err
            ))
        })?,
    };

    private_key
        .validate()
        .map_err(|e| DeployError::InvalidKey(format!("Could not process private key: '{}'", e)))?;

    Ok(private_key)
}

fn derive_public_pem(private_key: &RsaPrivateKey) -> Result<String, DeployError> {
    RsaPublicKey::from(private_key)
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| DeployError::InvalidKey(format!("Could not export public key: '{}'", e)))
}
