//! Detached signatures over published objects (Ed25519).

use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey};
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use pkcs8::{EncryptedPrivateKeyInfo, LineEnding, SecretDocument};

use crate::error::{SigningError, VerificationError};

const ENCRYPTED_LABEL: &str = "ENCRYPTED PRIVATE KEY";

pub trait Signer: Send + Sync {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SigningError>;
}

pub trait Verifier: Send + Sync {
    fn verify(&self, content: &[u8], signature: &[u8]) -> Result<(), VerificationError>;
}

pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    /// Reads a PKCS#8 PEM key. Encrypted keys are decrypted with `passphrase`.
    pub fn from_pkcs8_pem(pem: &str, passphrase: &str) -> Result<Self, SigningError> {
        let (label, doc) = SecretDocument::from_pem(pem.trim()).map_err(|e| SigningError(format!("parsing private key PEM: {e}")))?;
        let key = if label == ENCRYPTED_LABEL {
            let info = EncryptedPrivateKeyInfo::try_from(doc.as_bytes()).map_err(|e| SigningError(format!("parsing encrypted key: {e}")))?;
            let plain = info.decrypt(passphrase).map_err(|e| SigningError(format!("decrypting private key: {e}")))?;
            SigningKey::from_pkcs8_der(plain.as_bytes())
        } else {
            SigningKey::from_pkcs8_der(doc.as_bytes())
        }
        .map_err(|e| SigningError(format!("decoding ed25519 key: {e}")))?;
        Ok(Self { key })
    }

    pub fn generate() -> Self { Self { key: SigningKey::generate(&mut rand::rngs::OsRng) } }

    pub fn verifier(&self) -> Ed25519Verifier { Ed25519Verifier { key: self.key.verifying_key() } }

    pub fn public_key_pem(&self) -> Result<String, SigningError> {
        self.key.verifying_key().to_public_key_pem(LineEnding::LF).map_err(|e| SigningError(format!("encoding public key: {e}")))
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SigningError> {
        use ed25519_dalek::Signer as _;
        Ok(self.key.sign(data).to_bytes().to_vec())
    }
}

#[derive(Clone)]
pub struct Ed25519Verifier {
    key: VerifyingKey,
}

impl Ed25519Verifier {
    pub fn from_public_key_pem(pem: &str) -> Result<Self, VerificationError> {
        let key = VerifyingKey::from_public_key_pem(pem.trim()).map_err(|e| VerificationError(format!("parsing public key: {e}")))?;
        Ok(Self { key })
    }
}

impl Verifier for Ed25519Verifier {
    fn verify(&self, content: &[u8], signature: &[u8]) -> Result<(), VerificationError> {
        let sig = Signature::from_slice(signature).map_err(|e| VerificationError(format!("malformed signature: {e}")))?;
        self.key.verify_strict(content, &sig).map_err(|e| VerificationError(e.to_string()))
    }
}
