//! Temporary SSH key material for builds from a base template.

use crate::error::BuildError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::EncodePrivateKey;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use std::path::Path;

const KEY_TYPE: &str = "ssh-ed25519";

/// A freshly generated key pair.
pub struct GeneratedKey {
    /// PKCS#8 PEM of the private key.
    pub private_pem: String,
    /// OpenSSH authorized_keys line.
    pub public_openssh: String,
}

pub fn generate(comment: &str) -> Result<GeneratedKey, BuildError> {
    let signing_key = SigningKey::generate(&mut OsRng);
    let private_pem = signing_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| BuildError::KeyGeneration(e.to_string()))?;
    let public = signing_key.verifying_key().to_bytes();
    Ok(GeneratedKey {
        private_pem: private_pem.to_string(),
        public_openssh: openssh_public_key(&public, comment),
    })
}

/// Encode a raw ed25519 public key in authorized_keys format.
pub fn openssh_public_key(public: &[u8; 32], comment: &str) -> String {
    let mut blob = Vec::with_capacity(4 + KEY_TYPE.len() + 4 + public.len());
    blob.extend_from_slice(&(KEY_TYPE.len() as u32).to_be_bytes());
    blob.extend_from_slice(KEY_TYPE.as_bytes());
    blob.extend_from_slice(&(public.len() as u32).to_be_bytes());
    blob.extend_from_slice(public);
    let encoded = STANDARD.encode(blob);
    if comment.is_empty() {
        format!("{} {}", KEY_TYPE, encoded)
    } else {
        format!("{} {} {}", KEY_TYPE, encoded, comment)
    }
}

/// Write the private key for debugging, readable by the owner only.
pub fn save_debug_key(path: &Path, private_pem: &str) -> Result<(), BuildError> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(private_pem.as_bytes())?;
    Ok(())
}
