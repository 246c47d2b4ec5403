// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Ephemeral SSH Key Pairs
//!
//! Every attempt that goes over SSH gets its own key pair. The public half is
//! handed to the sshd helper, the private half to whoever dials in (an rsync
//! helper pod or the local `ssh` client). Nothing here is ever persisted
//! beyond the attempt.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::SigningKey;
use rand_core::OsRng;
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use std::io::Write;
use tempfile::TempPath;
use thiserror::Error;

use crate::domain::request::KeyAlgorithm;

const RSA_BITS: usize = 2048;
const OPENSSH_MAGIC: &[u8] = b"openssh-key-v1\0";
const PEM_LINE_WIDTH: usize = 70;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Failed to generate {algorithm} key: {reason}")]
    Generation {
        algorithm: KeyAlgorithm,
        reason: String,
    },
    #[error("Failed to write private key: {0}")]
    Io(#[from] std::io::Error),
}

/// Freshly generated key pair, both halves in their OpenSSH text forms.
pub struct KeyPair {
    algorithm: KeyAlgorithm,
    public_key: String,
    private_key: String,
}

impl KeyPair {
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// `authorized_keys` line, e.g. `ssh-ed25519 AAAA...`
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// PEM encoded private key
    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    /// Writes the private key to a temporary file readable only by the
    /// current user. The file is removed when the returned path is dropped.
    pub fn write_private_key(&self) -> Result<TempPath, KeyError> {
        let mut file = tempfile::Builder::new()
            .prefix("pv-migrate-key-")
            .tempfile()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }

        file.write_all(self.private_key.as_bytes())?;
        file.flush()?;
        Ok(file.into_temp_path())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("algorithm", &self.algorithm)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Generates a new key pair for `algorithm`.
pub fn create_key_pair(algorithm: KeyAlgorithm) -> Result<KeyPair, KeyError> {
    match algorithm {
        KeyAlgorithm::Ed25519 => Ok(ed25519_key_pair()),
        KeyAlgorithm::Rsa => rsa_key_pair(),
    }
}

fn ed25519_key_pair() -> KeyPair {
    let signing = SigningKey::generate(&mut OsRng);
    let public = signing.verifying_key().to_bytes();
    let secret = signing.to_bytes();

    let mut public_blob = Vec::new();
    put_string(&mut public_blob, b"ssh-ed25519");
    put_string(&mut public_blob, &public);

    // OpenSSH stores the seed followed by the public key
    let mut keypair = Vec::with_capacity(64);
    keypair.extend_from_slice(&secret);
    keypair.extend_from_slice(&public);

    let check: u32 = rand::random();
    let mut private_section = Vec::new();
    private_section.extend_from_slice(&check.to_be_bytes());
    private_section.extend_from_slice(&check.to_be_bytes());
    put_string(&mut private_section, b"ssh-ed25519");
    put_string(&mut private_section, &public);
    put_string(&mut private_section, &keypair);
    put_string(&mut private_section, b"");
    let mut pad = 1u8;
    while private_section.len() % 8 != 0 {
        private_section.push(pad);
        pad += 1;
    }

    let mut body = Vec::new();
    body.extend_from_slice(OPENSSH_MAGIC);
    put_string(&mut body, b"none");
    put_string(&mut body, b"none");
    put_string(&mut body, b"");
    body.extend_from_slice(&1u32.to_be_bytes());
    put_string(&mut body, &public_blob);
    put_string(&mut body, &private_section);

    KeyPair {
        algorithm: KeyAlgorithm::Ed25519,
        public_key: format!("ssh-ed25519 {}", STANDARD.encode(&public_blob)),
        private_key: pem("OPENSSH PRIVATE KEY", &body),
    }
}

fn rsa_key_pair() -> Result<KeyPair, KeyError> {
    let private = RsaPrivateKey::new(&mut OsRng, RSA_BITS).map_err(|e| KeyError::Generation {
        algorithm: KeyAlgorithm::Rsa,
        reason: e.to_string(),
    })?;

    let private_pem = private
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| KeyError::Generation {
            algorithm: KeyAlgorithm::Rsa,
            reason: e.to_string(),
        })?;

    let mut public_blob = Vec::new();
    put_string(&mut public_blob, b"ssh-rsa");
    put_mpint(&mut public_blob, &private.e().to_bytes_be());
    put_mpint(&mut public_blob, &private.n().to_bytes_be());

    Ok(KeyPair {
        algorithm: KeyAlgorithm::Rsa,
        public_key: format!("ssh-rsa {}", STANDARD.encode(&public_blob)),
        private_key: private_pem.to_string(),
    })
}

fn put_string(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buf.extend_from_slice(data);
}

fn put_mpint(buf: &mut Vec<u8>, magnitude: &[u8]) {
    let trimmed = match magnitude.iter().position(|b| *b != 0) {
        Some(first) => &magnitude[first..],
        None => &[],
    };
    // A set high bit would read back as negative
    if trimmed.first().is_some_and(|b| b & 0x80 != 0) {
        let mut padded = Vec::with_capacity(trimmed.len() + 1);
        padded.push(0);
        padded.extend_from_slice(trimmed);
        put_string(buf, &padded);
    } else {
        put_string(buf, trimmed);
    }
}

fn pem(label: &str, der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut out = format!("-----BEGIN {}-----\n", label);
    for chunk in encoded.as_bytes().chunks(PEM_LINE_WIDTH) {
        // base64 output is ASCII
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out.push_str(&format!("-----END {}-----\n", label));
    out
}
