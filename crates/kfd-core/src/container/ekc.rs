//! Encrypted key container (`.ekc`) file format.
//!
//! File layout:
//! ```text
//! [uncompressed_len:4 LE][raw deflate(outer JSON document)]
//! ```
//! The outer document carries the key-derivation parameters and the
//! base64 ciphertext.  The ciphertext is `IV(16) ‖ AES-256-CBC(inner JSON)`
//! under a key derived with PBKDF2-HMAC-SHA512 from the password and a
//! random 32-byte salt.
//!
//! # Telling a bad password from a bad file (for beginners)
//!
//! CBC has no authentication tag, so a wrong password is only visible
//! because the decrypted bytes fail to unpad or fail to parse as the inner
//! document.  Those failures map to [`ContainerError::InvalidPassword`].
//! Anything wrong before decryption (length header, inflate, outer JSON)
//! maps to [`ContainerError::CorruptFile`].

use std::io::{Read, Write};

use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use tracing::debug;
use zeroize::Zeroizing;

use super::{ContainerError, ContainerKey, KeyContainer, KeyGroup};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Outer document version written by this implementation.
pub const CURRENT_VERSION: &str = "1.0";

/// Default PBKDF2 iteration count.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Highest PBKDF2 iteration count accepted on import or export.
pub const MAX_ITERATIONS: u32 = 10_000_000;

/// Largest inflated document accepted on import.
const MAX_DOCUMENT_LEN: usize = 64 * 1024 * 1024;

const SALT_LEN: usize = 32;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;
const LENGTH_PREFIX_LEN: usize = 4;

const KDF_ALGORITHM: &str = "PBKDF2";
const KDF_HASH: &str = "SHA512";
const CIPHER_ALGORITHM: &str = "AES-256-CBC";

/// Tunables for [`export_container_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    pub iterations: u32,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

// ── Documents ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OuterDocument {
    version: String,
    key_derivation: KeyDerivation,
    encrypted_data: EncryptedData,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyDerivation {
    algorithm: String,
    hash: String,
    salt: String,
    iteration_count: u32,
    key_length: u32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EncryptedData {
    algorithm: String,
    cipher_value: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InnerDocument {
    keys: Vec<ContainerKey>,
    groups: Vec<KeyGroup>,
    next_key_number: u32,
    next_group_number: u32,
}

// ── Export ────────────────────────────────────────────────────────────────────

/// Encrypts a container with the default options.
///
/// # Errors
///
/// Returns [`ContainerError::Serialization`] if a document cannot be built.
pub fn export_container(container: &KeyContainer, password: &str) -> Result<Vec<u8>, ContainerError> {
    export_container_with(container, password, &ExportOptions::default())
}

/// Encrypts a container into `.ekc` bytes.
///
/// # Errors
///
/// Returns [`ContainerError::Serialization`] if a document cannot be built
/// or the iteration count is zero.
pub fn export_container_with(
    container: &KeyContainer,
    password: &str,
    options: &ExportOptions,
) -> Result<Vec<u8>, ContainerError> {
    if options.iterations == 0 || options.iterations > MAX_ITERATIONS {
        return Err(ContainerError::Serialization(format!(
            "iteration count must be between 1 and {MAX_ITERATIONS}"
        )));
    }

    let inner = InnerDocument {
        keys: container.keys().to_vec(),
        groups: container.groups().to_vec(),
        next_key_number: container.next_key_number(),
        next_group_number: container.next_group_number(),
    };
    let plaintext = Zeroizing::new(
        serde_json::to_vec(&inner).map_err(|e| ContainerError::Serialization(e.to_string()))?,
    );

    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut iv);

    let key = derive_key(password, &salt, options.iterations);
    let encryptor = Aes256CbcEnc::new_from_slices(&key[..], &iv)
        .map_err(|e| ContainerError::Serialization(e.to_string()))?;
    let ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(&plaintext);

    let mut cipher_value = Vec::with_capacity(IV_LEN + ciphertext.len());
    cipher_value.extend_from_slice(&iv);
    cipher_value.extend_from_slice(&ciphertext);

    let outer = OuterDocument {
        version: CURRENT_VERSION.to_string(),
        key_derivation: KeyDerivation {
            algorithm: KDF_ALGORITHM.to_string(),
            hash: KDF_HASH.to_string(),
            salt: STANDARD.encode(salt),
            iteration_count: options.iterations,
            key_length: KEY_LEN as u32,
        },
        encrypted_data: EncryptedData {
            algorithm: CIPHER_ALGORITHM.to_string(),
            cipher_value: STANDARD.encode(&cipher_value),
        },
    };
    let outer_bytes =
        serde_json::to_vec(&outer).map_err(|e| ContainerError::Serialization(e.to_string()))?;

    let file = compress_with_length(&outer_bytes)?;
    debug!(
        keys = container.keys().len(),
        groups = container.groups().len(),
        bytes = file.len(),
        "exported key container"
    );
    Ok(file)
}

fn compress_with_length(document: &[u8]) -> Result<Vec<u8>, ContainerError> {
    let length = u32::try_from(document.len())
        .map_err(|_| ContainerError::Serialization("container document too large".to_string()))?;
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(document)
        .map_err(|e| ContainerError::Serialization(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| ContainerError::Serialization(e.to_string()))?;

    let mut file = Vec::with_capacity(LENGTH_PREFIX_LEN + compressed.len());
    file.extend_from_slice(&length.to_le_bytes());
    file.extend_from_slice(&compressed);
    Ok(file)
}

// ── Import ────────────────────────────────────────────────────────────────────

/// Decrypts `.ekc` bytes into a container whose source is `source`.
///
/// # Errors
///
/// - [`ContainerError::CorruptFile`] for a bad length header, inflate
///   failure, unreadable outer document or unsupported parameters.
/// - [`ContainerError::UnsupportedVersion`] for a version newer than 1.0.
/// - [`ContainerError::InvalidPassword`] when decryption yields bytes that
///   do not unpad or do not parse as a container.
pub fn import_container(
    bytes: &[u8],
    password: &str,
    source: impl Into<String>,
) -> Result<KeyContainer, ContainerError> {
    let outer_bytes = decompress_with_length(bytes)?;
    let outer: OuterDocument = serde_json::from_slice(&outer_bytes)
        .map_err(|e| ContainerError::CorruptFile(format!("outer document: {e}")))?;

    let legacy = is_legacy_version(&outer.version)?;
    check_parameters(&outer)?;

    let salt = STANDARD
        .decode(&outer.key_derivation.salt)
        .map_err(|_| ContainerError::CorruptFile("salt is not valid base64".to_string()))?;
    let cipher_value = STANDARD
        .decode(&outer.encrypted_data.cipher_value)
        .map_err(|_| ContainerError::CorruptFile("ciphertext is not valid base64".to_string()))?;
    if cipher_value.len() < IV_LEN + BLOCK_LEN || (cipher_value.len() - IV_LEN) % BLOCK_LEN != 0 {
        return Err(ContainerError::CorruptFile(format!(
            "ciphertext length {} is not IV plus whole blocks",
            cipher_value.len()
        )));
    }
    let (iv, ciphertext) = cipher_value.split_at(IV_LEN);

    let key = derive_key(password, &salt, outer.key_derivation.iteration_count);
    let decryptor = Aes256CbcDec::new_from_slices(&key[..], iv)
        .map_err(|e| ContainerError::CorruptFile(e.to_string()))?;
    let plaintext = if legacy {
        let raw = Zeroizing::new(
            decryptor
                .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
                .map_err(|_| ContainerError::InvalidPassword)?,
        );
        Zeroizing::new(strip_iso10126(&raw)?.to_vec())
    } else {
        Zeroizing::new(
            decryptor
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(|_| ContainerError::InvalidPassword)?,
        )
    };

    let inner: InnerDocument =
        serde_json::from_slice(&plaintext).map_err(|_| ContainerError::InvalidPassword)?;
    let container = KeyContainer::from_records(
        source,
        inner.keys,
        inner.groups,
        inner.next_key_number,
        inner.next_group_number,
    )
    .map_err(|e| ContainerError::CorruptFile(format!("container records: {e}")))?;

    debug!(
        version = %outer.version,
        keys = container.keys().len(),
        groups = container.groups().len(),
        "imported key container"
    );
    Ok(container)
}

fn decompress_with_length(bytes: &[u8]) -> Result<Vec<u8>, ContainerError> {
    if bytes.len() < LENGTH_PREFIX_LEN {
        return Err(ContainerError::CorruptFile(format!(
            "file is {} bytes, too short for a length header",
            bytes.len()
        )));
    }
    let declared = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if declared > MAX_DOCUMENT_LEN {
        return Err(ContainerError::CorruptFile(format!(
            "declared document length {declared} exceeds {MAX_DOCUMENT_LEN}"
        )));
    }

    // One byte past the declared length is enough to detect a mismatch.
    let mut document = Vec::new();
    DeflateDecoder::new(&bytes[LENGTH_PREFIX_LEN..])
        .take(declared as u64 + 1)
        .read_to_end(&mut document)
        .map_err(|e| ContainerError::CorruptFile(format!("inflate failed: {e}")))?;

    if document.len() != declared {
        return Err(ContainerError::CorruptFile(format!(
            "inflated length {} does not match header {declared}",
            document.len()
        )));
    }
    Ok(document)
}

/// `true` for versions before 1.0, which use ISO 10126 padding.
fn is_legacy_version(version: &str) -> Result<bool, ContainerError> {
    let unsupported = || ContainerError::UnsupportedVersion(version.to_string());
    let (major, minor) = version.split_once('.').unwrap_or((version, "0"));
    let major: u32 = major.trim().parse().map_err(|_| unsupported())?;
    let minor: u32 = minor.trim().parse().map_err(|_| unsupported())?;
    match (major, minor) {
        (0, _) => Ok(true),
        (1, 0) => Ok(false),
        _ => Err(unsupported()),
    }
}

fn check_parameters(outer: &OuterDocument) -> Result<(), ContainerError> {
    let kdf = &outer.key_derivation;
    if !kdf.algorithm.eq_ignore_ascii_case(KDF_ALGORITHM)
        || !kdf.hash.eq_ignore_ascii_case(KDF_HASH)
        || kdf.key_length as usize != KEY_LEN
        || kdf.iteration_count == 0
        || kdf.iteration_count > MAX_ITERATIONS
    {
        return Err(ContainerError::CorruptFile(format!(
            "unsupported key derivation {} / {} / {} bytes / {} iterations",
            kdf.algorithm, kdf.hash, kdf.key_length, kdf.iteration_count
        )));
    }
    if !outer
        .encrypted_data
        .algorithm
        .eq_ignore_ascii_case(CIPHER_ALGORITHM)
    {
        return Err(ContainerError::CorruptFile(format!(
            "unsupported cipher {}",
            outer.encrypted_data.algorithm
        )));
    }
    Ok(())
}

/// Removes ISO 10126 padding: random filler whose last byte is the pad length.
fn strip_iso10126(data: &[u8]) -> Result<&[u8], ContainerError> {
    let pad = usize::from(*data.last().ok_or(ContainerError::InvalidPassword)?);
    if pad == 0 || pad > BLOCK_LEN || pad > data.len() {
        return Err(ContainerError::InvalidPassword);
    }
    Ok(&data[..data.len() - pad])
}

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha512>(password.as_bytes(), salt, iterations, &mut key[..]);
    key
}
