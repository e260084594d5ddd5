//! Decryption of Embedded Shared Archives
//!
//! Some vendor libraries carry an encrypted jar as base64 text. Decoded, the payload is a
//! 16 byte IV followed by AES-CBC ciphertext with PKCS#7 padding. The key depends on the
//! library version and is looked up in a `KeyTable` the caller fills in.
//!
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockCipher, BlockDecryptMut, KeyInit, KeyIvInit};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::SmaliError;

const IV_SIZE: usize = 16;

/// Key and output file name for one library version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    pub output_name: String,
    /// Base64 encoded AES key
    pub encoded_key: String,
}

/// Version to key mapping, empty until the caller adds entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyTable {
    entries: BTreeMap<String, KeyEntry>,
}

impl KeyTable {
    pub fn new() -> KeyTable {
        KeyTable::default()
    }

    pub fn insert(&mut self, version: &str, output_name: &str, encoded_key: &str) {
        self.entries.insert(
            version.to_string(),
            KeyEntry {
                output_name: output_name.to_string(),
                encoded_key: encoded_key.to_string(),
            },
        );
    }

    pub fn get(&self, version: &str) -> Result<&KeyEntry, SmaliError> {
        match self.entries.get(version) {
            Some(e) => Ok(e),
            None => fail!(KeyNotFound, "no key for version {}", version),
        }
    }

    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// AES-CBC decryptor for ESA payloads
///
/// # Examples
///
/// ```
///  use smali_visitor::esa::{EsaCipher, KeyTable};
///
///  let mut table = KeyTable::new();
///  table.insert("1.0", "classes.jar", "AAECAwQFBgcICQoLDA0ODw==");
///  let cipher = EsaCipher::for_version(&table, "1.0").unwrap();
///  assert_eq!(cipher.key_bits(), 128);
///  assert!(EsaCipher::for_version(&table, "2.0").is_err());
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct EsaCipher {
    key: Vec<u8>,
}

impl std::fmt::Debug for EsaCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EsaCipher(aes-{})", self.key_bits())
    }
}

impl EsaCipher {
    /// Raw key of 16, 24 or 32 bytes
    pub fn new(key: &[u8]) -> Result<EsaCipher, SmaliError> {
        match key.len() {
            16 | 24 | 32 => Ok(EsaCipher { key: key.to_vec() }),
            n => fail!(Decrypt, "invalid key length {}, expected 16, 24 or 32 bytes", n),
        }
    }

    pub fn from_base64(encoded_key: &str) -> Result<EsaCipher, SmaliError> {
        EsaCipher::new(&decode_base64(encoded_key)?)
    }

    pub fn from_entry(entry: &KeyEntry) -> Result<EsaCipher, SmaliError> {
        EsaCipher::from_base64(&entry.encoded_key)
    }

    pub fn for_version(table: &KeyTable, version: &str) -> Result<EsaCipher, SmaliError> {
        EsaCipher::from_entry(table.get(version)?)
    }

    pub fn key_bits(&self) -> usize {
        self.key.len() * 8
    }

    /// Decodes the base64 payload and decrypts it
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>, SmaliError> {
        let data = decode_base64(encoded)?;
        self.decrypt_bytes(&data)
    }

    /// Decrypts `iv || ciphertext`
    pub fn decrypt_bytes(&self, data: &[u8]) -> Result<Vec<u8>, SmaliError> {
        if data.len() < IV_SIZE {
            fail!(Decrypt, "payload of {} bytes is shorter than the IV", data.len());
        }
        let (iv, ciphertext) = data.split_at(IV_SIZE);
        debug!("Decrypting {} bytes with aes-{}", ciphertext.len(), self.key_bits());

        match self.key.len() {
            16 => cbc_decrypt::<aes::Aes128>(&self.key, iv, ciphertext),
            24 => cbc_decrypt::<aes::Aes192>(&self.key, iv, ciphertext),
            _ => cbc_decrypt::<aes::Aes256>(&self.key, iv, ciphertext),
        }
    }

    /// Decrypts the base64 text in `input` and writes the plaintext to `output`
    ///
    /// An existing `output` is only replaced when `force` is set.
    pub fn decrypt_file(&self, input: &Path, output: &Path, force: bool) -> Result<(), SmaliError> {
        if output.exists() && !force {
            fail!(Io, "{} already exists", output.display());
        }
        let encoded = fs::read_to_string(input)?;
        let plain = self.decrypt(&encoded)?;
        fs::write(output, &plain)?;
        debug!("Wrote {} bytes to {}", plain.len(), output.display());
        Ok(())
    }
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, SmaliError>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
{
    let decryptor = match cbc::Decryptor::<C>::new_from_slices(key, iv) {
        Ok(d) => d,
        Err(_) => fail!(Decrypt, "invalid key or IV length"),
    };
    match decryptor.decrypt_padded_vec_mut::<Pkcs7>(ciphertext) {
        Ok(plain) => Ok(plain),
        Err(_) => fail!(Decrypt, "bad padding, wrong key or corrupt payload"),
    }
}

/* Base64 with all whitespace removed, payloads are usually wrapped */
fn decode_base64(text: &str) -> Result<Vec<u8>, SmaliError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    match STANDARD.decode(compact) {
        Ok(bytes) => Ok(bytes),
        Err(e) => fail!(Decrypt, "invalid base64: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use aes::cipher::BlockEncryptMut;

    const KEY: [u8; 16] = *b"0123456789abcdef";
    const IV: [u8; 16] = *b"fedcba9876543210";

    fn encrypt(key: &[u8], plain: &[u8]) -> String {
        let mut data = IV.to_vec();
        let ct = match key.len() {
            16 => cbc::Encryptor::<aes::Aes128>::new_from_slices(key, &IV)
                .unwrap()
                .encrypt_padded_vec_mut::<Pkcs7>(plain),
            _ => cbc::Encryptor::<aes::Aes256>::new_from_slices(key, &IV)
                .unwrap()
                .encrypt_padded_vec_mut::<Pkcs7>(plain),
        };
        data.extend(ct);
        STANDARD.encode(data)
    }

    #[test]
    fn decrypt_known_payload() {
        let plain = b"PK\x03\x04 embedded jar contents";
        let encoded = encrypt(&KEY, plain);
        let cipher = EsaCipher::new(&KEY).unwrap();
        assert_eq!(cipher.decrypt(&encoded).unwrap(), plain.to_vec());

        // Line wrapped input
        let wrapped: String = encoded
            .as_bytes()
            .chunks(16)
            .map(|c| format!("{}\n", std::str::from_utf8(c).unwrap()))
            .collect();
        assert_eq!(cipher.decrypt(&wrapped).unwrap(), plain.to_vec());
    }

    #[test]
    fn aes_256_from_table() {
        let key = [7u8; 32];
        let mut table = KeyTable::new();
        table.insert("3.1", "esa.jar", &STANDARD.encode(key));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("3.1").unwrap().output_name, "esa.jar");

        let cipher = EsaCipher::for_version(&table, "3.1").unwrap();
        assert_eq!(cipher.key_bits(), 256);
        assert_eq!(cipher.decrypt(&encrypt(&key, b"hello")).unwrap(), b"hello".to_vec());
    }

    #[test]
    fn failures() {
        let table = KeyTable::new();
        assert_eq!(EsaCipher::for_version(&table, "9").unwrap_err().kind, ErrorKind::KeyNotFound);
        assert_eq!(EsaCipher::new(&[0u8; 10]).unwrap_err().kind, ErrorKind::Decrypt);

        let cipher = EsaCipher::new(&KEY).unwrap();
        assert_eq!(cipher.decrypt("not base64!").unwrap_err().kind, ErrorKind::Decrypt);
        assert_eq!(cipher.decrypt(&STANDARD.encode([1u8; 8])).unwrap_err().kind, ErrorKind::Decrypt);
        assert_eq!(cipher.decrypt(&STANDARD.encode([1u8; 20])).unwrap_err().kind, ErrorKind::Decrypt);

        let encoded = encrypt(&KEY, b"some text that spans blocks");
        let other = EsaCipher::new(b"ffffffffffffffff").unwrap();
        match other.decrypt(&encoded) {
            Ok(plain) => assert_ne!(plain, b"some text that spans blocks".to_vec()),
            Err(e) => assert_eq!(e.kind, ErrorKind::Decrypt),
        }
    }

    #[test]
    fn versions_are_sorted() {
        let mut table = KeyTable::new();
        table.insert("1.0", "a.jar", "AAECAwQFBgcICQoLDA0ODw==");
        table.insert("0.9", "b.jar", "AAECAwQFBgcICQoLDA0ODw==");
        assert_eq!(table.versions().collect::<Vec<_>>(), vec!["0.9", "1.0"]);
    }

    #[test]
    fn decrypt_file_respects_force() {
        let dir = std::env::temp_dir().join(format!("esa-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let input = dir.join("payload.b64");
        let output = dir.join("out.jar");
        fs::write(&input, encrypt(&KEY, b"first")).unwrap();

        let cipher = EsaCipher::new(&KEY).unwrap();
        cipher.decrypt_file(&input, &output, false).unwrap();
        assert_eq!(fs::read(&output).unwrap(), b"first".to_vec());

        fs::write(&input, encrypt(&KEY, b"second")).unwrap();
        assert_eq!(cipher.decrypt_file(&input, &output, false).unwrap_err().kind, ErrorKind::Io);
        assert_eq!(fs::read(&output).unwrap(), b"first".to_vec());

        cipher.decrypt_file(&input, &output, true).unwrap();
        assert_eq!(fs::read(&output).unwrap(), b"second".to_vec());
        fs::remove_dir_all(&dir).unwrap();
    }
}
