use super::KeyValueStore;
use crate::error::{Result, VaultError};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const VALUE_EXT: &str = ".kv";

/// Characters kept verbatim in file names; everything else is percent-encoded.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'_').remove(b'-');

/// File-backed key/value medium: one `<encoded-key>.kv` file per key.
#[derive(Clone)]
pub struct FsStore {
    root: PathBuf,
    quota: Option<usize>,
    origin: Uuid,
}

impl FsStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            quota: None,
            origin: Uuid::new_v4(),
        }
    }

    /// Cap the total size of stored values in bytes.
    pub fn with_quota(mut self, bytes: Option<usize>) -> Self {
        self.quota = bytes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let encoded = utf8_percent_encode(key, KEY_ENCODE_SET).to_string();
        self.root.join(format!("{}{}", encoded, VALUE_EXT))
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root).map_err(VaultError::Io)?;
        }
        Ok(())
    }

    fn stored_bytes_except(&self, skip: &Path) -> Result<usize> {
        if !self.root.exists() {
            return Ok(0);
        }
        let mut total = 0usize;
        for entry in fs::read_dir(&self.root).map_err(VaultError::Io)? {
            let path = entry.map_err(VaultError::Io)?.path();
            if path == skip || !is_value_file(&path) {
                continue;
            }
            total += fs::metadata(&path).map_err(VaultError::Io)?.len() as usize;
        }
        Ok(total)
    }
}

fn is_value_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(VALUE_EXT) && !n.starts_with('.'))
        .unwrap_or(false)
}

fn decode_key(file_name: &str) -> Option<String> {
    let stem = file_name.strip_suffix(VALUE_EXT)?;
    percent_decode_str(stem)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
}

impl KeyValueStore for FsStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).map_err(VaultError::Io)?;
        Ok(Some(content))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_dir()?;
        let target = self.path_for(key);

        if let Some(quota) = self.quota {
            if self.stored_bytes_except(&target)? + value.len() > quota {
                return Err(VaultError::QuotaExceeded {
                    key: key.to_string(),
                });
            }
        }

        // Atomic write
        let tmp = self.root.join(format!(".kv-{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, value).map_err(VaultError::Io)?;
        fs::rename(&tmp, &target).map_err(VaultError::Io)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(path).map_err(VaultError::Io)?;
        }
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(VaultError::Io)? {
            let path = entry.map_err(VaultError::Io)?.path();
            if !is_value_file(&path) {
                continue;
            }
            let Some(key) = path.file_name().and_then(|n| n.to_str()).and_then(decode_key)
            else {
                continue;
            };
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn origin(&self) -> Uuid {
        self.origin
    }
}
