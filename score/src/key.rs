use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use sodiumoxide::crypto::secretstream;
use thiserror::Error;

pub const KEY_VERSION: u8 = 0x01;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("unable to read key file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to write key file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("key file {0:?} already exists")]
    Exists(PathBuf),
    #[error("key file {path:?} is malformed: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("key file {path:?} has unsupported version {version}")]
    Version { path: PathBuf, version: u8 },
    #[error("unable to encode key file: {0}")]
    Encode(#[from] toml::ser::Error),
}

// One symmetric key per configuration, the key file is the only secret.
// Every sealed file carries its own fresh secretstream header.
pub struct MemKey {
    enc: secretstream::Key,
}

impl MemKey {
    pub fn new() -> Self {
        MemKey {
            enc: secretstream::gen_key(),
        }
    }

    pub fn enc_key(&self) -> &secretstream::Key {
        &self.enc
    }

    pub fn to_disk_key(&self) -> DiskKey {
        DiskKey {
            version: KEY_VERSION,
            key: self.enc.clone(),
        }
    }

    pub fn load(path: &Path) -> Result<MemKey, KeyError> {
        let raw = fs::read_to_string(path).map_err(|source| KeyError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let disk: DiskKey = toml::from_str(&raw).map_err(|source| KeyError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if disk.version != KEY_VERSION {
            return Err(KeyError::Version {
                path: path.to_path_buf(),
                version: disk.version,
            });
        }
        Ok(disk.to_mem_key())
    }

    /// Write the key out, never clobbering an existing key file.
    pub fn save(&self, path: &Path) -> Result<(), KeyError> {
        let data = toml::to_string(&self.to_disk_key())?;

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(path).map_err(|source| {
            if source.kind() == ErrorKind::AlreadyExists {
                KeyError::Exists(path.to_path_buf())
            } else {
                KeyError::Write {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        file.write_all(data.as_bytes())
            .map_err(|source| KeyError::Write {
                path: path.to_path_buf(),
                source,
            })
    }
}

impl fmt::Debug for MemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemKey").field("enc", &"****").finish()
    }
}

impl Default for MemKey {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize, Serialize, Clone)]
pub struct DiskKey {
    version: u8,

    #[serde(serialize_with = "base64_key")]
    #[serde(deserialize_with = "base64_key_de")]
    key: secretstream::Key,
}

impl DiskKey {
    pub fn to_mem_key(&self) -> MemKey {
        MemKey {
            enc: self.key.clone(),
        }
    }
}

impl fmt::Debug for DiskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskKey")
            .field("version", &self.version)
            .field("key", &"****")
            .finish()
    }
}

fn base64_key<S: Serializer>(x: &secretstream::Key, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&URL_SAFE.encode(x.0))
}

fn base64_key_de<'de, D: Deserializer<'de>>(data: D) -> Result<secretstream::Key, D::Error> {
    let s: String = Deserialize::deserialize(data)?;
    let v: Vec<u8> = URL_SAFE.decode(s).map_err(serde::de::Error::custom)?;
    secretstream::Key::from_slice(&v[..]).ok_or_else(|| serde::de::Error::custom("Key"))
}
