use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use sarc::{ArchiveOptions, Compression, ModePolicy};
use score::buf::{StreamCopier, CHUNK_SIZE};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid configuration name {0:?}")]
    InvalidName(String),
    #[error("configuration {0} is listed more than once")]
    DuplicateName(String),
    #[error("chunk_size must be at least 1")]
    ChunkSize,
}

// Instruction file as written on disk
//
//  src = "data"
//  ignore = ["\\.git/"]
//  encrypt = true
//  compression = "gzip"
//
//  [archive]
//  chunk_size = 4096
//  mode = 0o644
//
//  [[configurations]]
//  name = "staging"
//  except = ["^secrets/"]
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct Instruction {
    pub src: PathBuf,

    #[serde(default)]
    pub ignore: Vec<String>,

    #[serde(default)]
    pub encrypt: bool,

    #[serde(default)]
    pub compression: Compression,

    #[serde(default)]
    pub reuse_base: bool,

    #[serde(default)]
    pub archive: ArchiveSection,

    #[serde(default)]
    pub configurations: Vec<ConfigurationSection>,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct ArchiveSection {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    // Unset preserves the source permissions
    pub mode: Option<u32>,
}

impl Default for ArchiveSection {
    fn default() -> Self {
        ArchiveSection {
            chunk_size: CHUNK_SIZE,
            mode: None,
        }
    }
}

fn default_chunk_size() -> usize {
    CHUNK_SIZE
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct ConfigurationSection {
    pub name: String,

    #[serde(default)]
    pub except: Vec<String>,

    #[serde(default)]
    pub only: Vec<String>,
}

/// Validated instruction with every path resolved and pattern compiled.
#[derive(Debug)]
pub struct Config {
    pub config_dir: PathBuf,
    pub src: PathBuf,
    pub ignore: Vec<Regex>,
    pub encrypt: bool,
    pub compression: Compression,
    pub reuse_base: bool,
    pub options: ArchiveOptions,
    pub configurations: Vec<Configuration>,
}

#[derive(Debug)]
pub struct Configuration {
    pub name: String,
    pub except: Vec<Regex>,
    pub only: Vec<Regex>,
}

impl Configuration {
    pub fn is_filtered(&self) -> bool {
        !self.except.is_empty() || !self.only.is_empty()
    }

    /// Whether a base entry survives the `only` and `except` filters.
    pub fn admits(&self, name: &str) -> bool {
        let only = self.only.is_empty() || self.only.iter().any(|r| r.is_match(name));
        only && !self.except.iter().any(|r| r.is_match(name))
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let read = |source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        };

        let path = fs::canonicalize(path).map_err(read)?;
        let raw = fs::read_to_string(&path).map_err(read)?;

        let instruction: Instruction = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;

        // Canonical file paths always have a parent
        let config_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Config::from_instruction(instruction, &config_dir)
    }

    pub fn from_instruction(instruction: Instruction, config_dir: &Path) -> Result<Config, ConfigError> {
        if instruction.archive.chunk_size == 0 {
            return Err(ConfigError::ChunkSize);
        }

        let mut seen = HashSet::new();
        let mut configurations = Vec::new();
        for conf in instruction.configurations {
            if !valid_name(&conf.name) {
                return Err(ConfigError::InvalidName(conf.name));
            }
            if !seen.insert(conf.name.clone()) {
                return Err(ConfigError::DuplicateName(conf.name));
            }

            configurations.push(Configuration {
                except: compile(&conf.except)?,
                only: compile(&conf.only)?,
                name: conf.name,
            });
        }

        let mode = match instruction.archive.mode {
            Some(mode) => ModePolicy::Fixed(mode),
            None => ModePolicy::Preserve,
        };

        Ok(Config {
            config_dir: config_dir.to_path_buf(),
            src: config_dir.join(&instruction.src),
            ignore: compile(&instruction.ignore)?,
            encrypt: instruction.encrypt,
            compression: instruction.compression,
            reuse_base: instruction.reuse_base,
            options: ArchiveOptions {
                copier: StreamCopier::new(instruction.archive.chunk_size),
                mode,
            },
            configurations,
        })
    }

    pub fn working_dir(&self) -> PathBuf {
        self.config_dir.join("working")
    }

    pub fn overlay_dir(&self, name: &str) -> PathBuf {
        self.config_dir.join("configurations").join(name)
    }

    pub fn key_file(&self, name: &str) -> PathBuf {
        self.config_dir.join("keys").join(name)
    }
}

// Names end up as path components and file name prefixes
fn valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|source| ConfigError::Pattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

#[cfg(test)]
mod test_config {
    use super::*;

    fn parse(raw: &str) -> Result<Config, ConfigError> {
        let instruction: Instruction = toml::from_str(raw).unwrap();
        Config::from_instruction(instruction, Path::new("/etc/strand"))
    }

    #[test]
    fn minimal() {
        let config = parse(r#"src = "data""#).unwrap();

        assert_eq!(config.src, PathBuf::from("/etc/strand/data"));
        assert!(!config.encrypt);
        assert!(!config.reuse_base);
        assert_eq!(config.compression, Compression::Gzip);
        assert_eq!(config.options, ArchiveOptions::default());
        assert!(config.configurations.is_empty());
        assert_eq!(config.working_dir(), PathBuf::from("/etc/strand/working"));
    }

    #[test]
    fn full() {
        let config = parse(
            r#"
            src = "/srv/site"
            ignore = ["\\.git/", "~$"]
            encrypt = true
            compression = "zstd"
            reuse_base = true

            [archive]
            chunk_size = 4096
            mode = 0o600

            [[configurations]]
            name = "staging"
            except = ["^secrets/"]

            [[configurations]]
            name = "prod"
            only = ["^public/"]
            "#,
        )
        .unwrap();

        assert_eq!(config.src, PathBuf::from("/srv/site"));
        assert_eq!(config.ignore.len(), 2);
        assert!(config.encrypt);
        assert_eq!(config.compression, Compression::Zstd);
        assert_eq!(config.options.copier.chunk_size(), 4096);
        assert_eq!(config.options.mode, ModePolicy::Fixed(0o600));

        let names: Vec<_> = config.configurations.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["staging", "prod"]);
        assert_eq!(config.overlay_dir("prod"), PathBuf::from("/etc/strand/configurations/prod"));
        assert_eq!(config.key_file("prod"), PathBuf::from("/etc/strand/keys/prod"));
    }

    #[test]
    fn filters() {
        let config = parse(
            r#"
            src = "data"

            [[configurations]]
            name = "plain"

            [[configurations]]
            name = "filtered"
            only = ["^public/"]
            except = ["\\.bak$"]
            "#,
        )
        .unwrap();

        let plain = &config.configurations[0];
        assert!(!plain.is_filtered());
        assert!(plain.admits("anything"));

        let filtered = &config.configurations[1];
        assert!(filtered.is_filtered());
        assert!(filtered.admits("public/index.html"));
        assert!(!filtered.admits("public/index.html.bak"));
        assert!(!filtered.admits("private/notes.txt"));
    }

    #[test]
    fn bad_pattern() {
        let err = parse(
            r#"
            src = "data"
            ignore = ["[unclosed"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Pattern { .. }));
    }

    #[test]
    fn duplicate_names() {
        let err = parse(
            r#"
            src = "data"
            [[configurations]]
            name = "a"
            [[configurations]]
            name = "a"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateName(name) if name == "a"));
    }

    #[test]
    fn bad_names() {
        for name in ["", "..", "a/b"] {
            let raw = format!("src = \"data\"\n[[configurations]]\nname = \"{}\"\n", name);
            let err = parse(&raw).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidName(_)));
        }
    }

    #[test]
    fn zero_chunk() {
        let err = parse(
            r#"
            src = "data"
            [archive]
            chunk_size = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ChunkSize));
    }

    #[test]
    fn unknown_field_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strand.toml");
        fs::write(&path, "src = \"data\"\nsrcs = 1\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn load_resolves_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strand.toml");
        fs::write(&path, "src = \"data\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        assert_eq!(config.config_dir, root);
        assert_eq!(config.src, root.join("data"));
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
