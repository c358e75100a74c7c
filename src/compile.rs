use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use time::format_description::well_known::Rfc3339;

use sarc::{build_base, compress, merge, ArchiveError, ArchiveHandle};
use score::crypto;

use crate::config::{Config, Configuration};
use crate::contents::ContentsInfo;
use crate::error::Error;
use crate::naming;

/// Build the base archive of the configured source tree, then derive,
/// compress and optionally seal one archive per configuration.
///
/// Returns the final file of every configuration in order. The first
/// failure aborts the run, intermediate files written so far are left
/// behind.
pub fn compile(config: &Config) -> Result<Vec<PathBuf>, Error> {
    let working = config.working_dir();
    if !working.exists() {
        info!("Working directory does not exist, creating");
        fs::create_dir_all(&working).map_err(|source| Error::CreateDir {
            path: working.clone(),
            source,
        })?;
    }
    explain(config);

    let contents = ContentsInfo::scan(&config.src, &config.ignore)?;
    info!(
        "Source holds {} files, {} bytes, newest {}",
        contents.contents.len(),
        contents.size,
        contents
            .newest
            .format(&Rfc3339)
            .unwrap_or_else(|_| contents.newest_epoch().to_string())
    );

    let base = base_archive(config, &contents, &working)?;

    let mut outputs = Vec::new();
    for conf in config.configurations.iter() {
        outputs.push(variant(config, conf, &contents, &base, &working)?);
    }
    Ok(outputs)
}

fn explain(config: &Config) {
    info!("Source: {:?}", config.src);
    info!("Ignoring: {:?}", config.ignore.iter().map(|r| r.as_str()).collect::<Vec<_>>());
    info!("Compression: {:?}, encrypt: {}", config.compression, config.encrypt);

    for conf in config.configurations.iter() {
        info!(
            "Configuration {}: only {:?}, except {:?}",
            conf.name,
            conf.only.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
            conf.except.iter().map(|r| r.as_str()).collect::<Vec<_>>()
        );
    }
}

fn base_archive(config: &Config, contents: &ContentsInfo, working: &Path) -> Result<ArchiveHandle, Error> {
    let path = naming::base_archive(working, contents);

    if config.reuse_base && path.is_file() {
        match ArchiveHandle::scan(&path) {
            Ok(handle) => {
                info!("Reusing base archive {:?}", path);
                return Ok(handle);
            }
            Err(ArchiveError::MissingTerminator(_)) => warn!("Base archive {:?} is incomplete, rebuilding", path),
            Err(e) => return Err(e.into()),
        }
    }

    info!("Building base archive {:?}", path);
    Ok(build_base(&config.src, &contents.contents, &path, &config.options)?)
}

fn variant(
    config: &Config,
    conf: &Configuration,
    contents: &ContentsInfo,
    base: &ArchiveHandle,
    working: &Path,
) -> Result<PathBuf, Error> {
    let overlay_dir = config.overlay_dir(&conf.name);
    info!("Configuring: {:?}", overlay_dir);

    let overlay = if overlay_dir.exists() {
        ContentsInfo::scan(&overlay_dir, &config.ignore)?
    } else {
        ContentsInfo::empty(&overlay_dir, contents.newest)
    };

    // Overlay files replace base entries of the same name, which a full
    // splice cannot drop
    let keep = if conf.is_filtered() || contents.shadowed_by(&overlay) {
        Some(contents.keep_set(conf, &overlay))
    } else {
        None
    };

    let tar = naming::variant_archive(working, &conf.name, &overlay);
    merge(base, &overlay_dir, &overlay.contents, &tar, keep.as_ref(), &config.options)?;

    let compressed = naming::with_extension(&tar, config.compression.extension());
    compress(&tar, &compressed, config.compression, &config.options.copier)?;
    remove(&tar)?;

    if !config.encrypt {
        info!("Wrote {:?}", compressed);
        return Ok(compressed);
    }

    let sealed = naming::with_extension(&compressed, naming::SEALED_EXT);
    crypto::encrypt_file(&compressed, &sealed, &config.key_file(&conf.name))?;
    remove(&compressed)?;

    info!("Wrote {:?}", sealed);
    Ok(sealed)
}

fn remove(path: &Path) -> Result<(), Error> {
    fs::remove_file(path).map_err(|source| Error::Remove {
        path: path.to_path_buf(),
        source,
    })
}
