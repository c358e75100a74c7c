use std::fs;
use std::path::{Path, PathBuf};

use score::buf::StreamCopier;
use score::crypto;
use score::key::MemKey;

use strand::compile::compile;
use strand::config::Config;
use strand::extract::{extract, fetch};

fn setup(dir: &Path, encrypt: bool) -> PathBuf {
    fs::create_dir_all(dir.join("data/sub")).unwrap();
    fs::write(dir.join("data/a.txt"), b"hello").unwrap();
    fs::write(dir.join("data/sub/b.txt"), b"hey").unwrap();
    fs::write(dir.join("data/notes.bak"), b"old").unwrap();

    // Overlay adds a file and replaces a base one
    fs::create_dir_all(dir.join("configurations/full/sub")).unwrap();
    fs::write(dir.join("configurations/full/d.txt"), b"added").unwrap();
    fs::write(dir.join("configurations/full/sub/b.txt"), b"replaced").unwrap();

    fs::create_dir_all(dir.join("keys")).unwrap();
    for name in ["full", "slim", "plain"] {
        MemKey::new().save(&dir.join("keys").join(name)).unwrap();
    }

    let config = dir.join("strand.toml");
    fs::write(
        &config,
        format!(
            r#"
            src = "data"
            ignore = ["\\.bak$"]
            encrypt = {}

            [[configurations]]
            name = "full"

            [[configurations]]
            name = "slim"
            only = ["^a\\.txt$"]

            [[configurations]]
            name = "plain"
            "#,
            encrypt
        ),
    )
    .unwrap();
    config
}

#[test]
fn compile_then_extract() {
    crypto::init().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&setup(dir.path(), true)).unwrap();

    let outputs = compile(&config).unwrap();
    assert_eq!(outputs.len(), 3);
    for path in outputs.iter() {
        assert!(path.is_file());
        assert!(path.to_string_lossy().ends_with(".tar.gz.enc"));
        assert!(!path.with_extension("").exists());
    }

    let working = config.working_dir();
    let leftovers: Vec<_> = fs::read_dir(&working)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .filter(|n| n.ends_with(".tar") || n.ends_with(".gz"))
        .collect();
    // Only the base archive stays uncompressed
    assert_eq!(leftovers.len(), 1);

    let copier = StreamCopier::default();

    // Overlay wins over the base entry of the same name
    let (full, written) = extract(&outputs[0], &config.key_file("full"), None, &copier).unwrap();
    assert_eq!(written, 3);
    assert_eq!(fs::read(full.join("a.txt")).unwrap(), b"hello");
    assert_eq!(fs::read(full.join("sub/b.txt")).unwrap(), b"replaced");
    assert_eq!(fs::read(full.join("d.txt")).unwrap(), b"added");
    assert!(!full.join("notes.bak").exists());

    let target = dir.path().join("restore-slim");
    let (slim, written) = extract(&outputs[1], &config.key_file("slim"), Some(target.as_path()), &copier).unwrap();
    assert_eq!(slim, target);
    assert_eq!(written, 1);
    assert_eq!(fs::read(slim.join("a.txt")).unwrap(), b"hello");
    assert!(!slim.join("sub").exists());

    // No overlay, no filter: the base archive spliced as is
    let (plain, written) = extract(&outputs[2], &config.key_file("plain"), None, &copier).unwrap();
    assert_eq!(written, 2);
    assert_eq!(fs::read(plain.join("sub/b.txt")).unwrap(), b"hey");

    assert_eq!(fetch(&outputs[0], &config.key_file("full"), "d.txt").unwrap(), b"added");
    assert!(fetch(&outputs[0], &config.key_file("full"), "missing.txt").unwrap().is_empty());

    // Spool files are gone
    let spools = fs::read_dir(dir.path())
        .unwrap()
        .chain(fs::read_dir(&working).unwrap())
        .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with(".strand"))
        .count();
    assert_eq!(spools, 0);
}

#[test]
fn wrong_key_fails_and_cleans_up() {
    crypto::init().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&setup(dir.path(), true)).unwrap();
    let outputs = compile(&config).unwrap();

    let target = dir.path().join("restore");
    assert!(extract(&outputs[0], &config.key_file("slim"), Some(target.as_path()), &StreamCopier::default()).is_err());

    let spools = fs::read_dir(dir.path())
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with(".strand"))
        .count();
    assert_eq!(spools, 0);
}

#[test]
fn unencrypted_outputs_are_plain_gzip_tar() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&setup(dir.path(), false)).unwrap();

    let outputs = compile(&config).unwrap();
    assert!(outputs[1].to_string_lossy().ends_with(".tar.gz"));

    let target = dir.path().join("slim");
    assert_eq!(sarc::extract(&outputs[1], &target, &StreamCopier::default()).unwrap(), 1);
    assert_eq!(fs::read(target.join("a.txt")).unwrap(), b"hello");
}

#[test]
fn reuse_base_rescans_existing_archive() {
    let dir = tempfile::tempdir().unwrap();
    let path = setup(dir.path(), false);
    let raw = fs::read_to_string(&path).unwrap();
    fs::write(&path, format!("reuse_base = true\n{}", raw)).unwrap();
    let config = Config::load(&path).unwrap();

    let first = compile(&config).unwrap();
    let base: Vec<_> = fs::read_dir(config.working_dir())
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == "tar"))
        .collect();
    assert_eq!(base.len(), 1);
    let built = fs::metadata(&base[0]).unwrap().modified().unwrap();

    let second = compile(&config).unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::metadata(&base[0]).unwrap().modified().unwrap(), built);
}

#[test]
fn reuse_base_rebuilds_truncated_archive() {
    let dir = tempfile::tempdir().unwrap();
    let path = setup(dir.path(), false);
    let raw = fs::read_to_string(&path).unwrap();
    fs::write(&path, format!("reuse_base = true\n{}", raw)).unwrap();
    let config = Config::load(&path).unwrap();

    let first = compile(&config).unwrap();
    let base = fs::read_dir(config.working_dir())
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.extension().is_some_and(|e| e == "tar"))
        .unwrap();
    let full = fs::read(&base).unwrap();

    // Cut off the end-of-archive marker as an interrupted build would
    fs::write(&base, &full[..full.len() - 1024]).unwrap();

    let second = compile(&config).unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::read(&base).unwrap(), full);

    let target = dir.path().join("plain");
    assert_eq!(sarc::extract(&second[2], &target, &StreamCopier::default()).unwrap(), 2);
}

#[test]
fn extract_into_missing_parents() {
    crypto::init().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&setup(dir.path(), true)).unwrap();
    let outputs = compile(&config).unwrap();

    let target = dir.path().join("nested/deeper/out");
    let (slim, written) = extract(&outputs[1], &config.key_file("slim"), Some(target.as_path()), &StreamCopier::default()).unwrap();
    assert_eq!(slim, target);
    assert_eq!(written, 1);
    assert_eq!(fs::read(target.join("a.txt")).unwrap(), b"hello");

    let spools = fs::read_dir(dir.path().join("nested/deeper"))
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with(".strand"))
        .count();
    assert_eq!(spools, 0);
}
