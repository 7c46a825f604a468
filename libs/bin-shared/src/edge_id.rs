//! Generates a persistent edge id on first run, stores it to disk, and reads
//! it back on every subsequent start so the cloud always sees the same edge.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use rand::Rng as _;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const LEN: usize = 16;

pub fn default_path() -> PathBuf {
    PathBuf::from("/var/lib/arqut/edge_id")
}

/// Reads the edge id from `path`, generating and persisting a new one if the
/// file is missing or unreadable.
pub fn get_or_create(path: &Path) -> Result<String> {
    if let Ok(id) = read(path) {
        return Ok(id);
    }

    let dir = path.parent().context("edge id path should always have a parent")?;
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let id = generate();

    let file = AtomicFile::new(path, OverwriteBehavior::DisallowOverwrite);
    file.write(|f| std::io::Write::write_all(f, id.as_bytes()))
        .context("failed to write edge id file")?;

    set_permissions(path).context("failed to set permissions on edge id file")?;
    tracing::debug!(%id, path = %path.display(), "generated new edge id");

    Ok(id)
}

fn generate() -> String {
    let mut rng = rand::thread_rng();

    (0..LEN)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

fn read(path: &Path) -> Result<String> {
    let content = fs::read_to_string(path).context("failed to read edge id file")?;
    let id = content.trim();

    if id.len() != LEN || !id.bytes().all(|b| b.is_ascii_alphanumeric()) {
        anyhow::bail!("edge id file does not contain a valid {LEN}-character alphanumeric id");
    }

    Ok(id.to_string())
}

#[cfg(target_os = "linux")]
fn set_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o640))?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
#[expect(clippy::unnecessary_wraps)]
fn set_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn creates_id_if_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("edge_id");

        let created = get_or_create(&path).unwrap();
        let read_back = get_or_create(&path).unwrap();

        assert_eq!(created, read_back);
    }

    #[test]
    fn does_not_override_existing_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("edge_id");

        let existing = generate();
        fs::write(&path, &existing).unwrap();

        let read_back = get_or_create(&path).unwrap();

        assert_eq!(read_back, existing);
    }

    #[test]
    fn rejects_malformed_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("edge_id");
        fs::write(&path, "not a uuid").unwrap();

        let result = get_or_create(&path);

        assert!(result.is_err());
    }
}
