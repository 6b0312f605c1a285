//! Content hashes for verified artifacts.
//!
//! Directories use the `h1:` scheme: one `<sha256 hex>  <relative path>\n`
//! line per file, sorted by path, hashed again with SHA-256 and encoded in
//! standard base64. The result only depends on file names and contents.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// `h1:` prefix of directory hashes.
pub const DIR_HASH_PREFIX: &str = "h1:";

/// `sha256:` prefix of file hashes.
pub const FILE_HASH_PREFIX: &str = "sha256:";

/// Hash a directory tree.
///
/// Symlinks are not followed; their target text is hashed instead.
pub fn hash_dir(dir: &Path) -> io::Result<String> {
    let mut entries: Vec<(String, String)> = Vec::new();

    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let digest = if file_type.is_symlink() {
            sha256_bytes(std::fs::read_link(entry.path())?.to_string_lossy().as_bytes())
        } else {
            sha256_reader(File::open(entry.path())?)?
        };
        entries.push((name, digest));
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut summary = Sha256::new();
    for (name, digest) in &entries {
        if name.contains('\n') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("file name contains a newline: {:?}", name),
            ));
        }
        summary.update(format!("{}  {}\n", digest, name).as_bytes());
    }

    Ok(format!("{}{}", DIR_HASH_PREFIX, STANDARD.encode(summary.finalize())))
}

/// `sha256:<hex>` of a regular file.
pub fn hash_file(path: &Path) -> io::Result<String> {
    Ok(format!("{}{}", FILE_HASH_PREFIX, sha256_reader(File::open(path)?)?))
}

/// `sha256:<hex>` of a symlink's target text.
pub fn hash_symlink(path: &Path) -> io::Result<String> {
    let target = std::fs::read_link(path)?;
    Ok(format!(
        "{}{}",
        FILE_HASH_PREFIX,
        sha256_bytes(target.to_string_lossy().as_bytes())
    ))
}

fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn sha256_reader(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        dir
    }

    #[test]
    fn test_hash_dir_is_stable() {
        let a = tree(&[("bin/tool", "binary"), ("README", "docs")]);
        let b = tree(&[("README", "docs"), ("bin/tool", "binary")]);
        let hash_a = hash_dir(a.path()).unwrap();
        assert!(hash_a.starts_with("h1:"));
        assert_eq!(hash_a, hash_dir(a.path()).unwrap());
        assert_eq!(hash_a, hash_dir(b.path()).unwrap());
    }

    #[test]
    fn test_hash_dir_changes_with_content_and_names() {
        let base = hash_dir(tree(&[("a", "1")]).path()).unwrap();
        assert_ne!(base, hash_dir(tree(&[("a", "2")]).path()).unwrap());
        assert_ne!(base, hash_dir(tree(&[("b", "1")]).path()).unwrap());
    }

    #[test]
    fn test_hash_dir_known_value() {
        let dir = tree(&[("a", "")]);
        let empty = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        let expected = STANDARD.encode(Sha256::digest(format!("{}  a\n", empty).as_bytes()));
        assert_eq!(hash_dir(dir.path()).unwrap(), format!("h1:{}", expected));
    }

    #[test]
    fn test_hash_file() {
        let dir = tree(&[("abc", "abc")]);
        assert_eq!(
            hash_file(&dir.path().join("abc")).unwrap(),
            "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(hash_file(&dir.path().join("missing")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_hash_dir_does_not_follow_symlinks() {
        let dir = tree(&[("real", "data")]);
        std::os::unix::fs::symlink("/etc/passwd", dir.path().join("link")).unwrap();
        let hash = hash_dir(dir.path()).unwrap();
        assert!(hash.starts_with("h1:"));
        assert!(hash_symlink(&dir.path().join("link")).unwrap().starts_with("sha256:"));
    }
}
