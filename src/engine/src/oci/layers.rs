//! Layer application.
//!
//! Unpacks image layers (gzip or plain tar) on top of each other into one
//! root filesystem, honouring whiteout entries.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use addontrace_core::error::{DiscoverError, Result};
use flate2::read::GzDecoder;
use tar::{Archive, EntryType};

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Apply every layer in order (bottom to top) onto `target_dir`.
pub fn flatten(layer_paths: &[PathBuf], target_dir: &Path) -> Result<()> {
    for layer in layer_paths {
        apply_layer(layer, target_dir)?;
    }
    tracing::debug!(
        layers = layer_paths.len(),
        target = %target_dir.display(),
        "Flattened image layers"
    );
    Ok(())
}

/// Unpack one layer tarball onto `target_dir`.
///
/// `.wh.<name>` entries delete `<name>` from the lower layers and
/// `.wh..wh..opq` empties its directory. Entries that cannot be created
/// (device nodes without privileges) are skipped.
pub fn apply_layer(layer_path: &Path, target_dir: &Path) -> Result<()> {
    let file = File::open(layer_path).map_err(|e| {
        DiscoverError::ImageError(format!(
            "Failed to open layer {}: {}",
            layer_path.display(),
            e
        ))
    })?;

    fs::create_dir_all(target_dir).map_err(|e| {
        DiscoverError::ImageError(format!(
            "Failed to create target directory {}: {}",
            target_dir.display(),
            e
        ))
    })?;

    let mut reader = BufReader::new(file);
    let is_gzip = reader
        .fill_buf()
        .map(|head| head.starts_with(&GZIP_MAGIC))
        .unwrap_or(false);
    let stream: Box<dyn Read> = if is_gzip {
        Box::new(GzDecoder::new(reader))
    } else {
        Box::new(reader)
    };

    let mut archive = Archive::new(stream);

    let entries = archive.entries().map_err(|e| layer_error(layer_path, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| layer_error(layer_path, e))?;
        let relative = entry
            .path()
            .map_err(|e| layer_error(layer_path, e))?
            .into_owned();
        let Some(relative) = sanitize(&relative) else {
            tracing::debug!(entry = %relative.display(), "Skipped entry escaping the layer root");
            continue;
        };

        if has_symlink_parent(target_dir, &relative) {
            // Writing through a lower-layer symlink could leave the rootfs.
            tracing::debug!(entry = %relative.display(), "Skipped entry below a symlink");
            continue;
        }

        let name = relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parent = target_dir.join(relative.parent().unwrap_or(Path::new("")));

        if name == OPAQUE_WHITEOUT {
            clear_dir(&parent);
            continue;
        }
        if let Some(hidden) = name.strip_prefix(WHITEOUT_PREFIX) {
            remove_path(&parent.join(hidden));
            continue;
        }

        let destination = target_dir.join(&relative);
        if entry.header().entry_type() != EntryType::Directory {
            // A lower layer may hold a symlink or directory at this path.
            remove_path(&destination);
        }

        if let Err(e) = entry.unpack_in(target_dir) {
            tracing::debug!(
                entry = %relative.display(),
                error = %e,
                "Skipped layer entry"
            );
        }
    }

    tracing::debug!(
        layer = %layer_path.display(),
        target = %target_dir.display(),
        gzip = is_gzip,
        "Applied layer"
    );
    Ok(())
}

fn layer_error(layer_path: &Path, e: std::io::Error) -> DiscoverError {
    DiscoverError::ImageError(format!(
        "Failed to read layer {}: {}",
        layer_path.display(),
        e
    ))
}

/// Strip `./` and leading `/`; reject paths climbing out with `..`.
fn sanitize(path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => return None,
        }
    }
    (!clean.as_os_str().is_empty()).then_some(clean)
}

fn has_symlink_parent(root: &Path, relative: &Path) -> bool {
    let mut current = root.to_path_buf();
    let Some(parent) = relative.parent() else {
        return false;
    };
    parent.components().any(|component| {
        current.push(component);
        fs::symlink_metadata(&current)
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false)
    })
}

fn remove_path(path: &Path) {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            let _ = fs::remove_dir_all(path);
        }
        Ok(_) => {
            let _ = fs::remove_file(path);
        }
        Err(_) => {}
    }
}

fn clear_dir(dir: &Path) {
    let Ok(children) = fs::read_dir(dir) else {
        return;
    };
    for child in children.flatten() {
        remove_path(&child.path());
    }
}
