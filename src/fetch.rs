//! Provisioning-time download of the model artifact.
//!
//! Never called from a request handler: the server only reads the file that
//! this step (or any other deployment tooling) left on disk.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

#[derive(Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    AlreadyPresent,
    Downloaded { bytes: u64 },
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Download `url` to `dest` unless it already exists.
///
/// The body is streamed to a sibling `.part` file and renamed into place, so
/// a server started mid-download never sees a truncated artifact.
pub fn fetch_model(url: &str, dest: &Path, force: bool) -> Result<FetchOutcome> {
    if dest.is_file() && !force {
        info!(path = %dest.display(), "model already present, skipping download");
        return Ok(FetchOutcome::AlreadyPresent);
    }
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    info!(%url, path = %dest.display(), "downloading model");
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("requesting {url}"))?;

    let bytes = save_body(&mut response.into_reader(), dest)?;

    info!(path = %dest.display(), bytes, "model saved");
    Ok(FetchOutcome::Downloaded { bytes })
}

/// Stream `body` into `dest` through its `.part` sibling, which is removed
/// again if anything fails.
fn save_body(body: &mut impl Read, dest: &Path) -> Result<u64> {
    let tmp = partial_path(dest);
    write_then_rename(body, &tmp, dest).inspect_err(|_| {
        if let Err(e) = fs::remove_file(&tmp) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %tmp.display(), error = %e, "could not remove partial download");
            }
        }
    })
}

fn write_then_rename(body: &mut impl Read, tmp: &Path, dest: &Path) -> Result<u64> {
    let mut file = File::create(tmp).with_context(|| format!("creating {}", tmp.display()))?;
    let bytes = io::copy(body, &mut file).with_context(|| format!("writing {}", tmp.display()))?;
    file.sync_all().with_context(|| format!("syncing {}", tmp.display()))?;
    drop(file);
    fs::rename(tmp, dest).with_context(|| format!("moving model into {}", dest.display()))?;
    Ok(bytes)
}
