//! Package resolution: local override or latest release asset.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{info, instrument};

use crate::board::{BOARD_TOKEN, Board, UpdateMethod};
use crate::error::UpdateError;
use crate::registry::{Release, ReleaseAsset, ReleaseRegistry};

/// A firmware package on local disk.
///
/// When the resolver downloaded the package, the handle owns the temporary
/// directory holding it; dropping the handle deletes that directory exactly
/// once, on every exit path. A user-supplied path is never owned and never
/// deleted.
#[derive(Debug)]
pub struct PackageHandle {
    path: PathBuf,
    temp: Option<TempDir>,
}

impl PackageHandle {
    /// Wrap a user-supplied path. The caller keeps ownership of the file.
    pub fn external(path: PathBuf) -> Self {
        Self { path, temp: None }
    }

    fn downloaded(path: PathBuf, temp: TempDir) -> Self {
        Self {
            path,
            temp: Some(temp),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this session is responsible for deleting the package.
    pub fn is_owned(&self) -> bool {
        self.temp.is_some()
    }

    /// File name of the package, for console output and copy destinations.
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("package")
    }
}

/// Resolves which package to flash for a (board, method) pair.
pub struct PackageResolver<'a> {
    registry: &'a dyn ReleaseRegistry,
}

impl<'a> PackageResolver<'a> {
    pub fn new(registry: &'a dyn ReleaseRegistry) -> Self {
        Self { registry }
    }

    /// Obtain the package: a local override verbatim, or the first matching
    /// asset of the latest release downloaded into a fresh temp directory.
    ///
    /// An explicit override is trusted: its suffix is not validated against
    /// the method and no network request is made.
    #[instrument(skip(self), fields(board = %board, method = %method))]
    pub fn resolve(
        &self,
        board: Board,
        method: UpdateMethod,
        local_override: Option<&Path>,
    ) -> Result<(PackageHandle, Option<String>), UpdateError> {
        if let Some(path) = local_override {
            if !path.exists() {
                return Err(UpdateError::PackageNotFound {
                    path: path.to_path_buf(),
                });
            }
            info!(path = %path.display(), "Using local package");
            return Ok((PackageHandle::external(path.to_path_buf()), None));
        }

        let release = self.registry.latest()?;
        info!(tag = %release.tag, "Latest bootloader release");

        let asset = select_asset(&release, board, method)?;
        let temp = TempDir::with_prefix("blup-").map_err(|source| UpdateError::Download {
            name: asset.name.clone(),
            source,
        })?;
        let dest = temp.path().join(&asset.name);
        self.registry.download(asset, &dest)?;

        Ok((
            PackageHandle::downloaded(dest, temp),
            Some(release.tag.clone()),
        ))
    }
}

/// First asset whose name contains the board fragment and ends with the
/// method suffix, scanning in listed order.
fn select_asset(
    release: &Release,
    board: Board,
    method: UpdateMethod,
) -> Result<&ReleaseAsset, UpdateError> {
    let fragment = board.asset_fragment();
    let suffix = method.asset_suffix();

    if let Some(asset) = release
        .assets
        .iter()
        .find(|a| a.name.contains(fragment) && a.name.ends_with(suffix))
    {
        return Ok(asset);
    }

    // Surface board-family assets so a naming drift is self-diagnosable.
    let near_misses = release
        .assets
        .iter()
        .filter(|a| a.name.to_lowercase().contains(BOARD_TOKEN))
        .map(|a| a.name.clone())
        .collect();

    Err(UpdateError::NoMatchingAsset {
        tag: release.tag.clone(),
        fragment: fragment.to_string(),
        suffix: suffix.to_string(),
        near_misses,
    })
}
