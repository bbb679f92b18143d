//! Artifact persister - raw cache files and the operator-defined bundle

use std::fs::{self, DirBuilder, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use thiserror::Error;

use nix::unistd::{Gid, Group, Uid, User};

use certkeeper_core::IssuedBundle;

use crate::cache::{Artifact, CredentialCache};
use crate::config::{CertDescriptor, OutputItem, UnknownOutputItem};
use crate::defaults::RAW_ARTIFACT_DIR_MODE;

/// Errors that can occur persisting issued material
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{0}")]
    UnknownItem(#[from] UnknownOutputItem),

    #[error("Failed to look up user '{0}': {1}")]
    UserLookup(String, String),

    #[error("Failed to look up group '{0}': {1}")]
    GroupLookup(String, String),

    #[error("Failed to change ownership of {} to {uid}:{gid}: {source}", path.display())]
    Chown {
        path: PathBuf,
        uid: u32,
        gid: u32,
        source: std::io::Error,
    },
}

/// Writes issued bundles to the cache and the configured output file
#[derive(Debug, Clone)]
pub struct ArtifactPersister {
    cache: CredentialCache,
}

impl ArtifactPersister {
    pub fn new(cache: CredentialCache) -> Self {
        Self { cache }
    }

    /// Persist `bundle` for `descriptor`, returning the output file path.
    ///
    /// Raw artifacts go first; the first failed write stops the rest and
    /// nothing already written is rolled back.
    pub fn persist(
        &self,
        descriptor: &CertDescriptor,
        bundle: &IssuedBundle,
    ) -> Result<PathBuf, PersistError> {
        self.write_raw_artifacts(&descriptor.common_name, bundle)?;

        let content = build_bundle_content(&descriptor.output.items, bundle)?;
        let output = descriptor.output_path();
        let perm = descriptor.output.file.perm;

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir(parent, perm)?;
        }
        write_file(output, content.as_bytes(), perm)?;

        let (uid, gid) = resolve_owner(&descriptor.user, &descriptor.group)?;
        let (uid, gid) = (uid.as_raw(), gid.as_raw());
        std::os::unix::fs::chown(output, Some(uid), Some(gid)).map_err(|source| {
            PersistError::Chown {
                path: output.to_path_buf(),
                uid,
                gid,
                source,
            }
        })?;

        tracing::info!(
            common_name = %descriptor.common_name,
            output = %output.display(),
            "Certificate bundle written"
        );
        Ok(output.to_path_buf())
    }

    fn write_raw_artifacts(
        &self,
        common_name: &str,
        bundle: &IssuedBundle,
    ) -> Result<(), PersistError> {
        create_dir(&self.cache.identity_dir(common_name), RAW_ARTIFACT_DIR_MODE)?;

        for artifact in Artifact::ALL {
            let path = self.cache.artifact_path(common_name, artifact);
            write_file(&path, artifact.select(bundle).as_bytes(), artifact.mode())?;
        }

        tracing::debug!(
            common_name = %common_name,
            dir = %self.cache.identity_dir(common_name).display(),
            "Raw artifacts cached"
        );
        Ok(())
    }
}

/// Concatenate the selected items, each followed by a newline. Empty items
/// are left out.
pub fn build_bundle_content(
    items: &[String],
    bundle: &IssuedBundle,
) -> Result<String, PersistError> {
    let mut content = String::new();
    for name in items {
        let item: OutputItem = name.parse()?;
        let pem = item.select(bundle);
        if !pem.is_empty() {
            content.push_str(pem);
            content.push('\n');
        }
    }
    Ok(content)
}

fn create_dir(path: &Path, mode: u32) -> Result<(), PersistError> {
    DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(path)
        .map_err(|source| PersistError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Write `content` and leave the file with exactly `mode`, whatever the umask
/// or the previous mode of an existing file.
fn write_file(path: &Path, content: &[u8], mode: u32) -> Result<(), PersistError> {
    let io_err = |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
        .map_err(io_err)?;
    // An existing file keeps its old mode on open; tighten it before any content lands.
    file.set_permissions(fs::Permissions::from_mode(mode)).map_err(io_err)?;
    file.write_all(content).map_err(io_err)?;
    Ok(())
}

/// Numeric owner for the output file. Empty names fall back to the current
/// process user and group.
fn resolve_owner(user: &str, group: &str) -> Result<(Uid, Gid), PersistError> {
    let uid = if user.is_empty() {
        nix::unistd::getuid()
    } else {
        match User::from_name(user) {
            Ok(Some(u)) => u.uid,
            Ok(None) => {
                return Err(PersistError::UserLookup(
                    user.to_string(),
                    "no such user".to_string(),
                ));
            }
            Err(e) => return Err(PersistError::UserLookup(user.to_string(), e.to_string())),
        }
    };

    let gid = if group.is_empty() {
        nix::unistd::getgid()
    } else {
        match Group::from_name(group) {
            Ok(Some(g)) => g.gid,
            Ok(None) => {
                return Err(PersistError::GroupLookup(
                    group.to_string(),
                    "no such group".to_string(),
                ));
            }
            Err(e) => return Err(PersistError::GroupLookup(group.to_string(), e.to_string())),
        }
    };

    Ok((uid, gid))
}
