use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::LocalStream;

/// Default permission mode for created socket paths.
pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

/// `sockaddr_un.sun_path` is 108 bytes on Linux, 104 on macOS and the BSDs.
#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_PATH_LEN: usize = 104;

fn bind_error(path: &Path, source: std::io::Error) -> TransportError {
    TransportError::Bind {
        path: path.to_path_buf(),
        source,
    }
}

/// Check the path length and remove a stale socket left at `path`.
///
/// Anything at `path` that is not a socket is left alone and reported.
pub(crate) fn prepare_path(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len >= MAX_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len,
            max: MAX_PATH_LEN,
        });
    }

    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_socket() => {
            debug!(?path, "removing stale socket");
            std::fs::remove_file(path).map_err(|e| bind_error(path, e))
        }
        Ok(_) => Err(bind_error(
            path,
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "existing path is not a unix socket",
            ),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(bind_error(path, e)),
    }
}

/// A socket file created by this process, removed again on drop.
///
/// Removal is skipped when the path no longer refers to the file that was
/// created (another process rebound it).
#[derive(Debug)]
pub(crate) struct BoundPath {
    path: PathBuf,
    identity: (u64, u64),
}

impl BoundPath {
    pub(crate) fn claim(path: PathBuf, mode: u32) -> Result<Self> {
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| bind_error(&path, e))?;
        let metadata = std::fs::symlink_metadata(&path).map_err(|e| bind_error(&path, e))?;
        Ok(Self {
            identity: (metadata.dev(), metadata.ino()),
            path,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BoundPath {
    fn drop(&mut self) {
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket() && (metadata.dev(), metadata.ino()) == self.identity
            {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
            }
        }
    }
}

/// A listening filesystem-path Unix domain socket.
#[derive(Debug)]
pub struct LocalListener {
    listener: UnixListener,
    bound: BoundPath,
}

impl LocalListener {
    /// Bind with [`DEFAULT_SOCKET_MODE`].
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen, then restrict the socket file to `mode`.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        prepare_path(&path)?;
        let listener = UnixListener::bind(&path).map_err(|e| bind_error(&path, e))?;
        let bound = BoundPath::claim(path, mode)?;
        info!(path = ?bound.path(), "listening on local socket");
        Ok(Self { listener, bound })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<LocalStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!("accepted connection");
        Ok(LocalStream::from_unix(stream))
    }

    /// Connect to a listening socket at `path`.
    pub fn connect(path: impl AsRef<Path>) -> Result<LocalStream> {
        LocalStream::connect(path)
    }

    /// Switch accept between blocking and non-blocking.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.listener.set_nonblocking(nonblocking).map_err(Into::into)
    }

    pub fn path(&self) -> &Path {
        self.bound.path()
    }
}
