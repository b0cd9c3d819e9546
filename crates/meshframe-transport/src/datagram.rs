use std::os::unix::net::UnixDatagram;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::listener::{prepare_path, BoundPath, DEFAULT_SOCKET_MODE};

/// A local datagram socket: one envelope per datagram, boundaries preserved.
#[derive(Debug)]
pub struct LocalDatagram {
    inner: UnixDatagram,
    bound: Option<BoundPath>,
}

impl LocalDatagram {
    /// Bind to a filesystem path with [`DEFAULT_SOCKET_MODE`].
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        prepare_path(&path)?;
        let inner = UnixDatagram::bind(&path).map_err(|e| TransportError::Bind {
            path: path.clone(),
            source: e,
        })?;
        let bound = BoundPath::claim(path, DEFAULT_SOCKET_MODE)?;
        info!(path = ?bound.path(), "bound local datagram socket");
        Ok(Self {
            inner,
            bound: Some(bound),
        })
    }

    /// An unbound socket, usable for sending only after [`connect`](Self::connect).
    pub fn unbound() -> Result<Self> {
        Ok(Self {
            inner: UnixDatagram::unbound()?,
            bound: None,
        })
    }

    /// An unnamed pair of connected datagram sockets.
    pub fn pair() -> Result<(Self, Self)> {
        let (a, b) = UnixDatagram::pair()?;
        Ok((
            Self {
                inner: a,
                bound: None,
            },
            Self {
                inner: b,
                bound: None,
            },
        ))
    }

    /// Set the default destination for [`send`](Self::send).
    pub fn connect(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.inner
            .connect(path)
            .map_err(|e| TransportError::Connect {
                path: path.to_path_buf(),
                source: e,
            })?;
        debug!(?path, "datagram socket connected");
        Ok(())
    }

    /// Send one datagram. A short send is reported as an I/O error.
    pub fn send(&self, datagram: &[u8]) -> Result<()> {
        let sent = self.inner.send(datagram)?;
        if sent != datagram.len() {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("short datagram send: {sent} of {} bytes", datagram.len()),
            )));
        }
        Ok(())
    }

    /// Receive one datagram into `buf`.
    ///
    /// Fails with [`TransportError::Truncated`] when the datagram was larger
    /// than `buf`.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let received = self.recv_reporting_size(buf)?;
        if received > buf.len() {
            return Err(TransportError::Truncated {
                received,
                capacity: buf.len(),
            });
        }
        Ok(received)
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_read_timeout(timeout).map_err(Into::into)
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_write_timeout(timeout).map_err(Into::into)
    }

    pub fn path(&self) -> Option<&Path> {
        self.bound.as_ref().map(BoundPath::path)
    }

    /// Receive, returning the full datagram size even when it was cut.
    #[cfg(target_os = "linux")]
    fn recv_reporting_size(&self, buf: &mut [u8]) -> Result<usize> {
        use std::os::fd::AsRawFd;

        // SAFETY: `buf` is a valid writable region of `buf.len()` bytes and the
        // descriptor is an open datagram socket owned by `self`.
        let rc = unsafe {
            libc::recv(
                self.inner.as_raw_fd(),
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len(),
                libc::MSG_TRUNC,
            )
        };
        if rc < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(rc as usize)
    }

    /// Datagrams that fill `buf` exactly are treated as truncated.
    #[cfg(not(target_os = "linux"))]
    fn recv_reporting_size(&self, buf: &mut [u8]) -> Result<usize> {
        let received = self.inner.recv(buf)?;
        if received == buf.len() && !buf.is_empty() {
            return Ok(received + 1);
        }
        Ok(received)
    }
}
