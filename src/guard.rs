//! Immutable-attribute toggling for the resolver file.
//!
//! Between transitions `/etc/resolv.conf` carries the filesystem immutable
//! flag (what `chattr +i` sets) so DHCP clients and network managers cannot
//! overwrite it. It is cleared right before every write and set again only
//! after a successful one.

use std::path::Path;

/// Result of trying to protect a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// The immutable flag is now set.
    Locked,
    /// The filesystem has no immutable flag. Not a failure.
    Unsupported,
}

/// Filesystem immutability toggle.
pub trait FileAttributes {
    /// Sets the immutable flag on `path`.
    ///
    /// # Errors
    ///
    /// Returns the OS error for failures other than "not supported".
    fn lock(&self, path: &Path) -> std::io::Result<LockOutcome>;

    /// Clears the immutable flag on `path`. Clearing an already clear flag
    /// succeeds.
    ///
    /// # Errors
    ///
    /// Returns the OS error. Callers treat this as best-effort.
    fn unlock(&self, path: &Path) -> std::io::Result<()>;
}

/// Toggles `FS_IMMUTABLE_FL` through the `FS_IOC_{GET,SET}FLAGS` ioctls.
///
/// Requires `CAP_LINUX_IMMUTABLE`. On non-Linux targets `lock` always
/// reports [`LockOutcome::Unsupported`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IoctlAttributes;

impl FileAttributes for IoctlAttributes {
    fn lock(&self, path: &Path) -> std::io::Result<LockOutcome> {
        match sys::set_immutable(path, true) {
            Ok(()) => Ok(LockOutcome::Locked),
            Err(e) if sys::is_unsupported(&e) => Ok(LockOutcome::Unsupported),
            Err(e) => Err(e),
        }
    }

    fn unlock(&self, path: &Path) -> std::io::Result<()> {
        match sys::set_immutable(path, false) {
            Err(e) if sys::is_unsupported(&e) => Ok(()),
            other => other,
        }
    }
}

#[cfg(target_os = "linux")]
mod sys {
    use std::os::fd::AsRawFd;
    use std::path::Path;

    // _IOR('f', 1, long) / _IOW('f', 2, long)
    #[cfg(target_pointer_width = "64")]
    const FS_IOC_GETFLAGS: libc::c_ulong = 0x8008_6601;
    #[cfg(target_pointer_width = "64")]
    const FS_IOC_SETFLAGS: libc::c_ulong = 0x4008_6602;
    #[cfg(target_pointer_width = "32")]
    const FS_IOC_GETFLAGS: libc::c_ulong = 0x8004_6601;
    #[cfg(target_pointer_width = "32")]
    const FS_IOC_SETFLAGS: libc::c_ulong = 0x4004_6602;

    const FS_IMMUTABLE_FL: libc::c_int = 0x0000_0010;

    pub fn set_immutable(path: &Path, immutable: bool) -> std::io::Result<()> {
        let file = std::fs::File::open(path)?;
        let fd = file.as_raw_fd();

        let mut flags: libc::c_int = 0;
        // SAFETY: `fd` is open for the lifetime of `file` and `flags` is a
        // valid out-pointer of the size the kernel writes for this request.
        if unsafe { libc::ioctl(fd, FS_IOC_GETFLAGS as _, &mut flags as *mut libc::c_int) } < 0 {
            return Err(std::io::Error::last_os_error());
        }

        let wanted = if immutable {
            flags | FS_IMMUTABLE_FL
        } else {
            flags & !FS_IMMUTABLE_FL
        };
        if wanted == flags {
            return Ok(());
        }

        // SAFETY: as above; the kernel only reads `wanted`.
        if unsafe { libc::ioctl(fd, FS_IOC_SETFLAGS as _, &wanted as *const libc::c_int) } < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn is_unsupported(e: &std::io::Error) -> bool {
        matches!(
            e.raw_os_error(),
            Some(libc::ENOTTY | libc::EOPNOTSUPP | libc::ENOSYS | libc::EINVAL)
        )
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use std::path::Path;

    pub fn set_immutable(_path: &Path, _immutable: bool) -> std::io::Result<()> {
        Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
    }

    pub fn is_unsupported(e: &std::io::Error) -> bool {
        e.kind() == std::io::ErrorKind::Unsupported
    }
}
