//! Direct system call wrappers for stack regions
//!
//! # Safety
//!
//! All functions in this module perform FFI calls to OS primitives:
//! - **Unix**: libc functions (mmap, mprotect, munmap)
//! - **Windows**: `WinAPI` functions (`VirtualAlloc`, `VirtualProtect`, `VirtualFree`)
//!
//! Other platforms report `ErrorKind::Unsupported`; there is no heap fallback
//! because a heap block cannot carry a guard page.

use std::io;
use std::ptr::NonNull;

/// Memory protection flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryProtection {
    /// No access
    None,
    /// Read and write access
    ReadWrite,
}

impl MemoryProtection {
    #[cfg(unix)]
    fn to_unix_flags(self) -> libc::c_int {
        match self {
            Self::None => libc::PROT_NONE,
            Self::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        }
    }

    #[cfg(windows)]
    fn to_windows_flags(self) -> u32 {
        use winapi::um::winnt::{PAGE_NOACCESS, PAGE_READWRITE};

        match self {
            Self::None => PAGE_NOACCESS,
            Self::ReadWrite => PAGE_READWRITE,
        }
    }
}

/// `MAP_STACK` where the platform defines it (mandatory for stacks on OpenBSD)
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd", target_os = "openbsd"))]
const STACK_MAP_FLAGS: libc::c_int = libc::MAP_STACK;
#[cfg(all(
    unix,
    not(any(target_os = "linux", target_os = "android", target_os = "freebsd", target_os = "openbsd"))
))]
const STACK_MAP_FLAGS: libc::c_int = 0;

/// Map a private, anonymous, zero-filled read/write region for use as a stack
///
/// Anonymous private mappings are never shared with other processes and do
/// not survive `exec`.
pub fn memory_map_stack(size: usize) -> io::Result<NonNull<u8>> {
    if size == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "cannot map an empty stack region",
        ));
    }

    #[cfg(unix)]
    {
        let prot = MemoryProtection::ReadWrite.to_unix_flags();
        let flags = libc::MAP_PRIVATE | libc::MAP_ANON | STACK_MAP_FLAGS;

        // SAFETY: FFI call to libc mmap with a null hint, no file descriptor and
        // a zero offset. The OS validates everything else and returns MAP_FAILED
        // on error.
        let ptr = unsafe { libc::mmap(std::ptr::null_mut(), size, prot, flags, -1, 0) };

        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned null"))
    }

    #[cfg(windows)]
    {
        use winapi::um::memoryapi::VirtualAlloc;
        use winapi::um::winnt::{MEM_COMMIT, MEM_RESERVE};

        // SAFETY: FFI call to VirtualAlloc with a null address (OS chooses) and
        // safe flag constants. Returns null on error.
        let ptr = unsafe {
            VirtualAlloc(
                std::ptr::null_mut(),
                size,
                MEM_COMMIT | MEM_RESERVE,
                MemoryProtection::ReadWrite.to_windows_flags(),
            )
        };

        NonNull::new(ptr.cast::<u8>()).ok_or_else(io::Error::last_os_error)
    }

    #[cfg(not(any(unix, windows)))]
    {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "guarded stacks are not supported on this platform",
        ))
    }
}

/// Change memory protection
///
/// # Safety
///
/// - `addr` must be page-aligned
/// - `[addr, addr + size)` must lie inside a live mapping
/// - No Rust references may point into the range when removing access
pub unsafe fn memory_protect(
    addr: NonNull<u8>,
    size: usize,
    protection: MemoryProtection,
) -> io::Result<()> {
    #[cfg(unix)]
    {
        // SAFETY: caller guarantees the range is a live, page-aligned mapping.
        let result = unsafe {
            libc::mprotect(addr.as_ptr().cast::<libc::c_void>(), size, protection.to_unix_flags())
        };
        if result == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    #[cfg(windows)]
    {
        use winapi::um::memoryapi::VirtualProtect;

        let mut old_protect = 0;

        // SAFETY: caller guarantees the range is a live mapping; old_protect
        // receives the previous protection value.
        let result = unsafe {
            VirtualProtect(
                addr.as_ptr().cast::<winapi::ctypes::c_void>(),
                size,
                protection.to_windows_flags(),
                &raw mut old_protect,
            )
        };

        if result == 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = (addr, size, protection);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "memory protection not supported on this platform",
        ))
    }
}

/// Unmap a region returned by [`memory_map_stack`]
///
/// # Safety
///
/// - `addr`/`size` must match a single `memory_map_stack` call exactly
/// - The region must not be accessed after this call
/// - Must not be called more than once for the same region
pub unsafe fn memory_unmap(addr: NonNull<u8>, size: usize) -> io::Result<()> {
    #[cfg(unix)]
    {
        // SAFETY: caller guarantees addr/size came from mmap.
        let result = unsafe { libc::munmap(addr.as_ptr().cast::<libc::c_void>(), size) };
        if result == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    #[cfg(windows)]
    {
        use winapi::um::memoryapi::VirtualFree;
        use winapi::um::winnt::MEM_RELEASE;

        // MEM_RELEASE requires a zero size and releases the whole reservation.
        let _ = size;

        // SAFETY: caller guarantees addr is the base returned by VirtualAlloc.
        let result =
            unsafe { VirtualFree(addr.as_ptr().cast::<winapi::ctypes::c_void>(), 0, MEM_RELEASE) };
        if result == 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = (addr, size);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "memory unmapping not supported on this platform",
        ))
    }
}
