//! Platform queries used to size and inspect stacks
//!
//! - Unix: `sysconf(_SC_PAGESIZE)`, `getrlimit(RLIMIT_STACK)`, `/proc/self/maps`
//! - Windows: `GetSystemInfo`, `VirtualQuery`

use std::io;

/// Protection of the mapping that contains a queried address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageProtection {
    /// Start of the mapping (or of the uniformly protected run on Windows)
    pub start: usize,
    /// One past the end of the mapping
    pub end: usize,
    /// Whether the page is readable
    pub read: bool,
    /// Whether the page is writable
    pub write: bool,
    /// Whether the page is executable
    pub execute: bool,
}

impl PageProtection {
    /// No read, write or execute rights
    #[must_use]
    pub fn is_inaccessible(&self) -> bool {
        !(self.read || self.write || self.execute)
    }
}

#[cfg_attr(windows, allow(dead_code))]
const FALLBACK_PAGE_SIZE: usize = 4096;

/// Get page size using platform-specific syscalls
///
/// Falls back to 4 KiB (with a warning) when the OS does not report one.
pub fn page_size() -> usize {
    #[cfg(unix)]
    {
        // SAFETY: FFI call to libc::sysconf with a valid parameter; returns the
        // page size or -1 on error.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        page_size_or_fallback(usize::try_from(size).ok().filter(|&size| size > 0))
    }

    #[cfg(windows)]
    {
        use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};

        // SAFETY: SYSTEM_INFO is plain data, zeroed is a valid initial state and
        // GetSystemInfo fills every field.
        unsafe {
            let mut info: SYSTEM_INFO = std::mem::zeroed();
            GetSystemInfo(&raw mut info);
            info.dwPageSize as usize
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        page_size_or_fallback(None)
    }
}

#[cfg_attr(windows, allow(dead_code))]
fn page_size_or_fallback(reported: Option<usize>) -> usize {
    reported.unwrap_or_else(|| {
        tracing::warn!(
            fallback = FALLBACK_PAGE_SIZE,
            "OS did not report a page size; assuming the fallback"
        );
        FALLBACK_PAGE_SIZE
    })
}

/// Hard limit on a thread stack, `None` when the platform reports no limit
pub fn stack_limit() -> Option<usize> {
    #[cfg(unix)]
    {
        // SAFETY: rlimit is plain data; getrlimit fills it on success.
        let mut limit = unsafe { std::mem::zeroed::<libc::rlimit>() };
        // SAFETY: valid resource constant and a pointer to a live rlimit.
        let result = unsafe { libc::getrlimit(libc::RLIMIT_STACK, &raw mut limit) };

        if result != 0 || limit.rlim_max == libc::RLIM_INFINITY {
            None
        } else {
            usize::try_from(limit.rlim_max).ok()
        }
    }

    #[cfg(not(unix))]
    {
        None
    }
}

/// Look up the protection of the mapping containing `addr`
///
/// Reads `/proc/self/maps` on Linux and calls `VirtualQuery` on Windows.
pub fn query_protection(addr: usize) -> io::Result<PageProtection> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        let maps = std::fs::read_to_string("/proc/self/maps")?;
        maps.lines()
            .find_map(|line| parse_maps_line(line).filter(|p| p.start <= addr && addr < p.end))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no mapping contains {addr:#x}"),
                )
            })
    }

    #[cfg(windows)]
    {
        use winapi::um::memoryapi::VirtualQuery;
        use winapi::um::winnt::{
            MEM_COMMIT, MEMORY_BASIC_INFORMATION, PAGE_EXECUTE, PAGE_EXECUTE_READ,
            PAGE_EXECUTE_READWRITE, PAGE_READONLY, PAGE_READWRITE,
        };

        // SAFETY: MEMORY_BASIC_INFORMATION is plain data; VirtualQuery accepts
        // any address and reports failure through its return value.
        let info = unsafe {
            let mut info: MEMORY_BASIC_INFORMATION = std::mem::zeroed();
            let written = VirtualQuery(
                addr as *const winapi::ctypes::c_void,
                &raw mut info,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            );
            if written == 0 {
                return Err(io::Error::last_os_error());
            }
            info
        };

        if info.State != MEM_COMMIT {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no committed mapping contains {addr:#x}"),
            ));
        }

        let protect = info.Protect;
        let start = info.BaseAddress as usize;
        Ok(PageProtection {
            start,
            end: start + info.RegionSize,
            read: protect
                & (PAGE_READONLY | PAGE_READWRITE | PAGE_EXECUTE_READ | PAGE_EXECUTE_READWRITE)
                != 0,
            write: protect & (PAGE_READWRITE | PAGE_EXECUTE_READWRITE) != 0,
            execute: protect & (PAGE_EXECUTE | PAGE_EXECUTE_READ | PAGE_EXECUTE_READWRITE) != 0,
        })
    }

    #[cfg(not(any(target_os = "linux", target_os = "android", windows)))]
    {
        let _ = addr;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "protection query not supported on this platform",
        ))
    }
}

/// Parse one `/proc/<pid>/maps` line: `start-end perms offset dev inode [path]`
#[cfg_attr(not(any(target_os = "linux", target_os = "android")), allow(dead_code))]
fn parse_maps_line(line: &str) -> Option<PageProtection> {
    let mut parts = line.split_whitespace();
    let (start, end) = parts.next()?.split_once('-')?;
    let perms = parts.next()?.as_bytes();
    if perms.len() < 3 {
        return None;
    }

    Some(PageProtection {
        start: usize::from_str_radix(start, 16).ok()?,
        end: usize::from_str_radix(end, 16).ok()?,
        read: perms[0] == b'r',
        write: perms[1] == b'w',
        execute: perms[2] == b'x',
    })
}
