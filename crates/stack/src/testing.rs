//! In-memory [`VirtualMemory`] backend for unit tests
//!
//! Hands out synthetic, never-dereferenced addresses and records every call so
//! tests can assert on page arithmetic and guard placement without touching
//! real OS memory.

use std::collections::BTreeMap;
use std::io;
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::sys::VirtualMemory;

const FAKE_BASE: usize = 0x1000_0000;
const FAKE_GAP: usize = 0x1_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FakeRegion {
    pub size: usize,
    pub guard: Option<(usize, usize)>,
}

#[derive(Debug)]
struct FakeState {
    next: usize,
    live: BTreeMap<usize, FakeRegion>,
    reserve_calls: usize,
    release_calls: usize,
}

#[derive(Debug)]
pub(crate) struct FakeMemory {
    state: Mutex<FakeState>,
    fail_reserve: bool,
    fail_protect: bool,
    fail_release: bool,
}

impl Default for FakeMemory {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next: FAKE_BASE,
                live: BTreeMap::new(),
                reserve_calls: 0,
                release_calls: 0,
            }),
            fail_reserve: false,
            fail_protect: false,
            fail_release: false,
        }
    }
}

impl FakeMemory {
    pub fn failing_reserve() -> Self {
        Self {
            fail_reserve: true,
            ..Self::default()
        }
    }

    pub fn failing_protect() -> Self {
        Self {
            fail_protect: true,
            ..Self::default()
        }
    }

    pub fn failing_protect_and_release() -> Self {
        Self {
            fail_protect: true,
            fail_release: true,
            ..Self::default()
        }
    }

    pub fn live_regions(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn reserve_calls(&self) -> usize {
        self.state.lock().reserve_calls
    }

    pub fn release_calls(&self) -> usize {
        self.state.lock().release_calls
    }

    pub fn region(&self, base: usize) -> Option<FakeRegion> {
        self.state.lock().live.get(&base).copied()
    }
}

impl VirtualMemory for FakeMemory {
    fn reserve(&self, size: usize) -> io::Result<NonNull<u8>> {
        let mut state = self.state.lock();
        state.reserve_calls += 1;
        if self.fail_reserve {
            return Err(io::Error::from(io::ErrorKind::OutOfMemory));
        }

        let base = state.next;
        state.next += size.next_multiple_of(FAKE_GAP) + FAKE_GAP;
        state.live.insert(base, FakeRegion { size, guard: None });
        Ok(NonNull::new(base as *mut u8).expect("fake base is non-null"))
    }

    unsafe fn protect_no_access(&self, addr: NonNull<u8>, size: usize) -> io::Result<()> {
        if self.fail_protect {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }

        let addr = addr.as_ptr() as usize;
        let mut state = self.state.lock();
        let (_, region) = state
            .live
            .range_mut(..=addr)
            .next_back()
            .filter(|(base, region)| addr + size <= **base + region.size)
            .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
        region.guard = Some((addr, size));
        Ok(())
    }

    unsafe fn release(&self, addr: NonNull<u8>, size: usize) -> io::Result<()> {
        let mut state = self.state.lock();
        state.release_calls += 1;
        if self.fail_release {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }

        let base = addr.as_ptr() as usize;
        match state.live.get(&base) {
            Some(region) if region.size == size => {
                state.live.remove(&base);
                Ok(())
            }
            _ => Err(io::Error::from(io::ErrorKind::InvalidInput)),
        }
    }
}
