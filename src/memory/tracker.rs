use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::{OnceLock, RwLock};

use log::{debug, trace};
use serde::Serialize;
use strum_macros::{Display, EnumIter};

use crate::error::{Error, Result};
use crate::memory::backend::{MemoryBackend, SystemBackend};
use crate::types::Stream;

/// Physical memory kind of a tracked buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize)]
pub enum MemorySpace {
    /// Addressable from both host and device; migrated automatically.
    Managed,
    /// Page-locked host memory.
    HostPinned,
    /// Device-only memory.
    Device,
    /// Device memory allocated and freed against a specific stream.
    AsyncDevice,
    /// Sentinel; never assigned to a live allocation.
    Invalid,
}

impl MemorySpace {
    /// Whether the host can dereference buffers of this kind.
    pub fn host_accessible(&self) -> bool {
        matches!(self, MemorySpace::Managed | MemorySpace::HostPinned)
    }

    /// Whether the device can dereference buffers of this kind.
    pub fn device_accessible(&self) -> bool {
        matches!(
            self,
            MemorySpace::Managed | MemorySpace::Device | MemorySpace::AsyncDevice
        )
    }
}

/// Running allocation counters.
///
/// Invariants: `peak_bytes >= current_bytes` at every observable instant, and
/// `total_bytes` never decreases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    /// Bytes currently live.
    pub current_bytes: usize,
    /// Bytes allocated over the tracker's lifetime.
    pub total_bytes: usize,
    /// Maximum observed value of `current_bytes`.
    pub peak_bytes: usize,
}

/// Metadata for one live allocation, keyed by its base address.
#[derive(Debug, Clone, Copy)]
struct AllocationRecord {
    size: usize,
    space: MemorySpace,
    stream: Stream,
}

struct TrackerState {
    records: HashMap<usize, AllocationRecord>,
    stats: MemoryStats,
}

/// Memory-space-aware allocation tracker.
///
/// Every buffer the system hands out is registered here so an arbitrary
/// pointer can later be classified back to its owning allocation and memory
/// kind, and so allocation statistics stay consistent with the table.
pub struct MemoryTracker {
    backend: Box<dyn MemoryBackend>,
    // Records and statistics share one lock so counter updates land in the
    // same exclusive section as the table mutation that justifies them.
    state: RwLock<TrackerState>,
}

impl MemoryTracker {
    pub fn new(backend: Box<dyn MemoryBackend>) -> Self {
        Self {
            backend,
            state: RwLock::new(TrackerState {
                records: HashMap::new(),
                stats: MemoryStats::default(),
            }),
        }
    }

    pub fn with_system_backend() -> Self {
        Self::new(Box::new(SystemBackend::new()))
    }

    /// Allocate `bytes` of `space` memory and register the allocation.
    ///
    /// `bytes` must be non-zero and `space` must be one of the four live
    /// kinds. `stream` is only consulted for stream-ordered allocations but
    /// is recorded for every buffer.
    pub fn allocate(
        &self,
        bytes: usize,
        space: MemorySpace,
        stream: Stream,
    ) -> Result<NonNull<u8>> {
        if bytes == 0 {
            return Err(Error::InvalidParameter(
                "allocation size must be non-zero".to_string(),
            ));
        }

        let ptr = match space {
            MemorySpace::Managed => self.backend.alloc_managed(bytes)?,
            MemorySpace::HostPinned => self.backend.alloc_host_pinned(bytes)?,
            MemorySpace::Device => self.backend.alloc_device(bytes)?,
            MemorySpace::AsyncDevice => self.backend.alloc_device_async(bytes, stream)?,
            MemorySpace::Invalid => {
                return Err(Error::InvalidType(
                    "cannot allocate memory of the invalid kind".to_string(),
                ))
            }
        };

        let mut state = self.state.write().unwrap();
        state.stats.current_bytes += bytes;
        state.stats.total_bytes += bytes;
        state.stats.peak_bytes = state.stats.peak_bytes.max(state.stats.current_bytes);
        state.records.insert(
            ptr.as_ptr() as usize,
            AllocationRecord {
                size: bytes,
                space,
                stream,
            },
        );

        trace!(
            "allocated {} bytes of {} memory at {:#x}",
            bytes,
            space,
            ptr.as_ptr() as usize
        );
        Ok(ptr)
    }

    /// Release a buffer previously returned by [`allocate`](Self::allocate).
    ///
    /// A null pointer is a no-op. Freeing an untracked address fails with
    /// `InvalidParameter` and leaves table and statistics untouched.
    pub fn free(&self, ptr: *mut u8) -> Result<()> {
        if ptr.is_null() {
            return Ok(());
        }
        let addr = ptr as usize;

        let mut state = self.state.write().unwrap();
        let record = match state.records.get(&addr) {
            Some(record) => *record,
            None => {
                return Err(Error::InvalidParameter(format!(
                    "free of untracked address {:#x}",
                    addr
                )))
            }
        };

        // SAFETY: null was handled above.
        let nn = unsafe { NonNull::new_unchecked(ptr) };
        match record.space {
            MemorySpace::Managed | MemorySpace::Device => {
                self.backend.free_device(nn, record.size)
            }
            MemorySpace::HostPinned => self.backend.free_host_pinned(nn, record.size),
            MemorySpace::AsyncDevice => {
                self.backend.free_device_async(nn, record.size, record.stream)
            }
            MemorySpace::Invalid => {
                return Err(Error::InvalidType(
                    "allocation record carries the invalid memory kind".to_string(),
                ))
            }
        }

        state.stats.current_bytes -= record.size;
        state.records.remove(&addr);

        trace!("freed {} bytes of {} memory at {:#x}", record.size, record.space, addr);
        Ok(())
    }

    /// Classify a pointer back to the memory kind of its owning allocation.
    ///
    /// Returns `Invalid` for a null pointer. Exact base addresses resolve via
    /// the table; anything else is assumed to be a sub-view offset from some
    /// allocation's base, and the live record with the smallest non-negative
    /// offset below the address wins. The fallback is O(live allocations) and
    /// takes the table lock, so keep it off per-element paths.
    pub fn kind_of(&self, ptr: *const u8) -> Result<MemorySpace> {
        if ptr.is_null() {
            return Ok(MemorySpace::Invalid);
        }
        let addr = ptr as usize;

        let state = self.state.read().unwrap();
        if let Some(record) = state.records.get(&addr) {
            return Ok(record.space);
        }

        if state.records.is_empty() {
            return Err(Error::InvalidParameter(format!(
                "address {:#x} is untracked and the allocation table is empty",
                addr
            )));
        }

        let mut best: Option<(usize, MemorySpace)> = None;
        for (&base, record) in &state.records {
            if base <= addr {
                let offset = addr - base;
                if best.map_or(true, |(d, _)| offset < d) {
                    best = Some((offset, record.space));
                }
            }
        }

        match best {
            Some((offset, space)) => {
                debug!(
                    "classified {:#x} as {} via nearest base ({} bytes past it)",
                    addr, space, offset
                );
                Ok(space)
            }
            None => Err(Error::InvalidParameter(format!(
                "no live allocation at or below address {:#x}",
                addr
            ))),
        }
    }

    /// Whether the exact address is a live allocation base.
    pub fn is_tracked(&self, ptr: *const u8) -> bool {
        if ptr.is_null() {
            return false;
        }
        self.state.read().unwrap().records.contains_key(&(ptr as usize))
    }

    /// Snapshot of the running counters.
    pub fn stats(&self) -> MemoryStats {
        self.state.read().unwrap().stats
    }

    /// Number of live allocations.
    pub fn live_allocations(&self) -> usize {
        self.state.read().unwrap().records.len()
    }

    /// Serialized counter snapshot for diagnostics exports.
    pub fn stats_report(&self) -> String {
        serde_json::to_string(&self.stats()).unwrap_or_default()
    }

    /// Log the running counters at debug level.
    pub fn log_stats(&self) {
        let (stats, live) = {
            let state = self.state.read().unwrap();
            (state.stats, state.records.len())
        };
        debug!(
            "memory statistics (GB): current: {:.2}, total: {:.2}, peak: {:.2}, live allocations: {}",
            stats.current_bytes as f64 / 1e9,
            stats.total_bytes as f64 / 1e9,
            stats.peak_bytes as f64 / 1e9,
            live
        );
    }
}

impl Default for MemoryTracker {
    fn default() -> Self {
        Self::with_system_backend()
    }
}

/// Process-wide tracker over the system backend, lazily initialized on first
/// use. Buffers still live at process exit are deliberately leaked; tests
/// needing isolation construct their own [`MemoryTracker`] instead.
pub fn global() -> &'static MemoryTracker {
    static GLOBAL: OnceLock<MemoryTracker> = OnceLock::new();
    GLOBAL.get_or_init(MemoryTracker::with_system_backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    fn live_spaces() -> impl Iterator<Item = MemorySpace> {
        MemorySpace::iter().filter(|s| *s != MemorySpace::Invalid)
    }

    #[test]
    fn test_allocate_then_query_kind_round_trip() {
        let tracker = MemoryTracker::with_system_backend();
        for space in live_spaces() {
            let ptr = tracker.allocate(256, space, Stream::DEFAULT).unwrap();
            assert_eq!(tracker.kind_of(ptr.as_ptr()).unwrap(), space);
            tracker.free(ptr.as_ptr()).unwrap();
        }
    }

    #[test]
    fn test_zero_byte_allocation_rejected() {
        let tracker = MemoryTracker::with_system_backend();
        assert!(matches!(
            tracker.allocate(0, MemorySpace::Device, Stream::DEFAULT),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_invalid_space_rejected() {
        let tracker = MemoryTracker::with_system_backend();
        assert!(matches!(
            tracker.allocate(64, MemorySpace::Invalid, Stream::DEFAULT),
            Err(Error::InvalidType(_))
        ));
    }

    #[test]
    fn test_double_free_fails_and_preserves_stats() {
        let tracker = MemoryTracker::with_system_backend();
        let ptr = tracker.allocate(128, MemorySpace::Managed, Stream::DEFAULT).unwrap();
        tracker.free(ptr.as_ptr()).unwrap();

        let stats = tracker.stats();
        assert!(matches!(
            tracker.free(ptr.as_ptr()),
            Err(Error::InvalidParameter(_))
        ));
        assert_eq!(tracker.stats(), stats);
    }

    #[test]
    fn test_free_null_is_noop() {
        let tracker = MemoryTracker::with_system_backend();
        tracker.free(std::ptr::null_mut()).unwrap();
        assert_eq!(tracker.stats(), MemoryStats::default());
    }

    #[test]
    fn test_stats_track_current_total_peak() {
        let tracker = MemoryTracker::with_system_backend();
        let a = tracker.allocate(1024, MemorySpace::Device, Stream::DEFAULT).unwrap();
        assert_eq!(
            tracker.stats(),
            MemoryStats { current_bytes: 1024, total_bytes: 1024, peak_bytes: 1024 }
        );

        let b = tracker.allocate(512, MemorySpace::Device, Stream::DEFAULT).unwrap();
        assert_eq!(tracker.stats().peak_bytes, 1536);

        tracker.free(a.as_ptr()).unwrap();
        let stats = tracker.stats();
        assert_eq!(stats.current_bytes, 512);
        assert_eq!(stats.total_bytes, 1536);
        assert_eq!(stats.peak_bytes, 1536);
        assert!(stats.peak_bytes >= stats.current_bytes);

        tracker.free(b.as_ptr()).unwrap();
    }

    #[test]
    fn test_offset_pointer_classified_via_nearest_base() {
        let tracker = MemoryTracker::with_system_backend();
        let ptr = tracker.allocate(4096, MemorySpace::Device, Stream::DEFAULT).unwrap();

        let view = unsafe { ptr.as_ptr().add(512) };
        assert_eq!(tracker.kind_of(view).unwrap(), MemorySpace::Device);

        tracker.free(ptr.as_ptr()).unwrap();
    }

    #[test]
    fn test_nearest_base_prefers_owning_allocation() {
        let tracker = MemoryTracker::with_system_backend();
        let a = tracker.allocate(4096, MemorySpace::Device, Stream::DEFAULT).unwrap();
        let b = tracker.allocate(4096, MemorySpace::HostPinned, Stream::DEFAULT).unwrap();

        let view_a = unsafe { a.as_ptr().add(64) };
        let view_b = unsafe { b.as_ptr().add(64) };
        assert_eq!(tracker.kind_of(view_a).unwrap(), MemorySpace::Device);
        assert_eq!(tracker.kind_of(view_b).unwrap(), MemorySpace::HostPinned);

        tracker.free(a.as_ptr()).unwrap();
        tracker.free(b.as_ptr()).unwrap();
    }

    #[test]
    fn test_query_kind_of_null_is_invalid() {
        let tracker = MemoryTracker::with_system_backend();
        assert_eq!(tracker.kind_of(std::ptr::null()).unwrap(), MemorySpace::Invalid);
    }

    #[test]
    fn test_query_kind_on_empty_table_fails() {
        let tracker = MemoryTracker::with_system_backend();
        let bogus = 0xdead_0000usize as *const u8;
        assert!(matches!(
            tracker.kind_of(bogus),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_accessibility_predicates() {
        assert!(MemorySpace::Managed.host_accessible());
        assert!(MemorySpace::Managed.device_accessible());
        assert!(MemorySpace::HostPinned.host_accessible());
        assert!(!MemorySpace::HostPinned.device_accessible());
        assert!(!MemorySpace::Device.host_accessible());
        assert!(MemorySpace::AsyncDevice.device_accessible());
    }

    #[test]
    fn test_stats_report_is_json() {
        let tracker = MemoryTracker::with_system_backend();
        let report = tracker.stats_report();
        assert!(report.contains("\"current_bytes\":0"));
    }
}
