//! Memory readings from `sysinfo`, and a settable source for tests and demos.

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::core::memory::{MemoryReading, MemorySource};
use crate::core::SchedulerError;

/// Samples the resident set size of this process, measured against system
/// memory or a configured limit when one is set.
pub struct ProcessMemorySource {
    limit_bytes: Option<u64>,
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl ProcessMemorySource {
    /// Source using `limit_bytes` as the total when given.
    #[must_use]
    pub fn new(limit_bytes: Option<u64>) -> Self {
        Self {
            limit_bytes,
            pid: sysinfo::get_current_pid().ok(),
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for ProcessMemorySource {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for ProcessMemorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessMemorySource")
            .field("limit_bytes", &self.limit_bytes)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl MemorySource for ProcessMemorySource {
    fn sample(&self) -> Result<MemoryReading, SchedulerError> {
        let pid = self
            .pid
            .ok_or_else(|| SchedulerError::Backend("current process id unavailable".into()))?;

        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        let used_bytes = system
            .process(pid)
            .map(sysinfo::Process::memory)
            .ok_or_else(|| SchedulerError::Backend(format!("no memory sample for pid {pid}")))?;

        let total_bytes = match self.limit_bytes {
            Some(limit) => limit,
            None => {
                system.refresh_memory();
                system.total_memory()
            }
        };
        if total_bytes == 0 {
            return Err(SchedulerError::Backend("total memory reported as zero".into()));
        }
        Ok(MemoryReading {
            used_bytes,
            total_bytes,
        })
    }
}

/// Source returning whatever was last set.
#[derive(Debug)]
pub struct FixedMemorySource {
    reading: Mutex<MemoryReading>,
}

impl FixedMemorySource {
    /// Source reporting `used_bytes` of `total_bytes`.
    #[must_use]
    pub const fn new(used_bytes: u64, total_bytes: u64) -> Self {
        Self {
            reading: Mutex::new(MemoryReading {
                used_bytes,
                total_bytes,
            }),
        }
    }

    /// Change the reported usage.
    pub fn set_used(&self, used_bytes: u64) {
        self.reading.lock().used_bytes = used_bytes;
    }
}

impl MemorySource for FixedMemorySource {
    fn sample(&self) -> Result<MemoryReading, SchedulerError> {
        Ok(*self.reading.lock())
    }
}
