//! # Memory-Protection Interface
//!
//! The kernel consumes memory protection at interface level only:
//! a region can be enabled over a power-of-two-sized window with
//! execute and user-write attributes, or disabled. Programming the
//! MPU registers themselves belongs to the platform collaborator;
//! the default implementation is inert.

use crate::scheduler::KernelError;

/// Highest valid MPU region number.
pub const REGION_NUMBER_MAX: u32 = 7;

/// Ceiling of log2(n): the smallest `s` with `2^s >= n`. Used to
/// size protection regions and to round stack allocations.
pub fn log2_ceil(n: u32) -> u32 {
    let mut s = 0;
    while n > (1 << s) {
        s += 1;
    }
    s
}

/// One protectable window of the address space.
#[derive(Debug, Clone, Copy)]
pub struct RegionConfig {
    /// Region number (0..=[`REGION_NUMBER_MAX`]).
    pub region: u32,
    /// Base address; must be aligned to the region size.
    pub base: u32,
    /// log2 of the region size in bytes.
    pub size_log2: u32,
    /// Whether user code may execute from the region.
    pub executable: bool,
    /// Whether user code may write the region.
    pub user_writable: bool,
}

/// Operations the core needs from the protection collaborator.
pub trait MemoryProtection {
    fn enable_region(&mut self, config: RegionConfig) -> Result<(), KernelError>;
    fn disable_region(&mut self, region: u32);
}

/// Default collaborator: accepts every well-formed request and
/// protects nothing.
pub struct InertMpu;

impl MemoryProtection for InertMpu {
    fn enable_region(&mut self, config: RegionConfig) -> Result<(), KernelError> {
        if config.region > REGION_NUMBER_MAX {
            return Err(KernelError::InvalidArgument);
        }
        // Base must be aligned to the region size.
        if config.size_log2 < 32 && config.base & ((1u32 << config.size_log2) - 1) != 0 {
            return Err(KernelError::InvalidArgument);
        }
        Ok(())
    }

    fn disable_region(&mut self, _region: u32) {}
}
