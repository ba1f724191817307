//! VM configuration.
//!
//! Every tunable of the frame layer lives here:
//! - Quickening switch and size limit
//! - Per-thread data stack sizing
//! - Frame object pool bound
//! - Recursion limit
//!
//! The warmup delay of a function is a property of its code object and is
//! set when the code is built.

use kestrel_bytecode::quickened::MAX_SIZE_TO_QUICKEN;

// =============================================================================
// Quickening
// =============================================================================

/// Configuration for bytecode quickening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickenConfig {
    /// Enable quickening of warmed-up code.
    pub enabled: bool,
    /// Code objects longer than this many units are never quickened.
    pub max_size: usize,
}

impl Default for QuickenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: MAX_SIZE_TO_QUICKEN,
        }
    }
}

impl QuickenConfig {
    /// Create a disabled configuration.
    #[inline]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

// =============================================================================
// Data Stack
// =============================================================================

/// Sizing of the per-thread data stack frames are bump-allocated from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataStackConfig {
    /// Slots reserved up front.
    pub initial_slots: usize,
    /// Frames that would end above this many slots are heap allocated.
    pub limit_slots: usize,
}

impl Default for DataStackConfig {
    fn default() -> Self {
        Self {
            initial_slots: 4096,
            limit_slots: 1 << 20,
        }
    }
}

// =============================================================================
// Frame Object Pool
// =============================================================================

/// Bound of the frame object free list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePoolConfig {
    /// Maximum number of released shells kept for reuse.
    pub max_free: usize,
}

impl Default for FramePoolConfig {
    fn default() -> Self {
        Self { max_free: 200 }
    }
}

// =============================================================================
// VM Configuration
// =============================================================================

/// Configuration for an interpreter instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// Quickening settings.
    pub quicken: QuickenConfig,
    /// Data stack settings, applied to each new thread.
    pub data_stack: DataStackConfig,
    /// Frame object pool settings.
    pub frame_pool: FramePoolConfig,
    /// Frames a thread may have linked at once.
    pub max_recursion_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            quicken: QuickenConfig::default(),
            data_stack: DataStackConfig::default(),
            frame_pool: FramePoolConfig::default(),
            max_recursion_depth: 1000,
        }
    }
}

impl VmConfig {
    /// Create a configuration for testing (tiny data stack, small pool).
    ///
    /// The data stack limit is low enough that deep or wide frames exercise
    /// the heap fallback.
    pub fn for_testing() -> Self {
        Self {
            quicken: QuickenConfig::default(),
            data_stack: DataStackConfig {
                initial_slots: 64,
                limit_slots: 256,
            },
            frame_pool: FramePoolConfig { max_free: 4 },
            max_recursion_depth: 64,
        }
    }

    /// Create a configuration with quickening turned off.
    #[inline]
    pub fn disabled_quickening() -> Self {
        Self {
            quicken: QuickenConfig::disabled(),
            ..Default::default()
        }
    }
}
