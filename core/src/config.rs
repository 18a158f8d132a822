//! # Runtime Configuration
//!
//! Flags that tune the runtime, read once from the environment and then
//! injected read-only into every component.
//!
//! | Variable | Default | Effect |
//! |----------|---------|--------|
//! | `HELIX_STREAM_ENABLE_INTERRUPT` | `1` | Interrupt-assisted signal waits |
//! | `HELIX_STREAM_ENABLE_SDMA` | unset | Force SDMA copies on (`1`) or off (`0`) |
//! | `HELIX_STREAM_NO_SCRATCH_RECLAIM` | `0` | Keep scratch memory after dispatch |
//! | `HELIX_STREAM_ENABLE_QUEUE_FAULT_MESSAGE` | `1` | Print async queue faults |
//! | `HELIX_STREAM_ENABLE_VM_FAULT_MESSAGE` | `1` | Print memory faults |
//! | `HELIX_STREAM_MAX_QUEUES` | `0` | Cap on live queues (0 = none) |
//!
//! Scratch reclaim and the segment size hints of a queue request travel to
//! the driver in its [`QueueDescriptor`](helix_stream_hal::QueueDescriptor).
//! `enable_sdma` is only carried here; copy engines that pick between SDMA
//! and blit kernels read it through [`SdmaMode::resolve`].

use crate::types::MachineModel;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "HELIX_STREAM_";

/// SDMA override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SdmaMode {
    /// Let the runtime decide
    #[default]
    Default,
    /// Always use SDMA engines
    Enabled,
    /// Never use SDMA engines
    Disabled,
}

impl SdmaMode {
    /// Whether SDMA should be used, given the engine's own preference
    pub fn resolve(self, preferred: bool) -> bool {
        match self {
            Self::Default => preferred,
            Self::Enabled => true,
            Self::Disabled => false,
        }
    }
}

/// Runtime-wide flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeFlags {
    /// Allow signals to block on OS events
    pub enable_interrupt: bool,
    /// SDMA override
    pub enable_sdma: SdmaMode,
    /// Keep scratch memory instead of reclaiming it
    pub no_scratch_reclaim: bool,
    /// Print asynchronous queue errors to stderr
    pub enable_queue_fault_message: bool,
    /// Print memory faults to stderr
    pub enable_vm_fault_message: bool,
    /// Maximum number of live queues, 0 for no limit
    pub max_queues: usize,
    /// Addressing model used by legacy doorbells
    pub machine_model: MachineModel,
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        Self {
            enable_interrupt: true,
            enable_sdma: SdmaMode::Default,
            no_scratch_reclaim: false,
            enable_queue_fault_message: true,
            enable_vm_fault_message: true,
            max_queues: 0,
            machine_model: MachineModel::NATIVE,
        }
    }
}

impl RuntimeFlags {
    /// Read flags from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read flags through `lookup`, which maps a variable name to its value
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let flag = |name: &str, default: bool| match var(name).as_deref() {
            Some("0") => false,
            Some("1") => true,
            _ => default,
        };

        let defaults = Self::default();
        Self {
            enable_interrupt: flag("ENABLE_INTERRUPT", defaults.enable_interrupt),
            enable_sdma: match var("ENABLE_SDMA").as_deref() {
                Some("0") => SdmaMode::Disabled,
                Some("1") => SdmaMode::Enabled,
                _ => SdmaMode::Default,
            },
            no_scratch_reclaim: flag("NO_SCRATCH_RECLAIM", defaults.no_scratch_reclaim),
            enable_queue_fault_message: flag(
                "ENABLE_QUEUE_FAULT_MESSAGE",
                defaults.enable_queue_fault_message,
            ),
            enable_vm_fault_message: flag("ENABLE_VM_FAULT_MESSAGE", defaults.enable_vm_fault_message),
            max_queues: var("MAX_QUEUES")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.max_queues),
            machine_model: defaults.machine_model,
        }
    }

    /// Enable or disable interrupt-assisted waits
    pub fn with_interrupts(mut self, enable: bool) -> Self {
        self.enable_interrupt = enable;
        self
    }

    /// Enable or disable the default queue fault printer
    pub fn with_queue_fault_message(mut self, enable: bool) -> Self {
        self.enable_queue_fault_message = enable;
        self
    }

    /// Reclaim scratch memory after dispatches, or keep it
    pub fn with_scratch_reclaim(mut self, reclaim: bool) -> Self {
        self.no_scratch_reclaim = !reclaim;
        self
    }

    /// Enable or disable memory fault reports
    pub fn with_vm_fault_message(mut self, enable: bool) -> Self {
        self.enable_vm_fault_message = enable;
        self
    }

    /// Cap the number of live queues
    pub fn with_max_queues(mut self, max: usize) -> Self {
        self.max_queues = max;
        self
    }

    /// Select the legacy doorbell addressing model
    pub fn with_machine_model(mut self, model: MachineModel) -> Self {
        self.machine_model = model;
        self
    }
}
