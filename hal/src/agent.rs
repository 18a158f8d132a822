//! # Agents
//!
//! Descriptors for the compute agents a backend exposes.

use core::fmt;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Size in bytes of one AQL packet slot
pub const PACKET_BYTES: u32 = 64;

/// Smallest ring a device accepts, in packets
pub const MIN_QUEUE_PACKETS: u32 = 0x400 / PACKET_BYTES;

/// Largest ring a device accepts, in packets
pub const MAX_QUEUE_PACKETS: u32 = (0x1_0000_0000_u64 / PACKET_BYTES as u64) as u32;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Identifies one agent within a backend
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct AgentId(pub u32);

impl fmt::Debug for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Agent({})", self.0)
    }
}

/// Kind of agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKind {
    /// Host processor
    Cpu,
    /// GPU or other throughput device
    Gpu,
}

/// How the doorbell of a hardware queue reaches the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DoorbellKind {
    /// Pre-AQL firmware: dispatch ids are filtered in software and written
    /// as a 32-bit MMIO value
    Legacy   = 1,
    /// AQL doorbell: the signal value is written straight to the register
    Hardware = 2,
}

/// Producer model of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum QueueType {
    /// Any number of producers
    Multi       = 0,
    /// A single producer
    Single      = 1,
    /// Shared between cooperating producers, reference counted
    Cooperative = 2,
}

impl QueueType {
    /// Decode a raw queue type
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Multi),
            1 => Some(Self::Single),
            2 => Some(Self::Cooperative),
            _ => None,
        }
    }
}

// =============================================================================
// AGENT DESCRIPTOR
// =============================================================================

/// Static properties of an agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInfo {
    /// Agent id
    pub id: AgentId,
    /// Agent kind
    pub kind: AgentKind,
    /// Topology node
    pub node_id: u32,
    /// Smallest supported ring, in packets (power of two)
    pub queue_min_packets: u32,
    /// Largest supported ring, in packets (power of two)
    pub queue_max_packets: u32,
    /// Most permissive producer model the agent supports
    pub queue_type: QueueType,
    /// Whether cooperative queues can be created
    pub cooperative_queues: bool,
    /// Doorbell mechanism
    pub doorbell: DoorbellKind,
    /// Compute units
    pub compute_units: u32,
    /// Hardware waves per compute unit
    pub waves_per_cu: u32,
}

impl AgentInfo {
    /// A GPU agent with default queue limits
    pub fn gpu(id: u32) -> Self {
        Self {
            id: AgentId(id),
            kind: AgentKind::Gpu,
            node_id: id,
            queue_min_packets: MIN_QUEUE_PACKETS,
            queue_max_packets: MAX_QUEUE_PACKETS,
            queue_type: QueueType::Multi,
            cooperative_queues: true,
            doorbell: DoorbellKind::Hardware,
            compute_units: 64,
            waves_per_cu: 40,
        }
    }

    /// A CPU agent. CPU agents own no hardware queues.
    pub fn cpu(id: u32) -> Self {
        Self {
            kind: AgentKind::Cpu,
            cooperative_queues: false,
            compute_units: 1,
            waves_per_cu: 1,
            ..Self::gpu(id)
        }
    }

    /// Set the ring size limits
    pub fn with_queue_limits(mut self, min_packets: u32, max_packets: u32) -> Self {
        self.queue_min_packets = min_packets;
        self.queue_max_packets = max_packets;
        self
    }

    /// Set the doorbell mechanism
    pub fn with_doorbell(mut self, doorbell: DoorbellKind) -> Self {
        self.doorbell = doorbell;
        self
    }

    /// Set the wave capacity
    pub fn with_waves(mut self, compute_units: u32, waves_per_cu: u32) -> Self {
        self.compute_units = compute_units;
        self.waves_per_cu = waves_per_cu;
        self
    }

    /// Set the producer model
    pub fn with_queue_type(mut self, queue_type: QueueType) -> Self {
        self.queue_type = queue_type;
        self
    }

    /// Whether the agent can host a queue of the given type
    pub fn supports(&self, queue_type: QueueType) -> bool {
        match queue_type {
            QueueType::Cooperative => self.cooperative_queues,
            QueueType::Single => true,
            QueueType::Multi => self.queue_type != QueueType::Single,
        }
    }

    /// Whether this is a host agent
    pub fn is_cpu(&self) -> bool {
        self.kind == AgentKind::Cpu
    }
}

// =============================================================================
// TESTS
// =============================================================================
