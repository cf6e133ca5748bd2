//! Core constants for the OMS trading kernel.

/// Shared-memory position region layout
pub mod shm {
    /// Number of position slots in the region
    pub const SLOT_COUNT: usize = 1000;

    /// Size of one packed position record, padded to two cache lines
    pub const SLOT_SIZE: usize = 128;

    /// Fixed width of the symbol byte array
    pub const SYMBOL_LEN: usize = 16;

    /// Fixed width of the venue byte array
    pub const VENUE_LEN: usize = 12;

    /// Fixed width of the market byte array
    pub const MARKET_LEN: usize = 8;

    /// Fixed width of the side byte array
    pub const SIDE_LEN: usize = 4;

    /// Default region path
    pub const DEFAULT_PATH: &str = "/dev/shm/oms_positions";
}

/// Bounded channel capacities
pub mod channels {
    /// Risk alert channel capacity
    pub const ALERT_CAPACITY: usize = 100;

    /// Position update fan-out capacity
    pub const POSITION_EVENT_CAPACITY: usize = 1024;

    /// Rotation / emergency event capacity
    pub const EMERGENCY_CAPACITY: usize = 16;
}

/// Background task cadences in seconds
pub mod intervals {
    /// Position snapshot interval
    pub const SNAPSHOT_SECS: u64 = 300;

    /// Per-account risk refresh interval
    pub const ACCOUNT_REFRESH_SECS: u64 = 5;

    /// Global risk refresh interval
    pub const GLOBAL_REFRESH_SECS: u64 = 10;
}
