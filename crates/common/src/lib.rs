#![forbid(unsafe_code)]

mod error;

pub use error::*;

pub const DEFAULT_PORT: u16 = 6480;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const MAX_CONNECTIONS: usize = 256;
pub const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024; // 4 KB
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024; // 8 MB

pub const MINUTE_MS: u64 = 60 * 1000;

// Padrões da política de expiração
pub const DEFAULT_IDLE_THRESHOLD_MS: u64 = 30 * MINUTE_MS;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 5 * MINUTE_MS;
pub const DEFAULT_REMOVAL_TIMEOUT_MS: u64 = 5_000;
