pub mod bus;
pub mod config;
pub mod error;
pub mod http;

pub use bus::{BusStatus, CommandBus, WorkerState};
pub use config::{Settings, WorkerConfig};
pub use error::{BusError, ConfigError};
