mod collector;
mod models;

pub use collector::HostCollector;
pub use models::{HostInformation, NetworkInterface, OsInformation};
