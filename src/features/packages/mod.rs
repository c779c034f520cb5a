mod collector;
mod models;
pub mod sources;

pub use collector::PackagesCollector;
pub use models::{parse_apk_installed, parse_dpkg_status, parse_rpm_output, Package};
