pub mod models;
pub mod collector;

pub use models::{ProcessInformation, ProcessInformationBuilder};
pub use collector::ProcessesCollector;
