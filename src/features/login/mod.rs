pub mod collector;
pub mod models;
pub mod utmp;

pub use collector::LoginCollector;
pub use models::{LoginRecord, LoginRecordType};
