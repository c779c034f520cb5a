pub mod models;
pub mod collector;

pub use models::{parse_passwd, User};
pub use collector::{UserCollector, UserDiff};
