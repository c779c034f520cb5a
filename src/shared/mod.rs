pub mod config;
pub mod error;
pub mod event;
pub mod record;
pub mod registry;
pub mod scheduler;
pub mod sink;
pub mod traits;

pub use error::*;
pub use traits::*;
