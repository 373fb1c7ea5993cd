//! Type definitions

pub mod entities;
pub mod import;
pub mod mapping;
pub mod messages;
pub mod record;

pub use entities::*;
pub use import::*;
pub use mapping::*;
pub use messages::*;
pub use record::*;
