//! Database queries

pub mod branch;
pub mod customer;
pub mod history;
pub mod import_batch;
pub mod raw_backup;
pub mod route;
pub mod visit;
