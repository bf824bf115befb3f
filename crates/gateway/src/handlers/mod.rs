//! API handlers module

pub mod cache;
pub mod health;
pub mod query;
pub mod sessions;
