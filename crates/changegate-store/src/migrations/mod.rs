//! Schema migrations: embedded SQL applied once each, verified by checksum

mod embedded;
mod runner;

pub use runner::{applied_migrations, apply_migrations};
