//! Domain model module declarations.

pub mod options;
pub mod scope;
pub mod server;
