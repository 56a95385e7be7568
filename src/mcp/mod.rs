//! MCP server configuration: scope merging, variable expansion, secret
//! injection, artifact materialization, and artifact cleanup.
//!
//! Data flows through the submodules in this order for every turn:
//!
//! 1. [`resolver`] merges the scoped entries into a `MergedServerSet`.
//! 2. [`artifact`] converts the set to wire form, expanding values with
//!    [`expand`] and applying [`secrets`] injection, then writes it.
//! 3. [`janitor`] removes artifacts and scratch files left by earlier turns.

pub mod artifact;
pub mod expand;
pub mod janitor;
pub mod resolver;
pub mod secrets;
