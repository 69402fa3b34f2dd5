//! Command implementations

pub mod catalog;
pub mod completions;
pub mod keygen;
pub mod package;
pub mod registry;
