//! Side-effecting parts of the analysis engine: processes, directories,
//! backends, generation, and persistence.

pub mod backend;
pub mod collector;
pub mod config;
pub mod container;
pub mod finalizer;
pub mod generator;
pub mod process;
pub mod prompt;
pub mod remote;
pub mod subprocess;
pub mod workspace;
