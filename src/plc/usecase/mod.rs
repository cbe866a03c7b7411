//! Use-case layer: per-cycle orchestration and runtime lifecycle.

pub mod bridge;
pub mod runtime;
pub mod scan;
