// This module gathers the infrastructure shared by every compiler stage: the error
// taxonomy and result alias, the compile options and their environment parsing, the
// per-lane hardware register file with its snapshot type, and the statistics counters
// reported after each compile. Nothing in here knows about instructions; the IR and the
// passes build on these pieces.

//! Core a2xx compiler infrastructure.
//!
//! # Key Components
//!
//! ## Errors (`error`)
//! - `CompileError` separating rejected input, resource exhaustion and internal defects
//!
//! ## Options (`options`)
//! - `CompileOptions`, also loadable from the `A2XX_DEBUG` environment variable
//!
//! ## Register File (`register_file`)
//! - 64 registers x 4 lanes occupancy bitmask with per-slot snapshots
//!
//! ## Statistics (`stats`)
//! - Counters for every pipeline stage with a printable summary

pub mod error;
pub mod options;
pub mod register_file;
pub mod stats;

pub use error::{CompileError, CompileResult};
pub use options::CompileOptions;
pub use register_file::{RegAllocError, RegState, RegisterFile, LANE_UNUSED};
pub use stats::CompileStats;
