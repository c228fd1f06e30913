//! # dlb-rm
//!
//! Control-plane resource manager for DLB hardware queue managers.
//!
//! This is the workspace root crate that re-exports core functionality.
//! For direct usage, depend on individual sub-crates:
//!
//! - [`dlb-rm-core`] - Domain lifecycle, queue mapping, VF transfers, mailbox
//! - [`dlb-rm-cli`] - CLI tool (`dlb-rm` binary)

pub use dlb_rm_core::*;

pub mod verification_specs;
