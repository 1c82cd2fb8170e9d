//! Subcommand argument structs for the top-level CLI.
//!
//! `build-annotation`'s arguments live alongside its implementation in
//! [`crate::annotation::builder::Args`], following the teacher's own
//! practice of colocating a subcommand's `Args` with the code that consumes
//! it; `annotate` and `analyze` are CLI-only surfaces with no single
//! implementation module of their own, so their `Args` live here instead.

pub mod analyze;
pub mod annotate;
