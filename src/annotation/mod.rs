//! Gene/exon interval annotation: building the index (component A), the
//! index itself (component B), and batching variants into gene clusters
//! for the classifier (component C).

pub mod batcher;
pub mod builder;
pub mod index;
