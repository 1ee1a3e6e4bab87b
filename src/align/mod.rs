pub mod aligner;

pub use aligner::{AlignKey, AlignedSet, DataAligner};
