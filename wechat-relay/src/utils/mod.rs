//! Small shared helpers.

pub mod mask;

pub use mask::mask;
