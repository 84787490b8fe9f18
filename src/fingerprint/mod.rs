//! Fingerprinting: canonical identity strings and their 32-bit hash.

pub mod generator;
pub mod hash;
