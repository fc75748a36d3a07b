//! Compatibility analysis and hardware customization.
//!
//! - [`analyzer`]: per-device support ranges, blockers, envelopes, suggested target
//! - [`combos`]: legal device combinations for GPU, Wi-Fi and Bluetooth
//! - [`customizer`]: kept/disabled partition for a concrete target

pub mod analyzer;
pub mod combos;
pub mod customizer;

pub use analyzer::{analyze, Analysis};
pub use combos::{gpu_combinations, singleton_combinations, Combination};
pub use customizer::{customize, Customization};
