//! `rigup-kernel` – inspection and verified execution
//!
//! The part of rigup that decides nothing on its own but supplies the facts
//! every decision rests on.
//!
//! # Modules
//!
//! - [`probe`] – side-effect-free probes producing a fresh
//!   [`StateSnapshot`][rigup_types::StateSnapshot] per call.
//! - [`change_detector`] – [`ChangeDetector`][change_detector::ChangeDetector]:
//!   SHA-256 fingerprint of the dependency manifest compared against the
//!   fingerprint of the last successful install.
//! - [`executor`] – [`VerifiedExecutor`][executor::VerifiedExecutor]: runs a
//!   convergence action and re-probes; the re-probe, never the exit code, is
//!   authoritative.
//! - [`capability`] – [`CapabilityManager`][capability::CapabilityManager]:
//!   which external tools are present, with install hints when they are not.

pub mod capability;
pub mod change_detector;
pub mod executor;
pub mod probe;

pub use capability::CapabilityManager;
pub use change_detector::{ChangeDetector, FingerprintStore, InstallDecision};
pub use executor::{Verified, VerifiedExecutor};
