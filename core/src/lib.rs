//! # Civicwatch Trust Core: Domain Layer
//!
//! Pure domain model for the trust and abuse-control core of a
//! crowd-sourced civic incident reporting backend: principals, devices,
//! reports, synchronous scoring, and the moderation state machine.
//!
//! ## Design
//!
//! Everything in this crate is IO-free. Invariants the persistence layer
//! must uphold (score bounds, anomaly smoothing, bounded logs, state
//! transitions) are expressed as pure functions and entity methods so
//! they are unit-testable without a store:
//!
//! ```text
//! request → [backend gate] → entity pre-save hooks (this crate)
//!                          → store write
//!                          → entity post-save sweeps (this crate)
//! ```
//!
//! The IO layer lives in `civicwatch-backend`.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

// Public modules
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod geo;
pub mod principal;
pub mod report;
pub mod scoring;
pub mod types;

// Re-export main types for convenience
pub use config::CoreConfig;
pub use device::Device;
pub use error::{CoreError, Result};
pub use events::{AuditEntry, DomainEvent};
pub use principal::{Principal, Role};
pub use report::{Report, ReportStatus};
pub use types::{AnalysisPriority, FingerprintId, PrincipalId, ReportId, RiskTier, Severity};
