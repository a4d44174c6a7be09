//! # aas-policy
//!
//! Policy engine for agent automation safety. Parses the line-oriented
//! `aas.policy.txt` format, validates it, resolves the effective policy
//! through a FILE → LKG → DEFAULT cascade, and hot-reloads it when the file
//! changes, recording a risk-rated history entry for every accepted revision.
//!
//! Entry points: [`PolicyEffectiveResolver::resolve`] for the cascade,
//! [`PolicyValidator::validate`] for a snapshot, [`PolicyService::load`] for
//! a file on disk, and [`PolicyWatchRunner`] for the hot-reload loop.
//!
//! ## Key invariants
//!
//! - **Never surface an invalid policy**: the effective policy is always the
//!   first candidate without Error diagnostics, ending at a built-in default
//!   that is checked when the resolver is built.
//! - **Live is live**: the operating mode comes only from the active
//!   profile's declared mode. Errors block a LIVE policy
//!   (`LiveStatus::Blocked`, reason `AASLIVE001`) and never downgrade it.
//! - **Deterministic diagnostics**: always sorted by code, section, key,
//!   line and message.
//! - **Whole-value swaps**: readers hold an `Arc` to an effective result
//!   that never changes after it is published.
//! - **Atomic writes**: every output file is written via temp file + rename.

pub mod config;
pub mod defaults;
pub mod diagnostic;
pub mod document;
pub mod error;
pub mod fs_atomic;
pub mod hasher;
pub mod parser;
pub mod reconcile;
pub mod recorder;
pub mod report;
pub mod resolver;
pub mod service;
pub mod snapshot;
pub mod validator;
pub mod watch;

pub use config::WatchConfig;
pub use defaults::DEFAULT_POLICY_TEXT;
pub use diagnostic::{DiagnosticSeverity, PolicyDiagnostic};
pub use document::{AiSettings, EthicsSettings, GlobalSettings, PolicyDocument, ProfileSettings};
pub use error::PolicyError;
pub use parser::{PolicyLoadResult, PolicyParser};
pub use reconcile::{PolicyHandle, PolicyReconciler, WatchOutcome};
pub use recorder::{PolicyApplyEvaluation, PolicyApplyRecorder, RiskLevel};
pub use resolver::{PolicyEffectiveResolver, PolicyEffectiveResult, PolicySource};
pub use service::{OutputLayout, PolicyService};
pub use snapshot::PolicySnapshot;
pub use validator::{LiveStatus, OperatingMode, PolicyValidationResult, PolicyValidator};
pub use watch::{PolicyWatchRunner, WatchControl, WatchPhase, WatchSignal};
