// resolver.rs - FILE → LKG → DEFAULT resolution cascade.
//
// The resolver never hands back an invalid policy as the effective one.
// It evaluates the candidates in order and returns the first that parses
// and validates without Error diagnostics:
//
//   FILE     the policy file as it is on disk now
//   LKG      the last-known-good copy written after the last acceptance
//   DEFAULT  the built-in text checked at construction time
//
// Whichever candidate wins, the diagnostics of the file (and the LKG, when
// it was consulted) ride along for audit.

use std::fmt;

use serde::Serialize;

use crate::defaults::DEFAULT_POLICY_TEXT;
use crate::diagnostic::{has_errors, merge_diagnostics, top_codes, PolicyDiagnostic};
use crate::error::PolicyError;
use crate::hasher::{hash_bytes, normalize_line_endings};
use crate::parser::PolicyParser;
use crate::snapshot::PolicySnapshot;
use crate::validator::{LiveStatus, OperatingMode, PolicyValidator};

/// Where an effective policy came from.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicySource {
    File,
    Lkg,
    Default,
}

impl fmt::Display for PolicySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicySource::File => write!(f, "FILE"),
            PolicySource::Lkg => write!(f, "LKG"),
            PolicySource::Default => write!(f, "DEFAULT"),
        }
    }
}

/// One evaluated candidate, and after resolution, the effective policy.
#[derive(Debug, Clone)]
pub struct PolicyEffectiveResult {
    pub source: PolicySource,
    /// SHA-256 of the normalised text.
    pub hash: String,
    /// The candidate text with line endings normalised.
    pub text: String,
    /// Present only when the candidate is valid.
    pub snapshot: Option<PolicySnapshot>,
    /// Declared active profile name, even for a candidate that failed to parse.
    pub active_profile: String,
    /// Declared mode of the active profile, uppercased, or `UNKNOWN`.
    pub profile_mode: String,
    pub operating_mode: OperatingMode,
    pub live_status: LiveStatus,
    pub reasons: Vec<String>,
    /// Parse and validation diagnostics of this candidate, merged and sorted.
    pub diagnostics: Vec<PolicyDiagnostic>,
    pub file_diagnostics: Vec<PolicyDiagnostic>,
    pub lkg_diagnostics: Vec<PolicyDiagnostic>,
}

impl PolicyEffectiveResult {
    pub fn is_valid(&self) -> bool {
        self.snapshot.is_some() && !has_errors(&self.diagnostics)
    }
}

/// Resolves policy texts into an effective policy.
#[derive(Debug, Clone)]
pub struct PolicyEffectiveResolver {
    parser: PolicyParser,
    validator: PolicyValidator,
    default: PolicyEffectiveResult,
}

impl PolicyEffectiveResolver {
    /// Build a resolver around a default policy text.
    ///
    /// Fails with [`PolicyError::InvalidDefault`] when the default does not
    /// validate, since the cascade would then have no safe floor.
    pub fn new(default_text: &str) -> Result<Self, PolicyError> {
        let parser = PolicyParser::new();
        let validator = PolicyValidator::new();
        let default = evaluate_with(&parser, &validator, PolicySource::Default, default_text);
        if !default.is_valid() {
            return Err(PolicyError::InvalidDefault {
                codes: top_codes(&default.diagnostics, usize::MAX, true),
            });
        }
        Ok(Self {
            parser,
            validator,
            default,
        })
    }

    /// A resolver using the built-in default policy.
    pub fn with_builtin_default() -> Result<Self, PolicyError> {
        Self::new(DEFAULT_POLICY_TEXT)
    }

    /// The pre-evaluated default candidate.
    pub fn default_result(&self) -> &PolicyEffectiveResult {
        &self.default
    }

    /// Evaluate one candidate text without falling back.
    pub fn evaluate(&self, source: PolicySource, text: &str) -> PolicyEffectiveResult {
        evaluate_with(&self.parser, &self.validator, source, text)
    }

    /// Run the cascade over the file text and an optional LKG text.
    pub fn resolve(&self, file_text: &str, lkg_text: Option<&str>) -> PolicyEffectiveResult {
        let mut file = self.evaluate(PolicySource::File, file_text);
        let file_diagnostics = file.diagnostics.clone();
        if file.is_valid() {
            file.file_diagnostics = file_diagnostics;
            return file;
        }

        tracing::warn!(
            hash = %file.hash,
            codes = %top_codes(&file_diagnostics, 5, false).join(","),
            "policy file invalid, falling back"
        );

        let mut lkg_diagnostics = Vec::new();
        // An empty LKG is the same as none.
        if let Some(text) = lkg_text.filter(|t| !t.is_empty()) {
            let mut lkg = self.evaluate(PolicySource::Lkg, text);
            lkg_diagnostics = lkg.diagnostics.clone();
            if lkg.is_valid() {
                lkg.file_diagnostics = file_diagnostics;
                lkg.lkg_diagnostics = lkg_diagnostics;
                tracing::info!(hash = %lkg.hash, "using last-known-good policy");
                return lkg;
            }
            tracing::warn!(hash = %lkg.hash, "last-known-good policy invalid");
        }

        let mut fallback = self.default.clone();
        fallback.file_diagnostics = file_diagnostics;
        fallback.lkg_diagnostics = lkg_diagnostics;
        tracing::warn!(hash = %fallback.hash, "using built-in default policy");
        fallback
    }
}

fn evaluate_with(
    parser: &PolicyParser,
    validator: &PolicyValidator,
    source: PolicySource,
    text: &str,
) -> PolicyEffectiveResult {
    let normalized = normalize_line_endings(text);
    let hash = hash_bytes(normalized.as_bytes());
    let parsed = parser.parse(&normalized);

    let (snapshot, diagnostics, operating_mode) = match parsed.snapshot() {
        Some(snapshot) => {
            let validation = validator.validate(&snapshot);
            let diagnostics =
                merge_diagnostics([parsed.diagnostics(), validation.diagnostics.as_slice()]);
            let snapshot = if has_errors(&diagnostics) {
                None
            } else {
                Some(snapshot)
            };
            (snapshot, diagnostics, validation.operating_mode)
        }
        // A broken policy still reports the mode it declares.
        None => (
            None,
            parsed.diagnostics().to_vec(),
            OperatingMode::of_document(parsed.draft()),
        ),
    };

    let (live_status, reasons) = LiveStatus::derive(operating_mode, &diagnostics);
    let draft = parsed.draft();
    let profile_mode = draft
        .active_profile()
        .map(|p| p.mode.to_uppercase())
        .unwrap_or_else(|| "UNKNOWN".to_string());

    PolicyEffectiveResult {
        source,
        hash,
        active_profile: draft.global.active_profile.clone(),
        profile_mode,
        text: normalized,
        snapshot,
        operating_mode,
        live_status,
        reasons,
        diagnostics,
        file_diagnostics: Vec::new(),
        lkg_diagnostics: Vec::new(),
    }
}
