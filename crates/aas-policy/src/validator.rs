// validator.rs - Cross-field safety rules and live-status derivation.
//
// The validator runs against an immutable PolicySnapshot and reports:
//
// 1. Diagnostics (schema, profiles, active profile, AI settings)
// 2. The operating mode, taken from the active profile's declared mode
// 3. The live status: READY or BLOCKED for LIVE policies, N/A otherwise
//
// Live-is-live: the operating mode comes only from the declared mode.
// Errors never downgrade a LIVE policy to another mode; they block it
// (LiveStatus::Blocked with reason AASLIVE001).
//
// The structural subset of these rules also runs at the end of parsing
// (see `structural_rules`). Both passes share the same functions so that
// identical problems produce identical diagnostics.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::diagnostic::{
    has_errors, sort_diagnostics, PolicyDiagnostic, CODE_LIVE_AUTONOMY, CODE_LIVE_BLOCKED,
    CODE_PROFILE_MISSING, CODE_SCHEMA, CODE_UNKNOWN_OR_UNDEFINED,
};
use crate::document::{PolicyDocument, REQUIRED_PROFILES};
use crate::snapshot::PolicySnapshot;

const VALID_MODES: [&str; 3] = ["catalog", "simulation", "live"];
const VALID_AUTONOMY: [&str; 2] = ["advisory", "pilot"];
const VALID_PROVIDERS: [&str; 3] = ["openai", "http", "none"];
const VALID_REASONING_EFFORT: [&str; 4] = ["none", "medium", "high", "xhigh"];

/// Effective operating mode, derived from the active profile's mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperatingMode {
    Catalog,
    Simulation,
    Live,
    Unknown,
}

impl OperatingMode {
    /// Map a declared profile mode (any case) to an operating mode.
    pub fn from_profile_mode(mode: &str) -> Self {
        match mode.to_ascii_uppercase().as_str() {
            "CATALOG" => OperatingMode::Catalog,
            "SIMULATION" => OperatingMode::Simulation,
            "LIVE" => OperatingMode::Live,
            _ => OperatingMode::Unknown,
        }
    }

    /// The mode a document declares through its active profile.
    pub fn of_document(document: &PolicyDocument) -> Self {
        document
            .active_profile()
            .map(|p| Self::from_profile_mode(&p.mode))
            .unwrap_or(OperatingMode::Unknown)
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatingMode::Catalog => write!(f, "CATALOG"),
            OperatingMode::Simulation => write!(f, "SIMULATION"),
            OperatingMode::Live => write!(f, "LIVE"),
            OperatingMode::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Whether a LIVE policy may act. Only meaningful in LIVE mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LiveStatus {
    #[serde(rename = "READY")]
    Ready,
    #[serde(rename = "BLOCKED")]
    Blocked,
    #[serde(rename = "N/A")]
    NotApplicable,
}

impl LiveStatus {
    /// Live status and reasons for a mode given the candidate's diagnostics.
    pub fn derive(mode: OperatingMode, diagnostics: &[PolicyDiagnostic]) -> (Self, Vec<String>) {
        if mode != OperatingMode::Live {
            return (LiveStatus::NotApplicable, Vec::new());
        }
        if has_errors(diagnostics) {
            (LiveStatus::Blocked, vec![CODE_LIVE_BLOCKED.to_string()])
        } else {
            (LiveStatus::Ready, Vec::new())
        }
    }
}

impl fmt::Display for LiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiveStatus::Ready => write!(f, "READY"),
            LiveStatus::Blocked => write!(f, "BLOCKED"),
            LiveStatus::NotApplicable => write!(f, "N/A"),
        }
    }
}

/// Outcome of validating a snapshot.
#[derive(Debug, Clone)]
pub struct PolicyValidationResult {
    pub snapshot: PolicySnapshot,
    /// Sorted in canonical order.
    pub diagnostics: Vec<PolicyDiagnostic>,
    pub operating_mode: OperatingMode,
    pub live_status: LiveStatus,
    /// Sorted reason codes (e.g. `AASLIVE001`).
    pub reasons: Vec<String>,
}

impl PolicyValidationResult {
    pub fn has_errors(&self) -> bool {
        has_errors(&self.diagnostics)
    }
}

/// Stateless validator. Construct once and reuse.
#[derive(Debug, Clone, Default)]
pub struct PolicyValidator;

impl PolicyValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a snapshot. Never fails; problems come back as diagnostics.
    pub fn validate(&self, snapshot: &PolicySnapshot) -> PolicyValidationResult {
        let doc = snapshot.document();
        let mut diagnostics = Vec::new();

        structural_rules(doc, &mut diagnostics);
        check_safe_writes(doc, &mut diagnostics);
        check_autonomy_values(doc, &mut diagnostics);
        check_ai_limits(doc, &mut diagnostics);

        sort_diagnostics(&mut diagnostics);

        let operating_mode = OperatingMode::of_document(doc);
        let (live_status, mut reasons) = LiveStatus::derive(operating_mode, &diagnostics);
        reasons.sort();

        PolicyValidationResult {
            snapshot: snapshot.clone(),
            diagnostics,
            operating_mode,
            live_status,
            reasons,
        }
    }
}

/// Rules that both the parser's final pass and the validator apply.
pub(crate) fn structural_rules(doc: &PolicyDocument, out: &mut Vec<PolicyDiagnostic>) {
    check_schema_version(doc, out);
    check_required_profiles(doc, out);
    check_profile_modes(doc, out);
    check_active_profile(doc, out);
    check_ai_provider(doc, out);
}

fn check_schema_version(doc: &PolicyDocument, out: &mut Vec<PolicyDiagnostic>) {
    if doc.global.schema_version != 1 {
        out.push(PolicyDiagnostic::error(
            CODE_SCHEMA,
            "global",
            "schemaVersion",
            None,
            "Unsupported schemaVersion (expected 1).",
        ));
    }
}

fn check_required_profiles(doc: &PolicyDocument, out: &mut Vec<PolicyDiagnostic>) {
    for name in REQUIRED_PROFILES {
        if doc.has_profile(name) {
            continue;
        }
        let message = format!("Missing required profile \"{}\".", name);
        out.push(if doc.global.require_all_profiles_valid {
            PolicyDiagnostic::error(CODE_PROFILE_MISSING, "profiles", name, None, message)
        } else {
            PolicyDiagnostic::warning(CODE_PROFILE_MISSING, "profiles", name, None, message)
        });
    }
}

fn check_profile_modes(doc: &PolicyDocument, out: &mut Vec<PolicyDiagnostic>) {
    for profile in doc.profiles() {
        let section = format!("profile {}", profile.name);
        if !is_one_of(&profile.mode, &VALID_MODES) {
            out.push(PolicyDiagnostic::error(
                CODE_SCHEMA,
                section.as_str(),
                "mode",
                None,
                format!(
                    "Invalid mode \"{}\" (expected catalog|simulation|live).",
                    profile.mode
                ),
            ));
        }
        if profile.is_live() && profile.autonomy.trim().is_empty() {
            out.push(PolicyDiagnostic::error(
                CODE_LIVE_AUTONOMY,
                section,
                "autonomy",
                None,
                "Autonomy is required for live profiles.",
            ));
        }
    }
}

fn check_active_profile(doc: &PolicyDocument, out: &mut Vec<PolicyDiagnostic>) {
    if !doc.has_profile(&doc.global.active_profile) {
        out.push(PolicyDiagnostic::error(
            CODE_UNKNOWN_OR_UNDEFINED,
            "global",
            "activeProfile",
            None,
            format!(
                "Active profile \"{}\" is not defined.",
                doc.global.active_profile
            ),
        ));
    }
}

fn check_ai_provider(doc: &PolicyDocument, out: &mut Vec<PolicyDiagnostic>) {
    let ai = &doc.ai;
    if !is_one_of(&ai.provider, &VALID_PROVIDERS) {
        out.push(PolicyDiagnostic::error(
            CODE_SCHEMA,
            "ai",
            "provider",
            None,
            "Provider must be openai|http|none.",
        ));
    }
    if !ai.enabled {
        return;
    }
    if ai.provider.eq_ignore_ascii_case("openai") && ai.api_key_env.trim().is_empty() {
        out.push(PolicyDiagnostic::error(
            CODE_UNKNOWN_OR_UNDEFINED,
            "ai",
            "apiKeyEnv",
            None,
            "apiKeyEnv is required when provider=openai.",
        ));
    }
    let endpoint_missing = ai.endpoint.as_deref().map_or(true, |e| e.trim().is_empty());
    if ai.provider.eq_ignore_ascii_case("http") && endpoint_missing {
        out.push(PolicyDiagnostic::error(
            CODE_UNKNOWN_OR_UNDEFINED,
            "ai",
            "endpoint",
            None,
            "endpoint is required when provider=http.",
        ));
    }
}

fn check_safe_writes(doc: &PolicyDocument, out: &mut Vec<PolicyDiagnostic>) {
    if !doc.global.safe_writes.eq_ignore_ascii_case("outOnly") {
        out.push(PolicyDiagnostic::error(
            CODE_SCHEMA,
            "global",
            "safeWrites",
            None,
            "safeWrites must be outOnly.",
        ));
    }
}

fn check_autonomy_values(doc: &PolicyDocument, out: &mut Vec<PolicyDiagnostic>) {
    for profile in doc.profiles() {
        let autonomy = profile.autonomy.trim();
        if profile.is_live() && !autonomy.is_empty() && !is_one_of(autonomy, &VALID_AUTONOMY) {
            out.push(PolicyDiagnostic::error(
                CODE_LIVE_AUTONOMY,
                format!("profile {}", profile.name),
                "autonomy",
                None,
                format!(
                    "Invalid autonomy \"{}\" (expected advisory|pilot).",
                    profile.autonomy
                ),
            ));
        }
    }
}

fn check_ai_limits(doc: &PolicyDocument, out: &mut Vec<PolicyDiagnostic>) {
    let ai = &doc.ai;
    if !is_one_of(&ai.reasoning_effort, &VALID_REASONING_EFFORT) {
        out.push(PolicyDiagnostic::error(
            CODE_SCHEMA,
            "ai",
            "reasoningEffort",
            None,
            "reasoningEffort must be none|medium|high|xhigh.",
        ));
    }
    if !(1..=600).contains(&ai.timeout_seconds) {
        out.push(PolicyDiagnostic::error(
            CODE_SCHEMA,
            "ai",
            "timeoutSeconds",
            None,
            "timeoutSeconds must be between 1 and 600.",
        ));
    }
    if !(1..=16384).contains(&ai.max_output_tokens) {
        out.push(PolicyDiagnostic::error(
            CODE_SCHEMA,
            "ai",
            "maxOutputTokens",
            None,
            "maxOutputTokens must be between 1 and 16384.",
        ));
    }
    // Temperature is ignored by the model once a reasoning effort is set.
    if !ai.reasoning_effort.eq_ignore_ascii_case("none") && ai.temperature != 0.0 {
        out.push(PolicyDiagnostic::warning(
            CODE_SCHEMA,
            "ai",
            "temperature",
            None,
            "temperature is only supported when reasoningEffort=none.",
        ));
    }
}

fn is_one_of(value: &str, allowed: &[&str]) -> bool {
    allowed.iter().any(|a| value.eq_ignore_ascii_case(a))
}
