// parser.rs - Policy text parser.
//
// Policy files are line-oriented:
//
//   # comment            ; also a comment
//   [global]
//   schemaVersion = 1
//   [profile live_pilot]
//   mode = live
//   autonomy = pilot
//
// Parsing never fails. Every problem becomes a diagnostic, and a result
// with any Error diagnostic has no usable document. The parser:
//
// 1. Normalises line endings and walks the lines
// 2. Tracks the current section from `[...]` headers
// 3. Applies `key = value` lines (split on the first `=`) to the document
// 4. Reports unknown sections/keys once all lines are applied, so the
//    severity follows the final `denyUnknownKeys` regardless of where in
//    the file that flag appears
// 5. Runs the structural rules shared with the validator

use crate::diagnostic::{
    has_errors, sort_diagnostics, DiagnosticSeverity, PolicyDiagnostic, CODE_INVALID_BOOL,
    CODE_INVALID_ENTRY, CODE_PROFILE_MISSING, CODE_UNKNOWN_OR_UNDEFINED,
};
use crate::document::PolicyDocument;
use crate::hasher::normalize_line_endings;
use crate::snapshot::PolicySnapshot;
use crate::validator::structural_rules;

/// Outcome of parsing one policy text.
#[derive(Debug, Clone)]
pub struct PolicyLoadResult {
    draft: PolicyDocument,
    diagnostics: Vec<PolicyDiagnostic>,
}

impl PolicyLoadResult {
    /// The parsed document, or `None` when any Error diagnostic exists.
    pub fn document(&self) -> Option<&PolicyDocument> {
        if self.has_errors() {
            None
        } else {
            Some(&self.draft)
        }
    }

    /// Freeze the parsed document into a snapshot, if it is usable.
    pub fn snapshot(&self) -> Option<PolicySnapshot> {
        self.document()
            .map(|doc| PolicySnapshot::from_document(doc.clone()))
    }

    /// The document as far as parsing got, errors or not.
    ///
    /// Only for reporting what a broken policy *declares* (active profile,
    /// declared mode). Never act on it.
    pub fn draft(&self) -> &PolicyDocument {
        &self.draft
    }

    /// Diagnostics in canonical order.
    pub fn diagnostics(&self) -> &[PolicyDiagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<PolicyDiagnostic> {
        self.diagnostics
    }

    pub fn has_errors(&self) -> bool {
        has_errors(&self.diagnostics)
    }

    /// A result with no content beyond one diagnostic.
    pub(crate) fn failed(diagnostic: PolicyDiagnostic) -> Self {
        Self {
            draft: PolicyDocument::new(),
            diagnostics: vec![diagnostic],
        }
    }

    pub(crate) fn push_diagnostic(&mut self, diagnostic: PolicyDiagnostic) {
        self.diagnostics.push(diagnostic);
        sort_diagnostics(&mut self.diagnostics);
    }
}

/// Which section the parser is currently in.
enum Section {
    /// Before the first header.
    Preamble,
    Global,
    Ethics,
    Ai,
    /// Profile name as written in the header.
    Profile(String),
    /// Unknown or nameless section; its header was already reported.
    Skipped,
}

/// One `key = value` line.
struct Entry<'a> {
    key: &'a str,
    value: &'a str,
    line: usize,
}

/// An unknown section or key whose severity is decided after parsing.
struct Unknown {
    section: String,
    key: String,
    line: usize,
    message: String,
}

/// Stateless parser. Construct once and reuse.
#[derive(Debug, Clone, Default)]
pub struct PolicyParser;

impl PolicyParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a policy text into a document plus diagnostics.
    pub fn parse(&self, text: &str) -> PolicyLoadResult {
        let normalized = normalize_line_endings(text);
        let mut doc = PolicyDocument::new();
        let mut diagnostics = Vec::new();
        let mut unknown = Vec::new();
        let mut section = Section::Preamble;

        for (index, raw) in normalized.split('\n').enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') && line.len() >= 2 {
                let name = line[1..line.len() - 1].trim();
                section = open_section(name, line_no, &mut diagnostics, &mut unknown);
                continue;
            }

            let (key, value) = match line.split_once('=') {
                Some((k, v)) if !k.trim().is_empty() => (k.trim(), v.trim()),
                _ => {
                    diagnostics.push(PolicyDiagnostic::error(
                        CODE_INVALID_ENTRY,
                        section_label(&section, &doc),
                        "",
                        Some(line_no),
                        format!("Invalid entry \"{}\" (expected key=value).", line),
                    ));
                    continue;
                }
            };
            let entry = Entry {
                key,
                value,
                line: line_no,
            };

            let known = match &section {
                Section::Preamble => false,
                Section::Global => apply_global(&mut doc, &entry, &mut diagnostics),
                Section::Ethics => apply_ethics(&mut doc, &entry, &mut diagnostics),
                Section::Ai => apply_ai(&mut doc, &entry, &mut diagnostics),
                Section::Profile(name) => apply_profile(&mut doc, name, &entry),
                Section::Skipped => true,
            };
            if !known {
                unknown.push(Unknown {
                    section: section_label(&section, &doc),
                    key: entry.key.to_string(),
                    line: line_no,
                    message: format!("Unknown key {}.", entry.key),
                });
            }
        }

        let severity = if doc.global.deny_unknown_keys {
            DiagnosticSeverity::Error
        } else {
            DiagnosticSeverity::Warning
        };
        for u in unknown {
            diagnostics.push(PolicyDiagnostic::new(
                CODE_UNKNOWN_OR_UNDEFINED,
                severity,
                u.section,
                u.key,
                Some(u.line),
                u.message,
            ));
        }

        structural_rules(&doc, &mut diagnostics);
        sort_diagnostics(&mut diagnostics);

        tracing::debug!(
            diagnostics = diagnostics.len(),
            errors = has_errors(&diagnostics),
            "parsed policy text"
        );

        PolicyLoadResult {
            draft: doc,
            diagnostics,
        }
    }
}

fn open_section(
    name: &str,
    line: usize,
    diagnostics: &mut Vec<PolicyDiagnostic>,
    unknown: &mut Vec<Unknown>,
) -> Section {
    match name.to_ascii_lowercase().as_str() {
        "global" => return Section::Global,
        "ethics" => return Section::Ethics,
        "ai" => return Section::Ai,
        "profile" => {
            diagnostics.push(PolicyDiagnostic::error(
                CODE_PROFILE_MISSING,
                name,
                "",
                Some(line),
                "Profile section missing name (use [profile <name>]).",
            ));
            return Section::Skipped;
        }
        _ => {}
    }

    if let Some((head, rest)) = name.split_once(char::is_whitespace) {
        if head.eq_ignore_ascii_case("profile") {
            // The profile itself is created by its first entry.
            return Section::Profile(rest.trim().to_string());
        }
    }

    unknown.push(Unknown {
        section: name.to_string(),
        key: String::new(),
        line,
        message: format!("Unknown section [{}].", name),
    });
    Section::Skipped
}

fn section_label(section: &Section, doc: &PolicyDocument) -> String {
    match section {
        Section::Preamble | Section::Skipped => String::new(),
        Section::Global => "global".to_string(),
        Section::Ethics => "ethics".to_string(),
        Section::Ai => "ai".to_string(),
        Section::Profile(key) => {
            let name = doc.profile(key).map(|p| p.name.as_str()).unwrap_or(key);
            format!("profile {}", name)
        }
    }
}

// Each apply_* returns false when the key is not part of the section.

fn apply_global(doc: &mut PolicyDocument, entry: &Entry, diags: &mut Vec<PolicyDiagnostic>) -> bool {
    let global = &mut doc.global;
    match entry.key.to_ascii_lowercase().as_str() {
        "schemaversion" => match entry.value.parse::<i64>() {
            Ok(v) => global.schema_version = v,
            Err(_) => diags.push(invalid(
                "global",
                entry,
                CODE_INVALID_ENTRY,
                "schemaVersion must be an integer.",
            )),
        },
        "activeprofile" => global.active_profile = entry.value.to_string(),
        "oninvalidconfig" => global.on_invalid_config = entry.value.to_string(),
        "requireallprofilesvalid" => {
            assign_bool(&mut global.require_all_profiles_valid, "global", entry, diags)
        }
        "denyunknowncapabilities" => {
            assign_bool(&mut global.deny_unknown_capabilities, "global", entry, diags)
        }
        "denyunknownkeys" => assign_bool(&mut global.deny_unknown_keys, "global", entry, diags),
        "livemeanslive" => assign_bool(&mut global.live_means_live, "global", entry, diags),
        "safewrites" => global.safe_writes = entry.value.to_string(),
        _ => return false,
    }
    true
}

fn apply_ethics(doc: &mut PolicyDocument, entry: &Entry, diags: &mut Vec<PolicyDiagnostic>) -> bool {
    let ethics = &mut doc.ethics;
    match entry.key.to_ascii_lowercase().as_str() {
        "purpose" => ethics.purpose = entry.value.to_string(),
        "requireconsentforenvironmentcontrol" => assign_bool(
            &mut ethics.require_consent_for_environment_control,
            "ethics",
            entry,
            diags,
        ),
        "prohibit" => ethics.prohibit = entry.value.to_string(),
        "privacy.nosecretsinlogs" => {
            assign_bool(&mut ethics.privacy_no_secrets_in_logs, "ethics", entry, diags)
        }
        "privacy.storescreenshots" => {
            assign_bool(&mut ethics.privacy_store_screenshots, "ethics", entry, diags)
        }
        "privacy.storeaudio" => assign_bool(&mut ethics.privacy_store_audio, "ethics", entry, diags),
        _ => return false,
    }
    true
}

fn apply_profile(doc: &mut PolicyDocument, name: &str, entry: &Entry) -> bool {
    match entry.key.to_ascii_lowercase().as_str() {
        "mode" => doc.profile_entry(name).mode = entry.value.to_string(),
        "autonomy" => doc.profile_entry(name).autonomy = entry.value.to_string(),
        _ => return false,
    }
    true
}

fn apply_ai(doc: &mut PolicyDocument, entry: &Entry, diags: &mut Vec<PolicyDiagnostic>) -> bool {
    let ai = &mut doc.ai;
    let value = entry.value;
    match entry.key.to_ascii_lowercase().as_str() {
        "enabled" => assign_bool(&mut ai.enabled, "ai", entry, diags),
        "provider" => ai.provider = value.to_string(),
        "apikeyenv" => ai.api_key_env = value.to_string(),
        "endpoint" => ai.endpoint = Some(value.to_string()),
        "model" => ai.model = value.to_string(),
        "temperature" => match value.parse::<f64>() {
            Ok(t) if t.is_finite() => ai.temperature = t,
            _ => diags.push(invalid(
                "ai",
                entry,
                CODE_INVALID_ENTRY,
                "temperature must be numeric.",
            )),
        },
        "allowsendscreenshotstomodel" => {
            assign_bool(&mut ai.allow_send_screenshots_to_model, "ai", entry, diags)
        }
        "allowsendaudiotomodel" => {
            assign_bool(&mut ai.allow_send_audio_to_model, "ai", entry, diags)
        }
        "store" => assign_bool(&mut ai.store, "ai", entry, diags),
        "reasoningeffort" => ai.reasoning_effort = value.to_string(),
        "timeoutseconds" => match value.parse::<i64>() {
            Ok(v) => ai.timeout_seconds = v,
            Err(_) => diags.push(invalid(
                "ai",
                entry,
                CODE_INVALID_ENTRY,
                "timeoutSeconds must be integer.",
            )),
        },
        "maxoutputtokens" => match value.parse::<i64>() {
            Ok(v) => ai.max_output_tokens = v,
            Err(_) => diags.push(invalid(
                "ai",
                entry,
                CODE_INVALID_ENTRY,
                "maxOutputTokens must be integer.",
            )),
        },
        "usertag" => ai.user_tag = Some(value.to_string()),
        "allowedtools" => ai.allowed_tools = Some(value.to_string()),
        "deniedtools" => ai.denied_tools = Some(value.to_string()),
        _ => return false,
    }
    true
}

/// Booleans accept `true`/`false` only, in any letter case.
fn assign_bool(slot: &mut bool, section: &str, entry: &Entry, diags: &mut Vec<PolicyDiagnostic>) {
    if entry.value.eq_ignore_ascii_case("true") {
        *slot = true;
    } else if entry.value.eq_ignore_ascii_case("false") {
        *slot = false;
    } else {
        diags.push(invalid(
            section,
            entry,
            CODE_INVALID_BOOL,
            "Expected boolean (true/false).",
        ));
    }
}

fn invalid(section: &str, entry: &Entry, code: &str, message: &str) -> PolicyDiagnostic {
    PolicyDiagnostic::error(code, section, entry.key, Some(entry.line), message)
}
