// report.rs - Text and JSON renderings of an effective policy.
//
// These strings land in `system/policy.effective.*`, `system/policy.watch.last.txt`
// and each history entry's `effective.txt`. Tooling greps them, so the key
// names and ordering are fixed.

use std::path::Path;

use serde::Serialize;

use crate::diagnostic::{render_dump, top_codes, PolicyDiagnostic};
use crate::document::PolicyDocument;
use crate::resolver::{PolicyEffectiveResult, PolicySource};
use crate::validator::{LiveStatus, OperatingMode};

/// How many distinct file codes the effective dumps list.
pub const FILE_TOP_CODES: usize = 5;
/// How many distinct LKG codes the effective dumps list.
pub const LKG_TOP_CODES: usize = 3;

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(",")
    }
}

/// The effective-state dump stored in history entries.
pub fn render_effective_text(policy_path: &Path, effective: &PolicyEffectiveResult) -> String {
    let doc = effective.snapshot.as_ref().map(|s| s.document());
    let mut out = render_status_lines(effective, Some(policy_path));
    out.push_str(&ai_line(doc));
    out.push_str(&ethics_line(doc));
    out.push_str(&format!("Diagnostics: {}\n", effective.diagnostics.len()));
    out.push_str(&render_dump(&effective.diagnostics));
    out
}

/// `system/policy.effective.txt`: the history dump plus top file/LKG codes.
pub fn render_effective_dump(policy_path: &Path, effective: &PolicyEffectiveResult) -> String {
    let mut out = render_effective_text(policy_path, effective);
    out.push_str(&format!(
        "FileDiagnosticsTop: {}\n",
        join_or_none(&file_top(effective))
    ));
    out.push_str(&format!(
        "LkgDiagnosticsTop: {}\n",
        join_or_none(&lkg_top(effective))
    ));
    out
}

/// `system/policy.watch.last.txt`.
pub fn render_watch_last(effective: &PolicyEffectiveResult) -> String {
    render_status_lines(effective, None)
}

/// Single-line summary printed by one-shot resolution.
pub fn summary_line(effective: &PolicyEffectiveResult) -> String {
    format!(
        "Source={} hash={} activeProfile={} profileMode={} operatingMode={} liveStatus={} reasons={} diagCount={} fileTop={} lkgTop={}",
        effective.source,
        effective.hash,
        effective.active_profile,
        effective.profile_mode,
        effective.operating_mode,
        effective.live_status,
        join_or_none(&effective.reasons),
        effective.diagnostics.len(),
        join_or_none(&file_top(effective)),
        join_or_none(&lkg_top(effective)),
    )
}

fn file_top(effective: &PolicyEffectiveResult) -> Vec<String> {
    top_codes(&effective.file_diagnostics, FILE_TOP_CODES, true)
}

fn lkg_top(effective: &PolicyEffectiveResult) -> Vec<String> {
    top_codes(&effective.lkg_diagnostics, LKG_TOP_CODES, true)
}

fn render_status_lines(effective: &PolicyEffectiveResult, policy_path: Option<&Path>) -> String {
    let mut out = format!("Source: {}\n", effective.source);
    if let Some(path) = policy_path {
        out.push_str(&format!("File: {}\n", path.display()));
    }
    out.push_str(&format!("Hash: {}\n", effective.hash));
    out.push_str(&format!("ActiveProfile: {}\n", effective.active_profile));
    out.push_str(&format!("ProfileMode: {}\n", effective.profile_mode));
    out.push_str(&format!("OperatingMode: {}\n", effective.operating_mode));
    out.push_str(&format!("LiveStatus: {}\n", effective.live_status));
    out.push_str(&format!("LiveReasons: {}\n", join_or_none(&effective.reasons)));
    out
}

// Without a valid snapshot, the summary lines show neutral values.

fn ai_line(doc: Option<&PolicyDocument>) -> String {
    match doc {
        Some(d) => format!(
            "AI: enabled={} provider={} model={} temperature={} apiKeyEnv={} allowSendScreenshotsToModel={} allowSendAudioToModel={}\n",
            d.ai.enabled,
            d.ai.provider,
            d.ai.model,
            d.ai.temperature,
            d.ai.api_key_env,
            d.ai.allow_send_screenshots_to_model,
            d.ai.allow_send_audio_to_model,
        ),
        None => "AI: enabled=false provider=none model= temperature=0 apiKeyEnv= allowSendScreenshotsToModel=false allowSendAudioToModel=false\n".to_string(),
    }
}

fn ethics_line(doc: Option<&PolicyDocument>) -> String {
    match doc {
        Some(d) => format!(
            "Ethics: purpose={} requireConsentForEnvironmentControl={} prohibit={} privacy.storeScreenshots={} privacy.storeAudio={}\n",
            d.ethics.purpose,
            d.ethics.require_consent_for_environment_control,
            d.ethics.prohibit,
            d.ethics.privacy_store_screenshots,
            d.ethics.privacy_store_audio,
        ),
        None => "Ethics: purpose= requireConsentForEnvironmentControl=false prohibit= privacy.storeScreenshots=false privacy.storeAudio=false\n".to_string(),
    }
}

// ── JSON ──

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiSummary {
    pub enabled: bool,
    pub provider: String,
    pub model: String,
    pub temperature: f64,
    pub api_key_env: String,
    pub allow_send_screenshots_to_model: bool,
    pub allow_send_audio_to_model: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EthicsSummary {
    pub purpose: String,
    pub require_consent_for_environment_control: bool,
    pub prohibit: String,
    pub privacy_store_screenshots: bool,
    pub privacy_store_audio: bool,
}

/// `system/policy.effective.json`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveReport {
    pub source: PolicySource,
    pub file: String,
    pub hash: String,
    pub active_profile: String,
    pub profile_mode: String,
    pub operating_mode: OperatingMode,
    pub live_status: LiveStatus,
    pub live_reasons: Vec<String>,
    pub ai: AiSummary,
    pub ethics: EthicsSummary,
    pub diagnostics: Vec<PolicyDiagnostic>,
    pub file_diagnostics_top: Vec<String>,
    pub lkg_diagnostics_top: Vec<String>,
}

impl EffectiveReport {
    pub fn new(policy_path: &Path, effective: &PolicyEffectiveResult) -> Self {
        let doc = effective.snapshot.as_ref().map(|s| s.document());
        let ai = match doc {
            Some(d) => AiSummary {
                enabled: d.ai.enabled,
                provider: d.ai.provider.clone(),
                model: d.ai.model.clone(),
                temperature: d.ai.temperature,
                api_key_env: d.ai.api_key_env.clone(),
                allow_send_screenshots_to_model: d.ai.allow_send_screenshots_to_model,
                allow_send_audio_to_model: d.ai.allow_send_audio_to_model,
            },
            None => AiSummary {
                enabled: false,
                provider: "none".to_string(),
                model: String::new(),
                temperature: 0.0,
                api_key_env: String::new(),
                allow_send_screenshots_to_model: false,
                allow_send_audio_to_model: false,
            },
        };
        let ethics = match doc {
            Some(d) => EthicsSummary {
                purpose: d.ethics.purpose.clone(),
                require_consent_for_environment_control: d.ethics.require_consent_for_environment_control,
                prohibit: d.ethics.prohibit.clone(),
                privacy_store_screenshots: d.ethics.privacy_store_screenshots,
                privacy_store_audio: d.ethics.privacy_store_audio,
            },
            None => EthicsSummary {
                purpose: String::new(),
                require_consent_for_environment_control: false,
                prohibit: String::new(),
                privacy_store_screenshots: false,
                privacy_store_audio: false,
            },
        };

        Self {
            source: effective.source,
            file: policy_path.display().to_string(),
            hash: effective.hash.clone(),
            active_profile: effective.active_profile.clone(),
            profile_mode: effective.profile_mode.clone(),
            operating_mode: effective.operating_mode,
            live_status: effective.live_status,
            live_reasons: effective.reasons.clone(),
            ai,
            ethics,
            diagnostics: effective.diagnostics.clone(),
            file_diagnostics_top: file_top(effective),
            lkg_diagnostics_top: lkg_top(effective),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::PolicyEffectiveResolver;

    fn resolver() -> PolicyEffectiveResolver {
        PolicyEffectiveResolver::with_builtin_default().unwrap()
    }

    #[test]
    fn effective_text_layout() {
        let effective = resolver().resolve(crate::defaults::DEFAULT_POLICY_TEXT, None);
        let text = render_effective_text(Path::new("aas.policy.txt"), &effective);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Source: FILE");
        assert_eq!(lines[1], "File: aas.policy.txt");
        assert_eq!(lines[2], format!("Hash: {}", effective.hash));
        assert_eq!(lines[3], "ActiveProfile: catalog");
        assert_eq!(lines[4], "ProfileMode: CATALOG");
        assert_eq!(lines[5], "OperatingMode: CATALOG");
        assert_eq!(lines[6], "LiveStatus: N/A");
        assert_eq!(lines[7], "LiveReasons: none");
        assert!(lines[8].starts_with("AI: enabled=false provider=none model=gpt-5.2-pro temperature=0 "));
        assert!(lines[9].starts_with("Ethics: purpose=educational_research "));
        assert_eq!(lines[10], "Diagnostics: 0");
        assert_eq!(lines.len(), 11);
    }

    #[test]
    fn effective_dump_lists_top_codes() {
        let effective = resolver().resolve("[global]\nschemaVersion = 2\n", None);
        let dump = render_effective_dump(Path::new("p.txt"), &effective);
        assert!(dump.starts_with("Source: DEFAULT\n"));
        let file_top = dump
            .lines()
            .find(|l| l.starts_with("FileDiagnosticsTop: "))
            .unwrap();
        assert!(file_top.contains("AASPOL020"));
        assert!(dump.ends_with("LkgDiagnosticsTop: none\n"));
    }

    #[test]
    fn watch_last_has_no_file_line() {
        let effective = resolver().resolve(crate::defaults::DEFAULT_POLICY_TEXT, None);
        let text = render_watch_last(&effective);
        assert_eq!(text.lines().count(), 7);
        assert!(!text.contains("File:"));
    }

    #[test]
    fn json_report_uses_camel_case_and_wire_enums() {
        let effective = resolver().resolve("", None);
        let report = EffectiveReport::new(Path::new("p.txt"), &effective);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["source"], "DEFAULT");
        assert_eq!(json["liveStatus"], "N/A");
        assert_eq!(json["operatingMode"], "CATALOG");
        assert_eq!(json["ai"]["allowSendAudioToModel"], false);
        assert!(json["fileDiagnosticsTop"].as_array().unwrap().len() <= FILE_TOP_CODES);
    }

    #[test]
    fn summary_line_fields() {
        let effective = resolver().resolve("", None);
        let line = summary_line(&effective);
        assert!(line.starts_with("Source=DEFAULT hash="));
        assert!(line.contains(" fileTop=AASPOL010,AASPOL011 "));
        assert!(line.ends_with("lkgTop=none"));
    }
}
