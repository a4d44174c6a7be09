// recorder.rs - Risk evaluation and durable history for accepted policies.
//
// Each accepted policy revision gets a directory under
// `<out>/policy/history/<hash>/`:
//
//   policy.txt      normalised policy text
//   policy.sha256   its hash
//   effective.txt   effective-state dump
//   eval.md         human-readable evaluation
//   eval.json       the same evaluation, structured
//
// `policy/history/index.jsonl` gains one line per recorded transition.
// All writes go through `atomic_write`.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::{PolicyDocument, ProfileSettings};
use crate::error::PolicyError;
use crate::fs_atomic::atomic_write;
use crate::report::render_effective_text;
use crate::resolver::{PolicyEffectiveResult, PolicySource};
use crate::service::OutputLayout;
use crate::snapshot::PolicySnapshot;

const LIVE_PROFILES: [&str; 2] = ["live_advisory", "live_pilot"];

/// How much a policy change widens what automation may do.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
        }
    }
}

/// Outcome of comparing a new policy against the one it replaces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyApplyEvaluation {
    /// `none` when there was no previous policy.
    pub previous_hash: String,
    pub new_hash: String,
    pub risk_level: RiskLevel,
    /// Sorted dotted paths of fields whose value changed.
    pub changed_fields: Vec<String>,
    /// Sorted human-readable flags.
    pub notes: Vec<String>,
}

impl PolicyApplyEvaluation {
    /// Render as `eval.md`.
    pub fn to_markdown(&self) -> String {
        let changed = if self.changed_fields.is_empty() {
            "none".to_string()
        } else {
            self.changed_fields.join(",")
        };
        let mut out = String::from("Policy Apply Evaluation\n");
        out.push_str(&format!("Previous: {}\n", self.previous_hash));
        out.push_str(&format!("New: {}\n", self.new_hash));
        out.push_str(&format!("Risk: {}\n", self.risk_level));
        out.push_str(&format!("ChangedFields: {}\n", changed));
        out.push_str("Notes:\n");
        for note in &self.notes {
            out.push_str(&format!("- {}\n", note));
        }
        out
    }
}

/// One line of `policy/history/index.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryIndexEntry {
    pub recorded_at: DateTime<Utc>,
    pub previous_hash: String,
    pub new_hash: String,
    pub risk_level: RiskLevel,
    pub source: String,
}

/// Evaluates policy transitions and writes their history.
#[derive(Debug, Clone)]
pub struct PolicyApplyRecorder {
    layout: OutputLayout,
}

impl PolicyApplyRecorder {
    pub fn new(out_root: impl Into<PathBuf>) -> Self {
        Self {
            layout: OutputLayout::new(out_root),
        }
    }

    pub fn history_dir(&self, hash: &str) -> PathBuf {
        self.layout.history_dir(hash)
    }

    pub fn index_path(&self) -> PathBuf {
        self.layout.history_index()
    }

    /// Compare `current` against `previous` without touching disk.
    pub fn evaluate(
        &self,
        current: &PolicySnapshot,
        previous: Option<&PolicySnapshot>,
        previous_hash: Option<&str>,
        new_hash: &str,
    ) -> PolicyApplyEvaluation {
        let previous = previous.map(|s| s.document());
        let current = current.document();
        let (removed, added) = prohibit_diff(current, previous);

        PolicyApplyEvaluation {
            previous_hash: previous_hash.unwrap_or("none").to_string(),
            new_hash: new_hash.to_string(),
            risk_level: risk_level(current, !removed.is_empty()),
            changed_fields: changed_fields(current, previous),
            notes: notes(current, &removed, &added),
        }
    }

    /// Evaluate an accepted policy and persist its history entry.
    ///
    /// `effective` must carry a snapshot; an invalid result is never recorded.
    pub fn record(
        &self,
        policy_path: &Path,
        effective: &PolicyEffectiveResult,
        previous: Option<&PolicySnapshot>,
        previous_hash: Option<&str>,
    ) -> Result<PolicyApplyEvaluation, PolicyError> {
        let snapshot = accepted_snapshot(effective)?;
        let eval = self.evaluate(snapshot, previous, previous_hash, &effective.hash);
        self.write_history(policy_path, effective, &eval)?;
        Ok(eval)
    }

    /// Persist the history entry for an evaluation made earlier.
    ///
    /// The directory files go first and the index line last, so the index
    /// only names revisions whose directory is complete.
    pub fn write_history(
        &self,
        policy_path: &Path,
        effective: &PolicyEffectiveResult,
        eval: &PolicyApplyEvaluation,
    ) -> Result<(), PolicyError> {
        accepted_snapshot(effective)?;

        let dir = self.history_dir(&effective.hash);
        atomic_write(&dir.join("policy.txt"), effective.text.as_bytes())?;
        atomic_write(&dir.join("policy.sha256"), effective.hash.as_bytes())?;
        atomic_write(
            &dir.join("effective.txt"),
            render_effective_text(policy_path, effective).as_bytes(),
        )?;
        atomic_write(&dir.join("eval.md"), eval.to_markdown().as_bytes())?;
        atomic_write(&dir.join("eval.json"), serde_json::to_string_pretty(eval)?.as_bytes())?;

        self.append_index(eval, effective.source)?;

        tracing::info!(
            hash = %eval.new_hash,
            previous = %eval.previous_hash,
            risk = %eval.risk_level,
            changed = eval.changed_fields.len(),
            "recorded policy history"
        );
        Ok(())
    }

    /// Load the index, oldest entry first. A missing index is empty.
    pub fn read_index(&self) -> Result<Vec<HistoryIndexEntry>, PolicyError> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path).map_err(|e| PolicyError::io(&path, e))?;
        let mut entries = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            entries.push(serde_json::from_str(line)?);
        }
        Ok(entries)
    }

    // The whole file is rewritten so readers never see a half-appended line.
    fn append_index(&self, eval: &PolicyApplyEvaluation, source: PolicySource) -> Result<(), PolicyError> {
        let path = self.index_path();
        let mut content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(PolicyError::io(&path, e)),
        };
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        let entry = HistoryIndexEntry {
            recorded_at: Utc::now(),
            previous_hash: eval.previous_hash.clone(),
            new_hash: eval.new_hash.clone(),
            risk_level: eval.risk_level,
            source: source.to_string(),
        };
        content.push_str(&serde_json::to_string(&entry)?);
        content.push('\n');
        atomic_write(&path, content.as_bytes())
    }
}

fn accepted_snapshot(effective: &PolicyEffectiveResult) -> Result<&PolicySnapshot, PolicyError> {
    effective.snapshot.as_ref().ok_or_else(|| PolicyError::NotAccepted {
        hash: effective.hash.clone(),
    })
}

fn risk_level(current: &PolicyDocument, prohibit_removed: bool) -> RiskLevel {
    let ai = &current.ai;
    if ai.allow_send_screenshots_to_model || ai.allow_send_audio_to_model || prohibit_removed {
        return RiskLevel::High;
    }
    if ai.enabled || live_requested(current) || !ai.allowed_tools().is_empty() {
        return RiskLevel::Medium;
    }
    RiskLevel::Low
}

fn live_requested(doc: &PolicyDocument) -> bool {
    doc.global
        .active_profile
        .get(..5)
        .is_some_and(|p| p.eq_ignore_ascii_case("live_"))
}

/// Prohibited items removed from and added to the list, compared
/// case-insensitively, each sorted.
fn prohibit_diff(current: &PolicyDocument, previous: Option<&PolicyDocument>) -> (Vec<String>, Vec<String>) {
    let now = current.ethics.prohibited();
    let before = previous.map(|p| p.ethics.prohibited()).unwrap_or_default();
    let mut removed: Vec<String> = before
        .iter()
        .filter(|x| !contains_ignore_case(&now, x))
        .cloned()
        .collect();
    let mut added: Vec<String> = match previous {
        Some(_) => now
            .iter()
            .filter(|x| !contains_ignore_case(&before, x))
            .cloned()
            .collect(),
        None => Vec::new(),
    };
    removed.sort_by_key(|s| s.to_lowercase());
    added.sort_by_key(|s| s.to_lowercase());
    (removed, added)
}

fn contains_ignore_case(list: &[String], item: &str) -> bool {
    list.iter().any(|x| x.eq_ignore_ascii_case(item))
}

fn notes(current: &PolicyDocument, removed: &[String], added: &[String]) -> Vec<String> {
    let ai = &current.ai;
    let mut notes = Vec::new();
    if ai.enabled {
        notes.push("AI enabled".to_string());
    }
    if ai.allow_send_screenshots_to_model {
        notes.push("Allow send screenshots to model".to_string());
    }
    if ai.allow_send_audio_to_model {
        notes.push("Allow send audio to model".to_string());
    }
    if !ai.allowed_tools().is_empty() {
        notes.push("Allowed tools configured".to_string());
    }
    if live_requested(current) {
        notes.push("LIVE active profile".to_string());
    }
    if !removed.is_empty() {
        notes.push(format!("Prohibit removed: {}", removed.join(",")));
    }
    if !added.is_empty() {
        notes.push(format!("Prohibit added: {}", added.join(",")));
    }
    if removed.is_empty() && added.is_empty() {
        notes.push("Prohibit list unchanged".to_string());
    }
    notes.sort();
    notes
}

fn changed_fields(current: &PolicyDocument, previous: Option<&PolicyDocument>) -> Vec<String> {
    // Field values as strings; `None` for "no previous policy".
    type Getter = fn(&PolicyDocument) -> String;
    let tracked: [(&str, Getter); 9] = [
        ("global.activeProfile", |d: &PolicyDocument| d.global.active_profile.clone()),
        ("ai.enabled", |d: &PolicyDocument| d.ai.enabled.to_string()),
        ("ai.provider", |d: &PolicyDocument| d.ai.provider.clone()),
        ("ai.model", |d: &PolicyDocument| d.ai.model.clone()),
        ("ai.allowedTools", |d: &PolicyDocument| d.ai.allowed_tools.clone().unwrap_or_default()),
        ("ai.deniedTools", |d: &PolicyDocument| d.ai.denied_tools.clone().unwrap_or_default()),
        ("ethics.prohibit", |d: &PolicyDocument| d.ethics.prohibit.clone()),
        ("privacy.storeScreenshots", |d: &PolicyDocument| d.ethics.privacy_store_screenshots.to_string()),
        ("privacy.storeAudio", |d: &PolicyDocument| d.ethics.privacy_store_audio.to_string()),
    ];

    let mut fields = Vec::new();
    for (name, get) in tracked {
        let before = previous.map(get).unwrap_or_default();
        if !before.eq_ignore_ascii_case(&get(current)) {
            fields.push(name.to_string());
        }
    }

    for name in LIVE_PROFILES {
        let now = current.profile(name);
        let before = previous.and_then(|p| p.profile(name));
        let mode = |p: Option<&ProfileSettings>| p.map(|p| p.mode.clone()).unwrap_or_default();
        let autonomy = |p: Option<&ProfileSettings>| p.map(|p| p.autonomy.clone()).unwrap_or_default();
        if !mode(before).eq_ignore_ascii_case(&mode(now)) {
            fields.push(format!("profile.{}.mode", name));
        }
        if !autonomy(before).eq_ignore_ascii_case(&autonomy(now)) {
            fields.push(format!("profile.{}.autonomy", name));
        }
    }

    fields.sort();
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(edit: impl FnOnce(&mut PolicyDocument)) -> PolicySnapshot {
        let mut doc = PolicyDocument::with_required_profiles();
        doc.ethics.prohibit = "unauthorized_access,bypass_protections".to_string();
        edit(&mut doc);
        PolicySnapshot::from_document(doc)
    }

    fn recorder() -> PolicyApplyRecorder {
        PolicyApplyRecorder::new("/unused")
    }

    #[test]
    fn identical_snapshots_are_low_risk_with_no_changes() {
        let prev = snapshot(|_| {});
        let cur = snapshot(|_| {});
        let eval = recorder().evaluate(&cur, Some(&prev), Some("aaa"), "aaa");
        assert_eq!(eval.risk_level, RiskLevel::Low);
        assert!(eval.changed_fields.is_empty());
        assert_eq!(eval.notes, vec!["Prohibit list unchanged"]);
        assert_eq!(eval.previous_hash, "aaa");
    }

    #[test]
    fn removed_prohibit_is_high_risk() {
        let prev = snapshot(|_| {});
        let cur = snapshot(|d| d.ethics.prohibit = "unauthorized_access".to_string());
        let eval = recorder().evaluate(&cur, Some(&prev), None, "bbb");
        assert_eq!(eval.risk_level, RiskLevel::High);
        assert!(eval.changed_fields.contains(&"ethics.prohibit".to_string()));
        assert!(eval.notes.contains(&"Prohibit removed: bypass_protections".to_string()));
        assert_eq!(eval.previous_hash, "none");
    }

    #[test]
    fn prohibit_comparison_ignores_case_and_spacing() {
        let prev = snapshot(|_| {});
        let cur = snapshot(|d| d.ethics.prohibit = " Unauthorized_Access , BYPASS_PROTECTIONS ".to_string());
        let eval = recorder().evaluate(&cur, Some(&prev), None, "c");
        assert_eq!(eval.risk_level, RiskLevel::Low);
        assert!(eval.notes.contains(&"Prohibit list unchanged".to_string()));
    }

    #[test]
    fn added_prohibit_is_noted_but_not_risky() {
        let prev = snapshot(|_| {});
        let cur = snapshot(|d| d.ethics.prohibit.push_str(",data_exfiltration"));
        let eval = recorder().evaluate(&cur, Some(&prev), None, "c");
        assert_eq!(eval.risk_level, RiskLevel::Low);
        assert_eq!(eval.notes, vec!["Prohibit added: data_exfiltration"]);
    }

    #[test]
    fn sending_media_to_model_is_high_risk() {
        let prev = snapshot(|_| {});
        let audio = snapshot(|d| d.ai.allow_send_audio_to_model = true);
        let shots = snapshot(|d| d.ai.allow_send_screenshots_to_model = true);
        assert_eq!(recorder().evaluate(&audio, Some(&prev), None, "x").risk_level, RiskLevel::High);
        assert_eq!(recorder().evaluate(&shots, Some(&prev), None, "x").risk_level, RiskLevel::High);
    }

    #[test]
    fn medium_risk_triggers() {
        let prev = snapshot(|_| {});
        let enabled = snapshot(|d| d.ai.enabled = true);
        let live = snapshot(|d| d.global.active_profile = "Live_Advisory".to_string());
        let tools = snapshot(|d| d.ai.allowed_tools = Some("tool1".to_string()));

        let eval = recorder().evaluate(&enabled, Some(&prev), None, "x");
        assert_eq!(eval.risk_level, RiskLevel::Medium);
        assert_eq!(eval.changed_fields, vec!["ai.enabled"]);
        assert!(eval.notes.contains(&"AI enabled".to_string()));

        let eval = recorder().evaluate(&live, Some(&prev), None, "x");
        assert_eq!(eval.risk_level, RiskLevel::Medium);
        assert!(eval.notes.contains(&"LIVE active profile".to_string()));

        let eval = recorder().evaluate(&tools, Some(&prev), None, "x");
        assert_eq!(eval.risk_level, RiskLevel::Medium);
        assert_eq!(eval.changed_fields, vec!["ai.allowedTools"]);
    }

    #[test]
    fn live_profile_fields_are_tracked() {
        let prev = snapshot(|_| {});
        let cur = snapshot(|d| {
            d.insert_profile(ProfileSettings::new("live_pilot", "live", "advisory"));
        });
        let eval = recorder().evaluate(&cur, Some(&prev), None, "x");
        assert_eq!(eval.changed_fields, vec!["profile.live_pilot.autonomy"]);
    }

    #[test]
    fn case_only_changes_are_not_changes() {
        let prev = snapshot(|_| {});
        let cur = snapshot(|d| d.ai.provider = "OpenAI".to_string());
        assert!(recorder().evaluate(&cur, Some(&prev), None, "x").changed_fields.is_empty());
    }

    #[test]
    fn first_policy_reports_everything_set_as_changed() {
        let cur = snapshot(|_| {});
        let eval = recorder().evaluate(&cur, None, None, "x");
        assert!(eval.changed_fields.contains(&"global.activeProfile".to_string()));
        assert!(eval.changed_fields.contains(&"profile.live_pilot.mode".to_string()));
        let mut sorted = eval.changed_fields.clone();
        sorted.sort();
        assert_eq!(eval.changed_fields, sorted);
    }

    #[test]
    fn markdown_layout() {
        let eval = PolicyApplyEvaluation {
            previous_hash: "none".to_string(),
            new_hash: "abc".to_string(),
            risk_level: RiskLevel::Medium,
            changed_fields: vec![],
            notes: vec!["AI enabled".to_string()],
        };
        assert_eq!(
            eval.to_markdown(),
            "Policy Apply Evaluation\nPrevious: none\nNew: abc\nRisk: MEDIUM\nChangedFields: none\nNotes:\n- AI enabled\n"
        );
        let json = serde_json::to_value(&eval).unwrap();
        assert_eq!(json["riskLevel"], "MEDIUM");
        assert_eq!(json["previousHash"], "none");
    }
}
