// service.rs - Persistence facade over the output root.
//
// Layout under `<out>`:
//
//   system/policy.lkg.txt           last-known-good text (normalised)
//   system/policy.lkg.sha256        its hash
//   system/policy.rejected.txt      diagnostics of the last rejected edit
//   system/policy.diagnostics.txt   diagnostics of the last load
//   system/policy.watch.last.txt    status of the current effective policy
//   system/policy.effective.txt     full effective dump
//   system/policy.effective.json    the same, structured
//   policy/history/<hash>/...       see recorder.rs
//
// The service never writes outside the output root.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::diagnostic::{render_dump, PolicyDiagnostic, CODE_LKG_INVALID, CODE_LKG_MISSING};
use crate::error::PolicyError;
use crate::fs_atomic::atomic_write;
use crate::hasher::{hash_bytes, normalize_line_endings};
use crate::parser::{PolicyLoadResult, PolicyParser};
use crate::report::{render_effective_dump, render_watch_last, EffectiveReport};
use crate::resolver::PolicyEffectiveResult;

/// Paths of every file the engine writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    out_root: PathBuf,
}

impl OutputLayout {
    pub fn new(out_root: impl Into<PathBuf>) -> Self {
        Self {
            out_root: out_root.into(),
        }
    }

    pub fn out_root(&self) -> &Path {
        &self.out_root
    }

    pub fn system_dir(&self) -> PathBuf {
        self.out_root.join("system")
    }

    pub fn lkg_text(&self) -> PathBuf {
        self.system_dir().join("policy.lkg.txt")
    }

    pub fn lkg_hash(&self) -> PathBuf {
        self.system_dir().join("policy.lkg.sha256")
    }

    pub fn rejected(&self) -> PathBuf {
        self.system_dir().join("policy.rejected.txt")
    }

    pub fn diagnostics(&self) -> PathBuf {
        self.system_dir().join("policy.diagnostics.txt")
    }

    pub fn watch_last(&self) -> PathBuf {
        self.system_dir().join("policy.watch.last.txt")
    }

    pub fn effective_text(&self) -> PathBuf {
        self.system_dir().join("policy.effective.txt")
    }

    pub fn effective_json(&self) -> PathBuf {
        self.system_dir().join("policy.effective.json")
    }

    pub fn history_dir(&self, hash: &str) -> PathBuf {
        self.out_root.join("policy").join("history").join(hash)
    }

    pub fn history_index(&self) -> PathBuf {
        self.out_root.join("policy").join("history").join("index.jsonl")
    }
}

/// Loads policy files and persists engine state under an output root.
#[derive(Debug, Clone)]
pub struct PolicyService {
    parser: PolicyParser,
    layout: OutputLayout,
}

impl PolicyService {
    pub fn new(out_root: impl Into<PathBuf>) -> Self {
        Self {
            parser: PolicyParser::new(),
            layout: OutputLayout::new(out_root),
        }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Parse the policy file. A missing file parses as empty text.
    pub fn load(&self, policy_path: &Path) -> Result<PolicyLoadResult, PolicyError> {
        let text = read_optional(policy_path)?.unwrap_or_default();
        Ok(self.parser.parse(&text))
    }

    /// Write accepted text as the new LKG. Returns the hash written.
    pub fn write_lkg(&self, text: &str) -> Result<String, PolicyError> {
        let normalized = normalize_line_endings(text);
        let hash = hash_bytes(normalized.as_bytes());
        atomic_write(&self.layout.lkg_text(), normalized.as_bytes())?;
        atomic_write(&self.layout.lkg_hash(), hash.as_bytes())?;
        tracing::debug!(hash = %hash, "wrote last-known-good policy");
        Ok(hash)
    }

    /// The stored LKG text, if any.
    pub fn read_lkg_text(&self) -> Result<Option<String>, PolicyError> {
        read_optional(&self.layout.lkg_text())
    }

    /// Parse the stored LKG.
    ///
    /// A missing LKG yields a single `POL990` error. An LKG that does not
    /// parse keeps its parse diagnostics and gains a `POL991` error.
    pub fn try_load_lkg(&self) -> Result<PolicyLoadResult, PolicyError> {
        let path = self.layout.lkg_text();
        let text = match read_optional(&path)? {
            Some(text) => text,
            None => {
                return Ok(PolicyLoadResult::failed(PolicyDiagnostic::error(
                    CODE_LKG_MISSING,
                    "lkg",
                    "file",
                    None,
                    format!("No last-known-good policy at {}.", path.display()),
                )))
            }
        };
        let mut result = self.parser.parse(&text);
        if result.has_errors() {
            result.push_diagnostic(PolicyDiagnostic::error(
                CODE_LKG_INVALID,
                "lkg",
                "file",
                None,
                "Last-known-good policy is invalid.",
            ));
        }
        Ok(result)
    }

    pub fn write_rejected(&self, diagnostics: &[PolicyDiagnostic]) -> Result<(), PolicyError> {
        atomic_write(&self.layout.rejected(), render_dump(diagnostics).as_bytes())
    }

    pub fn write_diagnostics(&self, diagnostics: &[PolicyDiagnostic]) -> Result<(), PolicyError> {
        atomic_write(&self.layout.diagnostics(), render_dump(diagnostics).as_bytes())
    }

    pub fn write_watch_last(&self, effective: &PolicyEffectiveResult) -> Result<(), PolicyError> {
        atomic_write(&self.layout.watch_last(), render_watch_last(effective).as_bytes())
    }

    /// Write `policy.effective.txt` and `policy.effective.json`.
    pub fn write_effective(
        &self,
        policy_path: &Path,
        effective: &PolicyEffectiveResult,
    ) -> Result<(), PolicyError> {
        atomic_write(
            &self.layout.effective_text(),
            render_effective_dump(policy_path, effective).as_bytes(),
        )?;
        let report = EffectiveReport::new(policy_path, effective);
        atomic_write(
            &self.layout.effective_json(),
            serde_json::to_string_pretty(&report)?.as_bytes(),
        )
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, PolicyError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PolicyError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::DEFAULT_POLICY_TEXT;
    use crate::hasher::hash_policy_text;

    #[test]
    fn missing_policy_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let svc = PolicyService::new(dir.path());
        let result = svc.load(&dir.path().join("absent.txt")).unwrap();
        assert!(result.has_errors());
        assert!(result.document().is_none());
    }

    #[test]
    fn lkg_round_trip_normalises_text() {
        let dir = tempfile::tempdir().unwrap();
        let svc = PolicyService::new(dir.path());
        let crlf = DEFAULT_POLICY_TEXT.replace('\n', "\r\n");

        let hash = svc.write_lkg(&crlf).unwrap();
        assert_eq!(hash, hash_policy_text(DEFAULT_POLICY_TEXT));
        assert_eq!(svc.read_lkg_text().unwrap().unwrap(), DEFAULT_POLICY_TEXT);
        assert_eq!(fs::read_to_string(svc.layout().lkg_hash()).unwrap(), hash);

        let loaded = svc.try_load_lkg().unwrap();
        assert!(loaded.document().is_some());
    }

    #[test]
    fn missing_lkg_is_pol990() {
        let dir = tempfile::tempdir().unwrap();
        let svc = PolicyService::new(dir.path());
        assert!(svc.read_lkg_text().unwrap().is_none());
        let result = svc.try_load_lkg().unwrap();
        assert_eq!(result.diagnostics().len(), 1);
        assert_eq!(result.diagnostics()[0].code, CODE_LKG_MISSING);
        assert!(result.has_errors());
    }

    #[test]
    fn invalid_lkg_is_pol991() {
        let dir = tempfile::tempdir().unwrap();
        let svc = PolicyService::new(dir.path());
        svc.write_lkg("[global]\nschemaVersion = 5\n").unwrap();
        let result = svc.try_load_lkg().unwrap();
        assert!(result.document().is_none());
        assert!(result.diagnostics().iter().any(|d| d.code == CODE_LKG_INVALID));
    }

    #[test]
    fn rejected_dump_uses_line_format() {
        let dir = tempfile::tempdir().unwrap();
        let svc = PolicyService::new(dir.path());
        let diags = vec![PolicyDiagnostic::error(
            "AASPOL020",
            "global",
            "schemaVersion",
            None,
            "Unsupported schemaVersion (expected 1).",
        )];
        svc.write_rejected(&diags).unwrap();
        assert_eq!(
            fs::read_to_string(svc.layout().rejected()).unwrap(),
            "AASPOL020 | Error | global.schemaVersion | - | Unsupported schemaVersion (expected 1).\n"
        );
    }

    #[test]
    fn layout_paths() {
        let layout = OutputLayout::new("/out");
        assert_eq!(layout.lkg_text(), Path::new("/out/system/policy.lkg.txt"));
        assert_eq!(layout.watch_last(), Path::new("/out/system/policy.watch.last.txt"));
        assert_eq!(layout.history_dir("ab"), Path::new("/out/policy/history/ab"));
        assert_eq!(layout.history_index(), Path::new("/out/policy/history/index.jsonl"));
    }
}
