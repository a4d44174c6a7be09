// reconcile.rs - Single-writer owner of the current effective policy.
//
// The reconciler holds the "current" effective result and is the only code
// that replaces it. Readers get a PolicyHandle and see whole-value swaps:
// `current()` hands out an `Arc<PolicyEffectiveResult>` that never changes
// after it is published.
//
// One call to `evaluate_change` is one step of the watch state machine:
//
//   read (bounded retry) ──fail──▶ KEPT       current untouched
//        │
//   parse + validate ──errors──▶ REJECTED     rejected dump written
//        │
//   same hash as current ──────▶ UNCHANGED
//        │
//   write LKG ─────────fail──▶ KEPT       no history written
//        │
//   record history, swap current ──▶ ACCEPTED

use std::fmt;
use std::sync::{Arc, RwLock};

use crate::config::WatchConfig;
use crate::diagnostic::top_codes;
use crate::error::PolicyError;
use crate::fs_atomic::read_with_retry;
use crate::recorder::{PolicyApplyRecorder, RiskLevel};
use crate::resolver::{PolicyEffectiveResolver, PolicyEffectiveResult, PolicySource};
use crate::service::PolicyService;
use crate::validator::{LiveStatus, OperatingMode};

/// How many codes a REJECTED line carries.
const REJECTED_TOP_CODES: usize = 5;

/// Read-only, cloneable view of the current effective policy.
#[derive(Debug, Clone)]
pub struct PolicyHandle {
    current: Arc<RwLock<Arc<PolicyEffectiveResult>>>,
}

impl PolicyHandle {
    fn new(initial: PolicyEffectiveResult) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    /// The current effective policy. Cheap; holds the lock only to clone the Arc.
    pub fn current(&self) -> Arc<PolicyEffectiveResult> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn hash(&self) -> String {
        self.current().hash.clone()
    }

    fn replace(&self, next: PolicyEffectiveResult) {
        let next = Arc::new(next);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

/// Result of evaluating one change to the policy file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// A new valid policy replaced the current one.
    Accepted {
        hash: String,
        profile: String,
        mode: OperatingMode,
        live_status: LiveStatus,
        risk: RiskLevel,
    },
    /// The edit has error diagnostics; the current policy stays.
    Rejected { kept: String, codes: Vec<String> },
    /// The file content hashes to the current policy.
    Unchanged { hash: String },
    /// The file could not be read or the new state could not be persisted.
    Kept { kept: String, reason: String },
}

impl fmt::Display for WatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchOutcome::Accepted {
                hash,
                profile,
                mode,
                live_status,
                risk,
            } => write!(
                f,
                "ACCEPTED hash={} profile={} mode={} liveStatus={} risk={}",
                hash, profile, mode, live_status, risk
            ),
            WatchOutcome::Rejected { kept, codes } => {
                write!(f, "REJECTED kept={} codes={}", kept, codes.join(","))
            }
            WatchOutcome::Unchanged { hash } => write!(f, "UNCHANGED hash={}", hash),
            WatchOutcome::Kept { kept, reason } => write!(f, "KEPT {} kept={}", reason, kept),
        }
    }
}

/// Owns the current effective policy and applies file changes to it.
#[derive(Debug)]
pub struct PolicyReconciler {
    config: WatchConfig,
    resolver: PolicyEffectiveResolver,
    service: PolicyService,
    recorder: PolicyApplyRecorder,
    handle: PolicyHandle,
}

impl PolicyReconciler {
    /// Resolve the initial policy through the cascade and persist it.
    ///
    /// A valid FILE or LKG result becomes the running LKG. The file's
    /// diagnostics go to `policy.diagnostics.txt`. Output files that
    /// cannot be written are an error here, since nothing is running yet.
    pub fn initialize(
        config: WatchConfig,
        resolver: PolicyEffectiveResolver,
    ) -> Result<Self, PolicyError> {
        let service = PolicyService::new(&config.out_root);
        let recorder = PolicyApplyRecorder::new(&config.out_root);

        let file_text = match read_with_retry(
            &config.policy_path,
            config.read_attempts,
            config.read_backoff(),
        ) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    path = %config.policy_path.display(),
                    error = %e,
                    "policy file unreadable at startup, treating as empty"
                );
                String::new()
            }
        };
        let lkg_text = service.read_lkg_text().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "last-known-good policy unreadable");
            None
        });

        let initial = resolver.resolve(&file_text, lkg_text.as_deref());
        if initial.is_valid() && matches!(initial.source, PolicySource::File | PolicySource::Lkg) {
            service.write_lkg(&initial.text)?;
        }
        service.write_diagnostics(&initial.file_diagnostics)?;
        service.write_watch_last(&initial)?;
        service.write_effective(&config.policy_path, &initial)?;

        tracing::info!(
            source = %initial.source,
            hash = %initial.hash,
            profile = %initial.active_profile,
            mode = %initial.operating_mode,
            live_status = %initial.live_status,
            "policy initialized"
        );

        Ok(Self {
            handle: PolicyHandle::new(initial),
            config,
            resolver,
            service,
            recorder,
        })
    }

    pub fn handle(&self) -> PolicyHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    pub fn service(&self) -> &PolicyService {
        &self.service
    }

    /// `INIT Source=... hash=... ...` status line for the current policy.
    pub fn init_line(&self) -> String {
        let current = self.handle.current();
        format!(
            "INIT Source={} hash={} activeProfile={} profileMode={} operatingMode={} liveStatus={}",
            current.source,
            current.hash,
            current.active_profile,
            current.profile_mode,
            current.operating_mode,
            current.live_status
        )
    }

    /// Re-read the policy file and apply it if it is a valid new revision.
    pub fn evaluate_change(&self) -> WatchOutcome {
        let current = self.handle.current();
        let path = &self.config.policy_path;

        let text = match read_with_retry(path, self.config.read_attempts, self.config.read_backoff()) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, kept = %current.hash, "policy file unreadable");
                return WatchOutcome::Kept {
                    kept: current.hash.clone(),
                    reason: "fileLockedOrUnreadable".to_string(),
                };
            }
        };

        let mut candidate = self.resolver.evaluate(PolicySource::File, &text);
        if !candidate.is_valid() {
            if let Err(e) = self.service.write_rejected(&candidate.diagnostics) {
                tracing::warn!(error = %e, "failed to write rejected diagnostics");
            }
            let codes = top_codes(&candidate.diagnostics, REJECTED_TOP_CODES, false);
            tracing::warn!(
                kept = %current.hash,
                codes = %codes.join(","),
                "policy change rejected"
            );
            return WatchOutcome::Rejected {
                kept: current.hash.clone(),
                codes,
            };
        }

        if candidate.hash == current.hash && current.source == PolicySource::File {
            tracing::debug!(hash = %candidate.hash, "policy content unchanged");
            return WatchOutcome::Unchanged {
                hash: candidate.hash,
            };
        }

        candidate.file_diagnostics = candidate.diagnostics.clone();
        let Some(snapshot) = candidate.snapshot.as_ref() else {
            let error = PolicyError::NotAccepted {
                hash: candidate.hash.clone(),
            };
            return self.persist_failed(&current, error);
        };
        let eval = self.recorder.evaluate(
            snapshot,
            current.snapshot.as_ref(),
            Some(current.hash.as_str()),
            &candidate.hash,
        );

        // The LKG write is the commit point; history follows it.
        if let Err(e) = self.service.write_lkg(&candidate.text) {
            return self.persist_failed(&current, e);
        }
        if let Err(e) = self.recorder.write_history(path, &candidate, &eval) {
            tracing::error!(error = %e, hash = %candidate.hash, "failed to record policy history");
        }

        let outcome = WatchOutcome::Accepted {
            hash: candidate.hash.clone(),
            profile: candidate.active_profile.clone(),
            mode: candidate.operating_mode,
            live_status: candidate.live_status,
            risk: eval.risk_level,
        };

        self.handle.replace(candidate);
        let accepted = self.handle.current();
        if let Err(e) = self.service.write_watch_last(&accepted) {
            tracing::warn!(error = %e, "failed to write watch status");
        }
        if let Err(e) = self.service.write_effective(path, &accepted) {
            tracing::warn!(error = %e, "failed to write effective policy dump");
        }

        tracing::info!(
            hash = %accepted.hash,
            profile = %accepted.active_profile,
            mode = %accepted.operating_mode,
            live_status = %accepted.live_status,
            risk = %eval.risk_level,
            "policy change accepted"
        );
        outcome
    }

    fn persist_failed(&self, current: &PolicyEffectiveResult, error: PolicyError) -> WatchOutcome {
        tracing::error!(error = %error, kept = %current.hash, "failed to persist accepted policy");
        WatchOutcome::Kept {
            kept: current.hash.clone(),
            reason: "persistFailed".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::DEFAULT_POLICY_TEXT;
    use std::fs;

    fn setup(initial: Option<&str>) -> (tempfile::TempDir, PolicyReconciler) {
        let dir = tempfile::tempdir().unwrap();
        let config = WatchConfig::for_project(dir.path());
        if let Some(text) = initial {
            fs::write(&config.policy_path, text).unwrap();
        }
        let resolver = PolicyEffectiveResolver::with_builtin_default().unwrap();
        let reconciler = PolicyReconciler::initialize(config, resolver).unwrap();
        (dir, reconciler)
    }

    fn write_policy(reconciler: &PolicyReconciler, text: &str) {
        fs::write(&reconciler.config().policy_path, text).unwrap();
    }

    #[test]
    fn initialize_from_valid_file_writes_lkg() {
        let (_dir, r) = setup(Some(DEFAULT_POLICY_TEXT));
        let current = r.handle().current();
        assert_eq!(current.source, PolicySource::File);
        let layout = r.service().layout();
        assert_eq!(fs::read_to_string(layout.lkg_hash()).unwrap(), current.hash);
        assert!(fs::read_to_string(layout.watch_last()).unwrap().starts_with("Source: FILE\n"));
        assert!(layout.effective_json().exists());
        assert!(r.init_line().starts_with("INIT Source=FILE hash="));
    }

    #[test]
    fn initialize_without_file_uses_default_and_skips_lkg() {
        let (_dir, r) = setup(None);
        assert_eq!(r.handle().current().source, PolicySource::Default);
        assert!(!r.service().layout().lkg_text().exists());
    }

    #[test]
    fn unreadable_file_is_kept_not_rejected() {
        let (_dir, r) = setup(Some(DEFAULT_POLICY_TEXT));
        let before = r.handle().hash();
        fs::remove_file(&r.config().policy_path).unwrap();
        let outcome = r.evaluate_change();
        assert_eq!(
            outcome,
            WatchOutcome::Kept {
                kept: before.clone(),
                reason: "fileLockedOrUnreadable".to_string()
            }
        );
        assert!(!r.service().layout().rejected().exists());
        assert_eq!(r.handle().hash(), before);
    }

    #[test]
    fn failed_lkg_write_is_kept_without_history() {
        let (_dir, r) = setup(Some(DEFAULT_POLICY_TEXT));
        let before = r.handle().hash();
        let layout = r.service().layout().clone();

        // A non-empty directory in place of the LKG file makes its write fail.
        fs::remove_file(layout.lkg_text()).unwrap();
        fs::create_dir(layout.lkg_text()).unwrap();
        fs::write(layout.lkg_text().join("blocker"), "x").unwrap();

        let enabled = DEFAULT_POLICY_TEXT
            .replace("enabled = false", "enabled = true")
            .replace("provider = none", "provider = openai");
        write_policy(&r, &enabled);

        for _ in 0..2 {
            assert_eq!(
                r.evaluate_change(),
                WatchOutcome::Kept {
                    kept: before.clone(),
                    reason: "persistFailed".to_string()
                }
            );
        }
        assert_eq!(r.handle().hash(), before);

        let candidate = crate::hasher::hash_policy_text(&enabled);
        assert!(!layout.history_dir(&candidate).exists());
        let index = PolicyApplyRecorder::new(layout.out_root()).read_index().unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn initialize_reads_policy_through_retry() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = WatchConfig::for_project(dir.path());
        config.read_attempts = 3;
        config.read_backoff_ms = 1;
        fs::write(
            &config.policy_path,
            DEFAULT_POLICY_TEXT.replace("activeProfile = catalog", "activeProfile = simulation"),
        )
        .unwrap();
        let resolver = PolicyEffectiveResolver::with_builtin_default().unwrap();
        let r = PolicyReconciler::initialize(config, resolver).unwrap();
        let current = r.handle().current();
        assert_eq!(current.source, PolicySource::File);
        assert_eq!(current.active_profile, "simulation");
    }

    #[test]
    fn invalid_edit_is_rejected_and_current_kept() {
        let (_dir, r) = setup(Some(DEFAULT_POLICY_TEXT));
        let before = r.handle().hash();
        write_policy(&r, &DEFAULT_POLICY_TEXT.replace("schemaVersion = 1", "schemaVersion = 2"));

        let outcome = r.evaluate_change();
        match &outcome {
            WatchOutcome::Rejected { kept, codes } => {
                assert_eq!(kept, &before);
                assert_eq!(codes, &vec!["AASPOL020".to_string()]);
            }
            other => panic!("expected rejection, got {}", other),
        }
        assert!(outcome.to_string().starts_with("REJECTED kept="));
        assert_eq!(r.handle().hash(), before);
        let rejected = fs::read_to_string(r.service().layout().rejected()).unwrap();
        assert!(rejected.contains("global.schemaVersion"));
    }

    #[test]
    fn same_content_is_unchanged() {
        let (_dir, r) = setup(Some(DEFAULT_POLICY_TEXT));
        // Line endings alone do not make a new revision.
        write_policy(&r, &DEFAULT_POLICY_TEXT.replace('\n', "\r\n"));
        assert!(matches!(r.evaluate_change(), WatchOutcome::Unchanged { .. }));
    }

    #[test]
    fn enabling_ai_is_accepted_as_medium_risk() {
        let (_dir, r) = setup(Some(DEFAULT_POLICY_TEXT));
        let before = r.handle().hash();
        let enabled = DEFAULT_POLICY_TEXT
            .replace("enabled = false", "enabled = true")
            .replace("provider = none", "provider = openai");
        write_policy(&r, &enabled);

        let outcome = r.evaluate_change();
        let hash = match &outcome {
            WatchOutcome::Accepted { hash, risk, .. } => {
                assert_eq!(*risk, RiskLevel::Medium);
                hash.clone()
            }
            other => panic!("expected acceptance, got {}", other),
        };
        assert_ne!(hash, before);
        assert_eq!(r.handle().hash(), hash);

        let layout = r.service().layout();
        let history = layout.history_dir(&hash);
        for file in ["policy.txt", "policy.sha256", "effective.txt", "eval.md", "eval.json"] {
            assert!(history.join(file).exists(), "missing {}", file);
        }
        let eval = fs::read_to_string(history.join("eval.md")).unwrap();
        assert!(eval.contains(&format!("Previous: {}", before)));
        assert_eq!(fs::read_to_string(layout.lkg_hash()).unwrap(), hash);
    }

    #[test]
    fn readers_keep_their_snapshot_across_swaps() {
        let (_dir, r) = setup(Some(DEFAULT_POLICY_TEXT));
        let handle = r.handle();
        let held = handle.current();
        write_policy(&r, &DEFAULT_POLICY_TEXT.replace("activeProfile = catalog", "activeProfile = simulation"));
        assert!(matches!(r.evaluate_change(), WatchOutcome::Accepted { .. }));
        assert_eq!(held.active_profile, "catalog");
        assert_eq!(handle.current().active_profile, "simulation");
    }

    #[test]
    fn outcome_lines() {
        let kept = WatchOutcome::Kept {
            kept: "abc".to_string(),
            reason: "fileLockedOrUnreadable".to_string(),
        };
        assert_eq!(kept.to_string(), "KEPT fileLockedOrUnreadable kept=abc");
        let unchanged = WatchOutcome::Unchanged {
            hash: "abc".to_string(),
        };
        assert_eq!(unchanged.to_string(), "UNCHANGED hash=abc");
    }
}
