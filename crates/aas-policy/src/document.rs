// document.rs - In-memory policy document model.
//
// A PolicyDocument is built fresh by the parser on every parse attempt and
// then frozen into a PolicySnapshot. Field defaults are the values a policy
// gets for keys it does not mention.
//
// Profile names are case-insensitive: `[profile Live_Pilot]` and
// `[profile live_pilot]` address the same profile. The map is keyed by the
// lowercased name while each ProfileSettings keeps the spelling it was
// declared with.

use std::collections::BTreeMap;

use serde::Serialize;

/// The four profiles every policy is expected to declare.
pub const REQUIRED_PROFILES: [&str; 4] = ["catalog", "simulation", "live_advisory", "live_pilot"];

/// `[global]` section.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    pub schema_version: i64,
    pub active_profile: String,
    pub on_invalid_config: String,
    pub require_all_profiles_valid: bool,
    pub deny_unknown_capabilities: bool,
    pub deny_unknown_keys: bool,
    pub live_means_live: bool,
    pub safe_writes: String,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            schema_version: 1,
            active_profile: "catalog".to_string(),
            on_invalid_config: "keepLastKnownGood".to_string(),
            require_all_profiles_valid: true,
            deny_unknown_capabilities: true,
            deny_unknown_keys: false,
            live_means_live: true,
            safe_writes: "outOnly".to_string(),
        }
    }
}

/// `[ethics]` section, including the `privacy.*` flags.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EthicsSettings {
    pub purpose: String,
    pub require_consent_for_environment_control: bool,
    /// Comma-separated list of prohibited action classes.
    pub prohibit: String,
    pub privacy_no_secrets_in_logs: bool,
    pub privacy_store_screenshots: bool,
    pub privacy_store_audio: bool,
}

impl Default for EthicsSettings {
    fn default() -> Self {
        Self {
            purpose: "educational_research".to_string(),
            require_consent_for_environment_control: true,
            prohibit: String::new(),
            privacy_no_secrets_in_logs: true,
            privacy_store_screenshots: false,
            privacy_store_audio: false,
        }
    }
}

impl EthicsSettings {
    pub fn prohibited(&self) -> Vec<String> {
        split_list(&self.prohibit)
    }
}

/// One `[profile <name>]` section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileSettings {
    pub name: String,
    /// `catalog`, `simulation` or `live`. Kept as written so the validator
    /// can report bad values.
    pub mode: String,
    /// `advisory` or `pilot`; required when `mode = live`.
    pub autonomy: String,
}

impl ProfileSettings {
    pub fn new(name: impl Into<String>, mode: impl Into<String>, autonomy: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: mode.into(),
            autonomy: autonomy.into(),
        }
    }

    /// A profile with default mode and no autonomy.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, "catalog", "")
    }

    pub fn is_live(&self) -> bool {
        self.mode.eq_ignore_ascii_case("live")
    }
}

/// `[ai]` section.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiSettings {
    pub enabled: bool,
    /// `openai`, `http` or `none`.
    pub provider: String,
    pub api_key_env: String,
    pub model: String,
    pub temperature: f64,
    pub allow_send_screenshots_to_model: bool,
    pub allow_send_audio_to_model: bool,
    pub store: bool,
    /// `none`, `medium`, `high` or `xhigh`.
    pub reasoning_effort: String,
    pub endpoint: Option<String>,
    pub timeout_seconds: i64,
    pub max_output_tokens: i64,
    pub user_tag: Option<String>,
    pub allowed_tools: Option<String>,
    pub denied_tools: Option<String>,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "openai".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-5.2-pro".to_string(),
            temperature: 0.0,
            allow_send_screenshots_to_model: false,
            allow_send_audio_to_model: false,
            store: false,
            reasoning_effort: "none".to_string(),
            endpoint: None,
            timeout_seconds: 60,
            max_output_tokens: 1024,
            user_tag: None,
            allowed_tools: None,
            denied_tools: None,
        }
    }
}

impl AiSettings {
    pub fn allowed_tools(&self) -> Vec<String> {
        self.allowed_tools.as_deref().map(split_list).unwrap_or_default()
    }

    pub fn denied_tools(&self) -> Vec<String> {
        self.denied_tools.as_deref().map(split_list).unwrap_or_default()
    }
}

/// A parsed policy: global, ethics and AI settings plus the named profiles.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PolicyDocument {
    pub global: GlobalSettings,
    pub ethics: EthicsSettings,
    pub ai: AiSettings,
    profiles: BTreeMap<String, ProfileSettings>,
}

impl PolicyDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a profile (matched case-insensitively by name).
    pub fn insert_profile(&mut self, profile: ProfileSettings) {
        self.profiles.insert(profile.name.to_lowercase(), profile);
    }

    pub fn profile(&self, name: &str) -> Option<&ProfileSettings> {
        self.profiles.get(&name.to_lowercase())
    }

    pub fn has_profile(&self, name: &str) -> bool {
        self.profiles.contains_key(&name.to_lowercase())
    }

    /// Get a profile for editing, creating it on first mention.
    pub fn profile_entry(&mut self, name: &str) -> &mut ProfileSettings {
        self.profiles
            .entry(name.to_lowercase())
            .or_insert_with(|| ProfileSettings::named(name))
    }

    /// Profiles in lowercase-name order.
    pub fn profiles(&self) -> impl Iterator<Item = &ProfileSettings> {
        self.profiles.values()
    }

    /// The profile named by `global.activeProfile`, if it exists.
    pub fn active_profile(&self) -> Option<&ProfileSettings> {
        self.profile(&self.global.active_profile)
    }

    /// A document with the four required profiles, suitable as a starting
    /// point for building policies in code.
    pub fn with_required_profiles() -> Self {
        let mut doc = Self::new();
        doc.insert_profile(ProfileSettings::new("catalog", "catalog", ""));
        doc.insert_profile(ProfileSettings::new("simulation", "simulation", ""));
        doc.insert_profile(ProfileSettings::new("live_advisory", "live", "advisory"));
        doc.insert_profile(ProfileSettings::new("live_pilot", "live", "pilot"));
        doc
    }
}

/// Split a comma-separated list, trimming items and dropping empties.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_lookup_is_case_insensitive() {
        let mut doc = PolicyDocument::new();
        doc.insert_profile(ProfileSettings::new("Live_Pilot", "live", "pilot"));
        assert!(doc.has_profile("live_pilot"));
        assert_eq!(doc.profile("LIVE_PILOT").map(|p| p.name.as_str()), Some("Live_Pilot"));
    }

    #[test]
    fn profile_entry_reuses_existing_profile() {
        let mut doc = PolicyDocument::new();
        doc.profile_entry("sim").mode = "simulation".to_string();
        doc.profile_entry("SIM").autonomy = "pilot".to_string();
        assert_eq!(doc.profiles().count(), 1);
        let p = doc.profile("sim").unwrap();
        assert_eq!(p.name, "sim");
        assert_eq!(p.mode, "simulation");
        assert_eq!(p.autonomy, "pilot");
    }

    #[test]
    fn split_list_trims_and_drops_empty_items() {
        assert_eq!(split_list(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(split_list("  ").is_empty());
    }

    #[test]
    fn active_profile_resolves_through_global() {
        let mut doc = PolicyDocument::with_required_profiles();
        doc.global.active_profile = "Simulation".to_string();
        assert_eq!(doc.active_profile().map(|p| p.mode.as_str()), Some("simulation"));
    }
}
