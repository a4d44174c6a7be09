// defaults.rs - Built-in default policy.
//
// The last rung of the resolution cascade. It must always parse and validate
// without errors; PolicyEffectiveResolver refuses to start otherwise.

/// Safe baseline: catalog mode, AI disabled, nothing sent to any model.
pub const DEFAULT_POLICY_TEXT: &str = "\
# Built-in default policy.
[global]
schemaVersion = 1
activeProfile = catalog
onInvalidConfig = keepLastKnownGood
requireAllProfilesValid = true
denyUnknownCapabilities = true
denyUnknownKeys = false
liveMeansLive = true
safeWrites = outOnly

[ethics]
purpose = educational_research
requireConsentForEnvironmentControl = true
prohibit = unauthorized_access, bypass_protections, data_exfiltration
privacy.noSecretsInLogs = true
privacy.storeScreenshots = false
privacy.storeAudio = false

[profile catalog]
mode = catalog

[profile simulation]
mode = simulation

[profile live_advisory]
mode = live
autonomy = advisory

[profile live_pilot]
mode = live
autonomy = pilot

[ai]
enabled = false
provider = none
allowSendScreenshotsToModel = false
allowSendAudioToModel = false
store = false
reasoningEffort = none
timeoutSeconds = 60
maxOutputTokens = 1024
";
