use crate::replay::*;

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ContestSettings {
    pub name: String,
    /// The votable entries, in the order new ballots start with.
    pub entries: Vec<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioRules {
    #[serde(rename = "submissionPolicy")]
    pub submission_policy: Option<String>,
    #[serde(rename = "invalidInput")]
    pub invalid_input: Option<String>,
    #[serde(rename = "lockTimeoutMs")]
    pub lock_timeout_ms: Option<u64>,
}

/// One submission of the ballot form, as the web layer would forward it.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSubmission {
    pub voter: String,
    /// (entry, raw value) pairs, in submission order.
    #[serde(default)]
    pub ranks: Vec<(String, String)>,
    /// The raw confirmation flag: "1" confirms the ballot.
    pub confirmed: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub contest: ContestSettings,
    #[serde(default)]
    pub rules: ScenarioRules,
    pub submissions: Vec<ScenarioSubmission>,
}

pub fn read_scenario(path: &str) -> ReplayResult<ScenarioConfig> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    debug!("read_scenario: {} bytes from {:?}", contents.len(), path);
    serde_json::from_str(&contents).context(ParsingJsonSnafu { path })
}

pub fn read_summary(path: &str) -> ReplayResult<JSValue> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let js: JSValue = serde_json::from_str(&contents).context(ParsingJsonSnafu { path })?;
    debug!("read_summary: {:?}", js);
    Ok(js)
}

pub fn validate_rules(rules: &ScenarioRules) -> ReplayResult<BallotRules> {
    let defaults = BallotRules::DEFAULT_RULES;
    let res = BallotRules {
        submission_policy: match rules.submission_policy.as_deref() {
            None | Some("applyAll") => SubmissionPolicy::ApplyAll,
            Some("applyFirst") => SubmissionPolicy::ApplyFirst,
            Some(x) => {
                whatever!("Unknown submissionPolicy {:?}: expected applyAll or applyFirst", x)
            }
        },
        invalid_input_rule: match rules.invalid_input.as_deref() {
            None | Some("skip") => InvalidInputRule::Skip,
            Some("abort") => InvalidInputRule::Abort,
            Some(x) => {
                whatever!("Unknown invalidInput rule {:?}: expected skip or abort", x)
            }
        },
        lock_timeout: match rules.lock_timeout_ms {
            None => defaults.lock_timeout,
            Some(0) => {
                whatever!("lockTimeoutMs must be positive")
            }
            Some(ms) => Duration::from_millis(ms),
        },
    };
    Ok(res)
}
