use log::{debug, info, warn};

use ballot_ranking::builder::BallotPayload;
use ballot_ranking::session::BallotSession;
use ballot_ranking::store::MemoryStore;
use ballot_ranking::*;
use snafu::{prelude::*, Snafu};

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;

use serde_json::json;
use serde_json::Map as JSMap;
use serde_json::Value as JSValue;
use text_diff::print_diff;

pub mod config_reader;

use crate::replay::config_reader::*;

#[derive(Debug, Snafu)]
pub enum ReplayError {
    #[snafu(display("Error opening file {path}"))]
    OpeningJson { source: std::io::Error, path: String },
    #[snafu(display("Error parsing JSON in {path}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Error formatting the summary"))]
    FormattingJson { source: serde_json::Error },
    #[snafu(display("Error writing the summary to {path}"))]
    WritingSummary { source: std::io::Error, path: String },
    #[snafu(display("Error reading back the ballot of voter {voter}"))]
    ReadingBallot {
        source: BallotError,
        voter: String,
    },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type ReplayResult<T> = Result<T, ReplayError>;

fn error_kind(e: &BallotError) -> &'static str {
    match e {
        BallotError::InvalidInput { .. } => "invalidInput",
        BallotError::NotFound { .. } => "notFound",
        BallotError::RankOutOfRange { .. } => "rankOutOfRange",
        BallotError::Contention { .. } => "contention",
        BallotError::Persistence { .. } => "persistence",
        BallotError::Corrupted { .. } => "corrupted",
    }
}

fn policy_name(p: SubmissionPolicy) -> &'static str {
    match p {
        SubmissionPolicy::ApplyAll => "applyAll",
        SubmissionPolicy::ApplyFirst => "applyFirst",
    }
}

fn invalid_input_name(r: InvalidInputRule) -> &'static str {
    match r {
        InvalidInputRule::Skip => "skip",
        InvalidInputRule::Abort => "abort",
    }
}

fn report_to_json(idx: usize, voter: &VoterId, res: &BallotResult<SubmissionReport>) -> JSValue {
    match res {
        Ok(report) => {
            let applied: Vec<String> = report.applied.iter().map(|e| e.0.clone()).collect();
            let skipped: Vec<String> = report.skipped.iter().map(|(e, _)| e.0.clone()).collect();
            json!({
                "submission": idx + 1,
                "voter": voter.0,
                "applied": applied,
                "skipped": skipped,
                "confirmationsChanged": report.confirmations_changed,
                "writes": report.writes,
            })
        }
        Err(e) => json!({
            "submission": idx + 1,
            "voter": voter.0,
            "error": error_kind(e),
        }),
    }
}

fn ballots_to_json(
    session: &BallotSession<MemoryStore>,
    voters: &[VoterId],
) -> ReplayResult<JSMap<String, JSValue>> {
    let mut ballots: JSMap<String, JSValue> = JSMap::new();
    for voter in voters.iter() {
        let votes = session
            .list_votes(voter)
            .context(ReadingBallotSnafu { voter: voter.0.clone() })?;
        let ranking: Vec<String> = votes.iter().map(|v| v.entry.0.clone()).collect();
        let confirmed = !votes.is_empty() && votes.iter().all(|v| v.confirmed);
        ballots.insert(
            voter.0.clone(),
            json!({"confirmed": confirmed, "ranking": ranking}),
        );
    }
    Ok(ballots)
}

fn build_summary_js(
    config: &ScenarioConfig,
    rules: &BallotRules,
    results: Vec<JSValue>,
    ballots: JSMap<String, JSValue>,
) -> JSValue {
    json!({
        "config": {
            "contest": config.contest.name,
            "entries": config.contest.entries,
            "submissionPolicy": policy_name(rules.submission_policy),
            "invalidInput": invalid_input_name(rules.invalid_input_rule),
        },
        "results": results,
        "ballots": ballots,
    })
}

fn write_summary(out: Option<&str>, pretty_js: &str) -> ReplayResult<()> {
    match out {
        None | Some("stdout") => {
            println!("{}", pretty_js);
            Ok(())
        }
        Some(path) => {
            info!("Writing summary to {:?}", path);
            fs::write(path, pretty_js).context(WritingSummarySnafu { path })
        }
    }
}

/// Replays all the submissions of the scenario at `config_path`, in order.
///
/// A submission that fails is recorded in the summary and the replay goes on.
/// Returns the summary, after checking it against the reference summary if one
/// is provided.
pub fn run_replay(
    config_path: &str,
    check_summary_path: Option<&str>,
    out: Option<&str>,
) -> ReplayResult<JSValue> {
    let config = read_scenario(config_path)?;
    info!("config: {:?}", config);

    let rules = validate_rules(&config.rules)?;

    let mut seen: HashSet<&String> = HashSet::new();
    for e in config.contest.entries.iter() {
        if !seen.insert(e) {
            whatever!("Entry {:?} is listed twice in contest {:?}", e, config.contest.name)
        }
    }
    let entries: Vec<EntryId> = config
        .contest
        .entries
        .iter()
        .map(|e| EntryId(e.clone()))
        .collect();

    let session = BallotSession::new(Arc::new(MemoryStore::new()), entries, rules.clone());

    let mut voters: Vec<VoterId> = Vec::new();
    let mut results: Vec<JSValue> = Vec::new();
    for (idx, sub) in config.submissions.iter().enumerate() {
        let voter = VoterId(sub.voter.clone());
        if !voters.contains(&voter) {
            voters.push(voter.clone());
        }
        let payload = BallotPayload::from_form(
            sub.ranks.iter().map(|(e, raw)| (e.as_str(), raw.as_str())),
            sub.confirmed.as_deref().unwrap_or(""),
        );
        let res = session.submit_payload(&voter, &payload);
        match &res {
            Ok(report) => debug!("submission {}: voter {}: {:?}", idx + 1, voter, report),
            Err(e) => warn!("submission {}: voter {}: {}", idx + 1, voter, e),
        }
        results.push(report_to_json(idx, &voter, &res));
    }

    let ballots = ballots_to_json(&session, &voters)?;
    let result_js = build_summary_js(&config, &rules, results, ballots);
    let pretty_js_stats = serde_json::to_string_pretty(&result_js).context(FormattingJsonSnafu {})?;
    write_summary(out, &pretty_js_stats)?;

    // The reference summary, if provided for comparison
    if let Some(summary_p) = check_summary_path {
        let summary_ref = read_summary(summary_p)?;
        let pretty_js_summary_ref =
            serde_json::to_string_pretty(&summary_ref).context(FormattingJsonSnafu {})?;
        if pretty_js_summary_ref != pretty_js_stats {
            warn!("Found differences with the reference summary");
            print_diff(
                pretty_js_summary_ref.as_str(),
                pretty_js_stats.as_str(),
                "\n",
            );
            whatever!("Difference detected between replayed summary and reference summary")
        }
    }

    Ok(result_js)
}

#[cfg(test)]
fn run_replay_test(test_name: &str, config_lpath: &str, summary_lpath: &str) -> ReplayResult<JSValue> {
    let test_dir = option_env!("BALLOT_TEST_DIR")
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("{}/tests/data", env!("CARGO_MANIFEST_DIR")));
    info!("Running test {}", test_name);
    let config_p = format!("{}/{}/{}", test_dir, test_name, config_lpath);
    let summary_p = format!("{}/{}/{}", test_dir, test_name, summary_lpath);
    run_replay(config_p.as_str(), Some(summary_p.as_str()), None)
}

#[cfg(test)]
pub fn test_wrapper(test_name: &str) -> ReplayResult<JSValue> {
    run_replay_test(
        test_name,
        format!("{}_config.json", test_name).as_str(),
        format!("{}_expected_summary.json", test_name).as_str(),
    )
}
