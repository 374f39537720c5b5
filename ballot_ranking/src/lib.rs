mod config;
pub mod builder;
pub mod confirmation;
pub mod locks;
pub mod manual;
pub mod session;
pub mod store;

use log::{debug, warn};
use snafu::prelude::*;

use std::{collections::HashMap, num::IntErrorKind};

pub use crate::config::*;

// **** Working copy of a ballot ****

/// The votes of one voter, loaded in memory.
///
/// Invariant: every vote has a rank, and the ranks are exactly `1..=len()`.
/// The votes are indexed both by entry and by rank, so moving an entry only
/// touches the votes between its old and its new position.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Ballot {
    voter: VoterId,
    votes: HashMap<EntryId, Vote>,
    // by_rank[i] holds the entry ranked i + 1.
    by_rank: Vec<EntryId>,
}

impl Ballot {
    /// Builds the working copy, checking that the stored ranks form a
    /// permutation.
    pub fn from_votes(voter: &VoterId, votes: Vec<Vote>) -> BallotResult<Ballot> {
        let num_votes = votes.len();
        let mut slots: Vec<Option<EntryId>> = vec![None; num_votes];
        let mut by_entry: HashMap<EntryId, Vote> = HashMap::with_capacity(num_votes);
        for v in votes.into_iter() {
            ensure!(
                v.voter == *voter,
                CorruptedSnafu {
                    voter: voter.clone(),
                    message: format!("vote for {} belongs to voter {}", v.entry, v.voter)
                }
            );
            let rank = v.rank.context(CorruptedSnafu {
                voter: voter.clone(),
                message: format!("entry {} has no rank", v.entry),
            })?;
            let slot = slots.get_mut(rank.index()).context(CorruptedSnafu {
                voter: voter.clone(),
                message: format!("rank {} of entry {} exceeds {}", rank, v.entry, num_votes),
            })?;
            ensure!(
                slot.is_none(),
                CorruptedSnafu {
                    voter: voter.clone(),
                    message: format!("rank {} appears twice", rank)
                }
            );
            *slot = Some(v.entry.clone());
            by_entry.insert(v.entry.clone(), v);
        }
        // No duplicate ranks and as many ranks as slots: no gap either.
        let by_rank: Vec<EntryId> = slots.into_iter().flatten().collect();
        ensure!(
            by_rank.len() == num_votes && by_entry.len() == num_votes,
            CorruptedSnafu {
                voter: voter.clone(),
                message: "duplicate entries".to_string()
            }
        );
        Ok(Ballot {
            voter: voter.clone(),
            votes: by_entry,
            by_rank,
        })
    }

    pub fn voter(&self) -> &VoterId {
        &self.voter
    }

    /// N, the size of the ranking space of this voter.
    pub fn len(&self) -> usize {
        self.by_rank.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_rank.is_empty()
    }

    pub fn rank_of(&self, entry: &EntryId) -> Option<Rank> {
        self.votes.get(entry).and_then(|v| v.rank)
    }

    pub fn entry_at(&self, rank: Rank) -> Option<&EntryId> {
        self.by_rank.get(rank.index())
    }

    /// The votes in ascending rank.
    pub fn votes(&self) -> impl Iterator<Item = &Vote> + '_ {
        self.by_rank.iter().filter_map(move |e| self.votes.get(e))
    }

    pub(crate) fn vote_mut(&mut self, entry: &EntryId) -> Option<&mut Vote> {
        self.votes.get_mut(entry)
    }
}

// **** Rank engine ****

/// Reads an untrusted rank value and clamps it into `[1, max]`.
///
/// Anything that is not a (possibly signed) decimal integer is rejected with
/// `InvalidInput`. Integers too large for the machine still clamp to the
/// side their sign points to. With `max == 0` nothing can be ranked, and
/// every value is rejected.
pub fn sanitize(raw: &str, max: u32) -> BallotResult<Rank> {
    ensure!(max > 0, InvalidInputSnafu { raw });
    let parsed: i64 = match raw.trim().parse::<i64>() {
        Ok(x) => x,
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow => i64::MAX,
            IntErrorKind::NegOverflow => i64::MIN,
            _ => return InvalidInputSnafu { raw }.fail(),
        },
    };
    Ok(Rank(parsed.clamp(1, max as i64) as u32))
}

/// Moves `entry` to `new_rank`, shifting the votes in between by one.
///
/// Moving down (to a larger rank) decrements the votes in
/// `(old_rank, new_rank]`; moving up increments the votes in
/// `[new_rank, old_rank)`. Nothing outside this window changes.
///
/// The ballot is updated in place and the writes are returned. They must be
/// committed together, in a single transaction. Moving an entry to its
/// current rank returns no writes.
pub fn reassign(ballot: &mut Ballot, entry: &EntryId, new_rank: Rank) -> BallotResult<Vec<Mutation>> {
    let max = ballot.len() as u32;
    let old_rank = ballot.rank_of(entry).context(NotFoundSnafu {
        voter: ballot.voter.clone(),
        entry: entry.clone(),
    })?;
    ensure!(
        new_rank.get() <= max,
        RankOutOfRangeSnafu {
            rank: new_rank.get(),
            max
        }
    );
    if old_rank == new_rank {
        return Ok(Vec::new());
    }

    let (lo, hi) = (old_rank.min(new_rank).index(), old_rank.max(new_rank).index());
    let window = &mut ballot.by_rank[lo..=hi];
    if new_rank > old_rank {
        window.rotate_left(1);
    } else {
        window.rotate_right(1);
    }

    let mut mutations: Vec<Mutation> = Vec::with_capacity(hi - lo + 1);
    for idx in lo..=hi {
        let e = ballot.by_rank[idx].clone();
        let r = Rank::from_index(idx);
        if let Some(v) = ballot.votes.get_mut(&e) {
            v.rank = Some(r);
        }
        if e != *entry {
            mutations.push(Mutation::SetRank(e, r));
        }
    }
    mutations.push(Mutation::SetRank(entry.clone(), new_rank));
    debug!(
        "reassign: voter {}: {} {} -> {}, shifted {} votes",
        ballot.voter,
        entry,
        old_rank,
        new_rank,
        mutations.len() - 1
    );
    Ok(mutations)
}

/// The changes computed for one submission, not yet committed.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct SubmissionOutcome {
    pub applied: Vec<EntryId>,
    pub skipped: Vec<(EntryId, String)>,
    pub mutations: Vec<Mutation>,
}

/// Applies the raw (entry, value) pairs of a submission to the ballot, in
/// order.
///
/// Each value is sanitized against the size of the ballot. Values that do not
/// change the rank of their entry are ignored. Under
/// `SubmissionPolicy::ApplyFirst` the pairs after the first actual change are
/// not looked at.
///
/// An entry that is not on the ballot fails the whole submission. Invalid
/// values are skipped or fail the submission according to
/// `rules.invalid_input_rule`.
pub fn process_submission(
    ballot: &mut Ballot,
    raw_pairs: &[(EntryId, String)],
    rules: &BallotRules,
) -> BallotResult<SubmissionOutcome> {
    let mut outcome = SubmissionOutcome::default();
    for (idx, (entry, raw)) in raw_pairs.iter().enumerate() {
        let current = ballot.rank_of(entry).context(NotFoundSnafu {
            voter: ballot.voter.clone(),
            entry: entry.clone(),
        })?;
        let target = match sanitize(raw, ballot.len() as u32) {
            Ok(r) => r,
            Err(e) => match rules.invalid_input_rule {
                InvalidInputRule::Skip => {
                    debug!(
                        "process_submission: voter {}: skipping {} with value {:?}",
                        ballot.voter, entry, raw
                    );
                    outcome.skipped.push((entry.clone(), raw.clone()));
                    continue;
                }
                InvalidInputRule::Abort => {
                    warn!(
                        "process_submission: voter {}: rejecting submission, {} has value {:?}",
                        ballot.voter, entry, raw
                    );
                    return Err(e);
                }
            },
        };
        if target == current {
            continue;
        }
        outcome.mutations.extend(reassign(ballot, entry, target)?);
        outcome.applied.push(entry.clone());
        if rules.submission_policy == SubmissionPolicy::ApplyFirst {
            debug!(
                "process_submission: voter {}: first change applied, ignoring {} remaining pairs",
                ballot.voter,
                raw_pairs.len() - idx - 1
            );
            break;
        }
    }
    Ok(outcome)
}
