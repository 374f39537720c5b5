use crate::config::*;
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use snafu::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Durable storage of the votes, one row per (voter, entry).
///
/// Implementations must make `apply_transaction` atomic: either every
/// mutation of the list is visible afterwards, or none is.
///
/// Callers that write (including `ensure_votes`) are expected to hold the
/// lock of the voter, see `VoterLocks`.
pub trait RankStore: Send + Sync {
    fn load(&self, voter: &VoterId, entry: &EntryId) -> BallotResult<Vote>;

    /// All the votes of a voter, by ascending rank. Unranked rows come last.
    fn list_votes(&self, voter: &VoterId) -> BallotResult<Vec<Vote>>;

    fn apply_transaction(&self, voter: &VoterId, mutations: &[Mutation]) -> BallotResult<()>;

    /// Makes sure the voter has one vote for each of the entries, and that
    /// every vote has a rank.
    ///
    /// The writes of `initialization` are committed as one transaction.
    /// Calling it again with the same entries does not write anything.
    fn ensure_votes(&self, voter: &VoterId, entries: &[EntryId]) -> BallotResult<Vec<Vote>> {
        let existing = self.list_votes(voter)?;
        let mutations = initialization(&existing, entries);
        if mutations.is_empty() {
            return Ok(existing);
        }
        debug!(
            "ensure_votes: voter {}: initializing with {:?}",
            voter, mutations
        );
        self.apply_transaction(voter, &mutations)?;
        self.list_votes(voter)
    }
}

/// The writes that turn the `existing` votes of a voter into a full ranking
/// of `entries`.
///
/// Missing rows are created unranked, then all the unranked rows are appended
/// after the ranked ones, following the order of `entries`. Empty when there
/// is nothing to do.
pub fn initialization(existing: &[Vote], entries: &[EntryId]) -> Vec<Mutation> {
    let known: HashMap<&EntryId, &Vote> = existing.iter().map(|v| (&v.entry, v)).collect();

    let mut mutations: Vec<Mutation> = Vec::new();
    let mut unranked: Vec<EntryId> = Vec::new();
    let mut seen: HashSet<&EntryId> = HashSet::new();
    for e in entries.iter() {
        if !seen.insert(e) {
            continue;
        }
        match known.get(e) {
            None => {
                mutations.push(Mutation::Insert(e.clone()));
                unranked.push(e.clone());
            }
            Some(v) if v.rank.is_none() => unranked.push(e.clone()),
            Some(_) => {}
        }
    }
    // Unranked rows for entries the caller did not list, in the order of
    // `existing`.
    for v in existing.iter().filter(|v| v.rank.is_none()) {
        if !seen.contains(&v.entry) {
            unranked.push(v.entry.clone());
        }
    }

    let num_ranked = existing.iter().filter(|v| v.rank.is_some()).count();
    for (idx, e) in unranked.into_iter().enumerate() {
        mutations.push(Mutation::SetRank(e, Rank::from_index(num_ranked + idx)));
    }
    mutations
}

/// The votes as they would read after `mutations`, without writing anything.
pub fn staged_votes(voter: &VoterId, votes: Vec<Vote>, mutations: &[Mutation]) -> BallotResult<Vec<Vote>> {
    let mut rows: BTreeMap<EntryId, Vote> = votes.into_iter().map(|v| (v.entry.clone(), v)).collect();
    for m in mutations.iter() {
        stage(voter, &mut rows, m)?;
    }
    Ok(rows.into_values().collect())
}

/// An in-memory store.
///
/// Transactions are staged on a copy of the voter's rows and swapped in at the
/// end. Before the swap, the staged rows are checked for duplicate ranks, the
/// way a deferred unique index on (voter, rank) would.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<VoterId, BTreeMap<EntryId, Vote>>>,
    pending_fault: Mutex<Option<usize>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// Makes the next transaction fail after staging `writes` mutations.
    ///
    /// A transaction with fewer mutations commits normally. Either way the
    /// fault is consumed.
    pub fn fail_after(&self, writes: usize) {
        *self.pending_fault.lock() = Some(writes);
    }

    /// Number of voters with at least one row.
    pub fn num_voters(&self) -> usize {
        self.tables.read().len()
    }
}

fn stage(voter: &VoterId, rows: &mut BTreeMap<EntryId, Vote>, m: &Mutation) -> BallotResult<()> {
    match m {
        Mutation::Insert(entry) => {
            ensure!(
                !rows.contains_key(entry),
                PersistenceSnafu {
                    message: format!("voter {} already has a vote for {}", voter, entry)
                }
            );
            rows.insert(
                entry.clone(),
                Vote {
                    voter: voter.clone(),
                    entry: entry.clone(),
                    rank: None,
                    confirmed: false,
                },
            );
        }
        Mutation::SetRank(entry, rank) => {
            let v = rows.get_mut(entry).context(NotFoundSnafu {
                voter: voter.clone(),
                entry: entry.clone(),
            })?;
            v.rank = Some(*rank);
        }
        Mutation::SetConfirmed(entry, confirmed) => {
            let v = rows.get_mut(entry).context(NotFoundSnafu {
                voter: voter.clone(),
                entry: entry.clone(),
            })?;
            v.confirmed = *confirmed;
        }
    }
    Ok(())
}

fn check_unique_ranks(voter: &VoterId, rows: &BTreeMap<EntryId, Vote>) -> BallotResult<()> {
    let mut ranks: HashSet<Rank> = HashSet::new();
    for v in rows.values() {
        if let Some(r) = v.rank {
            ensure!(
                ranks.insert(r),
                PersistenceSnafu {
                    message: format!("rank {} used twice in the ballot of voter {}", r, voter)
                }
            );
        }
    }
    Ok(())
}

impl RankStore for MemoryStore {
    fn load(&self, voter: &VoterId, entry: &EntryId) -> BallotResult<Vote> {
        let tables = self.tables.read();
        tables
            .get(voter)
            .and_then(|rows| rows.get(entry))
            .cloned()
            .context(NotFoundSnafu {
                voter: voter.clone(),
                entry: entry.clone(),
            })
    }

    fn list_votes(&self, voter: &VoterId) -> BallotResult<Vec<Vote>> {
        let mut votes: Vec<Vote> = match self.tables.read().get(voter) {
            Some(rows) => rows.values().cloned().collect(),
            None => Vec::new(),
        };
        // Stable sort: unranked rows stay in entry order.
        votes.sort_by_key(|v| (v.rank.is_none(), v.rank));
        Ok(votes)
    }

    fn apply_transaction(&self, voter: &VoterId, mutations: &[Mutation]) -> BallotResult<()> {
        if mutations.is_empty() {
            return Ok(());
        }
        let fault = self.pending_fault.lock().take();
        let mut tables = self.tables.write();
        let mut staged: BTreeMap<EntryId, Vote> = tables.get(voter).cloned().unwrap_or_default();
        for (idx, m) in mutations.iter().enumerate() {
            if fault == Some(idx) {
                warn!(
                    "apply_transaction: voter {}: injected fault after {} of {} writes, rolling back",
                    voter,
                    idx,
                    mutations.len()
                );
                return PersistenceSnafu {
                    message: format!("injected fault after {} writes", idx),
                }
                .fail();
            }
            stage(voter, &mut staged, m)?;
        }
        check_unique_ranks(voter, &staged)?;
        tables.insert(voter.clone(), staged);
        debug!(
            "apply_transaction: voter {}: committed {} writes",
            voter,
            mutations.len()
        );
        Ok(())
    }
}
