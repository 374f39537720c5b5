use crate::builder::BallotPayload;
use crate::config::*;
use crate::confirmation::set_confirmation;
use crate::locks::VoterLocks;
use crate::store::{initialization, staged_votes, RankStore};
use crate::{process_submission, reassign, Ballot};
use log::{debug, info};
use std::sync::Arc;

/// The entry point for the ballots of one contest.
///
/// Every write runs under the lock of the voter it touches and ends with a
/// single call to `RankStore::apply_transaction`: an operation that fails,
/// for any reason, leaves no trace. The votes a new ballot is missing are
/// created in that same transaction.
///
/// ```
/// use std::sync::Arc;
/// use ballot_ranking::session::BallotSession;
/// use ballot_ranking::store::MemoryStore;
/// use ballot_ranking::{BallotRules, EntryId, VoterId};
/// # use ballot_ranking::BallotError;
///
/// let entries: Vec<EntryId> = ["owl", "fox", "elk"].iter().map(|s| EntryId::from(*s)).collect();
/// let session = BallotSession::new(Arc::new(MemoryStore::new()), entries, BallotRules::DEFAULT_RULES);
///
/// let voter = VoterId::from("alice");
/// session.submit_ballot(&voter, &[(EntryId::from("elk"), "1".to_string())], true)?;
///
/// let order: Vec<String> = session.list_votes(&voter)?.into_iter().map(|v| v.entry.0).collect();
/// assert_eq!(order, vec!["elk", "owl", "fox"]);
/// # Ok::<(), BallotError>(())
/// ```
pub struct BallotSession<S: RankStore> {
    store: Arc<S>,
    entries: Vec<EntryId>,
    rules: BallotRules,
    locks: VoterLocks,
}

impl<S: RankStore> BallotSession<S> {
    /// `entries` are the votable entries of the contest, in the order a new
    /// ballot starts with.
    pub fn new(store: Arc<S>, entries: Vec<EntryId>, rules: BallotRules) -> BallotSession<S> {
        BallotSession {
            store,
            entries,
            rules,
            locks: VoterLocks::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn rules(&self) -> &BallotRules {
        &self.rules
    }

    pub fn entries(&self) -> &[EntryId] {
        &self.entries
    }

    // Caller holds the voter lock. Returns the ballot with the missing votes
    // already in place, and the writes that create them.
    fn load_ballot(&self, voter: &VoterId) -> BallotResult<(Ballot, Vec<Mutation>)> {
        let existing = self.store.list_votes(voter)?;
        let init = initialization(&existing, &self.entries);
        let votes = staged_votes(voter, existing, &init)?;
        Ok((Ballot::from_votes(voter, votes)?, init))
    }

    /// Applies one submission of the ballot form.
    ///
    /// The rank changes are applied first, following the submission policy of
    /// the rules, then the confirmation flag is set on all the votes. All of it
    /// is committed at once.
    pub fn submit_ballot(
        &self,
        voter: &VoterId,
        raw_pairs: &[(EntryId, String)],
        confirmed: bool,
    ) -> BallotResult<SubmissionReport> {
        self.locks.with_voter(voter, self.rules.lock_timeout, || {
            let (mut ballot, mut mutations) = self.load_ballot(voter)?;
            let created = mutations.len();
            let outcome = process_submission(&mut ballot, raw_pairs, &self.rules)?;
            let confirmations = set_confirmation(&mut ballot, confirmed);

            let confirmations_changed = confirmations.len();
            mutations.extend(outcome.mutations);
            mutations.extend(confirmations);
            self.store.apply_transaction(voter, &mutations)?;

            let writes = mutations.len() - created;
            info!(
                "submit_ballot: voter {}: {} changes applied, {} skipped, {} writes",
                voter,
                outcome.applied.len(),
                outcome.skipped.len(),
                writes
            );
            Ok(SubmissionReport {
                applied: outcome.applied,
                skipped: outcome.skipped,
                confirmations_changed,
                writes,
            })
        })
    }

    pub fn submit_payload(
        &self,
        voter: &VoterId,
        payload: &BallotPayload,
    ) -> BallotResult<SubmissionReport> {
        self.submit_ballot(voter, payload.pairs(), payload.confirmed())
    }

    /// Moves one entry of the ballot and commits the shift.
    pub fn reassign(&self, voter: &VoterId, entry: &EntryId, new_rank: Rank) -> BallotResult<()> {
        self.locks.with_voter(voter, self.rules.lock_timeout, || {
            let (mut ballot, mut mutations) = self.load_ballot(voter)?;
            mutations.extend(reassign(&mut ballot, entry, new_rank)?);
            self.store.apply_transaction(voter, &mutations)
        })
    }

    /// Sets the confirmation flag on all the votes of the voter. Returns the
    /// number of votes that changed.
    pub fn set_confirmation(&self, voter: &VoterId, confirmed: bool) -> BallotResult<usize> {
        self.locks.with_voter(voter, self.rules.lock_timeout, || {
            let (mut ballot, mut mutations) = self.load_ballot(voter)?;
            let changes = set_confirmation(&mut ballot, confirmed);
            let changed = changes.len();
            mutations.extend(changes);
            self.store.apply_transaction(voter, &mutations)?;
            Ok(changed)
        })
    }

    /// Creates the missing votes of the voter and returns the ballot, by
    /// ascending rank.
    pub fn open_ballot(&self, voter: &VoterId) -> BallotResult<Vec<Vote>> {
        self.locks.with_voter(voter, self.rules.lock_timeout, || {
            let votes = self.store.ensure_votes(voter, &self.entries)?;
            debug!("open_ballot: voter {}: {} votes", voter, votes.len());
            Ok(Ballot::from_votes(voter, votes)?.votes().cloned().collect())
        })
    }

    /// The committed votes of the voter, by ascending rank. Does not create
    /// anything.
    pub fn list_votes(&self, voter: &VoterId) -> BallotResult<Vec<Vote>> {
        self.store.list_votes(voter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn entry(i: usize) -> EntryId {
        EntryId(format!("e{:02}", i))
    }

    fn session_with(n: usize, rules: BallotRules) -> BallotSession<MemoryStore> {
        BallotSession::new(
            Arc::new(MemoryStore::new()),
            (1..=n).map(entry).collect(),
            rules,
        )
    }

    fn session(n: usize) -> BallotSession<MemoryStore> {
        session_with(
            n,
            BallotRules {
                lock_timeout: Duration::from_secs(10),
                ..BallotRules::DEFAULT_RULES
            },
        )
    }

    fn order(s: &BallotSession<MemoryStore>, voter: &VoterId) -> Vec<EntryId> {
        s.list_votes(voter)
            .unwrap()
            .into_iter()
            .map(|v| v.entry)
            .collect()
    }

    fn ids(is: &[usize]) -> Vec<EntryId> {
        is.iter().map(|i| entry(*i)).collect()
    }

    fn pairs(ps: &[(usize, &str)]) -> Vec<(EntryId, String)> {
        ps.iter().map(|(i, r)| (entry(*i), r.to_string())).collect()
    }

    #[test]
    fn submit_ranks_and_confirms() {
        let _ = env_logger::try_init();
        let s = session(4);
        let voter = VoterId::from("alice");
        assert!(s.list_votes(&voter).unwrap().is_empty());

        let report = s
            .submit_ballot(&voter, &pairs(&[(4, "1"), (2, "zz")]), true)
            .unwrap();
        assert_eq!(report.applied, vec![entry(4)]);
        assert_eq!(report.skipped, vec![(entry(2), "zz".to_string())]);
        assert_eq!(report.confirmations_changed, 4);
        assert_eq!(report.writes, 4 + 4);
        assert_eq!(order(&s, &voter), ids(&[4, 1, 2, 3]));
        assert!(s.list_votes(&voter).unwrap().iter().all(|v| v.confirmed));

        // Unconfirming does not move anything.
        let report = s.submit_ballot(&voter, &[], false).unwrap();
        assert_eq!(report.confirmations_changed, 4);
        assert_eq!(order(&s, &voter), ids(&[4, 1, 2, 3]));
        assert!(s.list_votes(&voter).unwrap().iter().all(|v| !v.confirmed));
    }

    #[test]
    fn submit_payload_from_form() {
        let s = session(3);
        let voter = VoterId::from("alice");
        let payload = BallotPayload::from_form(vec![("e03", "-7"), ("e01", "")], "1");
        let report = s.submit_payload(&voter, &payload).unwrap();
        assert_eq!(report.applied, vec![entry(3)]);
        assert_eq!(order(&s, &voter), ids(&[3, 1, 2]));
        assert!(s.list_votes(&voter).unwrap().iter().all(|v| v.confirmed));
    }

    #[test]
    fn apply_first_policy() {
        let s = session_with(
            4,
            BallotRules {
                submission_policy: SubmissionPolicy::ApplyFirst,
                ..BallotRules::DEFAULT_RULES
            },
        );
        let voter = VoterId::from("alice");
        let report = s
            .submit_ballot(&voter, &pairs(&[(2, "4"), (1, "4")]), false)
            .unwrap();
        assert_eq!(report.applied, vec![entry(2)]);
        assert_eq!(order(&s, &voter), ids(&[1, 3, 4, 2]));
    }

    #[test]
    fn unknown_entry_aborts_everything() {
        let s = session(3);
        let voter = VoterId::from("alice");
        let before = s.open_ballot(&voter).unwrap();

        let mut ps = pairs(&[(3, "1")]);
        ps.push((EntryId::from("e99"), "2".to_string()));
        let res = s.submit_ballot(&voter, &ps, true);
        assert!(matches!(res, Err(BallotError::NotFound { .. })));
        assert_eq!(s.list_votes(&voter).unwrap(), before);
    }

    #[test]
    fn failed_first_submission_creates_nothing() {
        let s = session_with(
            2,
            BallotRules {
                invalid_input_rule: InvalidInputRule::Abort,
                ..BallotRules::DEFAULT_RULES
            },
        );
        assert_eq!(s.entries(), &ids(&[1, 2])[..]);
        assert_eq!(s.rules().invalid_input_rule, InvalidInputRule::Abort);
        let voter = VoterId::from("alice");

        let res = s.submit_ballot(&voter, &[(EntryId::from("ghost"), "1".to_string())], true);
        assert!(matches!(res, Err(BallotError::NotFound { .. })));
        assert!(s.list_votes(&voter).unwrap().is_empty());

        let res = s.submit_ballot(&voter, &pairs(&[(1, "first")]), true);
        assert!(matches!(res, Err(BallotError::InvalidInput { .. })));
        assert!(s.list_votes(&voter).unwrap().is_empty());

        s.store().fail_after(1);
        let res = s.submit_ballot(&voter, &pairs(&[(2, "1")]), true);
        assert!(matches!(res, Err(BallotError::Persistence { .. })));
        assert!(s.list_votes(&voter).unwrap().is_empty());

        let res = s.reassign(&voter, &EntryId::from("ghost"), Rank::FIRST);
        assert!(matches!(res, Err(BallotError::NotFound { .. })));
        s.store().fail_after(0);
        assert!(s.set_confirmation(&voter, true).is_err());
        assert!(s.list_votes(&voter).unwrap().is_empty());
        assert_eq!(s.store().num_voters(), 0);

        // The first submission that goes through creates the ballot with it.
        let report = s.submit_ballot(&voter, &pairs(&[(2, "1")]), true).unwrap();
        assert_eq!(report.writes, 2 + 2);
        assert_eq!(order(&s, &voter), ids(&[2, 1]));
        assert!(s.list_votes(&voter).unwrap().iter().all(|v| v.confirmed));
    }

    #[test]
    fn storage_fault_leaves_ballot_untouched() {
        let s = session(10);
        let voter = VoterId::from("alice");
        s.submit_ballot(&voter, &pairs(&[(10, "1")]), true).unwrap();
        let before = s.list_votes(&voter).unwrap();

        // Fail in the middle of the shift of a move from rank 3 to rank 7.
        s.store().fail_after(2);
        let res = s.submit_ballot(&voter, &pairs(&[(2, "7")]), false);
        assert!(matches!(res, Err(BallotError::Persistence { .. })));
        assert_eq!(s.list_votes(&voter).unwrap(), before);

        s.store().fail_after(3);
        assert!(s.reassign(&voter, &entry(2), Rank::new(7).unwrap()).is_err());
        assert_eq!(s.list_votes(&voter).unwrap(), before);

        s.store().fail_after(0);
        assert!(s.set_confirmation(&voter, false).is_err());
        assert_eq!(s.list_votes(&voter).unwrap(), before);

        // The same operation goes through once storage is back.
        s.reassign(&voter, &entry(2), Rank::new(7).unwrap()).unwrap();
        assert_eq!(order(&s, &voter), ids(&[10, 1, 3, 4, 5, 6, 2, 7, 8, 9]));
    }

    #[test]
    fn set_confirmation_toggles() {
        let s = session(3);
        let voter = VoterId::from("alice");
        s.submit_ballot(&voter, &pairs(&[(3, "2")]), false).unwrap();
        let ranks_before = order(&s, &voter);

        assert_eq!(s.set_confirmation(&voter, true), Ok(3));
        assert_eq!(s.set_confirmation(&voter, true), Ok(0));
        assert_eq!(s.set_confirmation(&voter, false), Ok(3));
        assert_eq!(order(&s, &voter), ranks_before);
    }

    #[test]
    fn busy_voter_reports_contention() {
        let s = Arc::new(session_with(
            3,
            BallotRules {
                lock_timeout: Duration::from_millis(20),
                ..BallotRules::DEFAULT_RULES
            },
        ));
        let alice = VoterId::from("alice");
        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let s2 = s.clone();
        let holder = thread::spawn(move || {
            s2.locks
                .with_voter(&VoterId::from("alice"), Duration::from_secs(5), || {
                    held_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(())
                })
                .unwrap();
        });
        held_rx.recv().unwrap();

        let res = s.submit_ballot(&alice, &pairs(&[(1, "3")]), true);
        assert!(matches!(res, Err(BallotError::Contention { .. })));
        assert!(s.list_votes(&alice).unwrap().is_empty());

        // Bob does not wait for Alice.
        let bob = VoterId::from("bob");
        s.submit_ballot(&bob, &pairs(&[(1, "3")]), true).unwrap();
        assert_eq!(order(&s, &bob), ids(&[2, 3, 1]));

        release_tx.send(()).unwrap();
        holder.join().unwrap();
        s.submit_ballot(&alice, &pairs(&[(1, "3")]), true).unwrap();
        assert_eq!(order(&s, &alice), ids(&[2, 3, 1]));
    }

    #[test]
    fn concurrent_moves_of_one_voter_serialize() {
        let s = Arc::new(session(5));
        let voter = VoterId::from("alice");
        s.open_ballot(&voter).unwrap();

        let handles: Vec<_> = [5usize, 4]
            .iter()
            .map(|i| {
                let s = s.clone();
                let voter = voter.clone();
                let e = entry(*i);
                thread::spawn(move || s.reassign(&voter, &e, Rank::FIRST))
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }

        let res = order(&s, &voter);
        let five_then_four = ids(&[4, 5, 1, 2, 3]);
        let four_then_five = ids(&[5, 4, 1, 2, 3]);
        assert!(
            res == five_then_four || res == four_then_five,
            "not a serial outcome: {:?}",
            res
        );
    }

    #[test]
    fn stress_one_voter_keeps_permutation() {
        let n = 12;
        let s = Arc::new(session(n));
        let voter = VoterId::from("alice");

        let handles: Vec<_> = (0..6u64)
            .map(|t| {
                let s = s.clone();
                let voter = voter.clone();
                thread::spawn(move || {
                    let mut state: u64 = 977 * (t + 1);
                    for _ in 0..40 {
                        state = state
                            .wrapping_mul(6364136223846793005)
                            .wrapping_add(1442695040888963407);
                        let e = entry((state >> 33) as usize % n + 1);
                        let raw = format!("{}", (state >> 13) % (n as u64 + 4));
                        s.submit_ballot(&voter, &[(e, raw)], state % 2 == 0)
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let votes = s.list_votes(&voter).unwrap();
        assert_eq!(votes.len(), n);
        let ranks: Vec<u32> = votes.iter().map(|v| v.rank.unwrap().get()).collect();
        assert_eq!(ranks, (1..=n as u32).collect::<Vec<u32>>());
        let flag = votes[0].confirmed;
        assert!(votes.iter().all(|v| v.confirmed == flag));
    }

    #[test]
    fn voters_in_parallel() {
        let s = Arc::new(session(6));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let s = s.clone();
                thread::spawn(move || {
                    let voter = VoterId(format!("voter{}", t));
                    for _ in 0..20 {
                        s.submit_ballot(&voter, &[(entry(6), "1".to_string())], true)
                            .unwrap();
                        s.submit_ballot(&voter, &[(entry(6), "6".to_string())], false)
                            .unwrap();
                    }
                    voter
                })
            })
            .collect();
        for h in handles {
            let voter = h.join().unwrap();
            assert_eq!(order(&s, &voter), ids(&[1, 2, 3, 4, 5, 6]));
        }
        assert_eq!(s.store().num_voters(), 8);
    }
}
