// ********* Identifiers and stored data ***********

use snafu::Snafu;
use std::fmt::Display;
use std::time::Duration;

/// The participant that ranks the entries of a contest.
///
/// The identifier is opaque: the core never looks inside it.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Ord, PartialOrd)]
pub struct VoterId(pub String);

/// A rankable item of the contest.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Ord, PartialOrd)]
pub struct EntryId(pub String);

impl From<&str> for VoterId {
    fn from(s: &str) -> Self {
        VoterId(s.to_string())
    }
}

impl From<&str> for EntryId {
    fn from(s: &str) -> Self {
        EntryId(s.to_string())
    }
}

impl Display for VoterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 1-based position in the ordering of one voter.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct Rank(pub(crate) u32);

impl Rank {
    pub const FIRST: Rank = Rank(1);

    /// Returns `None` for 0, which is not a rank.
    pub fn new(r: u32) -> Option<Rank> {
        if r == 0 {
            None
        } else {
            Some(Rank(r))
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }

    // Position of this rank in a 0-based slice.
    pub(crate) fn index(self) -> usize {
        (self.0 - 1) as usize
    }

    pub(crate) fn from_index(idx: usize) -> Rank {
        Rank(idx as u32 + 1)
    }
}

impl Display for Rank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The persisted state for one (voter, entry) pair.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Vote {
    pub voter: VoterId,
    pub entry: EntryId,
    /// `None` until the ballot is initialized.
    pub rank: Option<Rank>,
    pub confirmed: bool,
}

/// One write against the votes of a single voter.
///
/// A list of mutations is applied by the store as a single transaction.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Mutation {
    /// A new row, unranked and unconfirmed.
    Insert(EntryId),
    SetRank(EntryId, Rank),
    SetConfirmed(EntryId, bool),
}

// ******** Errors *********

/// Errors that stop an operation on a ballot.
///
/// Only `Contention` is transient. Every other error leaves the stored votes
/// exactly as they were before the operation started.
#[derive(Eq, PartialEq, Debug, Clone, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BallotError {
    #[snafu(display("Cannot read a rank out of {raw:?}"))]
    InvalidInput { raw: String },

    #[snafu(display("Entry {entry} is not on the ballot of voter {voter}"))]
    NotFound { voter: VoterId, entry: EntryId },

    #[snafu(display("Rank {rank} is outside of 1..={max}"))]
    RankOutOfRange { rank: u32, max: u32 },

    #[snafu(display("Ballot of voter {voter} still busy after {waited:?}, retry the operation"))]
    Contention { voter: VoterId, waited: Duration },

    #[snafu(display("Storage failure: {message}"))]
    Persistence { message: String },

    #[snafu(display("Stored ballot of voter {voter} is not a valid ranking: {message}"))]
    Corrupted { voter: VoterId, message: String },
}

impl BallotError {
    /// True when resubmitting the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BallotError::Contention { .. })
    }
}

pub type BallotResult<T> = Result<T, BallotError>;

// ********* Configuration **********

/// How many of the changes in one submission are applied.
///
/// The ballot form historically sent one change per request, and the server
/// stopped after the first rank that actually moved. `ApplyFirst` keeps that
/// behavior for clients that depend on it.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum SubmissionPolicy {
    ApplyAll,
    ApplyFirst,
}

/// What to do with a raw value that is not an integer.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum InvalidInputRule {
    /// Ignore that entry and keep going.
    Skip,
    /// Reject the whole submission.
    Abort,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct BallotRules {
    pub submission_policy: SubmissionPolicy,
    pub invalid_input_rule: InvalidInputRule,
    /// How long an operation waits for the lock on a voter's ballot before
    /// failing with `BallotError::Contention`.
    pub lock_timeout: Duration,
}

impl BallotRules {
    pub const DEFAULT_RULES: BallotRules = BallotRules {
        submission_policy: SubmissionPolicy::ApplyAll,
        invalid_input_rule: InvalidInputRule::Skip,
        lock_timeout: Duration::from_secs(2),
    };
}

impl Default for BallotRules {
    fn default() -> Self {
        BallotRules::DEFAULT_RULES
    }
}

// ******** Output data structures *********

/// What happened to one submission.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct SubmissionReport {
    /// Entries whose rank changed, in the order the changes were applied.
    pub applied: Vec<EntryId>,
    /// Entries ignored because their raw value was not an integer.
    pub skipped: Vec<(EntryId, String)>,
    /// Number of votes whose confirmation flag was flipped.
    pub confirmations_changed: usize,
    /// Number of rank and confirmation writes in the commit. The creation of
    /// missing votes is not counted.
    pub writes: usize,
}
