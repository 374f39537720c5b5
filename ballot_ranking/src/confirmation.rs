//! Ballot-wide confirmation flag.
//!
//! The flag is stored on every vote of a voter and always set on all of them
//! at once. Flipping it never touches a rank.

use crate::config::*;
use crate::Ballot;
use log::debug;

/// Sets `confirmed` on every vote of the ballot, returning one write per vote
/// whose flag actually changed.
pub fn set_confirmation(ballot: &mut Ballot, confirmed: bool) -> Vec<Mutation> {
    let stale: Vec<EntryId> = ballot
        .votes()
        .filter(|v| v.confirmed != confirmed)
        .map(|v| v.entry.clone())
        .collect();
    let mut mutations: Vec<Mutation> = Vec::with_capacity(stale.len());
    for entry in stale.into_iter() {
        if let Some(v) = ballot.vote_mut(&entry) {
            v.confirmed = confirmed;
        }
        mutations.push(Mutation::SetConfirmed(entry, confirmed));
    }
    debug!(
        "set_confirmation: voter {}: confirmed={} on {} votes",
        ballot.voter(),
        confirmed,
        mutations.len()
    );
    mutations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ballot(flags: &[bool]) -> Ballot {
        let voter = VoterId::from("alice");
        let votes: Vec<Vote> = flags
            .iter()
            .enumerate()
            .map(|(idx, c)| Vote {
                voter: voter.clone(),
                entry: EntryId(format!("e{}", idx)),
                rank: Rank::new(idx as u32 + 1),
                confirmed: *c,
            })
            .collect();
        Ballot::from_votes(&voter, votes).unwrap()
    }

    fn ranks(b: &Ballot) -> Vec<(EntryId, Option<Rank>)> {
        b.votes().map(|v| (v.entry.clone(), v.rank)).collect()
    }

    #[test]
    fn only_stale_flags_are_written() {
        let mut b = ballot(&[true, false, true]);
        let ms = set_confirmation(&mut b, true);
        assert_eq!(ms, vec![Mutation::SetConfirmed(EntryId::from("e1"), true)]);
        assert!(b.votes().all(|v| v.confirmed));
    }

    #[test]
    fn toggling_keeps_ranks() {
        let mut b = ballot(&[false, false, false, false]);
        let before = ranks(&b);

        assert_eq!(set_confirmation(&mut b, true).len(), 4);
        assert!(b.votes().all(|v| v.confirmed));
        assert_eq!(set_confirmation(&mut b, false).len(), 4);
        assert!(b.votes().all(|v| !v.confirmed));
        assert_eq!(set_confirmation(&mut b, true).len(), 4);

        assert_eq!(ranks(&b), before);
        assert!(set_confirmation(&mut b, true).is_empty());
    }
}
