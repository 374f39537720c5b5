use crate::config::*;
use log::warn;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One lock per voter.
///
/// Operations that read, shift and write the ranks of a voter must run under
/// that voter's lock. Ballots of different voters are disjoint and never wait
/// on each other.
///
/// Acquisition gives up after a timeout and reports `BallotError::Contention`:
/// the operation did not run at all and can be retried as a whole.
///
/// The lock of a voter is dropped from the registry once no operation holds
/// or waits for it.
#[derive(Default)]
pub struct VoterLocks {
    locks: Mutex<HashMap<VoterId, Arc<Mutex<()>>>>,
}

impl VoterLocks {
    pub fn new() -> VoterLocks {
        VoterLocks::default()
    }

    fn lock_of(&self, voter: &VoterId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(voter.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // Two references left means only the registry and the caller know the lock.
    fn release(&self, voter: &VoterId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock();
        if Arc::strong_count(&lock) == 2 {
            locks.remove(voter);
        }
    }

    pub(crate) fn num_tracked(&self) -> usize {
        self.locks.lock().len()
    }

    /// Runs `f` while holding the lock of `voter`.
    pub fn with_voter<T>(
        &self,
        voter: &VoterId,
        timeout: Duration,
        f: impl FnOnce() -> BallotResult<T>,
    ) -> BallotResult<T> {
        let lock = self.lock_of(voter);
        let res = match lock.try_lock_for(timeout) {
            Some(_guard) => f(),
            None => {
                warn!(
                    "with_voter: voter {}: lock not acquired within {:?}",
                    voter, timeout
                );
                Err(BallotError::Contention {
                    voter: voter.clone(),
                    waited: timeout,
                })
            }
        };
        self.release(voter, lock);
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn busy_voter_times_out() {
        let locks = Arc::new(VoterLocks::new());
        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let locks2 = locks.clone();
        let holder = thread::spawn(move || {
            locks2
                .with_voter(&VoterId::from("alice"), Duration::from_secs(5), || {
                    held_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(())
                })
                .unwrap();
        });
        held_rx.recv().unwrap();

        let res = locks.with_voter(&VoterId::from("alice"), Duration::from_millis(20), || Ok(()));
        match res {
            Err(e) => assert!(e.is_retryable()),
            Ok(_) => panic!("lock should have been busy"),
        }
        // Another voter is not affected.
        let other = locks.with_voter(&VoterId::from("bob"), Duration::from_millis(20), || Ok(3));
        assert_eq!(other, Ok(3));

        release_tx.send(()).unwrap();
        holder.join().unwrap();
        let res = locks.with_voter(&VoterId::from("alice"), Duration::from_millis(20), || Ok(()));
        assert_eq!(res, Ok(()));
        assert_eq!(locks.num_tracked(), 0);
    }

    #[test]
    fn idle_voters_are_forgotten() {
        let locks = VoterLocks::new();
        for i in 0..50 {
            let voter = VoterId(format!("voter{}", i));
            let res = locks.with_voter(&voter, Duration::from_millis(20), || {
                assert_eq!(locks.num_tracked(), 1);
                Ok(i)
            });
            assert_eq!(res, Ok(i));
        }
        assert_eq!(locks.num_tracked(), 0);
    }
}
