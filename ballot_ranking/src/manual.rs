/*!

This is the long-form manual for `ballot_ranking` and `ballotrank`.

## Ballots

Each voter of a contest holds one vote per entry of the contest. The votes of a
voter carry the ranks `1..=N`, where `N` is the number of entries: no two
votes share a rank and no rank is missing. Rank 1 is the favorite.

A ballot is created the first time it is touched (see
[`BallotSession::open_ballot`](crate::session::BallotSession::open_ballot)
and [`RankStore::ensure_votes`](crate::store::RankStore::ensure_votes)).
The new votes are ranked in the order the contest lists its entries. If the
contest gains an entry later, the next touch of an existing ballot appends
it at the bottom. Votes are never deleted.

## Moving an entry

A voter changes their ranking one entry at a time. Moving an entry from rank
`old` to rank `new` shifts the entries in between by one position, and leaves
everything else in place:

| move        | entries shifted            | shift |
|-------------|----------------------------|-------|
| `3` to `7`  | ranks `4, 5, 6, 7`         | -1    |
| `7` to `3`  | ranks `3, 4, 5, 6`         | +1    |
| `4` to `4`  | none, nothing is written   |       |

The number of writes grows with the distance of the move, not with the size
of the ballot.

## Rank values

The ballot form sends ranks as text. They are read as follows, for a ballot
of 10 entries:

| raw value                 | rank        |
|---------------------------|-------------|
| `"7"`, `" 7 "`, `"+7"`    | 7           |
| `"15"`                    | 10          |
| `"0"`, `"-3"`             | 1           |
| `"abc"`, `""`, `"1.5"`    | invalid     |

Invalid values are skipped by default. With
[`InvalidInputRule::Abort`](crate::InvalidInputRule) the whole submission is
rejected instead.

## Submissions

A submission is a list of `(entry, raw value)` pairs plus a confirmation flag.
The pairs are applied in order, each against the ranking left by the previous
ones.

- [`SubmissionPolicy::ApplyAll`](crate::SubmissionPolicy) (default) applies
  every pair that changes a rank.
- [`SubmissionPolicy::ApplyFirst`](crate::SubmissionPolicy) stops after the
  first pair that changes a rank and ignores the rest. Older ballot forms
  send one change per request and rely on this.

An entry that is not part of the contest rejects the whole submission.

## Confirmation

Confirming a ballot sets the `confirmed` flag on all of its votes. The form
sends the flag as text, and only `"1"` confirms. Unconfirming works the same
way. Neither changes a rank.

## Failures and retries

Each operation on a ballot is committed as a single transaction: when it fails,
nothing it did is kept.

- `InvalidInput`: a raw value is not an integer (only reported under the
  `Abort` rule).
- `NotFound`: the entry is not on the ballot.
- `RankOutOfRange`: a direct move to a rank outside `1..=N`.
- `Contention`: another operation held the ballot of this voter for longer
  than `lock_timeout`. Nothing ran; submit the same operation again.
- `Persistence`: the store failed; nothing was written.
- `Corrupted`: the stored ranks are not a ranking anymore.

Ballots of different voters never wait on each other. Operations on the same
voter run one at a time.

## Replaying submissions

`ballotrank` replays a scenario of submissions against an in-memory store and
prints the resulting ballots as JSON.

```bash
ballotrank --config scenario.json --reference expected_summary.json
```

The scenario file looks as follows:

```json
{
  "contest": { "name": "Spring photo contest", "entries": ["owl", "fox", "elk"] },
  "rules": { "submissionPolicy": "applyAll", "invalidInput": "skip", "lockTimeoutMs": 500 },
  "submissions": [
    { "voter": "alice", "ranks": [["elk", "1"], ["fox", "abc"]], "confirmed": "1" }
  ]
}
```

All the fields of `rules` are optional:
- `submissionPolicy`: `applyAll` (default) or `applyFirst`
- `invalidInput`: `skip` (default) or `abort`
- `lockTimeoutMs`: the lock timeout in milliseconds (default 2000)

A failed submission is reported in the summary and does not stop the replay.
When a reference summary is given, any difference is printed and the program
exits with an error.

 */
