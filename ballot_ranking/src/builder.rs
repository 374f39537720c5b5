pub use crate::config::*;

/// Reads the confirmation flag sent by the ballot form.
///
/// Only `"1"` confirms the ballot. Anything else, including an absent or empty
/// flag, leaves it unconfirmed.
pub fn parse_confirmation_flag(flag: &str) -> bool {
    flag.trim() == "1"
}

/// One submission of the ballot form, as typed data.
///
/// The raw values are kept as strings: they are sanitized later, against the
/// size of the ballot they apply to.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct BallotPayload {
    pairs: Vec<(EntryId, String)>,
    confirmed: bool,
}

impl BallotPayload {
    pub fn builder() -> PayloadBuilder {
        PayloadBuilder::default()
    }

    /// Builds a payload straight out of the form fields.
    ///
    /// ```
    /// use ballot_ranking::builder::BallotPayload;
    ///
    /// let payload = BallotPayload::from_form(vec![("12", "3"), ("7", "first")], "1");
    /// assert_eq!(payload.pairs().len(), 2);
    /// assert!(payload.confirmed());
    /// ```
    pub fn from_form<K, V>(fields: impl IntoIterator<Item = (K, V)>, confirmed_flag: &str) -> BallotPayload
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut builder = BallotPayload::builder().confirmed_flag(confirmed_flag);
        for (k, v) in fields {
            builder = builder.rank(EntryId::from(k.as_ref()), v.as_ref());
        }
        builder.build()
    }

    /// The (entry, raw value) pairs, in submission order.
    pub fn pairs(&self) -> &[(EntryId, String)] {
        &self.pairs
    }

    pub fn confirmed(&self) -> bool {
        self.confirmed
    }
}

/// A builder for ballot payloads.
#[derive(Debug, Clone, Default)]
pub struct PayloadBuilder {
    _pairs: Vec<(EntryId, String)>,
    _confirmed: bool,
}

impl PayloadBuilder {
    /// Adds a raw rank value for an entry. Values do not need to be valid
    /// integers.
    pub fn rank(mut self, entry: EntryId, raw: &str) -> PayloadBuilder {
        self._pairs.push((entry, raw.to_string()));
        self
    }

    pub fn confirmed(mut self, confirmed: bool) -> PayloadBuilder {
        self._confirmed = confirmed;
        self
    }

    pub fn confirmed_flag(self, flag: &str) -> PayloadBuilder {
        self.confirmed(parse_confirmation_flag(flag))
    }

    pub fn build(self) -> BallotPayload {
        BallotPayload {
            pairs: self._pairs,
            confirmed: self._confirmed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_flag() {
        assert!(parse_confirmation_flag("1"));
        assert!(parse_confirmation_flag(" 1\n"));
        for flag in ["", "0", "true", "yes", "11", "on"] {
            assert!(!parse_confirmation_flag(flag), "flag {:?}", flag);
        }
    }

    #[test]
    fn builder_keeps_submission_order() {
        let payload = BallotPayload::builder()
            .rank(EntryId::from("b"), "2")
            .rank(EntryId::from("a"), "not a number")
            .confirmed(true)
            .build();
        assert_eq!(
            payload.pairs(),
            &[
                (EntryId::from("b"), "2".to_string()),
                (EntryId::from("a"), "not a number".to_string())
            ]
        );
        assert!(payload.confirmed());
        assert!(!BallotPayload::from_form(Vec::<(String, String)>::new(), "0").confirmed());
    }
}
