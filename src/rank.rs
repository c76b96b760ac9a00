//! Rank addressing for receive operations.

/// Selects which remote rank a `receive_*` call should accept a frame from.
///
/// `AnySender` mirrors the original `ANY_SENDER` sentinel, but as a real
/// variant instead of a magic negative rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RankSelector {
    /// Accept a frame only from this specific remote rank.
    Rank(usize),
    /// Accept a frame from whichever remote rank has one pending first.
    AnySender,
}

impl From<usize> for RankSelector {
    fn from(rank: usize) -> Self {
        RankSelector::Rank(rank)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rank_from_usize() {
        assert_eq!(RankSelector::from(3), RankSelector::Rank(3));
    }

    #[test]
    fn any_sender_is_not_a_rank() {
        assert_ne!(RankSelector::AnySender, RankSelector::Rank(0));
    }
}
