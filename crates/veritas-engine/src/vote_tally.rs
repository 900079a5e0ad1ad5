use std::collections::HashSet;

use veritas_core::{ItemState, NodeInfo};

/// Outcome a [`VoteTally`] fires exactly once, when either quorum is first
/// reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Consensus {
    Positive,
    Negative,
}

/// Dual-set vote accumulator. `positive` and `negative` are always disjoint:
/// a peer's latest vote supersedes any earlier one, including a flip from
/// one side to the other. Negative quorum is checked before positive quorum
/// on every update (safety over liveness). Once consensus fires, further
/// `record` calls are no-ops — the sets are frozen.
pub struct VoteTally {
    positive_threshold: usize,
    negative_threshold: usize,
    positive: HashSet<NodeInfo>,
    negative: HashSet<NodeInfo>,
    consensus: Option<Consensus>,
}

impl VoteTally {
    pub fn new(positive_threshold: usize, negative_threshold: usize) -> Self {
        Self {
            positive_threshold,
            negative_threshold,
            positive: HashSet::new(),
            negative: HashSet::new(),
            consensus: None,
        }
    }

    /// Record `peer`'s vote for `state`. Returns `Some(outcome)` the first
    /// time (and only the first time) a quorum is reached by this call.
    pub fn record(&mut self, peer: NodeInfo, state: ItemState) -> Option<Consensus> {
        if self.consensus.is_some() {
            return None;
        }

        if state.is_positive() {
            self.negative.remove(&peer);
            self.positive.insert(peer);
        } else {
            self.positive.remove(&peer);
            self.negative.insert(peer);
        }

        if self.negative.len() >= self.negative_threshold {
            self.consensus = Some(Consensus::Negative);
            return self.consensus;
        }
        if self.positive.len() >= self.positive_threshold {
            self.consensus = Some(Consensus::Positive);
            return self.consensus;
        }
        None
    }

    pub fn consensus(&self) -> Option<Consensus> {
        self.consensus
    }

    pub fn has_voted(&self, peer: &NodeInfo) -> bool {
        self.positive.contains(peer) || self.negative.contains(peer)
    }

    pub fn positive_count(&self) -> usize {
        self.positive.len()
    }

    pub fn negative_count(&self) -> usize {
        self.negative.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(tag: &[u8]) -> NodeInfo {
        NodeInfo::new(veritas_core::HashId::of(tag), "addr".to_string())
    }

    #[test]
    fn exact_negative_threshold_triggers_rollback() {
        let mut tally = VoteTally::new(3, 2);
        assert_eq!(tally.record(peer(b"b"), ItemState::PendingNegative), None);
        assert_eq!(
            tally.record(peer(b"c"), ItemState::PendingNegative),
            Some(Consensus::Negative)
        );
    }

    #[test]
    fn one_short_of_threshold_does_not_trigger() {
        let mut tally = VoteTally::new(3, 2);
        tally.record(peer(b"b"), ItemState::PendingNegative);
        assert!(tally.consensus().is_none());
    }

    #[test]
    fn exact_positive_threshold_triggers_commit() {
        let mut tally = VoteTally::new(3, 2);
        tally.record(peer(b"a"), ItemState::PendingPositive);
        tally.record(peer(b"b"), ItemState::PendingPositive);
        assert_eq!(
            tally.record(peer(b"c"), ItemState::PendingPositive),
            Some(Consensus::Positive)
        );
    }

    #[test]
    fn vote_flip_moves_peer_between_sets() {
        let mut tally = VoteTally::new(3, 2);
        let b = peer(b"b");
        tally.record(b.clone(), ItemState::PendingPositive);
        assert_eq!(tally.positive_count(), 1);
        tally.record(b.clone(), ItemState::PendingNegative);
        assert_eq!(tally.positive_count(), 0);
        assert_eq!(tally.negative_count(), 1);
    }

    #[test]
    fn flip_scenario_from_spec_commits_on_third_positive() {
        // B votes positive then negative before quorum; C, D vote positive.
        let mut tally = VoteTally::new(3, 2);
        let (a, b, c, d) = (peer(b"a"), peer(b"b"), peer(b"c"), peer(b"d"));
        tally.record(a.clone(), ItemState::PendingPositive); // local vote
        tally.record(b.clone(), ItemState::PendingPositive);
        tally.record(b, ItemState::PendingNegative); // flips before quorum
        tally.record(c, ItemState::PendingPositive);
        assert!(tally.consensus().is_none(), "only A and C positive so far");
        assert_eq!(
            tally.record(d, ItemState::PendingPositive),
            Some(Consensus::Positive)
        );
    }

    #[test]
    fn votes_after_consensus_are_dropped() {
        let mut tally = VoteTally::new(1, 2);
        tally.record(peer(b"a"), ItemState::PendingPositive);
        assert_eq!(tally.consensus(), Some(Consensus::Positive));
        let before = tally.positive_count();
        tally.record(peer(b"b"), ItemState::PendingNegative);
        assert_eq!(tally.positive_count(), before);
        assert_eq!(tally.negative_count(), 0);
    }

    #[test]
    fn negative_checked_before_positive_on_same_update() {
        // If both thresholds would be satisfied simultaneously, negative wins.
        let mut tally = VoteTally::new(1, 1);
        assert_eq!(
            tally.record(peer(b"x"), ItemState::PendingNegative),
            Some(Consensus::Negative)
        );
    }
}
