//! Sequence and buffer verification.
//!
//! Every exchange moves the tag counters by a fixed amount relative to the
//! baseline `tag_seq` read right after the module was loaded. A verification
//! looks for one row of the tag table that carries the exact expected triple
//! and belongs to the peer.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::exec::{Executor, Host};
use crate::module::params;
use crate::status::{Stats, TagSnapshot};

/// Counter movement of one exchange relative to the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqOffset {
    /// Added to the baseline for the own sequence.
    pub local: u64,
    /// Added to the baseline for the peer transmit sequence.
    pub peer_tx: u64,
    /// Added to the baseline for the peer receive sequence.
    pub peer_rx: u64,
}

impl SeqOffset {
    /// After the first transmit (which also opens the connection).
    pub const FIRST_TX: Self = Self::new(0, 2, 1);
    /// After the second transmit.
    pub const SECOND_TX: Self = Self::new(0, 3, 2);
    /// After the first receive.
    pub const FIRST_RX: Self = Self::new(1, 3, 2);
    /// After the second receive.
    pub const SECOND_RX: Self = Self::new(2, 3, 2);

    const fn new(local: u64, peer_tx: u64, peer_rx: u64) -> Self {
        Self {
            local,
            peer_tx,
            peer_rx,
        }
    }
}

/// Expected `(own, peer-tx, peer-rx)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagExpectation {
    /// Own sequence.
    pub local_seq: u64,
    /// Peer transmit sequence.
    pub peer_tx: u64,
    /// Peer receive sequence.
    pub peer_rx: u64,
}

impl TagExpectation {
    /// Expectation for `offset` applied to baseline `base`.
    #[must_use]
    pub const fn from_baseline(base: u64, offset: SeqOffset) -> Self {
        Self {
            local_seq: base.saturating_add(offset.local),
            peer_tx: base.saturating_add(offset.peer_tx),
            peer_rx: base.saturating_add(offset.peer_rx),
        }
    }

    /// The triple as a tuple.
    #[must_use]
    pub const fn triple(&self) -> (u64, u64, u64) {
        (self.local_seq, self.peer_tx, self.peer_rx)
    }
}

impl fmt::Display for TagExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.local_seq, self.peer_tx, self.peer_rx)
    }
}

/// A check that did not hold. Scoped to one scenario.
#[derive(Debug, Error)]
pub enum VerifyFailure {
    /// No tag row for the peer carries the expected triple.
    #[error("sequence mismatch on {node}: expected {expected} for peer {peer}, found {observed:?}")]
    SequenceMismatch {
        /// Node whose tag table was read.
        node: String,
        /// Peer address fragment.
        peer: String,
        /// Expected triple.
        expected: TagExpectation,
        /// Triples of the peer's rows.
        observed: Vec<(u64, u64, u64)>,
    },

    /// Buffers are still in flight.
    #[error("pending buffers on {node}: skb_ct = {count}")]
    PendingBuffers {
        /// Node whose counters were read.
        node: String,
        /// Pending buffer count.
        count: u64,
    },

    /// Received buffer count differs.
    #[error("received buffers on {node}: expected {expected}, found {actual:?}")]
    ReceivedBuffers {
        /// Node whose counters were read.
        node: String,
        /// Expected count.
        expected: u64,
        /// Reported count, if any.
        actual: Option<u64>,
    },

    /// The capture differs from the sent file.
    #[error("received payload on {node} does not match '{file}'")]
    PayloadMismatch {
        /// Receiving node.
        node: String,
        /// Sent file.
        file: String,
    },

    /// An open connection was left behind.
    #[error("open tag for peer {peer} on {node}")]
    OpenTag {
        /// Node whose tag table was read.
        node: String,
        /// Peer address fragment.
        peer: String,
    },

    /// The connection is not open.
    #[error("no open tag for peer {peer} on {node}")]
    MissingOpenTag {
        /// Node whose tag table was read.
        node: String,
        /// Peer address fragment.
        peer: String,
    },

    /// A step of the scenario could not be carried out.
    #[error(transparent)]
    Harness(#[from] HarnessError),
}

/// Result of one check.
#[derive(Debug)]
pub enum Verdict {
    /// The check held.
    Pass,
    /// The check did not hold.
    Fail(VerifyFailure),
}

impl Verdict {
    /// Returns true for [`Verdict::Pass`].
    #[must_use]
    pub const fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    /// Converts into a `Result` so checks chain with `?`.
    ///
    /// # Errors
    ///
    /// Returns the failure of a [`Verdict::Fail`].
    pub fn into_result(self) -> std::result::Result<(), VerifyFailure> {
        match self {
            Self::Pass => Ok(()),
            Self::Fail(failure) => Err(failure),
        }
    }
}

/// Checks a tag snapshot for an exact triple on a peer's row.
#[must_use]
pub fn check(node: &str, snapshot: &TagSnapshot, peer: &str, expected: TagExpectation) -> Verdict {
    if snapshot
        .for_peer(peer)
        .any(|record| record.matches(expected.triple()))
    {
        return Verdict::Pass;
    }
    Verdict::Fail(VerifyFailure::SequenceMismatch {
        node: node.to_string(),
        peer: peer.to_string(),
        expected,
        observed: snapshot
            .for_peer(peer)
            .flat_map(|r| r.windows.iter().copied())
            .collect(),
    })
}

/// Checks that no buffers are in flight.
#[must_use]
pub fn check_pending(node: &str, stats: &Stats) -> Verdict {
    match stats.pending_buffers() {
        Some(0) => Verdict::Pass,
        Some(count) => Verdict::Fail(VerifyFailure::PendingBuffers {
            node: node.to_string(),
            count,
        }),
        None => Verdict::Fail(
            HarnessError::parse(format!("{node}: stats have no {}", Stats::PENDING)).into(),
        ),
    }
}

/// Checks the received buffer counter.
#[must_use]
pub fn check_received(node: &str, stats: &Stats, expected: u64) -> Verdict {
    let actual = stats.received_buffers();
    if actual == Some(expected) {
        Verdict::Pass
    } else {
        Verdict::Fail(VerifyFailure::ReceivedBuffers {
            node: node.to_string(),
            expected,
            actual,
        })
    }
}

/// Reads status surfaces of a node and checks them.
#[derive(Clone)]
pub struct SequenceVerifier {
    exec: Arc<dyn Executor>,
    config: Arc<HarnessConfig>,
}

impl SequenceVerifier {
    /// Creates a verifier.
    #[must_use]
    pub fn new(exec: Arc<dyn Executor>, config: Arc<HarnessConfig>) -> Self {
        Self { exec, config }
    }

    /// Reads the decimal tag sequence baseline.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Parse`] if the value is not a decimal number.
    pub async fn baseline(&self, host: &Host) -> Result<u64> {
        let raw = self
            .exec
            .read_file(host, &self.config.param(params::TAG_SEQ))
            .await?;
        let value = raw
            .trim()
            .parse()
            .map_err(|e| HarnessError::parse(format!("{host}: tag_seq '{}': {e}", raw.trim())))?;
        info!(%host, tag_seq = value, "sequence baseline");
        Ok(value)
    }

    /// Reads and parses the tag table.
    pub async fn tags(&self, host: &Host) -> Result<TagSnapshot> {
        let text = self.exec.read_file(host, &self.config.tags_path()).await?;
        Ok(TagSnapshot::parse(&text))
    }

    /// Reads and parses the counters.
    pub async fn stats(&self, host: &Host) -> Result<Stats> {
        let text = self
            .exec
            .read_file(host, &self.config.param(params::STATS))
            .await?;
        Ok(Stats::parse(&text))
    }

    /// Checks the node's tag table for the expected triple on the peer's row.
    pub async fn verify(&self, host: &Host, peer: &str, expected: TagExpectation) -> Result<Verdict> {
        let snapshot = self.tags(host).await?;
        let verdict = check(&host.to_string(), &snapshot, peer, expected);
        debug!(%host, peer, %expected, pass = verdict.is_pass(), "sequence check");
        Ok(verdict)
    }

    /// Checks that the node has no buffers in flight.
    pub async fn pending_buffers(&self, host: &Host) -> Result<Verdict> {
        let stats = self.stats(host).await?;
        for (name, value) in stats.buffer_counters() {
            debug!(%host, counter = name, value, "buffer counter");
        }
        Ok(check_pending(&host.to_string(), &stats))
    }

    /// Checks the node's received buffer counter.
    pub async fn received_buffers(&self, host: &Host, expected: u64) -> Result<Verdict> {
        let stats = self.stats(host).await?;
        Ok(check_received(&host.to_string(), &stats, expected))
    }

    /// Returns true if the node lists an open connection to the peer.
    pub async fn open_tag(&self, host: &Host, peer: &str) -> Result<bool> {
        Ok(self.tags(host).await?.has_open(peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: &str = "00:00:0a";

    fn snapshot(row: &str) -> TagSnapshot {
        TagSnapshot::parse(&format!("{row}  98:ed:5c:{PEER}\n"))
    }

    #[test]
    fn test_offsets_from_baseline() {
        assert_eq!(TagExpectation::from_baseline(1, SeqOffset::FIRST_TX).triple(), (1, 3, 2));
        assert_eq!(TagExpectation::from_baseline(1, SeqOffset::SECOND_TX).triple(), (1, 4, 3));
        assert_eq!(TagExpectation::from_baseline(5, SeqOffset::FIRST_RX).triple(), (6, 8, 7));
        assert_eq!(TagExpectation::from_baseline(5, SeqOffset::SECOND_RX).triple(), (7, 8, 7));
    }

    #[test]
    fn test_baseline_near_max_saturates() {
        let expected = TagExpectation::from_baseline(u64::MAX - 1, SeqOffset::SECOND_TX);
        assert_eq!(expected.triple(), (u64::MAX - 1, u64::MAX, u64::MAX));
    }

    #[test]
    fn test_any_column_run_of_the_row_passes() {
        let expected = TagExpectation::from_baseline(1, SeqOffset::FIRST_TX);
        let snapshot = snapshot("      5        1        3        2");
        assert!(check("local", &snapshot, PEER, expected).is_pass());
    }

    #[test]
    fn test_wide_sequence_values_pass() {
        let expected = TagExpectation::from_baseline(10_000_000, SeqOffset::FIRST_TX);
        let snapshot = snapshot(" 10000000  10000002  10000001");
        assert!(check("local", &snapshot, PEER, expected).is_pass());
    }

    #[test]
    fn test_exact_triple_passes() {
        let expected = TagExpectation::from_baseline(1, SeqOffset::FIRST_TX);
        assert!(check("local", &snapshot("      1        3        2"), PEER, expected).is_pass());
    }

    #[test]
    fn test_single_field_deviation_fails() {
        let expected = TagExpectation::from_baseline(1, SeqOffset::FIRST_TX);
        for row in [
            "      2        3        2",
            "      1        4        2",
            "      1        3        3",
        ] {
            assert!(!check("local", &snapshot(row), PEER, expected).is_pass(), "{row}");
        }
    }

    #[test]
    fn test_triple_on_other_peer_fails() {
        let snapshot = TagSnapshot::parse("      1        3        2  98:ed:5c:00:00:0b\n");
        let expected = TagExpectation::from_baseline(1, SeqOffset::FIRST_TX);
        assert!(!check("local", &snapshot, PEER, expected).is_pass());
    }

    #[test]
    fn test_mismatch_diagnostic() {
        let expected = TagExpectation::from_baseline(1, SeqOffset::SECOND_TX);
        let Verdict::Fail(failure) = check("local", &snapshot("      1        4        4"), PEER, expected)
        else {
            panic!("expected failure");
        };
        let message = failure.to_string();
        assert!(message.contains("sequence mismatch"), "{message}");
        assert!(message.contains("(1, 4, 3)"), "{message}");
        assert!(message.contains("(1, 4, 4)"), "{message}");
    }

    #[test]
    fn test_pending_buffers() {
        assert!(check_pending("local", &Stats::parse("skb_ct: 0\n")).is_pass());

        let Verdict::Fail(failure) = check_pending("node-0a", &Stats::parse("skb_ct: 2\n")) else {
            panic!("expected failure");
        };
        assert!(matches!(failure, VerifyFailure::PendingBuffers { count: 2, .. }));
        assert!(!check_pending("local", &Stats::parse("")).is_pass());
    }

    #[test]
    fn test_received_buffers() {
        let stats = Stats::parse("skb_ct: 0\nskb_rx: 3\n");
        assert!(check_received("local", &stats, 3).is_pass());
        assert!(!check_received("local", &stats, 4).is_pass());
    }

    #[test]
    fn test_into_result() {
        assert!(Verdict::Pass.into_result().is_ok());
        let failure = VerifyFailure::OpenTag {
            node: "node-0a".into(),
            peer: "00:00:01".into(),
        };
        let err = Verdict::Fail(failure).into_result().unwrap_err();
        assert_eq!(err.to_string(), "open tag for peer 00:00:01 on node-0a");
    }
}
