//! Negotiation state for a single media link.
//!
//! A link is one direction of media between this peer and the relay:
//! either an upstream link (one per local purpose) or a downstream
//! link (one per remote participant and purpose). Transitions are
//! guarded so that out-of-order signaling surfaces as an explicit
//! error instead of silently corrupting the link.

use confab_sfu::IceCandidate;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No negotiation has started.
    Absent,
    /// An offer is in flight and the answer has not arrived yet.
    Negotiating {
        /// True when this side sent the offer.
        initiator: bool,
        /// True when the link was already connected and the track set
        /// is changing in place.
        renegotiation: bool,
    },
    /// Offer/answer completed; media can flow.
    Connected,
    /// Torn down. Terminal.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid link transition: {attempted} from {from:?}")]
pub struct TransitionError {
    pub from: LinkState,
    pub attempted: &'static str,
}

/// One media link and the ICE candidates buffered against it.
///
/// Candidates can arrive from the relay before the local side has
/// finished applying the remote description; they are held here and
/// drained once the link connects.
#[derive(Debug)]
pub struct MediaLink {
    state: LinkState,
    pending_candidates: Vec<IceCandidate>,
}

impl Default for MediaLink {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaLink {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: LinkState::Absent,
            pending_candidates: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// Start the initial offer/answer exchange.
    pub fn begin(&mut self, initiator: bool) -> Result<(), TransitionError> {
        match self.state {
            LinkState::Absent => {
                self.state = LinkState::Negotiating {
                    initiator,
                    renegotiation: false,
                };
                Ok(())
            }
            from => Err(TransitionError {
                from,
                attempted: "begin",
            }),
        }
    }

    /// Start an in-place renegotiation of an established link.
    pub fn begin_renegotiation(&mut self, initiator: bool) -> Result<(), TransitionError> {
        match self.state {
            LinkState::Connected => {
                self.state = LinkState::Negotiating {
                    initiator,
                    renegotiation: true,
                };
                Ok(())
            }
            from => Err(TransitionError {
                from,
                attempted: "begin_renegotiation",
            }),
        }
    }

    /// The answer arrived. Returns the candidates buffered while the
    /// exchange was in flight so the caller can apply them now.
    pub fn complete(&mut self) -> Result<Vec<IceCandidate>, TransitionError> {
        match self.state {
            LinkState::Negotiating { .. } => {
                self.state = LinkState::Connected;
                Ok(std::mem::take(&mut self.pending_candidates))
            }
            from => Err(TransitionError {
                from,
                attempted: "complete",
            }),
        }
    }

    /// Hold a candidate that arrived before the link connected.
    /// Returns false once connected, meaning the candidate should be
    /// applied directly instead.
    pub fn buffer_candidate(&mut self, candidate: IceCandidate) -> bool {
        match self.state {
            LinkState::Negotiating { .. } | LinkState::Absent => {
                self.pending_candidates.push(candidate);
                true
            }
            LinkState::Connected | LinkState::Closed => false,
        }
    }

    /// Idempotent; buffered candidates are discarded.
    pub fn close(&mut self) {
        self.state = LinkState::Closed;
        self.pending_candidates.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(s: &str) -> IceCandidate {
        IceCandidate {
            candidate: s.to_string(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }

    #[test]
    fn test_initial_negotiation_lifecycle() {
        let mut link = MediaLink::new();
        assert_eq!(link.state(), LinkState::Absent);

        link.begin(true).unwrap();
        assert_eq!(
            link.state(),
            LinkState::Negotiating {
                initiator: true,
                renegotiation: false
            }
        );

        let drained = link.complete().unwrap();
        assert!(drained.is_empty());
        assert!(link.is_connected());
    }

    #[test]
    fn test_candidates_buffer_until_connected() {
        let mut link = MediaLink::new();
        link.begin(false).unwrap();
        assert!(link.buffer_candidate(candidate("candidate:1")));
        assert!(link.buffer_candidate(candidate("candidate:2")));

        let drained = link.complete().unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].candidate, "candidate:1");

        // Connected links apply candidates directly.
        assert!(!link.buffer_candidate(candidate("candidate:3")));
    }

    #[test]
    fn test_renegotiation_requires_connected() {
        let mut link = MediaLink::new();
        let err = link.begin_renegotiation(true).unwrap_err();
        assert_eq!(err.from, LinkState::Absent);

        link.begin(true).unwrap();
        link.complete().unwrap();
        link.begin_renegotiation(true).unwrap();
        assert_eq!(
            link.state(),
            LinkState::Negotiating {
                initiator: true,
                renegotiation: true
            }
        );
    }

    #[test]
    fn test_out_of_order_transitions_rejected() {
        let mut link = MediaLink::new();
        assert!(link.complete().is_err());

        link.begin(true).unwrap();
        assert!(link.begin(true).is_err());

        link.close();
        assert!(link.complete().is_err());
        assert!(link.begin(true).is_err());
        // Close is idempotent.
        link.close();
        assert_eq!(link.state(), LinkState::Closed);
    }
}
