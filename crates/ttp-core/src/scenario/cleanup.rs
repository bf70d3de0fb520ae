//! Final state checks: no connection left open, no buffers in flight.

use super::{Check, RunReport, Requirement, Scenarios};
use crate::exec::Host;
use crate::verify::VerifyFailure;

const GROUP: &str = "cleanup";

impl Scenarios<'_> {
    pub(super) async fn cleanup(&self, report: &mut RunReport) {
        use Requirement::Peer;

        self.run(report, GROUP, "peer_open_tag", &[Peer], self.peer_closed()).await;
        self.run(report, GROUP, "local_pending", &[], self.drained(Host::Local)).await;
        self.run(report, GROUP, "peer_pending", &[Peer], self.peer_drained()).await;
    }

    async fn peer_closed(&self) -> Check {
        let peer = self.peer()?;
        self.pause(self.config.timing.exchange()).await;

        let fragment = self.local_fragment();
        if self.verifier.open_tag(&peer, &fragment).await? {
            return Err(VerifyFailure::OpenTag {
                node: peer.to_string(),
                peer: fragment,
            });
        }
        Ok(())
    }

    async fn peer_drained(&self) -> Check {
        self.drained(self.peer()?).await
    }

    async fn drained(&self, host: Host) -> Check {
        self.pause(self.config.timing.exchange()).await;
        self.verifier.pending_buffers(&host).await?.into_result()
    }
}
