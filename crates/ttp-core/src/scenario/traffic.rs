//! Sustained debug-device traffic from self to the peer.

use super::{Check, PAYLOAD_FILES, RunReport, Requirement, Scenarios};
use crate::exec::Host;
use crate::options::DEFAULT_TRAFFIC_REPS;

const GROUP: &str = "traffic";

/// Bulk loops: (scenario, file, sends).
const BULK: [(&str, &str, u32); 3] = [
    ("bulk_2000", PAYLOAD_FILES[2], 99),
    ("bulk_3000", PAYLOAD_FILES[3], 19),
    ("bulk_4000", PAYLOAD_FILES[4], 99),
];

impl Scenarios<'_> {
    pub(super) async fn traffic(&self, report: &mut RunReport) {
        use Requirement::{BulkTraffic, Peer, Traffic};

        let reps = self.session.ctx.traffic_reps.unwrap_or(DEFAULT_TRAFFIC_REPS);
        self.run(report, GROUP, "single_500", &[Traffic, Peer], self.burst(PAYLOAD_FILES[0], 1))
            .await;
        self.run(report, GROUP, "repeat_1000", &[Traffic, Peer], self.burst(PAYLOAD_FILES[1], reps))
            .await;
        for (name, file, sends) in BULK {
            self.run(report, GROUP, name, &[Traffic, BulkTraffic, Peer], self.burst(file, sends))
                .await;
        }
    }

    /// Clears the peer's capture, then sends `file` `count` times.
    async fn burst(&self, file: &str, count: u32) -> Check {
        let peer = self.peer()?;
        self.clear_debug(&peer).await?;
        for _ in 0..count {
            self.send_file(&Host::Local, file).await?;
        }
        Ok(())
    }
}
