//! Status dumps and debug-device payload round trips.

use tracing::debug;

use super::{Check, GREET_FILE, PAYLOAD_FILES, RunReport, Requirement, Scenarios};
use crate::exec::Host;

impl Scenarios<'_> {
    pub(super) async fn proc(&self, report: &mut RunReport) {
        use Requirement::{ModuleReload, Peer};
        const GROUP: &str = "proc";

        self.run(report, GROUP, "stats", &[], self.dump_stats(&Host::Local)).await;
        self.run(report, GROUP, "tags", &[], self.dump_tags(&Host::Local)).await;

        for (name, file) in [
            ("payload_500", PAYLOAD_FILES[0]),
            ("payload_1000", PAYLOAD_FILES[1]),
            ("payload_2000", PAYLOAD_FILES[2]),
            ("payload_3000", PAYLOAD_FILES[3]),
            ("payload_4000", PAYLOAD_FILES[4]),
        ] {
            self.run(report, GROUP, name, &[ModuleReload, Peer], self.round_trip(file))
                .await;
        }
    }

    pub(super) async fn noc_db(&self, report: &mut RunReport) {
        use Requirement::Peer;
        const GROUP: &str = "noc_db";

        self.run(report, GROUP, "show_tags", &[Peer], self.show_tags()).await;
        self.run(report, GROUP, "show_debug", &[Peer], self.show_debug()).await;
    }

    async fn dump_stats(&self, host: &Host) -> Check {
        let stats = self.verifier.stats(host).await?;
        for (name, value) in stats.buffer_counters() {
            debug!(%host, counter = name, value, "stats");
        }
        Ok(())
    }

    async fn dump_tags(&self, host: &Host) -> Check {
        let tags = self.verifier.tags(host).await?;
        for record in &tags.records {
            debug!(
                %host,
                seq = record.local_seq,
                tx = record.peer_tx,
                rx = record.peer_rx,
                peer = record.peer_addr.as_deref().unwrap_or("-"),
                open = record.open,
                "tag"
            );
        }
        Ok(())
    }

    /// Sends a payload from self and checks the peer captured it intact.
    async fn round_trip(&self, file: &str) -> Check {
        let peer = self.peer()?;
        let timing = &self.config.timing;

        self.clear_debug(&peer).await?;
        self.pause(timing.exchange()).await;
        self.send_file(&Host::Local, file).await?;

        let wait = if file == PAYLOAD_FILES[4] {
            timing.bulk_exchange()
        } else {
            timing.exchange()
        };
        self.pause(wait).await;
        self.expect_received(&peer, file).await
    }

    async fn show_tags(&self) -> Check {
        let peer = self.peer()?;
        self.dump_tags(&Host::Local).await?;
        self.dump_tags(&peer).await
    }

    async fn show_debug(&self) -> Check {
        let hosts = [Host::Local, self.peer()?];
        for host in &hosts {
            self.clear_debug(host).await?;
            self.send_file(host, GREET_FILE).await?;
        }
        for host in &hosts {
            let contents = self.exec.read_file(host, &self.config.debug_device).await?;
            debug!(%host, bytes = contents.len(), "debug device");
        }
        Ok(())
    }
}
