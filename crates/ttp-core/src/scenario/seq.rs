//! Sequence id checks. These must run first: the expected tag triples count
//! every exchange since the module was loaded.

use tracing::debug;

use super::{Check, GREET_FILE, RunReport, Requirement, Scenarios};
use crate::exec::Host;
use crate::verify::{SeqOffset, TagExpectation};

const GROUP: &str = "seq_ids";

/// Written after a bulk send; the module is expected to drop it.
const DROPPED_MARKER: &str = "expect-this-to-be-dropped";

/// Received buffers after two transmits and the connection open.
const RECEIVED_AFTER_TX: u64 = 3;

impl Scenarios<'_> {
    pub(super) async fn seq_ids(&self, report: &mut RunReport) {
        use Requirement::{ModuleReload, Peer};

        self.run(report, GROUP, "seq_clear", &[Peer], self.seq_clear()).await;
        self.run(report, GROUP, "tx_seq", &[ModuleReload, Peer], self.tx_seq()).await;
        self.run(report, GROUP, "rx_seq", &[ModuleReload, Peer], self.rx_seq()).await;
        self.run(report, GROUP, "tx_drop", &[Peer], self.tx_drop()).await;
    }

    async fn seq_clear(&self) -> Check {
        let peer = self.peer()?;
        self.clear_debug(&Host::Local).await?;
        self.clear_debug(&peer).await
    }

    async fn tx_seq(&self) -> Check {
        let peer = self.peer()?;
        let base = self.session.baseline;
        let fragment = self.peer_fragment();
        let timing = &self.config.timing;

        self.send_file(&Host::Local, GREET_FILE).await?;
        self.sleeper.sleep(timing.first_exchange()).await;
        self.expect_received(&peer, GREET_FILE).await?;
        self.verifier
            .verify(&Host::Local, &fragment, TagExpectation::from_baseline(base, SeqOffset::FIRST_TX))
            .await?
            .into_result()?;

        self.send_file(&Host::Local, GREET_FILE).await?;
        self.sleeper.sleep(timing.exchange()).await;
        self.verifier
            .verify(&Host::Local, &fragment, TagExpectation::from_baseline(base, SeqOffset::SECOND_TX))
            .await?
            .into_result()?;

        self.verifier.pending_buffers(&Host::Local).await?.into_result()?;
        self.verifier
            .received_buffers(&Host::Local, RECEIVED_AFTER_TX)
            .await?
            .into_result()
    }

    async fn rx_seq(&self) -> Check {
        let peer = self.peer()?;
        let base = self.session.baseline;
        let fragment = self.peer_fragment();
        let ctx = &self.session.ctx;

        self.lifecycle
            .set_target(&peer, &self.session.identities.local.target_code, ctx.vci)
            .await?;

        self.clear_debug(&Host::Local).await?;
        for offset in [SeqOffset::FIRST_RX, SeqOffset::SECOND_RX] {
            self.send_file(&peer, GREET_FILE).await?;
            self.pause(self.config.timing.exchange()).await;

            let delivered = self.expect_received(&Host::Local, GREET_FILE).await.is_ok();
            debug!(delivered, "greet capture on self");

            self.verifier
                .verify(&Host::Local, &fragment, TagExpectation::from_baseline(base, offset))
                .await?
                .into_result()?;
        }
        Ok(())
    }

    async fn tx_drop(&self) -> Check {
        let peer = self.peer()?;
        let timing = &self.config.timing;

        self.clear_debug(&Host::Local).await?;
        self.clear_debug(&peer).await?;
        self.sleeper.sleep(timing.exchange()).await;

        self.send_file(&peer, "4000").await?;
        let drop = format!("echo -n {DROPPED_MARKER} > {}", self.config.debug_device);
        let output = self.exec.run(&peer, &drop).await?;
        debug!(exit_code = output.exit_code, "oversubscribed write");
        self.sleeper.sleep(timing.exchange()).await;

        self.clear_debug(&peer).await?;
        self.clear_debug(&Host::Local).await
    }
}
