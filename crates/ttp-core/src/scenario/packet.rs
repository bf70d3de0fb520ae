//! Hand-built frames injected with the packet generator.
//!
//! "recv" scenarios make the peer emit a frame towards self; "send"
//! scenarios emit it from self. Either way the local tag table is checked.

use super::{Check, RunReport, Requirement, Scenarios};
use crate::exec::Host;
use crate::trafgen::{Opcode, TEMPLATE_FILE, TrafgenCommand, TtpFrame};
use crate::verify::VerifyFailure;

const GROUP: &str = "packet";

/// Which node emits the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Peer to self.
    Receive,
    /// Self to peer.
    Send,
}

impl Scenarios<'_> {
    pub(super) async fn packet(&self, report: &mut RunReport) {
        use Direction::{Receive, Send};
        use Requirement::{DirectPath, LocalTrafgen, ModuleReload, Packet, Peer, PeerTrafgen};

        let recv = [Packet, Peer, PeerTrafgen];
        let send = [Packet, Peer, LocalTrafgen];
        let recv_close = [DirectPath, Packet, ModuleReload, Peer, PeerTrafgen];
        let send_close = [DirectPath, Packet, ModuleReload, Peer, LocalTrafgen];

        self.run(report, GROUP, "recv_open", &recv, self.inject(Receive, Opcode::Open)).await;
        self.run(report, GROUP, "send_open", &send, self.inject(Send, Opcode::Open)).await;
        self.run(report, GROUP, "recv_payload", &recv, self.inject(Receive, Opcode::Payload))
            .await;
        self.run(report, GROUP, "send_payload", &send, self.inject(Send, Opcode::Payload))
            .await;
        self.run(report, GROUP, "recv_close", &recv_close, self.inject(Receive, Opcode::Close))
            .await;
        self.run(report, GROUP, "send_close", &send_close, self.inject(Send, Opcode::Close))
            .await;
    }

    fn frame(&self, direction: Direction, opcode: Opcode) -> TtpFrame {
        let identities = &self.session.identities;
        let local_code = identities.local.target_code.clone();
        let peer_code = identities.target.target_code();
        let (dst_mac, src_mac) = match direction {
            Direction::Receive => (identities.local.mac, identities.target.mac()),
            Direction::Send => (identities.target.mac(), identities.local.mac),
        };
        // A close from the peer names the peer as the source node.
        let (src_node, dst_node) = match (direction, opcode) {
            (Direction::Receive, Opcode::Close) => (peer_code, local_code),
            _ => (local_code, peer_code),
        };
        TtpFrame {
            dst_mac,
            src_mac,
            src_node,
            dst_node,
            opcode,
            vci: self.session.ctx.vci,
        }
    }

    async fn inject(&self, direction: Direction, opcode: Opcode) -> Check {
        let (host, device) = match direction {
            Direction::Receive => (self.peer()?, &self.session.ctx.peer.device),
            Direction::Send => (Host::Local, &self.session.ctx.local.device),
        };
        let command = TrafgenCommand::new(
            &self.config.trafgen,
            device,
            &self.config.test_file(TEMPLATE_FILE),
            self.frame(direction, opcode),
        );
        self.exec.run_checked(&host, &command.script()).await?;
        self.pause(self.config.timing.exchange()).await;

        let fragment = self.peer_fragment();
        let open = self.verifier.open_tag(&Host::Local, &fragment).await?;
        match (opcode, open) {
            (Opcode::Open | Opcode::Payload, false) => Err(VerifyFailure::MissingOpenTag {
                node: Host::Local.to_string(),
                peer: fragment,
            }),
            (Opcode::Close, true) => Err(VerifyFailure::OpenTag {
                node: Host::Local.to_string(),
                peer: fragment,
            }),
            _ => Ok(()),
        }
    }
}
