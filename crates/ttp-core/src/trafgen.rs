//! Raw TTP frames through the `trafgen` packet generator.
//!
//! Frame layout lives in the shared `ttp_common.cfg` template on every node;
//! the harness only fills in its macros with `-D NAME=value`.

use std::fmt::Write as _;
use std::time::Duration;

use crate::identity::MacAddr;
use crate::options::Vci;

/// Template file name under the test data directory.
pub const TEMPLATE_FILE: &str = "ttp_common.cfg";

/// Payload carried by OPEN frames.
pub const OPEN_PAYLOAD: &str = "hello-tesla-OPEN";
/// Payload carried by CLOSE frames.
pub const CLOSE_PAYLOAD: &str = "hello-tesla-CLOSE";
/// Payload carried by data frames.
pub const DATA_PAYLOAD: &str = "Wikipedia is an online open-content collaborative encyclopedia, \
that is, a voluntary association of individuals and groups working to develop a common \
resource of human knowledge. The structure of the project allows anyone with Internet \
connection to alter its content. Please be advised that nothing found here has necessarily \
been reviewed by people with the expertise required to provide you with complete, accurate \
or reliable information. That is not to say that you will not find valuable and accurate \
information in Wikipedia, much of the time you will. However, Wikipedia cannot guarantee \
the validity of the information found here";

/// Service/traffic-class byte of every frame.
const SVTR: u8 = 5;
/// Transmit id carried by generated frames.
const TX_ID: u32 = 2;
/// Receive id carried by generated frames.
const RX_ID: u32 = 1;

/// Connection opcodes understood by the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Connection open request.
    Open,
    /// Connection close request.
    Close,
    /// Data payload.
    Payload,
}

impl Opcode {
    /// Wire code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Close => 3,
            Self::Payload => 6,
        }
    }

    /// Ethernet payload length.
    #[must_use]
    pub const fn total_len(self) -> u16 {
        match self {
            Self::Payload => 690,
            Self::Open | Self::Close => 46,
        }
    }

    /// Length of the NOC portion.
    #[must_use]
    pub const fn noc_len(self) -> u16 {
        self.total_len() - 20
    }

    /// Payload text used for this opcode.
    #[must_use]
    pub const fn payload(self) -> &'static str {
        match self {
            Self::Open => OPEN_PAYLOAD,
            Self::Close => CLOSE_PAYLOAD,
            Self::Payload => DATA_PAYLOAD,
        }
    }
}

/// One TTP frame, described by the template's macros.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtpFrame {
    /// Destination hardware address.
    pub dst_mac: MacAddr,
    /// Source hardware address.
    pub src_mac: MacAddr,
    /// Source node target code.
    pub src_node: String,
    /// Destination node target code.
    pub dst_node: String,
    /// Opcode.
    pub opcode: Opcode,
    /// Virtual channel.
    pub vci: Vci,
}

impl TtpFrame {
    /// Macro definitions in template order.
    #[must_use]
    pub fn defines(&self) -> Vec<(&'static str, String)> {
        vec![
            ("DST_MAC", self.dst_mac.to_string()),
            ("SRC_MAC", self.src_mac.to_string()),
            ("SVTR", SVTR.to_string()),
            ("TOTLN", format!("c16({})", self.opcode.total_len())),
            ("SRC_NODE", format!("0,0,x{}", self.src_node)),
            ("DST_NODE", format!("0,0,x{}", self.dst_node)),
            ("NOCLN", format!("c16({})", self.opcode.noc_len())),
            ("CODE", self.opcode.code().to_string()),
            ("VCID", format!("c8({})", self.vci)),
            ("TXID", format!("c32({TX_ID})")),
            ("RXID", format!("c32({RX_ID})")),
        ]
    }
}

/// A `trafgen` invocation sending `count` copies of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafgenCommand {
    /// Generator binary.
    pub binary: String,
    /// Output device.
    pub device: String,
    /// Template path.
    pub template: String,
    /// Frames to send.
    pub count: u32,
    /// Gap between frames.
    pub interval: Option<Duration>,
    /// Frame description.
    pub frame: TtpFrame,
}

impl TrafgenCommand {
    /// Single frame with the opcode's default burst: payload frames go out
    /// five times 100 ms apart, control frames once.
    #[must_use]
    pub fn new(binary: &str, device: &str, template: &str, frame: TtpFrame) -> Self {
        let (count, interval) = match frame.opcode {
            Opcode::Payload => (5, Some(Duration::from_millis(100))),
            Opcode::Open | Opcode::Close => (1, None),
        };
        Self {
            binary: binary.to_string(),
            device: device.to_string(),
            template: template.to_string(),
            count,
            interval,
            frame,
        }
    }

    /// Shell command line.
    #[must_use]
    pub fn script(&self) -> String {
        let mut script = format!(
            "cd /tmp; sudo {} -p -o {} -i {} -n {}",
            self.binary, self.device, self.template, self.count
        );
        if let Some(interval) = self.interval {
            let _ = write!(script, " -t {}ms", interval.as_millis());
        }
        for (name, value) in self.frame.defines() {
            let _ = write!(script, " -D {name}=\"{value}\"");
        }
        let _ = write!(
            script,
            " -D PAYLOAD=\\\"{}\\\" > /dev/null",
            escape_spaces(self.frame.opcode.payload())
        );
        script
    }
}

/// Escapes spaces so the payload survives as one macro value.
fn escape_spaces(text: &str) -> String {
    text.replace(' ', "\\ ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(opcode: Opcode) -> TtpFrame {
        TtpFrame {
            dst_mac: MacAddr::from_ttp_suffix([0, 0, 0x0a]),
            src_mac: MacAddr::from_ttp_suffix([0, 0, 0x01]),
            src_node: "000001".into(),
            dst_node: "00000a".into(),
            opcode,
            vci: Vci::new(1).unwrap(),
        }
    }

    #[test]
    fn test_opcode_lengths() {
        assert_eq!(Opcode::Open.total_len(), 46);
        assert_eq!(Opcode::Open.noc_len(), 26);
        assert_eq!(Opcode::Payload.total_len(), 690);
        assert_eq!(Opcode::Payload.noc_len(), 670);
        assert_eq!(Opcode::Close.code(), 3);
    }

    #[test]
    fn test_open_script() {
        let cmd = TrafgenCommand::new("trafgen", "vleth", "/mnt/mac/tests/ttp_common.cfg", frame(Opcode::Open));
        let script = cmd.script();
        assert!(script.starts_with(
            "cd /tmp; sudo trafgen -p -o vleth -i /mnt/mac/tests/ttp_common.cfg -n 1 -D DST_MAC=\"98:ed:5c:00:00:0a\""
        ));
        assert!(script.contains(" -D TOTLN=\"c16(46)\" "));
        assert!(script.contains(" -D SRC_NODE=\"0,0,x000001\" -D DST_NODE=\"0,0,x00000a\" "));
        assert!(script.contains(" -D CODE=\"0\" -D VCID=\"c8(1)\" "));
        assert!(script.ends_with(" -D PAYLOAD=\\\"hello-tesla-OPEN\\\" > /dev/null"));
        assert!(!script.contains(" -t "));
    }

    #[test]
    fn test_payload_script_bursts() {
        let cmd = TrafgenCommand::new("trafgen", "vleth", "cfg", frame(Opcode::Payload));
        let script = cmd.script();
        assert!(script.contains(" -n 5 -t 100ms "));
        assert!(script.contains(" -D NOCLN=\"c16(670)\" "));
        assert!(script.contains("Wikipedia\\ is\\ an\\ online"));
    }
}
