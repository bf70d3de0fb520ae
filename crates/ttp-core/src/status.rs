//! Parsers for the module's status surfaces.
//!
//! The tag table is free text meant for humans. Each connection row carries
//! three right-aligned decimal columns, at least 7 wide and separated by two
//! spaces (own sequence, peer tx, peer rx), the peer's hardware address and,
//! while the connection is open, an `OP` state marker. Wider values push the
//! column out rather than being truncated. Rows are parsed into typed
//! [`TagRecord`]s so that verification compares fields rather than searching
//! raw text.

use std::collections::BTreeMap;

/// Minimum width of a sequence column.
const SEQ_WIDTH: usize = 7;
/// Spaces separating adjacent columns.
const SEQ_GAP: usize = 2;
/// State marker of an open connection.
const OPEN_MARKER: &str = "OP";

/// One connection row of the tag table.
///
/// The named fields hold the column run nearest the peer address. A row with
/// more than three numeric columns has several candidate runs; all of them
/// are kept in `windows`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    /// Own sequence number.
    pub local_seq: u64,
    /// Peer transmit sequence.
    pub peer_tx: u64,
    /// Peer receive sequence.
    pub peer_rx: u64,
    /// Peer hardware address as printed (full or low-order fragment).
    pub peer_addr: Option<String>,
    /// Connection is in the open state.
    pub open: bool,
    /// Every run of three adjacent sequence columns, in row order.
    pub windows: Vec<(u64, u64, u64)>,
}

impl TagRecord {
    /// The `(own, peer-tx, peer-rx)` triple.
    #[must_use]
    pub const fn triple(&self) -> (u64, u64, u64) {
        (self.local_seq, self.peer_tx, self.peer_rx)
    }

    /// Returns true if any column run of the row equals `triple`.
    #[must_use]
    pub fn matches(&self, triple: (u64, u64, u64)) -> bool {
        self.windows.contains(&triple)
    }

    /// Returns true if the row's peer address ends with `fragment`.
    #[must_use]
    pub fn is_peer(&self, fragment: &str) -> bool {
        self.peer_addr
            .as_deref()
            .is_some_and(|addr| address_matches(addr, fragment))
    }
}

/// Parsed tag table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSnapshot {
    /// Connection rows in table order.
    pub records: Vec<TagRecord>,
    /// Rows marked open that carry no sequence columns.
    pub open_addrs: Vec<String>,
}

impl TagSnapshot {
    /// Parses the text of the tag table.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut snapshot = Self::default();
        for line in text.lines() {
            let peer_addr = find_address(line);
            let open = line
                .split_whitespace()
                .any(|token| token.starts_with(OPEN_MARKER));

            let windows = sequence_windows(line);
            match windows.last().copied() {
                Some((local_seq, peer_tx, peer_rx)) => snapshot.records.push(TagRecord {
                    local_seq,
                    peer_tx,
                    peer_rx,
                    peer_addr,
                    open,
                    windows,
                }),
                None => {
                    if let (true, Some(addr)) = (open, peer_addr) {
                        snapshot.open_addrs.push(addr);
                    }
                }
            }
        }
        snapshot
    }

    /// Rows belonging to the peer with the given address fragment.
    pub fn for_peer<'a>(&'a self, fragment: &'a str) -> impl Iterator<Item = &'a TagRecord> + 'a {
        self.records.iter().filter(move |r| r.is_peer(fragment))
    }

    /// Returns true if an open connection to the peer is listed.
    #[must_use]
    pub fn has_open(&self, fragment: &str) -> bool {
        self.for_peer(fragment).any(|r| r.open)
            || self
                .open_addrs
                .iter()
                .any(|addr| address_matches(addr, fragment))
    }
}

/// Address equals `fragment` or ends with it on an octet boundary.
fn address_matches(addr: &str, fragment: &str) -> bool {
    if addr.eq_ignore_ascii_case(fragment) {
        return true;
    }
    let Some(split) = addr.len().checked_sub(fragment.len() + 1) else {
        return false;
    };
    addr.as_bytes()[split] == b':' && addr[split + 1..].eq_ignore_ascii_case(fragment)
}

/// First token shaped like a colon-separated hex address (3 or 6 octets).
fn find_address(line: &str) -> Option<String> {
    line.split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_ascii_hexdigit() && c != ':'))
        .find(|token| {
            let groups: Vec<&str> = token.split(':').collect();
            matches!(groups.len(), 3 | 6)
                && groups
                    .iter()
                    .all(|g| g.len() == 2 && g.bytes().all(|b| b.is_ascii_hexdigit()))
        })
        .map(|token| token.to_ascii_lowercase())
}

/// Right-aligned decimal filling a column of at least [`SEQ_WIDTH`].
///
/// `padding` is the number of spaces in front of the digits that belong to
/// the column.
fn column_value(padding: usize, token: &str) -> Option<u64> {
    if padding + token.len() < SEQ_WIDTH || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

/// Every run of three adjacent sequence columns in a row.
///
/// A column is a decimal token right-aligned in a field of at least
/// [`SEQ_WIDTH`] characters. Except at the start of the line, the field
/// begins [`SEQ_GAP`] spaces after the previous token.
fn sequence_windows(line: &str) -> Vec<(u64, u64, u64)> {
    let mut windows = Vec::new();
    let mut run: Vec<u64> = Vec::new();
    let mut rest = line;
    let mut at_start = true;

    loop {
        let trimmed = rest.trim_start_matches(' ');
        if trimmed.is_empty() {
            break;
        }
        let spaces = rest.len() - trimmed.len();
        let (token, tail) = trimmed.split_at(trimmed.find(' ').unwrap_or(trimmed.len()));
        let padding = if at_start {
            Some(spaces)
        } else {
            spaces.checked_sub(SEQ_GAP)
        };
        at_start = false;
        rest = tail;

        match padding.and_then(|padding| column_value(padding, token)) {
            Some(value) => {
                run.push(value);
                if let [.., a, b, c] = run.as_slice() {
                    windows.push((*a, *b, *c));
                }
            }
            None => run.clear(),
        }
    }
    windows
}

/// Counters from the `stats` parameter (`name: value` pairs).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    counters: BTreeMap<String, u64>,
}

impl Stats {
    /// Counter holding buffers not yet released.
    pub const PENDING: &'static str = "skb_ct";
    /// Counter of received buffers.
    pub const RECEIVED: &'static str = "skb_rx";

    /// Parses the stats text. Lines that are not `name: number` are ignored.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let counters = text
            .lines()
            .flat_map(|line| line.split([',', ';']))
            .filter_map(|field| {
                let (name, value) = field.split_once(':')?;
                let value = value.trim().parse().ok()?;
                Some((name.trim().to_string(), value))
            })
            .collect();
        Self { counters }
    }

    /// Looks up a counter.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<u64> {
        self.counters.get(name).copied()
    }

    /// In-flight buffer count.
    #[must_use]
    pub fn pending_buffers(&self) -> Option<u64> {
        self.get(Self::PENDING)
    }

    /// Received buffer count.
    #[must_use]
    pub fn received_buffers(&self) -> Option<u64> {
        self.get(Self::RECEIVED)
    }

    /// Buffer counters, for logging.
    pub fn buffer_counters(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counters
            .iter()
            .filter(|(name, _)| name.starts_with("skb_"))
            .map(|(name, value)| (name.as_str(), *value))
    }
}
