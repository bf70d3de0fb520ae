//! Shared fixtures: an in-memory two-node lab behind the `Executor` seam.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use ttp_core::exec::{CommandOutput, Executor, Host};
use ttp_core::lock::FsLock;
use ttp_core::options::RunOptions;
use ttp_core::retry::RecordingSleeper;
use ttp_core::{HarnessConfig, Orchestrator};

pub const LOCAL: &str = "local";
pub const PEER: &str = "node-0a";
pub const LOCAL_HOSTNAME: &str = "node-01";
pub const LOCAL_MAC: &str = "98:ed:5c:00:00:01";

/// Tag table of self with rows for every sequence check at baseline 1.
pub const LOCAL_TAGS: &str = "\
 kid  state        seq       tx       rx  peer
   1  CLOSED         1        3        2  98:ed:5c:00:00:0a
   2  CLOSED         1        4        3  98:ed:5c:00:00:0a
   3  CLOSED         2        4        3  98:ed:5c:00:00:0a
   4  CLOSED         3        4        3  98:ed:5c:00:00:0a
";

pub const PEER_TAGS: &str = "\
 kid  state        seq       tx       rx  peer
   1  CLOSED         1        3        2  98:ed:5c:00:00:01
";

pub const STATS: &str = "skb_ct: 0\nskb_rx: 3\n";

#[derive(Default)]
struct State {
    files: HashMap<(String, String), String>,
    responses: HashMap<(String, String), CommandOutput>,
    failures: Vec<(String, String)>,
    queued_reads: HashMap<(String, String), VecDeque<String>>,
    log: Vec<(String, String)>,
}

/// Executor that interprets the harness's shell idioms against per-host
/// in-memory files.
///
/// Writes to the debug device of one node are delivered to the other node's
/// debug device, like the protocol would.
pub struct FakeExecutor {
    config: HarnessConfig,
    state: Mutex<State>,
}

impl FakeExecutor {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
        }
    }

    pub fn set_file(&self, host: &str, path: &str, contents: &str) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert((host.to_string(), path.to_string()), contents.to_string());
    }

    pub fn file(&self, host: &str, path: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(&(host.to_string(), path.to_string()))
            .cloned()
    }

    pub fn set_param(&self, host: &str, name: &str, value: &str) {
        self.set_file(host, &self.config.param(name), &format!("{value}\n"));
    }

    pub fn param(&self, host: &str, name: &str) -> Option<String> {
        self.file(host, &self.config.param(name))
            .map(|v| v.trim().to_string())
    }

    /// Fixed output for an exact command line.
    pub fn respond(&self, host: &str, script: &str, output: CommandOutput) {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert((host.to_string(), script.to_string()), output);
    }

    /// Commands on `host` starting with `prefix` exit with status 1.
    pub fn fail(&self, host: &str, prefix: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((host.to_string(), prefix.to_string()));
    }

    /// Successive reads of a parameter return these values, then the file.
    pub fn queue_param_reads(&self, host: &str, name: &str, values: &[&str]) {
        self.state.lock().unwrap().queued_reads.insert(
            (host.to_string(), self.config.param(name)),
            values.iter().map(|v| format!("{v}\n")).collect(),
        );
    }

    pub fn commands(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn commands_on(&self, host: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|(h, _)| h == host)
            .map(|(_, c)| c)
            .collect()
    }

    /// Index of the first logged command on `host` starting with `prefix`.
    pub fn position(&self, host: &str, prefix: &str) -> Option<usize> {
        self.commands()
            .iter()
            .position(|(h, c)| h == host && c.starts_with(prefix))
    }

    pub fn count(&self, host: &str, prefix: &str) -> usize {
        self.commands_on(host)
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn other(host: &str) -> &'static str {
        if host == LOCAL { PEER } else { LOCAL }
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn run(&self, host: &Host, script: &str) -> ttp_core::Result<CommandOutput> {
        let host = host.to_string();
        let mut state = self.state.lock().unwrap();
        state.log.push((host.clone(), script.to_string()));

        if let Some(output) = state.responses.get(&(host.clone(), script.to_string())) {
            return Ok(output.clone());
        }
        if state
            .failures
            .iter()
            .any(|(h, prefix)| *h == host && script.starts_with(prefix.as_str()))
        {
            return Ok(CommandOutput::failed(1, "scripted failure"));
        }

        if let Some(rest) = script.strip_prefix("cmp -s ") {
            let (left, right) = rest.split_once(' ').unwrap_or((rest, ""));
            let l = state.files.get(&(host.clone(), left.to_string()));
            let r = state.files.get(&(host.clone(), right.to_string()));
            return Ok(match (l, r) {
                (Some(l), Some(r)) if l == r => CommandOutput::ok(""),
                _ => CommandOutput::failed(1, ""),
            });
        }

        if script.starts_with("echo -n ") {
            return Ok(CommandOutput::ok(""));
        }

        if let Some(rest) = script.strip_prefix("echo ") {
            if let Some((value, path)) = rest.split_once(" > ") {
                state
                    .files
                    .insert((host, path.to_string()), format!("{value}\n"));
                return Ok(CommandOutput::ok(""));
            }
        }

        if let Some(rest) = script.strip_prefix("cat ") {
            if let Some((from, to)) = rest.split_once(" > ") {
                let contents = state
                    .files
                    .get(&(host.clone(), from.to_string()))
                    .cloned()
                    .unwrap_or_default();
                if to == self.config.debug_device && from != "/dev/null" {
                    let other = Self::other(&host).to_string();
                    state
                        .files
                        .insert((other, to.to_string()), contents.clone());
                }
                state.files.insert((host, to.to_string()), contents);
                return Ok(CommandOutput::ok(""));
            }

            let key = (host, rest.to_string());
            if let Some(queue) = state.queued_reads.get_mut(&key) {
                if let Some(value) = queue.pop_front() {
                    return Ok(CommandOutput::ok(value));
                }
            }
            return Ok(match state.files.get(&key) {
                Some(contents) => CommandOutput::ok(contents.clone()),
                None => CommandOutput::failed(1, format!("cat: {rest}: No such file or directory")),
            });
        }

        Ok(CommandOutput::ok(""))
    }
}

/// A two-node lab: executor, lock directory, sleeper and orchestrator.
pub struct Lab {
    pub exec: Arc<FakeExecutor>,
    pub sleeper: Arc<RecordingSleeper>,
    pub locks: Arc<FsLock>,
    pub config: HarnessConfig,
    pub orchestrator: Orchestrator,
    _lock_dir: TempDir,
}

impl Lab {
    /// Healthy lab: both nodes answer, `trafgen` is missing on both.
    pub fn new() -> Self {
        let lock_dir = TempDir::new().unwrap();
        let config = HarnessConfig {
            lock_dir: lock_dir.path().to_path_buf(),
            ..HarnessConfig::default()
        };

        let exec = Arc::new(FakeExecutor::new(config.clone()));
        exec.respond(LOCAL, "uname -n", CommandOutput::ok(format!("{LOCAL_HOSTNAME}\n")));
        for device in ["vleth", "vlip4"] {
            exec.respond(
                LOCAL,
                &format!("ip -j link show dev {device}"),
                CommandOutput::ok(format!("[{{\"ifname\":\"{device}\",\"address\":\"{LOCAL_MAC}\"}}]")),
            );
        }
        exec.respond(
            LOCAL,
            "ip -j -4 addr show dev vlip4",
            CommandOutput::ok("[{\"addr_info\":[{\"local\":\"10.0.0.1\",\"prefixlen\":8}]}]"),
        );
        exec.fail(LOCAL, "command -v trafgen");
        exec.fail(PEER, "command -v trafgen");

        for host in [LOCAL, PEER] {
            exec.set_param(host, "tag_seq", "1");
            exec.set_param(host, "stats", STATS.trim_end());
            exec.set_param(host, "nhmac", "00:00:00:00:00:00");
            for file in ["greet", "500", "1000", "2000", "3000", "4000"] {
                exec.set_file(host, &config.test_file(file), &format!("payload {file}\n"));
            }
        }
        exec.set_file(LOCAL, &config.tags_path(), LOCAL_TAGS);
        exec.set_file(PEER, &config.tags_path(), PEER_TAGS);

        let sleeper = Arc::new(RecordingSleeper::new());
        let locks = Arc::new(FsLock::new(lock_dir.path()));
        let orchestrator = Orchestrator::new(
            exec.clone(),
            locks.clone(),
            sleeper.clone(),
            Arc::new(config.clone()),
        );

        Self {
            exec,
            sleeper,
            locks,
            config,
            orchestrator,
            _lock_dir: lock_dir,
        }
    }

    pub fn lock_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.locks.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

/// Options targeting the lab's peer.
pub fn opts() -> RunOptions {
    RunOptions {
        target: Some("a".to_string()),
        ..RunOptions::default()
    }
}
