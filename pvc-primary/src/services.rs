//! The primary-only collaborators named only by the interface they expose: the
//! replicated-database leader switch, and the three services that only run on the
//! primary. Grounded on `NodeInstance.py`'s `become_primary`/`become_secondary`, where
//! these are `patronictl switchover` and `systemctl start/stop` calls; here the actual
//! process/service names are a config concern of whatever implements the trait, not of
//! the controller driving the sequence.

use crate::error::PrimaryResult;

/// Outcome of one attempt to move the replicated database's leader to this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderSwitchOutcome {
    Switched,
    /// `patronictl`'s "switchover target and source are the same" case: not an error.
    AlreadyLeader,
    Failed(String),
}

/// The DNS aggregator, metadata API, user-facing API, and DB leader switch: the
/// out-of-scope collaborators the acquire/release sequences start, stop, and retarget.
pub trait PrimaryServices: Send + Sync {
    fn switch_leader(&self, node: &str) -> LeaderSwitchOutcome;

    fn start_dns_aggregator(&self) -> PrimaryResult<()>;
    fn stop_dns_aggregator(&self) -> PrimaryResult<()>;

    fn start_metadata_api(&self) -> PrimaryResult<()>;
    fn stop_metadata_api(&self) -> PrimaryResult<()>;

    fn start_user_api(&self) -> PrimaryResult<()>;
    fn stop_user_api(&self) -> PrimaryResult<()>;
}

/// `systemctl`-backed implementation, one service unit per named collaborator.
pub struct SystemdServices {
    pub patroni_candidate_command: String,
}

impl SystemdServices {
    pub fn new(node_name: &str) -> Self {
        SystemdServices {
            patroni_candidate_command: format!(
                "patronictl -c /etc/patroni/config.yml -d zookeeper://localhost:2181 switchover --candidate {} --force pvcdns",
                node_name
            ),
        }
    }

    fn systemctl(&self, action: &str, unit: &str) -> PrimaryResult<()> {
        crate::os_command::run(&format!("{} {}", action, unit), "systemctl", &[action, unit])
    }
}

impl PrimaryServices for SystemdServices {
    fn switch_leader(&self, _node: &str) -> LeaderSwitchOutcome {
        let parts: Vec<&str> = self.patroni_candidate_command.split_whitespace().collect();
        let Some((program, args)) = parts.split_first() else {
            return LeaderSwitchOutcome::Failed("empty patronictl command".to_string());
        };
        match std::process::Command::new(program).args(args).output() {
            Ok(output) if output.status.success() => LeaderSwitchOutcome::Switched,
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                if stderr.contains("Switchover target and source are the same") {
                    LeaderSwitchOutcome::AlreadyLeader
                } else {
                    LeaderSwitchOutcome::Failed(stderr)
                }
            }
            Err(e) => LeaderSwitchOutcome::Failed(e.to_string()),
        }
    }

    fn start_dns_aggregator(&self) -> PrimaryResult<()> {
        self.systemctl("start", "pvc-dns-aggregator.service")
    }

    fn stop_dns_aggregator(&self) -> PrimaryResult<()> {
        self.systemctl("stop", "pvc-dns-aggregator.service")
    }

    fn start_metadata_api(&self) -> PrimaryResult<()> {
        self.systemctl("start", "pvc-metadata-api.service")
    }

    fn stop_metadata_api(&self) -> PrimaryResult<()> {
        self.systemctl("stop", "pvc-metadata-api.service")
    }

    fn start_user_api(&self) -> PrimaryResult<()> {
        self.systemctl("start", "pvc-api.service")
    }

    fn stop_user_api(&self) -> PrimaryResult<()> {
        self.systemctl("stop", "pvc-api.service")
    }
}
