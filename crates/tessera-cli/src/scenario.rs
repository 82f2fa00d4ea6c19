//! Scripted scenarios over simulated peers.
//!
//! Every scenario builds its peers on a fresh [`SimNetwork`], runs a fixed
//! script, and checks the standard invariants after each phase. Runs with
//! the same seed are identical.

use tessera_client::{ProcessError, Processed, SendFailure};
use tessera_core::{Channel, SessionError, Store, StoreError, TransportEvent};
use tessera_harness::{InvariantRegistry, SimNetwork, SimPeer, StaticDirectory, SystemSnapshot};
use tessera_proto::Identity;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Name of the group channel used by the group scenarios.
pub const GROUP_NAME: &str = "crew";

/// Which script to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Scenario {
    /// Two peers chat, with delivery and read receipts
    Pairwise,
    /// One peer bootstraps a group and everyone replies
    Group,
    /// A group grows, shrinks and rotates its session
    Membership,
    /// A member is unreachable during bootstrap, then recovers
    Flaky,
}

/// Scenario parameters.
#[derive(Debug, Clone, Copy)]
pub struct ScenarioConfig {
    /// Script to run
    pub scenario: Scenario,
    /// Peers besides the initiator
    pub members: usize,
    /// Messages the initiator sends per phase
    pub messages: usize,
    /// Seed for every peer's environment
    pub seed: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self { scenario: Scenario::Pairwise, members: 2, messages: 3, seed: 0 }
    }
}

/// What happened during a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Report {
    /// Sends the transport accepted
    pub sent: usize,
    /// Sends that failed
    pub failed: usize,
    /// Chat messages persisted by receivers
    pub stored: usize,
    /// Inbound events that ended in an error
    pub rejected: usize,
    /// Service messages taken in
    pub service: usize,
}

/// Scenario failures.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// Not enough peers for the chosen script
    #[error("{scenario:?} needs at least {min} members, got {got}")]
    TooFewMembers {
        /// Script that was asked for
        scenario: Scenario,
        /// Smallest supported member count
        min: usize,
        /// Requested member count
        got: usize,
    },

    /// A send the script relies on failed
    #[error(transparent)]
    Send(#[from] SendFailure),

    /// A registry operation failed
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The store refused a write
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invariants were violated
    #[error("{count} invariant violation(s) after {phase}, first: {first}")]
    Invariants {
        /// Phase after which the check ran
        phase: &'static str,
        /// Number of violations
        count: usize,
        /// First violation
        first: String,
    },
}

/// Run the configured scenario to completion.
pub async fn run(config: ScenarioConfig) -> Result<Report, ScenarioError> {
    let min = match config.scenario {
        Scenario::Pairwise => 1,
        Scenario::Group | Scenario::Flaky => 2,
        Scenario::Membership => 3,
    };
    if config.members < min {
        return Err(ScenarioError::TooFewMembers {
            scenario: config.scenario,
            min,
            got: config.members,
        });
    }

    let mut sim = Simulation::new(config);
    info!(
        scenario = ?config.scenario,
        members = config.members,
        seed = config.seed,
        "scenario starting"
    );
    match config.scenario {
        Scenario::Pairwise => sim.pairwise().await?,
        Scenario::Group => sim.group().await?,
        Scenario::Membership => sim.membership().await?,
        Scenario::Flaky => sim.flaky().await?,
    }
    let report = sim.report;
    info!(?report, "scenario finished");
    Ok(report)
}

struct Simulation {
    config: ScenarioConfig,
    network: SimNetwork,
    peers: Vec<SimPeer>,
    invariants: InvariantRegistry,
    report: Report,
}

impl Simulation {
    fn new(config: ScenarioConfig) -> Self {
        let network = SimNetwork::new();
        let directory = StaticDirectory::new();
        let peers = (0..=config.members)
            .map(|i| {
                let peer = SimPeer::new(
                    &peer_name(i),
                    config.seed.wrapping_add(i as u64),
                    &network,
                    &directory,
                );
                peer.connect();
                peer
            })
            .collect();
        Self {
            config,
            network,
            peers,
            invariants: InvariantRegistry::standard(),
            report: Report::default(),
        }
    }

    async fn pairwise(&mut self) -> Result<(), ScenarioError> {
        self.network.enable_delivery_receipts();
        let to = self.peers[1].identity().to_string();
        for n in 0..self.config.messages {
            self.send(0, &to, &format!("message {n}")).await?;
        }

        self.stream_to(1).await;
        self.stream_to(0).await;
        self.check("delivery")?;

        let from = self.peers[0].identity().clone();
        if self.peers[1].client.receipts().open_channel(&from).await? {
            debug!(channel = %from, "read receipt sent");
        }
        self.deliver_all().await;
        self.check("read")
    }

    async fn group(&mut self) -> Result<(), ScenarioError> {
        self.create_group(self.peers.len())?;
        for n in 0..self.config.messages {
            self.send(0, GROUP_NAME, &format!("announcement {n}")).await?;
        }
        self.deliver_all().await;
        self.check("bootstrap")?;

        for i in 1..self.peers.len() {
            self.send(i, GROUP_NAME, &format!("reply from {}", peer_name(i))).await?;
        }
        self.deliver_all().await;
        self.check("replies")
    }

    async fn membership(&mut self) -> Result<(), ScenarioError> {
        let last = self.peers.len() - 1;
        self.create_group(last)?;
        self.send(0, GROUP_NAME, "before changes").await?;
        self.deliver_all().await;
        self.check("bootstrap")?;

        let group = Identity::new(GROUP_NAME);
        let newcomer = self.peers[last].identity().clone();
        self.change(&group, &[newcomer], &[]).await?;
        self.register_group(0..=last);
        self.send(0, GROUP_NAME, "welcome").await?;
        self.deliver_all().await;
        self.check("add")?;

        let leaver = self.peers[1].identity().clone();
        self.change(&group, &[], &[leaver]).await?;
        self.register_group((0..=last).filter(|i| *i != 1));
        self.send(0, GROUP_NAME, "one less").await?;
        self.deliver_all().await;
        self.check("remove")?;

        let rotated = self.peers[0].client.registry().rotate(&group).await?;
        info!(session_id = %rotated.session_id, "group session rotated");
        self.send(0, GROUP_NAME, "fresh keys").await?;
        self.deliver_all().await;
        self.check("rotate")
    }

    async fn flaky(&mut self) -> Result<(), ScenarioError> {
        self.create_group(self.peers.len())?;
        let flaky = self.peers[self.peers.len() - 1].identity().clone();
        self.network.fail_deliveries_to(flaky.clone());

        match self.peers[0].send_text(GROUP_NAME, "first try").await {
            Ok(receipt) => warn!(id = %receipt.transport_id, "send unexpectedly succeeded"),
            Err(failure) => {
                self.report.failed += 1;
                info!(error = %failure, retryable = failure.error.is_retryable(), "bootstrap failed");
            },
        }

        self.network.heal(&flaky);
        self.send(0, GROUP_NAME, "second try").await?;
        self.deliver_all().await;
        self.check("recovery")
    }

    async fn send(&mut self, from: usize, to: &str, body: &str) -> Result<(), ScenarioError> {
        let receipt = self.peers[from].send_text(to, body).await?;
        debug!(from = %self.peers[from].identity(), to, id = %receipt.transport_id, "sent");
        self.report.sent += 1;
        Ok(())
    }

    async fn change(
        &mut self,
        group: &Identity,
        add: &[Identity],
        remove: &[Identity],
    ) -> Result<(), ScenarioError> {
        let registry = self.peers[0].client.registry();
        let change = registry.change_membership(group, add, remove).await?;
        registry.announce_membership(&change).await?;
        info!(group = %group, added = add.len(), removed = remove.len(), "membership announced");
        Ok(())
    }

    /// Group channel at the initiator over peers `1..size`.
    fn create_group(&mut self, size: usize) -> Result<(), ScenarioError> {
        let cards = self.peers[1..size].iter().map(SimPeer::card).collect();
        self.peers[0].store.create_channel(Channel::group(Identity::new(GROUP_NAME), cards))?;
        self.register_group(0..size);
        Ok(())
    }

    fn register_group(&self, members: impl IntoIterator<Item = usize>) {
        let members = members.into_iter().map(|i| self.peers[i].identity().clone()).collect();
        self.network.register_group(Identity::new(GROUP_NAME), members);
    }

    /// Deliver every peer's queue, repeating until the network is quiet.
    async fn deliver_all(&mut self) {
        loop {
            let mut handled = 0;
            for i in 0..self.peers.len() {
                let results = self.peers[i].deliver().await;
                handled += results.len();
                for result in results {
                    self.tally(result);
                }
            }
            if handled == 0 {
                break;
            }
        }
    }

    /// Deliver one peer's queue through a spawned router task.
    async fn stream_to(&mut self, peer: usize) {
        let events: Vec<TransportEvent> = self.peers[peer].take_events();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.peers[peer].client.router().run(rx));

        let stored_before = self.peers[peer].store.all_messages().len();
        for event in events {
            if tx.send(event).is_err() {
                break;
            }
        }
        drop(tx);
        if let Err(e) = task.await {
            warn!(error = %e, "router task failed");
        }
        let stored_after = self.peers[peer].store.all_messages().len();
        self.report.stored += stored_after.saturating_sub(stored_before);
    }

    fn tally(&mut self, result: Result<Option<Processed>, ProcessError>) {
        match result {
            Ok(Some(Processed::Stored(_))) => self.report.stored += 1,
            Ok(Some(Processed::Service(_))) => self.report.service += 1,
            Ok(Some(Processed::CallSignal) | None) => {},
            Err(e) => {
                self.report.rejected += 1;
                warn!(error = %e, "inbound event rejected");
            },
        }
    }

    fn check(&self, phase: &'static str) -> Result<(), ScenarioError> {
        let peers: Vec<&SimPeer> = self.peers.iter().collect();
        let snapshot = SystemSnapshot::capture(&peers);
        match self.invariants.check_all(&snapshot) {
            Ok(()) => {
                debug!(phase, peers = peers.len(), "invariants hold");
                Ok(())
            },
            Err(violations) => Err(ScenarioError::Invariants {
                phase,
                count: violations.len(),
                first: violations.first().map(ToString::to_string).unwrap_or_default(),
            }),
        }
    }
}

fn peer_name(index: usize) -> String {
    const NAMES: [&str; 6] = ["alice", "bob", "carol", "dave", "erin", "frank"];
    match NAMES.get(index) {
        Some(name) => (*name).to_string(),
        None => format!("peer{index}"),
    }
}
