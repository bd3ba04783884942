//! Term-based leader election.
//!
//! Follower → (no heartbeat before the election timeout) → Candidate →
//! (majority of votes in the term) → Leader. A candidate that times out
//! goes back to Follower and retries after a randomized delay.
//!
//! Safety comes from two rules: terms never decrease, and a node grants at
//! most one vote per term, to the first candidate it hears from.

use crate::config::ElectionConfig;
use crate::messages::{HeartbeatReply, NodeId, VoteReply};
use crate::network::{with_timeout, PeerNetwork};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

/// Role of a node in the current term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Follower => "follower",
            Role::Candidate => "candidate",
            Role::Leader => "leader",
        };
        f.write_str(s)
    }
}

/// Votes needed to win an election in a cluster of `cluster_size` nodes.
pub fn election_majority(cluster_size: usize) -> usize {
    cluster_size / 2 + 1
}

type RoleCallback = Arc<dyn Fn(Role) + Send + Sync>;
type LeaderCallback = Arc<dyn Fn(Option<NodeId>) + Send + Sync>;

/// Point-in-time copy of the election state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionStatus {
    pub role: Role,
    pub term: u64,
    pub current_leader: Option<NodeId>,
    pub voted_for: Option<NodeId>,
}

struct ElectionState {
    term: u64,
    voted_for: Option<NodeId>,
    current_leader: Option<NodeId>,
    role: Role,
    /// When a follower starts an election, or a candidate gives up.
    deadline: Instant,
}

/// Changes made under the state lock, announced after it is released.
#[derive(Default)]
struct Transition {
    role: Option<Role>,
    leader: Option<Option<NodeId>>,
}

impl ElectionState {
    fn set_role(&mut self, role: Role, t: &mut Transition) {
        if self.role != role {
            self.role = role;
            t.role = Some(role);
        }
    }

    fn set_leader(&mut self, leader: Option<NodeId>, t: &mut Transition) {
        if self.current_leader != leader {
            self.current_leader = leader.clone();
            t.leader = Some(leader);
        }
    }

    /// Step down to follower, moving to `term` if it is newer.
    fn adopt_term(&mut self, term: u64, t: &mut Transition) {
        if term > self.term {
            self.term = term;
            self.voted_for = None;
            self.set_leader(None, t);
        }
        self.set_role(Role::Follower, t);
    }
}

/// Election state machine for one node.
pub struct LeaderElection {
    node_id: NodeId,
    peers: Vec<NodeId>,
    config: ElectionConfig,
    network: Arc<dyn PeerNetwork>,
    state: Mutex<ElectionState>,
    role_callbacks: Mutex<Vec<RoleCallback>>,
    leader_callbacks: Mutex<Vec<LeaderCallback>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    heartbeats: Mutex<Option<JoinHandle<()>>>,
}

impl LeaderElection {
    /// Create a follower in term 0.
    pub fn new(
        node_id: impl Into<NodeId>,
        peers: Vec<NodeId>,
        config: ElectionConfig,
        network: Arc<dyn PeerNetwork>,
    ) -> Arc<Self> {
        let first_timeout = random_duration(
            config.election_timeout_min_ms,
            config.election_timeout_max_ms,
        );
        Arc::new(Self {
            node_id: node_id.into(),
            peers,
            config,
            network,
            state: Mutex::new(ElectionState {
                term: 0,
                voted_for: None,
                current_leader: None,
                role: Role::Follower,
                deadline: Instant::now() + first_timeout,
            }),
            role_callbacks: Mutex::new(Vec::new()),
            leader_callbacks: Mutex::new(Vec::new()),
            timer: Mutex::new(None),
            heartbeats: Mutex::new(None),
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn peers(&self) -> &[NodeId] {
        &self.peers
    }

    /// Peers plus this node.
    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    pub fn majority(&self) -> usize {
        election_majority(self.cluster_size())
    }

    pub fn role(&self) -> Role {
        self.state.lock().role
    }

    pub fn term(&self) -> u64 {
        self.state.lock().term
    }

    pub fn current_leader(&self) -> Option<NodeId> {
        self.state.lock().current_leader.clone()
    }

    pub fn voted_for(&self) -> Option<NodeId> {
        self.state.lock().voted_for.clone()
    }

    pub fn is_leader(&self) -> bool {
        self.role() == Role::Leader
    }

    fn is_leader_in(&self, term: u64) -> bool {
        let s = self.state.lock();
        s.role == Role::Leader && s.term == term
    }

    pub fn status(&self) -> ElectionStatus {
        let s = self.state.lock();
        ElectionStatus {
            role: s.role,
            term: s.term,
            current_leader: s.current_leader.clone(),
            voted_for: s.voted_for.clone(),
        }
    }

    // =========================================================================
    // Callbacks
    // =========================================================================

    /// Called with the new role on every role change.
    pub fn on_role_change(&self, callback: impl Fn(Role) + Send + Sync + 'static) {
        self.role_callbacks.lock().push(Arc::new(callback));
    }

    /// Called with the new leader (or `None`) on every leader change.
    pub fn on_leader_change(&self, callback: impl Fn(Option<NodeId>) + Send + Sync + 'static) {
        self.leader_callbacks.lock().push(Arc::new(callback));
    }

    /// Apply `f` under the state lock, then fire callbacks without it.
    fn transition<R>(&self, f: impl FnOnce(&mut ElectionState, &mut Transition) -> R) -> R {
        let mut t = Transition::default();
        let result = {
            let mut state = self.state.lock();
            f(&mut state, &mut t)
        };

        if let Some(role) = t.role {
            let callbacks = self.role_callbacks.lock().clone();
            for cb in callbacks {
                cb(role);
            }
        }
        if let Some(leader) = t.leader {
            let callbacks = self.leader_callbacks.lock().clone();
            for cb in callbacks {
                cb(leader.clone());
            }
        }
        result
    }

    fn election_timeout(&self) -> Duration {
        random_duration(
            self.config.election_timeout_min_ms,
            self.config.election_timeout_max_ms,
        )
    }

    fn retry_delay(&self) -> Duration {
        random_duration(self.config.retry_delay_min_ms, self.config.retry_delay_max_ms)
    }

    // =========================================================================
    // Background tasks
    // =========================================================================

    /// Start the election timer.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_timer().await });
        if let Some(old) = self.timer.lock().replace(handle) {
            old.abort();
        }
    }

    /// Stop the election timer and any heartbeat loop.
    pub fn stop(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.heartbeats.lock().take() {
            handle.abort();
        }
    }

    async fn run_timer(self: Arc<Self>) {
        loop {
            let (role, deadline) = {
                let s = self.state.lock();
                (s.role, s.deadline)
            };

            match role {
                Role::Leader => sleep(self.config.heartbeat_interval()).await,
                _ if Instant::now() < deadline => sleep_until(deadline).await,
                Role::Follower => self.start_election().await,
                Role::Candidate => self.abandon_candidacy(),
            }
        }
    }

    /// Become a candidate for the next term and ask every peer for a vote.
    ///
    /// Returns once this node has won, has seen a newer term, or every vote
    /// request has been answered or timed out.
    pub async fn start_election(self: &Arc<Self>) {
        let timeout = self.election_timeout();
        let term = self.transition(|s, t| {
            s.term += 1;
            s.voted_for = Some(self.node_id.clone());
            s.set_leader(None, t);
            s.set_role(Role::Candidate, t);
            s.deadline = Instant::now() + timeout;
            s.term
        });

        let majority = self.majority();
        info!(node = %self.node_id, term, majority, "Starting election");

        let mut granted = 1;
        if granted >= majority {
            self.become_leader(term, granted);
            return;
        }

        let (tx, mut rx) = mpsc::channel(self.peers.len().max(1));
        for peer in &self.peers {
            let tx = tx.clone();
            let this = Arc::clone(self);
            let peer = peer.clone();
            tokio::spawn(async move {
                let result = with_timeout(
                    &peer,
                    this.config.rpc_timeout(),
                    this.network.request_vote(&peer, term, &this.node_id),
                )
                .await;
                let _ = tx.send((peer, result)).await;
            });
        }
        drop(tx);

        while let Some((peer, result)) = rx.recv().await {
            match result {
                Ok(reply) if reply.term > term => {
                    debug!(node = %self.node_id, %peer, term = reply.term, "Peer has newer term");
                    self.observe_term(reply.term);
                    return;
                }
                Ok(reply) if reply.vote_granted => {
                    granted += 1;
                    debug!(node = %self.node_id, %peer, term, granted, "Vote granted");
                    if granted >= majority {
                        self.become_leader(term, granted);
                        return;
                    }
                }
                Ok(_) => debug!(node = %self.node_id, %peer, term, "Vote denied"),
                Err(e) => warn!(node = %self.node_id, %peer, error = %e, "Vote request failed"),
            }
        }

        info!(node = %self.node_id, term, granted, majority, "Election ended without majority");
    }

    /// Manually trigger an election now.
    pub async fn force_election(self: &Arc<Self>) {
        info!(node = %self.node_id, "Forcing election");
        self.start_election().await;
    }

    fn become_leader(self: &Arc<Self>, term: u64, votes: usize) {
        let won = self.transition(|s, t| {
            if s.term != term || s.role != Role::Candidate {
                return false;
            }
            s.set_role(Role::Leader, t);
            s.set_leader(Some(self.node_id.clone()), t);
            true
        });

        if won {
            info!(node = %self.node_id, term, votes, "Became leader");
            let this = Arc::clone(self);
            let handle = tokio::spawn(async move { this.run_heartbeats(term).await });
            if let Some(old) = self.heartbeats.lock().replace(handle) {
                old.abort();
            }
        }
    }

    fn abandon_candidacy(&self) {
        let delay = self.retry_delay();
        let gave_up = self.transition(|s, t| {
            if s.role != Role::Candidate {
                return None;
            }
            s.set_role(Role::Follower, t);
            s.deadline = Instant::now() + delay;
            Some(s.term)
        });

        if let Some(term) = gave_up {
            info!(
                node = %self.node_id,
                term,
                retry_ms = delay.as_millis() as u64,
                "Election timed out, retrying later"
            );
        }
    }

    async fn run_heartbeats(self: Arc<Self>, term: u64) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval());
        loop {
            ticker.tick().await;
            if !self.is_leader_in(term) {
                debug!(node = %self.node_id, term, "Heartbeat loop stopped");
                return;
            }

            for peer in &self.peers {
                let this = Arc::clone(&self);
                let peer = peer.clone();
                tokio::spawn(async move {
                    let result = with_timeout(
                        &peer,
                        this.config.rpc_timeout(),
                        this.network.heartbeat(&peer, term, &this.node_id),
                    )
                    .await;
                    match result {
                        Ok(reply) if reply.term > term => this.observe_term(reply.term),
                        Ok(_) => {}
                        Err(e) => debug!(node = %this.node_id, %peer, error = %e, "Heartbeat failed"),
                    }
                });
            }
        }
    }

    // =========================================================================
    // Inbound RPCs
    // =========================================================================

    /// Decide a vote request.
    ///
    /// A newer term makes this node a follower in that term first. Within a
    /// term the vote goes to the first candidate that asks; a repeat request
    /// from that same candidate is granted again.
    pub fn handle_request_vote(&self, term: u64, candidate: &NodeId) -> VoteReply {
        let timeout = self.election_timeout();
        let reply = self.transition(|s, t| {
            if term < s.term {
                return VoteReply {
                    term: s.term,
                    vote_granted: false,
                };
            }
            // Only a strictly newer term demotes us. A same-term request
            // leaves a leader in place; it already voted for itself.
            if term > s.term {
                s.adopt_term(term, t);
            }

            let granted = match &s.voted_for {
                None => true,
                Some(voted) => voted == candidate,
            };
            if granted {
                s.voted_for = Some(candidate.clone());
                s.deadline = Instant::now() + timeout;
            }
            VoteReply {
                term: s.term,
                vote_granted: granted,
            }
        });

        debug!(
            node = %self.node_id,
            %candidate,
            term,
            granted = reply.vote_granted,
            "Handled vote request"
        );
        reply
    }

    /// Accept a heartbeat from a leader whose term is at least ours.
    pub fn handle_heartbeat(&self, term: u64, leader: &NodeId) -> HeartbeatReply {
        let timeout = self.election_timeout();
        self.transition(|s, t| {
            if term < s.term {
                return HeartbeatReply {
                    term: s.term,
                    accepted: false,
                };
            }
            s.adopt_term(term, t);
            s.set_leader(Some(leader.clone()), t);
            s.deadline = Instant::now() + timeout;
            HeartbeatReply {
                term: s.term,
                accepted: true,
            }
        })
    }

    /// Step down if `term` is newer than ours.
    pub fn observe_term(&self, term: u64) {
        let timeout = self.election_timeout();
        self.transition(|s, t| {
            if term > s.term {
                s.adopt_term(term, t);
                s.deadline = Instant::now() + timeout;
            }
        });
    }

    /// Give up leadership or candidacy without changing term.
    pub fn step_down(&self) {
        let timeout = self.election_timeout();
        let stepped = self.transition(|s, t| {
            if s.role == Role::Follower {
                return false;
            }
            s.set_role(Role::Follower, t);
            if s.current_leader.as_ref() == Some(&self.node_id) {
                s.set_leader(None, t);
            }
            s.deadline = Instant::now() + timeout;
            true
        });
        if stepped {
            info!(node = %self.node_id, "Stepped down");
        }
    }
}

fn random_duration(min_ms: u64, max_ms: u64) -> Duration {
    let ms = if min_ms >= max_ms {
        min_ms
    } else {
        rand::thread_rng().gen_range(min_ms..=max_ms)
    };
    Duration::from_millis(ms)
}
