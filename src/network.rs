//! Simulated op network with causal delivery.
//!
//! Every local op is broadcast to all other replicas as one message per
//! peer. The network may lose, duplicate or reorder messages; lost ones
//! are retransmitted once everything else has been delivered.
//!
//! Op-based CRDTs need causal delivery, so each replica keeps a buffer of
//! messages that arrived too early. A message carries the sender's vector
//! clock at the time of the op and is applied once the receiver has
//! applied everything that clock covers. Duplicates of already-applied
//! messages are still handed to the replica, which must ignore them.

use crate::config::NetworkConfig;
use ocs_core::{Replica, SiteId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// An op travelling from one replica to another.
#[derive(Clone, Debug)]
pub struct Message<O> {
    pub from: usize,
    pub to: usize,
    /// Ops of each replica the sender had applied when it made `op`,
    /// `op` itself included.
    pub deps: Vec<u64>,
    pub op: O,
}

impl<O> Message<O> {
    /// Position of the op in its sender's history, starting at 1.
    pub fn seq(&self) -> u64 {
        self.deps[self.from]
    }
}

#[derive(Debug)]
pub struct NetworkSimulator<O> {
    in_flight: VecDeque<Message<O>>,
    lost: Vec<Message<O>>,
    config: NetworkConfig,
    rng: StdRng,
}

impl<O: Clone> NetworkSimulator<O> {
    pub fn new(config: NetworkConfig, seed: u64) -> Self {
        Self {
            in_flight: VecDeque::new(),
            lost: Vec::new(),
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn send(&mut self, msg: Message<O>) {
        if self.rng.gen_bool(self.config.loss_rate) {
            self.lost.push(msg);
            return;
        }

        if self.rng.gen_bool(self.config.dup_rate) {
            self.in_flight.push_back(msg.clone());
        }

        self.in_flight.push_back(msg);
        if self.rng.gen_bool(self.config.reorder_rate) && self.in_flight.len() > 1 {
            let last = self.in_flight.len() - 1;
            let pos = self.rng.gen_range(0..last);
            self.in_flight.swap(pos, last);
        }
    }

    pub fn receive(&mut self) -> Option<Message<O>> {
        self.in_flight.pop_front()
    }

    /// Put lost messages back on the wire. Retransmission is reliable.
    pub fn retransmit_lost(&mut self) {
        self.in_flight.extend(self.lost.drain(..));
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn lost_count(&self) -> usize {
        self.lost.len()
    }
}

/// Counters describing what the network did during a run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Messages put on the wire, one per peer per op.
    pub sent: usize,
    /// Messages applied in causal order.
    pub delivered: usize,
    /// Copies of already-applied messages handed to a replica again.
    pub duplicates: usize,
    /// Messages that arrived before their dependencies and had to wait.
    pub held_back: usize,
    pub retransmitted: usize,
}

/// A group of replicas of one CRDT connected by a [`NetworkSimulator`].
pub struct CausalCluster<R: Replica> {
    replicas: Vec<R>,
    /// `clocks[i][j]`: ops of replica `j` applied at replica `i`.
    clocks: Vec<Vec<u64>>,
    /// Messages each replica received ahead of their dependencies.
    buffers: Vec<Vec<Message<R::Op>>>,
    network: NetworkSimulator<R::Op>,
    stats: DeliveryStats,
}

impl<R: Replica> CausalCluster<R> {
    /// Create `n` replicas: `origin` and `n - 1` copies of it with site ids
    /// 2 and up. `origin` should use site id 1.
    pub fn new(origin: R, n: usize, config: NetworkConfig, seed: u64) -> Self {
        let mut replicas = Vec::with_capacity(n);
        for idx in 1..n {
            replicas.push(origin.replicate((idx + 1) as SiteId));
        }
        replicas.insert(0, origin);

        Self {
            replicas,
            clocks: vec![vec![0; n]; n],
            buffers: (0..n).map(|_| Vec::new()).collect(),
            network: NetworkSimulator::new(config, seed),
            stats: DeliveryStats::default(),
        }
    }

    pub fn replica(&self, idx: usize) -> &R {
        &self.replicas[idx]
    }

    pub fn replicas(&self) -> &[R] {
        &self.replicas
    }

    pub fn stats(&self) -> &DeliveryStats {
        &self.stats
    }

    pub fn in_flight(&self) -> usize {
        self.network.in_flight_count()
    }

    /// Messages received but still waiting for their dependencies.
    pub fn pending(&self) -> usize {
        self.buffers.iter().map(Vec::len).sum()
    }

    /// Apply a local mutation and broadcast the op it produced, if any.
    pub fn mutate<F>(&mut self, idx: usize, mutator: F) -> Option<R::Op>
    where
        F: FnOnce(&mut R) -> Option<R::Op>,
    {
        let op = mutator(&mut self.replicas[idx])?;
        self.broadcast(idx, op.clone());
        Some(op)
    }

    /// Install a replica that was edited away from the cluster and
    /// broadcast the ops it made, oldest first.
    ///
    /// Panics if `replica` belongs to another site.
    pub fn commit(&mut self, idx: usize, replica: R, ops: Vec<R::Op>) {
        assert_eq!(
            replica.site_id(),
            self.replicas[idx].site_id(),
            "Replica {} replaced by another site",
            idx
        );
        self.replicas[idx] = replica;
        for op in ops {
            self.broadcast(idx, op);
        }
    }

    /// Send an op already applied at `from` to every other replica.
    pub fn broadcast(&mut self, from: usize, op: R::Op) {
        self.clocks[from][from] += 1;
        let deps = self.clocks[from].clone();
        for to in 0..self.replicas.len() {
            if to != from {
                self.network.send(Message {
                    from,
                    to,
                    deps: deps.clone(),
                    op: op.clone(),
                });
                self.stats.sent += 1;
            }
        }
    }

    /// Take one message off the wire. Returns `false` when nothing is in flight.
    pub fn process_one(&mut self) -> bool {
        let Some(msg) = self.network.receive() else {
            return false;
        };
        let to = msg.to;
        if !is_stale(&msg, &self.clocks[to]) && !is_ready(&msg, &self.clocks[to]) {
            trace!(from = msg.from, to, seq = msg.seq(), "holding back early message");
            self.stats.held_back += 1;
        }
        self.buffers[to].push(msg);
        self.flush(to);
        true
    }

    /// Deliver everything, retransmitting lost messages until none remain.
    pub fn drain(&mut self) {
        loop {
            while self.process_one() {}
            let lost = self.network.lost_count();
            if lost == 0 {
                break;
            }
            debug!(lost, "retransmitting lost messages");
            self.stats.retransmitted += lost;
            self.network.retransmit_lost();
        }
    }

    pub fn is_converged(&self) -> bool
    where
        R: PartialEq,
    {
        match self.replicas.split_first() {
            Some((first, rest)) => rest.iter().all(|r| r == first),
            None => true,
        }
    }

    /// Apply every buffered message of replica `to` that has become
    /// deliverable, in arrival order.
    fn flush(&mut self, to: usize) {
        loop {
            let clock = &self.clocks[to];
            let Some(pos) = self.buffers[to]
                .iter()
                .position(|msg| is_stale(msg, clock) || is_ready(msg, clock))
            else {
                break;
            };
            let msg = self.buffers[to].remove(pos);
            if is_stale(&msg, &self.clocks[to]) {
                trace!(from = msg.from, to, seq = msg.seq(), "redelivering duplicate");
                self.replicas[to].execute_op(&msg.op);
                self.stats.duplicates += 1;
            } else {
                self.replicas[to].execute_op(&msg.op);
                self.clocks[to][msg.from] += 1;
                self.stats.delivered += 1;
            }
        }
    }
}

/// The receiver already applied this op.
fn is_stale<O>(msg: &Message<O>, clock: &[u64]) -> bool {
    msg.seq() <= clock[msg.from]
}

/// The op is the sender's next one and everything it depends on is applied.
fn is_ready<O>(msg: &Message<O>, clock: &[u64]) -> bool {
    msg.seq() == clock[msg.from] + 1
        && msg
            .deps
            .iter()
            .enumerate()
            .all(|(site, &seen)| site == msg.from || seen <= clock[site])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocs_core::{List, ORSet};

    #[test]
    fn test_reliable_network_preserves_order() {
        let mut network = NetworkSimulator::new(NetworkConfig::default(), 7);
        for seq in 1..=3 {
            network.send(Message {
                from: 0,
                to: 1,
                deps: vec![seq, 0],
                op: seq,
            });
        }
        let received: Vec<u64> = std::iter::from_fn(|| network.receive()).map(|m| m.op).collect();
        assert_eq!(received, vec![1, 2, 3]);
    }

    #[test]
    fn test_lost_messages_are_retransmitted() {
        let mut network = NetworkSimulator::new(NetworkConfig::lossy(0.5), 11);
        for seq in 1..=20 {
            network.send(Message {
                from: 0,
                to: 1,
                deps: vec![seq, 0],
                op: seq,
            });
        }
        assert!(network.lost_count() > 0);
        assert_eq!(network.lost_count() + network.in_flight_count(), 20);
        network.retransmit_lost();
        assert_eq!(network.in_flight_count(), 20);
        assert_eq!(network.lost_count(), 0);
    }

    #[test]
    fn test_cluster_buffers_until_dependencies_arrive() {
        let config = NetworkConfig {
            reorder_rate: 1.0,
            ..Default::default()
        };
        let mut cluster = CausalCluster::new(List::new(1), 3, config, 3);

        // Replica 1 sees replica 0's op before making its own.
        cluster.mutate(0, |list| Some(list.push('a')));
        while cluster.process_one() {}
        cluster.mutate(1, |list| Some(list.remove(0).1));
        cluster.mutate(0, |list| Some(list.push('b')));
        cluster.drain();

        assert_eq!(cluster.pending(), 0);
        assert!(cluster.is_converged());
        let values: Vec<char> = cluster.replica(2).values().copied().collect();
        assert_eq!(values, vec!['b']);
        assert_eq!(cluster.stats().delivered, 6);
    }

    #[test]
    fn test_cluster_converges_on_chaotic_network() {
        let mut cluster = CausalCluster::new(ORSet::new(1), 4, NetworkConfig::chaotic(), 5);
        for step in 0..200u32 {
            let idx = (step as usize * 7) % 4;
            let value = step % 13;
            cluster.mutate(idx, |set| {
                if step % 3 == 0 {
                    set.remove(&value)
                } else {
                    Some(set.insert(value))
                }
            });
            if step % 5 == 0 {
                cluster.process_one();
            }
        }
        cluster.drain();

        assert_eq!(cluster.pending(), 0);
        assert!(cluster.is_converged());
        let stats = cluster.stats();
        assert_eq!(stats.delivered, stats.sent);
        assert!(stats.duplicates > 0);
    }
}
