//! # chalcedony
//!
//! Randomized convergence stress tests for the Chalcedony CRDTs.
//!
//! Replicas of each CRDT edit concurrently and exchange ops over a
//! simulated network that loses, duplicates and reorders messages. Ops are
//! applied in causal order, and after the network drains every replica
//! must hold the same state.

pub mod config;
pub mod network;

pub use config::{ConfigError, NetworkConfig, StressConfig};
pub use network::{CausalCluster, DeliveryStats, Message, NetworkSimulator};
pub use stress_test::{
    stress_test, stress_test_all, stress_test_scaling, StressError, StressTestStats, Workload,
};
