//! Multi-target remote command fan-out for ESXi hosts and vCenter endpoints
//!
//! One operation call = one command, run once per target through a
//! [`RemoteInvoker`], each outcome normalised, all merged into an
//! [`AggregateResult`] keyed by target. The firewall rule-set operations
//! are the two configurations shipped here.

pub mod capabilities;
pub mod config;
pub mod connection;
pub mod error;
pub mod fanout;
pub mod firewall;
pub mod invoker;
pub mod normalize;

pub use config::EngineConfig;
pub use connection::{ConnectionParameters, Protocol};
pub use error::{FanoutError, ParseError, Result};
pub use fanout::{AggregateResult, FanoutEngine, Targets};
pub use firewall::{ExecutionRecord, FirewallModule, FirewallStatus, Ruleset, RulesetToggle};
pub use invoker::{CommandSpec, InvocationOutcome, RemoteInvoker, Target};
pub use normalize::{RemoteFailure, TargetResult};
