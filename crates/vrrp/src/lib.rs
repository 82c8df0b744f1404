//! VRRP instance runtime: election rules, the per-instance state machine,
//! sync-group coherence and the raw protocol socket.
//!
//! Wire framing lives in `vrrp-proto`; kernel/ARP/NA/nftables side effects
//! live in `effector`; health-signal aggregation lives in `tracker`. This
//! crate is the glue that drives them off received and synthesized VRRP
//! advertisements.

mod election;
mod fsm;
mod instance;
mod socket;
mod stats;
mod sync_group;

pub use election::{master_down_interval_ms, skew_time_ms, MasterAction, ResetKind};
pub use fsm::Instance;
pub use instance::{InstanceConfig, State, VipConfig};
pub use socket::{interface_index, VrrpSocket};
pub use stats::InstanceStats;
pub use sync_group::{coerce, transition_order};
