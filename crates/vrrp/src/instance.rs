//! Instance configuration and run-time state container (section 3).

use std::net::IpAddr;
use std::time::Duration;

use vrrp_proto::{Auth, Version};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Backup,
    Master,
    Fault,
}

#[derive(Debug, Clone)]
pub struct VipConfig {
    pub address: IpAddr,
    pub prefix_len: u8,
    /// If set, a programming failure for this VIP is logged but does not
    /// force the instance to FAULT.
    pub dont_track: bool,
}

/// Static configuration for one VRRP instance. Constructed once at load
/// (or reload) time; everything that changes at runtime lives in
/// [`crate::fsm::Instance`]'s interior state instead.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub name: String,
    pub vrid: u8,
    pub version: Version,
    pub interface_name: String,
    pub interface_index: u32,
    pub sync_group: Option<String>,
    pub base_priority: u8,
    pub advert_interval_ms: u64,
    pub preempt: bool,
    pub preempt_delay: Duration,
    pub accept_mode: bool,
    pub vips: Vec<VipConfig>,
    pub auth: Auth,
    pub primary_ip: IpAddr,
    pub unicast_peers: Vec<IpAddr>,
    /// Invoked as `<script> INSTANCE <name> <new_state> <priority>` on
    /// every transition; exit code is ignored.
    pub notify_script: Option<String>,
}

impl InstanceConfig {
    /// `base_priority == 255` is the address-owner convention: always
    /// MASTER while its interface is up, preempt implied.
    pub fn is_owner(&self) -> bool {
        self.base_priority == 255
    }

    pub fn effective_preempt(&self) -> bool {
        self.preempt || self.is_owner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> InstanceConfig {
        InstanceConfig {
            name: "vip1".into(),
            vrid: 51,
            version: Version::V3,
            interface_name: "eth0".into(),
            interface_index: 2,
            sync_group: None,
            base_priority: 100,
            advert_interval_ms: 1000,
            preempt: false,
            preempt_delay: Duration::ZERO,
            accept_mode: false,
            vips: Vec::new(),
            auth: Auth::None,
            primary_ip: "10.0.0.2".parse().unwrap(),
            unicast_peers: Vec::new(),
            notify_script: None,
        }
    }

    #[test]
    fn priority_255_is_owner() {
        let mut cfg = base_config();
        cfg.base_priority = 255;
        assert!(cfg.is_owner());
    }

    #[test]
    fn priority_below_255_is_not_owner() {
        let cfg = base_config();
        assert!(!cfg.is_owner());
    }

    #[test]
    fn owner_implies_effective_preempt_even_if_configured_false() {
        let mut cfg = base_config();
        cfg.base_priority = 255;
        cfg.preempt = false;
        assert!(cfg.effective_preempt());
    }

    #[test]
    fn non_owner_effective_preempt_follows_configured_flag() {
        let mut cfg = base_config();
        cfg.preempt = true;
        assert!(cfg.effective_preempt());
        cfg.preempt = false;
        assert!(!cfg.effective_preempt());
    }
}
