//! Per-instance counters (stats dump, section 6).

#[derive(Debug, Clone, Default)]
pub struct InstanceStats {
    pub adverts_received: u64,
    pub adverts_sent: u64,
    pub master_transitions: u64,

    pub length_err: u64,
    pub ttl_err: u64,
    pub invalid_type_err: u64,
    pub interval_err: u64,
    pub addr_list_err: u64,
    pub auth_err: u64,

    pub priority_zero_received: u64,
    pub priority_zero_sent: u64,
}
