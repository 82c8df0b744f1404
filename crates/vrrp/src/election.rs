//! Pure election rules (section 4.4). Kept free of I/O and timers so the
//! comparison logic can be exercised without sockets or a runtime.

use std::net::IpAddr;

/// What a MASTER should do on receiving a peer advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterAction {
    /// We still win; discard the peer's advertisement and keep going.
    StayMaster,
    /// The peer wins; step down to BACKUP.
    StepDown,
    /// The peer announced priority 0 (stepping down itself); not an
    /// election input, but we should advertise promptly to claim the
    /// segment before anyone else's master-down timer fires.
    PeerStepping,
}

/// Unsigned byte-wise comparison of two primary addresses of the same
/// family. Mixed families never happens in practice (the socket layer
/// only delivers same-family peers) but is handled by treating v6 as
/// always greater, which just avoids a panic; it is never exercised.
fn addr_greater(a: IpAddr, b: IpAddr) -> bool {
    match (a, b) {
        (IpAddr::V4(a), IpAddr::V4(b)) => a.octets() > b.octets(),
        (IpAddr::V6(a), IpAddr::V6(b)) => a.octets() > b.octets(),
        (IpAddr::V6(_), IpAddr::V4(_)) => true,
        (IpAddr::V4(_), IpAddr::V6(_)) => false,
    }
}

/// Evaluate an advertisement received while in state MASTER.
pub fn master_on_advertisement(self_priority: u8, self_addr: IpAddr, peer_priority: u8, peer_addr: IpAddr) -> MasterAction {
    if peer_priority == 0 {
        return MasterAction::PeerStepping;
    }
    if peer_priority > self_priority || (peer_priority == self_priority && addr_greater(peer_addr, self_addr)) {
        return MasterAction::StepDown;
    }
    MasterAction::StayMaster
}

/// Whether a BACKUP should reset its master-down timer on receiving this
/// advertisement, and if so, to what duration (`None` means "the normal
/// master-down interval", `Some(skew)` means "accelerate to skew_time").
pub fn backup_on_advertisement(self_priority: u8, preempt: bool, peer_priority: u8) -> Option<ResetKind> {
    if peer_priority == 0 {
        return Some(ResetKind::Accelerated);
    }
    if peer_priority >= self_priority || !preempt {
        return Some(ResetKind::Normal);
    }
    // preempt is true and peer_priority < self_priority: a weaker master
    // is out there; let the timer keep running so we take over at expiry.
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    Normal,
    Accelerated,
}

/// `skew_time = (256 - priority) * advert_interval / 256`, per RFC 3768/5798.
pub fn skew_time_ms(priority: u8, advert_interval_ms: u64) -> u64 {
    (256 - priority as u64) * advert_interval_ms / 256
}

pub fn master_down_interval_ms(priority: u8, advert_interval_ms: u64) -> u64 {
    3 * advert_interval_ms + skew_time_ms(priority, advert_interval_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn equal_priority_tie_break_by_address() {
        let action = master_on_advertisement(150, ip(10, 0, 0, 2), 150, ip(10, 0, 0, 3));
        assert_eq!(action, MasterAction::StepDown);
        let action = master_on_advertisement(150, ip(10, 0, 0, 3), 150, ip(10, 0, 0, 2));
        assert_eq!(action, MasterAction::StayMaster);
    }

    #[test]
    fn higher_priority_peer_wins() {
        assert_eq!(
            master_on_advertisement(100, ip(10, 0, 0, 9), 150, ip(10, 0, 0, 1)),
            MasterAction::StepDown
        );
    }

    #[test]
    fn priority_zero_peer_is_stepping_down_not_an_election_input() {
        assert_eq!(
            master_on_advertisement(100, ip(10, 0, 0, 9), 0, ip(10, 0, 0, 200)),
            MasterAction::PeerStepping
        );
    }

    #[test]
    fn backup_does_not_reset_timer_for_weaker_master_when_preempt() {
        assert_eq!(backup_on_advertisement(150, true, 100), None);
    }

    #[test]
    fn backup_resets_for_weaker_master_without_preempt() {
        assert_eq!(backup_on_advertisement(150, false, 100), Some(ResetKind::Normal));
    }

    #[test]
    fn backup_accelerates_on_priority_zero() {
        assert_eq!(backup_on_advertisement(150, true, 0), Some(ResetKind::Accelerated));
    }

    #[test]
    fn master_down_interval_matches_rfc_formula() {
        // priority 100, 1s interval: skew = (256-100)*1000/256 = 609
        assert_eq!(skew_time_ms(100, 1000), 609);
        assert_eq!(master_down_interval_ms(100, 1000), 3609);
    }
}
