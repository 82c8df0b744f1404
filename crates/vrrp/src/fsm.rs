//! Per-instance VRRP state machine (section 4.4): drives BACKUP/MASTER/
//! FAULT transitions, timers and the validation-on-receive pipeline.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use common::Result;
use effector::{ArpSocket, Effector, NdpSocket, Vip};
use netlink::NetlinkSocket;
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio::time::{interval, sleep, Instant};
use tracing::{debug, info, warn};
use vrrp_proto::{Advertisement, DecodeError};

use crate::election::{self, MasterAction, ResetKind};
use crate::instance::{InstanceConfig, State};
use crate::socket::VrrpSocket;
use crate::stats::InstanceStats;

/// Everything one running instance needs beyond its static config. Held
/// behind `Arc` so sync-group orchestration can reach into several
/// instances concurrently.
pub struct Instance {
    pub config: InstanceConfig,
    socket: Arc<VrrpSocket>,
    arp_socket: Option<ArpSocket>,
    ndp_socket: Option<NdpSocket>,
    effector: Arc<Mutex<Effector>>,
    netlink_cmd: Arc<Mutex<NetlinkSocket>>,
    tracker: Arc<tracker::Tracker>,
    tracker_instance_id: u64,
    mac: [u8; 6],

    state: RwLock<State>,
    effective_priority: RwLock<u8>,
    stats: RwLock<InstanceStats>,
    fault_clear: Notify,
}

impl Instance {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: InstanceConfig,
        socket: Arc<VrrpSocket>,
        arp_socket: Option<ArpSocket>,
        ndp_socket: Option<NdpSocket>,
        effector: Arc<Mutex<Effector>>,
        netlink_cmd: Arc<Mutex<NetlinkSocket>>,
        tracker: Arc<tracker::Tracker>,
        tracker_instance_id: u64,
        mac: [u8; 6],
    ) -> Self {
        let base_priority = config.base_priority;
        Self {
            config,
            socket,
            arp_socket,
            ndp_socket,
            effector,
            netlink_cmd,
            tracker,
            tracker_instance_id,
            mac,
            state: RwLock::new(State::Init),
            effective_priority: RwLock::new(base_priority),
            stats: RwLock::new(InstanceStats::default()),
            fault_clear: Notify::new(),
        }
    }

    pub async fn state(&self) -> State {
        *self.state.read().await
    }

    pub async fn stats(&self) -> InstanceStats {
        self.stats.read().await.clone()
    }

    pub async fn effective_priority(&self) -> u8 {
        *self.effective_priority.read().await
    }

    async fn set_state(&self, new_state: State) {
        let mut guard = self.state.write().await;
        if *guard != new_state {
            info!(instance = %self.config.name, vrid = self.config.vrid, from = ?*guard, to = ?new_state, "state transition");
            *guard = new_state;
        }
    }

    fn vips(&self) -> Vec<Vip> {
        self.config
            .vips
            .iter()
            .map(|v| Vip {
                address: v.address,
                prefix_len: v.prefix_len,
                interface_index: self.config.interface_index,
                dont_track: v.dont_track,
                accept_mode: self.config.accept_mode,
            })
            .collect()
    }

    /// Run this instance until `shutdown` fires. The outer loop re-enters
    /// on every state change, mirroring the teacher's dispatch-by-state
    /// structure but with a FAULT arm added.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.refresh_effective_priority().await;

        if self.config.is_owner() {
            self.enter_master().await?;
        } else {
            self.set_state(State::Backup).await;
        }

        loop {
            if *shutdown.borrow() {
                self.shutdown().await?;
                return Ok(());
            }

            let result = match self.state().await {
                State::Init => {
                    self.set_state(State::Backup).await;
                    Ok(())
                }
                State::Backup => self.run_backup(&mut shutdown).await,
                State::Master => self.run_master(&mut shutdown).await,
                State::Fault => self.run_fault(&mut shutdown).await,
            };
            result?;
        }
    }

    async fn run_backup(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        // One timer is ever in flight. `Waiting` is the ordinary
        // master-down timer; `PreemptDelay` is armed in its place (section
        // 4.4) the first time a weaker master is heard while preempt is
        // enabled and `preempt_delay > 0`, holding off the takeover by
        // that delay instead of the full master-down interval.
        enum Phase {
            Waiting,
            PreemptDelay,
        }

        let mut phase = Phase::Waiting;
        let mut deadline = Instant::now() + self.master_down_interval().await;

        loop {
            let sleep_fut = sleep(deadline.saturating_duration_since(Instant::now()));
            tokio::select! {
                _ = sleep_fut => {
                    match phase {
                        Phase::Waiting => info!(instance = %self.config.name, "master-down timer expired"),
                        Phase::PreemptDelay => info!(instance = %self.config.name, "preempt-delay timer expired"),
                    }
                    self.enter_master().await?;
                    return Ok(());
                }
                _ = shutdown.changed() => return Ok(()),
                recv = self.recv_validated() => {
                    if let Some((advert, _peer_addr)) = recv {
                        match election::backup_on_advertisement(
                            self.effective_priority().await,
                            self.config.effective_preempt(),
                            advert.priority,
                        ) {
                            Some(kind) => {
                                phase = Phase::Waiting;
                                deadline = Instant::now() + match kind {
                                    ResetKind::Normal => self.master_down_interval().await,
                                    ResetKind::Accelerated => Duration::from_millis(election::skew_time_ms(
                                        self.effective_priority().await,
                                        self.config.advert_interval_ms,
                                    )),
                                };
                            }
                            None => {
                                if matches!(phase, Phase::Waiting) && self.config.preempt_delay > Duration::ZERO {
                                    info!(instance = %self.config.name, delay = ?self.config.preempt_delay, "arming preempt-delay timer against weaker master");
                                    phase = Phase::PreemptDelay;
                                    deadline = Instant::now() + self.config.preempt_delay;
                                }
                            }
                        }
                    }
                    if self.state().await != State::Backup {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn run_master(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let mut advert_timer = interval(Duration::from_millis(self.config.advert_interval_ms));
        advert_timer.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                _ = advert_timer.tick() => {
                    self.send_advertisement(self.effective_priority().await).await;
                }
                _ = shutdown.changed() => return Ok(()),
                recv = self.recv_validated() => {
                    if let Some((advert, peer_addr)) = recv {
                        let action = election::master_on_advertisement(
                            self.effective_priority().await,
                            self.config.primary_ip,
                            advert.priority,
                            peer_addr,
                        );
                        match action {
                            MasterAction::StayMaster => {}
                            MasterAction::PeerStepping => {
                                self.send_advertisement(self.effective_priority().await).await;
                            }
                            MasterAction::StepDown => {
                                self.leave_master(State::Backup).await?;
                                return Ok(());
                            }
                        }
                    }
                    if self.state().await != State::Master {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn run_fault(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        tokio::select! {
            _ = self.fault_clear.notified() => {
                self.refresh_effective_priority().await;
                if self.effective_priority().await > 0 {
                    self.set_state(State::Backup).await;
                }
                Ok(())
            }
            _ = shutdown.changed() => Ok(()),
        }
    }

    /// A tracker (or this crate's caller, on interface failure) forces
    /// this instance to FAULT. Sticky until [`Instance::clear_fault`] is
    /// called by the tracker once the condition resolves.
    pub async fn force_fault(&self) -> Result<()> {
        if self.state().await == State::Master {
            self.leave_master(State::Fault).await?;
        } else {
            self.set_state(State::Fault).await;
        }
        Ok(())
    }

    pub fn clear_fault(&self) {
        self.fault_clear.notify_one();
    }

    /// A sync-group coordinator downgrades this member out of MASTER
    /// without forcing FAULT (e.g. a sibling is still only BACKUP). A
    /// no-op if the instance isn't currently MASTER.
    pub async fn force_backup(&self) -> Result<()> {
        if self.state().await == State::Master {
            self.leave_master(State::Backup).await?;
        }
        Ok(())
    }

    async fn refresh_effective_priority(&self) {
        let aggregated = self.tracker.effective_priority(self.tracker_instance_id, self.config.base_priority);
        *self.effective_priority.write().await = aggregated.effective_priority;
        if aggregated.must_fault {
            warn!(instance = %self.config.name, "binary tracker failed, effective priority forced to 0");
        }
    }

    async fn master_down_interval(&self) -> Duration {
        let priority = self.effective_priority().await;
        Duration::from_millis(election::master_down_interval_ms(priority, self.config.advert_interval_ms))
    }

    /// Programs every VIP and, only if none of the tracked ones (section
    /// 7 class 4: `dont_track == false`) failed, commits to MASTER. A
    /// tracked failure rolls the already-programmed VIPs back and forces
    /// FAULT instead, so a half-programmed VIP set never sits behind an
    /// advertised MASTER.
    async fn enter_master(&self) -> Result<()> {
        let failed = {
            let mut netlink_cmd = self.netlink_cmd.lock().await;
            let mut effector = self.effector.lock().await;
            effector.enter_master(&mut netlink_cmd, &self.vips())?
        };

        if !failed.is_empty() {
            warn!(instance = %self.config.name, ?failed, "tracked VIP failed to program, forcing FAULT instead of MASTER");
            {
                let mut netlink_cmd = self.netlink_cmd.lock().await;
                let mut effector = self.effector.lock().await;
                effector.leave_master(&mut netlink_cmd, &self.vips())?;
            }
            self.set_state(State::Fault).await;
            return Ok(());
        }

        self.set_state(State::Master).await;
        {
            let mut stats = self.stats.write().await;
            stats.master_transitions += 1;
        }

        self.send_advertisement(self.effective_priority().await).await;
        self.announce_vips().await;
        self.run_notify_script(State::Master).await;
        Ok(())
    }

    /// Leave MASTER for either BACKUP or FAULT: one priority-0
    /// advertisement (unless going to FAULT with the interface down),
    /// then remove every VIP.
    async fn leave_master(&self, next: State) -> Result<()> {
        self.send_advertisement(0).await;

        {
            let mut netlink_cmd = self.netlink_cmd.lock().await;
            let mut effector = self.effector.lock().await;
            effector.leave_master(&mut netlink_cmd, &self.vips())?;
        }

        self.set_state(next).await;
        self.run_notify_script(next).await;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if self.state().await == State::Master {
            self.leave_master(State::Init).await?;
        }
        self.run_notify_script(State::Init).await;
        Ok(())
    }

    async fn send_advertisement(&self, priority: u8) {
        let advert = Advertisement {
            version: self.config.version,
            vrid: self.config.vrid,
            priority,
            addresses: self.config.vips.iter().map(|v| v.address).collect(),
            interval: self.interval(),
            auth: self.config.auth.clone(),
        };
        match self.socket.send(&advert, self.config.primary_ip) {
            Ok(()) => {
                let mut stats = self.stats.write().await;
                stats.adverts_sent += 1;
                if priority == 0 {
                    stats.priority_zero_sent += 1;
                }
            }
            Err(e) => warn!(instance = %self.config.name, error = %e, "failed to send advertisement"),
        }
    }

    fn interval(&self) -> vrrp_proto::Interval {
        match self.config.version {
            vrrp_proto::Version::V2 => vrrp_proto::Interval::Seconds((self.config.advert_interval_ms / 1000).max(1) as u8),
            vrrp_proto::Version::V3 => vrrp_proto::Interval::Centiseconds((self.config.advert_interval_ms / 10) as u16),
        }
    }

    async fn announce_vips(&self) {
        for _ in 0..5 {
            for vip in &self.config.vips {
                match vip.address {
                    IpAddr::V4(v4) => {
                        if let Some(arp) = &self.arp_socket {
                            let _ = arp.send_gratuitous(self.mac, v4);
                        }
                    }
                    IpAddr::V6(v6) => {
                        if let Some(ndp) = &self.ndp_socket {
                            let _ = ndp.send_unsolicited_na(self.mac, v6, false);
                        }
                    }
                }
            }
            sleep(Duration::from_secs(1)).await;
        }
    }

    async fn run_notify_script(&self, state: State) {
        let Some(script) = self.config.notify_script.clone() else {
            return;
        };
        let name = self.config.name.clone();
        let priority = self.effective_priority().await;
        let state_arg = match state {
            State::Init => "STOP",
            State::Backup => "BACKUP",
            State::Master => "MASTER",
            State::Fault => "FAULT",
        };
        tokio::spawn(async move {
            let status = tokio::process::Command::new(&script)
                .arg("INSTANCE")
                .arg(&name)
                .arg(state_arg)
                .arg(priority.to_string())
                .status()
                .await;
            if let Err(e) = status {
                warn!(script, error = %e, "failed to spawn notify script");
            }
        });
    }

    async fn recv_validated(&self) -> Option<(Advertisement, IpAddr)> {
        loop {
            match self.socket.try_recv() {
                Ok(Some((raw, src, ttl))) => {
                    if let Some(advert) = self.validate(&raw, src, ttl).await {
                        return Some((advert, src));
                    }
                    continue;
                }
                Ok(None) => {
                    sleep(Duration::from_millis(20)).await;
                }
                Err(e) => {
                    warn!(instance = %self.config.name, error = %e, "VRRP receive error");
                    sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// The validation-on-receive pipeline (section 4.3): strict TTL/hop-
    /// limit check first, then decode, then every field-level rule.
    async fn validate(&self, raw: &[u8], src: IpAddr, ttl: u8) -> Option<Advertisement> {
        if ttl != 255 {
            self.stats.write().await.ttl_err += 1;
            return None;
        }

        let dst = if src.is_ipv6() {
            vrrp_proto::VRRP_MULTICAST_ADDR_V6.parse().unwrap()
        } else {
            vrrp_proto::VRRP_MULTICAST_ADDR_V4.parse().unwrap()
        };

        let advert = match Advertisement::decode(raw, src, dst) {
            Ok(a) => a,
            Err(DecodeError::TooShort(_)) | Err(DecodeError::LengthMismatch { .. }) => {
                self.stats.write().await.length_err += 1;
                return None;
            }
            Err(DecodeError::BadVersion(_)) | Err(DecodeError::BadType(_)) => {
                self.stats.write().await.invalid_type_err += 1;
                return None;
            }
            Err(DecodeError::UnknownAuthType(_)) => {
                self.stats.write().await.auth_err += 1;
                return None;
            }
            Err(DecodeError::BadChecksum { .. }) | Err(DecodeError::AddressFamilyMismatch(_)) | Err(DecodeError::AddressFamilyConflict) => {
                return None;
            }
        };

        if advert.vrid != self.config.vrid {
            return None;
        }

        if advert.version == vrrp_proto::Version::V2 && advert.auth != self.config.auth {
            self.stats.write().await.auth_err += 1;
            return None;
        }

        if advert.interval.as_millis() != self.config.advert_interval_ms {
            self.stats.write().await.interval_err += 1;
            return None;
        }

        let mut local: Vec<IpAddr> = self.config.vips.iter().map(|v| v.address).collect();
        let mut theirs = advert.addresses.clone();
        local.sort();
        theirs.sort();
        if local != theirs {
            self.stats.write().await.addr_list_err += 1;
            if advert.version == vrrp_proto::Version::V2 {
                return None;
            }
            // v3: logged but still processed.
            debug!(instance = %self.config.name, "address-list mismatch on v3 advertisement, processing anyway");
        }

        {
            let mut stats = self.stats.write().await;
            stats.adverts_received += 1;
            if advert.priority == 0 {
                stats.priority_zero_received += 1;
            }
        }

        Some(advert)
    }
}
