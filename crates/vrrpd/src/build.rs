//! Turns a validated [`Config`] into the running components for one
//! process: per-instance sockets/effectors, tracker registrations, and
//! the [`vrrp::Instance`] handles the main loop drives.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use common::{Error, Result};
use effector::{ArpSocket, Effector, NdpSocket};
use netlink::NetlinkSocket;
use tokio::sync::Mutex;
use tracing::info;
use vrrp::{Instance, InstanceConfig, VipConfig};
use vrrp_proto::{Auth, Version};

use crate::config::{AuthSettings, Config, TrackSettings};

/// A periodic re-check that needs to run outside the VRRP socket loop
/// (scripts, files, process scans); interface link state instead comes
/// from the shared netlink event listener.
pub enum PollJob {
    Script { entity_id: u64, command: String, args: Vec<String>, interval: std::time::Duration, timeout: std::time::Duration },
    File { entity_id: u64, path: std::path::PathBuf, interval: std::time::Duration },
    Process { entity_id: u64, pattern: String, interval: std::time::Duration },
}

/// Everything [`crate::main`] needs to drive one running instance plus
/// the poll loop that feeds its tracked entities.
pub struct RunningInstance {
    pub instance: Arc<Instance>,
    pub tracker_instance_id: u64,
    pub polls: Vec<PollJob>,
    /// Interface-tracked entities for this instance, keyed by the
    /// interface index the netlink event listener reports on.
    pub interface_entities: Vec<(u32, u64)>,
}

pub struct Built {
    pub instances: Vec<RunningInstance>,
    pub tracker: Arc<tracker::Tracker>,
    pub sync_groups: HashMap<String, Vec<usize>>,
    pub netlink_events: tokio::sync::mpsc::UnboundedReceiver<netlink::Event>,
}

/// Read the interface's MAC address via `SIOCGIFHWADDR`, used to stamp
/// gratuitous ARP/NA frames.
fn interface_mac(name: &str) -> Result<[u8; 6]> {
    use std::ffi::CString;
    use std::os::fd::AsRawFd;

    let socket = socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::DGRAM, None).map_err(|e| Error::other(format!("failed to open helper socket: {e}")))?;
    let c_name = CString::new(name).map_err(|e| Error::other(format!("invalid interface name: {e}")))?;

    let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
    for (dst, src) in ifr.ifr_name.iter_mut().zip(c_name.as_bytes_with_nul()) {
        *dst = *src as libc::c_char;
    }

    let rc = unsafe { libc::ioctl(socket.as_raw_fd(), libc::SIOCGIFHWADDR, &mut ifr) };
    if rc < 0 {
        return Err(Error::other(format!("SIOCGIFHWADDR failed for {name}: {}", std::io::Error::last_os_error())));
    }

    let mut mac = [0u8; 6];
    unsafe {
        for (i, byte) in mac.iter_mut().enumerate() {
            *byte = ifr.ifr_ifru.ifru_hwaddr.sa_data[i] as u8;
        }
    }
    Ok(mac)
}

fn auth_from_settings(settings: &AuthSettings) -> Auth {
    match settings {
        AuthSettings::None => Auth::None,
        AuthSettings::SimplePassword { password } => Auth::simple_from_password(password),
    }
}

pub async fn build(config: &Config) -> Result<Built> {
    let tracker = Arc::new(tracker::Tracker::new());
    let mut instances = Vec::with_capacity(config.instances.len());

    let (notify_socket, command_socket) = netlink::open()?;
    let netlink_events = netlink::spawn(notify_socket);
    let netlink_cmd = Arc::new(Mutex::new(command_socket));
    let effector = Arc::new(Mutex::new(Effector::new(config.nftables.enabled)?));

    let mut name_to_index = HashMap::new();
    for (i, instance) in config.instances.iter().enumerate() {
        name_to_index.insert(instance.name.clone(), i);
    }

    let mut sync_groups: HashMap<String, Vec<usize>> = HashMap::new();
    for group in &config.sync_groups {
        let indices = group.members.iter().filter_map(|m| name_to_index.get(m).copied()).collect();
        sync_groups.insert(group.name.clone(), indices);
    }

    for (i, instance_cfg) in config.instances.iter().enumerate() {
        let interface_index = vrrp::interface_index(&instance_cfg.interface)?;
        let is_ipv6 = matches!(instance_cfg.primary_ip, IpAddr::V6(_));
        let mac = interface_mac(&instance_cfg.interface)?;

        let socket = Arc::new(vrrp::VrrpSocket::new(&instance_cfg.interface, interface_index, is_ipv6)?);
        socket.join_multicast()?;

        let arp_socket = if is_ipv6 { None } else { Some(ArpSocket::bind(interface_index as i32)?) };
        let ndp_socket = if is_ipv6 { Some(NdpSocket::bind(interface_index)?) } else { None };

        let tracker_instance_id = i as u64;
        let mut polls = Vec::new();
        let mut interface_entities = Vec::new();
        for track in &instance_cfg.track {
            register_track(&tracker, tracker_instance_id, track, &mut polls, &mut interface_entities);
        }

        let vips = instance_cfg
            .vips
            .iter()
            .map(|v| VipConfig {
                address: v.address,
                prefix_len: v.prefix_len,
                dont_track: v.dont_track,
            })
            .collect();

        let instance_config = InstanceConfig {
            name: instance_cfg.name.clone(),
            vrid: instance_cfg.vrid,
            version: if instance_cfg.version == 2 { Version::V2 } else { Version::V3 },
            interface_name: instance_cfg.interface.clone(),
            interface_index,
            sync_group: instance_cfg.sync_group.clone(),
            base_priority: instance_cfg.priority,
            advert_interval_ms: instance_cfg.advertisement_interval.as_millis() as u64,
            preempt: instance_cfg.preempt,
            preempt_delay: instance_cfg.preempt_delay,
            accept_mode: instance_cfg.accept_mode,
            vips,
            auth: auth_from_settings(&instance_cfg.auth),
            primary_ip: instance_cfg.primary_ip,
            unicast_peers: instance_cfg.unicast_peers.clone(),
            notify_script: instance_cfg.notify_script.clone(),
        };

        info!(instance = %instance_config.name, interface = %instance_cfg.interface, vrid = instance_cfg.vrid, "instance configured");

        let instance = Arc::new(Instance::new(
            instance_config,
            socket,
            arp_socket,
            ndp_socket,
            effector.clone(),
            netlink_cmd.clone(),
            tracker.clone(),
            tracker_instance_id,
            mac,
        ));

        instances.push(RunningInstance {
            instance,
            tracker_instance_id,
            polls,
            interface_entities,
        });
    }

    Ok(Built {
        instances,
        tracker,
        sync_groups,
        netlink_events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_none_maps_to_proto_none() {
        assert_eq!(auth_from_settings(&AuthSettings::None), Auth::None);
    }

    #[test]
    fn auth_simple_password_is_packed_and_padded() {
        let auth = auth_from_settings(&AuthSettings::SimplePassword { password: "hi".into() });
        match auth {
            Auth::Simple(bytes) => assert_eq!(&bytes, b"hi\0\0\0\0\0\0"),
            other => panic!("expected Auth::Simple, got {other:?}"),
        }
    }

    #[test]
    fn register_track_script_produces_matching_poll_job() {
        let tracker = tracker::Tracker::new();
        let track = TrackSettings::Script {
            command: "/bin/true".into(),
            args: vec![],
            interval: std::time::Duration::from_secs(1),
            timeout: std::time::Duration::from_secs(1),
            weight: -10,
            rise: 1,
            fall: 1,
        };
        let mut polls = Vec::new();
        let mut interface_entities = Vec::new();
        register_track(&tracker, 0, &track, &mut polls, &mut interface_entities);
        assert_eq!(polls.len(), 1);
        assert!(interface_entities.is_empty());
        assert!(matches!(polls[0], PollJob::Script { .. }));
    }

    #[test]
    fn register_track_interface_has_no_poll_job() {
        let tracker = tracker::Tracker::new();
        let track = TrackSettings::Interface { interface: "lo".into(), weight: -20 };
        let mut polls = Vec::new();
        let mut interface_entities = Vec::new();
        register_track(&tracker, 0, &track, &mut polls, &mut interface_entities);
        assert!(polls.is_empty());
        assert_eq!(interface_entities.len(), 1);
    }
}

fn register_track(tracker: &tracker::Tracker, instance_id: u64, track: &TrackSettings, polls: &mut Vec<PollJob>, interface_entities: &mut Vec<(u32, u64)>) {
    match track {
        TrackSettings::Interface { interface, weight } => {
            let index = vrrp::interface_index(interface).unwrap_or(0);
            let entity_id = tracker.register(instance_id, tracker::Source::Interface { index }, *weight, false, 1, 1);
            interface_entities.push((index, entity_id));
        }
        TrackSettings::Script { command, args, interval, timeout, weight, rise, fall } => {
            let entity_id = tracker.register(
                instance_id,
                tracker::Source::Script {
                    command: command.clone(),
                    args: args.clone(),
                    timeout: *timeout,
                },
                *weight,
                false,
                *rise,
                *fall,
            );
            polls.push(PollJob::Script {
                entity_id,
                command: command.clone(),
                args: args.clone(),
                interval: *interval,
                timeout: *timeout,
            });
        }
        TrackSettings::File { path, poll_interval, weight } => {
            let entity_id = tracker.register(instance_id, tracker::Source::File { path: path.clone() }, *weight, false, 1, 1);
            polls.push(PollJob::File {
                entity_id,
                path: path.clone(),
                interval: *poll_interval,
            });
        }
        TrackSettings::Process { pattern, poll_interval, weight, rise, fall } => {
            let entity_id = tracker.register(instance_id, tracker::Source::Process { pattern: pattern.clone() }, *weight, false, *rise, *fall);
            polls.push(PollJob::Process {
                entity_id,
                pattern: pattern.clone(),
                interval: *poll_interval,
            });
        }
    }
}
