//! VRRP high-availability failover daemon.

mod build;
mod config;

use std::sync::Arc;
use std::time::Duration;

use build::PollJob;
use config::Config;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    let mut config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let log_level = config.logging.level.clone().unwrap_or_else(|| "info".to_string());
    init_tracing(&log_level);

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
    let mut sigusr1 = signal(SignalKind::user_defined1()).expect("failed to install SIGUSR1 handler");
    let mut sigusr2 = signal(SignalKind::user_defined2()).expect("failed to install SIGUSR2 handler");

    'generation: loop {
        info!(instances = config.instances.len(), "vrrpd starting");

        let built = match build::build(&config).await {
            Ok(b) => b,
            Err(e) => {
                error!(error = %e, "failed to build instances from configuration");
                std::process::exit(1);
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dump_instances: Vec<Arc<vrrp::Instance>> = built.instances.iter().map(|r| r.instance.clone()).collect();

        let mut tasks = Vec::new();
        for running in &built.instances {
            let instance = running.instance.clone();
            let rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = instance.run(rx).await {
                    error!(instance = %instance.config.name, error = %e, "instance task exited with error");
                }
            }));
        }

        for running in &built.instances {
            for poll in &running.polls {
                tasks.push(spawn_poll(built.tracker.clone(), running.tracker_instance_id, poll));
            }
        }

        tasks.push(spawn_netlink_dispatch(built.netlink_events, built.tracker.clone(), &built.instances));

        for (name, members) in &built.sync_groups {
            if members.len() > 1 {
                let instances: Vec<Arc<vrrp::Instance>> = members.iter().filter_map(|&i| built.instances.get(i)).map(|r| r.instance.clone()).collect();
                tasks.push(spawn_sync_group(name.clone(), instances));
            }
        }

        loop {
            match wait_for_control_signal(&mut sigterm, &mut sigint, &mut sighup, &mut sigusr1, &mut sigusr2).await {
                ControlSignal::Shutdown => {
                    info!("shutdown signal received, stopping instances");
                    let _ = shutdown_tx.send(true);
                    shutdown_tasks(tasks).await;
                    return;
                }
                ControlSignal::Reload => match Config::load() {
                    Ok(new_config) => {
                        info!("reload signal received, rebuilding every instance from the new configuration");
                        let _ = shutdown_tx.send(true);
                        shutdown_tasks(tasks).await;
                        config = new_config;
                        continue 'generation;
                    }
                    Err(e) => {
                        error!(error = %e, "reload signal received but the new configuration is invalid, keeping current instances running");
                    }
                },
                ControlSignal::DumpStats => dump_stats(&dump_instances).await,
                ControlSignal::DumpState => dump_state(&dump_instances).await,
            }
        }
    }
}

/// Wait out the remaining tasks against a single shared grace period,
/// rather than restarting the countdown per task.
async fn shutdown_tasks(tasks: Vec<tokio::task::JoinHandle<()>>) {
    let grace = tokio::time::sleep(SHUTDOWN_GRACE);
    tokio::pin!(grace);
    for task in tasks {
        tokio::select! {
            _ = task => {}
            _ = &mut grace => {
                warn!("shutdown grace period elapsed, remaining tasks will be aborted on exit");
                break;
            }
        }
    }
}

async fn dump_stats(instances: &[Arc<vrrp::Instance>]) {
    info!(count = instances.len(), "stats dump requested");
    for instance in instances {
        let stats = instance.stats().await;
        info!(
            instance = %instance.config.name,
            vrid = instance.config.vrid,
            adverts_sent = stats.adverts_sent,
            adverts_received = stats.adverts_received,
            master_transitions = stats.master_transitions,
            length_err = stats.length_err,
            ttl_err = stats.ttl_err,
            invalid_type_err = stats.invalid_type_err,
            interval_err = stats.interval_err,
            addr_list_err = stats.addr_list_err,
            auth_err = stats.auth_err,
            priority_zero_received = stats.priority_zero_received,
            priority_zero_sent = stats.priority_zero_sent,
            "instance stats"
        );
    }
}

async fn dump_state(instances: &[Arc<vrrp::Instance>]) {
    info!(count = instances.len(), "state dump requested");
    for instance in instances {
        let state = instance.state().await;
        let effective_priority = instance.effective_priority().await;
        info!(
            instance = %instance.config.name,
            vrid = instance.config.vrid,
            interface = %instance.config.interface_name,
            state = ?state,
            base_priority = instance.config.base_priority,
            effective_priority,
            "instance state"
        );
    }
}

fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string())))
        .init();
}

/// What the outer loop in `main` should do after a signal: SIGTERM/SIGINT
/// shut down, SIGHUP reloads the configuration (section 6), SIGUSR1/
/// SIGUSR2 log a stats/state snapshot without touching any running task.
enum ControlSignal {
    Shutdown,
    Reload,
    DumpStats,
    DumpState,
}

async fn wait_for_control_signal(
    sigterm: &mut tokio::signal::unix::Signal,
    sigint: &mut tokio::signal::unix::Signal,
    sighup: &mut tokio::signal::unix::Signal,
    sigusr1: &mut tokio::signal::unix::Signal,
    sigusr2: &mut tokio::signal::unix::Signal,
) -> ControlSignal {
    tokio::select! {
        _ = sigterm.recv() => ControlSignal::Shutdown,
        _ = sigint.recv() => ControlSignal::Shutdown,
        _ = sighup.recv() => ControlSignal::Reload,
        _ = sigusr1.recv() => ControlSignal::DumpStats,
        _ = sigusr2.recv() => ControlSignal::DumpState,
    }
}

fn spawn_poll(tracker: Arc<tracker::Tracker>, instance_id: u64, poll: &PollJob) -> tokio::task::JoinHandle<()> {
    match poll {
        PollJob::Script { entity_id, command, args, interval, timeout } => {
            let (entity_id, command, args, interval, timeout) = (*entity_id, command.clone(), args.clone(), *interval, *timeout);
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(interval);
                loop {
                    tick.tick().await;
                    tracker::poll_script(&tracker, instance_id, entity_id, &command, &args, timeout).await;
                }
            })
        }
        PollJob::File { entity_id, path, interval } => {
            let (entity_id, path, interval) = (*entity_id, path.clone(), *interval);
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(interval);
                loop {
                    tick.tick().await;
                    tracker::poll_file(&tracker, instance_id, entity_id, &path);
                }
            })
        }
        PollJob::Process { entity_id, pattern, interval } => {
            let (entity_id, pattern, interval) = (*entity_id, pattern.clone(), *interval);
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(interval);
                loop {
                    tick.tick().await;
                    tracker::poll_process(&tracker, instance_id, entity_id, &pattern);
                }
            })
        }
    }
}

/// Keep one sync group coherent (section 4.4): poll member states and
/// coerce any partial MASTER down to BACKUP. FAULT coherence doesn't
/// need this loop — a FAULTed member already stopped sending
/// advertisements, so its siblings lose their peer and naturally settle
/// on their own priority; only the "more than one master-eligible
/// member disagrees" case needs active correction.
fn spawn_sync_group(name: String, members: Vec<Arc<vrrp::Instance>>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(200));
        loop {
            tick.tick().await;
            let mut states = Vec::with_capacity(members.len());
            for m in &members {
                states.push(m.state().await);
            }
            let target = vrrp::coerce(&states);
            let (leaving, _entering) = vrrp::transition_order(&states, &target);
            for i in leaving {
                if let Err(e) = members[i].force_backup().await {
                    error!(sync_group = %name, error = %e, "failed to downgrade sync group member");
                }
            }
        }
    })
}

/// Fan netlink link/address events out to every instance's
/// interface-tracked entities, and force FAULT on link-down for the
/// owning instance directly (link loss isn't a tracker deduction, it's
/// an immediate fault per the usual keepalived-style semantics).
fn spawn_netlink_dispatch(
    mut events: tokio::sync::mpsc::UnboundedReceiver<netlink::Event>,
    tracker: Arc<tracker::Tracker>,
    instances: &[build::RunningInstance],
) -> tokio::task::JoinHandle<()> {
    let own_interfaces: Vec<(u32, Arc<vrrp::Instance>)> = instances
        .iter()
        .map(|r| (r.instance.config.interface_index, r.instance.clone()))
        .collect();
    let tracked: Vec<(u64, Vec<(u32, u64)>)> = instances.iter().map(|r| (r.tracker_instance_id, r.interface_entities.clone())).collect();

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                netlink::Event::InterfaceDown { index } => {
                    for (iface, instance) in &own_interfaces {
                        if *iface == index {
                            warn!(instance = %instance.config.name, "owning interface went down");
                            if let Err(e) = instance.force_fault().await {
                                error!(instance = %instance.config.name, error = %e, "failed to enter FAULT on link down");
                            }
                        }
                    }
                    for (instance_id, entities) in &tracked {
                        for (tracked_index, entity_id) in entities {
                            if *tracked_index == index {
                                tracker::poll_interface(&tracker, *instance_id, *entity_id, false);
                            }
                        }
                    }
                }
                netlink::Event::InterfaceUp { index } => {
                    for (iface, instance) in &own_interfaces {
                        if *iface == index {
                            instance.clear_fault();
                        }
                    }
                    for (instance_id, entities) in &tracked {
                        for (tracked_index, entity_id) in entities {
                            if *tracked_index == index {
                                tracker::poll_interface(&tracker, *instance_id, *entity_id, true);
                            }
                        }
                    }
                }
                netlink::Event::AddressAdded { .. } | netlink::Event::AddressRemoved { .. } => {}
            }
        }
    })
}
