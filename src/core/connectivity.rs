//! Connectivity tracking
//!
//! The link is polled synchronously through a [`ConnectivityMonitor`]. Sink
//! connection changes arrive as [`ConnectivityEvent`]s over a channel: the
//! sink side holds a [`ConnectivityNotifier`], the acquisition loop drains
//! [`ConnectivityEvents`] without blocking at the top of every cycle.
//!
//! [`NodeStatus`] mirrors the latest view in atomics so other threads (the
//! shutdown handler, diagnostics) can read it without touching the loop.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Sink connection change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    /// Telemetry session established
    SinkConnected,
    /// Telemetry session lost
    SinkDisconnected,
}

/// Sending half, owned by whatever manages the telemetry session
#[derive(Debug, Clone)]
pub struct ConnectivityNotifier {
    tx: Sender<ConnectivityEvent>,
}

impl ConnectivityNotifier {
    /// Push an event; dropped silently once the loop is gone
    pub fn notify(&self, event: ConnectivityEvent) {
        match self.tx.try_send(event) {
            Ok(()) => debug!("Connectivity event: {:?}", event),
            Err(TrySendError::Disconnected(_)) => debug!("Connectivity event {:?} after loop exit", event),
            Err(TrySendError::Full(_)) => warn!("Connectivity event {:?} dropped", event),
        }
    }
}

/// Receiving half, owned by the acquisition loop
#[derive(Debug)]
pub struct ConnectivityEvents {
    rx: Receiver<ConnectivityEvent>,
}

impl ConnectivityEvents {
    /// Consume everything queued and return the most recent event
    pub fn drain_latest(&self) -> Option<ConnectivityEvent> {
        self.rx.try_iter().last()
    }
}

/// Create a connected notifier/receiver pair
pub fn event_channel() -> (ConnectivityNotifier, ConnectivityEvents) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (ConnectivityNotifier { tx }, ConnectivityEvents { rx })
}

/// Process-wide node status, shared by `Arc`
#[derive(Debug)]
pub struct NodeStatus {
    running: AtomicBool,
    link_up: AtomicBool,
    sink_connected: AtomicBool,
    fan_on: AtomicBool,
    cycles_published: AtomicU64,
    cycles_failed: AtomicU64,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStatus {
    /// Fresh status: running, everything else down
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            link_up: AtomicBool::new(false),
            sink_connected: AtomicBool::new(false),
            fan_on: AtomicBool::new(false),
            cycles_published: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
        }
    }

    /// Whether the loop should keep going
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the loop to stop after the current cycle
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Last observed link state
    pub fn link_up(&self) -> bool {
        self.link_up.load(Ordering::Relaxed)
    }

    pub(crate) fn set_link_up(&self, up: bool) {
        self.link_up.store(up, Ordering::Relaxed);
    }

    /// Last observed sink state
    pub fn sink_connected(&self) -> bool {
        self.sink_connected.load(Ordering::Relaxed)
    }

    pub(crate) fn set_sink_connected(&self, connected: bool) {
        self.sink_connected.store(connected, Ordering::Relaxed);
    }

    /// Fan state after the last cycle
    pub fn fan_on(&self) -> bool {
        self.fan_on.load(Ordering::Relaxed)
    }

    pub(crate) fn set_fan_on(&self, on: bool) {
        self.fan_on.store(on, Ordering::Relaxed);
    }

    /// Cycles that reached the sink
    pub fn cycles_published(&self) -> u64 {
        self.cycles_published.load(Ordering::Relaxed)
    }

    /// Cycles aborted for any reason
    pub fn cycles_failed(&self) -> u64 {
        self.cycles_failed.load(Ordering::Relaxed)
    }

    pub(crate) fn record_cycle(&self, published: bool) {
        let counter = if published {
            &self.cycles_published
        } else {
            &self.cycles_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Connectivity errors
#[derive(Error, Debug)]
pub enum ConnectivityError {
    /// Reconnect attempt failed
    #[error("reconnect failed: {0}")]
    ReconnectFailed(String),
}

/// Network link predicate plus reconnect trigger
pub trait ConnectivityMonitor {
    /// Whether the network link is currently usable
    fn link_up(&mut self) -> bool;

    /// Try to bring the link back; the loop retries on its own cadence
    fn reconnect(&mut self) -> Result<(), ConnectivityError>;
}

impl<T: ConnectivityMonitor + ?Sized> ConnectivityMonitor for Box<T> {
    fn link_up(&mut self) -> bool {
        (**self).link_up()
    }

    fn reconnect(&mut self) -> Result<(), ConnectivityError> {
        (**self).reconnect()
    }
}

/// Monitor for hosts whose link needs no supervision
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysUp;

impl ConnectivityMonitor for AlwaysUp {
    fn link_up(&mut self) -> bool {
        true
    }

    fn reconnect(&mut self) -> Result<(), ConnectivityError> {
        Ok(())
    }
}

/// Linux interface monitor reading `/sys/class/net/<iface>/operstate`
///
/// The reconnect command runs in the background. Its exit status is collected
/// on a later `link_up` or `reconnect` call, and only one instance runs at a
/// time.
#[derive(Debug)]
pub struct InterfaceMonitor {
    interface: String,
    sysfs_root: PathBuf,
    reconnect_command: Option<Vec<String>>,
    pending: Option<Child>,
}

impl InterfaceMonitor {
    /// Watch `interface`
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            sysfs_root: PathBuf::from("/sys/class/net"),
            reconnect_command: None,
            pending: None,
        }
    }

    /// Run `argv` to reconnect (e.g. `["nmcli", "device", "connect", "wlan0"]`)
    #[must_use]
    pub fn with_reconnect_command(mut self, argv: Vec<String>) -> Self {
        self.reconnect_command = if argv.is_empty() { None } else { Some(argv) };
        self
    }

    /// Read operstate below another root
    #[must_use]
    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }

    /// Collect a finished reconnect command; `Ok(true)` while it still runs
    fn reap(&mut self) -> Result<bool, ConnectivityError> {
        let Some(child) = self.pending.as_mut() else {
            return Ok(false);
        };
        match child.try_wait() {
            Ok(None) => Ok(true),
            Ok(Some(status)) => {
                self.pending = None;
                if status.success() {
                    debug!("Reconnect command for {} finished", self.interface);
                    Ok(false)
                } else {
                    Err(ConnectivityError::ReconnectFailed(format!("reconnect command exited with {}", status)))
                }
            }
            Err(e) => {
                self.pending = None;
                Err(ConnectivityError::ReconnectFailed(e.to_string()))
            }
        }
    }
}

impl Drop for InterfaceMonitor {
    fn drop(&mut self) {
        if let Some(mut child) = self.pending.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl ConnectivityMonitor for InterfaceMonitor {
    fn link_up(&mut self) -> bool {
        if let Err(e) = self.reap() {
            warn!("{}", e);
        }

        let path = self.sysfs_root.join(&self.interface).join("operstate");
        match std::fs::read_to_string(&path) {
            Ok(state) => state.trim() == "up",
            Err(e) => {
                debug!("Cannot read {}: {}", path.display(), e);
                false
            }
        }
    }

    fn reconnect(&mut self) -> Result<(), ConnectivityError> {
        if self.reap()? {
            debug!("Reconnect of {} still in progress", self.interface);
            return Ok(());
        }

        let Some(argv) = &self.reconnect_command else {
            info!("Waiting for {} to come back", self.interface);
            return Ok(());
        };

        info!("Reconnecting {}: {}", self.interface, argv.join(" "));
        // stdout may carry telemetry
        let child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|e| ConnectivityError::ReconnectFailed(format!("{}: {}", argv[0], e)))?;
        self.pending = Some(child);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn test_drain_returns_latest_event() {
        let (notifier, events) = event_channel();
        assert_eq!(events.drain_latest(), None);

        notifier.notify(ConnectivityEvent::SinkConnected);
        notifier.notify(ConnectivityEvent::SinkDisconnected);
        notifier.notify(ConnectivityEvent::SinkConnected);
        assert_eq!(events.drain_latest(), Some(ConnectivityEvent::SinkConnected));
        assert_eq!(events.drain_latest(), None);
    }

    #[test]
    fn test_notify_from_other_thread() {
        let (notifier, events) = event_channel();
        let handle = std::thread::spawn(move || notifier.notify(ConnectivityEvent::SinkConnected));
        handle.join().unwrap();
        assert_eq!(events.drain_latest(), Some(ConnectivityEvent::SinkConnected));
    }

    #[test]
    fn test_notify_after_receiver_dropped() {
        let (notifier, events) = event_channel();
        drop(events);
        notifier.notify(ConnectivityEvent::SinkDisconnected);
    }

    #[test]
    fn test_node_status_shared() {
        let status = Arc::new(NodeStatus::new());
        assert!(status.is_running());

        let remote = Arc::clone(&status);
        std::thread::spawn(move || remote.request_stop()).join().unwrap();
        assert!(!status.is_running());

        status.record_cycle(true);
        status.record_cycle(false);
        status.record_cycle(true);
        assert_eq!(status.cycles_published(), 2);
        assert_eq!(status.cycles_failed(), 1);
    }

    #[test]
    fn test_interface_monitor_reads_operstate() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("eth0")).unwrap();
        let operstate = root.path().join("eth0").join("operstate");

        let mut monitor = InterfaceMonitor::new("eth0").with_sysfs_root(root.path());
        std::fs::write(&operstate, "up\n").unwrap();
        assert!(monitor.link_up());

        std::fs::write(&operstate, "down\n").unwrap();
        assert!(!monitor.link_up());

        let mut missing = InterfaceMonitor::new("wlan9").with_sysfs_root(root.path());
        assert!(!missing.link_up());
    }

    #[test]
    fn test_reconnect_without_command_is_ok() {
        assert!(InterfaceMonitor::new("eth0").reconnect().is_ok());
        assert!(AlwaysUp.reconnect().is_ok());
    }

    #[cfg(unix)]
    fn wait_for_exit(monitor: &mut InterfaceMonitor) {
        let child = monitor.pending.as_mut().unwrap();
        for _ in 0..100 {
            if child.try_wait().unwrap().is_some() {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("reconnect command did not exit");
    }

    #[cfg(unix)]
    #[test]
    fn test_reconnect_does_not_wait_for_command() {
        let root = tempfile::tempdir().unwrap();
        let mut monitor = InterfaceMonitor::new("wlan0")
            .with_sysfs_root(root.path())
            .with_reconnect_command(vec!["sleep".into(), "5".into()]);

        let started = Instant::now();
        assert!(monitor.reconnect().is_ok());
        assert!(started.elapsed() < Duration::from_secs(1));
        let pid = monitor.pending.as_ref().unwrap().id();

        // A second attempt while the first still runs spawns nothing
        assert!(!monitor.link_up());
        assert!(monitor.reconnect().is_ok());
        assert_eq!(monitor.pending.as_ref().unwrap().id(), pid);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[cfg(unix)]
    #[test]
    fn test_reconnect_exit_status_collected_later() {
        let mut ok = InterfaceMonitor::new("eth0").with_reconnect_command(vec!["true".into()]);
        assert!(ok.reconnect().is_ok());
        wait_for_exit(&mut ok);
        assert!(ok.reconnect().is_ok());
        assert!(ok.pending.is_some());

        let mut failing = InterfaceMonitor::new("eth0").with_reconnect_command(vec!["false".into()]);
        assert!(failing.reconnect().is_ok());
        wait_for_exit(&mut failing);
        assert!(matches!(failing.reconnect(), Err(ConnectivityError::ReconnectFailed(_))));
        assert!(failing.pending.is_none());
        // The next attempt starts a fresh command
        assert!(failing.reconnect().is_ok());
        assert!(failing.pending.is_some());
    }

    #[test]
    fn test_reconnect_command_missing() {
        let mut monitor =
            InterfaceMonitor::new("eth0").with_reconnect_command(vec!["/nonexistent/reconnect-wlan".into()]);
        assert!(matches!(monitor.reconnect(), Err(ConnectivityError::ReconnectFailed(_))));
        assert!(monitor.pending.is_none());
    }
}
