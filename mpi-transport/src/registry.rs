//! Adapter discovery registry
//!
//! Tracks attached bus adapters under stable names and reports topology
//! changes. Names are derived from the USB topology
//! (`usb/bus:<bus>/addr:<addr>`) with a secondary `usb/serial:<sn>` alias
//! when the device exposes a serial string; the sessions above consume these
//! purely as "physical channel became available/unavailable" signals.

use crate::usb;
use mpi_core::MpiResult;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Topology change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    Attached(String),
    Detached(String),
}

/// Stable primary name for an adapter device
pub fn unique_name(info: &nusb::DeviceInfo) -> String {
    format!(
        "usb/bus:{}/addr:{}",
        info.bus_number(),
        info.device_address()
    )
}

/// Secondary name from the device serial string, when present
pub fn serial_name(info: &nusb::DeviceInfo) -> Option<String> {
    info.serial_number().map(|sn| format!("usb/serial:{}", sn))
}

/// Polling registry of attached adapters
pub struct AdapterRegistry {
    task: JoinHandle<()>,
}

impl AdapterRegistry {
    /// Start watching for adapters, polling at `poll_interval`.
    ///
    /// Already-attached adapters are reported as `Attached` events on the
    /// first poll.
    pub fn start(poll_interval: Duration) -> (AdapterRegistry, mpsc::Receiver<AdapterEvent>) {
        let (event_tx, event_rx) = mpsc::channel(16);

        let task = tokio::spawn(async move {
            let mut known: HashSet<String> = HashSet::new();
            loop {
                match usb::list_adapters() {
                    Ok(devices) => {
                        let current: HashSet<String> =
                            devices.iter().map(unique_name).collect();

                        for name in current.difference(&known) {
                            log::info!("bus adapter attached: {}", name);
                            if event_tx
                                .send(AdapterEvent::Attached(name.clone()))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                        for name in known.difference(&current) {
                            log::info!("bus adapter detached: {}", name);
                            if event_tx
                                .send(AdapterEvent::Detached(name.clone()))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                        known = current;
                    }
                    Err(e) => log::warn!("adapter enumeration failed: {}", e),
                }
                tokio::time::sleep(poll_interval).await;
            }
        });

        (AdapterRegistry { task }, event_rx)
    }

    /// Find the device currently registered under `name`.
    ///
    /// Both the primary topology name and the serial alias are accepted.
    pub fn device(name: &str) -> MpiResult<Option<nusb::DeviceInfo>> {
        let devices = usb::list_adapters()?;
        Ok(devices.into_iter().find(|d| {
            unique_name(d) == name || serial_name(d).as_deref() == Some(name)
        }))
    }
}

impl Drop for AdapterRegistry {
    fn drop(&mut self) {
        self.task.abort();
    }
}
