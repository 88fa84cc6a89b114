//! USB bulk-endpoint channel implementation
//!
//! The MPI bus adapter shows up as a vendor-specific device with one data
//! interface carrying a bulk IN and a bulk OUT endpoint. Reads run through a
//! standing request queue so the device can push telegrams at any time.

use crate::channel::ByteChannel;
use async_trait::async_trait;
use mpi_core::{MpiError, MpiResult};
use nusb::transfer::{Queue, RequestBuffer};
use std::collections::VecDeque;
use std::time::Duration;

/// USB vendor id of the supported bus adapters
pub const USB_VENDOR_ID: u16 = 0x0908;
/// USB product id of the supported bus adapters
pub const USB_PRODUCT_ID: u16 = 0x0004;

const USB_IFACE_DATA: u8 = 0;
const USB_ENDPOINT_IN: u8 = 0x82;
const USB_ENDPOINT_OUT: u8 = 0x02;

const IN_FLIGHT_REQS: usize = 4;
const IN_BUFFER_SIZE: usize = 64;
const OUT_TIMEOUT: Duration = Duration::from_millis(500);

/// Check whether a USB device is a supported MPI bus adapter
pub fn is_mpi_adapter(info: &nusb::DeviceInfo) -> bool {
    info.vendor_id() == USB_VENDOR_ID && info.product_id() == USB_PRODUCT_ID
}

/// Enumerate all attached MPI bus adapters
pub fn list_adapters() -> MpiResult<Vec<nusb::DeviceInfo>> {
    let devices = nusb::list_devices().map_err(MpiError::Channel)?;
    Ok(devices.filter(is_mpi_adapter).collect())
}

/// USB channel implementation
pub struct UsbChannel {
    _interface: nusb::Interface,
    in_queue: Queue<RequestBuffer>,
    out_queue: Queue<Vec<u8>>,
    pending: VecDeque<u8>,
    closed: bool,
}

impl UsbChannel {
    /// Open a claimed bulk channel to the given adapter device
    pub fn open(info: &nusb::DeviceInfo) -> MpiResult<Self> {
        let device = info.open().map_err(MpiError::Channel)?;
        let interface = device
            .claim_interface(USB_IFACE_DATA)
            .map_err(MpiError::Channel)?;

        let mut in_queue = interface.bulk_in_queue(USB_ENDPOINT_IN);
        for _ in 0..IN_FLIGHT_REQS {
            in_queue.submit(RequestBuffer::new(IN_BUFFER_SIZE));
        }
        let out_queue = interface.bulk_out_queue(USB_ENDPOINT_OUT);

        log::debug!(
            "claimed USB adapter on bus {} addr {}",
            info.bus_number(),
            info.device_address()
        );

        Ok(Self {
            _interface: interface,
            in_queue,
            out_queue,
            pending: VecDeque::new(),
            closed: false,
        })
    }

    fn drain_pending(&mut self, buf: &mut [u8]) -> usize {
        let mut n = 0;
        while n < buf.len() {
            match self.pending.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }
}

#[async_trait]
impl ByteChannel for UsbChannel {
    async fn read(&mut self, buf: &mut [u8]) -> MpiResult<usize> {
        if self.closed {
            return Ok(0);
        }
        if !self.pending.is_empty() {
            return Ok(self.drain_pending(buf));
        }

        loop {
            // keep the standing read queue full
            let in_flight = self.in_queue.pending();
            for _ in 0..IN_FLIGHT_REQS.saturating_sub(in_flight) {
                self.in_queue.submit(RequestBuffer::new(IN_BUFFER_SIZE));
            }

            let completion = self.in_queue.next_complete().await;
            if let Err(e) = completion.status {
                self.closed = true;
                return Err(MpiError::Channel(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("USB IN transfer failed: {}", e),
                )));
            }
            if completion.data.is_empty() {
                // zero-length packet, wait for the next transfer
                continue;
            }
            self.pending.extend(completion.data);
            return Ok(self.drain_pending(buf));
        }
    }

    async fn write(&mut self, buf: &[u8]) -> MpiResult<usize> {
        if self.closed {
            return Err(MpiError::Channel(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "USB channel is closed",
            )));
        }

        self.out_queue.submit(buf.to_vec());
        let completion = tokio::time::timeout(OUT_TIMEOUT, self.out_queue.next_complete())
            .await
            .map_err(|_| MpiError::Timeout)?;
        if let Err(e) = completion.status {
            self.closed = true;
            return Err(MpiError::Channel(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("USB OUT transfer failed: {}", e),
            )));
        }
        Ok(buf.len())
    }

    async fn flush(&mut self) -> MpiResult<()> {
        // bulk writes complete transfer-by-transfer, nothing buffered here
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> MpiResult<()> {
        self.closed = true;
        self.in_queue.cancel_all();
        self.out_queue.cancel_all();
        Ok(())
    }
}
