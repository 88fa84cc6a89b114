//! Transport layer for the MPI adapter protocol stack
//!
//! This crate provides the abstract byte channel the link layer runs on,
//! plus the USB bulk-endpoint and serial-port implementations and an
//! adapter discovery registry.

pub mod channel;
pub mod loopback;
pub mod registry;
pub mod serial;
pub mod usb;

pub use channel::ByteChannel;
pub use loopback::LoopbackChannel;
pub use registry::{AdapterEvent, AdapterRegistry};
pub use serial::{SerialChannel, SerialSettings};
pub use usb::{UsbChannel, USB_PRODUCT_ID, USB_VENDOR_ID};
