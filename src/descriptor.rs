//! Device and configuration descriptors
//!
//! Descriptors are build-time data. The device core only copies them, bounded
//! by the host's requested length. You supply your own bytes with
//! [`Descriptors::new()`], or use [`DEFAULT`].

use crate::{Directions, EndpointConfig};
use usb_device::descriptor::descriptor_type;

/// The descriptors a host may request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Descriptors {
    device: &'static [u8],
    configuration: &'static [u8],
}

impl Descriptors {
    /// Describe a device with one configuration
    ///
    /// `configuration` holds the configuration descriptor followed by its
    /// interface and endpoint descriptors, exactly as the host receives it.
    pub const fn new(device: &'static [u8], configuration: &'static [u8]) -> Self {
        Descriptors {
            device,
            configuration,
        }
    }

    /// Returns the descriptor of type `kind`
    ///
    /// Only device and configuration descriptors are available.
    pub fn get(&self, kind: u8) -> Option<&'static [u8]> {
        match kind {
            descriptor_type::DEVICE => Some(self.device),
            descriptor_type::CONFIGURATION => Some(self.configuration),
            _ => None,
        }
    }

    /// `bMaxPacketSize0` of the device, or 64 if the descriptor is too short
    pub const fn max_packet_size_0(&self) -> u16 {
        if self.device.len() > 7 {
            self.device[7] as u16
        } else {
            64
        }
    }

    /// `bConfigurationValue` of the configuration
    pub fn configuration_value(&self) -> u8 {
        self.configuration.get(5).copied().unwrap_or(1)
    }

    /// Indicates if the configuration reports a self-powered device
    pub fn self_powered(&self) -> bool {
        self.configuration
            .get(7)
            .map(|attributes| attributes & 0x40 != 0)
            .unwrap_or(false)
    }
}

/// Device descriptor for the default, vendor-specific device
pub const DEVICE: [u8; 18] = [
    18,   // bLength
    0x01, // bDescriptorType
    0x00, 0x02, // bcdUSB 2.00
    0x00, // bDeviceClass, per interface
    0x00, // bDeviceSubClass
    0x00, // bDeviceProtocol
    64,   // bMaxPacketSize0
    0x09, 0x12, // idVendor 0x1209
    0x01, 0x00, // idProduct 0x0001
    0x00, 0x01, // bcdDevice 1.00
    0,    // iManufacturer
    0,    // iProduct
    0,    // iSerialNumber
    1,    // bNumConfigurations
];

/// Configuration descriptor for the default device
///
/// One vendor-specific interface with a bulk OUT and a bulk IN endpoint, both
/// on endpoint 1.
pub const CONFIGURATION: [u8; 32] = [
    // Configuration
    9, 0x02, 32, 0x00, // wTotalLength
    1,    // bNumInterfaces
    1,    // bConfigurationValue
    0,    // iConfiguration
    0x80, // bmAttributes, bus powered
    50,   // bMaxPower, 100 mA
    // Interface 0
    9, 0x04, 0, // bInterfaceNumber
    0,    // bAlternateSetting
    2,    // bNumEndpoints
    0xFF, // bInterfaceClass, vendor specific
    0x00, 0x00, 0,
    // Endpoint 1 OUT
    7, 0x05, 0x01, 0x02, // bulk
    64, 0x00, 0,
    // Endpoint 1 IN
    7, 0x05, 0x81, 0x02, // bulk
    64, 0x00, 0,
];

/// Descriptors for the default device
pub const DEFAULT: Descriptors = Descriptors::new(&DEVICE, &CONFIGURATION);

/// Data endpoints described by [`CONFIGURATION`]
pub const DEFAULT_ENDPOINTS: [EndpointConfig; 1] =
    [EndpointConfig::bulk(1, Directions::all(), 64)];
