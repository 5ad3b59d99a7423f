//! A USB full-speed device core for STM32 microcontrollers
//!
//! `stm32fs-usbd` drives the USB full-speed device peripheral found in
//! STM32F1, F3, L1 and similar parts: the block with eight `EPnR` endpoint
//! registers and a dedicated packet memory area. It performs device
//! enumeration on endpoint 0 (address assignment, descriptor retrieval,
//! configuration) and services a small number of bulk or interrupt data
//! endpoints, handing packets to your [`Application`].
//!
//! The core never touches memory-mapped registers directly. It consumes a
//! [`PeripheralPort`], which you get from [`ral::RegisterPort`] on real
//! hardware. See each module for usage and examples.
//!
//! # Usage
//!
//! 1. Describe your endpoints and descriptors with a [`Config`].
//! 2. Wrap the peripheral in a [`ral::RegisterPort`] by implementing the
//!    [`Peripherals`] trait.
//! 3. Create a [`Device`], call [`initialize()`](Device::initialize), and
//!    [`poll()`](Device::poll) it from your main loop. If you prefer
//!    interrupts, put the device into a [`SharedDevice`] and poll it from the
//!    USB interrupt handler.
//!
//! ```no_run
//! use stm32fs_usbd::{descriptor, ral::RegisterPort, Application, Config, Device, Peripherals};
//! use usb_device::endpoint::EndpointAddress;
//!
//! struct Usb;
//!
//! unsafe impl Peripherals for Usb {
//!     fn usb(&self) -> *const () {
//!         0x4000_5C00 as *const ()
//!     }
//!     fn packet_memory(&self) -> *const () {
//!         0x4000_6000 as *const ()
//!     }
//! }
//!
//! struct Echo {
//!     last: [u8; 64],
//!     len: Option<usize>,
//! }
//!
//! impl Application for Echo {
//!     fn on_data_received(&mut self, _: EndpointAddress, bytes: &[u8]) {
//!         self.last[..bytes.len()].copy_from_slice(bytes);
//!         self.len = Some(bytes.len());
//!     }
//!     fn provide_next_outgoing(&mut self, _: EndpointAddress, buffer: &mut [u8]) -> Option<usize> {
//!         let len = self.len.take()?;
//!         buffer[..len].copy_from_slice(&self.last[..len]);
//!         Some(len)
//!     }
//! }
//!
//! let config = Config::new(descriptor::DEFAULT, &descriptor::DEFAULT_ENDPOINTS);
//! let port = RegisterPort::new(Usb);
//! let app = Echo { last: [0; 64], len: None };
//! let mut device = Device::new(port, app, config).unwrap();
//! device.initialize();
//! loop {
//!     device.poll();
//! }
//! ```

#![no_std]

#[cfg(test)]
extern crate std;

#[cfg(feature = "defmt-03")]
extern crate defmt_03 as defmt;

#[macro_use]
mod log;

mod bus;
mod control;
mod data;
mod device;
mod endpoint;
mod request;

pub mod descriptor;
pub mod pma;
pub mod ral;
pub mod register;

#[cfg(test)]
mod sim;

pub use bus::SharedDevice;
pub use control::State;
pub use descriptor::Descriptors;
pub use device::{Config, Device, Event};
pub use endpoint::{Directions, EndpointConfig, TransferType};
pub use request::ControlRequest;

use usb_device::endpoint::EndpointAddress;

/// Eight endpoint registers, each covering one IN and one OUT direction
pub const MAX_ENDPOINTS: usize = 8;

/// The largest packet any endpoint may declare
///
/// Full-speed control, bulk and interrupt endpoints top out at 64 bytes.
pub const MAX_PACKET_SIZE: usize = 64;

/// A register exposed by the USB peripheral
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Register {
    /// `EPnR`, the control register for endpoint `n`
    Endpoint(u8),
    /// `CNTR`, transceiver power, reset and interrupt masks
    Control,
    /// `ISTR`, pending bus events and transfer completions
    Status,
    /// `DADDR`, the device address and function enable
    Address,
    /// `BTABLE`, the packet memory offset of the buffer descriptor table
    BufferTable,
}

/// Register and packet memory access for the USB peripheral
///
/// All register values are 16 bits wide. Packet memory is addressed by byte
/// offset, and accessed one 16-bit word at a time; `offset` is always even.
///
/// The core performs every read-modify-write itself (see [`register`]), so an
/// implementation should perform exactly the access it's asked to perform.
/// In particular, `write()` must not read the register first.
pub trait PeripheralPort {
    /// Read a register
    fn read(&self, register: Register) -> u16;
    /// Write a register
    fn write(&mut self, register: Register, value: u16);
    /// Read the packet memory word at byte `offset`
    fn read_pma(&self, offset: usize) -> u16;
    /// Write the packet memory word at byte `offset`
    fn write_pma(&mut self, offset: usize, value: u16);
}

/// Hooks that connect the device core to your program
///
/// The core calls these from within [`Device::poll()`] (or
/// [`Device::handle()`]). They should return quickly; the device is
/// single-buffered, and a slow hook delays the next packet.
pub trait Application {
    /// A data endpoint received `bytes`
    ///
    /// The endpoint is re-armed to receive once this returns.
    fn on_data_received(&mut self, endpoint: EndpointAddress, bytes: &[u8]);

    /// An IN endpoint is ready for its next packet
    ///
    /// Write at most `buffer.len()` bytes into `buffer`, and return how many
    /// you wrote. Return `None` to leave the endpoint idle; you can send
    /// later with [`Device::write()`].
    fn provide_next_outgoing(&mut self, endpoint: EndpointAddress, buffer: &mut [u8])
        -> Option<usize>;

    /// The host selected configuration `value`
    ///
    /// `value` is zero when the host deconfigures the device.
    fn on_configured(&mut self, value: u8) {
        let _ = value;
    }

    /// The host assigned bus `address`, and the device now answers to it
    fn on_addressed(&mut self, address: u8) {
        let _ = address;
    }
}

/// A type that owns the USB register block and packet memory
///
/// # Safety
///
/// `Peripherals` should only be implemented on a type that owns the USB
/// peripheral. The pointers returned by the methods are assumed to be valid
/// for the life of the program, and will be cast to register definitions.
///
/// # Example
///
/// A safe implementation of `Peripherals` for an STM32F103, which maps the USB
/// registers at `0x4000_5C00` and the packet memory at `0x4000_6000`.
///
/// ```
/// use stm32fs_usbd::Peripherals;
///
/// struct Usb {
///     _private: (),
/// }
///
/// impl Usb {
///     /// Only call this once!
///     pub unsafe fn steal() -> Usb {
///         Usb { _private: () }
///     }
/// }
///
/// unsafe impl Peripherals for Usb {
///     fn usb(&self) -> *const () {
///         0x4000_5C00 as *const ()
///     }
///     fn packet_memory(&self) -> *const () {
///         0x4000_6000 as *const ()
///     }
/// }
///
/// let usb = unsafe { Usb::steal() };
/// assert_eq!(usb.usb(), 0x4000_5C00 as *const ());
/// ```
pub unsafe trait Peripherals {
    /// Returns the address of the USB registers
    fn usb(&self) -> *const ();
    /// Returns the address of the packet memory area
    fn packet_memory(&self) -> *const ();
}
