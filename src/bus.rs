//! Interrupt-safe device sharing

use crate::{Application, Device, Event, PeripheralPort};
use core::cell::RefCell;
use cortex_m::interrupt::{self, Mutex};
use usb_device::bus::PollResult;

/// A [`Device`] shared between the USB interrupt and the rest of the program
///
/// Every access happens in a critical section. Poll from the USB interrupt
/// handler, and use [`with_device_mut()`](SharedDevice::with_device_mut) to
/// reach the device, or your application, from anywhere else.
pub struct SharedDevice<P, A> {
    device: Mutex<RefCell<Device<P, A>>>,
}

impl<P: PeripheralPort, A: Application> SharedDevice<P, A> {
    /// Share a device
    ///
    /// Make sure you've initialized the device before sharing it.
    pub fn new(device: Device<P, A>) -> Self {
        SharedDevice {
            device: Mutex::new(RefCell::new(device)),
        }
    }

    /// Interrupt-safe, immutable access to the device
    pub fn with_device<R>(&self, func: impl FnOnce(&Device<P, A>) -> R) -> R {
        interrupt::free(|cs| {
            let device = self.device.borrow(cs);
            let device = device.borrow();
            func(&*device)
        })
    }

    /// Interrupt-safe, mutable access to the device
    pub fn with_device_mut<R>(&self, func: impl FnOnce(&mut Device<P, A>) -> R) -> R {
        interrupt::free(|cs| {
            let device = self.device.borrow(cs);
            let mut device = device.borrow_mut();
            func(&mut *device)
        })
    }

    /// Service every pending event
    pub fn poll(&self) -> PollResult {
        self.with_device_mut(|device| device.poll())
    }

    /// Service one event
    pub fn handle(&self, event: Event) {
        self.with_device_mut(|device| device.handle(event));
    }

    /// Enable (`true`) or disable (`false`) the reset and transfer interrupts
    pub fn set_interrupts(&self, enabled: bool) {
        self.with_device_mut(|device| device.set_interrupts(enabled));
    }
}
