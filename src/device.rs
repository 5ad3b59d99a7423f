//! The USB device
//!
//! [`Device`] owns the peripheral and your [`Application`]. It turns
//! peripheral events into control transfers on endpoint 0, and data transfers
//! on every other endpoint.

use crate::{
    control::{Context, Control, State},
    data,
    descriptor::Descriptors,
    endpoint::{Endpoint, EndpointConfig},
    pma::PacketMemory,
    register::{istr_clear, Cntr, Daddr, Epr, Istr},
    Application, PeripheralPort, Register, MAX_ENDPOINTS,
};
use usb_device::{bus::PollResult, endpoint::EndpointAddress, Result, UsbDirection, UsbError};

/// Device configuration
///
/// Describes the descriptors the host sees, and the data endpoints that back
/// them. Endpoint 0 is always present; don't list it in `endpoints`.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    ep0_max_packet_size: u16,
    endpoints: &'static [EndpointConfig],
    descriptors: Descriptors,
}

impl Config {
    /// Create a configuration
    ///
    /// The endpoint 0 max packet size is taken from the device descriptor.
    pub const fn new(descriptors: Descriptors, endpoints: &'static [EndpointConfig]) -> Self {
        Config {
            ep0_max_packet_size: descriptors.max_packet_size_0(),
            endpoints,
            descriptors,
        }
    }

    /// Override the endpoint 0 max packet size
    ///
    /// Must be 8, 16, 32 or 64, and should match `bMaxPacketSize0`.
    pub const fn ep0_max_packet_size(mut self, size: u16) -> Self {
        self.ep0_max_packet_size = size;
        self
    }
}

/// A peripheral event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// The host reset the bus
    BusReset,
    /// Endpoint `n` received a packet, SETUP or OUT
    Received(u8),
    /// Endpoint `n` finished sending an IN packet
    Sent(u8),
}

/// A USB full-speed device
pub struct Device<P, A> {
    port: P,
    app: A,
    descriptors: Descriptors,
    memory: PacketMemory,
    ep0: Endpoint,
    /// Data endpoints, indexed by number; slot 0 is always empty
    endpoints: [Option<Endpoint>; MAX_ENDPOINTS],
    control: Control,
}

impl<P: PeripheralPort, A: Application> Device<P, A> {
    /// Create a device
    ///
    /// Lays out packet memory for endpoint 0 and the data endpoints. Fails if
    /// the endpoints are invalid, or if they don't fit in packet memory. The
    /// peripheral isn't touched until [`initialize()`](Device::initialize).
    pub fn new(port: P, app: A, config: Config) -> Result<Self> {
        let ep0_config = EndpointConfig::control(config.ep0_max_packet_size);
        let memory =
            PacketMemory::allocate(core::iter::once(&ep0_config).chain(config.endpoints.iter()))?;

        let ep0 = Endpoint::new(ep0_config, memory.buffers(0));
        let mut endpoints = [None; MAX_ENDPOINTS];
        for ep in config.endpoints {
            endpoints[ep.number() as usize] = Some(Endpoint::new(*ep, memory.buffers(ep.number())));
        }

        Ok(Device {
            port,
            app,
            descriptors: config.descriptors,
            memory,
            ep0,
            endpoints,
            control: Control::new(),
        })
    }

    /// Power up and reset the peripheral
    ///
    /// Interrupts stay masked; unmask them with
    /// [`set_interrupts()`](Device::set_interrupts) if you're not polling.
    /// The device answers the host after the host's first bus reset.
    pub fn initialize(&mut self) {
        // Power up, holding the peripheral in reset
        self.port.write(Register::Control, Cntr::FRES.bits());
        self.port.write(Register::Control, 0);
        self.port.write(Register::Status, 0);
        self.port.write(Register::Address, 0);
        self.memory.program(&mut self.port);
        debug!("INITIALIZED");
    }

    /// Enable (`true`) or disable (`false`) the reset and transfer interrupts
    pub fn set_interrupts(&mut self, enabled: bool) {
        let mut cntr = Cntr::from_bits_retain(self.port.read(Register::Control));
        cntr.set(Cntr::RESETM | Cntr::CTRM, enabled);
        self.port.write(Register::Control, cntr.bits());
    }

    /// Service every pending event
    ///
    /// A bus reset is serviced alone, and reported as `PollResult::Reset`.
    /// Otherwise, each endpoint's receive completion is serviced before its
    /// transmit completion, and the serviced endpoints are reported as
    /// `PollResult::Data`.
    pub fn poll(&mut self) -> PollResult {
        let istr = Istr::from_bits_retain(self.port.read(Register::Status));
        if istr.contains(Istr::RESET) {
            self.port.write(Register::Status, istr_clear(Istr::RESET));
            self.handle(Event::BusReset);
            return PollResult::Reset;
        }

        // Bus events this device doesn't act on
        let ignored = istr
            & (Istr::ESOF | Istr::SOF | Istr::SUSP | Istr::WKUP | Istr::ERR | Istr::PMAOVR);
        if !ignored.is_empty() {
            self.port.write(Register::Status, istr_clear(ignored));
        }

        let mut ep_out = 0u16;
        let mut ep_in_complete = 0u16;
        let mut ep_setup = 0u16;
        for number in 0..MAX_ENDPOINTS as u8 {
            if number != 0 && self.endpoints[number as usize].is_none() {
                continue;
            }
            let epr = self.port.read(Register::Endpoint(number));
            if epr & Epr::CTR_RX.bits() != 0 {
                if epr & Epr::SETUP.bits() != 0 {
                    ep_setup |= 1 << number;
                } else {
                    ep_out |= 1 << number;
                }
                self.handle(Event::Received(number));
            }
            // Receiving may have serviced the transmit completion
            if self.port.read(Register::Endpoint(number)) & Epr::CTR_TX.bits() != 0 {
                ep_in_complete |= 1 << number;
                self.handle(Event::Sent(number));
            }
        }

        if ep_out | ep_in_complete | ep_setup == 0 {
            PollResult::None
        } else {
            PollResult::Data {
                ep_out,
                ep_in_complete,
                ep_setup,
            }
        }
    }

    /// Service one event
    pub fn handle(&mut self, event: Event) {
        match event {
            Event::BusReset => self.bus_reset(),
            Event::Received(0) | Event::Sent(0) => {
                let mut cx = Context {
                    port: &mut self.port,
                    app: &mut self.app,
                    ep0: &self.ep0,
                    endpoints: &self.endpoints,
                    descriptors: &self.descriptors,
                };
                if event == Event::Received(0) {
                    self.control.on_receive(&mut cx);
                } else {
                    self.control.on_send(&mut cx);
                }
            }
            Event::Received(number) => {
                if let Some(ep) = self.data_endpoint(number) {
                    data::on_received(&mut self.port, &ep, &mut self.app);
                }
            }
            Event::Sent(number) => {
                if let Some(ep) = self.data_endpoint(number) {
                    data::on_sent(&mut self.port, &ep, &mut self.app);
                }
            }
        }
    }

    fn data_endpoint(&self, number: u8) -> Option<Endpoint> {
        self.endpoints.get(number as usize).copied().flatten()
    }

    fn bus_reset(&mut self) {
        self.memory.program(&mut self.port);
        self.ep0.enable(&mut self.port);
        data::disable(&mut self.port, &self.endpoints);
        self.port.write(Register::Address, Daddr::EF.bits());

        let configured = self.control.configuration() != 0;
        self.control.reset();
        if configured {
            self.app.on_configured(0);
        }
        debug!("RESET");
    }

    /// Returns the control transfer state
    pub fn state(&self) -> State {
        self.control.state()
    }

    /// Returns the active device address
    pub fn address(&self) -> u8 {
        (self.port.read(Register::Address) & Daddr::ADD.bits()) as u8
    }

    /// Returns the active configuration, or 0 if unconfigured
    pub fn configuration(&self) -> u8 {
        self.control.configuration()
    }

    /// Arm the IN endpoint `number` with `bytes`
    ///
    /// Returns the number of bytes armed, which is limited by the endpoint's
    /// max packet size. Fails with
    ///
    /// - `InvalidEndpoint` if there's no such IN endpoint,
    /// - `InvalidState` if the device isn't configured, or the endpoint is
    ///   stalled,
    /// - `WouldBlock` if the previous packet hasn't been collected.
    pub fn write(&mut self, number: u8, bytes: &[u8]) -> Result<usize> {
        let ep = self
            .data_endpoint(number)
            .filter(Endpoint::is_in)
            .ok_or(UsbError::InvalidEndpoint)?;
        if self.control.configuration() == 0 || ep.is_stalled(&self.port, UsbDirection::In) {
            return Err(UsbError::InvalidState);
        }
        if ep.is_tx_busy(&self.port) {
            return Err(UsbError::WouldBlock);
        }
        Ok(ep.write(&mut self.port, bytes))
    }

    fn endpoint(&self, address: EndpointAddress) -> Result<Endpoint> {
        let ep = if address.index() == 0 {
            Some(self.ep0)
        } else {
            self.endpoints.get(address.index()).copied().flatten()
        };
        ep.filter(|ep| match address.direction() {
            UsbDirection::In => ep.is_in(),
            UsbDirection::Out => ep.is_out(),
        })
        .ok_or(UsbError::InvalidEndpoint)
    }

    /// Stall, or unstall, the endpoint at `address`
    ///
    /// Unstalling resets the endpoint's data toggle.
    pub fn set_stalled(&mut self, address: EndpointAddress, stalled: bool) -> Result<()> {
        let ep = self.endpoint(address)?;
        ep.set_stalled(&mut self.port, address.direction(), stalled);
        Ok(())
    }

    /// Indicates if the endpoint at `address` is stalled
    pub fn is_stalled(&self, address: EndpointAddress) -> Result<bool> {
        let ep = self.endpoint(address)?;
        Ok(ep.is_stalled(&self.port, address.direction()))
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    /// Returns the packet memory layout
    pub fn memory(&self) -> &PacketMemory {
        &self.memory
    }

    #[cfg(test)]
    pub(crate) fn port(&self) -> &P {
        &self.port
    }

    #[cfg(test)]
    pub(crate) fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }
}
