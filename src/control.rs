//! Control transfers on endpoint 0
//!
//! The state machine follows the host through each control transfer:
//!
//! ```text
//!            SET_ADDRESS                  status IN done, commit address
//!   Idle ---------------> AddressPending ---------------------------------> Idle
//!     |     SET_CONFIGURATION, SET_INTERFACE, ...        status IN done
//!     +-------------------------------------> AwaitStatus ---------------> Idle
//!     |     GET_DESCRIPTOR, GET_STATUS, ...               status OUT received
//!     +-------------------------------------> DescriptorTx --------------> Idle
//! ```
//!
//! Anything the device can't service is answered with STALL, and the state
//! machine returns to `Idle`. A bus reset returns to `Idle` from anywhere.

use crate::{
    data,
    descriptor::Descriptors,
    endpoint::Endpoint,
    register::{Daddr, Epr, EndpointUpdate, Status},
    request::ControlRequest,
    Application, PeripheralPort, Register, MAX_ENDPOINTS,
};
use usb_device::{
    control::{Recipient, Request, RequestType},
    endpoint::EndpointAddress,
    UsbDirection,
};

/// Feature selector for an endpoint halt
const ENDPOINT_HALT: u16 = 0;

/// Control transfer state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Waiting for a SETUP
    Idle,
    /// A SET_ADDRESS status stage is in flight; the address isn't active yet
    AddressPending,
    /// A no-data request's status stage is in flight
    AwaitStatus,
    /// Sending an IN data stage, then waiting for the host's status OUT
    DescriptorTx,
}

/// Everything the dispatcher touches while servicing endpoint 0
pub(crate) struct Context<'a, P, A> {
    pub port: &'a mut P,
    pub app: &'a mut A,
    pub ep0: &'a Endpoint,
    /// Data endpoints, indexed by number; slot 0 is unused
    pub endpoints: &'a [Option<Endpoint>; MAX_ENDPOINTS],
    pub descriptors: &'a Descriptors,
}

/// The endpoint 0 state machine
#[derive(Debug)]
pub(crate) struct Control {
    state: State,
    /// Address from SET_ADDRESS, committed after the status stage
    address: u8,
    configuration: u8,
    /// Data stage bytes that haven't been armed yet
    remaining: &'static [u8],
    /// Close the data stage with a zero-length packet
    zlp: bool,
}

impl Control {
    pub const fn new() -> Self {
        Control {
            state: State::Idle,
            address: 0,
            configuration: 0,
            remaining: &[],
            zlp: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn configuration(&self) -> u8 {
        self.configuration
    }

    /// Return to the default state, unaddressed and unconfigured
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn end_transfer(&mut self) {
        self.state = State::Idle;
        self.remaining = &[];
        self.zlp = false;
    }

    /// Stall endpoint 0, and wait for the next SETUP
    fn stall<P: PeripheralPort, A>(&mut self, cx: &mut Context<'_, P, A>) {
        cx.ep0.stall(cx.port);
        self.end_transfer();
    }

    /// Arm a zero-length status packet
    fn status_in<P: PeripheralPort, A>(&mut self, cx: &mut Context<'_, P, A>, next: State) {
        cx.ep0.write(cx.port, &[]);
        self.state = next;
    }

    /// Start an IN data stage from static data, bounded by `length`
    fn data_in<P: PeripheralPort, A>(
        &mut self,
        cx: &mut Context<'_, P, A>,
        data: &'static [u8],
        length: u16,
    ) {
        if length == 0 {
            return self.status_in(cx, State::AwaitStatus);
        }
        let total = data.len().min(length as usize);
        let max_packet_len = cx.ep0.max_packet_len();
        let (first, rest) = data[..total].split_at(total.min(max_packet_len));
        cx.ep0.write(cx.port, first);
        self.remaining = rest;
        self.zlp = total != 0 && total % max_packet_len == 0 && total < length as usize;
        self.state = State::DescriptorTx;
    }

    /// Send a reply that always fits in one packet
    fn reply<P: PeripheralPort, A>(&mut self, cx: &mut Context<'_, P, A>, bytes: &[u8], length: u16) {
        if length == 0 {
            return self.status_in(cx, State::AwaitStatus);
        }
        let len = bytes.len().min(length as usize);
        cx.ep0.write(cx.port, &bytes[..len]);
        self.remaining = &[];
        self.zlp = false;
        self.state = State::DescriptorTx;
    }

    /// Endpoint 0 received a SETUP or an OUT packet
    pub fn on_receive<P: PeripheralPort, A: Application>(&mut self, cx: &mut Context<'_, P, A>) {
        let epr = cx.ep0.register(cx.port);
        cx.ep0.clear_rx_complete(cx.port);

        if epr & Epr::CTR_TX.bits() != 0 {
            // The host collected the previous IN packet before sending this one
            self.on_send(cx);
        }

        if epr & Epr::SETUP.bits() == 0 {
            if self.state == State::DescriptorTx && cx.ep0.received_len(cx.port) == 0 {
                // Status stage; drop whatever is left of the data stage
                cx.ep0.update(cx.port, EndpointUpdate::new().stat_tx(Status::Nak));
                self.end_transfer();
            }
            cx.ep0.schedule_read(cx.port);
            return;
        }

        self.end_transfer();

        let mut packet = [0; ControlRequest::SIZE];
        let len = cx.ep0.read(cx.port, &mut packet);
        let request = match ControlRequest::parse(&packet[..len]) {
            Ok(request) => request,
            Err(_) => {
                warn!("EP0 SETUP TOO SHORT {}", len);
                return self.stall(cx);
            }
        };
        debug!(
            "SETUP {:02X} {} {:04X} {} {}",
            packet[0],
            request.request,
            request.value,
            request.index,
            request.length
        );

        if self.dispatch(cx, &request) {
            cx.ep0.schedule_read(cx.port);
        } else {
            warn!("EP0 STALL {:02X} {}", packet[0], request.request);
            self.stall(cx);
        }
    }

    /// Service a standard request
    ///
    /// Returns `false` if the request should be stalled.
    fn dispatch<P: PeripheralPort, A: Application>(
        &mut self,
        cx: &mut Context<'_, P, A>,
        request: &ControlRequest,
    ) -> bool {
        let out = request.direction == UsbDirection::Out;
        match (request.request_type, request.recipient, request.request) {
            (RequestType::Standard, Recipient::Device, Request::SET_ADDRESS) if out => {
                if request.value > Daddr::ADD.bits() {
                    return false;
                }
                self.address = request.value as u8;
                self.status_in(cx, State::AddressPending);
            }
            (RequestType::Standard, Recipient::Device, Request::SET_CONFIGURATION) if out => {
                return self.set_configuration(cx, request.value);
            }
            (RequestType::Standard, Recipient::Device, Request::GET_DESCRIPTOR) if !out => {
                let (kind, _) = request.descriptor_type_index();
                match cx.descriptors.get(kind) {
                    Some(descriptor) => self.data_in(cx, descriptor, request.length),
                    None => return false,
                }
            }
            (RequestType::Standard, Recipient::Device, Request::GET_CONFIGURATION) if !out => {
                let configuration = [self.configuration];
                self.reply(cx, &configuration, request.length);
            }
            (RequestType::Standard, recipient, Request::GET_STATUS) if !out => {
                let status = match recipient {
                    Recipient::Device => [cx.descriptors.self_powered() as u8, 0],
                    Recipient::Interface => [0, 0],
                    Recipient::Endpoint => match self.endpoint(cx, request.index) {
                        Some((ep, direction)) => [ep.is_stalled(cx.port, direction) as u8, 0],
                        None => return false,
                    },
                    _ => return false,
                };
                self.reply(cx, &status, request.length);
            }
            (RequestType::Standard, Recipient::Interface, Request::SET_INTERFACE) if out => {
                // Only one alternate setting
                self.status_in(cx, State::AwaitStatus);
            }
            (
                RequestType::Standard,
                Recipient::Device | Recipient::Interface | Recipient::Endpoint,
                Request::CLEAR_FEATURE,
            ) if out => {
                if request.recipient == Recipient::Endpoint
                    && request.value == ENDPOINT_HALT
                    && !self.set_halt(cx, request.index, false)
                {
                    return false;
                }
                self.status_in(cx, State::AwaitStatus);
            }
            (RequestType::Standard, Recipient::Endpoint, Request::SET_FEATURE)
                if out && request.value == ENDPOINT_HALT =>
            {
                if !self.set_halt(cx, request.index, true) {
                    return false;
                }
                self.status_in(cx, State::AwaitStatus);
            }
            _ => return false,
        }
        true
    }

    /// Find the endpoint addressed by a request's `wIndex`
    ///
    /// Endpoint 0 is always available. Data endpoints are only available once
    /// configured, and only in the directions they support.
    fn endpoint<'a, P, A>(
        &self,
        cx: &Context<'a, P, A>,
        index: u16,
    ) -> Option<(&'a Endpoint, UsbDirection)> {
        let address = EndpointAddress::from(index as u8);
        let direction = address.direction();
        if address.index() == 0 {
            return Some((cx.ep0, direction));
        }
        if self.configuration == 0 {
            return None;
        }
        let ep = cx.endpoints.get(address.index())?.as_ref()?;
        let supported = match direction {
            UsbDirection::In => ep.is_in(),
            UsbDirection::Out => ep.is_out(),
        };
        supported.then_some((ep, direction))
    }

    /// Set or clear the halt of the endpoint addressed by `index`
    ///
    /// Endpoint 0 is left untouched, since its status stage follows and the
    /// next SETUP clears any stall. Returns `false` if there's no such endpoint.
    fn set_halt<P: PeripheralPort, A>(
        &self,
        cx: &mut Context<'_, P, A>,
        index: u16,
        halt: bool,
    ) -> bool {
        match self.endpoint(cx, index) {
            Some((ep, _)) if ep.number() == 0 => true,
            Some((ep, direction)) => {
                ep.set_stalled(cx.port, direction, halt);
                true
            }
            None => false,
        }
    }

    fn set_configuration<P: PeripheralPort, A: Application>(
        &mut self,
        cx: &mut Context<'_, P, A>,
        value: u16,
    ) -> bool {
        if value == 0 {
            data::disable(cx.port, cx.endpoints);
        } else if value == cx.descriptors.configuration_value() as u16 {
            data::enable(cx.port, cx.endpoints);
        } else {
            return false;
        }
        self.configuration = value as u8;
        debug!("CONFIGURED {}", self.configuration);
        cx.app.on_configured(self.configuration);
        if self.configuration != 0 {
            data::prime(cx.port, cx.endpoints, cx.app);
        }
        self.status_in(cx, State::AwaitStatus);
        true
    }

    /// Endpoint 0 finished sending a packet
    pub fn on_send<P: PeripheralPort, A: Application>(&mut self, cx: &mut Context<'_, P, A>) {
        cx.ep0.clear_tx_complete(cx.port);
        match self.state {
            State::AddressPending => {
                cx.port.write(
                    Register::Address,
                    Daddr::EF.bits() | (self.address as u16 & Daddr::ADD.bits()),
                );
                debug!("ADDRESS {}", self.address);
                cx.app.on_addressed(self.address);
                self.state = State::Idle;
            }
            State::AwaitStatus => self.state = State::Idle,
            State::DescriptorTx => {
                if !self.remaining.is_empty() {
                    let len = self.remaining.len().min(cx.ep0.max_packet_len());
                    let (next, rest) = self.remaining.split_at(len);
                    cx.ep0.write(cx.port, next);
                    self.remaining = rest;
                } else if self.zlp {
                    cx.ep0.write(cx.port, &[]);
                    self.zlp = false;
                }
                // Otherwise, wait for the host's status OUT
            }
            State::Idle => {
                warn!("EP0 UNEXPECTED IN COMPLETE");
                self.stall(cx);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::State;
    use crate::{
        descriptor::{self, CONFIGURATION, DEVICE},
        device::test::{control_in, control_out, default_device, device, setup_packet},
        register::{Epr, Status},
        sim::Handshake,
        Config,
    };
    use std::vec::Vec;

    fn small_ep0() -> crate::device::test::TestDevice {
        device(
            Config::new(descriptor::DEFAULT, &descriptor::DEFAULT_ENDPOINTS).ep0_max_packet_size(8),
        )
    }

    #[test]
    fn multi_packet_descriptor() {
        let mut device = small_ep0();
        device.port_mut().setup(&setup_packet(0x80, 0x06, 0x0100, 0, 64));
        device.poll();
        let mut lengths = Vec::new();
        let mut data = Vec::new();
        for _ in 0..3 {
            let packet = device.port_mut().in_packet(0).unwrap();
            device.poll();
            lengths.push(packet.len());
            data.extend_from_slice(&packet);
        }
        assert_eq!(lengths, [8, 8, 2]);
        assert_eq!(data, DEVICE);
        assert_eq!(device.state(), State::DescriptorTx);
        // Short packet ends the data stage
        assert_eq!(device.port_mut().in_packet(0), Err(Handshake::Nak));

        device.port_mut().out(0, &[]).unwrap();
        device.poll();
        assert_eq!(device.state(), State::Idle);
    }

    #[test]
    fn zero_length_packet_after_full_packet() {
        let mut device = small_ep0();
        // 32 bytes is a multiple of 8, and the host asked for more
        let data = control_in(&mut device, setup_packet(0x80, 0x06, 0x0200, 0, 255));
        assert_eq!(data, CONFIGURATION);
        assert_eq!(device.state(), State::Idle);
    }

    #[test]
    fn no_zero_length_packet_when_length_met() {
        let mut device = small_ep0();
        device.port_mut().setup(&setup_packet(0x80, 0x06, 0x0200, 0, 32));
        device.poll();
        for _ in 0..4 {
            assert_eq!(device.port_mut().in_packet(0).unwrap().len(), 8);
            device.poll();
        }
        assert_eq!(device.port_mut().in_packet(0), Err(Handshake::Nak));
        device.port_mut().out(0, &[]).unwrap();
        device.poll();
        assert_eq!(device.state(), State::Idle);
    }

    #[test]
    fn host_ends_data_stage_early() {
        let mut device = small_ep0();
        device.port_mut().setup(&setup_packet(0x80, 0x06, 0x0100, 0, 18));
        device.poll();
        assert_eq!(device.port_mut().in_packet(0).unwrap(), DEVICE[..8]);
        device.poll();
        assert_eq!(device.port().tx_status(0), Status::Valid);

        device.port_mut().out(0, &[]).unwrap();
        device.poll();
        assert_eq!(device.state(), State::Idle);
        assert_eq!(device.port().tx_status(0), Status::Nak);
        assert_eq!(device.port().rx_status(0), Status::Valid);
    }

    #[test]
    fn setup_before_status_completion_is_serviced() {
        let mut device = default_device();
        device.port_mut().setup(&setup_packet(0x00, 0x05, 12, 0, 0));
        device.poll();
        assert!(device.port_mut().in_packet(0).unwrap().is_empty());
        // The next SETUP arrives before the completion is serviced
        device.port_mut().setup(&setup_packet(0x80, 0x06, 0x0100, 0, 18));
        device.poll();
        assert_eq!(device.address(), 12);
        assert_eq!(device.app().addressed, [12]);
        assert_eq!(device.state(), State::DescriptorTx);
        assert_eq!(device.port_mut().in_packet(0).unwrap(), DEVICE);
    }

    #[test]
    fn unexpected_in_completion_stalls() {
        let mut device = default_device();
        device.handle(crate::Event::Sent(0));
        assert_eq!(device.port().tx_status(0), Status::Stall);
        assert_eq!(device.state(), State::Idle);
    }

    #[test]
    fn short_setup_stalls() {
        let mut device = default_device();
        device.port_mut().setup(&[0x80, 0x06, 0x00, 0x01]);
        device.poll();
        assert_eq!(device.port().tx_status(0), Status::Stall);
        assert_eq!(device.state(), State::Idle);
    }

    #[test]
    fn set_interface_acknowledged() {
        let mut device = default_device();
        control_out(&mut device, setup_packet(0x01, 0x0B, 0, 0, 0)).unwrap();
        assert_eq!(device.state(), State::Idle);
    }

    #[test]
    fn zero_length_get_descriptor() {
        let mut device = default_device();
        // No data stage; the status stage follows the SETUP
        control_out(&mut device, setup_packet(0x80, 0x06, 0x0100, 0, 0)).unwrap();
        assert_eq!(device.state(), State::Idle);
    }

    #[test]
    fn status_out_collected_with_last_in() {
        let mut device = default_device();
        device.port_mut().setup(&setup_packet(0x80, 0x06, 0x0100, 0, 18));
        device.poll();
        // Both the IN completion and the status OUT are pending at the next poll
        assert_eq!(device.port_mut().in_packet(0).unwrap(), DEVICE);
        device.port_mut().out(0, &[]).unwrap();
        device.poll();

        assert_eq!(device.state(), State::Idle);
        assert_eq!(device.port().tx_status(0), Status::Nak);
        assert_eq!(device.port().rx_status(0), Status::Valid);
        assert_eq!(
            device.port().epr(0) & (Epr::CTR_TX | Epr::CTR_RX).bits(),
            0
        );
    }

    #[test]
    fn clear_halt_on_endpoint_zero_keeps_toggle() {
        let mut device = default_device();
        device.port_mut().setup(&setup_packet(0x02, 0x01, 0, 0x80, 0));
        device.poll();
        // The status ZLP goes out as DATA1
        assert_eq!(device.port().tx_status(0), Status::Valid);
        assert_ne!(device.port().epr(0) & Epr::DTOG_TX.bits(), 0);

        assert!(device.port_mut().in_packet(0).unwrap().is_empty());
        device.poll();
        assert_eq!(device.state(), State::Idle);
        assert_eq!(device.port().rx_status(0), Status::Valid);
    }

    #[test]
    fn set_halt_on_endpoint_zero_acknowledged() {
        let mut device = default_device();
        control_out(&mut device, setup_packet(0x02, 0x03, 0, 0x00, 0)).unwrap();
        assert_eq!(device.state(), State::Idle);
        assert_eq!(device.port().rx_status(0), Status::Valid);
    }

    #[test]
    fn clear_feature_other_recipient_stalls() {
        let mut device = default_device();
        device.port_mut().setup(&setup_packet(0x03, 0x01, 0, 0, 0));
        device.poll();
        assert_eq!(device.port().tx_status(0), Status::Stall);
        assert_eq!(device.port().rx_status(0), Status::Stall);
    }
}
