//! Data endpoint handling
//!
//! Once configured, each data endpoint moves packets between the host and the
//! [`Application`]. An OUT endpoint hands every packet to the application,
//! then re-arms. An IN endpoint asks the application for its next packet each
//! time the previous one is collected; if there's nothing to send, the
//! endpoint NAKs until [`Device::write()`](crate::Device::write) arms it.

use crate::{endpoint::Endpoint, Application, PeripheralPort, MAX_PACKET_SIZE};
use usb_device::UsbDirection;

/// Enable all data endpoints
pub fn enable<P: PeripheralPort>(port: &mut P, endpoints: &[Option<Endpoint>]) {
    for ep in endpoints.iter().flatten() {
        ep.enable(port);
    }
}

/// Disable all data endpoints
pub fn disable<P: PeripheralPort>(port: &mut P, endpoints: &[Option<Endpoint>]) {
    for ep in endpoints.iter().flatten() {
        ep.disable(port);
    }
}

/// Offer each IN endpoint its first packet
pub fn prime<P: PeripheralPort, A: Application>(
    port: &mut P,
    endpoints: &[Option<Endpoint>],
    app: &mut A,
) {
    for ep in endpoints.iter().flatten().filter(|ep| ep.is_in()) {
        send_next(port, ep, app);
    }
}

/// The IN endpoint `ep` finished sending a packet
pub fn on_sent<P: PeripheralPort, A: Application>(port: &mut P, ep: &Endpoint, app: &mut A) {
    ep.clear_tx_complete(port);
    send_next(port, ep, app);
}

/// The OUT endpoint `ep` received a packet
pub fn on_received<P: PeripheralPort, A: Application>(port: &mut P, ep: &Endpoint, app: &mut A) {
    ep.clear_rx_complete(port);
    let mut buffer = [0; MAX_PACKET_SIZE];
    let len = ep.read(port, &mut buffer);
    trace!("EP{} OUT {}", ep.number(), len);
    app.on_data_received(ep.address(UsbDirection::Out), &buffer[..len]);
    ep.schedule_read(port);
}

fn send_next<P: PeripheralPort, A: Application>(port: &mut P, ep: &Endpoint, app: &mut A) {
    let mut buffer = [0; MAX_PACKET_SIZE];
    let max_packet_len = ep.max_packet_len().min(MAX_PACKET_SIZE);
    let address = ep.address(UsbDirection::In);
    if let Some(len) = app.provide_next_outgoing(address, &mut buffer[..max_packet_len]) {
        let len = len.min(max_packet_len);
        ep.write(port, &buffer[..len]);
        trace!("EP{} IN {}", ep.number(), len);
    }
}
