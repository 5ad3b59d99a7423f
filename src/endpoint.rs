use crate::{
    pma::{self, EndpointBuffers},
    register::{EndpointUpdate, Status},
    PeripheralPort, Register,
};
use bitflags::bitflags;
use usb_device::{endpoint::EndpointAddress, UsbDirection};

/// Endpoint transfer type
///
/// Isochronous endpoints aren't supported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferType {
    Control,
    Bulk,
    Interrupt,
}

impl TransferType {
    /// The `EP_TYPE` encoding
    const fn ep_type(self) -> u16 {
        match self {
            TransferType::Bulk => 0b00,
            TransferType::Control => 0b01,
            TransferType::Interrupt => 0b11,
        }
    }
}

bitflags! {
    /// Directions supported by an endpoint
    ///
    /// One endpoint register serves both an OUT and an IN endpoint with the
    /// same number, so an endpoint may support both.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Directions: u8 {
        /// Host to device
        const OUT = 1 << 0;
        /// Device to host
        const IN = 1 << 1;
    }
}

/// Static endpoint configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndpointConfig {
    number: u8,
    directions: Directions,
    kind: TransferType,
    max_packet_size: u16,
}

impl EndpointConfig {
    /// The control endpoint, endpoint 0
    pub const fn control(max_packet_size: u16) -> Self {
        EndpointConfig {
            number: 0,
            directions: Directions::all(),
            kind: TransferType::Control,
            max_packet_size,
        }
    }

    /// A bulk endpoint
    pub const fn bulk(number: u8, directions: Directions, max_packet_size: u16) -> Self {
        EndpointConfig {
            number,
            directions,
            kind: TransferType::Bulk,
            max_packet_size,
        }
    }

    /// An interrupt endpoint
    pub const fn interrupt(number: u8, directions: Directions, max_packet_size: u16) -> Self {
        EndpointConfig {
            number,
            directions,
            kind: TransferType::Interrupt,
            max_packet_size,
        }
    }

    pub const fn number(&self) -> u8 {
        self.number
    }

    pub const fn directions(&self) -> Directions {
        self.directions
    }

    pub const fn kind(&self) -> TransferType {
        self.kind
    }

    pub const fn max_packet_size(&self) -> u16 {
        self.max_packet_size
    }
}

/// A USB endpoint
///
/// An endpoint is its configuration plus the packet memory assigned to it.
/// Its status and data toggles live in the endpoint register, and every
/// change goes through an [`EndpointUpdate`].
#[derive(Clone, Copy, Debug)]
pub struct Endpoint {
    config: EndpointConfig,
    buffers: EndpointBuffers,
}

impl Endpoint {
    pub fn new(config: EndpointConfig, buffers: EndpointBuffers) -> Self {
        Endpoint { config, buffers }
    }

    pub fn number(&self) -> u8 {
        self.config.number
    }

    pub fn max_packet_len(&self) -> usize {
        self.config.max_packet_size as usize
    }

    pub fn is_in(&self) -> bool {
        self.buffers.tx.is_some()
    }

    pub fn is_out(&self) -> bool {
        self.buffers.rx.is_some()
    }

    /// Returns the address of this endpoint in the given direction
    pub fn address(&self, direction: UsbDirection) -> EndpointAddress {
        EndpointAddress::from_parts(self.number() as usize, direction)
    }

    /// Returns the endpoint register value
    pub fn register<P: PeripheralPort>(&self, port: &P) -> u16 {
        port.read(Register::Endpoint(self.number()))
    }

    /// Apply `update` to the endpoint register
    pub fn update<P: PeripheralPort>(&self, port: &mut P, update: EndpointUpdate) {
        let register = Register::Endpoint(self.number());
        let current = port.read(register);
        port.write(register, update.value(current));
    }

    /// Enable the endpoint
    ///
    /// Assigns the address and type, clears both data toggles and any
    /// completions, arms the OUT direction and NAKs the IN direction.
    /// Directions the endpoint doesn't support are disabled.
    pub fn enable<P: PeripheralPort>(&self, port: &mut P) {
        let rx = if self.is_out() {
            Status::Valid
        } else {
            Status::Disabled
        };
        let tx = if self.is_in() {
            Status::Nak
        } else {
            Status::Disabled
        };
        self.update(
            port,
            EndpointUpdate::new()
                .configure(self.number(), self.config.kind.ep_type())
                .dtog_rx(false)
                .dtog_tx(false)
                .clear_ctr_rx()
                .clear_ctr_tx()
                .stat_rx(rx)
                .stat_tx(tx),
        );
    }

    /// Disable both directions, dropping any completions
    pub fn disable<P: PeripheralPort>(&self, port: &mut P) {
        self.update(
            port,
            EndpointUpdate::new()
                .clear_ctr_rx()
                .clear_ctr_tx()
                .stat_rx(Status::Disabled)
                .stat_tx(Status::Disabled),
        );
    }

    /// Write `buffer` to the endpoint buffer, and arm the IN direction
    ///
    /// Returns the number of bytes armed, which is constrained by the max
    /// packet length. An empty `buffer` arms a zero-length packet.
    pub fn write<P: PeripheralPort>(&self, port: &mut P, buffer: &[u8]) -> usize {
        let Some(tx) = self.buffers.tx else {
            return 0;
        };
        let size = self.max_packet_len().min(buffer.len());
        let written = pma::copy_in(port, &tx, &buffer[..size]);
        self.update(port, EndpointUpdate::new().stat_tx(Status::Valid));
        written
    }

    /// Read the last received packet into `buffer`
    ///
    /// Returns the number of bytes read into `buffer`, which is constrained by
    /// the buffer capacity, and the number of bytes received.
    pub fn read<P: PeripheralPort>(&self, port: &P, buffer: &mut [u8]) -> usize {
        self.buffers
            .rx
            .map(|rx| pma::copy_out(port, &rx, buffer))
            .unwrap_or(0)
    }

    /// Returns the number of bytes in the last received packet
    pub fn received_len<P: PeripheralPort>(&self, port: &P) -> usize {
        self.buffers
            .rx
            .map(|rx| pma::received_len(port, &rx))
            .unwrap_or(0)
    }

    /// Arm the OUT direction to receive the next packet
    pub fn schedule_read<P: PeripheralPort>(&self, port: &mut P) {
        self.update(port, EndpointUpdate::new().stat_rx(Status::Valid));
    }

    /// Clear the receive complete flag
    pub fn clear_rx_complete<P: PeripheralPort>(&self, port: &mut P) {
        self.update(port, EndpointUpdate::new().clear_ctr_rx());
    }

    /// Clear the transmit complete flag
    pub fn clear_tx_complete<P: PeripheralPort>(&self, port: &mut P) {
        self.update(port, EndpointUpdate::new().clear_ctr_tx());
    }

    /// Indicates if an IN packet is armed and not yet collected
    pub fn is_tx_busy<P: PeripheralPort>(&self, port: &P) -> bool {
        Status::tx(self.register(port)) == Status::Valid
    }

    /// Stall or unstall one direction of the endpoint
    ///
    /// Unstalling resets the data toggle, and leaves the direction
    /// where [`enable()`](Endpoint::enable) would.
    pub fn set_stalled<P: PeripheralPort>(
        &self,
        port: &mut P,
        direction: UsbDirection,
        stall: bool,
    ) {
        let update = match (direction, stall) {
            (UsbDirection::In, true) => EndpointUpdate::new().stat_tx(Status::Stall),
            (UsbDirection::Out, true) => EndpointUpdate::new().stat_rx(Status::Stall),
            (UsbDirection::In, false) => EndpointUpdate::new().stat_tx(Status::Nak).dtog_tx(false),
            (UsbDirection::Out, false) => {
                EndpointUpdate::new().stat_rx(Status::Valid).dtog_rx(false)
            }
        };
        self.update(port, update);
    }

    /// Stall both directions
    pub fn stall<P: PeripheralPort>(&self, port: &mut P) {
        self.update(
            port,
            EndpointUpdate::new()
                .stat_tx(Status::Stall)
                .stat_rx(Status::Stall),
        );
    }

    /// Indicates if a direction of the endpoint is stalled
    pub fn is_stalled<P: PeripheralPort>(&self, port: &P, direction: UsbDirection) -> bool {
        let epr = self.register(port);
        match direction {
            UsbDirection::In => Status::tx(epr) == Status::Stall,
            UsbDirection::Out => Status::rx(epr) == Status::Stall,
        }
    }
}
