use usb_device::{
    control::{Recipient, RequestType},
    Result, UsbDirection, UsbError,
};

/// A control request, parsed from an 8-byte SETUP packet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlRequest {
    pub direction: UsbDirection,
    pub request_type: RequestType,
    pub recipient: Recipient,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl ControlRequest {
    /// Size of a SETUP packet
    pub const SIZE: usize = 8;

    /// Parse a SETUP packet
    ///
    /// Fails with `ParseError` if `packet` is shorter than 8 bytes. Extra
    /// bytes are ignored.
    pub fn parse(packet: &[u8]) -> Result<Self> {
        if packet.len() < Self::SIZE {
            return Err(UsbError::ParseError);
        }
        let bm_request_type = packet[0];
        let request_type = match (bm_request_type >> 5) & 0b11 {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        };
        let recipient = match bm_request_type & 0b1_1111 {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => Recipient::Reserved,
        };
        Ok(ControlRequest {
            direction: bm_request_type.into(),
            request_type,
            recipient,
            request: packet[1],
            value: u16::from_le_bytes([packet[2], packet[3]]),
            index: u16::from_le_bytes([packet[4], packet[5]]),
            length: u16::from_le_bytes([packet[6], packet[7]]),
        })
    }

    /// Returns the descriptor type and index of a GET_DESCRIPTOR request
    pub fn descriptor_type_index(&self) -> (u8, u8) {
        ((self.value >> 8) as u8, self.value as u8)
    }
}
