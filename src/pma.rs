//! Packet memory layout and access
//!
//! The packet memory area starts with the buffer descriptor table (BDT), one
//! entry per endpoint register, followed by the endpoint buffers. Each BDT
//! entry holds four 16-bit words:
//!
//! | Offset | Word       | Meaning                                         |
//! | ------ | ---------- | ----------------------------------------------- |
//! | 0      | `ADDR_TX`  | Offset of the transmit buffer                   |
//! | 2      | `COUNT_TX` | Number of bytes to transmit                     |
//! | 4      | `ADDR_RX`  | Offset of the receive buffer                    |
//! | 6      | `COUNT_RX` | Receive capacity (blocks), and bytes received   |
//!
//! The layout is computed once, from the endpoint configuration, and never
//! changes. A bus reset re-programs the same layout.

use crate::{endpoint::EndpointConfig, PeripheralPort, Register, TransferType, MAX_ENDPOINTS};
use usb_device::{Result, UsbError};

/// Size of the packet memory area, in bytes
pub const PMA_SIZE: usize = 512;

/// Packet memory offset of the buffer descriptor table
pub const BTABLE_OFFSET: u16 = 0;

const ENTRY_SIZE: usize = 8;
const ADDR_TX: usize = 0;
const COUNT_TX: usize = 2;
const ADDR_RX: usize = 4;
const COUNT_RX: usize = 6;

/// Size of the buffer descriptor table, sized for every endpoint register
pub const BTABLE_SIZE: usize = MAX_ENDPOINTS * ENTRY_SIZE;

/// Received byte count field of `COUNT_RX`
const COUNT_MASK: u16 = 0x03FF;

/// Returns the packet memory offset of a BDT entry word
const fn entry(endpoint: u8, word: usize) -> usize {
    BTABLE_OFFSET as usize + endpoint as usize * ENTRY_SIZE + word
}

/// Round a receive capacity up to what `COUNT_RX` can express
///
/// Returns the rounded capacity, and the `BL_SIZE` / `NUM_BLOCK` encoding.
/// Capacities up to 62 bytes count 2-byte blocks; larger capacities count
/// 32-byte blocks.
const fn rx_capacity(size: u16) -> (u16, u16) {
    if size <= 62 {
        let blocks = (size + 1) / 2;
        (blocks * 2, blocks << 10)
    } else {
        let blocks = (size + 31) / 32;
        (blocks * 32, 0x8000 | ((blocks - 1) << 10))
    }
}

/// A region of packet memory assigned to one endpoint direction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferHandle {
    endpoint: u8,
    offset: u16,
    capacity: u16,
    /// `COUNT_RX` encoding for receive buffers, zero for transmit buffers
    blocks: u16,
}

impl BufferHandle {
    /// The endpoint number that owns this buffer
    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }
    /// Packet memory offset of the first byte
    pub fn offset(&self) -> usize {
        self.offset as usize
    }
    /// Number of bytes reserved for the buffer
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }
    fn end(&self) -> usize {
        self.offset() + self.capacity()
    }
    /// Indicates if two buffers share any byte of packet memory
    pub fn overlaps(&self, other: &BufferHandle) -> bool {
        self.offset() < other.end() && other.offset() < self.end()
    }
}

/// The transmit and receive buffers of one endpoint
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EndpointBuffers {
    /// IN buffer
    pub tx: Option<BufferHandle>,
    /// OUT buffer
    pub rx: Option<BufferHandle>,
}

const NO_BUFFERS: EndpointBuffers = EndpointBuffers { tx: None, rx: None };

/// Packet memory allocator
///
/// Hands out consecutive, even-aligned regions, and never frees them.
struct Allocator {
    ptr: usize,
    end: usize,
}

impl Allocator {
    const fn new(start: usize, end: usize) -> Self {
        Allocator { ptr: start, end }
    }
    /// Allocates a buffer of `size`, rounded up to a whole word
    fn allocate(&mut self, size: usize) -> Option<usize> {
        let size = (size + 1) & !1;
        let start = self.ptr;
        let end = start.checked_add(size)?;
        if end > self.end {
            None
        } else {
            self.ptr = end;
            Some(start)
        }
    }
}

/// The packet memory layout for every endpoint
#[derive(Clone, Copy, Debug)]
pub struct PacketMemory {
    buffers: [EndpointBuffers; MAX_ENDPOINTS],
    used: usize,
}

impl PacketMemory {
    /// A layout that assigns no buffers
    pub const fn empty() -> Self {
        PacketMemory {
            buffers: [NO_BUFFERS; MAX_ENDPOINTS],
            used: BTABLE_SIZE,
        }
    }

    /// Lay out packet memory for `endpoints`
    ///
    /// Buffers are assigned in order: each endpoint's transmit buffer, then
    /// its receive buffer, sized to its max packet size.
    ///
    /// Fails with
    ///
    /// - `EndpointOverflow` if an endpoint number is out of range,
    /// - `InvalidEndpoint` if an endpoint appears twice, supports no
    ///   direction, or isn't a control endpoint exactly when it's endpoint 0,
    /// - `Unsupported` if a max packet size isn't a full-speed size,
    /// - `EndpointMemoryOverflow` if the buffers don't fit.
    pub fn allocate<'a>(endpoints: impl IntoIterator<Item = &'a EndpointConfig>) -> Result<Self> {
        let mut layout = Self::empty();
        let mut allocator = Allocator::new(BTABLE_SIZE, PMA_SIZE);
        let mut seen = 0u8;

        for config in endpoints {
            let number = config.number();
            if number as usize >= MAX_ENDPOINTS {
                return Err(UsbError::EndpointOverflow);
            }
            if seen & (1 << number) != 0
                || config.directions().is_empty()
                || (number == 0) != (config.kind() == TransferType::Control)
            {
                return Err(UsbError::InvalidEndpoint);
            }
            let max_packet_size = config.max_packet_size();
            let valid_size = match config.kind() {
                TransferType::Control => matches!(max_packet_size, 8 | 16 | 32 | 64),
                _ => (1..=crate::MAX_PACKET_SIZE as u16).contains(&max_packet_size),
            };
            if !valid_size {
                return Err(UsbError::Unsupported);
            }
            seen |= 1 << number;

            let buffers = &mut layout.buffers[number as usize];
            if config.directions().contains(crate::Directions::IN) {
                let offset = allocator
                    .allocate(max_packet_size as usize)
                    .ok_or(UsbError::EndpointMemoryOverflow)?;
                buffers.tx = Some(BufferHandle {
                    endpoint: number,
                    offset: offset as u16,
                    capacity: max_packet_size,
                    blocks: 0,
                });
            }
            if config.directions().contains(crate::Directions::OUT) {
                let (capacity, blocks) = rx_capacity(max_packet_size);
                let offset = allocator
                    .allocate(capacity as usize)
                    .ok_or(UsbError::EndpointMemoryOverflow)?;
                buffers.rx = Some(BufferHandle {
                    endpoint: number,
                    offset: offset as u16,
                    capacity,
                    blocks,
                });
            }
        }

        layout.used = allocator.ptr;
        Ok(layout)
    }

    /// Returns the buffers assigned to endpoint `number`
    pub fn buffers(&self, number: u8) -> EndpointBuffers {
        self.buffers
            .get(number as usize)
            .copied()
            .unwrap_or(NO_BUFFERS)
    }

    /// Number of bytes of packet memory in use, including the BDT
    pub fn used(&self) -> usize {
        self.used
    }

    /// Write the buffer descriptor table, and point `BTABLE` at it
    pub fn program<P: PeripheralPort>(&self, port: &mut P) {
        port.write(Register::BufferTable, BTABLE_OFFSET);
        for (number, buffers) in self.buffers.iter().enumerate() {
            let number = number as u8;
            let tx = buffers.tx.map(|tx| tx.offset).unwrap_or(0);
            let (rx, blocks) = buffers
                .rx
                .map(|rx| (rx.offset, rx.blocks))
                .unwrap_or((0, 0));
            port.write_pma(entry(number, ADDR_TX), tx);
            port.write_pma(entry(number, COUNT_TX), 0);
            port.write_pma(entry(number, ADDR_RX), rx);
            port.write_pma(entry(number, COUNT_RX), blocks);
        }
    }
}

/// Copy `bytes` into a transmit buffer, and mark them ready to send
///
/// Copies at most the buffer capacity, and returns the number of bytes
/// copied. Packet memory is written a word at a time; an odd trailing byte is
/// padded, but only the copied bytes are counted in `COUNT_TX`.
pub fn copy_in<P: PeripheralPort>(port: &mut P, handle: &BufferHandle, bytes: &[u8]) -> usize {
    let len = bytes.len().min(handle.capacity());
    for (idx, chunk) in bytes[..len].chunks(2).enumerate() {
        let word = match *chunk {
            [lo, hi] => u16::from_le_bytes([lo, hi]),
            [lo] => lo as u16,
            _ => 0,
        };
        port.write_pma(handle.offset() + 2 * idx, word);
    }
    port.write_pma(entry(handle.endpoint, COUNT_TX), len as u16);
    len
}

/// Returns the number of bytes in the last packet received into a buffer
pub fn received_len<P: PeripheralPort>(port: &P, handle: &BufferHandle) -> usize {
    let count = port.read_pma(entry(handle.endpoint, COUNT_RX)) & COUNT_MASK;
    (count as usize).min(handle.capacity())
}

/// Copy the last received packet out of a receive buffer
///
/// Returns the number of bytes copied into `buffer`.
pub fn copy_out<P: PeripheralPort>(port: &P, handle: &BufferHandle, buffer: &mut [u8]) -> usize {
    let len = received_len(port, handle).min(buffer.len());
    for (idx, chunk) in buffer[..len].chunks_mut(2).enumerate() {
        let word = port.read_pma(handle.offset() + 2 * idx).to_le_bytes();
        chunk.copy_from_slice(&word[..chunk.len()]);
    }
    len
}
