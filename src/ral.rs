//! Register access for the USB peripheral
//!
//! [`RegisterPort`] implements [`PeripheralPort`] over the memory-mapped
//! registers and packet memory. Use it on hardware.
//!
//! The packet memory is 512 bytes of 16-bit words, but the CPU sees each word
//! in the lower half of a 32-bit slot. Packet memory offset `n` lives at CPU
//! address `base + 2 * n`.

#![allow(non_snake_case, non_upper_case_globals)]

use crate::{pma::PMA_SIZE, PeripheralPort, Peripherals, Register, MAX_ENDPOINTS};
use ral_registers::{read_reg, write_reg, RWRegister};

/// USB peripheral registers
#[repr(C)]
pub struct RegisterBlock {
    pub EPR: [RWRegister<u32>; MAX_ENDPOINTS],
    _reserved: [u32; 8],
    pub CNTR: RWRegister<u32>,
    pub ISTR: RWRegister<u32>,
    pub FNR: RWRegister<u32>,
    pub DADDR: RWRegister<u32>,
    pub BTABLE: RWRegister<u32>,
}

const _: [(); 1] = [(); (core::mem::size_of::<RegisterBlock>() == 0x54) as usize];

/// Packet memory, as the CPU sees it
#[repr(C)]
pub struct PacketMemoryBlock {
    pub WORDS: [RWRegister<u32>; PMA_SIZE / 2],
}

pub mod CNTR {
    pub mod FRES {
        pub const offset: u32 = 0;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod PDWN {
        pub const offset: u32 = 1;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
}

/// Memory-mapped access to a USB peripheral
pub struct RegisterPort {
    usb: &'static RegisterBlock,
    pma: &'static PacketMemoryBlock,
}

// Safety: the port exclusively owns the peripheral, per `Peripherals`.
unsafe impl Send for RegisterPort {}

impl RegisterPort {
    /// Take the USB peripheral
    ///
    /// The peripheral is held in reset, and powered down, until the device
    /// initializes it.
    pub fn new<P: Peripherals>(peripherals: P) -> Self {
        // Safety: the addresses are valid for the peripheral's lifetime, and
        // nothing else uses them.
        let (usb, pma) = unsafe {
            (
                &*(peripherals.usb() as *const RegisterBlock),
                &*(peripherals.packet_memory() as *const PacketMemoryBlock),
            )
        };
        write_reg!(crate::ral, usb, CNTR, FRES: 1, PDWN: 1);
        RegisterPort { usb, pma }
    }
}

impl PeripheralPort for RegisterPort {
    fn read(&self, register: Register) -> u16 {
        let value = match register {
            Register::Endpoint(ep) => self.usb.EPR[ep as usize].read(),
            Register::Control => read_reg!(crate::ral, self.usb, CNTR),
            Register::Status => read_reg!(crate::ral, self.usb, ISTR),
            Register::Address => read_reg!(crate::ral, self.usb, DADDR),
            Register::BufferTable => read_reg!(crate::ral, self.usb, BTABLE),
        };
        value as u16
    }

    fn write(&mut self, register: Register, value: u16) {
        let value = value as u32;
        match register {
            Register::Endpoint(ep) => self.usb.EPR[ep as usize].write(value),
            Register::Control => write_reg!(crate::ral, self.usb, CNTR, value),
            Register::Status => write_reg!(crate::ral, self.usb, ISTR, value),
            Register::Address => write_reg!(crate::ral, self.usb, DADDR, value),
            Register::BufferTable => write_reg!(crate::ral, self.usb, BTABLE, value),
        }
    }

    fn read_pma(&self, offset: usize) -> u16 {
        self.pma.WORDS[offset / 2].read() as u16
    }

    fn write_pma(&mut self, offset: usize, value: u16) {
        self.pma.WORDS[offset / 2].write(value as u32);
    }
}
