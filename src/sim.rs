//! A simulated USB peripheral, and a simulated host
//!
//! Registers follow the hardware write semantics: toggle bits flip on 1,
//! rc_w0 flags clear on 0, `SETUP` and `ISTR.CTR` ignore writes. The host
//! side drives transactions the way the serial interface engine would.

use crate::pma::PMA_SIZE;
use crate::register::{Daddr, Epr, Istr, Status, EPR_RC_W0, EPR_RW, EPR_TOGGLE, ISTR_RC_W0};
use crate::{PeripheralPort, Register, MAX_ENDPOINTS};
use std::vec::Vec;

/// The new `EPnR` value after the CPU writes `written`
pub fn hardware_write(current: u16, written: u16) -> u16 {
    let plain = written & EPR_RW;
    let toggled = (current ^ written) & EPR_TOGGLE;
    let flags = current & written & EPR_RC_W0;
    let read_only = current & Epr::SETUP.bits();
    plain | toggled | flags | read_only
}

/// The host's view of a transaction that didn't move data
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handshake {
    Nak,
    Stall,
    /// The endpoint is disabled, so the device doesn't answer
    Timeout,
}

pub struct Sim {
    epr: [u16; MAX_ENDPOINTS],
    cntr: u16,
    istr: u16,
    daddr: u16,
    btable: u16,
    pma: [u8; PMA_SIZE],
    /// Every value written to `DADDR`, in order
    pub address_writes: Vec<u16>,
}

impl Sim {
    pub fn new() -> Self {
        Sim {
            epr: [0; MAX_ENDPOINTS],
            cntr: 0x0003,
            istr: 0,
            daddr: 0,
            btable: 0,
            pma: [0; PMA_SIZE],
            address_writes: Vec::new(),
        }
    }

    pub fn epr(&self, ep: u8) -> u16 {
        self.epr[ep as usize]
    }

    pub fn tx_status(&self, ep: u8) -> Status {
        Status::tx(self.epr(ep))
    }

    pub fn rx_status(&self, ep: u8) -> Status {
        Status::rx(self.epr(ep))
    }

    pub fn daddr(&self) -> u16 {
        self.daddr
    }

    pub fn cntr(&self) -> u16 {
        self.cntr
    }

    fn word(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.pma[offset], self.pma[offset + 1]])
    }

    fn set_word(&mut self, offset: usize, value: u16) {
        self.pma[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Buffer descriptor table field `field` (0, 2, 4 or 6) for `ep`
    pub fn bdt(&self, ep: u8, field: usize) -> u16 {
        self.word(self.btable as usize + ep as usize * 8 + field)
    }

    fn set_status(&mut self, ep: u8, tx: Option<Status>, rx: Option<Status>) {
        let epr = &mut self.epr[ep as usize];
        if let Some(tx) = tx {
            *epr = (*epr & !Epr::STAT_TX.bits()) | ((tx as u16) << 4);
        }
        if let Some(rx) = rx {
            *epr = (*epr & !Epr::STAT_RX.bits()) | ((rx as u16) << 12);
        }
    }

    fn deliver(&mut self, ep: u8, data: &[u8]) {
        let addr = self.bdt(ep, 4) as usize;
        let count_rx = self.bdt(ep, 6);
        let capacity = if count_rx & 0x8000 != 0 {
            (((count_rx >> 10) & 0x1F) as usize + 1) * 32
        } else {
            ((count_rx >> 10) & 0x1F) as usize * 2
        };
        assert!(data.len() <= capacity, "packet larger than the receive buffer");
        self.pma[addr..addr + data.len()].copy_from_slice(data);
        let field = self.btable as usize + ep as usize * 8 + 6;
        self.set_word(field, (count_rx & 0xFC00) | data.len() as u16);
    }

    /// The host signals a bus reset
    pub fn bus_reset(&mut self) {
        self.epr = [0; MAX_ENDPOINTS];
        self.daddr = 0;
        self.istr |= Istr::RESET.bits();
    }

    /// The host sends a SETUP packet to endpoint 0
    ///
    /// The hardware accepts SETUP regardless of the receive status.
    pub fn setup(&mut self, packet: &[u8]) {
        self.deliver(0, packet);
        let epr = &mut self.epr[0];
        *epr |= Epr::CTR_RX.bits() | Epr::SETUP.bits();
        // The data and status stages both start with DATA1
        *epr |= Epr::DTOG_TX.bits() | Epr::DTOG_RX.bits();
        self.set_status(0, Some(Status::Nak), Some(Status::Nak));
    }

    /// The host sends an OUT packet
    pub fn out(&mut self, ep: u8, data: &[u8]) -> Result<(), Handshake> {
        match self.rx_status(ep) {
            Status::Valid => {
                self.deliver(ep, data);
                let epr = &mut self.epr[ep as usize];
                *epr |= Epr::CTR_RX.bits();
                *epr &= !Epr::SETUP.bits();
                *epr ^= Epr::DTOG_RX.bits();
                self.set_status(ep, None, Some(Status::Nak));
                Ok(())
            }
            Status::Nak => Err(Handshake::Nak),
            Status::Stall => Err(Handshake::Stall),
            Status::Disabled => Err(Handshake::Timeout),
        }
    }

    /// The host requests an IN packet
    pub fn in_packet(&mut self, ep: u8) -> Result<Vec<u8>, Handshake> {
        match self.tx_status(ep) {
            Status::Valid => {
                let addr = self.bdt(ep, 0) as usize;
                let count = (self.bdt(ep, 2) & 0x3FF) as usize;
                let data = self.pma[addr..addr + count].to_vec();
                let epr = &mut self.epr[ep as usize];
                *epr |= Epr::CTR_TX.bits();
                *epr ^= Epr::DTOG_TX.bits();
                self.set_status(ep, Some(Status::Nak), None);
                Ok(data)
            }
            Status::Nak => Err(Handshake::Nak),
            Status::Stall => Err(Handshake::Stall),
            Status::Disabled => Err(Handshake::Timeout),
        }
    }
}

impl PeripheralPort for Sim {
    fn read(&self, register: Register) -> u16 {
        match register {
            Register::Endpoint(ep) => self.epr[ep as usize],
            Register::Control => self.cntr,
            Register::Status => {
                let pending = self
                    .epr
                    .iter()
                    .position(|epr| epr & EPR_RC_W0 != 0)
                    .map(|ep| {
                        let dir = if self.epr[ep] & Epr::CTR_RX.bits() != 0 {
                            Istr::DIR.bits()
                        } else {
                            0
                        };
                        Istr::CTR.bits() | dir | ep as u16
                    })
                    .unwrap_or(0);
                self.istr | pending
            }
            Register::Address => self.daddr,
            Register::BufferTable => self.btable,
        }
    }

    fn write(&mut self, register: Register, value: u16) {
        match register {
            Register::Endpoint(ep) => {
                let epr = &mut self.epr[ep as usize];
                *epr = hardware_write(*epr, value);
            }
            Register::Control => self.cntr = value,
            Register::Status => self.istr &= value | !ISTR_RC_W0,
            Register::Address => {
                self.daddr = value & (Daddr::ADD | Daddr::EF).bits();
                self.address_writes.push(value);
            }
            Register::BufferTable => self.btable = value & 0xFFF8,
        }
    }

    fn read_pma(&self, offset: usize) -> u16 {
        assert_eq!(offset % 2, 0, "unaligned packet memory access");
        self.word(offset)
    }

    fn write_pma(&mut self, offset: usize, value: u16) {
        assert_eq!(offset % 2, 0, "unaligned packet memory access");
        self.set_word(offset, value);
    }
}
