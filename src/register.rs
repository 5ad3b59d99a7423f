//! Register bit definitions, and the register update primitive
//!
//! The endpoint registers (`EPnR`) mix three kinds of bits behind one
//! address:
//!
//! - plain read / write bits, like the endpoint address and type,
//! - *toggle* bits, like `STAT_TX` and `DTOG_RX`, that flip when written
//!   with 1 and hold when written with 0,
//! - *rc_w0* flags, like `CTR_RX`, that clear when written with 0 and hold
//!   when written with 1.
//!
//! Writing back the value you just read is therefore wrong twice over: it
//! flips every toggle bit that's currently set, and it keeps the flags you
//! might have wanted to clear. [`apply_update()`] computes the value to write,
//! and [`EndpointUpdate`] builds the masks for it. Nothing else in the crate
//! computes an `EPnR` write value.
//!
//! `ISTR` flags are rc_w0 as well; [`istr_clear()`] uses the same primitive.

use bitflags::bitflags;

/// Compute the value to write into a register
///
/// - bits in `preserve_mask` are written as they read in `current`,
/// - bits in `toggle_mask` are written as 1,
/// - bits in `literal_set_mask` are written as 1,
/// - every other bit is written as 0.
///
/// For a toggle bit, a written 1 flips the bit and a written 0 leaves it
/// alone. For an rc_w0 flag, a written 0 clears the flag and a written 1
/// leaves it alone, so flags you want to keep belong in `literal_set_mask`.
/// This function performs no I/O; the caller writes the result.
pub const fn apply_update(
    current: u16,
    preserve_mask: u16,
    toggle_mask: u16,
    literal_set_mask: u16,
) -> u16 {
    (current & preserve_mask) | toggle_mask | literal_set_mask
}

/// Returns the toggle mask that moves `field` from its value in `current`
/// to its value in `desired`
pub const fn toggle_to(current: u16, field: u16, desired: u16) -> u16 {
    (current ^ desired) & field
}

bitflags! {
    /// Endpoint register (`EPnR`) fields
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Epr: u16 {
        /// Endpoint address
        const EA = 0x000F;
        /// Transmit status
        const STAT_TX = 0x0030;
        /// Transmit data toggle
        const DTOG_TX = 0x0040;
        /// Transmit complete
        const CTR_TX = 0x0080;
        /// Endpoint kind
        const EP_KIND = 0x0100;
        /// Endpoint type
        const EP_TYPE = 0x0600;
        /// Last receive was a SETUP
        const SETUP = 0x0800;
        /// Receive status
        const STAT_RX = 0x3000;
        /// Receive data toggle
        const DTOG_RX = 0x4000;
        /// Receive complete
        const CTR_RX = 0x8000;
    }
}

/// `EPnR` bits that hold their value only when written back as read
pub const EPR_RW: u16 = Epr::EA.bits() | Epr::EP_KIND.bits() | Epr::EP_TYPE.bits();
/// `EPnR` bits that flip when written with 1
pub const EPR_TOGGLE: u16 =
    Epr::STAT_TX.bits() | Epr::DTOG_TX.bits() | Epr::STAT_RX.bits() | Epr::DTOG_RX.bits();
/// `EPnR` flags that clear when written with 0
pub const EPR_RC_W0: u16 = Epr::CTR_RX.bits() | Epr::CTR_TX.bits();

const STAT_TX_OFFSET: u16 = 4;
const STAT_RX_OFFSET: u16 = 12;
const EP_TYPE_OFFSET: u16 = 9;

bitflags! {
    /// Interrupt status register (`ISTR`)
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Istr: u16 {
        /// Endpoint of the highest priority transfer completion
        const EP_ID = 0x000F;
        /// Direction of that completion; set for OUT and SETUP
        const DIR = 0x0010;
        const ESOF = 0x0100;
        const SOF = 0x0200;
        const RESET = 0x0400;
        const SUSP = 0x0800;
        const WKUP = 0x1000;
        const ERR = 0x2000;
        const PMAOVR = 0x4000;
        /// Some endpoint has a transfer completion; read-only
        const CTR = 0x8000;
    }
}

/// `ISTR` flags that clear when written with 0
pub const ISTR_RC_W0: u16 = Istr::ESOF.bits()
    | Istr::SOF.bits()
    | Istr::RESET.bits()
    | Istr::SUSP.bits()
    | Istr::WKUP.bits()
    | Istr::ERR.bits()
    | Istr::PMAOVR.bits();

/// Returns the `ISTR` value that clears `flags`, and no other flag
pub const fn istr_clear(flags: Istr) -> u16 {
    apply_update(0, 0, 0, ISTR_RC_W0 & !flags.bits())
}

bitflags! {
    /// Control register (`CNTR`)
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Cntr: u16 {
        /// Force USB reset
        const FRES = 0x0001;
        /// Power down the transceiver
        const PDWN = 0x0002;
        const LP_MODE = 0x0004;
        const FSUSP = 0x0008;
        const RESUME = 0x0010;
        const ESOFM = 0x0100;
        const SOFM = 0x0200;
        const RESETM = 0x0400;
        const SUSPM = 0x0800;
        const WKUPM = 0x1000;
        const ERRM = 0x2000;
        const PMAOVRM = 0x4000;
        const CTRM = 0x8000;
    }
}

bitflags! {
    /// Device address register (`DADDR`)
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Daddr: u16 {
        /// Device address
        const ADD = 0x007F;
        /// Enable function
        const EF = 0x0080;
    }
}

/// Endpoint transmit or receive status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Status {
    /// All requests are ignored
    Disabled = 0b00,
    /// All requests are answered with STALL
    Stall = 0b01,
    /// All requests are answered with NAK
    Nak = 0b10,
    /// The endpoint is armed for one packet
    Valid = 0b11,
}

impl Status {
    const fn from_bits(bits: u16) -> Self {
        match bits & 0b11 {
            0b00 => Status::Disabled,
            0b01 => Status::Stall,
            0b10 => Status::Nak,
            _ => Status::Valid,
        }
    }
    /// Returns the transmit status held in an `EPnR` value
    pub const fn tx(epr: u16) -> Self {
        Self::from_bits(epr >> STAT_TX_OFFSET)
    }
    /// Returns the receive status held in an `EPnR` value
    pub const fn rx(epr: u16) -> Self {
        Self::from_bits(epr >> STAT_RX_OFFSET)
    }
}

/// A pending change to an endpoint register
///
/// Collect the fields you want to change, then compute the value to write
/// from the register's current value with [`value()`](EndpointUpdate::value).
/// Fields you don't mention are left as they are.
///
/// ```
/// use stm32fs_usbd::register::{EndpointUpdate, Epr, Status};
///
/// // Endpoint 1 is NAKing both directions, and has a completed receive.
/// let current = 0x8000 | 0x2000 | 0x0020 | 0x0001;
/// let update = EndpointUpdate::new().stat_rx(Status::Valid).clear_ctr_rx();
///
/// // Flip STAT_RX to VALID, keep CTR_TX by writing 1, leave STAT_TX alone.
/// assert_eq!(update.value(current), 0x1000 | 0x0080 | 0x0001);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndpointUpdate {
    /// Toggle fields to drive to `target`
    fields: u16,
    target: u16,
    /// rc_w0 flags to clear
    clear: u16,
    /// Plain fields to replace with `literal`
    replace: u16,
    literal: u16,
}

impl Default for EndpointUpdate {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointUpdate {
    /// An update that changes nothing
    pub const fn new() -> Self {
        EndpointUpdate {
            fields: 0,
            target: 0,
            clear: 0,
            replace: 0,
            literal: 0,
        }
    }

    const fn drive(mut self, field: u16, value: u16) -> Self {
        self.fields |= field;
        self.target = (self.target & !field) | (value & field);
        self
    }

    /// Set the transmit status
    pub const fn stat_tx(self, status: Status) -> Self {
        self.drive(Epr::STAT_TX.bits(), (status as u16) << STAT_TX_OFFSET)
    }

    /// Set the receive status
    pub const fn stat_rx(self, status: Status) -> Self {
        self.drive(Epr::STAT_RX.bits(), (status as u16) << STAT_RX_OFFSET)
    }

    /// Set the transmit data toggle
    pub const fn dtog_tx(self, set: bool) -> Self {
        self.drive(Epr::DTOG_TX.bits(), if set { 0xFFFF } else { 0 })
    }

    /// Set the receive data toggle
    pub const fn dtog_rx(self, set: bool) -> Self {
        self.drive(Epr::DTOG_RX.bits(), if set { 0xFFFF } else { 0 })
    }

    /// Clear the transmit complete flag
    pub const fn clear_ctr_tx(mut self) -> Self {
        self.clear |= Epr::CTR_TX.bits();
        self
    }

    /// Clear the receive complete flag
    pub const fn clear_ctr_rx(mut self) -> Self {
        self.clear |= Epr::CTR_RX.bits();
        self
    }

    /// Replace the endpoint address and type, and clear the endpoint kind
    ///
    /// `ep_type` is the two-bit `EP_TYPE` encoding.
    pub const fn configure(mut self, address: u8, ep_type: u16) -> Self {
        self.replace = EPR_RW;
        self.literal = (address as u16 & Epr::EA.bits())
            | ((ep_type << EP_TYPE_OFFSET) & Epr::EP_TYPE.bits());
        self
    }

    /// Compute the value to write, given the register's `current` value
    pub const fn value(&self, current: u16) -> u16 {
        apply_update(
            current,
            EPR_RW & !self.replace,
            toggle_to(current, self.fields, self.target),
            (EPR_RC_W0 & !self.clear) | (self.literal & self.replace),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::hardware_write;

    const STATUSES: [Status; 4] = [Status::Disabled, Status::Stall, Status::Nak, Status::Valid];

    #[test]
    fn apply_update_truth_table() {
        // One bit of each mask, for each value of the current bit
        for current in [0u16, 1] {
            for preserve in [0u16, 1] {
                for toggle in [0u16, 1] {
                    for set in [0u16, 1] {
                        let expected = (current & preserve) | toggle | set;
                        assert_eq!(apply_update(current, preserve, toggle, set), expected);
                    }
                }
            }
        }
    }

    #[test]
    fn naive_write_back_corrupts() {
        // Valid RX, NAK TX, RX complete pending
        let current = 0x8000 | 0x3000 | 0x0020;
        let after = hardware_write(current, current);
        // STAT_RX flipped to DISABLED, STAT_TX flipped to DISABLED
        assert_eq!(Status::rx(after), Status::Disabled);
        assert_eq!(Status::tx(after), Status::Disabled);
    }

    #[test]
    fn status_fields_every_register_value() {
        for current in 0..=u16::MAX {
            for tx in STATUSES {
                for rx in STATUSES {
                    let update = EndpointUpdate::new().stat_tx(tx).stat_rx(rx);
                    let after = hardware_write(current, update.value(current));
                    assert_eq!(Status::tx(after), tx);
                    assert_eq!(Status::rx(after), rx);
                    // Nothing else moves
                    let others = !(Epr::STAT_TX.bits() | Epr::STAT_RX.bits());
                    assert_eq!(after & others, current & others, "{current:#06x}");
                }
            }
        }
    }

    #[test]
    fn flags_and_toggles_every_register_value() {
        for current in 0..=u16::MAX {
            let update = EndpointUpdate::new().clear_ctr_rx();
            let after = hardware_write(current, update.value(current));
            assert_eq!(after & Epr::CTR_RX.bits(), 0);
            assert_eq!(after | Epr::CTR_RX.bits(), current | Epr::CTR_RX.bits());

            let update = EndpointUpdate::new().clear_ctr_tx();
            let after = hardware_write(current, update.value(current));
            assert_eq!(after & Epr::CTR_TX.bits(), 0);
            assert_eq!(after | Epr::CTR_TX.bits(), current | Epr::CTR_TX.bits());

            for (tx, rx) in [(false, false), (false, true), (true, false), (true, true)] {
                let update = EndpointUpdate::new().dtog_tx(tx).dtog_rx(rx);
                let after = hardware_write(current, update.value(current));
                assert_eq!(after & Epr::DTOG_TX.bits() != 0, tx);
                assert_eq!(after & Epr::DTOG_RX.bits() != 0, rx);
                let others = !(Epr::DTOG_TX.bits() | Epr::DTOG_RX.bits());
                assert_eq!(after & others, current & others);
            }
        }
    }

    #[test]
    fn empty_update_is_identity() {
        for current in 0..=u16::MAX {
            let after = hardware_write(current, EndpointUpdate::new().value(current));
            assert_eq!(after, current);
        }
    }

    #[test]
    fn configure_replaces_plain_fields() {
        for current in 0..=u16::MAX {
            let update = EndpointUpdate::new().configure(3, 0b11);
            let after = hardware_write(current, update.value(current));
            assert_eq!(after & EPR_RW, 0x0003 | 0x0600);
            assert_eq!(after & !EPR_RW, current & !EPR_RW);
        }
    }

    #[test]
    fn istr_clear_only_named_flags() {
        let write = istr_clear(Istr::RESET);
        assert_eq!(write & Istr::RESET.bits(), 0);
        assert_eq!(write & ISTR_RC_W0, ISTR_RC_W0 & !Istr::RESET.bits());

        let write = istr_clear(Istr::SOF | Istr::ERR);
        assert_eq!(write & (Istr::SOF | Istr::ERR).bits(), 0);
        assert_ne!(write & Istr::RESET.bits(), 0);
    }
}
