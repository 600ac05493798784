//! Register definitions for the SX1276/77/78 (RA-02 uses the SX1278)
//! Generated from the SX1276/77/78/79 datasheet, rev. 7
//!
//! Register addresses are 7 bits wide. On the bus the most significant bit of
//! the address byte selects the direction: set for a write, clear for a read.
//! Consecutive data bytes auto-increment the address, except for the FIFO
//! (address 0x00) which is accessed through [`FifoAddrPtr`].

mod common;
mod lora;

pub use common::*;
pub use lora::*;

/// FIFO read/write access (address: 0x00)
pub const REG_FIFO: u8 = 0x00;

/// Error returned when a register holds a value outside a field's encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidFieldValue(pub u8);
