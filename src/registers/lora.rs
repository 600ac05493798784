//! LoRa page registers
//!
//! This module contains registers that are only meaningful while
//! `OpMode::long_range_mode` is set:
//! - FIFO pointers and packet lengths
//! - Interrupt flags
//! - Modem configuration (bandwidth, coding rate, spreading factor, CRC)
//! - Preamble, sync word and SF6 detection settings
//! - RSSI readings

use core::convert::Infallible;

use bitflags::bitflags;
use regiface::{register, FromByteArray, ReadableRegister, ToByteArray, WritableRegister};

use super::InvalidFieldValue;

/// SPI interface address pointer in FIFO data buffer (address: 0x0D)
#[register(0x0Du8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister)]
pub struct FifoAddrPtr {
    pub addr: u8,
}

/// Write base address in FIFO data buffer for the TX modulator (address: 0x0E)
#[register(0x0Eu8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister)]
pub struct FifoTxBaseAddr {
    /// Default: 0x80
    pub addr: u8,
}

/// Read base address in FIFO data buffer for the RX demodulator (address: 0x0F)
#[register(0x0Fu8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister)]
pub struct FifoRxBaseAddr {
    /// Default: 0x00
    pub addr: u8,
}

/// Start address of the last packet received (address: 0x10)
#[register(0x10u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister)]
pub struct FifoRxCurrentAddr {
    pub addr: u8,
}

bitflags! {
    /// LoRa interrupt sources
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IrqFlags: u8 {
        /// No packet within the single RX window
        const RX_TIMEOUT = 1 << 7;
        /// Packet reception complete
        const RX_DONE = 1 << 6;
        /// Payload CRC check failed
        const PAYLOAD_CRC_ERROR = 1 << 5;
        /// Valid header received in RX
        const VALID_HEADER = 1 << 4;
        /// FIFO payload transmission complete
        const TX_DONE = 1 << 3;
        /// Channel activity detection finished
        const CAD_DONE = 1 << 2;
        /// FHSS change channel
        const FHSS_CHANGE_CHANNEL = 1 << 1;
        /// Valid LoRa signal detected during CAD
        const CAD_DETECTED = 1 << 0;
    }
}

/// Interrupt status (address: 0x12)
///
/// Flags are cleared by writing a 1 to their position, so writing back the
/// value just read clears exactly the events that were observed.
#[register(0x12u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister)]
pub struct IrqStatus {
    pub flags: IrqFlags,
}

/// Number of payload bytes of the last packet received (address: 0x13)
#[register(0x13u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister)]
pub struct RxNbBytes {
    pub count: u8,
}

/// RSSI of the last packet received (address: 0x1A)
#[register(0x1Au8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister)]
pub struct PktRssiValue {
    /// Raw value, `RSSI[dBm] = -164 + value` on the LF port
    pub value: u8,
}

/// Current RSSI (address: 0x1B)
#[register(0x1Bu8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister)]
pub struct RssiValue {
    /// Raw value, `RSSI[dBm] = -164 + value` on the LF port
    pub value: u8,
}

/// Signal bandwidth
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Bandwidth {
    Bw7_8kHz = 0,
    Bw10_4kHz = 1,
    Bw15_6kHz = 2,
    Bw20_8kHz = 3,
    Bw31_25kHz = 4,
    Bw41_7kHz = 5,
    Bw62_5kHz = 6,
    Bw125kHz = 7,
    Bw250kHz = 8,
    Bw500kHz = 9,
}

impl Bandwidth {
    /// Every bandwidth, narrowest first
    pub const ALL: [Bandwidth; 10] = [
        Bandwidth::Bw7_8kHz,
        Bandwidth::Bw10_4kHz,
        Bandwidth::Bw15_6kHz,
        Bandwidth::Bw20_8kHz,
        Bandwidth::Bw31_25kHz,
        Bandwidth::Bw41_7kHz,
        Bandwidth::Bw62_5kHz,
        Bandwidth::Bw125kHz,
        Bandwidth::Bw250kHz,
        Bandwidth::Bw500kHz,
    ];

    /// Nominal bandwidth in Hz
    pub const fn hz(self) -> u32 {
        match self {
            Self::Bw7_8kHz => 7_800,
            Self::Bw10_4kHz => 10_400,
            Self::Bw15_6kHz => 15_600,
            Self::Bw20_8kHz => 20_800,
            Self::Bw31_25kHz => 31_250,
            Self::Bw41_7kHz => 41_700,
            Self::Bw62_5kHz => 62_500,
            Self::Bw125kHz => 125_000,
            Self::Bw250kHz => 250_000,
            Self::Bw500kHz => 500_000,
        }
    }

    /// Widest supported bandwidth not above `hz`.
    ///
    /// Requests below 7.8 kHz select 7.8 kHz.
    pub fn floor_hz(hz: u32) -> Self {
        Self::ALL
            .iter()
            .rev()
            .copied()
            .find(|bw| bw.hz() <= hz)
            .unwrap_or(Self::Bw7_8kHz)
    }

    fn from_bits(bits: u8) -> Result<Self, InvalidFieldValue> {
        Self::ALL
            .get(usize::from(bits))
            .copied()
            .ok_or(InvalidFieldValue(bits))
    }
}

/// Error coding rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CodingRate {
    Cr4_5 = 1,
    Cr4_6 = 2,
    Cr4_7 = 3,
    Cr4_8 = 4,
}

impl CodingRate {
    /// Denominator of the rate, 5 for 4/5 and so on
    pub const fn denominator(self) -> u8 {
        self as u8 + 4
    }

    fn from_bits(bits: u8) -> Result<Self, InvalidFieldValue> {
        match bits {
            1 => Ok(Self::Cr4_5),
            2 => Ok(Self::Cr4_6),
            3 => Ok(Self::Cr4_7),
            4 => Ok(Self::Cr4_8),
            invalid => Err(InvalidFieldValue(invalid)),
        }
    }
}

/// Modem configuration 1 (address: 0x1D)
///
/// Reads fail with [`InvalidFieldValue`] if the bandwidth or coding rate
/// bits hold a reserved encoding.
#[register(0x1Du8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister)]
pub struct ModemConfig1 {
    pub bandwidth: Bandwidth,
    pub coding_rate: CodingRate,
    /// Implicit header mode. Explicit header (false) is required for
    /// variable-length packets
    pub implicit_header: bool,
}

impl Default for ModemConfig1 {
    fn default() -> Self {
        Self {
            bandwidth: Bandwidth::Bw125kHz,
            coding_rate: CodingRate::Cr4_5,
            implicit_header: false,
        }
    }
}

/// Modem configuration 2 (address: 0x1E)
#[register(0x1Eu8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister)]
pub struct ModemConfig2 {
    /// Spreading factor as a base-2 logarithm, 6..=12
    pub spreading_factor: u8,
    /// Send the FIFO content continuously, used for spectral analysis
    pub tx_continuous: bool,
    /// Generate and check the payload CRC
    pub rx_crc_on: bool,
    /// RX timeout MSB, 2 bits
    pub symb_timeout_msb: u8,
}

impl Default for ModemConfig2 {
    fn default() -> Self {
        Self {
            spreading_factor: 7,
            tx_continuous: false,
            rx_crc_on: false,
            symb_timeout_msb: 0,
        }
    }
}

/// RX timeout LSB (address: 0x1F)
///
/// `Timeout = symb_timeout * Ts`, the upper two bits live in [`ModemConfig2`].
#[register(0x1Fu8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister)]
pub struct SymbTimeoutLsb {
    /// Default: 0x64
    pub value: u8,
}

/// Preamble length (address: 0x20, 2 bytes MSB first)
///
/// The modem adds 4.25 symbols to the programmed length.
#[register(0x20u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister)]
pub struct PreambleLength {
    /// Default: 8
    pub length: u16,
}

/// Payload length (address: 0x22)
///
/// Number of FIFO bytes to transmit. Must be non-zero.
#[register(0x22u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister)]
pub struct PayloadLength {
    pub length: u8,
}

/// Modem configuration 3 (address: 0x26)
#[register(0x26u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister, Default)]
pub struct ModemConfig3 {
    /// Mandated when the symbol length exceeds 16 ms
    pub low_data_rate_optimize: bool,
    /// LNA gain set by the internal AGC loop instead of `Lna::gain`
    pub agc_auto_on: bool,
}

/// LoRa detection optimize (address: 0x31)
///
/// Only the low 3 bits are driven by this crate. The upper bits hold
/// undocumented calibration values and are preserved across writes.
#[register(0x31u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister)]
pub struct DetectionOptimize {
    pub raw: u8,
}

impl DetectionOptimize {
    /// Same register with the optimization bits set for `spreading_factor`
    pub const fn for_spreading_factor(self, spreading_factor: u8) -> Self {
        let bits = if spreading_factor == 6 { 0x05 } else { 0x03 };
        Self {
            raw: (self.raw & 0xF8) | bits,
        }
    }
}

/// LoRa detection threshold (address: 0x37)
#[register(0x37u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister)]
pub struct DetectionThreshold {
    pub value: u8,
}

impl DetectionThreshold {
    /// Threshold for `spreading_factor`, 0x0C for SF6 and 0x0A otherwise
    pub const fn for_spreading_factor(spreading_factor: u8) -> Self {
        Self {
            value: if spreading_factor == 6 { 0x0C } else { 0x0A },
        }
    }
}

/// LoRa sync word (address: 0x39)
///
/// 0x34 is reserved for LoRaWAN networks.
#[register(0x39u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister)]
pub struct SyncWord {
    /// Default: 0x12
    pub value: u8,
}

macro_rules! single_byte_register {
    ($($reg:ident { $field:ident }),+ $(,)?) => {
        $(
            impl FromByteArray for $reg {
                type Error = Infallible;
                type Array = [u8; 1];

                fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
                    Ok(Self { $field: bytes[0] })
                }
            }
        )+
    };
}

macro_rules! single_byte_writable {
    ($($reg:ident { $field:ident }),+ $(,)?) => {
        $(
            impl ToByteArray for $reg {
                type Error = Infallible;
                type Array = [u8; 1];

                fn to_bytes(self) -> Result<Self::Array, Self::Error> {
                    Ok([self.$field])
                }
            }
        )+
    };
}

single_byte_register!(
    FifoAddrPtr { addr },
    FifoTxBaseAddr { addr },
    FifoRxBaseAddr { addr },
    FifoRxCurrentAddr { addr },
    RxNbBytes { count },
    PktRssiValue { value },
    RssiValue { value },
    SymbTimeoutLsb { value },
    PayloadLength { length },
    DetectionOptimize { raw },
    DetectionThreshold { value },
    SyncWord { value },
);

single_byte_writable!(
    FifoAddrPtr { addr },
    FifoTxBaseAddr { addr },
    FifoRxBaseAddr { addr },
    SymbTimeoutLsb { value },
    PayloadLength { length },
    DetectionOptimize { raw },
    DetectionThreshold { value },
    SyncWord { value },
);

impl FromByteArray for IrqStatus {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            flags: IrqFlags::from_bits_retain(bytes[0]),
        })
    }
}

impl ToByteArray for IrqStatus {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok([self.flags.bits()])
    }
}

impl FromByteArray for ModemConfig1 {
    type Error = InvalidFieldValue;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            bandwidth: Bandwidth::from_bits(bytes[0] >> 4)?,
            coding_rate: CodingRate::from_bits((bytes[0] >> 1) & 0x07)?,
            implicit_header: bytes[0] & 0x01 != 0,
        })
    }
}

impl ToByteArray for ModemConfig1 {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok([((self.bandwidth as u8) << 4)
            | ((self.coding_rate as u8) << 1)
            | self.implicit_header as u8])
    }
}

impl FromByteArray for ModemConfig2 {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            spreading_factor: bytes[0] >> 4,
            tx_continuous: bytes[0] & 0x08 != 0,
            rx_crc_on: bytes[0] & 0x04 != 0,
            symb_timeout_msb: bytes[0] & 0x03,
        })
    }
}

impl ToByteArray for ModemConfig2 {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok([((self.spreading_factor & 0x0F) << 4)
            | ((self.tx_continuous as u8) << 3)
            | ((self.rx_crc_on as u8) << 2)
            | (self.symb_timeout_msb & 0x03)])
    }
}

impl FromByteArray for PreambleLength {
    type Error = Infallible;
    type Array = [u8; 2];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            length: u16::from_be_bytes(bytes),
        })
    }
}

impl ToByteArray for PreambleLength {
    type Error = Infallible;
    type Array = [u8; 2];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok(self.length.to_be_bytes())
    }
}

impl FromByteArray for ModemConfig3 {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            low_data_rate_optimize: bytes[0] & 0x08 != 0,
            agc_auto_on: bytes[0] & 0x04 != 0,
        })
    }
}

impl ToByteArray for ModemConfig3 {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok([((self.low_data_rate_optimize as u8) << 3) | ((self.agc_auto_on as u8) << 2)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bandwidth_floors_to_supported_value() {
        assert_eq!(Bandwidth::floor_hz(125_000), Bandwidth::Bw125kHz);
        assert_eq!(Bandwidth::floor_hz(200_000), Bandwidth::Bw125kHz);
        assert_eq!(Bandwidth::floor_hz(999_999), Bandwidth::Bw500kHz);
        assert_eq!(Bandwidth::floor_hz(10_000), Bandwidth::Bw7_8kHz);
        assert_eq!(Bandwidth::floor_hz(1), Bandwidth::Bw7_8kHz);
        assert_eq!(Bandwidth::floor_hz(41_700), Bandwidth::Bw41_7kHz);
    }

    #[test]
    fn modem_config1_encoding() {
        let config = ModemConfig1 {
            bandwidth: Bandwidth::Bw125kHz,
            coding_rate: CodingRate::Cr4_7,
            implicit_header: false,
        };
        assert_eq!(config.to_bytes(), Ok([0x76]));
        assert_eq!(ModemConfig1::from_bytes([0x76]), Ok(config));

        // Power-on value
        assert_eq!(ModemConfig1::from_bytes([0x72]), Ok(ModemConfig1::default()));

        assert_eq!(ModemConfig1::from_bytes([0xA2]), Err(InvalidFieldValue(0x0A)));
        assert_eq!(ModemConfig1::from_bytes([0x70]), Err(InvalidFieldValue(0)));
    }

    #[test]
    fn modem_config2_encoding() {
        let config = ModemConfig2 {
            spreading_factor: 7,
            tx_continuous: false,
            rx_crc_on: true,
            symb_timeout_msb: 0x02,
        };
        assert_eq!(config.to_bytes(), Ok([0x76]));
        assert_eq!(ModemConfig2::from_bytes([0x70]), Ok(ModemConfig2::default()));
    }

    #[test]
    fn modem_config3_encoding() {
        let config = ModemConfig3 {
            low_data_rate_optimize: true,
            agc_auto_on: true,
        };
        assert_eq!(config.to_bytes(), Ok([0x0C]));
        assert_eq!(ModemConfig3::from_bytes([0x04]).unwrap(), ModemConfig3 {
            low_data_rate_optimize: false,
            agc_auto_on: true,
        });
    }

    #[test]
    fn detection_settings_follow_spreading_factor() {
        let reset = DetectionOptimize { raw: 0xC3 };
        assert_eq!(reset.for_spreading_factor(6).raw, 0xC5);
        assert_eq!(reset.for_spreading_factor(6).for_spreading_factor(9).raw, 0xC3);
        assert_eq!(DetectionThreshold::for_spreading_factor(6).value, 0x0C);
        assert_eq!(DetectionThreshold::for_spreading_factor(12).value, 0x0A);
    }

    #[test]
    fn irq_status_keeps_unknown_bits() {
        let status = IrqStatus::from_bytes([0x48]).unwrap();
        assert!(status.flags.contains(IrqFlags::RX_DONE | IrqFlags::TX_DONE));
        assert_eq!(status.to_bytes(), Ok([0x48]));
    }

    #[test]
    fn preamble_is_big_endian() {
        assert_eq!(PreambleLength { length: 0x0102 }.to_bytes(), Ok([0x01, 0x02]));
        assert_eq!(PreambleLength::from_bytes([0x00, 0x0A]).unwrap().length, 10);
    }
}
