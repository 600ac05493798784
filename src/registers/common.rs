//! Registers shared by the FSK/OOK and LoRa pages
//!
//! This module contains registers for:
//! - Operating mode and modem selection
//! - RF carrier frequency
//! - Power amplifier, over-current protection and LNA
//! - DIO pin mapping
//! - Silicon version

use core::convert::Infallible;

use regiface::{register, FromByteArray, ReadableRegister, ToByteArray, WritableRegister};

/// Crystal oscillator frequency of the RA-02 module in kHz
pub const FXOSC_KHZ: u64 = 32_000;

/// Silicon revision reported by every SX1278 in [`Version`]
pub const SX1278_VERSION: u8 = 0x12;

/// Transceiver operating modes (RegOpMode bits 2-0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Lowest power, FIFO not accessible. Only mode in which LoRa can be toggled
    Sleep = 0,
    /// Crystal oscillator running, ready for configuration
    Standby = 1,
    /// Frequency synthesis for TX
    FsTx = 2,
    /// Transmit the FIFO content, then return to Standby
    Tx = 3,
    /// Frequency synthesis for RX
    FsRx = 4,
    /// Receive until told otherwise
    RxContinuous = 5,
    /// Receive one packet or time out, then return to Standby
    RxSingle = 6,
    /// Channel activity detection
    Cad = 7,
}

impl Mode {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => Self::Sleep,
            1 => Self::Standby,
            2 => Self::FsTx,
            3 => Self::Tx,
            4 => Self::FsRx,
            5 => Self::RxContinuous,
            6 => Self::RxSingle,
            _ => Self::Cad,
        }
    }
}

/// Operating mode register (address: 0x01)
///
/// # Important Notes
/// - `long_range_mode` can only be changed while in [`Mode::Sleep`]
/// - Writing [`Mode::Tx`] starts a transmission of `PayloadLength` bytes
///   from the FIFO, the chip falls back to Standby once TxDone is raised
#[register(0x01u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister)]
pub struct OpMode {
    /// LoRa modem when set, FSK/OOK otherwise
    pub long_range_mode: bool,
    /// Access to the LF test registers
    pub low_frequency_mode: bool,
    /// Transceiver mode
    pub mode: Mode,
}

impl OpMode {
    /// LoRa modem in the given mode
    pub const fn lora(mode: Mode) -> Self {
        Self {
            long_range_mode: true,
            low_frequency_mode: false,
            mode,
        }
    }

    /// FSK/OOK modem in the given mode
    pub const fn fsk(mode: Mode) -> Self {
        Self {
            long_range_mode: false,
            low_frequency_mode: false,
            mode,
        }
    }
}

/// RF carrier frequency (address: 0x06, 3 bytes MSB first)
///
/// `Frf = F_rf * 2^19 / F_xosc`. The new frequency only takes effect once
/// the LSB (0x08) has been written, so the register is always written as a burst.
#[register(0x06u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister)]
pub struct Frequency {
    /// 24-bit Frf value
    pub frf: u32,
}

impl Frequency {
    /// Builds the register value for a carrier in kHz
    pub const fn from_khz(khz: u32) -> Self {
        Self {
            frf: (((khz as u64) << 19) / FXOSC_KHZ) as u32,
        }
    }

    /// Carrier frequency in kHz (rounded down)
    pub const fn khz(&self) -> u32 {
        (((self.frf as u64) * FXOSC_KHZ) >> 19) as u32
    }
}

/// PA selection and output power control (address: 0x09)
///
/// # Power formulas
/// - PA_BOOST: `Pout = 17 - (15 - output_power)` dBm
/// - RFO: `Pout = Pmax - (15 - output_power)` with `Pmax = 10.8 + 0.6 * max_power`
///
/// The RA-02 only routes PA_BOOST to its antenna pin.
#[register(0x09u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister)]
pub struct PaConfig {
    /// Use the PA_BOOST pin instead of RFO
    pub pa_boost: bool,
    /// Pmax selection for RFO, 3 bits
    pub max_power: u8,
    /// Output power, 4 bits
    pub output_power: u8,
}

impl PaConfig {
    /// Output power in dB according to the datasheet formulas
    pub fn output_db(&self) -> u8 {
        if self.pa_boost {
            2 + self.output_power
        } else {
            let pmax_tenths = 108 + 6 * u16::from(self.max_power);
            let pout_tenths = pmax_tenths.saturating_sub(10 * (15 - u16::from(self.output_power)));
            (pout_tenths / 10) as u8
        }
    }
}

impl Default for PaConfig {
    fn default() -> Self {
        Self {
            pa_boost: false,
            max_power: 0x04,
            output_power: 0x0F,
        }
    }
}

/// Over-current protection (address: 0x0B)
///
/// `Imax = 45 + 5 * trim` mA for trim <= 15, `Imax = -30 + 10 * trim` mA for
/// trim in 16..=27, 240 mA above.
#[register(0x0Bu8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister)]
pub struct Ocp {
    /// Enable the current limiter
    pub enabled: bool,
    /// Trimming of Imax, 5 bits
    pub trim: u8,
}

impl Ocp {
    /// Enabled limiter closest to (not above) `milliamps`, clamped to 45..=240 mA
    pub fn from_milliamps(milliamps: u8) -> Self {
        let milliamps = milliamps.clamp(45, 240);
        let trim = if milliamps <= 120 {
            (milliamps - 45) / 5
        } else {
            ((u16::from(milliamps) + 30) / 10) as u8
        };
        Self {
            enabled: true,
            trim,
        }
    }

    /// Current limit in mA
    pub fn milliamps(&self) -> u8 {
        match self.trim {
            0..=15 => 45 + 5 * self.trim,
            16..=27 => (10 * u16::from(self.trim) - 30) as u8,
            _ => 240,
        }
    }
}

/// LNA settings (address: 0x0C)
#[register(0x0Cu8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister)]
pub struct Lna {
    /// LNA gain, 3 bits. 1 = G1 (maximum gain) ... 6 = G6 (minimum gain)
    pub gain: u8,
    /// High frequency boost, 2 bits. 0b11 = boost on (150% LNA current)
    pub boost_hf: u8,
}

impl Lna {
    /// Maximum gain with the HF boost enabled
    pub const MAX_GAIN_BOOSTED: Self = Self {
        gain: 1,
        boost_hf: 0b11,
    };
}

/// Signal routed to DIO0 in LoRa mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dio0 {
    /// RxDone
    RxDone = 0,
    /// TxDone
    TxDone = 1,
    /// CadDone
    CadDone = 2,
    /// Unused mapping
    None = 3,
}

impl Dio0 {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::RxDone,
            1 => Self::TxDone,
            2 => Self::CadDone,
            _ => Self::None,
        }
    }
}

/// DIO0 to DIO3 mapping (address: 0x40)
///
/// The driver polls `IrqStatus` instead of watching the pins, but keeps DIO0
/// mapped to the event it waits for so a wired interrupt line stays meaningful.
#[register(0x40u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister)]
pub struct DioMapping1 {
    /// DIO0 mapping
    pub dio0: Dio0,
    /// DIO1 to DIO3 mappings, 2 bits each, DIO1 in the upper bits
    pub others: u8,
}

impl DioMapping1 {
    /// DIO0 mapped to `dio0`, other pins at their reset mapping
    pub const fn dio0(dio0: Dio0) -> Self {
        Self { dio0, others: 0 }
    }
}

/// Silicon version (address: 0x42)
///
/// Read-only. An SX1278 reports [`SX1278_VERSION`]; a floating or disconnected
/// bus typically reads back 0x00 or 0xFF.
#[register(0x42u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister)]
pub struct Version {
    /// Full revision number in the upper nibble, metal mask revision in the lower
    pub value: u8,
}

/// High power settings of the PA_BOOST pin (address: 0x4D)
///
/// # Important Notes
/// - Enabling +20 dBm requires `high_power` together with `PaConfig::output_power = 15`
/// - Over-current protection should be raised accordingly
#[register(0x4Du8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ReadableRegister, WritableRegister, Default)]
pub struct PaDac {
    /// +20 dBm on PA_BOOST when set, default 17 dBm maximum otherwise
    pub high_power: bool,
}

impl FromByteArray for OpMode {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            long_range_mode: bytes[0] & 0x80 != 0,
            low_frequency_mode: bytes[0] & 0x08 != 0,
            mode: Mode::from_bits(bytes[0]),
        })
    }
}

impl ToByteArray for OpMode {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok([((self.long_range_mode as u8) << 7)
            | ((self.low_frequency_mode as u8) << 3)
            | self.mode as u8])
    }
}

impl FromByteArray for Frequency {
    type Error = Infallible;
    type Array = [u8; 3];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            frf: u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]),
        })
    }
}

impl ToByteArray for Frequency {
    type Error = Infallible;
    type Array = [u8; 3];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        let [_, msb, mid, lsb] = self.frf.to_be_bytes();
        Ok([msb, mid, lsb])
    }
}

impl FromByteArray for PaConfig {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            pa_boost: bytes[0] & 0x80 != 0,
            max_power: (bytes[0] >> 4) & 0x07,
            output_power: bytes[0] & 0x0F,
        })
    }
}

impl ToByteArray for PaConfig {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok([((self.pa_boost as u8) << 7)
            | ((self.max_power & 0x07) << 4)
            | (self.output_power & 0x0F)])
    }
}

impl FromByteArray for Ocp {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            enabled: bytes[0] & 0x20 != 0,
            trim: bytes[0] & 0x1F,
        })
    }
}

impl ToByteArray for Ocp {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok([((self.enabled as u8) << 5) | (self.trim & 0x1F)])
    }
}

impl FromByteArray for Lna {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            gain: bytes[0] >> 5,
            boost_hf: bytes[0] & 0x03,
        })
    }
}

impl ToByteArray for Lna {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok([((self.gain & 0x07) << 5) | (self.boost_hf & 0x03)])
    }
}

impl FromByteArray for DioMapping1 {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            dio0: Dio0::from_bits(bytes[0] >> 6),
            others: bytes[0] & 0x3F,
        })
    }
}

impl ToByteArray for DioMapping1 {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok([((self.dio0 as u8) << 6) | (self.others & 0x3F)])
    }
}

impl FromByteArray for Version {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self { value: bytes[0] })
    }
}

impl FromByteArray for PaDac {
    type Error = Infallible;
    type Array = [u8; 1];

    fn from_bytes(bytes: Self::Array) -> Result<Self, Self::Error> {
        Ok(Self {
            high_power: bytes[0] & 0x07 == 0x07,
        })
    }
}

impl ToByteArray for PaDac {
    type Error = Infallible;
    type Array = [u8; 1];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok([if self.high_power { 0x87 } else { 0x84 }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_mode_encoding() {
        assert_eq!(OpMode::lora(Mode::Sleep).to_bytes(), Ok([0x80]));
        assert_eq!(OpMode::lora(Mode::Standby).to_bytes(), Ok([0x81]));
        assert_eq!(OpMode::lora(Mode::Tx).to_bytes(), Ok([0x83]));
        assert_eq!(OpMode::lora(Mode::RxContinuous).to_bytes(), Ok([0x85]));
        assert_eq!(OpMode::fsk(Mode::Sleep).to_bytes(), Ok([0x00]));

        // Power-on value
        let reset = OpMode::from_bytes([0x09]).unwrap();
        assert!(!reset.long_range_mode);
        assert!(reset.low_frequency_mode);
        assert_eq!(reset.mode, Mode::Standby);
    }

    #[test]
    fn frequency_conversion() {
        let freq = Frequency::from_khz(433_000);
        assert_eq!(freq.frf, 0x6C_40_00);
        assert_eq!(freq.to_bytes(), Ok([0x6C, 0x40, 0x00]));
        assert_eq!(freq.khz(), 433_000);

        // Power-on value, 434 MHz
        assert_eq!(Frequency::from_bytes([0x6C, 0x80, 0x00]).unwrap().khz(), 434_000);
    }

    #[test]
    fn pa_config_encoding() {
        let pa = PaConfig::from_bytes([0xFC]).unwrap();
        assert!(pa.pa_boost);
        assert_eq!(pa.max_power, 7);
        assert_eq!(pa.output_power, 12);
        assert_eq!(pa.to_bytes(), Ok([0xFC]));
        assert_eq!(pa.output_db(), 14);

        let rfo = PaConfig::default();
        assert_eq!(rfo.to_bytes(), Ok([0x4F]));
        assert_eq!(rfo.output_db(), 13);
    }

    #[test]
    fn ocp_trimming() {
        assert_eq!(Ocp::from_milliamps(100).trim, 11);
        assert_eq!(Ocp::from_milliamps(100).milliamps(), 100);
        assert_eq!(Ocp::from_milliamps(120).trim, 15);
        assert_eq!(Ocp::from_milliamps(150).trim, 18);
        assert_eq!(Ocp::from_milliamps(150).milliamps(), 150);
        assert_eq!(Ocp::from_milliamps(10).milliamps(), 45);
        assert_eq!(Ocp::from_milliamps(255).milliamps(), 240);
        assert_eq!(Ocp::from_milliamps(120).to_bytes(), Ok([0x2F]));
    }

    #[test]
    fn lna_and_dio_encoding() {
        assert_eq!(Lna::MAX_GAIN_BOOSTED.to_bytes(), Ok([0x23]));
        assert_eq!(DioMapping1::dio0(Dio0::TxDone).to_bytes(), Ok([0x40]));
        assert_eq!(DioMapping1::dio0(Dio0::RxDone).to_bytes(), Ok([0x00]));
        assert_eq!(DioMapping1::from_bytes([0x40]).unwrap().dio0, Dio0::TxDone);
    }

    #[test]
    fn pa_dac_encoding() {
        assert_eq!(PaDac { high_power: true }.to_bytes(), Ok([0x87]));
        assert_eq!(PaDac::default().to_bytes(), Ok([0x84]));
        assert!(!PaDac::from_bytes([0x84]).unwrap().high_power);
    }
}
