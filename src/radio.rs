//! RA-02 LoRa driver
//!
//! [`Ra02`] sequences an SX1278 through configuration, transmit and
//! timeout-bounded receive on top of the register interface in [`crate::device`].
//!
//! The chip walks through these modes:
//!
//! ```text
//! init -> Standby -> { Sleep, Tx, RxContinuous } -> Standby
//! ```
//!
//! Every setter is write-through: the chip registers are the only source of
//! truth, read-modify-write is used for registers that pack several settings.
//! Arguments are validated before any bus traffic and transport errors are
//! returned unchanged. After a failure the chip is left in an unspecified mode
//! and [`Ra02::reset`] is the recovery path.

use core::ops::RangeInclusive;

use embedded_hal::delay::DelayNs;
use embedded_hal::spi::SpiDevice;
use regiface::{ReadableRegister, WritableRegister};

use crate::device::Device;
use crate::registers::*;
use crate::timeout::Timeout;
use crate::Error;

/// Largest payload `send` accepts and `recv` returns.
pub const MAX_PAYLOAD: usize = 64;

/// Received packet, exactly as long as what was transmitted.
pub type Payload = heapless::Vec<u8, MAX_PAYLOAD>;

/// Carrier frequencies the SX1278 synthesizer can lock on, in kHz.
pub const FREQUENCY_RANGE_KHZ: RangeInclusive<u32> = 137_000..=525_000;

/// Highest output power on PA_BOOST, in dB.
pub const MAX_POWER_DB: u8 = 20;

/// Accepted bandwidth requests in Hz, floored to the nearest supported value.
pub const BANDWIDTH_RANGE_HZ: RangeInclusive<u32> = 1..=999_999;

/// Accepted preamble lengths.
pub const PREAMBLE_RANGE: RangeInclusive<u32> = 6..=65_535;

/// Spreading factors supported by the modem.
pub const SPREADING_FACTOR_RANGE: RangeInclusive<u8> = 6..=12;

/// Spreading factors that demodulate with an explicit header, SF6 needs an implicit one.
const EXPLICIT_HEADER_SF_RANGE: RangeInclusive<u8> = 7..=12;

/// RX symbol timeout programmed at init, in symbols.
const RX_SYMBOL_TIMEOUT: u16 = 0x2FF;

/// Symbol duration above which low data rate optimization is mandated.
const LDRO_SYMBOL_US: u64 = 16_000;

/// Settle times after synthesizer and PA changes.
const FREQUENCY_SETTLE_MS: u32 = 5;
const POWER_SETTLE_MS: u32 = 10;

/// Supported output levels on PA_BOOST, as `(upper requested dB, OutputPower, reported dB)`.
const POWER_TABLE: [(u8, u8, u8); 4] = [(13, 6, 11), (16, 9, 14), (19, 12, 17), (20, 15, 20)];

/// Operating parameters applied by [`Ra02::init_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RadioConfig {
    /// Carrier frequency in kHz
    pub frequency_khz: u32,
    /// Output power in dB
    pub power_db: u8,
    /// Requested bandwidth in Hz
    pub bandwidth_hz: u32,
    /// Preamble length in symbols
    pub preamble: u16,
    /// Spreading factor, 6 to 12
    pub spreading_factor: u8,
    /// Forward error correction rate
    pub coding_rate: CodingRate,
    /// Payload CRC generation and check
    pub crc: bool,
    /// LoRa sync word, 0x12 for private networks
    pub sync_word: u8,
    /// Over-current protection limit in mA
    pub ocp_ma: u8,
    /// Target bit rate, overrides `spreading_factor` when set
    pub baudrate: Option<u32>,
    /// Bound on the wait for TxDone, `0` waits forever
    pub send_timeout_ms: u64,
    /// Pause between two IRQ polls
    pub poll_interval_us: u32,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            frequency_khz: 433_000,
            power_db: 17,
            bandwidth_hz: 125_000,
            preamble: 10,
            spreading_factor: 7,
            coding_rate: CodingRate::Cr4_7,
            crc: true,
            sync_word: 0x12,
            ocp_ma: 120,
            baudrate: None,
            send_timeout_ms: 500,
            poll_interval_us: 1_000,
        }
    }
}

impl RadioConfig {
    /// Checks every parameter against the ranges the setters accept.
    pub fn validate(&self) -> Result<(), Error> {
        check_frequency(self.frequency_khz)?;
        check_power(self.power_db)?;
        check_bandwidth(self.bandwidth_hz)?;
        check_preamble(self.preamble.into())?;
        check_spreading_factor(self.spreading_factor)?;
        if let Some(bps) = self.baudrate {
            let bandwidth = Bandwidth::floor_hz(self.bandwidth_hz);
            spreading_factor_for(bps, bandwidth, self.coding_rate).ok_or(Error::Invalid)?;
        }
        Ok(())
    }
}

fn check_frequency(khz: u32) -> Result<(), Error> {
    FREQUENCY_RANGE_KHZ.contains(&khz).then_some(()).ok_or(Error::Invalid)
}

fn check_power(db: u8) -> Result<(), Error> {
    (db <= MAX_POWER_DB).then_some(()).ok_or(Error::Invalid)
}

fn check_bandwidth(hz: u32) -> Result<(), Error> {
    BANDWIDTH_RANGE_HZ.contains(&hz).then_some(()).ok_or(Error::Invalid)
}

fn check_preamble(preamble: u32) -> Result<(), Error> {
    PREAMBLE_RANGE.contains(&preamble).then_some(()).ok_or(Error::Invalid)
}

fn check_spreading_factor(sf: u8) -> Result<(), Error> {
    SPREADING_FACTOR_RANGE.contains(&sf).then_some(()).ok_or(Error::Invalid)
}

/// PaConfig register value for a requested power level.
fn pa_config_for(db: u8) -> PaConfig {
    let output_power = POWER_TABLE
        .iter()
        .find(|(upper, _, _)| db <= *upper)
        .map_or(15, |(_, output_power, _)| *output_power);

    PaConfig {
        pa_boost: true,
        max_power: 7,
        output_power,
    }
}

/// Raw LoRa bit rate in bit/s: `SF * (4 / CR) / (2^SF / BW)`.
fn bit_rate(spreading_factor: u8, bandwidth: Bandwidth, coding_rate: CodingRate) -> u64 {
    let numerator = u64::from(spreading_factor) * 4 * u64::from(bandwidth.hz());
    let denominator = u64::from(coding_rate.denominator()) << spreading_factor;
    numerator / denominator
}

/// Highest explicit-header spreading factor whose bit rate still reaches `bps`.
fn spreading_factor_for(bps: u32, bandwidth: Bandwidth, coding_rate: CodingRate) -> Option<u8> {
    if bps == 0 {
        return None;
    }
    EXPLICIT_HEADER_SF_RANGE
        .rev()
        .find(|&sf| bit_rate(sf, bandwidth, coding_rate) >= u64::from(bps))
}

/// Whether a symbol at these settings lasts longer than 16 ms.
fn needs_low_data_rate_optimize(spreading_factor: u8, bandwidth: Bandwidth) -> bool {
    let symbol_us = (1_000_000u64 << spreading_factor) / u64::from(bandwidth.hz());
    symbol_us > LDRO_SYMBOL_US
}

/// Driver for an Ai-Thinker RA-02 module.
///
/// `SPI` is any [`SpiDevice`] whose error converts into [`Error`]; pass
/// `&mut transport` to keep ownership of the transport outside the driver.
/// `D` provides the blocking waits between IRQ polls and after synthesizer
/// changes.
///
/// Dropping the driver puts the chip to sleep unless it is already asleep.
pub struct Ra02<SPI, D>
where
    SPI: SpiDevice,
    Error: From<SPI::Error>,
    D: DelayNs,
{
    device: Option<Device<SPI>>,
    delay: D,
    irq_flags: IrqFlags,
    packet_rssi: Option<u8>,
    send_timeout_ms: u64,
    poll_interval_us: u32,
    asleep: bool,
}

impl<SPI, D> Ra02<SPI, D>
where
    SPI: SpiDevice,
    Error: From<SPI::Error>,
    D: DelayNs,
{
    /// Binds the transport, resets the chip and applies [`RadioConfig::default`].
    pub fn init(spi: SPI, delay: D) -> Result<Self, Error> {
        Self::init_with(spi, delay, RadioConfig::default())
    }

    /// Binds the transport, resets the chip and applies `config`.
    ///
    /// # Errors
    /// * `Error::Invalid` - A `config` field is out of range, nothing was sent
    /// * `Error::NoResponse` - The chip did not report an SX1278 version
    /// * Any transport error, unchanged
    pub fn init_with(spi: SPI, delay: D, config: RadioConfig) -> Result<Self, Error> {
        config.validate()?;

        let mut radio = Self {
            device: Some(Device::new(spi)),
            delay,
            irq_flags: IrqFlags::empty(),
            packet_rssi: None,
            send_timeout_ms: config.send_timeout_ms,
            poll_interval_us: config.poll_interval_us,
            asleep: false,
        };

        if let Err(err) = radio.reset() {
            // Not a chip we should be writing to, skip the sleep on drop
            radio.device = None;
            return Err(err);
        }
        radio.configure(&config)?;

        info!("ra02 initialized at {} kHz", config.frequency_khz);
        Ok(radio)
    }

    fn configure(&mut self, config: &RadioConfig) -> Result<(), Error> {
        self.set_freq(config.frequency_khz)?;
        self.set_power(config.power_db)?;
        self.write(Ocp::from_milliamps(config.ocp_ma))?;
        self.write(Lna::MAX_GAIN_BOOSTED)?;
        self.write(FifoTxBaseAddr { addr: 0x80 })?;
        self.write(FifoRxBaseAddr { addr: 0x00 })?;
        self.write(ModemConfig3 {
            low_data_rate_optimize: false,
            agc_auto_on: true,
        })?;
        self.write(ModemConfig1 {
            bandwidth: Bandwidth::floor_hz(config.bandwidth_hz),
            coding_rate: config.coding_rate,
            implicit_header: false,
        })?;
        self.write(ModemConfig2 {
            spreading_factor: config.spreading_factor,
            tx_continuous: false,
            rx_crc_on: config.crc,
            symb_timeout_msb: (RX_SYMBOL_TIMEOUT >> 8) as u8,
        })?;
        self.write(SymbTimeoutLsb {
            value: (RX_SYMBOL_TIMEOUT & 0xFF) as u8,
        })?;
        self.set_sf(config.spreading_factor)?;
        self.set_preamble(config.preamble.into())?;
        self.set_sync_word(config.sync_word.into())?;
        if let Some(bps) = config.baudrate {
            self.set_baudrate(bps)?;
        }
        self.standby()
    }

    /// Puts the chip to sleep.
    ///
    /// Does nothing if the chip is already asleep, so calling it twice is not
    /// an error. Dropping the driver calls this too.
    pub fn deinit(&mut self) -> Result<(), Error> {
        if self.asleep {
            return Ok(());
        }
        debug!("deinit");
        self.sleep()
    }

    /// Puts the chip to sleep and hands back the transport.
    pub fn release(mut self) -> Result<SPI, Error> {
        self.deinit()?;
        self.device.take().map(Device::release).ok_or(Error::Null)
    }

    /// Brings the chip back to a known idle state in LoRa mode.
    ///
    /// The RA-02 does not route the reset pin through the transport, so the
    /// reset is a soft one: check the silicon version, fall to FSK sleep, switch
    /// to LoRa while asleep, then go to Standby.
    ///
    /// # Errors
    /// * `Error::NoResponse` - The version register does not read as an SX1278
    pub fn reset(&mut self) -> Result<(), Error> {
        debug!("reset");
        self.irq_flags = IrqFlags::empty();
        self.packet_rssi = None;

        let version: Version = self.read()?;
        debug!("version: {:#x}", version.value);
        if version.value != SX1278_VERSION {
            warn!("unexpected silicon version {:#x}", version.value);
            return Err(Error::NoResponse);
        }

        // LongRangeMode only latches in Sleep
        self.write(OpMode::fsk(Mode::Sleep))?;
        self.set_mode(Mode::Sleep)?;
        self.standby()
    }

    /// Low-power mode, FIFO content is lost.
    pub fn sleep(&mut self) -> Result<(), Error> {
        self.set_mode(Mode::Sleep)
    }

    /// Idle mode with the oscillator running.
    pub fn standby(&mut self) -> Result<(), Error> {
        self.set_mode(Mode::Standby)
    }

    /// Sets the carrier frequency in kHz.
    pub fn set_freq(&mut self, khz: u32) -> Result<(), Error> {
        check_frequency(khz)?;
        debug!("set_freq: {} kHz", khz);

        self.write(Frequency::from_khz(khz))?;
        self.delay.delay_ms(FREQUENCY_SETTLE_MS);
        Ok(())
    }

    /// Sets the output power in dB on PA_BOOST.
    ///
    /// The module supports four levels (11, 14, 17 and 20 dB); a request
    /// selects the highest level not above it, 0 to 13 all select 11 dB.
    pub fn set_power(&mut self, db: u8) -> Result<(), Error> {
        check_power(db)?;
        debug!("set_power: {} dB", db);

        self.write(pa_config_for(db))?;
        self.write(PaDac {
            high_power: db >= MAX_POWER_DB,
        })?;
        self.delay.delay_ms(POWER_SETTLE_MS);
        Ok(())
    }

    /// Reads back the output power in dB.
    pub fn get_power(&mut self) -> Result<u8, Error> {
        let pa_config: PaConfig = self.read()?;

        Ok(POWER_TABLE
            .iter()
            .find(|(upper, _, _)| pa_config == pa_config_for(*upper))
            .map_or_else(|| pa_config.output_db(), |(_, _, db)| *db))
    }

    /// Sets the LoRa sync word. Only the low byte is meaningful.
    pub fn set_sync_word(&mut self, sync_word: u32) -> Result<(), Error> {
        let value = u8::try_from(sync_word).map_err(|_| Error::Invalid)?;
        debug!("set_sync_word: {:#x}", value);

        self.write(SyncWord { value })
    }

    /// Picks the highest spreading factor whose raw bit rate reaches `bps` at
    /// the current bandwidth and coding rate.
    ///
    /// The driver uses explicit headers, so SF6 is never selected.
    ///
    /// # Errors
    /// * `Error::Invalid` - `bps` is zero or faster than SF7 allows
    pub fn set_baudrate(&mut self, bps: u32) -> Result<(), Error> {
        if bps == 0 {
            return Err(Error::Invalid);
        }
        debug!("set_baudrate: {} bps", bps);

        let modem: ModemConfig1 = self.read()?;
        let sf = spreading_factor_for(bps, modem.bandwidth, modem.coding_rate).ok_or(Error::Invalid)?;
        self.set_sf(sf)
    }

    /// Sets the bandwidth, floored to the nearest supported value.
    pub fn set_bandwidth(&mut self, hz: u32) -> Result<(), Error> {
        check_bandwidth(hz)?;
        let bandwidth = Bandwidth::floor_hz(hz);
        debug!("set_bandwidth: {} Hz", bandwidth.hz());

        let modem: ModemConfig1 = self.read()?;
        self.write(ModemConfig1 { bandwidth, ..modem })?;
        self.update_low_data_rate_optimize()
    }

    /// Sets the preamble length in symbols.
    pub fn set_preamble(&mut self, preamble: u32) -> Result<(), Error> {
        check_preamble(preamble)?;
        debug!("set_preamble: {}", preamble);

        self.write(PreambleLength {
            length: preamble as u16,
        })
    }

    /// Sets the spreading factor, 6 to 12.
    pub fn set_sf(&mut self, sf: u8) -> Result<(), Error> {
        check_spreading_factor(sf)?;
        debug!("set_sf: {}", sf);
        if sf == 6 {
            warn!("SF6 only demodulates in implicit header mode");
        }

        let modem: ModemConfig2 = self.read()?;
        self.write(ModemConfig2 {
            spreading_factor: sf,
            ..modem
        })?;

        let optimize: DetectionOptimize = self.read()?;
        self.write(optimize.for_spreading_factor(sf))?;
        self.write(DetectionThreshold::for_spreading_factor(sf))?;
        self.update_low_data_rate_optimize()
    }

    /// Sets the coding rate, read-modify-write of ModemConfig1.
    pub fn set_coding_rate(&mut self, coding_rate: CodingRate) -> Result<(), Error> {
        debug!("set_coding_rate: 4/{}", coding_rate.denominator());

        let modem: ModemConfig1 = self.read()?;
        self.write(ModemConfig1 {
            coding_rate,
            ..modem
        })
    }

    /// Enables or disables the payload CRC.
    pub fn set_crc(&mut self, on: bool) -> Result<(), Error> {
        debug!("set_crc: {}", on);

        let modem: ModemConfig2 = self.read()?;
        self.write(ModemConfig2 {
            rx_crc_on: on,
            ..modem
        })
    }

    /// Current RSSI, raw register value.
    pub fn get_rssi(&mut self) -> Result<u8, Error> {
        let rssi: RssiValue = self.read()?;
        Ok(rssi.value)
    }

    /// Raw RSSI of the last packet whose header was seen by `recv`.
    pub fn packet_rssi(&self) -> Option<u8> {
        self.packet_rssi
    }

    /// Flags seen by the last [`poll_irq_flags`](Self::poll_irq_flags).
    pub fn irq_flags(&self) -> IrqFlags {
        self.irq_flags
    }

    /// Reads the interrupt flags into the driver and clears them on the chip.
    pub fn poll_irq_flags(&mut self) -> Result<IrqFlags, Error> {
        let status: IrqStatus = self.read()?;
        if !status.flags.is_empty() {
            self.write(status)?;
        }

        self.irq_flags = status.flags;
        Ok(status.flags)
    }

    /// Transmits `payload` and waits for TxDone.
    ///
    /// The wait is bounded by the configured send timeout. The chip is back
    /// in Standby when this returns, including on `Error::Timeout`.
    ///
    /// # Errors
    /// * `Error::OutOfBounds` - `payload` is longer than [`MAX_PAYLOAD`], nothing was sent
    /// * `Error::Invalid` - `payload` is empty, nothing was sent
    /// * `Error::Timeout` - TxDone was not raised in time
    pub fn send(&mut self, payload: &[u8]) -> Result<(), Error> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::OutOfBounds);
        }
        if payload.is_empty() {
            return Err(Error::Invalid);
        }
        debug!("send: [{}]: {:?}", payload.len(), payload);

        self.irq_flags = IrqFlags::empty();
        self.standby()?;
        self.write(DioMapping1::dio0(Dio0::TxDone))?;

        let base: FifoTxBaseAddr = self.read()?;
        self.write(FifoAddrPtr { addr: base.addr })?;
        self.write(PayloadLength {
            length: payload.len() as u8,
        })?;
        self.device()?.write_fifo(payload)?;

        self.set_mode(Mode::Tx)?;

        let deadline = Timeout::new(self.send_timeout_ms);
        let outcome = loop {
            if self.poll_irq_flags()?.contains(IrqFlags::TX_DONE) {
                break Ok(());
            }
            if deadline.is_expired() {
                warn!("send: no TxDone after {} ms", self.send_timeout_ms);
                break Err(Error::Timeout);
            }
            self.delay.delay_us(self.poll_interval_us);
        };

        self.standby()?;
        outcome
    }

    /// Receives one packet, polling until it arrives or `timeout` expires.
    ///
    /// A packet whose RxDone is observed in the same poll in which `timeout`
    /// expires is still returned. Another thread can cancel the wait through
    /// [`Timeout::expirer`]. The chip is left in Standby.
    ///
    /// # Errors
    /// * `Error::Corrupt` - The packet failed its CRC check
    /// * `Error::Timeout` - `timeout` expired first
    pub fn recv(&mut self, timeout: &Timeout) -> Result<Payload, Error> {
        match timeout.remaining() {
            Some(left) => debug!(
                "recv: {} of {} ms left",
                left.as_millis() as u64,
                timeout.duration_ms()
            ),
            None => debug!("recv: no deadline"),
        }

        self.irq_flags = IrqFlags::empty();
        self.packet_rssi = None;
        self.standby()?;
        self.write(DioMapping1::dio0(Dio0::RxDone))?;
        self.write(IrqStatus {
            flags: IrqFlags::all(),
        })?;
        self.set_mode(Mode::RxContinuous)?;

        loop {
            let flags = self.poll_irq_flags()?;

            if flags.contains(IrqFlags::VALID_HEADER) {
                let rssi: PktRssiValue = self.read()?;
                self.packet_rssi = Some(rssi.value);
            }

            if flags.contains(IrqFlags::PAYLOAD_CRC_ERROR) {
                warn!("recv: payload CRC error");
                self.standby()?;
                return Err(Error::Corrupt);
            }

            if flags.contains(IrqFlags::RX_DONE) {
                return self.read_packet();
            }

            if timeout.is_expired() {
                self.standby()?;
                return Err(Error::Timeout);
            }

            self.delay.delay_us(self.poll_interval_us);
        }
    }

    fn read_packet(&mut self) -> Result<Payload, Error> {
        self.standby()?;

        let received: RxNbBytes = self.read()?;
        let len = usize::from(received.count);
        if len > MAX_PAYLOAD {
            warn!("recv: truncating {} byte packet to {}", len, MAX_PAYLOAD);
        }

        let current: FifoRxCurrentAddr = self.read()?;
        self.write(FifoAddrPtr { addr: current.addr })?;

        let mut payload = Payload::new();
        payload
            .resize(len.min(MAX_PAYLOAD), 0)
            .map_err(|_| Error::OutOfBounds)?;
        self.device()?.read_fifo(&mut payload)?;

        debug!("recv: [{}]: {:?}", payload.len(), payload.as_slice());
        Ok(payload)
    }

    fn set_mode(&mut self, mode: Mode) -> Result<(), Error> {
        debug!("mode: {:?}", mode);
        self.write(OpMode::lora(mode))?;
        self.asleep = mode == Mode::Sleep;
        Ok(())
    }

    fn update_low_data_rate_optimize(&mut self) -> Result<(), Error> {
        let modem1: ModemConfig1 = self.read()?;
        let modem2: ModemConfig2 = self.read()?;
        let low_data_rate_optimize =
            needs_low_data_rate_optimize(modem2.spreading_factor, modem1.bandwidth);

        let modem3: ModemConfig3 = self.read()?;
        if modem3.low_data_rate_optimize != low_data_rate_optimize {
            debug!("low data rate optimize: {}", low_data_rate_optimize);
            self.write(ModemConfig3 {
                low_data_rate_optimize,
                ..modem3
            })?;
        }
        Ok(())
    }

    fn device(&mut self) -> Result<&mut Device<SPI>, Error> {
        self.device.as_mut().ok_or(Error::Null)
    }

    fn read<R>(&mut self) -> Result<R, Error>
    where
        R: ReadableRegister<IdType = u8>,
    {
        self.device()?.read_register()
    }

    fn write<R>(&mut self, register: R) -> Result<(), Error>
    where
        R: WritableRegister<IdType = u8, Error = core::convert::Infallible>,
    {
        self.device()?.write_register(register)
    }
}

impl<SPI, D> Drop for Ra02<SPI, D>
where
    SPI: SpiDevice,
    Error: From<SPI::Error>,
    D: DelayNs,
{
    fn drop(&mut self) {
        if self.device.is_none() {
            return;
        }
        if let Err(err) = self.deinit() {
            warn!("deinit on drop failed: {:?}", err);
        }
    }
}
