//! SX127x Register Interface
//!
//! This module provides the register-level interface to SX1276/77/78 radios
//! over SPI. It knows nothing about radio semantics; it only frames accesses:
//!
//! - A register read is one address byte with the MSB cleared, followed by as
//!   many dummy bytes as the register is wide
//! - A register write is one address byte with the MSB set, followed by the data
//! - FIFO accesses use the same framing at address 0x00, but the chip does not
//!   auto-increment the address so any number of bytes can be streamed
//!
//! # Example
//! ```no_run
//! use ra02::{registers::Version, Device, SpiTransport};
//!
//! let spi = SpiTransport::open("/dev/spidev0.0")?;
//! let mut device = Device::new(spi);
//!
//! let version: Version = device.read_register()?;
//! # Ok::<(), ra02::Error>(())
//! ```

use core::convert::Infallible;

use embedded_hal::spi::{Operation, SpiDevice};
use regiface::{ByteArray, ReadableRegister, WritableRegister};

use crate::registers::REG_FIFO;
use crate::Error;

const WRITE_BIT: u8 = 0x80;

/// Register-level interface to an SX127x radio.
///
/// This struct wraps an SPI device and exposes typed register accesses and raw
/// FIFO transfers. Every access is a single SPI transaction, so chip select is
/// held for the address byte and the data that follows.
#[derive(Debug)]
pub struct Device<SPI> {
    spi: SPI,
}

impl<SPI> Device<SPI> {
    /// Creates a new Device instance wrapping the provided SPI device.
    pub fn new(spi: SPI) -> Self {
        Self { spi }
    }

    /// Releases the underlying SPI device.
    pub fn release(self) -> SPI {
        self.spi
    }
}

impl<SPI> Device<SPI>
where
    SPI: SpiDevice,
    Error: From<SPI::Error>,
{
    /// Reads a register value from the device.
    ///
    /// # Errors
    /// * Any error reported by the SPI device, unchanged
    /// * `Error::Corrupt` - The register holds a value outside its encoding
    pub fn read_register<R>(&mut self) -> Result<R, Error>
    where
        R: ReadableRegister<IdType = u8>,
    {
        let mut raw_value = R::Array::new();

        self.spi.transaction(&mut [
            Operation::Write(&[R::id() & !WRITE_BIT]),
            Operation::Read(raw_value.as_mut()),
        ])?;

        R::from_bytes(raw_value).map_err(|_| Error::Corrupt)
    }

    /// Writes a value to a device register.
    ///
    /// # Errors
    /// * Any error reported by the SPI device, unchanged
    pub fn write_register<R>(&mut self, register: R) -> Result<(), Error>
    where
        R: WritableRegister<IdType = u8, Error = Infallible>,
    {
        let raw_value = match register.to_bytes() {
            Ok(raw_value) => raw_value,
            Err(never) => match never {},
        };

        self.spi.transaction(&mut [
            Operation::Write(&[R::id() | WRITE_BIT]),
            Operation::Write(raw_value.as_ref()),
        ])?;

        Ok(())
    }

    /// Streams bytes into the FIFO at the current `FifoAddrPtr`.
    pub fn write_fifo(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.spi.transaction(&mut [
            Operation::Write(&[REG_FIFO | WRITE_BIT]),
            Operation::Write(bytes),
        ])?;

        Ok(())
    }

    /// Reads `bytes.len()` bytes from the FIFO starting at the current `FifoAddrPtr`.
    pub fn read_fifo(&mut self, bytes: &mut [u8]) -> Result<(), Error> {
        self.spi
            .transaction(&mut [Operation::Write(&[REG_FIFO]), Operation::Read(bytes)])?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{Frequency, Mode, OpMode, Version};

    /// Records every frame and answers reads from a fixed byte.
    #[derive(Default)]
    struct Recorder {
        frames: Vec<Vec<u8>>,
        answer: u8,
        fail: Option<Error>,
    }

    impl embedded_hal::spi::ErrorType for Recorder {
        type Error = Error;
    }

    impl SpiDevice for Recorder {
        fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Error> {
            if let Some(err) = self.fail.take() {
                return Err(err);
            }
            let mut frame = Vec::new();
            for operation in operations.iter_mut() {
                match operation {
                    Operation::Write(bytes) => frame.extend_from_slice(bytes),
                    Operation::Read(bytes) => {
                        bytes.fill(self.answer);
                        frame.extend(core::iter::repeat(0).take(bytes.len()));
                    }
                    _ => unreachable!("device only issues reads and writes"),
                }
            }
            self.frames.push(frame);
            Ok(())
        }
    }

    #[test]
    fn register_read_clears_write_bit() {
        let mut device = Device::new(Recorder {
            answer: 0x12,
            ..Default::default()
        });

        let version: Version = device.read_register().unwrap();
        assert_eq!(version.value, 0x12);
        assert_eq!(device.release().frames, vec![vec![0x42, 0x00]]);
    }

    #[test]
    fn register_write_sets_write_bit() {
        let mut device = Device::new(Recorder::default());
        device.write_register(OpMode::lora(Mode::Standby)).unwrap();
        device.write_register(Frequency::from_khz(433_000)).unwrap();

        assert_eq!(
            device.release().frames,
            vec![vec![0x81, 0x81], vec![0x86, 0x6C, 0x40, 0x00]]
        );
    }

    #[test]
    fn fifo_framing() {
        let mut device = Device::new(Recorder {
            answer: 0xAA,
            ..Default::default()
        });
        device.write_fifo(&[1, 2, 3]).unwrap();

        let mut buf = [0u8; 2];
        device.read_fifo(&mut buf).unwrap();
        assert_eq!(buf, [0xAA, 0xAA]);

        assert_eq!(
            device.release().frames,
            vec![vec![0x80, 1, 2, 3], vec![0x00, 0x00, 0x00]]
        );
    }

    #[test]
    fn bus_errors_propagate_unchanged() {
        let mut device = Device::new(Recorder {
            fail: Some(Error::Busy),
            ..Default::default()
        });
        assert_eq!(device.read_register::<Version>(), Err(Error::Busy));
    }

    #[test]
    fn reserved_encoding_is_corrupt() {
        let mut device = Device::new(Recorder {
            answer: 0xFF,
            ..Default::default()
        });
        assert_eq!(
            device.read_register::<crate::registers::ModemConfig1>(),
            Err(Error::Corrupt)
        );
    }
}
