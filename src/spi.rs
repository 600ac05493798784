//! Full-duplex SPI transport
//!
//! [`SpiTransport`] owns a Linux spidev descriptor and exchanges byte-exact
//! full-duplex frames with the module: every byte clocked out clocks one byte in,
//! so [`SpiTransport::transceive`] always returns as many bytes as it was given.
//!
//! The transport also implements [`embedded_hal::spi::SpiDevice`], which is the
//! seam the radio driver is generic over. A transaction's operations are flattened
//! into a single full-duplex frame so chip-select stays asserted across the whole
//! register access, the same way the SX127x expects an address byte followed by
//! data bytes.

use embedded_hal::spi::Operation;

use crate::Error;

/// Bus settings applied when a transport is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpiConfig {
    /// Clock speed in Hz
    pub speed_hz: u32,
    /// Delay after each transaction in microseconds
    pub delay_us: u16,
    /// Word size; the SX127x only speaks 8-bit words
    pub bits_per_word: u8,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            speed_hz: 1_000_000,
            delay_us: 0,
            bits_per_word: 8,
        }
    }
}

impl SpiConfig {
    /// Rejects settings the chip family cannot work with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.speed_hz == 0 || self.bits_per_word != 8 {
            return Err(Error::Invalid);
        }
        Ok(())
    }
}

/// Runs a transaction as full-duplex segments.
///
/// Consecutive operations are concatenated into one frame and handed to `exchange`,
/// which must return exactly as many bytes as it received. Read buffers are then
/// filled from the matching slice of the response. A `DelayNs` operation splits the
/// transaction into two frames around a call to `delay`.
pub(crate) fn run_transaction<X, D>(
    operations: &mut [Operation<'_, u8>],
    mut exchange: X,
    mut delay: D,
) -> Result<(), Error>
where
    X: FnMut(&[u8]) -> Result<Vec<u8>, Error>,
    D: FnMut(u32),
{
    let mut segment = 0;
    for index in 0..operations.len() {
        if let Operation::DelayNs(ns) = operations[index] {
            run_segment(&mut operations[segment..index], &mut exchange)?;
            delay(ns);
            segment = index + 1;
        }
    }
    run_segment(&mut operations[segment..], &mut exchange)
}

fn run_segment<X>(operations: &mut [Operation<'_, u8>], exchange: &mut X) -> Result<(), Error>
where
    X: FnMut(&[u8]) -> Result<Vec<u8>, Error>,
{
    let mut tx = Vec::new();
    for operation in operations.iter() {
        match operation {
            Operation::Read(read) => tx.resize(tx.len() + read.len(), 0),
            Operation::Write(write) => tx.extend_from_slice(write),
            Operation::Transfer(read, write) => {
                let start = tx.len();
                tx.extend_from_slice(write);
                tx.resize(start + read.len().max(write.len()), 0);
            }
            Operation::TransferInPlace(buf) => tx.extend_from_slice(buf),
            Operation::DelayNs(_) => {}
        }
    }

    if tx.is_empty() {
        return Ok(());
    }

    let rx = exchange(&tx)?;
    if rx.len() != tx.len() {
        return Err(Error::Failed);
    }

    let mut offset = 0;
    for operation in operations.iter_mut() {
        match operation {
            Operation::Read(read) => {
                read.copy_from_slice(&rx[offset..offset + read.len()]);
                offset += read.len();
            }
            Operation::Write(write) => offset += write.len(),
            Operation::Transfer(read, write) => {
                let len = read.len().max(write.len());
                read.copy_from_slice(&rx[offset..offset + read.len()]);
                offset += len;
            }
            Operation::TransferInPlace(buf) => {
                buf.copy_from_slice(&rx[offset..offset + buf.len()]);
                offset += buf.len();
            }
            Operation::DelayNs(_) => {}
        }
    }

    Ok(())
}

#[cfg(feature = "spidev")]
pub use linux::SpiTransport;

#[cfg(feature = "spidev")]
mod linux {
    use std::io;
    use std::path::Path;
    use std::thread;
    use std::time::Duration;

    use embedded_hal::spi::{ErrorType, Operation, SpiDevice};
    use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};

    use super::{run_transaction, SpiConfig};
    use crate::Error;

    /// Linux spidev transport.
    ///
    /// Single owner, no internal locking. The descriptor is released by
    /// [`close`](SpiTransport::close) or when the transport is dropped.
    pub struct SpiTransport {
        device: Option<Spidev>,
        config: SpiConfig,
    }

    impl SpiTransport {
        /// Opens `path` (e.g. `/dev/spidev0.0`) with the default [`SpiConfig`].
        pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
            Self::open_with(path, SpiConfig::default())
        }

        /// Opens `path` and applies `config`.
        ///
        /// # Errors
        /// * [`Error::Invalid`] - the path cannot be opened or the bus rejects the config
        pub fn open_with<P: AsRef<Path>>(path: P, config: SpiConfig) -> Result<Self, Error> {
            let path = path.as_ref();
            let name = path.to_str().unwrap_or("<non-utf8 path>");
            config.validate()?;

            let mut device = Spidev::open(path).map_err(|e| {
                warn!("spi: cannot open {}: os error {}", name, os_error(&e));
                Error::Invalid
            })?;

            let options = SpidevOptions::new()
                .bits_per_word(config.bits_per_word)
                .max_speed_hz(config.speed_hz)
                .mode(SpiModeFlags::SPI_MODE_0)
                .build();
            device.configure(&options).map_err(|e| {
                warn!("spi: {} rejected configuration: os error {}", name, os_error(&e));
                Error::Invalid
            })?;

            debug!(
                "spi: opened {} at {} Hz, {} bits/word",
                name,
                config.speed_hz,
                config.bits_per_word
            );

            Ok(Self {
                device: Some(device),
                config,
            })
        }

        /// Settings the transport was opened with.
        pub fn config(&self) -> &SpiConfig {
            &self.config
        }

        /// Returns true until the descriptor has been released.
        pub fn is_open(&self) -> bool {
            self.device.is_some()
        }

        /// Releases the descriptor. Closing a closed transport is a no-op.
        pub fn close(&mut self) {
            if self.device.take().is_some() {
                debug!("spi: closed");
            }
        }

        /// Clocks `tx` out and returns the bytes clocked in, same length as `tx`.
        ///
        /// # Errors
        /// * [`Error::Null`] - the transport has been closed
        /// * [`Error::Failed`] - the bus transfer failed
        pub fn transceive(&mut self, tx: &[u8]) -> Result<Vec<u8>, Error> {
            let mut rx = vec![0u8; tx.len()];
            self.transceive_into(tx, &mut rx)?;
            Ok(rx)
        }

        fn transceive_into(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Error> {
            let device = self.device.as_mut().ok_or(Error::Null)?;

            let mut transfer = SpidevTransfer::read_write(tx, rx);
            device.transfer(&mut transfer).map_err(|e| {
                warn!("spi: transfer of {} bytes failed: os error {}", tx.len(), os_error(&e));
                Error::Failed
            })?;

            if self.config.delay_us > 0 {
                thread::sleep(Duration::from_micros(self.config.delay_us.into()));
            }

            Ok(())
        }
    }

    fn os_error(err: &io::Error) -> i32 {
        err.raw_os_error().unwrap_or(-1)
    }

    impl Drop for SpiTransport {
        fn drop(&mut self) {
            self.close();
        }
    }

    impl ErrorType for SpiTransport {
        type Error = Error;
    }

    impl SpiDevice for SpiTransport {
        fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Error> {
            run_transaction(
                operations,
                |tx| self.transceive(tx),
                |ns| thread::sleep(Duration::from_nanos(ns.into())),
            )
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn open_missing_device_is_invalid() {
            let result = SpiTransport::open("/dev/spidev-does-not-exist.0");
            assert!(matches!(result, Err(Error::Invalid)));
        }

        #[test]
        fn open_rejects_bad_config_before_touching_the_device() {
            let config = SpiConfig {
                bits_per_word: 16,
                ..Default::default()
            };
            assert!(matches!(
                SpiTransport::open_with("/dev/spidev-does-not-exist.0", config),
                Err(Error::Invalid)
            ));
        }

        #[test]
        fn close_is_idempotent_and_transceive_after_close_is_null() {
            let mut transport = SpiTransport {
                device: None,
                config: SpiConfig::default(),
            };
            transport.close();
            transport.close();
            assert!(!transport.is_open());
            assert_eq!(transport.transceive(&[0x42, 0x00]), Err(Error::Null));
        }

        #[test]
        fn os_error_numbers_for_logging() {
            assert_eq!(os_error(&io::Error::from_raw_os_error(2)), 2);
            assert_eq!(os_error(&io::Error::new(io::ErrorKind::Other, "no errno")), -1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_plus_one(tx: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(tx.iter().map(|b| b.wrapping_add(1)).collect())
    }

    #[test]
    fn default_config_is_valid() {
        let config = SpiConfig::default();
        assert_eq!(config.speed_hz, 1_000_000);
        assert_eq!(config.delay_us, 0);
        assert_eq!(config.bits_per_word, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_validation() {
        let zero_speed = SpiConfig {
            speed_hz: 0,
            ..Default::default()
        };
        assert_eq!(zero_speed.validate(), Err(Error::Invalid));

        let wide_words = SpiConfig {
            bits_per_word: 16,
            ..Default::default()
        };
        assert_eq!(wide_words.validate(), Err(Error::Invalid));
    }

    #[test]
    fn transaction_is_one_full_duplex_frame() {
        let mut frames = Vec::new();
        let mut value = [0u8; 2];

        run_transaction(
            &mut [Operation::Write(&[0x42]), Operation::Read(&mut value)],
            |tx| {
                frames.push(tx.to_vec());
                echo_plus_one(tx)
            },
            |_| {},
        )
        .expect("transaction failed");

        assert_eq!(frames, vec![vec![0x42, 0x00, 0x00]]);
        assert_eq!(value, [0x01, 0x01]);
    }

    #[test]
    fn transfer_pads_to_longest_buffer() {
        let mut read = [0u8; 3];
        let mut in_place = [0x10, 0x20];

        run_transaction(
            &mut [
                Operation::Transfer(&mut read, &[0x05]),
                Operation::TransferInPlace(&mut in_place),
            ],
            |tx| {
                assert_eq!(tx, &[0x05, 0x00, 0x00, 0x10, 0x20]);
                echo_plus_one(tx)
            },
            |_| {},
        )
        .expect("transaction failed");

        assert_eq!(read, [0x06, 0x01, 0x01]);
        assert_eq!(in_place, [0x11, 0x21]);
    }

    #[test]
    fn delay_splits_the_transaction() {
        let mut frames = Vec::new();
        let mut delays = Vec::new();

        run_transaction(
            &mut [
                Operation::Write(&[0x81, 0x80]),
                Operation::DelayNs(1_000),
                Operation::Write(&[0x81, 0x81]),
            ],
            |tx| {
                frames.push(tx.to_vec());
                echo_plus_one(tx)
            },
            |ns| delays.push(ns),
        )
        .expect("transaction failed");

        assert_eq!(frames, vec![vec![0x81, 0x80], vec![0x81, 0x81]]);
        assert_eq!(delays, vec![1_000]);
    }

    #[test]
    fn exchange_errors_propagate_unchanged() {
        let mut value = [0u8; 1];
        let result = run_transaction(
            &mut [Operation::Write(&[0x42]), Operation::Read(&mut value)],
            |_| Err(Error::Busy),
            |_| {},
        );
        assert_eq!(result, Err(Error::Busy));
    }

    #[test]
    fn short_response_is_a_failure() {
        let result = run_transaction(
            &mut [Operation::Write(&[0x42, 0x00])],
            |_| Ok(vec![0x00]),
            |_| {},
        );
        assert_eq!(result, Err(Error::Failed));
    }
}
