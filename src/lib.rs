//! RA-02 LoRa Driver
//!
//! This crate drives the Ai-Thinker RA-02 module, a Semtech SX1278 LoRa
//! transceiver, from Linux over spidev. It exposes byte-exact SPI transport,
//! chip configuration, packet transmit and timeout-bounded packet receive.
//!
//! # Features
//! - Frequency range: 137-525 MHz
//! - LoRa modulation: SF6-12, BW 7.8-500 kHz, coding rate 4/5 to 4/8
//! - Output power: 11, 14, 17 or 20 dBm on PA_BOOST
//! - Payloads of up to 64 bytes
//!
//! # Architecture
//! The driver is organized into several modules:
//!
//! - [`spi`]: Linux spidev transport
//!   - Full-duplex `transceive` with equal-length buffers
//!   - Implements `embedded_hal::spi::SpiDevice`
//!
//! - [`device`]: Register interface over any `SpiDevice`
//!   - Typed register reads and writes
//!   - FIFO burst access
//!
//! - [`registers`]: Register definitions for direct hardware access
//!
//! - [`radio`]: The [`Ra02`] driver
//!   - Configuration setters, mode control
//!   - `send` and `recv` state machines
//!
//! - [`timeout`]: Deadlines for the receive polling loop
//!
//! - [`sim`]: Simulated chips sharing an in-process medium, for tests
//!
//! - [`error`]: The closed error taxonomy and its stable integer codes
//!
//! # Usage
//! Configuration follows a specific sequence:
//!
//! 1. Open an [`SpiTransport`] on the spidev node wired to the module
//! 2. Initialize an [`Ra02`] with it; the chip is reset and left in Standby
//! 3. Adjust frequency, power and modulation as needed
//! 4. `send` or `recv`
//!
//! # Important Notes
//! - Transmitter and receiver must agree on frequency, sync word, spreading
//!   factor and bandwidth
//! - Configuration calls are not ordered by the driver; set the frequency
//!   before transmitting
//! - After any error the chip mode is unspecified; call [`Ra02::reset`]
//!
//! # Example
//! ```no_run
//! use ra02::{Error, Ra02, SpiTransport, StdDelay, Timeout};
//!
//! fn ping(path: &str) -> Result<(), Error> {
//!     let mut spi = SpiTransport::open(path)?;
//!     let mut radio = Ra02::init(&mut spi, StdDelay)?;
//!
//!     radio.set_freq(433_000)?;
//!     radio.set_sf(7)?;
//!     radio.send(&[1, 2, 3, 4, 5])?;
//!
//!     let reply = radio.recv(&Timeout::new(5_000))?;
//!     println!("{:?}", reply);
//!     Ok(())
//! }
//! ```

#[macro_use]
mod fmt;

pub mod device;
pub mod error;
pub mod radio;
pub mod registers;
pub mod sim;
pub mod spi;
pub mod timeout;

pub use device::Device;
pub use error::{check, status, CodeError, Error};
pub use radio::{Payload, RadioConfig, Ra02, MAX_PAYLOAD};
pub use spi::SpiConfig;
#[cfg(feature = "spidev")]
pub use spi::SpiTransport;
pub use timeout::{Expirer, StdDelay, Timeout};
