//! In-process RA-02 simulation
//!
//! [`SimulatedRa02`] answers SPI transactions the way an SX1278 does at the
//! register level: a 128-register map with power-on values, a 256-byte FIFO
//! behind `FifoAddrPtr`, write-one-to-clear IRQ flags and the LoRa operating
//! modes. Chips attached to the same [`Air`] hear each other when their
//! frequency, sync word, spreading factor and bandwidth match.
//!
//! A transmitted frame waits in each receiver's inbox until that receiver is
//! listening, so a send followed by a receive works on a single thread.
//! Delivery happens when a listening chip has its IRQ flags read.
//!
//! ```
//! use ra02::sim::{Air, NoopDelay};
//! use ra02::{Ra02, Timeout};
//!
//! let air = Air::new();
//! let mut tx = Ra02::init(air.attach(), NoopDelay)?;
//! let mut rx = Ra02::init(air.attach(), NoopDelay)?;
//!
//! tx.send(&[1, 2, 3])?;
//! assert_eq!(rx.recv(&Timeout::new(100))?.as_slice(), &[1, 2, 3]);
//! # Ok::<(), ra02::Error>(())
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{ErrorType, Operation, SpiDevice};

use crate::registers::{IrqFlags, Mode, SX1278_VERSION};
use crate::spi::run_transaction;
use crate::Error;

const REG_FIFO: usize = 0x00;
const REG_OP_MODE: usize = 0x01;
const REG_FRF: usize = 0x06;
const REG_FIFO_ADDR_PTR: usize = 0x0D;
const REG_FIFO_TX_BASE_ADDR: usize = 0x0E;
const REG_FIFO_RX_BASE_ADDR: usize = 0x0F;
const REG_FIFO_RX_CURRENT_ADDR: usize = 0x10;
const REG_IRQ_FLAGS: usize = 0x12;
const REG_RX_NB_BYTES: usize = 0x13;
const REG_PKT_RSSI_VALUE: usize = 0x1A;
const REG_RSSI_VALUE: usize = 0x1B;
const REG_MODEM_CONFIG_1: usize = 0x1D;
const REG_MODEM_CONFIG_2: usize = 0x1E;
const REG_PAYLOAD_LENGTH: usize = 0x22;
const REG_SYNC_WORD: usize = 0x39;
const REG_VERSION: usize = 0x42;

const READ_ONLY: [usize; 6] = [
    REG_FIFO_RX_CURRENT_ADDR,
    REG_RX_NB_BYTES,
    REG_PKT_RSSI_VALUE,
    REG_RSSI_VALUE,
    0x1C,
    REG_VERSION,
];

const LONG_RANGE_MODE: u8 = 0x80;

/// Raw packet RSSI reported for every received frame, about -100 dBm.
pub const PACKET_RSSI: u8 = 0x40;

/// Raw RSSI reported while no frame is being received.
pub const NOISE_RSSI: u8 = 0x1C;

/// Power-on values of the registers the driver touches.
const RESET_VALUES: [(usize, u8); 24] = [
    (REG_OP_MODE, 0x09),
    (REG_FRF, 0x6C),
    (REG_FRF + 1, 0x80),
    (REG_FRF + 2, 0x00),
    (0x09, 0x4F),
    (0x0A, 0x09),
    (0x0B, 0x2B),
    (0x0C, 0x20),
    (REG_FIFO_TX_BASE_ADDR, 0x80),
    (REG_RSSI_VALUE, NOISE_RSSI),
    (REG_MODEM_CONFIG_1, 0x72),
    (REG_MODEM_CONFIG_2, 0x70),
    (0x1F, 0x64),
    (0x21, 0x08),
    (REG_PAYLOAD_LENGTH, 0x01),
    (0x23, 0xFF),
    (0x24, 0x00),
    (0x26, 0x00),
    (0x31, 0xC3),
    (0x37, 0x0A),
    (REG_SYNC_WORD, 0x12),
    (0x40, 0x00),
    (REG_VERSION, SX1278_VERSION),
    (0x4D, 0x84),
];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Modulation settings a receiver must share with the transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Channel {
    frf: u32,
    sync_word: u8,
    spreading_factor: u8,
    bandwidth: u8,
}

#[derive(Debug, Clone)]
struct Frame {
    channel: Channel,
    payload: Vec<u8>,
    corrupt: bool,
}

#[derive(Debug, Default)]
struct AirState {
    next_id: usize,
    inboxes: HashMap<usize, VecDeque<Frame>>,
}

/// Shared medium connecting simulated chips.
#[derive(Debug, Clone, Default)]
pub struct Air {
    state: Arc<Mutex<AirState>>,
}

impl Air {
    pub fn new() -> Self {
        Self::default()
    }

    /// Powers up a new chip on this medium.
    pub fn attach(&self) -> SimulatedRa02 {
        let mut air = lock(&self.state);
        let id = air.next_id;
        air.next_id += 1;
        air.inboxes.insert(id, VecDeque::new());

        SimulatedRa02 {
            id,
            chip: Arc::new(Mutex::new(Chip::power_on())),
            air: self.clone(),
        }
    }

    fn broadcast(&self, from: usize, frame: &Frame) {
        let mut air = lock(&self.state);
        for (_, inbox) in air.inboxes.iter_mut().filter(|(id, _)| **id != from) {
            inbox.push_back(frame.clone());
        }
    }

    /// First frame on `channel` waiting for chip `id`. Frames on other channels are lost.
    fn take_frame(&self, id: usize, channel: Channel) -> Option<Frame> {
        let mut air = lock(&self.state);
        let inbox = air.inboxes.get_mut(&id)?;
        while let Some(frame) = inbox.pop_front() {
            if frame.channel == channel {
                return Some(frame);
            }
        }
        None
    }

    fn push(&self, id: usize, frame: Frame) {
        if let Some(inbox) = lock(&self.state).inboxes.get_mut(&id) {
            inbox.push_back(frame);
        }
    }
}

#[derive(Debug)]
struct Chip {
    registers: [u8; 0x80],
    fifo: [u8; 256],
    transactions: usize,
    fail_next: Option<Error>,
    unresponsive: bool,
    tx_stuck: bool,
}

impl Chip {
    fn power_on() -> Self {
        let mut registers = [0u8; 0x80];
        for (address, value) in RESET_VALUES {
            registers[address] = value;
        }

        Self {
            registers,
            fifo: [0; 256],
            transactions: 0,
            fail_next: None,
            unresponsive: false,
            tx_stuck: false,
        }
    }

    fn lora(&self) -> bool {
        self.registers[REG_OP_MODE] & LONG_RANGE_MODE != 0
    }

    fn mode(&self) -> u8 {
        self.registers[REG_OP_MODE] & 0x07
    }

    fn set_mode(&mut self, mode: Mode) {
        self.registers[REG_OP_MODE] = (self.registers[REG_OP_MODE] & !0x07) | mode as u8;
    }

    fn channel(&self) -> Channel {
        Channel {
            frf: u32::from_be_bytes([
                0,
                self.registers[REG_FRF],
                self.registers[REG_FRF + 1],
                self.registers[REG_FRF + 2],
            ]),
            sync_word: self.registers[REG_SYNC_WORD],
            spreading_factor: self.registers[REG_MODEM_CONFIG_2] >> 4,
            bandwidth: self.registers[REG_MODEM_CONFIG_1] >> 4,
        }
    }

    fn exchange(&mut self, tx: &[u8], id: usize, air: &Air) -> Vec<u8> {
        let mut rx = vec![0; tx.len()];
        if self.unresponsive {
            return rx;
        }

        let Some((&header, data)) = tx.split_first() else {
            return rx;
        };
        let write = header & 0x80 != 0;
        let mut address = usize::from(header & 0x7F);

        for (index, &byte) in data.iter().enumerate() {
            if write {
                self.write(address, byte, id, air);
            } else {
                rx[index + 1] = self.read(address, id, air);
            }
            if address != REG_FIFO {
                address = (address + 1) & 0x7F;
            }
        }
        rx
    }

    fn read(&mut self, address: usize, id: usize, air: &Air) -> u8 {
        match address {
            REG_FIFO => {
                let pointer = self.registers[REG_FIFO_ADDR_PTR];
                self.registers[REG_FIFO_ADDR_PTR] = pointer.wrapping_add(1);
                self.fifo[usize::from(pointer)]
            }
            REG_IRQ_FLAGS => {
                self.listen(id, air);
                self.registers[REG_IRQ_FLAGS]
            }
            _ => self.registers[address],
        }
    }

    fn write(&mut self, address: usize, value: u8, id: usize, air: &Air) {
        match address {
            REG_FIFO => {
                let pointer = self.registers[REG_FIFO_ADDR_PTR];
                self.registers[REG_FIFO_ADDR_PTR] = pointer.wrapping_add(1);
                self.fifo[usize::from(pointer)] = value;
            }
            REG_OP_MODE => {
                // LongRangeMode only changes in Sleep
                let value = if self.mode() == Mode::Sleep as u8 {
                    value
                } else {
                    (value & !LONG_RANGE_MODE) | (self.registers[REG_OP_MODE] & LONG_RANGE_MODE)
                };
                self.registers[REG_OP_MODE] = value;
                if self.lora() && self.mode() == Mode::Tx as u8 {
                    self.transmit(id, air);
                }
            }
            REG_IRQ_FLAGS => self.registers[REG_IRQ_FLAGS] &= !value,
            address if READ_ONLY.contains(&address) => {}
            _ => self.registers[address] = value,
        }
    }

    fn transmit(&mut self, id: usize, air: &Air) {
        if self.tx_stuck {
            return;
        }

        let base = usize::from(self.registers[REG_FIFO_TX_BASE_ADDR]);
        let payload = (0..usize::from(self.registers[REG_PAYLOAD_LENGTH]))
            .map(|offset| self.fifo[(base + offset) % self.fifo.len()])
            .collect();

        air.broadcast(
            id,
            &Frame {
                channel: self.channel(),
                payload,
                corrupt: false,
            },
        );

        self.registers[REG_IRQ_FLAGS] |= IrqFlags::TX_DONE.bits();
        self.set_mode(Mode::Standby);
    }

    /// Moves a waiting frame into the FIFO while the modem is receiving.
    fn listen(&mut self, id: usize, air: &Air) {
        let receiving = self.mode() == Mode::RxContinuous as u8 || self.mode() == Mode::RxSingle as u8;
        let pending = IrqFlags::from_bits_retain(self.registers[REG_IRQ_FLAGS]).contains(IrqFlags::RX_DONE);
        if !self.lora() || !receiving || pending {
            return;
        }

        let Some(frame) = air.take_frame(id, self.channel()) else {
            return;
        };

        let base = self.registers[REG_FIFO_RX_BASE_ADDR];
        for (offset, &byte) in frame.payload.iter().enumerate() {
            self.fifo[(usize::from(base) + offset) % self.fifo.len()] = byte;
        }
        self.registers[REG_FIFO_RX_CURRENT_ADDR] = base;
        self.registers[REG_RX_NB_BYTES] = frame.payload.len() as u8;
        self.registers[REG_PKT_RSSI_VALUE] = PACKET_RSSI;

        let mut flags = IrqFlags::VALID_HEADER | IrqFlags::RX_DONE;
        if frame.corrupt {
            flags |= IrqFlags::PAYLOAD_CRC_ERROR;
        }
        self.registers[REG_IRQ_FLAGS] |= flags.bits();

        if self.mode() == Mode::RxSingle as u8 {
            self.set_mode(Mode::Standby);
        }
    }
}

/// Handle to one simulated chip.
///
/// Clones refer to the same chip, which lets a test inspect registers while a
/// driver owns another handle.
#[derive(Debug, Clone)]
pub struct SimulatedRa02 {
    id: usize,
    chip: Arc<Mutex<Chip>>,
    air: Air,
}

impl SimulatedRa02 {
    /// Current value of a register, without side effects.
    pub fn register(&self, address: u8) -> u8 {
        lock(&self.chip).registers[usize::from(address & 0x7F)]
    }

    /// Number of SPI transactions the chip has seen, failed ones included.
    pub fn transactions(&self) -> usize {
        lock(&self.chip).transactions
    }

    /// Makes the next transaction fail with `err`.
    pub fn fail_next(&self, err: Error) {
        lock(&self.chip).fail_next = Some(err);
    }

    /// An unresponsive chip reads back all zeroes and ignores writes.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        lock(&self.chip).unresponsive = unresponsive;
    }

    /// A stuck transmitter never raises TxDone.
    pub fn set_tx_stuck(&self, stuck: bool) {
        lock(&self.chip).tx_stuck = stuck;
    }

    /// Queues a frame for this chip on its current channel, as if sent by a peer.
    ///
    /// A `corrupt` frame is delivered with the payload CRC error flag raised.
    pub fn inject(&self, payload: &[u8], corrupt: bool) {
        let channel = lock(&self.chip).channel();
        self.air.push(
            self.id,
            Frame {
                channel,
                payload: payload.to_vec(),
                corrupt,
            },
        );
    }
}

impl ErrorType for SimulatedRa02 {
    type Error = Error;
}

impl SpiDevice for SimulatedRa02 {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Error> {
        // Chip before air, everywhere
        let mut chip = lock(&self.chip);
        chip.transactions += 1;
        if let Some(err) = chip.fail_next.take() {
            return Err(err);
        }

        let (id, air) = (self.id, &self.air);
        run_transaction(operations, |tx| Ok(chip.exchange(tx, id, air)), |_| {})
    }
}

/// Delay that only yields the thread, for driving the simulation at full speed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDelay;

impl DelayNs for NoopDelay {
    fn delay_ns(&mut self, _ns: u32) {
        std::thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(chip: &mut SimulatedRa02, address: u8, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        chip.transaction(&mut [Operation::Write(&[address]), Operation::Read(&mut buf)])
            .unwrap();
        buf
    }

    fn write(chip: &mut SimulatedRa02, address: u8, data: &[u8]) {
        chip.transaction(&mut [Operation::Write(&[address | 0x80]), Operation::Write(data)])
            .unwrap();
    }

    #[test]
    fn power_on_values() {
        let mut chip = Air::new().attach();
        assert_eq!(read(&mut chip, 0x42, 1), [0x12]);
        assert_eq!(read(&mut chip, 0x06, 3), [0x6C, 0x80, 0x00]);
        assert_eq!(chip.transactions(), 2);
    }

    #[test]
    fn long_range_mode_latches_only_in_sleep() {
        let mut chip = Air::new().attach();
        write(&mut chip, 0x01, &[0x81]);
        assert_eq!(chip.register(0x01), 0x01);

        write(&mut chip, 0x01, &[0x80]);
        write(&mut chip, 0x01, &[0x81]);
        assert_eq!(chip.register(0x01), 0x81);
    }

    #[test]
    fn fifo_does_not_auto_increment_address() {
        let mut chip = Air::new().attach();
        write(&mut chip, 0x0D, &[0x10]);
        write(&mut chip, 0x00, &[1, 2, 3]);
        assert_eq!(chip.register(0x0D), 0x13);

        write(&mut chip, 0x0D, &[0x10]);
        assert_eq!(read(&mut chip, 0x00, 3), [1, 2, 3]);
    }

    #[test]
    fn irq_flags_clear_on_write_one() {
        let mut chip = Air::new().attach();
        lock(&chip.chip).registers[REG_IRQ_FLAGS] = 0x48;
        write(&mut chip, 0x12, &[0x08]);
        assert_eq!(chip.register(0x12), 0x40);
    }

    #[test]
    fn fail_next_fails_once() {
        let mut chip = Air::new().attach();
        chip.fail_next(Error::Busy);

        let mut buf = [0u8; 1];
        assert_eq!(
            chip.transaction(&mut [Operation::Write(&[0x42]), Operation::Read(&mut buf)]),
            Err(Error::Busy)
        );
        assert_eq!(read(&mut chip, 0x42, 1), [0x12]);
    }

    #[test]
    fn unresponsive_chip_reads_zero() {
        let mut chip = Air::new().attach();
        chip.set_unresponsive(true);
        assert_eq!(read(&mut chip, 0x42, 1), [0x00]);
    }
}
