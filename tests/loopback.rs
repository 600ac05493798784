use std::thread;
use std::time::{Duration, Instant};

use ra02::sim::{Air, NoopDelay, SimulatedRa02, NOISE_RSSI, PACKET_RSSI};
use ra02::{status, Error, Ra02, RadioConfig, Timeout, MAX_PAYLOAD};

fn pair() -> (Air, SimulatedRa02, SimulatedRa02) {
    let air = Air::new();
    let a = air.attach();
    let b = air.attach();
    (air, a, b)
}

#[test]
fn send_then_recv_round_trip() {
    let (_air, a, b) = pair();
    let mut tx = Ra02::init(a, NoopDelay).expect("init tx");
    let mut rx = Ra02::init(b, NoopDelay).expect("init rx");

    tx.set_freq(433_000).unwrap();
    tx.set_sf(7).unwrap();
    rx.set_freq(433_000).unwrap();
    rx.set_sf(7).unwrap();

    let result = tx.send(&[1, 2, 3, 4, 5]);
    assert_eq!(status(&result), 0);

    let started = Instant::now();
    let payload = rx.recv(&Timeout::new(5_000)).expect("recv");
    assert!(started.elapsed() < Duration::from_millis(5_000));
    assert_eq!(payload.as_slice(), &[1, 2, 3, 4, 5]);
    assert_eq!(rx.packet_rssi(), Some(PACKET_RSSI));
}

#[test]
fn full_size_payload_round_trip() {
    let (_air, a, b) = pair();
    let mut tx = Ra02::init(a, NoopDelay).unwrap();
    let mut rx = Ra02::init(b, NoopDelay).unwrap();

    let sent: Vec<u8> = (0..MAX_PAYLOAD as u8).collect();
    tx.send(&sent).unwrap();

    let received = rx.recv(&Timeout::new(1_000)).unwrap();
    assert_eq!(received.len(), MAX_PAYLOAD);
    assert_eq!(received.as_slice(), sent.as_slice());
}

#[test]
fn mismatched_channel_is_not_heard() {
    let (_air, a, b) = pair();
    let mut tx = Ra02::init(a, NoopDelay).unwrap();
    let mut rx = Ra02::init(b, NoopDelay).unwrap();

    tx.set_sync_word(0x34).unwrap();
    tx.send(&[0xAA]).unwrap();

    assert_eq!(rx.recv(&Timeout::new(50)), Err(Error::Timeout));
}

#[test]
fn recv_times_out_not_before_deadline() {
    let (_air, _a, b) = pair();
    let mut rx = Ra02::init(b, NoopDelay).unwrap();

    let started = Instant::now();
    let result = rx.recv(&Timeout::new(100));

    assert_eq!(result, Err(Error::Timeout));
    assert_eq!(status(&result), 6);
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[test]
fn payload_wins_over_expired_timeout() {
    let (_air, _a, b) = pair();
    let mut rx = Ra02::init(b.clone(), NoopDelay).unwrap();

    b.inject(&[9, 8, 7], false);
    let timeout = Timeout::new(1_000);
    timeout.expire();

    assert_eq!(rx.recv(&timeout).unwrap().as_slice(), &[9, 8, 7]);
}

#[test]
fn crc_error_is_corrupt() {
    let (_air, _a, b) = pair();
    let mut rx = Ra02::init(b.clone(), NoopDelay).unwrap();

    b.inject(&[1, 2, 3], true);
    assert_eq!(rx.recv(&Timeout::new(1_000)), Err(Error::Corrupt));

    // Standby afterwards
    assert_eq!(b.register(0x01), 0x81);
}

#[test]
fn bus_errors_propagate_unchanged() {
    let (_air, a, _b) = pair();
    let mut tx = Ra02::init(a.clone(), NoopDelay).unwrap();

    a.fail_next(Error::Busy);
    assert_eq!(tx.send(&[1]), Err(Error::Busy));

    a.fail_next(Error::Again);
    assert_eq!(tx.recv(&Timeout::new(10)), Err(Error::Again));

    a.fail_next(Error::Failed);
    assert_eq!(tx.get_rssi(), Err(Error::Failed));

    // Recovery
    tx.reset().unwrap();
    tx.send(&[1]).unwrap();
}

#[test]
fn stuck_transmitter_times_out() {
    let (_air, a, _b) = pair();
    let config = RadioConfig {
        send_timeout_ms: 50,
        ..Default::default()
    };
    let mut tx = Ra02::init_with(a.clone(), NoopDelay, config).unwrap();

    a.set_tx_stuck(true);
    let started = Instant::now();
    assert_eq!(tx.send(&[1, 2]), Err(Error::Timeout));
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(a.register(0x01), 0x81);
}

#[test]
fn oversize_payload_never_touches_the_bus() {
    let (_air, a, _b) = pair();
    let mut tx = Ra02::init(a.clone(), NoopDelay).unwrap();
    let before = a.transactions();

    let result = tx.send(&[0u8; MAX_PAYLOAD + 1]);
    assert_eq!(result, Err(Error::OutOfBounds));
    assert_eq!(status(&result), 18);
    assert_eq!(a.transactions(), before);
}

#[test]
fn oversize_packet_is_truncated() {
    let (_air, _a, b) = pair();
    let mut rx = Ra02::init(b.clone(), NoopDelay).unwrap();

    b.inject(&[0x5A; 100], false);
    let payload = rx.recv(&Timeout::new(1_000)).unwrap();
    assert_eq!(payload.len(), MAX_PAYLOAD);
    assert!(payload.iter().all(|&byte| byte == 0x5A));
}

#[test]
fn live_rssi_reads_the_channel() {
    let (_air, a, _b) = pair();
    let mut radio = Ra02::init(a, NoopDelay).unwrap();

    assert_eq!(radio.get_rssi(), Ok(NOISE_RSSI));
    assert_eq!(radio.packet_rssi(), None);
}

#[test]
fn sleep_and_standby_switch_modes() {
    let (_air, a, _b) = pair();
    let mut radio = Ra02::init(a.clone(), NoopDelay).unwrap();

    radio.sleep().unwrap();
    assert_eq!(a.register(0x01), 0x80);

    radio.standby().unwrap();
    assert_eq!(a.register(0x01), 0x81);

    // Asleep again, so the next deinit has something to do
    radio.sleep().unwrap();
    let before = a.transactions();
    radio.standby().unwrap();
    radio.deinit().unwrap();
    assert_eq!(a.transactions(), before + 2);
    assert_eq!(a.register(0x01), 0x80);
}

#[test]
fn deinit_twice_is_not_an_error() {
    let (_air, a, _b) = pair();
    let mut radio = Ra02::init(a, NoopDelay).unwrap();

    assert_eq!(radio.deinit(), Ok(()));
    assert_eq!(radio.deinit(), Ok(()));
}

#[test]
fn recv_on_another_thread() {
    let (_air, a, b) = pair();
    let mut tx = Ra02::init(a, NoopDelay).unwrap();

    let receiver = thread::spawn(move || {
        let mut rx = Ra02::init(b, NoopDelay).unwrap();
        rx.recv(&Timeout::new(5_000)).map(|payload| payload.to_vec())
    });

    thread::sleep(Duration::from_millis(20));
    tx.send(b"hello").unwrap();

    assert_eq!(receiver.join().unwrap(), Ok(b"hello".to_vec()));
}

#[test]
fn expirer_cancels_blocked_recv() {
    let (_air, _a, b) = pair();
    let timeout = Timeout::new(0);
    let expirer = timeout.expirer();

    let receiver = thread::spawn(move || {
        let mut rx = Ra02::init(b, NoopDelay).unwrap();
        rx.recv(&timeout)
    });

    thread::sleep(Duration::from_millis(20));
    expirer.expire();

    assert_eq!(receiver.join().unwrap(), Err(Error::Timeout));
}
