//! Command line front end for an RA-02 module on spidev.
//!
//! # Usage
//!
//! ```bash
//! ra02 /dev/spidev0.0 spitest
//! ra02 /dev/spidev0.0 send 1 2 3 4 5
//! ra02 /dev/spidev0.0 recv 5000
//! ```
//!
//! `RUST_LOG=debug` shows every mode change and register setting.

use std::process::ExitCode;

use log::{error, info};
use ra02::{Error, Ra02, SpiTransport, StdDelay, Timeout, MAX_PAYLOAD};

const VERSION_REGISTER: u8 = 0x42;

fn usage(argv0: &str) {
    println!(
        "Usage: {argv0} SPIDEV help|spitest|init|send|recv [TIMEOUT|BYTES]\n\
         \x20 help    - Shows this message\n\
         \x20 spitest - Tests SPI connection to ra02 module\n\
         \x20 init    - Initializes ra02 module\n\
         \x20 send    - Sends bytes via ra02 module\n\
         \x20 recv    - Receives a packet via ra02 module"
    );
}

/// Raw version register read, bypassing the driver.
fn spitest(spidev: &str) -> Result<(), Error> {
    let mut spi = SpiTransport::open(spidev)?;
    let rx = spi.transceive(&[VERSION_REGISTER & 0x7F, 0x00])?;
    info!("Result: {:#04x} {:#04x}", rx[0], rx[1]);
    Ok(())
}

fn init(spidev: &str) -> Result<(), Error> {
    let mut spi = SpiTransport::open(spidev)?;
    let mut radio = Ra02::init(&mut spi, StdDelay)?;
    info!("RA-02 initialized");
    radio.deinit()
}

fn send(spidev: &str, payload: &[u8]) -> Result<(), Error> {
    let mut spi = SpiTransport::open(spidev)?;
    let mut radio = Ra02::init(&mut spi, StdDelay)?;
    radio.send(payload)?;
    radio.deinit()
}

fn recv(spidev: &str, timeout_ms: u64) -> Result<Vec<u8>, Error> {
    let mut spi = SpiTransport::open(spidev)?;
    let mut radio = Ra02::init(&mut spi, StdDelay)?;
    let payload = radio.recv(&Timeout::new(timeout_ms))?;
    if let Some(rssi) = radio.packet_rssi() {
        info!("Packet RSSI (raw): {}", rssi);
    }
    radio.deinit()?;
    Ok(payload.to_vec())
}

fn parse_bytes(args: &[String]) -> Option<Vec<u8>> {
    if args.len() > MAX_PAYLOAD {
        error!("At most {} bytes can be sent", MAX_PAYLOAD);
        return None;
    }
    args.iter()
        .map(|arg| {
            arg.parse::<u8>()
                .map_err(|e| error!("Invalid byte '{}': {}", arg, e))
                .ok()
        })
        .collect()
}

fn run(argv0: &str, spidev: &str, command: &str, rest: &[String]) -> Result<(), ExitCode> {
    let report = |context: &str, err: Error| {
        error!("{}: {} (code {})", context, err, err.code());
        if err.is_transient() {
            info!("The bus was busy, retrying may succeed");
        }
        ExitCode::from(err.code() as u8)
    };

    match command {
        "help" => usage(argv0),
        "spitest" => spitest(spidev).map_err(|e| report("SPI test failed", e))?,
        "init" => init(spidev).map_err(|e| report("Failed to initialize", e))?,
        "send" => {
            let payload = parse_bytes(rest).ok_or(ExitCode::FAILURE)?;
            send(spidev, &payload).map_err(|e| report("Failed to send packet", e))?;
            info!("Packet sent");
        }
        "recv" => {
            let [timeout] = rest else {
                error!("Expected TIMEOUT");
                usage(argv0);
                return Err(ExitCode::FAILURE);
            };
            let timeout_ms = timeout.parse::<u64>().map_err(|e| {
                error!("Invalid TIMEOUT '{}': {}", timeout, e);
                ExitCode::FAILURE
            })?;

            let payload = recv(spidev, timeout_ms).map_err(|e| report("ra02_recv", e))?;
            let hex: Vec<String> = payload.iter().map(|b| format!("{b:02x}")).collect();
            println!("[{}]: {}", payload.len(), hex.join(" "));
        }
        other => {
            error!("Unknown argument '{}'", other);
            usage(argv0);
            return Err(ExitCode::FAILURE);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let argv0 = args.first().map_or("ra02", String::as_str);

    if args.get(1).is_some_and(|arg| arg == "help") {
        usage(argv0);
        return ExitCode::SUCCESS;
    }

    let (Some(spidev), Some(command)) = (args.get(1), args.get(2)) else {
        error!("Insufficient arguments");
        usage(argv0);
        return ExitCode::FAILURE;
    };

    match run(argv0, spidev, command, &args[3..]) {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => code,
    }
}
