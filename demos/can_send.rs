//! CAN Send Example
//!
//! Sends a rotating set of frames once a second from channel 0 of the first
//! Kvaser device, waiting for each acknowledgment. CAN FD frames are added on
//! devices that support them.

use std::thread;
use std::time::Duration;

use kvaser_usb::{
    BusParams, BusParamsFd, CanFrame, ChannelConfig, ChannelController, KvaserError, OpMode,
    CANMODE_BRSE, CANMODE_FDOE,
};

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> kvaser_usb::Result<()> {
    let (transport, product) = match kvaser_usb::open(0) {
        Ok(found) => found,
        Err(KvaserError::DeviceNotFound) => {
            println!("Can not find Kvaser device");
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    println!("Opened {}", product.name);

    let mut channel = ChannelController::configure(transport, product, 0, ChannelConfig::default())?;
    let fd = product.can_fd;
    let mode = if fd {
        OpMode(CANMODE_FDOE | CANMODE_BRSE)
    } else {
        OpMode::DEFAULT
    };
    channel.initialize(mode)?;

    let nominal = BusParams::new(500_000, 13, 2, 1);
    if fd {
        // 2 Mbit/s data phase
        channel.set_bus_params_fd(&BusParamsFd {
            nominal,
            data: BusParams::new(2_000_000, 15, 4, 4),
            can_fd: true,
        })?;
    } else {
        channel.set_bus_params(&nominal)?;
    }
    channel.start_chip()?;

    let data: [u8; 8] = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0];
    let mut frames = vec![
        // Standard frame format with data
        CanFrame::with_data(0x7FF, &data),
        // Standard frame format without data
        CanFrame::with_data(0x7FF, &[]),
        // Extended frame format with data
        CanFrame::with_extended_data(0x1234_5678, &data),
        // Remote transmission request
        CanFrame::remote(0x7FF, 8),
    ];
    if fd {
        let payload: Vec<u8> = (0..64).collect();
        frames.push(CanFrame::with_fd_data(0x123, &payload, false));
        frames.push(CanFrame::with_fd_data(0x123, &payload[..12], true));
    }

    println!("Sending one frame per second (press Ctrl+C to stop)...\n");
    for frame in frames.iter().cycle() {
        match channel.send_message(frame, Duration::from_millis(500)) {
            Ok(()) => println!("TX  {}", frame),
            Err(KvaserError::Busy { outstanding }) => {
                eprintln!("Transmitter busy ({} pending)", outstanding)
            }
            Err(e) => eprintln!("Send error: {}", e),
        }
        thread::sleep(Duration::from_secs(1));
    }

    Ok(())
}
