//! CAN Monitor Example
//!
//! Opens the first Kvaser device, prints what the firmware reports about it
//! and then prints every received frame until interrupted:
//!
//! 1. Scan and open the device
//! 2. Initialize channel 0 (device information, clock and transmit limits)
//! 3. Set the bit timing and go bus on
//! 4. Print frames, chip state changes and bus load once a second

use std::time::{Duration, Instant};

use kvaser_usb::{
    BusParams, ChannelConfig, ChannelController, KvaserError, OpMode, RusbTransport, CANMODE_ERR,
};

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_device(channel: &ChannelController<RusbTransport>) {
    let card = channel.card_info();
    let software = channel.software_info();
    println!("=== {} ===", channel.product().name);
    println!("Serial number: {}", card.serial_number);
    println!("EAN: {}", card.ean_string());
    println!("Firmware: {}", software.version_string());
    println!("Transceiver: {}", channel.transceiver_info().name());
    println!(
        "CAN clock: {} MHz, timer: {} MHz",
        channel.can_clock(),
        channel.timer_freq()
    );
    println!("Max outstanding tx: {}", channel.max_outstanding_tx());
    println!("Operation modes: {}", channel.op_capability());
    println!();
}

fn run() -> kvaser_usb::Result<()> {
    let devices = kvaser_usb::scan()?;
    let Some(device) = devices.first() else {
        println!("Can not find Kvaser device");
        return Ok(());
    };
    println!("Found device: {}", device);

    let transport = device.open()?;
    let mut channel =
        ChannelController::configure(transport, device.product(), 0, ChannelConfig::default())?;

    // Error frames only where the product reports them
    let mut mode = OpMode::DEFAULT;
    if channel.op_capability().contains(CANMODE_ERR) {
        mode = mode | CANMODE_ERR;
    }
    channel.initialize(mode)?;
    print_device(&channel);

    channel.set_bus_params(&BusParams::new(500_000, 13, 2, 1))?;
    channel.start_chip()?;
    println!("Bus on at 500 kbit/s (press Ctrl+C to stop)...\n");

    let mut bus_off = false;
    let mut next_report = Instant::now() + Duration::from_secs(1);
    loop {
        match channel.read_message(Some(Duration::from_millis(100))) {
            Ok(frame) => println!("RX  {}", frame),
            Err(KvaserError::Empty) => {}
            Err(e) => {
                eprintln!("Read error: {}", e);
                break;
            }
        }

        let state = channel.event_data().chip_state;
        if state.is_bus_off() != bus_off {
            bus_off = state.is_bus_off();
            println!(
                "Bus {} (tx errors {}, rx errors {})",
                if bus_off { "off" } else { "on" },
                state.tx_errors,
                state.rx_errors
            );
        }

        if Instant::now() >= next_report {
            next_report = Instant::now() + Duration::from_secs(1);
            match channel.get_bus_load() {
                Ok(load) => println!("Bus load: {:.1}%", load.percent()),
                Err(e) => eprintln!("Bus load: {}", e),
            }
            if channel.queue_overflow() {
                println!("Receive queue overflow: {} frames lost", channel.statistics().queue_dropped);
            }
        }
    }

    channel.teardown()
}
