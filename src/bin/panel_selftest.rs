//! On-device panel test
//!
//! Runs the panel through its boot sequence and every overlay on the real
//! strip, checking the composited frame after each step.

#![no_std]
#![no_main]

use embassy_time::{Duration, Instant};
use esp_hal::clock::CpuClock;
use esp_hal::delay::Delay;
use esp_hal::gpio::Level;
use esp_hal::rmt::{Rmt, TxChannelCreator};
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use log::info;

use feeder_rs::Clock;
use feeder_rs::board::SystemTimer;
use feeder_rs::colour::Colour;
use feeder_rs::config::{GAUGE_DURATION_MS, PING_DURATION_MS, STRIP_LENGTH, TRANSIENT_SLOTS};
use feeder_rs::led_control::Sk6812Strip;
use feeder_rs::panel::{ActivitySink, Component, Panel, top_row_above};

// Add app descriptor for espflash compatibility
esp_bootloader_esp_idf::esp_app_desc!();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    esp_println::println!("❌ {}", info);
    loop {}
}

#[esp_hal::main]
fn main() -> ! {
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);
    esp_println::logger::init_logger(log::LevelFilter::Debug);

    let timer_group0 = TimerGroup::new(peripherals.TIMG0);
    esp_hal_embassy::init(timer_group0.timer0);

    let rmt = Rmt::new(peripherals.RMT, Rate::from_mhz(10)).unwrap();
    let tx_config = esp_hal::rmt::TxChannelConfig::default()
        .with_clk_divider(1)
        .with_idle_output_level(Level::Low)
        .with_idle_output(false)
        .with_carrier_modulation(false);
    let channel = rmt.channel0.configure(peripherals.GPIO4, tx_config).unwrap();

    let timer = SystemTimer::new();
    let delay = Delay::new();
    let mut panel = Panel::new(Sk6812Strip::new(channel), timer);

    info!("=== Panel self-test ===");

    info!("1. Boot sequence");
    panel.initialise().unwrap();
    assert_eq!(panel.node(Component::WifiStatus).position, 0);
    assert_eq!(panel.node(Component::Bluetooth).position, 2);
    assert!(panel.node(Component::Clock).enabled);
    info!("✅ Nodes laid out");

    info!("2. Clock sweep");
    let start = panel.node(Component::Clock).position;
    for _ in 0..10 {
        delay.delay_millis(110);
        panel.tick();
        panel.render().unwrap();
    }
    assert_ne!(panel.node(Component::Clock).position, start);
    info!(
        "✅ Clock moved {} -> {}",
        start,
        panel.node(Component::Clock).position
    );
    panel.disable(Component::Clock);

    info!("3. Activity ping");
    panel.enable(Component::Bluetooth);
    panel.activity(Component::Bluetooth, true);
    panel.render().unwrap();
    let ping_at = panel.node(Component::Bluetooth).position as usize + 1;
    assert_eq!(panel.pixels()[ping_at], Component::Bluetooth.colour());
    info!("✅ Ping at LED {}", ping_at);

    info!("4. Byte gauge");
    panel.data_transmission(Component::Bluetooth, 3);
    panel.render().unwrap();
    let top = top_row_above(panel.node(Component::Bluetooth).position as usize);
    for i in 0..3 {
        assert_eq!(panel.pixels()[top - i], Component::Bluetooth.colour());
    }
    info!("✅ Gauge from LED {} down", top);

    info!("5. Expiry");
    delay.delay_millis((PING_DURATION_MS.max(GAUGE_DURATION_MS) + 50) as u32);
    panel.render().unwrap();
    assert_eq!(panel.commands().active_transient(timer.now()), 0);
    assert_eq!(panel.pixels()[ping_at], panel.background());
    info!("✅ Overlays expired");

    info!("6. Slot exhaustion");
    for _ in 0..TRANSIENT_SLOTS {
        panel.activity(Component::Error, true);
    }
    assert!(panel.allocate_slot().is_err());
    let deadline = Instant::now() + Duration::from_millis(PING_DURATION_MS);
    while Instant::now() < deadline {
        panel.render().unwrap();
        delay.delay_millis(33);
    }
    assert!(panel.allocate_slot().is_ok());
    info!("✅ Buffer recovered after expiry");

    info!("7. Colour sweep");
    for (i, colour) in [Colour::RED, Colour::GREEN, Colour::BLUE, Colour::WHITE]
        .into_iter()
        .enumerate()
    {
        panel.show_progress(colour, Colour::BLACK, i + 1, 4).unwrap();
        delay.delay_millis(250);
    }
    panel.set_background(Colour::BLACK);
    panel.render().unwrap();
    let bluetooth_at = panel.node(Component::Bluetooth).position as usize;
    for (i, pixel) in panel.pixels().iter().enumerate().take(STRIP_LENGTH) {
        let expected = if i == bluetooth_at {
            Component::Bluetooth.colour()
        } else {
            Colour::BLACK
        };
        assert_eq!(*pixel, expected);
    }
    info!("✅ Only the Bluetooth node remains lit");

    info!("=== All panel checks passed ===");
    loop {
        delay.delay_millis(1000);
    }
}
