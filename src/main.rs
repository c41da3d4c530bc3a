#![no_std]
#![no_main]

use core::cell::RefCell;
use embassy_time::{Duration, Instant, Ticker};
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig};
use esp_hal::rmt::{Rmt, TxChannelCreator};
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::uart::{Config as UartConfig, Uart};
use esp_hal_embassy::Executor;
use log::{error, info, warn};
use static_cell::StaticCell;

// Import our library modules
use feeder_rs::ble_handler::BleHandler;
use feeder_rs::board::{BleUart, SystemTimer};
use feeder_rs::config;
use feeder_rs::led_control::Sk6812Strip;
use feeder_rs::panel::{ActivitySink, Component, Panel};
use feeder_rs::role::Role;

// Add app descriptor for espflash compatibility
esp_bootloader_esp_idf::esp_app_desc!();

type StripChannel = esp_hal::rmt::Channel<esp_hal::Blocking, 0>;
type FeederPanel = Panel<Sk6812Strip<StripChannel>, SystemTimer>;
type FeederBle = BleHandler<
    BleUart,
    SystemTimer,
    &'static RefCell<FeederPanel>,
    Output<'static>,
    Input<'static>,
>;

static PANEL_CELL: StaticCell<RefCell<FeederPanel>> = StaticCell::new();
static EXECUTOR: StaticCell<Executor> = StaticCell::new();

#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    loop {}
}

/// Bring the module up: probe the baud, name it, learn its role
fn start_ble(ble: &mut FeederBle) {
    ble.init();
    ble.enable();

    match ble.detect_baud_rate() {
        Some(baud) => info!("[MAIN] BLE module found at {} baud", baud),
        None => {
            error!("[MAIN] BLE module not responding, continuing without it");
            return;
        }
    }

    if !ble.set_name(config::BOARD_NAME) {
        warn!("[MAIN] Could not name BLE module '{}'", config::BOARD_NAME);
    }
    if ble.get_role() != Role::Central && !ble.set_role(Role::Central) {
        warn!("[MAIN] BLE module stays in {:?} role", ble.role());
    }
    ble.log_status();
}

/// Single cooperative pass: protocol work, then one display frame
#[embassy_executor::task]
async fn scheduler_task(
    panel: &'static RefCell<FeederPanel>,
    mut ble: FeederBle,
    mut heartbeat: Output<'static>,
) -> ! {
    info!("[MAIN] Scheduler running every {} ms", config::FRAME_INTERVAL_MS);

    let mut ticker = Ticker::every(Duration::from_millis(config::FRAME_INTERVAL_MS));
    let scan_interval = Duration::from_millis(config::SCAN_INTERVAL_MS);
    let heartbeat_interval = Duration::from_millis(config::HEARTBEAT_INTERVAL_MS);
    let mut last_scan = Instant::now();
    let mut last_heartbeat = Instant::now();
    let mut rx = [0u8; 64];

    loop {
        let now = Instant::now();

        if now.duration_since(last_heartbeat) >= heartbeat_interval {
            heartbeat.toggle();
            last_heartbeat = now;

            if ble.is_connected() {
                let received = ble.receive(&mut rx);
                if received > 0 {
                    info!("[MAIN] {} bytes from peer", received);
                }
            }
        }

        if now.duration_since(last_scan) >= scan_interval {
            if ble.start_scan(config::SCAN_DURATION_MS) {
                info!("[MAIN] {} devices nearby", ble.device_count());
            }
            // the scan blocks, measure the next interval from its end
            last_scan = Instant::now();
        }

        {
            let mut panel = panel.borrow_mut();
            panel.tick();
            if let Err(e) = panel.render() {
                error!("[MAIN] Frame dropped: {}", e);
            }
        }

        ticker.next().await;
    }
}

#[esp_hal::main]
fn main() -> ! {
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_println::logger::init_logger(log::LevelFilter::Info);
    info!("[MAIN] Feeder firmware {}", feeder_rs::VERSION);

    // Initialize embassy time system
    let timer_group0 = TimerGroup::new(peripherals.TIMG0);
    esp_hal_embassy::init(timer_group0.timer0);

    // Initialize RMT peripheral at 10MHz for SK6812 timing
    info!(
        "[MAIN] Setting up GPIO pin {} for LED data...",
        config::LED_DATA_PIN
    );
    let rmt = match Rmt::new(peripherals.RMT, Rate::from_mhz(10)) {
        Ok(rmt) => rmt,
        Err(e) => {
            error!("[MAIN] Failed to initialize RMT: {:?}", e);
            panic!("RMT initialization failed");
        }
    };
    let tx_config = esp_hal::rmt::TxChannelConfig::default()
        .with_clk_divider(1)
        .with_idle_output_level(Level::Low)
        .with_idle_output(false)
        .with_carrier_modulation(false);
    let rmt_channel = match rmt.channel0.configure(peripherals.GPIO4, tx_config) {
        Ok(channel) => channel,
        Err(e) => {
            error!("[MAIN] Failed to configure RMT channel: {:?}", e);
            panic!("RMT channel configuration failed");
        }
    };

    let timer = SystemTimer::new();
    let panel: &'static RefCell<FeederPanel> = PANEL_CELL.init(RefCell::new(Panel::new(
        Sk6812Strip::new(rmt_channel),
        timer,
    )));
    if let Err(e) = panel.borrow_mut().initialise() {
        error!("[MAIN] Panel boot sequence failed: {}", e);
    }
    panel.borrow().log_commands();

    // BLE module on UART1
    info!(
        "[MAIN] BLE on RX {} / TX {}, EN {}, STATE {}",
        config::BLE_RX_PIN,
        config::BLE_TX_PIN,
        config::BLE_EN_PIN,
        config::BLE_STATE_PIN
    );
    let uart = match Uart::new(
        peripherals.UART1,
        UartConfig::default().with_baudrate(config::BLE_BAUD),
    ) {
        Ok(uart) => uart
            .with_rx(peripherals.GPIO20)
            .with_tx(peripherals.GPIO21),
        Err(e) => {
            error!("[MAIN] Failed to configure UART: {:?}", e);
            panic!("UART initialization failed");
        }
    };
    let enable_pin = Output::new(peripherals.GPIO5, Level::Low, OutputConfig::default());
    let state_pin = Input::new(peripherals.GPIO6, InputConfig::default());

    let mut ble = BleHandler::new(
        BleUart::new(uart),
        timer,
        panel,
        enable_pin,
        state_pin,
        config::BLE_BAUD,
    );
    start_ble(&mut ble);

    panel.borrow_mut().enable(Component::Clock);

    let heartbeat = Output::new(peripherals.GPIO8, Level::Low, OutputConfig::default());

    // Initialize embassy executor and run tasks
    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        info!("[MAIN] Spawning scheduler task...");
        match spawner.spawn(scheduler_task(panel, ble, heartbeat)) {
            Ok(_) => info!("[MAIN] Scheduler task spawned"),
            Err(e) => error!("[MAIN] Failed to spawn scheduler task: {:?}", e),
        }
    });
}
