fn main() {
    // Load .env file for board configuration
    load_env_config();

    // Host builds (unit tests, integration tests) link with the default toolchain setup.
    if std::env::var("CARGO_CFG_TARGET_ARCH").as_deref() != Ok("riscv32") {
        return;
    }

    linker_be_nice();
    // make sure linkall.x is the last linker script (otherwise might cause problems with flip-link)
    println!("cargo:rustc-link-arg=-Tlinkall.x");
}

const DEFAULT_BOARD_NAME: &str = "CatFeeder";
const DEFAULT_BLE_BAUD: &str = "9600";

/// Load environment configuration from .env file
/// Environment variables take priority over .env file values
fn load_env_config() {
    use std::env;
    use std::path::Path;

    // Tell cargo to rerun this build script if .env file changes
    println!("cargo:rerun-if-changed=.env");

    // Tell cargo to rerun if environment variables change
    println!("cargo:rerun-if-env-changed=FEEDER_BOARD_NAME");
    println!("cargo:rerun-if-env-changed=FEEDER_BLE_BAUD");

    // Try to load .env file if it exists
    if Path::new(".env").exists() {
        match dotenvy::dotenv() {
            Ok(_) => println!("cargo:warning=Loaded .env file"),
            Err(e) => println!("cargo:warning=Failed to load .env file: {}", e),
        }
    }

    let board_name = env::var("FEEDER_BOARD_NAME")
        .map(|name| name.trim().to_string())
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_BOARD_NAME.to_string());

    // The module only accepts names of up to 20 characters.
    let board_name = if board_name.len() > 20 {
        println!("cargo:warning=FEEDER_BOARD_NAME longer than 20 characters, truncating");
        board_name.chars().take(20).collect()
    } else {
        board_name
    };

    let ble_baud = env::var("FEEDER_BLE_BAUD")
        .map(|baud| baud.trim().to_string())
        .ok()
        .filter(|baud| !baud.is_empty())
        .unwrap_or_else(|| DEFAULT_BLE_BAUD.to_string());

    let ble_baud = if ble_baud.parse::<u32>().is_ok() {
        ble_baud
    } else {
        println!(
            "cargo:warning=FEEDER_BLE_BAUD '{}' is not a number, using {}",
            ble_baud, DEFAULT_BLE_BAUD
        );
        DEFAULT_BLE_BAUD.to_string()
    };

    // Set environment variables for the compilation
    println!("cargo:rustc-env=FEEDER_BOARD_NAME={}", board_name);
    println!("cargo:rustc-env=FEEDER_BLE_BAUD={}", ble_baud);
}

fn linker_be_nice() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        let kind = &args[1];
        let what = &args[2];

        match kind.as_str() {
            "undefined-symbol" => match what.as_str() {
                "_defmt_timestamp" => {
                    eprintln!();
                    eprintln!("💡 `defmt` not found - make sure `defmt.x` is added as a linker script and you have included `use defmt_rtt as _;`");
                    eprintln!();
                }
                "_stack_start" => {
                    eprintln!();
                    eprintln!("💡 Is the linker script `linkall.x` missing?");
                    eprintln!();
                }
                "_embassy_time_now" | "_embassy_time_schedule_wake" => {
                    eprintln!();
                    eprintln!("💡 No embassy time driver linked - make sure `esp_hal_embassy::init` is called from the firmware binary");
                    eprintln!();
                }
                _ => (),
            },
            // we don't have anything helpful for "missing-lib" yet
            _ => {
                std::process::exit(1);
            }
        }

        std::process::exit(0);
    }

    println!(
        "cargo:rustc-link-arg=--error-handling-script={}",
        std::env::current_exe().unwrap().display()
    );
}
