use std::io::{self, Write};
use std::time::Duration;

use mx10::raster::{rows_from_path, Dithering};
use mx10::{connect, scan, BleTransport, DeviceSession, Notification, SessionConfig, DEFAULT_DPI, DEFAULT_FEED_STEPS};
use tracing_subscriber::EnvFilter;

/// Example: interactive MX10 admin session
/// - Scans for BLE printers
/// - Lets user select device
/// - Runs commands (feed, retract, status, info, image, raw) from a menu
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("Scanning for BLE devices for 3 seconds...");
    let devices = scan(Duration::from_secs(3)).await?;
    if devices.is_empty() {
        println!("No devices found. Is the printer powered on and advertising?");
        return Ok(());
    }

    println!("Found devices:");
    for (i, d) in devices.iter().enumerate() {
        println!("  {}) {} name={:?} rssi={:?}", i + 1, d.address, d.name, d.rssi);
    }

    let chosen = loop {
        let line = prompt(&format!("Select device (1-{}): ", devices.len()))?;
        match line.parse::<usize>() {
            Ok(n) if (1..=devices.len()).contains(&n) => break &devices[n - 1],
            _ => println!("Invalid selection."),
        }
    };

    println!("Connecting to {} ...", chosen.address);
    let mut printer = match connect(SessionConfig::new(chosen.address.clone())).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect: {e}");
            return Ok(());
        }
    };
    printer.set_status_handler(print_notification);
    printer.get_status().await?;

    loop {
        let choice = prompt(
            "\n1) feed  2) retract  3) status  4) info  5) print image  6) raw  7) set dpi  q) quit: ",
        )?;
        let res = match choice.as_str() {
            "1" => printer.feed(read_steps()?).await,
            "2" => printer.retract(read_steps()?).await,
            "3" => printer.get_status().await,
            "4" => printer.get_info().await,
            "5" => print_image(&mut printer).await,
            "6" => send_raw(&mut printer).await,
            "7" => printer.set_dpi(DEFAULT_DPI).await,
            "q" => break,
            _ => {
                println!("Invalid selection.");
                continue;
            }
        };
        if let Err(e) = res {
            eprintln!("Command failed: {e}");
            if !printer.is_connected() {
                break;
            }
        }
    }

    if printer.is_connected() {
        printer.disconnect().await?;
    }
    Ok(())
}

fn prompt(msg: &str) -> io::Result<String> {
    print!("{msg}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Blank input keeps the default step count.
fn read_steps() -> io::Result<u16> {
    let line = prompt(&format!("Steps [{DEFAULT_FEED_STEPS}]: "))?;
    Ok(line.parse().unwrap_or(DEFAULT_FEED_STEPS))
}

fn print_notification(n: Notification) {
    match n {
        Notification::Status { status, frame } => println!(
            "RX status: paper {} | bytes {:02X} {:02X} {:02X} | crc {} | end 0x{:02X}",
            if status.paper_present { "OK" } else { "missing" },
            status.raw_byte0,
            status.raw_byte1,
            status.raw_byte2,
            if status.crc_valid { "ok" } else { "BAD" },
            frame.end_marker,
        ),
        Notification::Frame(frame) => println!(
            "RX cmd 0x{:02X}: {}",
            frame.command,
            hex::encode(&frame.payload)
        ),
        Notification::DecodeFailed { error, raw } => {
            println!("RX undecodable ({error}): {}", hex::encode(raw))
        }
    }
}

async fn print_image(printer: &mut DeviceSession<BleTransport>) -> mx10::Result<()> {
    let Ok(path) = prompt("Image path: ") else {
        return Ok(());
    };
    if path.is_empty() {
        return Ok(());
    }
    let rows = rows_from_path(&path, Dithering::FloydSteinberg)?;
    println!("Printing {} rows...", rows.len());
    printer.print_bitmap(&rows).await?;
    printer.get_status().await
}

async fn send_raw(printer: &mut DeviceSession<BleTransport>) -> mx10::Result<()> {
    let (cmd, payload) = loop {
        let Ok(cmd_hex) = prompt("CMD (hex): ") else {
            return Ok(());
        };
        let Ok(payload_hex) = prompt("Payload (hex): ") else {
            return Ok(());
        };
        let cmd = u8::from_str_radix(cmd_hex.trim_start_matches("0x"), 16);
        let payload = hex::decode(payload_hex.replace(' ', ""));
        match (cmd, payload) {
            (Ok(cmd), Ok(payload)) => break (cmd, payload),
            _ => println!("Invalid hex, try again."),
        }
    };
    printer.send_raw(cmd, &payload).await?;
    println!("Sent 0x{cmd:02X} {}", hex::encode(&payload));
    printer.get_status().await
}
