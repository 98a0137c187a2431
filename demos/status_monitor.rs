use std::time::Duration;

use mx10::{connect, Notification, SessionConfig};
use tracing_subscriber::EnvFilter;

const POLLS: usize = 15;
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Example: poll printer status every 2 seconds for 30 seconds
/// - Address from argv[1] or MX10_ADDRESS
/// - Prints each decoded notification
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let Some(address) = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("MX10_ADDRESS").ok())
    else {
        eprintln!("usage: status_monitor <address>  (or set MX10_ADDRESS)");
        return Ok(());
    };

    println!("Connecting to {address} ...");
    let mut printer = connect(SessionConfig::new(address)).await?;
    printer.set_status_handler(|n: Notification| match n {
        Notification::Status { status, .. } => println!(
            "paper: {}  byte1: {}  byte2: 0x{:02X}  crc: {}",
            if status.paper_present { "OK" } else { "missing" },
            status.raw_byte1,
            status.raw_byte2,
            if status.crc_valid { "ok" } else { "BAD" },
        ),
        Notification::Frame(frame) => println!(
            "cmd 0x{:02X} type 0x{:02X}: {}",
            frame.command,
            frame.type_byte,
            hex::encode(&frame.payload)
        ),
        Notification::DecodeFailed { error, raw } => {
            eprintln!("undecodable notification ({error}): {}", hex::encode(raw))
        }
    });

    for i in 0..POLLS {
        println!("Query {}/{POLLS}", i + 1);
        if let Err(e) = printer.get_status().await {
            eprintln!("Failed to request status: {e}");
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    printer.disconnect().await?;
    println!("Monitoring finished.");
    Ok(())
}
