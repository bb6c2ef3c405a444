//! BLE probe for the camsim camera simulator
//!
//! Finds the simulated camera and drives it like the camera app does.

use btleplug::api::Peripheral as _;
use camsim_probe::{client, hex, parse_uuid, printable};
use camsim_proto::ble;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "camsim-probe")]
#[command(about = "BLE client for the camsim camera simulator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby devices
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Write a text command to a characteristic
    Send {
        /// Device name or address to connect to
        #[arg(short, long)]
        device: Option<String>,
        #[arg(short, long, default_value = ble::SERVICE_2_UUID)]
        service: String,
        #[arg(short, long, default_value = ble::CHARACTERISTIC_2_3_UUID)]
        characteristic: String,
        command: String,
    },
    /// Read a characteristic
    Read {
        #[arg(short, long)]
        device: Option<String>,
        #[arg(short, long, default_value = ble::CHARACTERISTIC_2_4_UUID)]
        characteristic: String,
    },
    /// Print notifications from a characteristic
    Listen {
        #[arg(short, long)]
        device: Option<String>,
        #[arg(short, long, default_value = ble::CHARACTERISTIC_2_4_UUID)]
        characteristic: String,
        /// Stop after this many notifications
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let adapter = client::get_adapter().await?;

    match cli.command {
        Commands::Scan { duration } => {
            println!("Scanning for devices ({duration} seconds)...");
            let devices = client::scan(&adapter, duration).await?;
            println!("\nFound {} devices:", devices.len());
            for d in devices {
                let rssi = d.rssi.map(|r| format!("{r} dBm")).unwrap_or_else(|| "N/A".to_string());
                let marker = if d.is_camera { " [CAMERA]" } else { "" };
                println!("  {} ({}) RSSI: {}{}", d.name, d.address, rssi, marker);
            }
        }
        Commands::Send {
            device,
            service,
            characteristic,
            command,
        } => {
            let (service, characteristic) = (parse_uuid(&service)?, parse_uuid(&characteristic)?);
            let peripheral = client::connect(&adapter, device.as_deref()).await?;
            client::send(&peripheral, service, characteristic, &command).await?;
            println!("Sent {command:?} to {characteristic}");
            let _ = peripheral.disconnect().await;
        }
        Commands::Read { device, characteristic } => {
            let characteristic = parse_uuid(&characteristic)?;
            let peripheral = client::connect(&adapter, device.as_deref()).await?;
            let value = client::read(&peripheral, characteristic).await?;
            println!("{}  [{}]", printable(&value), hex(&value));
            let _ = peripheral.disconnect().await;
        }
        Commands::Listen {
            device,
            characteristic,
            count,
        } => {
            let characteristic = parse_uuid(&characteristic)?;
            let peripheral = client::connect(&adapter, device.as_deref()).await?;
            println!("Listening on {characteristic}...");
            client::listen(&peripheral, characteristic, count, |value| {
                println!("{}  [{}]", printable(value), hex(value));
            })
            .await?;
            let _ = peripheral.disconnect().await;
        }
    }

    Ok(())
}
