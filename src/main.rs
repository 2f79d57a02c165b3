use anyhow::{Context, Result};
use bt_device_manager::application::{BluetoothService, ServiceConfig};
use bt_device_manager::domain::events::DeviceEvent;
use bt_device_manager::domain::models::{BluetoothAddress, BluetoothDeviceRecord};
use bt_device_manager::domain::settings::SettingsService;
use bt_device_manager::infrastructure::logging;
use bt_device_manager::infrastructure::native::PlatformBackends;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "bt-device-manager")]
#[command(about = "Inspect and control paired Bluetooth devices")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Settings file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Seconds to let initial discovery settle before answering
    #[arg(long, default_value_t = 3)]
    settle: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream device events until Ctrl-C
    Watch,
    /// List known devices
    List {
        /// Only audio-capable devices
        #[arg(long)]
        audio: bool,
        /// Only connected devices
        #[arg(long)]
        connected: bool,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List Bluetooth audio endpoints
    Endpoints,
    /// Ask the audio stack to connect a device
    Connect { device: String },
    /// Ask the audio stack to disconnect a device
    Disconnect { device: String },
    /// Read the battery level of a device
    Battery { device: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => SettingsService::load(path.clone()),
        None => SettingsService::new()?,
    };
    if cli.debug {
        settings.get_mut().log_settings.level = "debug".to_string();
    }

    let _logging_guard = logging::init_logger(&settings.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting Bluetooth device manager");

    let backends = PlatformBackends::native().context("Native Bluetooth backends unavailable")?;
    let service = BluetoothService::new(backends, ServiceConfig::from(settings.get()));

    let result = run(&service, &cli).await;
    service.shutdown().await;
    result
}

async fn run(service: &BluetoothService, cli: &Cli) -> Result<()> {
    let settle = Duration::from_secs(cli.settle);

    match cli.command.as_ref() {
        None | Some(Commands::Watch) => watch(service).await,
        Some(Commands::List { audio, connected, json }) => {
            service.start();
            tokio::time::sleep(settle).await;

            let devices: Vec<_> = service
                .list()
                .into_iter()
                .filter(|d| !audio || d.audio_capable)
                .filter(|d| !connected || d.connected)
                .collect();

            if *json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else {
                for device in &devices {
                    print_device(device);
                }
            }
            Ok(())
        }
        Some(Commands::Endpoints) => {
            for endpoint in service.audio_endpoints().await {
                println!(
                    "{:<40} {:<8} {:<10} {}",
                    endpoint.friendly_name,
                    if endpoint.connected { "active" } else { "inactive" },
                    endpoint.codec.map(|c| c.to_string()).unwrap_or_default(),
                    endpoint.connected_device_id
                );
            }
            Ok(())
        }
        Some(Commands::Connect { device }) => {
            let device = resolve(service, device, settle).await?;
            report("Connect", &device, service.connect(&device.id).await)
        }
        Some(Commands::Disconnect { device }) => {
            let device = resolve(service, device, settle).await?;
            report("Disconnect", &device, service.disconnect(&device.id).await)
        }
        Some(Commands::Battery { device }) => {
            let device = resolve(service, device, settle).await?;
            match service.read_battery(&device.id).await {
                Some(level) => println!("{}: {}%", device.name, level),
                None => println!("{}: battery level unknown", device.name),
            }
            Ok(())
        }
    }
}

async fn watch(service: &BluetoothService) -> Result<()> {
    let mut events = service.subscribe();
    service.start();
    println!("Watching for device events, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
        }
    }
    Ok(())
}

/// Find a device by platform id or MAC address once discovery has settled.
async fn resolve(service: &BluetoothService, query: &str, settle: Duration) -> Result<BluetoothDeviceRecord> {
    service.start();
    tokio::time::sleep(settle).await;

    if let Some(device) = service.get(query) {
        return Ok(device);
    }
    BluetoothAddress::parse(query)
        .ok()
        .and_then(|address| service.find_by_address(address))
        .with_context(|| format!("No paired device matches '{}'", query))
}

fn report(action: &str, device: &BluetoothDeviceRecord, ok: bool) -> Result<()> {
    if ok {
        println!("{} request accepted for {}", action, device.name);
        Ok(())
    } else {
        anyhow::bail!("{} failed for {}", action, device.name)
    }
}

fn print_device(device: &BluetoothDeviceRecord) {
    println!(
        "{:<32} {:<17} {:<10} {:<10} {:<4} {:<9} {}",
        device.name,
        device.mac_address(),
        format!("{:?}", device.category),
        format!("{:?}", device.device_type),
        device.battery_level.map(|l| format!("{}%", l)).unwrap_or_else(|| "-".into()),
        if device.connected { "connected" } else { "" },
        device.codec.map(|c| c.to_string()).unwrap_or_default(),
    );
}

fn print_event(event: &DeviceEvent) {
    match event {
        DeviceEvent::Discovered { name, address, connected, .. } => {
            println!("+ {} ({}){}", name, address, if *connected { " connected" } else { "" })
        }
        DeviceEvent::Removed { name, .. } => println!("- {}", name),
        DeviceEvent::ConnectionChanged { name, connected, .. } => {
            println!("~ {} {}", name, if *connected { "connected" } else { "disconnected" })
        }
        DeviceEvent::BatteryChanged { name, old_level, new_level, .. } => {
            println!("~ {} battery {:?} -> {:?}", name, old_level, new_level)
        }
        DeviceEvent::Refreshed { .. } => println!("* device list refreshed"),
    }
}
