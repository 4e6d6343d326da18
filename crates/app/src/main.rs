use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;

use noisewatch_audio::{
    CaptureConfig, CpalBackend, DeviceManager, SamplingSession, SessionConfig, SessionEvent,
};
use noisewatch_foundation::SessionError;
use noisewatch_level::constants;

#[derive(Parser)]
#[command(name = "noisewatch")]
#[command(version)]
#[command(about = "Ambient noise level meter with a threshold alert")]
struct Cli {
    /// Audio input device name (exact match); host default when omitted
    #[arg(short = 'D', long)]
    device: Option<String>,

    /// Alert threshold on the 0-100 display scale
    #[arg(short = 't', long, default_value_t = constants::THRESHOLD_DB)]
    threshold: f32,

    /// Stop after this many seconds; run until Ctrl-C when omitted
    #[arg(short = 'd', long)]
    duration: Option<u64>,

    /// List available input devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all("logs")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "noisewatch.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    // the meter owns stdout; logs go to stderr and the rolling file
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr.and(non_blocking_file))
        .with_env_filter(log_level)
        .init();
    std::mem::forget(guard);
    Ok(())
}

/// Stand-in for the platform permission broker. Desktop hosts grant
/// microphone access implicitly, so this reports granted unless denial is
/// forced via NOISEWATCH_FORCE_MIC_DENIED for testing the refusal path.
fn microphone_permission_granted() -> bool {
    !std::env::var("NOISEWATCH_FORCE_MIC_DENIED")
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false)
}

const METER_WIDTH: usize = 40;

fn render_reading(db: f32, alert: bool) {
    let filled = (((db / 100.0) * METER_WIDTH as f32).round() as usize).min(METER_WIDTH);
    let meter: String = "#".repeat(filled) + &"-".repeat(METER_WIDTH - filled);
    println!(
        "{:5.1} dB [{}]{}",
        db,
        meter,
        if alert { "  ALERT" } else { "" }
    );
}

fn list_devices() -> anyhow::Result<()> {
    let manager =
        DeviceManager::new().map_err(|e| anyhow::anyhow!("audio host unavailable: {}", e))?;
    let devices = manager.enumerate_devices();
    if devices.is_empty() {
        println!("no input devices found");
        return Ok(());
    }
    for device in devices {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("{}{}", device.name, marker);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging().map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;
    let cli = Cli::parse();

    if cli.list_devices {
        return list_devices();
    }

    let config = SessionConfig {
        capture: CaptureConfig {
            device: cli.device.clone(),
            ..CaptureConfig::default()
        },
        threshold_db: cli.threshold,
        ..SessionConfig::default()
    };

    let (event_tx, mut event_rx) = mpsc::channel::<SessionEvent>(100);
    let session = SamplingSession::start(
        Box::new(CpalBackend::new()),
        config,
        microphone_permission_granted(),
        event_tx,
    )
    .map_err(|e| anyhow::anyhow!("could not start sampling: {}", e))?;

    tracing::info!(
        threshold_db = cli.threshold,
        "noisewatch started; press Ctrl-C to stop"
    );

    let timeout = async {
        match cli.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(timeout);

    let mut was_alerting = false;
    let mut failed = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received; stopping");
                break;
            }
            _ = &mut timeout => {
                tracing::info!("duration elapsed; stopping");
                break;
            }
            event = event_rx.recv() => match event {
                Some(SessionEvent::Reading { db, alert }) => {
                    render_reading(db, alert);
                    if alert && !was_alerting {
                        println!("WARNING: noise level exceeds {:.0} dB", cli.threshold);
                    }
                    was_alerting = alert;
                }
                Some(SessionEvent::Error(err)) => {
                    eprintln!("recording stopped: {}", err);
                    if matches!(err, SessionError::PermissionDenied) {
                        eprintln!("grant microphone access and try again");
                    }
                    failed = true;
                    break;
                }
                None => break,
            },
        }
    }

    // join off the runtime: stop blocks until the device is released
    tokio::task::spawn_blocking(move || {
        let mut session = session;
        session.stop();
    })
    .await?;

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
