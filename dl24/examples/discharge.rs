//! Discharge test example
//!
//! Runs a 0.5 A discharge to 3.0 V against a DL24P reachable through a
//! serial-TCP bridge (set `DL24_ADDR`), recording into memory.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::sleep;

use dl24::{Device, MemoryRecorder, ProfileKind, TestProfile, TestRunner};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let addr = std::env::var("DL24_ADDR").unwrap_or_else(|_| "192.168.1.50:8880".to_string());

    let device = Device::broadcast();
    let stream = TcpStream::connect(&addr).await?;
    device.connect(Box::new(stream)).await?;

    println!("Device connected!");

    let recorder = Arc::new(MemoryRecorder::new());
    let runner = TestRunner::new(device.clone(), recorder.clone());

    runner.set_progress_callback(|progress| {
        println!(
            "[{}] {} ({}s)",
            progress.state, progress.message, progress.elapsed_seconds
        );
    });

    let profile = TestProfile {
        name: "capacity check".into(),
        description: "0.5A discharge to 3.0V".into(),
        kind: ProfileKind::Discharge {
            current_a: 0.5,
            voltage_cutoff: 3.0,
            max_duration_s: Some(4 * 3600),
        },
    };

    if !runner.start(profile, "cell-001", "example run") {
        eprintln!("Could not start the test");
        return Ok(());
    }

    while runner.state().is_active() {
        sleep(Duration::from_secs(1)).await;
    }

    println!("Final state: {}", runner.state());
    for session in recorder.sessions() {
        println!(
            "Session {}: {} readings, finished {:?}",
            session.id,
            session.readings.len(),
            session.end_time
        );
    }

    device.disconnect().await;

    Ok(())
}
