use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use engine_cli::{device, scenarios};
use engine_core::{AcquireFrameEvent, Engine, EngineConfig};
use engine_types::{DataCoordinates, MockDetector};

/// Demonstration binary for the execution engine: runs the documented
/// scenarios against a mock stage device and an in-memory data pipeline.
#[derive(Debug, Parser)]
#[command(name = "engine-cli", version, about)]
struct Cli {
    /// Only run the named scenario (s1..s6); defaults to running all of them.
    #[arg(long)]
    scenario: Option<String>,

    /// Worker name new submissions fall back to when nothing else applies.
    #[arg(long, default_value = "main")]
    default_worker_name: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let engine: Arc<Engine<Vec<u8>, serde_json::Value>> = Engine::new(EngineConfig {
        default_worker_name: cli.default_worker_name,
        ..EngineConfig::default()
    });

    let stage = Arc::new(device::Stage::new());
    engine.register_device("stage-1")?;
    let proxy = engine_core::DeviceProxy::new(Arc::clone(&stage), Arc::clone(&engine));
    proxy.call_method("move_to", serde_json::json!({"position_um": 12.5}), None)?;
    let position = proxy.get_attribute("position_um")?;
    tracing::info!(%position, "stage homed through its proxy");

    engine.install_data_handler(None, None);
    let detector = Arc::new(MockDetector::new(vec![(vec![0u8, 1, 2], serde_json::json!({"frame": 0}))]));
    detector.arm(Some(1));
    let acquire = AcquireFrameEvent::new(detector, DataCoordinates::new([("frame", 0i64)]), Some(Duration::from_secs(1)));
    let acquired = engine.submit(Box::new(acquire), None, false)?.await_execution(Some(Duration::from_secs(5)))?;
    tracing::info!(%acquired, "mock detector frame acquired through a built-in event");

    let scenarios: Vec<(&str, fn(&Arc<Engine<Vec<u8>, serde_json::Value>>) -> anyhow::Result<()>)> = vec![
        ("s1", scenarios::s1_simple_submit),
        ("s2", scenarios::s2_priority),
        ("s3", scenarios::s3_free_thread),
        ("s4", scenarios::s4_retry),
        ("s5", scenarios::s5_subscribe_by_type),
        ("s6", scenarios::s6_data_pipeline),
    ];

    for (name, run) in scenarios {
        if let Some(only) = &cli.scenario {
            if only != name {
                continue;
            }
        }
        tracing::info!(scenario = name, "running");
        run(&engine)?;
    }

    engine.shutdown();
    Ok(())
}
