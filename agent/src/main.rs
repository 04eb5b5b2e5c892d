use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent::config::load_config;
use agent::connectivity::{wait_for_connectivity, HostConnectivity};
use agent::controller::Controller;
use agent::status::{self, ConsoleDisplay, StatusDisplay};
use agent::trigger::build_trigger;
use anyhow::{Context, Result};
use audio::CpalPeripheral;
use upload_protocol::TcpConnector;

fn main() -> Result<()> {
    env_logger::init();

    let config = load_config().context("Failed to load configuration")?;
    log::info!("🚀 Starting push-to-talk agent, server at {}", config.endpoint);

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            log::info!("🛑 Shutdown requested");
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("Failed to install Ctrl-C handler")?;
    }

    let mut display = ConsoleDisplay::new();
    let mut connectivity = HostConnectivity::for_endpoint(&config.endpoint);
    if !wait_for_connectivity(
        &mut connectivity,
        &mut display,
        &shutdown,
        Duration::from_millis(500),
    ) {
        return Ok(());
    }

    let trigger = build_trigger(&config.trigger).context("Failed to set up trigger")?;
    let peripheral = CpalPeripheral::new(config.capture.clone(), config.playback.clone());
    let connector = TcpConnector::new(config.connector.clone());

    display.show(status::READY);
    let mut controller = Controller::new(
        peripheral,
        connector,
        config.endpoint.clone(),
        trigger,
        Box::new(display),
    )
    .with_connectivity(Box::new(connectivity))
    .with_config(config.controller.clone())
    .with_shutdown(shutdown);

    controller.run();
    Ok(())
}
