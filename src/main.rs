use color_eyre::{eyre::eyre, Result};
use qbha::discovery::MessageFactory;
use qbha::dispatch::handlers::{
    CaptureHandler, ControllerStateHandler, EntityStateHandler, GatewayStateHandler,
    HomeAssistantStatusHandler, TopologyHandler, CAPTURE_PATTERN, CONTROLLER_STATE_PATTERN,
    ENTITY_STATE_PATTERN, GATEWAY_STATE_PATTERN, HOMEASSISTANT_STATUS_PATTERN, TOPOLOGY_PATTERN,
};
use qbha::dispatch::Dispatcher;
use qbha::mqtt::message_manager::Publisher;
use qbha::mqtt::mqtt_handler::MqttHandler;
use qbha::persistence::ConfigStore;
use qbha::refresh::RefreshCoalescer;
use qbha::settings::Settings;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const INBOUND_CAPACITY: usize = 1000;

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;

    let (settings, source) = Settings::load()
        .await
        .map_err(|e| eyre!("Failed to load settings: {}", e))?;
    setup_logging(&settings);
    source.report();

    info!(
        "Starting qbha (broker {}:{}, data {})",
        settings.mqtt.host,
        settings.mqtt.port,
        settings.data_dir.display()
    );

    let store = Arc::new(ConfigStore::new(settings.data_dir.clone()));
    if let Err(e) = store.load().await {
        warn!("Stored topology unusable, waiting for the gateway: {}", e);
    }

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

    let (transport, client) = MqttHandler::new(&settings.mqtt, inbound_tx);
    let shared: Arc<dyn Publisher> = Arc::new(client);

    let mut coalescer = RefreshCoalescer::new(
        shared.clone(),
        Duration::from_millis(settings.refresh.interval_ms),
    );

    let mut dispatcher = Dispatcher::new();
    if settings.capture {
        dispatcher.register(CAPTURE_PATTERN, Arc::new(CaptureHandler::new()));
    }
    dispatcher
        .register(
            HOMEASSISTANT_STATUS_PATTERN,
            Arc::new(HomeAssistantStatusHandler::new(shared.clone())),
        )
        .register(
            TOPOLOGY_PATTERN,
            Arc::new(TopologyHandler::new(
                store.clone(),
                shared.clone(),
                MessageFactory::new(),
                settings.discovery.clone(),
            )),
        )
        .register(
            CONTROLLER_STATE_PATTERN,
            Arc::new(ControllerStateHandler::new(shared.clone())),
        )
        .register(
            ENTITY_STATE_PATTERN,
            Arc::new(EntityStateHandler::new(store.clone(), coalescer.sender())),
        )
        .register(
            GATEWAY_STATE_PATTERN,
            Arc::new(GatewayStateHandler::new(shared.clone())),
        );

    coalescer
        .start()
        .map_err(|e| eyre!("Failed to start refresh coalescer: {}", e))?;

    let cancel = CancellationToken::new();
    let transport_handle = tokio::spawn(transport.run(dispatcher.patterns(), cancel.clone()));
    let dispatch_handle = tokio::spawn(dispatcher.run(inbound_rx));

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for shutdown signal: {}", e))?;
    info!("Shutdown requested");

    // Flush pending refreshes while the transport can still deliver them
    if let Err(e) = coalescer.stop().await {
        error!("Failed to stop refresh coalescer: {}", e);
    }

    cancel.cancel();
    if let Err(e) = transport_handle.await {
        error!("Transport task failed: {}", e);
    }
    // The transport owned the only sender, so the dispatcher drains and ends
    if let Err(e) = dispatch_handle.await {
        error!("Dispatch task failed: {}", e);
    }

    info!("qbha stopped");
    Ok(())
}

fn setup_logging(settings: &Settings) {
    let level = settings.level();
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    if level == Level::INFO && !settings.log_level.trim().eq_ignore_ascii_case("info") {
        warn!("Unknown log level '{}', using info", settings.log_level);
    }
}
