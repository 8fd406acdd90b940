//! LoRa bridge entry point.
//!
//! On the host this runs a simulation: one gateway and two field nodes
//! share an in-memory radio medium, and the main thread plays the broker.
//!
//! ```text
//! ┌──────────────── SimAir (broadcast) ────────────────┐
//! │                                                    │
//! │  WellPumpStation    ReservoirSensor     Gateway    │
//! │   NodeClient          NodeClient     GatewayServer │
//! └────────────────────────────────────────┬───────────┘
//!                                          │ BRIDGE queues
//!                                 broker (main thread):
//!                         ThingsBoard payloads, setPump RPC
//! ```
//!
//! On ESP32 the board crate supplies the transceiver driver; this binary
//! only brings up logging, storage and identity there.
#![deny(unused_must_use)]

use anyhow::Result;

#[cfg(not(target_os = "espidf"))]
fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    sim::run()
}

#[cfg(target_os = "espidf")]
fn main() -> Result<()> {
    use lorabridge::adapters::{device_id, nvs::NvsAdapter};
    use lorabridge::app::ports::ConfigPort;
    use lorabridge::config::GatewayConfig;
    use log::info;

    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;
    info!("LoRa bridge v{}", env!("CARGO_PKG_VERSION"));

    let nvs = NvsAdapter::new().map_err(|e| anyhow::anyhow!("NVS init failed: {e}"))?;
    let config: GatewayConfig = nvs.load().unwrap_or_default();
    let _keys = nvs.load_key_material();
    info!(
        "Identity {} at {:.1} MHz",
        device_id::physical_id(&device_id::read_mac()),
        config.frequency_mhz
    );
    anyhow::bail!("no transceiver driver linked for this board")
}

#[cfg(not(target_os = "espidf"))]
mod sim {
    use core::sync::atomic::{AtomicBool, Ordering};
    use core::time::Duration;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    use anyhow::{Context, Result, anyhow};
    use log::{info, warn};

    use lorabridge::adapters::device_id::{physical_id, read_mac};
    use lorabridge::adapters::nvs::NvsAdapter;
    use lorabridge::adapters::sim_radio::{SimAir, SimRadio};
    use lorabridge::adapters::time::SystemClock;
    use lorabridge::app::events::BridgeEvent;
    use lorabridge::app::ports::ConfigPort;
    use lorabridge::bridge::BRIDGE;
    use lorabridge::bridge::thingsboard::{
        CONNECT_TOPIC, TELEMETRY_TOPIC, connect_payload, parse_rpc_request, telemetry_payload,
    };
    use lorabridge::config::{GatewayConfig, NodeConfig};
    use lorabridge::drivers::watchdog::Watchdog;
    use lorabridge::error::DispatchError;
    use lorabridge::gateway::{CommandDispatcher, GatewayServer};
    use lorabridge::node::personality::METHOD_SET_PUMP;
    use lorabridge::node::{NodeClient, ReservoirSensor, WellPumpStation};
    use lorabridge::protocol::{Codec, PhysicalId};
    use lorabridge::radio::RadioIrq;
    use lorabridge::registry::DeviceRegistry;

    static GATEWAY_IRQ: RadioIrq = RadioIrq::new();
    static STOP: AtomicBool = AtomicBool::new(false);

    const RUN_FOR: Duration = Duration::from_secs(20);
    const RPC_AT: Duration = Duration::from_secs(8);

    fn on_gateway_receive() {
        GATEWAY_IRQ.notify();
    }

    fn node_identity(index: u8) -> PhysicalId {
        let mut mac = read_mac();
        mac[5] = mac[5].wrapping_add(index);
        physical_id(&mac)
    }

    pub fn run() -> Result<()> {
        let air = SimAir::new();
        let gateway_radio = air.attach();
        let pump_radio = air.attach();
        let reservoir_radio = air.attach();

        let gateway_nvs = NvsAdapter::new().map_err(|e| anyhow!("NVS init failed: {e}"))?;
        let stored: GatewayConfig = gateway_nvs.load().unwrap_or_default();
        // Shorter ack timeout so a lost ack shows up within the run.
        let gw_config = GatewayConfig {
            ack_timeout_ms: 1_500,
            ..stored
        };
        gw_config.validate().map_err(|e| anyhow!("gateway config: {e}"))?;

        let keys = gateway_nvs.load_key_material();
        let codec = Codec::new(keys);
        let registry = Arc::new(DeviceRegistry::open(
            gateway_nvs,
            SystemClock::new(),
            gw_config.offline_timeout_ms,
        ));

        let gateway = {
            let registry = Arc::clone(&registry);
            let config = gw_config.clone();
            thread::Builder::new()
                .name("radio".into())
                .spawn(move || run_gateway(gateway_radio, registry, codec, &config))?
        };

        let node_config = NodeConfig {
            join_interval_ms: 2_000,
            join_accept_timeout_ms: 1_000,
            listen_timeout_ms: 200,
            telemetry_interval_ms: Some(3_000),
            ..NodeConfig::default()
        };
        let pump = {
            let config = node_config.clone();
            thread::Builder::new()
                .name("pump".into())
                .spawn(move || run_pump(pump_radio, codec, config))?
        };
        let reservoir = {
            let config = NodeConfig {
                telemetry_interval_ms: None,
                listen_for_commands: false,
                ..node_config
            };
            thread::Builder::new()
                .name("reservoir".into())
                .spawn(move || run_reservoir(reservoir_radio, codec, config))?
        };

        let dispatcher = CommandDispatcher::new(Arc::clone(&registry), &BRIDGE, codec);
        run_broker(&dispatcher);

        STOP.store(true, Ordering::Relaxed);
        for handle in [gateway, pump, reservoir] {
            handle
                .join()
                .map_err(|_| anyhow!("simulation thread panicked"))??;
        }

        info!(
            "Simulation finished: {} device(s) registered",
            registry.len()
        );
        Ok(())
    }

    fn run_gateway(
        radio: SimRadio,
        registry: Arc<DeviceRegistry<NvsAdapter, SystemClock>>,
        codec: Codec,
        config: &GatewayConfig,
    ) -> Result<()> {
        let mut server = GatewayServer::new(radio, registry, &BRIDGE, codec, SystemClock::new(), config);
        server.start(config, on_gateway_receive).context("gateway radio")?;
        let watchdog = Watchdog::new(config.watchdog_timeout_secs);
        server.run(
            &GATEWAY_IRQ,
            &watchdog,
            Duration::from_millis(u64::from(config.poll_interval_ms)),
            &STOP,
        );
        let status = server.status();
        info!(
            "Gateway: {} registered, {} online, {} watchdog feeds",
            status.registered_devices,
            status.online_devices,
            watchdog.feed_count()
        );
        Ok(())
    }

    fn run_pump(radio: SimRadio, codec: Codec, config: NodeConfig) -> Result<()> {
        let store = NvsAdapter::new().map_err(|e| anyhow!("NVS init failed: {e}"))?;
        let mut node = NodeClient::new(
            radio,
            store,
            SystemClock::new(),
            codec,
            WellPumpStation::default(),
            node_identity(1),
            config,
        );
        node.start().context("pump radio")?;

        let started = Instant::now();
        while !STOP.load(Ordering::Relaxed) {
            // Slow drift so successive telemetry differs.
            let t = started.elapsed().as_secs_f32();
            let readings = &mut node.device_mut().readings;
            readings.temperature_c = 18.0 + 0.1 * t;
            readings.humidity_pct = 55.0 - 0.2 * t;
            readings.voltage = 12.6;
            readings.pressure_ok = true;

            if let Some(event) = node.poll() {
                info!("Pump node: {:?}", event);
            }
            thread::sleep(Duration::from_millis(20));
        }
        Ok(())
    }

    fn run_reservoir(radio: SimRadio, codec: Codec, config: NodeConfig) -> Result<()> {
        let store = NvsAdapter::new().map_err(|e| anyhow!("NVS init failed: {e}"))?;
        let mut node = NodeClient::new(
            radio,
            store,
            SystemClock::new(),
            codec,
            ReservoirSensor::default(),
            node_identity(2),
            config,
        );
        node.start().context("reservoir radio")?;

        let started = Instant::now();
        let mut reported_level = None;
        while !STOP.load(Ordering::Relaxed) {
            if let Some(event) = node.poll() {
                info!("Reservoir node: {:?}", event);
            }
            // Tank fills after 6 s; report on change only.
            node.device_mut().level_full = started.elapsed() > Duration::from_secs(6);
            let level = node.device().level_full;
            if node.is_joined() && reported_level != Some(level) {
                match node.send_telemetry() {
                    Ok(seq) => {
                        info!("Reservoir node: level_full={} sent (msgCtr {})", level, seq);
                        reported_level = Some(level);
                    }
                    Err(e) => warn!("Reservoir node: {}", e),
                }
            }
            thread::sleep(Duration::from_millis(50));
        }
        Ok(())
    }

    /// Stand-in for the MQTT task: prints what would be published and
    /// injects one RPC request from the broker.
    fn run_broker(dispatcher: &CommandDispatcher<'_, NvsAdapter, SystemClock>) {
        let started = Instant::now();
        let mut rpc_sent = false;

        while started.elapsed() < RUN_FOR {
            while let Some(event) = BRIDGE.next_event() {
                match event {
                    BridgeEvent::DeviceConnected { device_name, .. } => {
                        println!("{} {}", CONNECT_TOPIC, connect_payload(&device_name));
                    }
                    BridgeEvent::Delivered {
                        device_name,
                        message_id,
                    } => info!("Broker: msgId {} delivered to {}", message_id, device_name),
                    BridgeEvent::DeliveryFailed {
                        device_name,
                        message_id,
                    } => warn!("Broker: msgId {} to {} failed", message_id, device_name),
                }
            }
            while let Some(telemetry) = BRIDGE.next_telemetry() {
                println!("{} {}", TELEMETRY_TOPIC, telemetry_payload(&telemetry));
            }

            if !rpc_sent && started.elapsed() >= RPC_AT {
                rpc_sent = true;
                send_rpc(dispatcher, &node_identity(1));
                // Devices the gateway never saw are refused.
                send_rpc(dispatcher, "FF:FF:FF:FF:FF:FF");
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }

    fn send_rpc(dispatcher: &CommandDispatcher<'_, NvsAdapter, SystemClock>, device: &str) {
        let payload = serde_json::json!({
            "device": device,
            "data": { "method": METHOD_SET_PUMP, "params": { "state": true } },
        })
        .to_string();
        let Some(request) = parse_rpc_request(payload.as_bytes()) else {
            return;
        };
        match dispatcher.submit(&request) {
            Ok(id) => info!("Broker: {} -> {} queued as msgId {}", request.method, device, id),
            Err(DispatchError::UnknownDevice) => {
                warn!("Broker: {} is not registered, RPC dropped", device);
            }
            Err(e) => warn!("Broker: RPC to {} failed ({})", device, e),
        }
    }
}
