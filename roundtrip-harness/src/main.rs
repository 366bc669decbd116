use std::{process::ExitCode, sync::Arc};

use log::{info, warn};
use roundtrip_broker::{BrokerClient, BrokerError, ClientSettings, in_memory::InMemoryBroker};
use roundtrip_harness::{Backend, Harness, config::parse_config};
use roundtrip_utilities::startup;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match parse_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = startup::startup("Roundtrip", config.log_level, config.log_file.as_deref()) {
        eprintln!("Failed to start logging: {err}");
        return ExitCode::FAILURE;
    }
    info!("Client ID: {}", config.client_id);

    let backend = config.backend;
    let harness = Harness::new(config);

    let cancel = harness.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("Shutdown signal received. Stopping...");
        cancel.notify_one();

        // A second signal means cleanup is stuck on the broker.
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second shutdown signal received. Exiting without cleanup");
            std::process::exit(1);
        }
    });

    harness
        .run(|settings| build_client(backend, settings))
        .await
}

#[cfg_attr(not(feature = "kafka"), allow(unused_variables))]
fn build_client(
    backend: Backend,
    settings: &ClientSettings,
) -> Result<Arc<dyn BrokerClient>, BrokerError> {
    match backend {
        Backend::InMemory => Ok(Arc::new(InMemoryBroker::new())),
        #[cfg(feature = "kafka")]
        Backend::Kafka => Ok(Arc::new(
            roundtrip_broker::adapters::kafka::KafkaBroker::new(settings.clone()),
        )),
        #[cfg(not(feature = "kafka"))]
        Backend::Kafka => Err(BrokerError::ConnectionConfig(
            "built without Kafka support; rebuild with `--features kafka` or use `--backend in-memory`"
                .into(),
        )),
    }
}
