pub mod anonymizer;
pub mod config;
pub mod error;
pub mod events;
pub mod export;
mod fsutil;
pub mod import;
pub mod object;
pub mod processor;
pub mod quarantine;
pub mod queue;
pub mod store;
pub mod transport;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{self, prelude::*};

use crate::anonymizer::PassthroughAnonymizer;
use crate::config::Config;
use crate::events::EventBus;
use crate::export::{ExportDestination, ExportService};
use crate::import::ImportService;
use crate::object::JsonManifestClassifier;
use crate::processor::ObjectProcessor;
use crate::quarantine::Quarantine;
use crate::store::{GarbageCollector, Store};
use crate::transport::{build_transport, Address, Credentials};

pub async fn run(config: Config) {
    // Initialize logging
    if config.logging.log_to_file {
        let file_appender = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::fs::File::create(&config.logging.log_file_path).unwrap());

        let stdout_appender = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(file_appender)
            .with(stdout_appender)
            .try_init()
            .expect("Failed to initialize logging");
    } else {
        tracing_subscriber::fmt()
            .with_file(true)
            .with_line_number(true)
            .init();
    }

    tracing::info!("🔧 Starting Waystation '{}'", config.station.id);

    let events = EventBus::new();
    let store = Arc::new(
        Store::open(
            config.store.root_dir(),
            Arc::new(JsonManifestClassifier),
            events.clone(),
        )
        .expect("Failed to open store"),
    );

    // One destination directory, transport and export worker per entry.
    let export_root = config.export.root_dir();
    let mut destinations = Vec::new();
    let mut export_services = Vec::new();
    for (name, dest_config) in &config.destinations {
        let address =
            Address::parse(&dest_config.url).expect("destination URL was validated at config load");
        let credentials = dest_config.username.as_ref().map(|username| Credentials {
            username: username.clone(),
            password: dest_config.password.clone().unwrap_or_default(),
        });
        let transport = build_transport(
            &address,
            credentials,
            dest_config.connect_timeout(),
            dest_config.read_timeout(),
        )
        .expect("Failed to build transport");
        let destination = Arc::new(
            ExportDestination::open(
                &export_root,
                name.clone(),
                address,
                config.export.archive_dir(),
            )
            .expect("Failed to open export destination"),
        );
        destinations.push(destination.clone());
        export_services.push(ExportService::new(
            destination,
            transport,
            events.clone(),
            config.export.poll_interval(),
        ));
    }

    let processor = ObjectProcessor::new(
        store.clone(),
        Arc::new(PassthroughAnonymizer),
        destinations,
        export_root.join("pool"),
        Quarantine::new(store.root().join("quarantine")),
        config.processor.manifest_first,
        config.processor.poll_interval(),
        events.clone(),
    )
    .expect("Failed to start object processor");

    let importer = ImportService::new(
        store.clone(),
        store.root().join("import"),
        config.processor.poll_interval(),
        events.clone(),
    )
    .expect("Failed to start import service");

    let shutdown = CancellationToken::new();
    let mut workers = Vec::new();
    workers.push(tokio::spawn(importer.run(shutdown.clone())));
    workers.push(tokio::spawn(processor.run(shutdown.clone())));
    for service in export_services {
        workers.push(tokio::spawn(service.run(shutdown.clone())));
    }
    match config.store.ttl() {
        Some(ttl) => {
            let gc = GarbageCollector::new(store.clone(), ttl, config.store.gc_interval())
                .with_pool_dir(export_root.join("pool"));
            workers.push(tokio::spawn(gc.run(shutdown.clone())));
        }
        None => tracing::info!("Garbage collection disabled (ttl_minutes = 0)"),
    }

    tracing::info!("🚀 Waystation '{}' running", config.station.id);

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");
    tracing::info!("Shutdown signal received");
    shutdown.cancel();
    for worker in workers {
        let _ = worker.await;
    }
    tracing::info!("Waystation stopped");
}
