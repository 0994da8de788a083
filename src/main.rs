// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Node binary.
//!
//! ```text
//! iot-node [SETTINGS_DIR]
//! ```
//!
//! Settings live under `SETTINGS_DIR` (default `node-data`). On first start
//! the node settings are created with a fresh system id; edit `node.json`
//! to point the node at a broker.

use std::process::ExitCode;

use iot_node::{
    BusEventKind, ControlTask, EventBus, FileStore, MqttRouter, Node, NodeIdentity, NodeSettings,
};

const DEFAULT_SETTINGS_DIR: &str = "node-data";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Node failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> iot_node::Result<()> {
    let root = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_SETTINGS_DIR.to_string());
    let store = FileStore::open(&root)?;
    let settings = NodeSettings::load_or_reset(&store)?;
    tracing::info!(
        node = %settings.node_name,
        system_id = %settings.system_id,
        broker = %format_args!("{}:{}", settings.mqtt.host, settings.mqtt.port),
        "Booting"
    );

    let bus = EventBus::new();
    let mut router = MqttRouter::builder()
        .node_name(&settings.node_name)
        .host(&settings.mqtt.host)
        .port(settings.mqtt.port)
        .keep_alive(settings.mqtt.keep_alive())
        .bus(bus.clone());
    if let Some(username) = &settings.mqtt.username {
        router = router.credentials(username, settings.mqtt.password.as_deref().unwrap_or_default());
    }
    let router = router.build()?;

    let identity = NodeIdentity::new(&settings.node_name, &settings.system_id);
    let mut node = Node::builder(identity, router.clone(), bus.clone(), store);
    for driver in iot_node::drivers::builtin() {
        node = node.driver(driver);
    }
    let node = node.build();
    node.start().await;

    // The host network is already up when the process starts.
    bus.send(BusEventKind::NetworkUp, &[]).await?;

    let control = ControlTask::new(bus, node.clone());
    tokio::select! {
        () = control.run() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Could not listen for shutdown signal");
            }
            tracing::info!("Shutdown requested");
        }
    }

    node.shutdown().await;
    router.disconnect().await;
    Ok(())
}
