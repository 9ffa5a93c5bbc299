/// Lifecycle behavior of external plugins as seen through the registry
use backend_plugin_host::error::PluginError;
use backend_plugin_host::plugin::{
    ExternalPluginFactory, Plugin, PluginDescriptor, PluginFactory, PluginRegistry,
};
use backend_plugin_host::test_utils::{FakePluginSpec, MockTransport};
use backend_plugin_host::types::{
    CheckHealthRequest, HealthStatus, RunStreamRequest, StreamPacket,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn factory(plugin_id: &str, transport: &MockTransport) -> ExternalPluginFactory {
    ExternalPluginFactory::new(PluginDescriptor::new(plugin_id, "gpx_test"))
        .with_transport(Arc::new(transport.clone()))
}

async fn started(spec: FakePluginSpec) -> (MockTransport, Arc<dyn Plugin>) {
    let transport = MockTransport::new(spec);
    let plugin = factory("test-ds", &transport)
        .create("test-ds", &HashMap::new())
        .unwrap();
    plugin.start().await.unwrap();
    (transport, plugin)
}

#[tokio::test]
async fn failing_spawn_leaves_plugin_registered_but_unavailable() {
    let registry = PluginRegistry::default();
    let transport = MockTransport::failing();

    let err = registry
        .register_and_start("A", &factory("A", &transport))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, PluginError::StartFailed { ref plugin_id, .. } if plugin_id == "A"));

    let plugin = registry.get("A").expect("plugin stays registered");
    assert!(plugin.exited().await);
    let err = plugin
        .check_health(CheckHealthRequest::default())
        .await
        .unwrap_err();
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn health_after_stop_is_unavailable() {
    let registry = PluginRegistry::default();
    let transport = MockTransport::new(FakePluginSpec::v2());
    let plugin = registry
        .register_and_start("B", &factory("B", &transport))
        .await
        .unwrap();

    let health = plugin
        .check_health(CheckHealthRequest::default())
        .await
        .unwrap();
    assert_eq!(health.status, HealthStatus::Ok);

    plugin.stop().await.unwrap();
    let err = plugin
        .check_health(CheckHealthRequest::default())
        .await
        .unwrap_err();
    assert!(err.is_unavailable());
    assert!(transport.latest().unwrap().is_exited());
}

#[tokio::test]
async fn stop_is_idempotent() {
    let (_transport, plugin) = started(FakePluginSpec::v2()).await;
    plugin.stop().await.unwrap();
    plugin.stop().await.unwrap();
    assert!(plugin.exited().await);
}

#[tokio::test]
async fn out_of_band_exit_is_noticed_on_next_call() {
    let (transport, plugin) = started(FakePluginSpec::v2()).await;

    transport.latest().unwrap().crash();

    assert!(plugin.exited().await);
    let err = plugin
        .check_health(CheckHealthRequest::default())
        .await
        .unwrap_err();
    assert!(err.is_unavailable());

    // A fresh start replaces the dead process.
    plugin.start().await.unwrap();
    assert_eq!(transport.spawn_count(), 2);
    assert!(plugin
        .check_health(CheckHealthRequest::default())
        .await
        .is_ok());
}

#[tokio::test]
async fn decommissioned_plugin_is_unavailable() {
    let (_transport, plugin) = started(FakePluginSpec::v2()).await;

    plugin.decommission().await.unwrap();
    assert!(plugin.is_decommissioned().await);

    let err = plugin
        .check_health(CheckHealthRequest::default())
        .await
        .unwrap_err();
    assert!(err.is_unavailable());
    assert!(matches!(
        plugin.start().await.unwrap_err(),
        PluginError::StartFailed { .. }
    ));
}

#[tokio::test]
async fn double_start_spawns_once() {
    let (transport, plugin) = started(FakePluginSpec::v2()).await;
    plugin.start().await.unwrap();
    assert_eq!(transport.spawn_count(), 1);
}

#[tokio::test]
async fn concurrent_starts_spawn_once() {
    let transport = MockTransport::new(FakePluginSpec::v2());
    let plugin = factory("test-ds", &transport)
        .create("test-ds", &HashMap::new())
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let plugin = plugin.clone();
            tokio::spawn(async move { plugin.start().await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(transport.spawn_count(), 1);
}

#[tokio::test]
async fn calls_racing_stop_never_reach_a_dead_process() {
    let (_transport, plugin) = started(FakePluginSpec::v2()).await;

    let callers: Vec<_> = (0..16)
        .map(|_| {
            let plugin = plugin.clone();
            tokio::spawn(async move {
                for _ in 0..10 {
                    match plugin.check_health(CheckHealthRequest::default()).await {
                        Ok(result) => assert_eq!(result.status, HealthStatus::Ok),
                        // Either the plugin was gone before the call, or it
                        // died with the request in flight.
                        Err(e) => assert!(
                            e.is_unavailable() || matches!(e, PluginError::Transport(_)),
                            "unexpected error: {e}"
                        ),
                    }
                }
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(1)).await;
    plugin.stop().await.unwrap();

    for caller in callers {
        caller.await.unwrap();
    }
    assert!(plugin
        .check_health(CheckHealthRequest::default())
        .await
        .unwrap_err()
        .is_unavailable());
}

#[tokio::test]
async fn duplicate_registration_keeps_first_instance() {
    let registry = PluginRegistry::default();
    let first = MockTransport::new(FakePluginSpec::v2());
    let second = MockTransport::new(FakePluginSpec::v1());

    let original = registry.register("C", &factory("C", &first)).unwrap();
    let err = registry
        .register("C", &factory("C", &second))
        .err()
        .unwrap();

    assert!(matches!(err, PluginError::AlreadyRegistered(_)));
    assert!(Arc::ptr_eq(&original, &registry.get("C").unwrap()));
}

#[tokio::test]
async fn dropping_run_stream_cancels_it_in_the_plugin() {
    let (transport, plugin) = started(FakePluginSpec::v2().holding_streams()).await;
    let (tx, mut rx) = mpsc::unbounded_channel::<StreamPacket>();

    let stream = {
        let plugin = plugin.clone();
        tokio::spawn(async move { plugin.run_stream(RunStreamRequest::default(), &tx).await })
    };
    assert!(rx.recv().await.is_some());

    stream.abort();
    let _ = stream.await;

    let process = transport.latest().unwrap();
    let mut cancelled = false;
    for _ in 0..50 {
        if !process.cancelled_requests().is_empty() {
            cancelled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cancelled, "plugin never saw the cancellation");

    // The connection is still usable.
    assert!(plugin
        .check_health(CheckHealthRequest::default())
        .await
        .is_ok());
}

#[tokio::test]
async fn caller_deadline_cancels_a_held_stream() {
    let (transport, plugin) = started(FakePluginSpec::v2().holding_streams()).await;
    let (tx, _rx) = mpsc::unbounded_channel::<StreamPacket>();

    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        plugin.run_stream(RunStreamRequest::default(), &tx),
    )
    .await;
    assert!(outcome.is_err());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.latest().unwrap().cancelled_requests().len(), 1);
}

#[tokio::test]
async fn failing_start_hook_kills_the_process() {
    let transport = MockTransport::new(FakePluginSpec::v2());
    let descriptor = PluginDescriptor::new("hooked", "gpx_test").on_start(Arc::new(|id, _| {
        Err(PluginError::start_failed(id, "rejected by host"))
    }));
    let plugin = ExternalPluginFactory::new(descriptor)
        .with_transport(Arc::new(transport.clone()))
        .create("hooked", &HashMap::new())
        .unwrap();

    let err = plugin.start().await.unwrap_err();
    assert!(err.to_string().contains("rejected by host"));
    assert!(transport.latest().unwrap().is_exited());
    assert!(plugin
        .check_health(CheckHealthRequest::default())
        .await
        .unwrap_err()
        .is_unavailable());
}

#[tokio::test]
async fn stop_all_stops_every_managed_plugin() {
    let registry = PluginRegistry::default();
    let transports: Vec<MockTransport> =
        (0..3).map(|_| MockTransport::new(FakePluginSpec::v2())).collect();
    for (i, transport) in transports.iter().enumerate() {
        let id = format!("plugin-{i}");
        registry
            .register_and_start(&id, &factory(&id, transport))
            .await
            .unwrap();
    }

    registry.stop_all().await;

    for transport in &transports {
        assert!(transport.latest().unwrap().is_exited());
    }
}
