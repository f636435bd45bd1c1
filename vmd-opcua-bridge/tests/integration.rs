//! Integration tests for the alarm bridge, using the in-memory server and bus.

use std::thread;
use std::time::Duration;

use vmd_common::{ACTIVE_KEY, EventKeyValueSet, LABEL_TAG, TNSAXIS};
use vmd_opcua_bridge::bus::SubscriptionTag;
use vmd_opcua_bridge::bus::memory::MemoryEventBus;
use vmd_opcua_bridge::dispatch::{self, DispatchEvent, DispatchSender, Dispatcher};
use vmd_opcua_bridge::nodes::NodeWrite;
use vmd_opcua_bridge::server::memory::MemoryFactory;
use vmd_opcua_bridge::{AlarmBridge, BridgeError, ServerManager, ServerState};

type TestBridge = AlarmBridge<MemoryFactory, MemoryEventBus>;

struct Harness {
    bridge: TestBridge,
    bus: MemoryEventBus,
    factory: MemoryFactory,
    sink: DispatchSender,
    dispatcher: Dispatcher,
}

fn harness() -> Harness {
    let bus = MemoryEventBus::new();
    let factory = MemoryFactory::new();
    let (sink, dispatcher) = dispatch::channel(256);
    let bridge = AlarmBridge::new(factory.clone(), bus.clone(), sink.clone());
    Harness {
        bridge,
        bus,
        factory,
        sink,
        dispatcher,
    }
}

impl Harness {
    fn started(port: &str, source: &str) -> Self {
        let mut h = harness();
        h.bridge.startup(port, source).expect("startup failed");
        h
    }

    /// Publish on the bus and run the dispatch loop over what was queued.
    fn publish(&mut self, event: &EventKeyValueSet) -> usize {
        self.bus.publish(event);
        self.dispatcher.drain(&mut self.bridge)
    }

    fn set_param(&mut self, name: &str, value: &str) {
        self.sink.try_deliver(DispatchEvent::Parameter {
            name: name.to_string(),
            value: value.to_string(),
        });
        self.dispatcher.drain(&mut self.bridge);
    }
}

#[test]
fn test_sequential_upserts_read_back() {
    let mut h = Harness::started("4840", "VMD");

    for active in [true, false, false, true, false] {
        h.publish(&EventKeyValueSet::alarm("VMD", "Camera1ProfileANY", active));
        assert_eq!(
            h.bridge.server().read_observation("Camera1ProfileANY"),
            Some(active)
        );
    }

    assert_eq!(h.bridge.server().node_count(), 1);
    assert_eq!(h.bridge.stats().observations_applied, 5);
    h.bridge.shutdown();
}

#[test]
fn test_repeated_upsert_keeps_node() {
    let mut manager = ServerManager::new(MemoryFactory::new());
    manager.launch(4840).unwrap();

    assert_eq!(
        manager.write_observation("Camera1Profile1", true).unwrap(),
        NodeWrite::Created
    );
    assert_eq!(
        manager.write_observation("Camera1Profile1", true).unwrap(),
        NodeWrite::Updated
    );

    let backend = manager.backend().unwrap().clone();
    assert_eq!(backend.labels(), vec!["Camera1Profile1"]);
    assert_eq!(manager.read_observation("Camera1Profile1"), Some(true));
    manager.stop().unwrap();
}

#[test]
fn test_store_wins_over_stale_table() {
    let mut manager = ServerManager::new(MemoryFactory::new());
    manager.launch(4840).unwrap();

    manager.write_observation("Camera1Profile1", true).unwrap();
    let backend = manager.backend().unwrap().clone();
    assert!(backend.remove_variable("Camera1Profile1"));

    assert_eq!(
        manager.write_observation("Camera1Profile1", false).unwrap(),
        NodeWrite::Created
    );
    assert_eq!(manager.read_observation("Camera1Profile1"), Some(false));
    manager.stop().unwrap();
}

#[test]
fn test_reconfigure_gives_fresh_store_on_new_port() {
    let mut h = Harness::started("4840", "VMD");
    h.publish(&EventKeyValueSet::alarm("VMD", "Camera1ProfileANY", true));
    let old = h.factory.last_backend().unwrap();

    h.set_param("port", "4841");

    assert!(h.bridge.server().is_running());
    assert_eq!(h.bridge.server().port(), Some(4841));
    assert_eq!(h.bridge.server().instance_count(), 1);
    assert_eq!(h.bridge.server().read_observation("Camera1ProfileANY"), None);
    assert_eq!(h.bridge.server().node_count(), 0);
    assert!(old.is_aborted());
    assert_eq!(h.factory.live_run_loops(), 1);

    // The new instance picks the label up again on the next event.
    h.publish(&EventKeyValueSet::alarm("VMD", "Camera1ProfileANY", false));
    assert_eq!(
        h.bridge.server().read_observation("Camera1ProfileANY"),
        Some(false)
    );
    h.bridge.shutdown();
}

#[test]
fn test_invalid_ports_leave_server_untouched() {
    let mut h = Harness::started("4840", "VMD");
    h.publish(&EventKeyValueSet::alarm("VMD", "Camera1ProfileANY", true));

    for bad in ["0", "1023", "65536", "abc", "", "-1"] {
        let err = h.bridge.on_port_changed(bad).unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)), "{bad}: {err}");

        assert_eq!(h.bridge.server().port(), Some(4840));
        assert_eq!(h.bridge.server().state(), ServerState::Running);
        assert_eq!(
            h.bridge.server().read_observation("Camera1ProfileANY"),
            Some(true)
        );
    }

    assert_eq!(h.factory.instances_built(), 1);
    h.bridge.shutdown();
}

#[test]
fn test_reconfigure_rejects_invalid_port_directly() {
    let mut manager = ServerManager::new(MemoryFactory::new());
    manager.launch(4840).unwrap();
    manager.write_observation("Camera1Profile1", true).unwrap();

    for bad in [0, 1023, 65536] {
        assert!(matches!(
            manager.reconfigure(bad),
            Err(BridgeError::Validation(_))
        ));
        assert_eq!(manager.port(), Some(4840));
        assert_eq!(manager.read_observation("Camera1Profile1"), Some(true));
    }
    manager.stop().unwrap();
}

#[test]
fn test_source_switch_drops_old_source_events() {
    let mut h = Harness::started("4840", "VMD");
    let old_tag = h.bridge.subscriber().tag();

    h.set_param("eventsource", "FenceGuard");
    assert_eq!(h.bridge.subscriber().source(), Some("FenceGuard"));
    assert_eq!(h.bus.sources(), vec!["FenceGuard"]);

    // Published on the bus: nothing is registered for the old source.
    assert_eq!(
        h.bus
            .publish(&EventKeyValueSet::alarm("VMD", "Camera1ProfileANY", true)),
        0
    );

    // Already queued before the switch: discarded by tag.
    h.sink.try_deliver(DispatchEvent::Alarm {
        tag: old_tag,
        event: EventKeyValueSet::alarm("VMD", "Camera1ProfileANY", true),
    });
    h.dispatcher.drain(&mut h.bridge);

    assert_eq!(h.bridge.server().read_observation("Camera1ProfileANY"), None);
    assert_eq!(h.bridge.server().node_count(), 0);
    assert_eq!(h.bridge.stats().stale_discarded, 1);

    h.publish(&EventKeyValueSet::alarm("FenceGuard", "Camera1Profile2", true));
    assert_eq!(
        h.bridge.server().read_observation("Camera1Profile2"),
        Some(true)
    );
    h.bridge.shutdown();
}

#[test]
fn test_source_switch_to_non_chunk_values() {
    let mut h = Harness::started("4840", "VMD");

    h.set_param("eventsource", "");
    assert_eq!(h.bridge.subscriber().source(), Some(""));
    assert_eq!(h.bus.sources(), vec![""]);
    h.publish(&EventKeyValueSet::alarm("", "Camera1ProfileANY", true));
    assert_eq!(
        h.bridge.server().read_observation("Camera1ProfileANY"),
        Some(true)
    );

    h.set_param("eventsource", "Fence/Guard");
    assert_eq!(h.bridge.subscriber().source(), Some("Fence/Guard"));
    assert_eq!(
        h.bus
            .publish(&EventKeyValueSet::alarm("", "Camera1Profile2", true)),
        0
    );
    h.publish(&EventKeyValueSet::alarm("Fence/Guard", "Camera1Profile2", false));
    assert_eq!(
        h.bridge.server().read_observation("Camera1Profile2"),
        Some(false)
    );
    h.bridge.shutdown();
}

#[test]
fn test_untagged_delivery_is_discarded() {
    let mut h = Harness::started("4840", "VMD");

    h.sink.try_deliver(DispatchEvent::Alarm {
        tag: SubscriptionTag::NONE,
        event: EventKeyValueSet::alarm("VMD", "Camera1ProfileANY", true),
    });
    h.dispatcher.drain(&mut h.bridge);

    assert_eq!(h.bridge.server().node_count(), 0);
    h.bridge.shutdown();
}

#[test]
fn test_malformed_events_do_not_mutate() {
    let mut h = Harness::started("4840", "VMD");

    h.publish(&EventKeyValueSet::alarm("VMD", "Camera1ProfileANY", true).without(ACTIVE_KEY, None));
    h.publish(&EventKeyValueSet::alarm("VMD", "Camera1ProfileANY", true).without(LABEL_TAG, Some(TNSAXIS)));
    h.publish(
        &EventKeyValueSet::alarm("VMD", "Camera1ProfileANY", true)
            .without(ACTIVE_KEY, None)
            .with_string(ACTIVE_KEY, None, "yes"),
    );

    assert_eq!(h.bridge.server().node_count(), 0);
    assert_eq!(h.bridge.stats().observations_dropped, 3);

    h.publish(&EventKeyValueSet::alarm("VMD", "Camera1ProfileANY", true));
    assert_eq!(
        h.bridge.server().read_observation("Camera1ProfileANY"),
        Some(true)
    );
    h.bridge.shutdown();
}

#[test]
fn test_rapid_restarts_never_overlap_run_loops() {
    let factory = MemoryFactory::new();
    let mut manager = ServerManager::new(factory.clone());

    for i in 0..20u32 {
        manager.launch(4840 + i).unwrap();
        assert_eq!(factory.live_run_loops(), 1);
        manager.stop().unwrap();
        assert_eq!(factory.live_run_loops(), 0);
    }

    manager.launch(5000).unwrap();
    for port in [5001, 5002, 5003, 5004] {
        manager.reconfigure(port).unwrap();
        assert_eq!(factory.live_run_loops(), 1);
    }
    manager.stop().unwrap();

    assert_eq!(factory.peak_run_loops(), 1);
    assert_eq!(factory.live_run_loops(), 0);
}

#[test]
fn test_dispatch_loop_on_its_own_thread() {
    let Harness {
        mut bridge,
        bus,
        factory,
        sink,
        mut dispatcher,
    } = Harness::started("4840", "VMD");

    let worker = thread::spawn(move || {
        let applied = dispatcher.run(&mut bridge);
        bridge.shutdown();
        (applied, bridge)
    });

    for (i, active) in [true, false, true].into_iter().enumerate() {
        let label = format!("Camera1Profile{}", i);
        while bus.publish(&EventKeyValueSet::alarm("VMD", &label, active)) == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }
    sink.try_deliver(DispatchEvent::Parameter {
        name: "port".to_string(),
        value: "4850".to_string(),
    });
    sink.try_deliver(DispatchEvent::Shutdown);

    let (applied, bridge) = worker.join().unwrap();
    assert_eq!(applied, 4);
    assert_eq!(bridge.stats().observations_applied, 3);
    assert_eq!(bridge.server().state(), ServerState::Stopped);
    assert_eq!(bus.registrations(), 0);
    assert_eq!(factory.live_run_loops(), 0);
    assert_eq!(factory.peak_run_loops(), 1);

    // Nothing is accepted once the loop is gone.
    assert!(!sink.try_deliver(DispatchEvent::Shutdown));
}

#[test]
fn test_startup_subscription_failure_is_fatal() {
    let mut h = harness();
    h.bus.fail_next_subscribe();

    let err = h.bridge.startup("4840", "VMD").unwrap_err();
    assert!(matches!(err, BridgeError::Subscription(_)));
    assert!(err.is_fatal_at_startup());

    assert_eq!(h.bridge.server().state(), ServerState::Stopped);
    assert_eq!(h.factory.live_run_loops(), 0);
}

#[test]
fn test_live_subscription_failure_keeps_previous_source() {
    let mut h = Harness::started("4840", "VMD");

    h.bus.fail_next_subscribe();
    h.set_param("eventsource", "FenceGuard");

    assert_eq!(h.bridge.subscriber().source(), Some("VMD"));
    h.publish(&EventKeyValueSet::alarm("VMD", "Camera1ProfileANY", true));
    assert_eq!(
        h.bridge.server().read_observation("Camera1ProfileANY"),
        Some(true)
    );
    h.bridge.shutdown();
}

#[test]
fn test_live_spawn_failure_restores_previous_port() {
    let mut h = Harness::started("4840", "VMD");

    h.factory.fail_next_spawn();
    h.set_param("port", "4841");

    assert!(h.bridge.server().is_running());
    assert_eq!(h.bridge.server().port(), Some(4840));
    assert_eq!(h.factory.live_run_loops(), 1);
    h.bridge.shutdown();
}
