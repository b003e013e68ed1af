//! End-to-end coordinator scenarios
//!
//! Drives the VTN facade the way the protocol layer does, with a VEN agent
//! answering event notices over the channel sink.

use adr_core::*;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::mpsc;

struct Vtn {
    coordinator: Coordinator,
    notices: mpsc::Receiver<EventNotice>,
}

fn vtn_with(store: Arc<dyn Store>) -> Vtn {
    let (sink, notices) = ChannelSink::new(64);
    Vtn {
        coordinator: Coordinator::new(VtnConfig::default(), store, Arc::new(sink)),
        notices,
    }
}

async fn register(coordinator: &Coordinator, name: &str) -> ResourceId {
    match coordinator.on_register(name).await.unwrap() {
        RegistrationReply::Accepted { resource_id, .. } => resource_id,
        RegistrationReply::Rejected => panic!("{} rejected", name),
    }
}

async fn subscribe(coordinator: &Coordinator, agent: &VenAgent, resource_id: &str) -> ReportGrant {
    coordinator
        .on_report_register(agent.report_request(resource_id))
        .await
        .unwrap()
}

#[tokio::test]
async fn scenario_duplicate_registration() {
    let vtn = vtn_with(Arc::new(MemoryStore::new()));

    let first = vtn.coordinator.on_register("ven123").await.unwrap();
    assert!(first.is_accepted());

    let second = vtn.coordinator.on_register("ven123").await.unwrap();
    assert_eq!(second, RegistrationReply::Rejected);

    let identities = vtn.coordinator.registry().identities().await.unwrap();
    assert_eq!(identities.len(), 1);
    match first {
        RegistrationReply::Accepted { resource_id, registration_id } => {
            assert_eq!(identities[0].resource_id, resource_id);
            assert_eq!(identities[0].registration_id, registration_id);
        }
        RegistrationReply::Rejected => unreachable!(),
    }
}

#[tokio::test]
async fn scenario_report_and_trigger() {
    let mut vtn = vtn_with(Arc::new(MemoryStore::new()));
    let resource_id = register(&vtn.coordinator, "ven123").await;

    let request = ReportRequest {
        resource_id: resource_id.clone(),
        report_resource_id: "device001".to_string(),
        measurement: "voltage".to_string(),
        unit: "V".to_string(),
        scale: "none".to_string(),
        min_interval: Duration::from_secs(10),
        max_interval: Duration::from_secs(60),
    };
    let grant = vtn.coordinator.on_report_register(request).await.unwrap();
    assert_eq!(grant.sampling_interval, Duration::from_secs(10));

    let low = vtn
        .coordinator
        .on_update_report(grant.handle, &[(Utc::now(), 150.0)])
        .await
        .unwrap();
    assert_eq!(low.events.len(), 1);

    let notice = vtn.notices.recv().await.unwrap();
    assert_eq!(notice.event_id, low.events[0]);
    assert_eq!(notice.signal_name, "simple");
    assert_eq!(notice.signal_type, "level");
    assert_eq!(notice.targets, vec![resource_id.clone()]);
    assert_eq!(notice.intervals[0].signal_payload, 1.0);
    assert_eq!(notice.intervals[0].duration, Duration::from_secs(600));

    let high = vtn
        .coordinator
        .on_update_report(grant.handle, &[(Utc::now(), 250.0)])
        .await
        .unwrap();
    assert!(high.events.is_empty());
    assert_eq!(high.stored, 1);
    assert!(vtn.notices.try_recv().is_err());
    assert_eq!(vtn.coordinator.events().len(), 1);
}

#[tokio::test]
async fn scenario_first_decision_wins() {
    let mut vtn = vtn_with(Arc::new(MemoryStore::new()));
    let agent = VenAgent::new(VenConfig::default(), Arc::new(FixedMeasurement(150.0)));
    let resource_id = register(&vtn.coordinator, agent.name()).await;
    let grant = subscribe(&vtn.coordinator, &agent, &resource_id).await;

    let value = agent.on_collect_report().await;
    vtn.coordinator
        .on_update_report(grant.handle, &[(Utc::now(), value)])
        .await
        .unwrap();

    let notice = vtn.notices.recv().await.unwrap();
    let decision = agent.on_event(&notice);
    assert_eq!(decision, OptType::OptIn);

    let first = vtn
        .coordinator
        .on_event_decision(&resource_id, &notice.event_id, decision)
        .await
        .unwrap();
    assert_eq!(first, DecisionOutcome::Recorded(OptType::OptIn));

    let late = vtn
        .coordinator
        .on_event_decision(&resource_id, &notice.event_id, OptType::OptOut)
        .await
        .unwrap();
    assert_eq!(late, DecisionOutcome::AlreadyDecided(OptType::OptIn));

    let event = vtn.coordinator.event(&notice.event_id).unwrap();
    assert_eq!(event.decision, EventDecision::OptIn);
    assert!(event.delivered);
}

#[tokio::test]
async fn batch_order_is_preserved() {
    let store = Arc::new(MemoryStore::new());
    let mut vtn = vtn_with(store.clone());
    let agent = VenAgent::new(VenConfig::default(), Arc::new(FixedMeasurement::default()));
    let resource_id = register(&vtn.coordinator, agent.name()).await;
    let grant = subscribe(&vtn.coordinator, &agent, &resource_id).await;

    let t0 = Utc::now();
    let values = [150.0, 230.0, 120.0, 199.99, 200.0];
    let batch: Vec<_> = values
        .iter()
        .enumerate()
        .map(|(i, v)| (t0 + ChronoDuration::seconds(i as i64), *v))
        .collect();

    let summary = vtn.coordinator.on_update_report(grant.handle, &batch).await.unwrap();
    assert_eq!(summary.stored, values.len());
    assert_eq!(summary.events.len(), 3);

    let stored: Vec<f64> = store
        .query_by_resource(&resource_id)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.value)
        .collect();
    assert_eq!(stored, values.to_vec());

    for expected in &summary.events {
        assert_eq!(&vtn.notices.recv().await.unwrap().event_id, expected);
    }
    let audited: Vec<_> = vtn.coordinator.events().into_iter().map(|e| e.event_id).collect();
    assert_eq!(audited, summary.events);
}

#[tokio::test]
async fn concurrent_batches_for_one_subscription_do_not_interleave() {
    let store = Arc::new(MemoryStore::new());
    let Vtn { coordinator, notices: _notices } = vtn_with(store.clone());
    let coordinator = Arc::new(coordinator);
    let agent = VenAgent::new(VenConfig::default(), Arc::new(FixedMeasurement::default()));
    let resource_id = register(&coordinator, agent.name()).await;
    let grant = subscribe(&coordinator, &agent, &resource_id).await;

    let now = Utc::now();
    let mut tasks = Vec::new();
    for batch in 0..4 {
        let coordinator = coordinator.clone();
        let samples: Vec<_> = (0..25).map(|i| (now, (batch * 1000 + i) as f64 + 300.0)).collect();
        tasks.push(tokio::spawn(async move {
            coordinator.on_update_report(grant.handle, &samples).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let stored = store.query_by_resource(&resource_id).await.unwrap();
    assert_eq!(stored.len(), 100);
    for chunk in stored.chunks(25) {
        let batch = ((chunk[0].value - 300.0) / 1000.0).floor();
        for (i, sample) in chunk.iter().enumerate() {
            assert_eq!(sample.value, batch * 1000.0 + i as f64 + 300.0);
        }
    }
}

#[tokio::test]
async fn storage_outage_fails_request_without_rejection() {
    let store = Arc::new(MemoryStore::new());
    let vtn = vtn_with(store.clone());
    let agent = VenAgent::new(VenConfig::default(), Arc::new(FixedMeasurement::default()));
    let resource_id = register(&vtn.coordinator, agent.name()).await;
    let grant = subscribe(&vtn.coordinator, &agent, &resource_id).await;

    store.set_offline(true);
    let err = vtn
        .coordinator
        .on_update_report(grant.handle, &[(Utc::now(), 50.0)])
        .await
        .unwrap_err();
    assert!(matches!(err, DrError::StorageUnavailable(_)));
    assert!(err.is_transient());

    let err = vtn.coordinator.on_register("ven-other").await.unwrap_err();
    assert!(matches!(err, DrError::StorageUnavailable(_)));

    store.set_offline(false);
    assert!(vtn.coordinator.on_register("ven-other").await.unwrap().is_accepted());
}

#[tokio::test]
async fn invalid_input_leaves_no_trace() {
    let store = Arc::new(MemoryStore::new());
    let vtn = vtn_with(store.clone());
    let agent = VenAgent::new(VenConfig::default(), Arc::new(FixedMeasurement::default()));

    assert!(matches!(
        vtn.coordinator.on_register("").await,
        Err(DrError::InvalidInput(_))
    ));
    assert!(store.list_identities().await.unwrap().is_empty());

    let resource_id = register(&vtn.coordinator, agent.name()).await;
    let grant = subscribe(&vtn.coordinator, &agent, &resource_id).await;

    let batch = [(Utc::now(), 10.0), (Utc::now(), f64::INFINITY)];
    assert!(matches!(
        vtn.coordinator.on_update_report(grant.handle, &batch).await,
        Err(DrError::InvalidInput(_))
    ));
    assert!(store.query_by_resource(&resource_id).await.unwrap().is_empty());
    assert!(vtn.coordinator.events().is_empty());
}

#[tokio::test]
async fn sqlite_backed_registration_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("database").join("openleadr.db");

    let resource_id = {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let vtn = vtn_with(store.clone());
        let agent = VenAgent::new(VenConfig::default(), Arc::new(FixedMeasurement(250.0)));
        let resource_id = register(&vtn.coordinator, agent.name()).await;
        let grant = subscribe(&vtn.coordinator, &agent, &resource_id).await;
        vtn.coordinator
            .on_update_report(grant.handle, &[(Utc::now(), 250.0)])
            .await
            .unwrap();
        resource_id
    };

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let vtn = vtn_with(store.clone());
    assert_eq!(
        vtn.coordinator.on_register("ven123").await.unwrap(),
        RegistrationReply::Rejected
    );

    let samples = store.query_by_resource(&resource_id).await.unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].value, 250.0);
    assert_eq!(samples[0].report_resource_id, "device001");
}
