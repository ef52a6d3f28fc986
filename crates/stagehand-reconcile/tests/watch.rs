//! Watch consumer behaviour against scripted delta batches.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use stagehand_orchestrator::{MachineStatus, StatusSnapshot};
use stagehand_provisioner::{FailureEvent, NodeStatus};
use stagehand_reconcile::{HostsFile, ReconcileError, Supervisor, UnitRetry, WatchConsumer, WatcherSpawner};
use stagehand_state::{StateStore, WorkloadStatus};

use common::{
    MockOrchestrator, MockProvisioner, bounded, failed_machine, machine, unit, unit_with_message, wait_until,
};

struct Harness {
    store: StateStore,
    orchestrator: Arc<MockOrchestrator>,
    provisioner: Arc<MockProvisioner>,
    supervisor: Supervisor,
    consumer: WatchConsumer,
    retries: mpsc::UnboundedReceiver<UnitRetry>,
    failures: mpsc::UnboundedReceiver<FailureEvent>,
}

fn harness(orchestrator: MockOrchestrator, node_status: NodeStatus) -> Harness {
    let store = StateStore::new();
    let orchestrator = Arc::new(orchestrator);
    let provisioner = Arc::new(MockProvisioner::new(node_status));
    let supervisor = Supervisor::new();
    let (retry_tx, retries) = mpsc::unbounded_channel();
    let (failure_tx, failures) = mpsc::unbounded_channel();
    let spawner = WatcherSpawner::new(provisioner.clone(), failure_tx, supervisor.clone())
        .with_interval(Duration::from_millis(2));
    let consumer = WatchConsumer::new(store.clone(), orchestrator.clone(), spawner, retry_tx, "tok");
    Harness {
        store,
        orchestrator,
        provisioner,
        supervisor,
        consumer,
        retries,
        failures,
    }
}

fn live(instances: &[(&str, &str)]) -> StatusSnapshot {
    let mut status = StatusSnapshot::default();
    for (id, instance_id) in instances {
        status.machines.insert(
            id.to_string(),
            MachineStatus {
                instance_id: instance_id.to_string(),
                series: "trusty".to_string(),
                ..Default::default()
            },
        );
    }
    status
}

#[tokio::test]
async fn error_edge_enqueues_retry_once_per_transition() {
    let mut h = harness(MockOrchestrator::default(), NodeStatus::Deployed);

    for workload in ["waiting", "error", "error", "active", "error"] {
        h.consumer
            .process_batch(&[unit_with_message("svc-tok/0", "1", workload, "hook failed")])
            .await
            .unwrap();
    }

    let first = h.retries.try_recv().unwrap();
    assert_eq!(first.unit, "svc-tok/0");
    assert_eq!(first.retries, 1);
    assert_eq!(first.message, "hook failed");
    assert_eq!(h.retries.try_recv().unwrap().retries, 2);
    assert!(h.retries.try_recv().is_err());

    let cached = h.store.get_unit("svc-tok/0").unwrap();
    assert_eq!(cached.status, WorkloadStatus::Error);
    assert_eq!(cached.retries, 2);
    h.supervisor.shutdown();
}

#[tokio::test]
async fn first_sight_in_error_counts_as_transition() {
    let mut h = harness(MockOrchestrator::default(), NodeStatus::Deployed);
    h.consumer
        .process_batch(&[unit("svc-tok/0", "1", "error")])
        .await
        .unwrap();
    assert_eq!(h.retries.try_recv().unwrap().retries, 1);
}

#[tokio::test]
async fn units_of_other_deployments_are_ignored() {
    let mut h = harness(MockOrchestrator::default(), NodeStatus::Deployed);
    h.consumer.process_batch(&[unit("other/0", "1", "error")]).await.unwrap();
    assert!(h.store.get_unit("other/0").is_none());
    assert!(h.store.get_machine("1").is_none());
    assert!(h.retries.try_recv().is_err());
}

#[tokio::test]
async fn affinity_only_for_top_level_machines() {
    let h = harness(MockOrchestrator::default(), NodeStatus::Deployed);
    h.consumer
        .process_batch(&[
            unit("svc-tok/0", "3", "waiting"),
            unit("svc-tok/1", "3/lxd/0", "waiting"),
        ])
        .await
        .unwrap();

    let machine = h.store.get_machine("3").unwrap();
    assert!(machine.applications.contains("svc-tok"));
    assert!(machine.units.contains("svc-tok/0"));
    assert!(!machine.units.contains("svc-tok/1"));
    assert!(h.store.get_machine("3/lxd/0").is_none());
    assert_eq!(h.store.app_retries("svc-tok"), Some(0));
    assert_eq!(h.store.unit_count(), 2);
}

#[tokio::test]
async fn pending_and_untracked_machines_are_not_watched() {
    let h = harness(MockOrchestrator::default(), NodeStatus::FailedDeployment);
    h.consumer
        .process_batch(&[
            unit("svc-tok/0", "1", "waiting"),
            machine("1", "pending"),
            machine("1", ""),
            machine("7", "inst-7"),
        ])
        .await
        .unwrap();

    assert!(!h.store.get_machine("1").unwrap().analyzed);
    assert!(h.store.get_machine("7").is_none());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.provisioner.queries("inst-7"), 0);
}

#[tokio::test]
async fn watcher_spawned_exactly_once_per_machine() {
    let mut h = harness(MockOrchestrator::default(), NodeStatus::FailedDeployment);
    h.consumer
        .process_batch(&[unit("svc-tok/0", "1", "waiting"), machine("1", "inst-1")])
        .await
        .unwrap();
    h.consumer.process_batch(&[machine("1", "inst-1")]).await.unwrap();

    let event = bounded(h.failures.recv()).await.unwrap();
    assert_eq!(event.instance_id, "inst-1");
    assert_eq!(event.status, NodeStatus::FailedDeployment);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.failures.try_recv().is_err());
    assert_eq!(h.provisioner.queries("inst-1"), 1);

    let machine = h.store.get_machine("1").unwrap();
    assert!(machine.analyzed);
    assert_eq!(machine.series, "trusty");
    assert_eq!(h.store.machine_id_for_instance("inst-1").as_deref(), Some("1"));
    h.supervisor.shutdown();
}

#[tokio::test]
async fn placement_tag_taken_from_hosted_application() {
    let h = harness(MockOrchestrator::default(), NodeStatus::Deployed);
    h.store.set_tag("hyperv-tok", "hyperv");
    h.consumer
        .process_batch(&[unit("hyperv-tok/0", "2", "waiting"), machine("2", "inst-2")])
        .await
        .unwrap();

    assert_eq!(h.store.get_machine("2").unwrap().tags, vec!["hyperv"]);
    h.supervisor.shutdown();
}

#[tokio::test]
async fn deleted_instance_is_not_rewatched_until_gone() {
    let mut h = harness(MockOrchestrator::default(), NodeStatus::FailedDeployment);

    // inst-1 was replaced earlier and still shows up in live status.
    h.store.record_affinity("1", "svc-tok", "svc-tok/0");
    h.store.claim_for_watch("1", "inst-1", "trusty");
    h.store.retire_machine("1");
    h.orchestrator.set_status(live(&[("1", "inst-1")]));

    // The provisioner hands the same instance id to a new machine.
    h.consumer
        .process_batch(&[unit("svc-tok/1", "5", "waiting"), machine("5", "inst-1")])
        .await
        .unwrap();
    assert!(h.store.is_deleted("inst-1"));
    assert!(!h.store.get_machine("5").unwrap().analyzed);

    // Once the old machine has left the status the id is watchable again.
    h.orchestrator.set_status(live(&[("5", "pending")]));
    h.consumer.process_batch(&[machine("5", "inst-1")]).await.unwrap();
    assert!(!h.store.is_deleted("inst-1"));
    assert!(h.store.get_machine("5").unwrap().analyzed);

    let event = bounded(h.failures.recv()).await.unwrap();
    assert_eq!(event.instance_id, "inst-1");
    h.supervisor.shutdown();
}

#[tokio::test]
async fn deleted_set_keeps_only_instances_still_live() {
    let h = harness(MockOrchestrator::default(), NodeStatus::Deployed);
    for (id, inst) in [("1", "inst-1"), ("2", "inst-2")] {
        h.store.record_affinity(id, "svc-tok", &format!("svc-tok/{id}"));
        h.store.claim_for_watch(id, inst, "trusty");
        h.store.retire_machine(id);
    }
    h.orchestrator.set_status(live(&[("2", "inst-2")]));

    h.store.record_affinity("9", "svc-tok", "svc-tok/9");
    h.consumer.process_batch(&[machine("9", "inst-9")]).await.unwrap();

    assert_eq!(h.store.deleted_instances(), vec!["inst-2".to_string()]);
    h.supervisor.shutdown();
}

#[tokio::test]
async fn watcher_query_failure_faults_the_group() {
    let h = harness(MockOrchestrator::default(), NodeStatus::Deploying);
    h.provisioner.break_instance("inst-1");
    h.consumer
        .process_batch(&[unit("svc-tok/0", "1", "waiting"), machine("1", "inst-1")])
        .await
        .unwrap();

    let err = bounded(h.supervisor.run_until(std::future::pending::<Result<(), ReconcileError>>()))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Provisioner(_)));
}

#[tokio::test]
async fn hosts_file_refreshed_after_unit_batches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tok.hosts");
    let orchestrator = MockOrchestrator::default()
        .with_address("svc-tok/0", "10.0.0.1")
        .with_address("svc-tok/1", "10.0.0.2")
        .with_address("hyper-v-tok/0", "10.0.0.3");
    let Harness {
        store,
        orchestrator,
        consumer,
        supervisor,
        ..
    } = harness(orchestrator, NodeStatus::Deployed);
    let (requests_tx, requests_rx) = watch::channel(());
    let consumer = consumer.with_hosts_refresh(requests_tx);
    supervisor.spawn(
        "hosts file",
        HostsFile::new(&path, "tok").run(store, orchestrator, requests_rx),
    );

    consumer
        .process_batch(&[
            unit("svc-tok/0", "1", "waiting"),
            unit("svc-tok/1", "2", "waiting"),
            unit("hyper-v-tok/0", "3", "waiting"),
            unit("db-tok/0", "4", "waiting"),
        ])
        .await
        .unwrap();

    wait_until(|| {
        std::fs::read_to_string(&path).is_ok_and(|c| c == "HYPER_V=10.0.0.3\nSVC=10.0.0.1,10.0.0.2\n")
    })
    .await;
    supervisor.shutdown();
}

#[tokio::test]
async fn slow_address_lookup_does_not_stall_deltas() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tok.hosts");
    let orchestrator = MockOrchestrator::default()
        .with_address("svc-tok/0", "10.0.0.1")
        .with_hanging_address("svc-tok/1");
    let Harness {
        store,
        orchestrator,
        consumer,
        supervisor,
        mut retries,
        ..
    } = harness(orchestrator, NodeStatus::Deployed);
    let (requests_tx, requests_rx) = watch::channel(());
    let consumer = consumer.with_hosts_refresh(requests_tx);
    let hosts = HostsFile::new(&path, "tok").with_lookup_timeout(Duration::from_millis(20));
    supervisor.spawn("hosts file", hosts.run(store, orchestrator, requests_rx));

    consumer
        .process_batch(&[unit("svc-tok/0", "1", "active"), unit("svc-tok/1", "2", "waiting")])
        .await
        .unwrap();
    // The refresh is stuck on svc-tok/1; the next batch still lands at once.
    bounded(consumer.process_batch(&[unit("svc-tok/0", "1", "error")]))
        .await
        .unwrap();
    assert_eq!(retries.try_recv().unwrap().unit, "svc-tok/0");

    wait_until(|| std::fs::read_to_string(&path).is_ok_and(|c| c == "SVC=10.0.0.1\n")).await;
    supervisor.shutdown();
}

#[tokio::test]
async fn allocation_error_on_tracked_machine_is_fatal() {
    let h = harness(MockOrchestrator::default(), NodeStatus::Deployed);
    h.consumer
        .process_batch(&[unit("svc-tok/0", "4", "waiting")])
        .await
        .unwrap();

    let err = h
        .consumer
        .process_batch(&[failed_machine("4", "cannot run instances: no matching node available")])
        .await
        .unwrap_err();
    match err {
        ReconcileError::AllocationFailed { series, reason } => {
            assert_eq!(series, "trusty");
            assert_eq!(reason, "machine 4: cannot run instances: no matching node available");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn allocation_error_on_untracked_machine_is_ignored() {
    let h = harness(MockOrchestrator::default(), NodeStatus::Deployed);
    h.consumer
        .process_batch(&[failed_machine("8", "no matching node")])
        .await
        .unwrap();
    assert!(h.store.get_machine("8").is_none());
}

#[tokio::test]
async fn run_fails_on_allocation_error() {
    let h = harness(MockOrchestrator::default(), NodeStatus::Deployed);
    h.orchestrator.push(vec![
        unit("svc-tok/0", "4", "waiting"),
        failed_machine("4", "no matching node"),
    ]);

    let err = bounded(h.consumer.run()).await.unwrap_err();
    assert!(matches!(err, ReconcileError::AllocationFailed { .. }));
}

#[tokio::test]
async fn run_consumes_stream_in_order() {
    let h = harness(MockOrchestrator::default(), NodeStatus::Deployed);
    let store = h.store.clone();
    h.orchestrator.push(vec![unit("svc-tok/0", "1", "waiting")]);
    h.orchestrator.push(vec![unit("svc-tok/0", "1", "active")]);
    h.supervisor.spawn("watch", h.consumer.run());

    wait_until(|| {
        store
            .get_unit("svc-tok/0")
            .is_some_and(|u| u.status == WorkloadStatus::Active)
    })
    .await;
    h.supervisor.shutdown();
}
