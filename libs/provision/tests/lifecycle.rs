//! End-to-end lifecycle tests: each provisioner operation run against the
//! in-memory collaborators, asserting every externally observable effect.

use std::collections::BTreeMap;
use std::sync::Arc;

use carton_events::{EventAction, EventType, MemorySink};
use carton_id::{AccountId, AssemblyId, ComponentId};
use carton_provision::bus::{MemoryBus, StateRequest, CATEGORY_STATE};
use carton_provision::compute::{LifecycleAction, MockCompute};
use carton_provision::metadata::{output_keys, MemoryStore};
use carton_provision::progress::BufferProgress;
use carton_provision::provisioner::{ClusterProvisioner, Provisioner, ProvisionerConfig};
use carton_provision::router::{MemoryRouter, Router, RouterRegistry};
use carton_provision::{BoxLevel, BoxSpec, Cluster, ComputeRequest, Node, PollConfig, Repo, Status};

struct Harness {
    compute: Arc<MockCompute>,
    metadata: Arc<MemoryStore>,
    sink: Arc<MemorySink>,
    bus: Arc<MemoryBus>,
    router: Arc<MemoryRouter>,
    provisioner: Arc<ClusterProvisioner>,
}

fn harness_with(compute: MockCompute, sink: MemorySink) -> Harness {
    let compute = Arc::new(compute);
    let metadata = Arc::new(MemoryStore::new());
    let sink = Arc::new(sink);
    let bus = Arc::new(MemoryBus::default());
    let router = Arc::new(MemoryRouter::new());

    let cluster = Cluster::new(
        compute.clone(),
        vec![Node::new("http://localhost:2633/RPC2", BTreeMap::new())],
    )
    .unwrap();

    let mut routers = RouterRegistry::new();
    routers.register("route53", router.clone());

    let provisioner = Arc::new(ClusterProvisioner::new(
        ProvisionerConfig {
            default_image: "megam-ubuntu-24.04".to_string(),
            vcpu_throttle: "4".to_string(),
            poll: PollConfig::default(),
        },
        cluster,
        metadata.clone(),
        sink.clone(),
        bus.clone(),
        Arc::new(routers),
    ));

    Harness {
        compute,
        metadata,
        sink,
        bus,
        router,
        provisioner,
    }
}

fn harness() -> Harness {
    harness_with(MockCompute::new(), MemorySink::new())
}

fn standalone_box() -> BoxSpec {
    BoxSpec {
        full_name: "blog.example.io".to_string(),
        account_id: AccountId::parse("acct-7").unwrap(),
        assembly_id: AssemblyId::parse("ASM-9").unwrap(),
        assemblies_id: "AMS-40".to_string(),
        component_id: None,
        level: BoxLevel::Standalone,
        repo: Repo {
            source: "github.com/acme/blog.git".to_string(),
            one_click: false,
        },
        image_version: "v1".to_string(),
        compute: ComputeRequest {
            cpushare: 2,
            memory_mb: 1024,
            disk_mb: 10240,
        },
        router: "route53".to_string(),
        kind: "torpedo".to_string(),
    }
}

fn member_box() -> BoxSpec {
    BoxSpec {
        component_id: Some(ComponentId::parse("COMP-3").unwrap()),
        level: BoxLevel::AssemblyMember,
        ..standalone_box()
    }
}

#[tokio::test(start_paused = true)]
async fn git_deploy_provisions_records_and_bills() {
    let h = harness();
    let spec = standalone_box();
    let progress = Arc::new(BufferProgress::new());

    let image = h
        .provisioner
        .clone()
        .git_deploy(&spec, progress.clone())
        .await
        .unwrap();
    assert_eq!(image, "megam-ubuntu-24.04");

    // One create with the throttled vCPU value and the assembly tags.
    let created = h.compute.created().await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].name, "blog.example.io");
    assert_eq!(created[0].cpu, "0.500000");
    assert_eq!(created[0].memory, "1024");
    assert_eq!(created[0].context.get("assembly_id").unwrap(), "ASM-9");

    // VM id and VNC endpoint recorded as assembly outputs.
    let outputs = h.metadata.outputs(&spec.assembly_id).await;
    assert_eq!(outputs.get(output_keys::VM_ID), Some(&vec!["1000".to_string()]));
    assert_eq!(
        outputs.get(output_keys::VNC_HOST),
        Some(&vec!["10.0.0.5".to_string()])
    );
    assert_eq!(
        outputs.get(output_keys::VNC_PORT),
        Some(&vec!["5900".to_string()])
    );

    // Status written before and after the create, launching both times.
    assert_eq!(
        h.metadata.assembly_status_history(&spec.assembly_id).await,
        vec![Status::Launching, Status::Launching]
    );

    // The billing pair shares one metric snapshot.
    let events = h.sink.written().await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].action, EventAction::Deduct);
    assert_eq!(events[1].action, EventAction::Transaction);
    assert_eq!(events[0].data, events[1].data);

    let lines = progress.lines();
    assert!(lines.iter().any(|l| l.contains("git deploy")));
    assert!(lines.iter().any(|l| l.contains("machine created")));
    assert!(lines.last().unwrap().ends_with("OK"));
}

#[tokio::test(start_paused = true)]
async fn one_click_repo_deploys_its_own_image() {
    let h = harness();
    let mut spec = standalone_box();
    spec.repo.one_click = true;

    let image = h
        .provisioner
        .clone()
        .git_deploy(&spec, Arc::new(BufferProgress::new()))
        .await
        .unwrap();

    assert_eq!(image, "github.com/acme/blog.git");
    assert_eq!(h.compute.created().await[0].image, "github.com/acme/blog.git");
}

#[tokio::test(start_paused = true)]
async fn blank_image_id_falls_back_to_build_image() {
    let h = harness();
    let spec = standalone_box();

    let image = h
        .provisioner
        .clone()
        .image_deploy(&spec, "  ", Arc::new(BufferProgress::new()))
        .await
        .unwrap();

    assert_eq!(image, "megam-ubuntu-24.04");
}

#[tokio::test(start_paused = true)]
async fn failed_billing_tears_the_machine_back_down() {
    // A sink that rejects the two-event billing batch: the deploy fails
    // after the VM exists, so the unwind must remove it.
    let h = harness_with(MockCompute::new(), MemorySink::failing_after(1));
    let spec = standalone_box();
    let progress = Arc::new(BufferProgress::new());

    let err = h
        .provisioner
        .clone()
        .git_deploy(&spec, progress.clone())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("sink failed"));

    assert_eq!(h.compute.created().await.len(), 1);
    assert_eq!(h.compute.destroyed().await, vec!["blog.example.io"]);
    assert!(h.sink.written().await.is_empty());
    assert!(progress.lines().last().unwrap().contains("failed"));
}

#[tokio::test(start_paused = true)]
async fn unready_endpoint_leaves_box_launching_without_vnc() {
    let h = harness_with(MockCompute::new().endpoint_never_ready(), MemorySink::new());
    let spec = standalone_box();
    let progress = Arc::new(BufferProgress::new());

    h.provisioner
        .clone()
        .git_deploy(&spec, progress.clone())
        .await
        .unwrap();

    let outputs = h.metadata.outputs(&spec.assembly_id).await;
    assert!(outputs.contains_key(output_keys::VM_ID));
    assert!(!outputs.contains_key(output_keys::VNC_HOST));
    assert!(!outputs.contains_key(output_keys::VNC_PORT));

    // Nothing destroyed, and the narrative records the condition.
    assert!(h.compute.destroyed().await.is_empty());
    assert!(progress.lines().iter().any(|l| l.contains("not ready")));
}

#[tokio::test]
async fn destroy_removes_vm_route_and_notifies() {
    let h = harness();
    let spec = standalone_box();
    h.router.add_route(&spec.full_name).await.unwrap();

    h.provisioner
        .clone()
        .destroy(&spec, Arc::new(BufferProgress::new()))
        .await
        .unwrap();

    assert_eq!(h.compute.destroyed().await, vec!["blog.example.io"]);
    assert!(!h.router.has_route("blog.example.io").await);
    assert_eq!(
        h.metadata.assembly_status_history(&spec.assembly_id).await,
        vec![Status::Destroying]
    );

    let events = h.sink.written().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, EventAction::Destroyed);
    assert_eq!(events[0].event_type, EventType::User);
    assert_eq!(events[0].data.get("BoxName").unwrap(), "blog.example.io");
    assert_eq!(events[0].data.get("BoxKind").unwrap(), "torpedo");
}

#[tokio::test]
async fn set_state_publishes_adds_route_and_notifies() {
    let h = harness();
    let spec = standalone_box();

    h.provisioner
        .clone()
        .set_state(&spec, Arc::new(BufferProgress::new()), Status::Running)
        .await
        .unwrap();

    // The request rides the bus keyed by the machine name.
    let published = h.bus.published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "blog.example.io");
    let request: StateRequest = serde_json::from_slice(&published[0].1).unwrap();
    assert_eq!(request.cat_id, spec.assembly_id);
    assert_eq!(request.action, "running");
    assert_eq!(request.category, CATEGORY_STATE);

    assert!(h.router.has_route("blog.example.io").await);

    let events = h.sink.written().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, EventAction::Launched);
}

#[tokio::test]
async fn start_wraps_the_action_in_status_writes() {
    let h = harness();
    let spec = standalone_box();

    h.provisioner
        .clone()
        .start(&spec, Arc::new(BufferProgress::new()))
        .await
        .unwrap();

    assert_eq!(
        h.compute.actions().await,
        vec![("blog.example.io".to_string(), LifecycleAction::Start)]
    );
    assert_eq!(
        h.metadata.assembly_status_history(&spec.assembly_id).await,
        vec![Status::Starting, Status::Starting]
    );
}

#[tokio::test]
async fn stop_and_restart_forward_their_actions() {
    let h = harness();
    let spec = standalone_box();
    let w: Arc<BufferProgress> = Arc::new(BufferProgress::new());

    h.provisioner.clone().stop(&spec, w.clone()).await.unwrap();
    h.provisioner.clone().restart(&spec, w).await.unwrap();

    assert_eq!(
        h.compute.actions().await,
        vec![
            ("blog.example.io".to_string(), LifecycleAction::Stop),
            ("blog.example.io".to_string(), LifecycleAction::Restart),
        ]
    );
    assert_eq!(
        h.metadata.assembly_status_history(&spec.assembly_id).await,
        vec![
            Status::Stopping,
            Status::Stopping,
            Status::Bootstrapped,
            Status::Bootstrapped,
        ]
    );
}

#[tokio::test]
async fn standalone_status_writes_assembly_only() {
    let h = harness();
    let spec = standalone_box();

    h.provisioner
        .clone()
        .set_box_status(&spec, Arc::new(BufferProgress::new()), Status::Running)
        .await
        .unwrap();

    assert_eq!(
        h.metadata.assembly_status_history(&spec.assembly_id).await,
        vec![Status::Running]
    );
}

#[tokio::test]
async fn member_status_writes_both_records() {
    let h = harness();
    let spec = member_box();
    let component = spec.component_id.clone().unwrap();

    h.provisioner
        .clone()
        .set_box_status(&spec, Arc::new(BufferProgress::new()), Status::Running)
        .await
        .unwrap();

    assert_eq!(
        h.metadata.assembly_status_history(&spec.assembly_id).await,
        vec![Status::Running]
    );
    assert_eq!(
        h.metadata.component_status_history(&component).await,
        vec![Status::Running]
    );
}

#[tokio::test]
async fn addr_and_cnames_resolve_through_the_box_router() {
    let h = harness();
    let spec = standalone_box();
    h.router.add_route(&spec.full_name).await.unwrap();

    let addr = h.provisioner.addr(&spec).await.unwrap();
    assert_eq!(addr, "blog.example.io.lb.local");

    h.provisioner
        .set_cname(&spec, "www.acme.io")
        .await
        .unwrap();
    assert_eq!(
        h.router.cname_target("www.acme.io").await,
        Some("blog.example.io".to_string())
    );

    h.provisioner
        .unset_cname(&spec, "www.acme.io")
        .await
        .unwrap();
    assert_eq!(h.router.cname_target("www.acme.io").await, None);
}

#[tokio::test]
async fn unknown_router_fails_the_operation() {
    let h = harness();
    let mut spec = standalone_box();
    spec.router = "nginx".to_string();

    let err = h.provisioner.addr(&spec).await.unwrap_err();
    assert!(err.to_string().contains("nginx"));
}

#[tokio::test(start_paused = true)]
async fn usage_reports_the_deployed_machines() {
    let h = harness();
    let spec = standalone_box();
    h.provisioner
        .clone()
        .git_deploy(&spec, Arc::new(BufferProgress::new()))
        .await
        .unwrap();

    let records = h
        .provisioner
        .usage(1000, 2000, Arc::new(BufferProgress::new()))
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].vm_name, "blog.example.io");
    assert_eq!(records[0].window_start, 1000);
    assert_eq!(records[0].window_end, 2000);
}
