//! End-to-end lifecycle scenarios against the in-memory runtime: the
//! paths a user walks with create, run, stop, restart and rm.

use std::path::PathBuf;

use libstevedore::container;
use libstevedore::create::create_container;
use libstevedore::datastore::DataStore;
use libstevedore::names::NameStore;
use libstevedore::network::ports;
use libstevedore::options::{ContainerOptions, ImageSource};
use libstevedore::remove::{remove_container, RemoveOptions};
use libstevedore::runtime::memory::MemoryRuntime;
use libstevedore::runtime::{ImageConfig, Services, TaskIo, TaskStatus};
use libstevedore::task;
use libstevedore::volume::{MountRequest, MountSource};

const IMAGE: &str = "docker.io/library/alpine:latest";
const NS: &str = "default";

struct World {
    runtime: MemoryRuntime,
    services: Services,
    store: DataStore,
    names: NameStore,
    _tmp: tempfile::TempDir,
}

fn world() -> World {
    let tmp = tempfile::tempdir().unwrap();
    let store = DataStore::open(tmp.path()).unwrap();
    let names = NameStore::new(&store);
    let runtime = MemoryRuntime::new();
    runtime.add_image(
        IMAGE,
        ImageConfig {
            env: vec!["PATH=/usr/local/bin:/usr/bin:/bin".into()],
            cmd: vec!["/bin/sh".into()],
            ..Default::default()
        },
    );
    runtime.add_network("bridge");
    let services = runtime.services();
    World {
        runtime,
        services,
        store,
        names,
        _tmp: tmp,
    }
}

fn opts(args: &[&str]) -> ContainerOptions {
    let mut opts = ContainerOptions::new(
        ImageSource::Image(IMAGE.into()),
        PathBuf::from("/usr/bin/stevedore"),
    );
    opts.args = args.iter().map(|a| a.to_string()).collect();
    opts
}

#[test]
fn create_run_wait_remove() {
    let w = world();
    let mut o = opts(&["echo", "hello"]);
    o.name = Some("short".to_string());

    let container = create_container(&w.services, &w.store, &w.names, NS, &o).unwrap();
    let exit = task::start_task(&w.services, NS, container.id(), TaskIo::default()).unwrap();
    let status = exit.recv().unwrap();
    assert_eq!(status.code, 0);
    assert_eq!(
        w.services.tasks.status(NS, container.id()).unwrap(),
        TaskStatus::Stopped
    );

    let removed = remove_container(
        &w.services,
        &w.store,
        &w.names,
        NS,
        "short",
        RemoveOptions::default(),
    )
    .unwrap();
    assert_eq!(removed, container.id());
    assert!(container::resolve(&*w.services.containers, &w.names, NS, "short").is_err());
    // no state dir remains and the name is free again
    let state_dir = w.store.container_dir(NS, container.id()).unwrap();
    assert!(!state_dir.exists());
    w.names.acquire(NS, "short", "0".repeat(64).as_str()).unwrap();
}

#[test]
fn detached_run_records_ports_and_resolv_conf() {
    let w = world();
    let mut o = opts(&["sleep", "infinity"]);
    o.name = Some("web".to_string());
    o.network.ports = ports::parse_all(&["127.0.0.1:8080:80/tcp".to_string()]).unwrap();

    let container = create_container(&w.services, &w.store, &w.names, NS, &o).unwrap();
    task::start_task(&w.services, NS, container.id(), TaskIo::default()).unwrap();

    // the decoded label map carries the canonical port tuple
    let reloaded = container::resolve(&*w.services.containers, &w.names, NS, "web").unwrap();
    assert_eq!(reloaded.labels.ports.len(), 1);
    let port = &reloaded.labels.ports[0];
    assert_eq!(port.host_ip, "127.0.0.1");
    assert_eq!(port.host_port, 8080);
    assert_eq!(port.container_port, 80);
    assert_eq!(port.protocol, "tcp");

    let state_dir = reloaded.labels.state_dir.clone().unwrap();
    assert!(state_dir.join("resolv.conf").exists());
}

#[test]
fn stop_then_restart_keeps_identity() {
    let w = world();
    let mut o = opts(&["sleep", "infinity"]);
    o.name = Some("web".to_string());
    o.stop_signal = Some("SIGINT".to_string());

    let created = create_container(&w.services, &w.store, &w.names, NS, &o).unwrap();
    task::start_task(&w.services, NS, created.id(), TaskIo::default()).unwrap();

    let resolved = container::resolve(&*w.services.containers, &w.names, NS, "web").unwrap();
    let status = task::stop_task(&w.services, NS, resolved.id(), &resolved.labels, None)
        .unwrap()
        .unwrap();
    assert_eq!(status.code, 128 + libc::SIGINT);

    task::restart_task(&w.services, &resolved, None).unwrap();
    assert_eq!(
        w.services.tasks.status(NS, created.id()).unwrap(),
        TaskStatus::Running
    );
    // same record, same name, fresh task
    let again = container::resolve(&*w.services.containers, &w.names, NS, "web").unwrap();
    assert_eq!(again.id(), created.id());
}

#[test]
fn name_is_exclusive_until_removed() {
    let w = world();
    let mut o = opts(&["sleep", "infinity"]);
    o.name = Some("db".to_string());

    create_container(&w.services, &w.store, &w.names, NS, &o).unwrap();
    let err = create_container(&w.services, &w.store, &w.names, NS, &o).unwrap_err();
    assert!(err.to_string().contains("db"), "unexpected error: {err}");

    remove_container(
        &w.services,
        &w.store,
        &w.names,
        NS,
        "db",
        RemoveOptions::default(),
    )
    .unwrap();
    create_container(&w.services, &w.store, &w.names, NS, &o).unwrap();
}

#[test]
fn running_container_needs_force() {
    let w = world();
    let o = opts(&["sleep", "infinity"]);
    let container = create_container(&w.services, &w.store, &w.names, NS, &o).unwrap();
    task::start_task(&w.services, NS, container.id(), TaskIo::default()).unwrap();

    let err = remove_container(
        &w.services,
        &w.store,
        &w.names,
        NS,
        container.id(),
        RemoveOptions::default(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("running container"));

    remove_container(
        &w.services,
        &w.store,
        &w.names,
        NS,
        container.id(),
        RemoveOptions {
            force: true,
            volumes: false,
        },
    )
    .unwrap();
    assert!(!w.runtime.task_exists(NS, container.id()));
}

#[test]
fn anonymous_volumes_follow_rm_v() {
    let w = world();
    let mut o = opts(&["true"]);
    o.mounts = vec![MountRequest {
        source: MountSource::Anonymous,
        destination: PathBuf::from("/data"),
        options: Vec::new(),
    }];

    let container = create_container(&w.services, &w.store, &w.names, NS, &o).unwrap();
    assert_eq!(container.labels.anonymous_volumes.len(), 1);
    let volume = container.labels.anonymous_volumes[0].clone();
    assert!(w.services.volumes.get(&volume).is_ok());

    remove_container(
        &w.services,
        &w.store,
        &w.names,
        NS,
        container.id(),
        RemoveOptions {
            force: false,
            volumes: true,
        },
    )
    .unwrap();
    assert!(w.services.volumes.get(&volume).is_err());
}

#[test]
fn failed_task_exit_code_propagates() {
    let w = world();
    let o = opts(&["false"]);
    let container = create_container(&w.services, &w.store, &w.names, NS, &o).unwrap();
    let exit = task::start_task(&w.services, NS, container.id(), TaskIo::default()).unwrap();
    assert_eq!(exit.recv().unwrap().code, 1);
}
