//! VirtualBox adapter tests against a scripted transport.

use std::path::Path;
use std::sync::Arc;

use virtdeck_backends::{
    AdapterError, BackendKind, CreateSpec, InstanceState, ScriptedRunner, VboxBackend, VirtBackend,
};

const VERSION_OUTPUT: &str = "7.0.14r161095\n";

/// Number of executable candidates probed when none answers.
const CANDIDATE_COUNT: usize = 5;

async fn available_backend(runner: &Arc<ScriptedRunner>) -> VboxBackend {
    runner.push_ok(VERSION_OUTPUT);
    VboxBackend::detect_with(Arc::clone(runner) as Arc<dyn virtdeck_backends::CommandRunner>).await
}

async fn unavailable_backend(runner: &Arc<ScriptedRunner>) -> VboxBackend {
    for _ in 0..CANDIDATE_COUNT {
        runner.push_output(127, "", "not found");
    }
    VboxBackend::detect_with(Arc::clone(runner) as Arc<dyn virtdeck_backends::CommandRunner>).await
}

#[tokio::test]
async fn failed_probe_short_circuits_every_operation() {
    let runner = Arc::new(ScriptedRunner::new());
    let backend = unavailable_backend(&runner).await;

    assert!(!backend.is_available());
    let probe_calls = runner.call_count();

    assert!(matches!(
        backend.list(true).await.unwrap_err(),
        AdapterError::Unavailable(BackendKind::VirtualBox)
    ));
    assert!(matches!(
        backend.start("uuid").await.unwrap_err(),
        AdapterError::Unavailable(BackendKind::VirtualBox)
    ));
    assert!(matches!(
        backend.create(&CreateSpec::new("vm")).await.unwrap_err(),
        AdapterError::Unavailable(BackendKind::VirtualBox)
    ));
    assert!(matches!(
        backend.resize_disk(Path::new("/d.vdi"), 1024).await.unwrap_err(),
        AdapterError::Unavailable(BackendKind::VirtualBox)
    ));

    // Nothing beyond the construction-time probe ever hit the transport.
    assert_eq!(runner.call_count(), probe_calls);
}

#[tokio::test]
async fn list_issues_one_detail_query_per_vm() {
    let runner = Arc::new(ScriptedRunner::new());
    let backend = available_backend(&runner).await;

    runner.push_ok(concat!(
        "\"MyVM\" {550e8400-e29b-41d4-a716-446655440000}\n",
        "\"Other VM\" {111e8400-e29b-41d4-a716-446655440111}\n",
        "not a vm line\n",
    ));
    runner.push_ok("VMState=\"running\"\nmemory=\"2048\"\ncpus=\"2\"\n");
    runner.push_ok("VMState=\"poweroff\"\nmemory=\"1024\"\ncpus=\"1\"\n");

    let instances = backend.list(true).await.unwrap();

    assert_eq!(instances.len(), 2);
    assert_eq!(instances[0].name, "MyVM");
    assert_eq!(instances[0].id, "550e8400-e29b-41d4-a716-446655440000");
    assert_eq!(instances[0].state, InstanceState::Running);
    assert_eq!(instances[0].memory_mb, 2048);
    assert_eq!(instances[0].cpu_count, 2);
    assert_eq!(instances[1].state, InstanceState::Stopped);

    // Probe + list + one showvminfo per parsed VM.
    let calls = runner.calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[1].args, vec!["list", "vms"]);
    assert_eq!(
        calls[2].args,
        vec!["showvminfo", "550e8400-e29b-41d4-a716-446655440000", "--machinereadable"]
    );
}

#[tokio::test]
async fn a_failing_detail_query_degrades_that_vm_to_unknown() {
    let runner = Arc::new(ScriptedRunner::new());
    let backend = available_backend(&runner).await;

    runner.push_ok("\"MyVM\" {550e8400-e29b-41d4-a716-446655440000}\n");
    runner.push_output(1, "", "VBOX_E_OBJECT_NOT_FOUND");

    let instances = backend.list(true).await.unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].state, InstanceState::Unknown);
    assert_eq!(instances[0].memory_mb, 0);
}

#[tokio::test]
async fn create_runs_the_fixed_sequence_in_order() {
    let runner = Arc::new(ScriptedRunner::new());
    let backend = available_backend(&runner).await;

    runner.push_ok(""); // createvm
    runner.push_ok("UUID=\"550e8400-e29b-41d4-a716-446655440000\"\n");
    for _ in 0..5 {
        runner.push_ok(""); // memory, cpus, ostype, storagectl, createhd
    }
    runner.push_ok(""); // storageattach

    let spec = CreateSpec::new("dev")
        .with_memory(2048)
        .with_cpus(2)
        .with_disk("/vms/dev.vdi", 20480);
    backend.create(&spec).await.unwrap();

    let calls = runner.calls();
    let commands: Vec<&str> = calls.iter().skip(1).map(|c| c.args[0].as_str()).collect();
    assert_eq!(
        commands,
        vec![
            "createvm",
            "showvminfo",
            "modifyvm",
            "modifyvm",
            "modifyvm",
            "storagectl",
            "createhd",
            "storageattach",
        ]
    );

    assert_eq!(calls[1].args, vec!["createvm", "--name", "dev", "--register"]);
    assert!(calls[3].args.contains(&"--memory".to_string()));
    assert!(calls[3].args.contains(&"2048".to_string()));
    assert!(calls[7].args.contains(&"/vms/dev.vdi".to_string()));
}

#[tokio::test]
async fn create_reports_the_failing_step() {
    let runner = Arc::new(ScriptedRunner::new());
    let backend = available_backend(&runner).await;

    runner.push_ok(""); // createvm
    runner.push_ok("UUID=\"550e8400-e29b-41d4-a716-446655440000\"\n");
    runner.push_output(1, "", "VBOX_E_INVALID_VM_STATE"); // modifyvm --memory

    let err = backend
        .create(&CreateSpec::new("dev").with_disk("/vms/dev.vdi", 20480))
        .await
        .unwrap_err();

    match err {
        AdapterError::CreateStep { step, source } => {
            assert_eq!(step, "set memory");
            assert!(matches!(*source, AdapterError::CommandFailed { code: Some(1), .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // Sequence stopped at the failing step: probe, createvm, showvminfo,
    // modifyvm.
    assert_eq!(runner.call_count(), 4);
}

#[tokio::test]
async fn create_attaches_an_iso_only_when_it_exists_locally() {
    let iso_dir = tempfile::tempdir().unwrap();
    let iso = iso_dir.path().join("ubuntu.iso");
    std::fs::write(&iso, b"iso").unwrap();

    let runner = Arc::new(ScriptedRunner::new());
    let backend = available_backend(&runner).await;

    runner.push_ok(""); // createvm
    runner.push_ok("UUID=\"550e8400-e29b-41d4-a716-446655440000\"\n");
    for _ in 0..6 {
        runner.push_ok(""); // modifyvm x3, storagectl, createhd, storageattach
    }
    runner.push_output(1, "", "controller already exists"); // IDE storagectl, tolerated
    runner.push_ok(""); // ISO storageattach

    let spec = CreateSpec::new("dev")
        .with_disk("/vms/dev.vdi", 20480)
        .with_iso(&iso);
    backend.create(&spec).await.unwrap();

    let last = runner.calls().pop().unwrap();
    assert!(last.args.contains(&"dvddrive".to_string()));
    assert!(last.args.contains(&iso.to_string_lossy().into_owned()));

    // A spec pointing at a missing ISO skips the attach entirely.
    let runner = Arc::new(ScriptedRunner::new());
    let backend = available_backend(&runner).await;

    runner.push_ok("");
    runner.push_ok("UUID=\"550e8400-e29b-41d4-a716-446655440000\"\n");
    for _ in 0..6 {
        runner.push_ok("");
    }

    let spec = CreateSpec::new("dev")
        .with_disk("/vms/dev.vdi", 20480)
        .with_iso(iso_dir.path().join("missing.iso"));
    backend.create(&spec).await.unwrap();

    assert_eq!(runner.call_count(), 9);
    assert!(!runner
        .calls()
        .iter()
        .any(|c| c.args.contains(&"dvddrive".to_string())));
}

#[tokio::test]
async fn resize_failure_surfaces_the_exit_code() {
    let runner = Arc::new(ScriptedRunner::new());
    let backend = available_backend(&runner).await;

    runner.push_output(1, "", "VBOX_E_NOT_SUPPORTED");

    let err = backend
        .resize_disk(Path::new("/vms/dev.vdi"), 40960)
        .await
        .unwrap_err();

    match err {
        AdapterError::CommandFailed { command, code, stderr } => {
            assert!(command.contains("modifyhd"));
            assert!(command.contains("40960"));
            assert_eq!(code, Some(1));
            assert_eq!(stderr, "VBOX_E_NOT_SUPPORTED");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn listed_disks_carry_complete_slots_that_round_trip_into_removal() {
    let runner = Arc::new(ScriptedRunner::new());
    let backend = available_backend(&runner).await;

    runner.push_ok(concat!(
        "storagecontrollername0=\"SATA Controller\"\n",
        "\"storageattach-0\"=\"0,0,hdd,/vms/root.vdi\"\n",
        "\"storageattach-1\"=\"1,0,hdd,/vms/data.vdi\"\n",
        "storagecontrollername1=\"IDE Controller\"\n",
        "\"storageattach-2\"=\"0,0,dvddrive,/isos/u.iso\"\n",
    ));
    runner.push_ok("Capacity: 20480 MBytes\nFormat: VDI\n");
    runner.push_ok("Capacity: 40960 MBytes\nFormat: VDI\n");

    let disks = backend.list_disks("uuid-1").await.unwrap();
    assert_eq!(disks.len(), 2);
    for disk in &disks {
        assert!(!disk.slot.controller.is_empty());
    }
    assert_eq!(disks[1].slot.port, 1);
    assert_eq!(disks[1].size_mb, 40960);
    assert_eq!(disks[1].format, "VDI");

    // Remove by the listed slot; the detach names the slot's controller.
    runner.push_ok("");
    backend.remove_disk("uuid-1", &disks[1].slot).await.unwrap();

    let detach = runner.calls().pop().unwrap();
    assert_eq!(detach.args[0], "storageattach");
    assert!(detach.args.contains(&"SATA Controller".to_string()));
    assert!(detach.args.contains(&"--port".to_string()));
    assert!(detach.args.contains(&"1".to_string()));
    assert!(detach.args.contains(&"none".to_string()));

    // A fresh listing without the attachment no longer carries the slot.
    runner.push_ok(concat!(
        "storagecontrollername0=\"SATA Controller\"\n",
        "\"storageattach-0\"=\"0,0,hdd,/vms/root.vdi\"\n",
    ));
    runner.push_ok("Capacity: 20480 MBytes\nFormat: VDI\n");

    let disks = backend.list_disks("uuid-1").await.unwrap();
    assert!(disks.iter().all(|d| d.slot.port != 1));
}

#[tokio::test]
async fn detach_media_sets_the_medium_to_none() {
    let runner = Arc::new(ScriptedRunner::new());
    let backend = available_backend(&runner).await;

    runner.push_ok("");
    backend.detach_media("uuid-1").await.unwrap();

    let call = runner.calls().pop().unwrap();
    assert!(call.args.contains(&"dvddrive".to_string()));
    assert!(call.args.contains(&"none".to_string()));
    assert!(call.args.contains(&"IDE Controller".to_string()));
}

#[tokio::test]
async fn attach_media_tolerates_an_existing_ide_controller() {
    let runner = Arc::new(ScriptedRunner::new());
    let backend = available_backend(&runner).await;

    runner.push_output(1, "", "controller already exists"); // storagectl
    runner.push_ok(""); // storageattach

    backend
        .attach_media("uuid-1", Path::new("/isos/ubuntu.iso"))
        .await
        .unwrap();

    let attach = runner.calls().pop().unwrap();
    assert!(attach.args.contains(&"/isos/ubuntu.iso".to_string()));
}
