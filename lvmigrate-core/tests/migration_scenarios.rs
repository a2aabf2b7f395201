//! End-to-end migration scenarios against the mock gateway.
//!
//! These tests drive the full executor and check what ends up in the
//! hypervisor, the volume manager and the snapshot directory.

use std::path::{Path, PathBuf};

use lvmigrate_core::{
    ErrorKind, FailPoint, GatewayCall, MigrationOptions, MigrationRequest, Migrator, MockGateway,
    Phase, SnapshotLog,
};

const DOMAIN: &str = "web01";
const TIMESTAMP: &str = "2024-05-01_10-00-00";

const DOMAIN_XML: &str = r#"<domain type='kvm'>
  <name>web01</name>
  <memory unit='KiB'>2097152</memory>
  <devices>
    <disk type='block' device='disk'>
      <driver name='qemu' type='raw' cache='none' io='native'/>
      <source dev='/dev/vg1/web01-root'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <disk type='block' device='disk'>
      <driver name='qemu' type='raw' cache='none' io='native'/>
      <source dev='/dev/vg2/web01-data'/>
      <target dev='vdb' bus='virtio'/>
    </disk>
    <disk type='file' device='cdrom'>
      <driver name='qemu' type='raw'/>
      <target dev='sda' bus='sata'/>
      <readonly/>
    </disk>
  </devices>
</domain>
"#;

fn gateway() -> MockGateway {
    MockGateway::new()
        .with_domain(DOMAIN, DOMAIN_XML)
        .with_volume("/dev/vg1/web01-root", "vg1", 5120)
        .with_volume("/dev/vg2/web01-data", "vg2", 25600)
}

fn migrator<'a>(
    mock: &'a MockGateway,
    dir: &Path,
    destination_vg: &str,
    devices: &[&str],
    options: MigrationOptions,
) -> Migrator<'a> {
    let request = MigrationRequest::new(DOMAIN, destination_vg)
        .with_devices(devices.iter().map(|d| d.to_string()).collect());
    Migrator::new(
        mock,
        mock,
        request,
        options,
        SnapshotLog::with_timestamp(dir, DOMAIN, TIMESTAMP),
    )
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn snapshot_name(label: &str) -> String {
    format!("{}_{}_{}", TIMESTAMP, DOMAIN, label)
}

#[tokio::test]
async fn test_migrates_only_disks_outside_destination_group() {
    let dir = tempfile::tempdir().unwrap();
    let mock = gateway();

    let mut m = migrator(&mock, dir.path(), "vg2", &[], MigrationOptions::default());
    let plan = m.gather().await.unwrap().clone();
    assert_eq!(plan.entries.len(), 1);
    assert_eq!(plan.entries[0].device_id, "vda");
    assert_eq!(plan.entries[0].destination_path, "/dev/vg2/web01-root");
    assert_eq!(plan.skipped[0].device_id, "vdb");

    let report = m.run().await.unwrap();
    assert_eq!(report.migrated, vec!["vda"]);
    assert_eq!(report.skipped, vec!["vdb"]);
    assert_eq!(report.removed_volumes, vec!["/dev/vg1/web01-root"]);
    assert!(report.cleanup_failures.is_empty());

    // Final definition points vda at the new volume and leaves vdb alone.
    let xml = mock.definition(DOMAIN).expect("domain must be defined again");
    assert!(xml.contains("/dev/vg2/web01-root"));
    assert!(!xml.contains("/dev/vg1/web01-root"));
    assert!(xml.contains("<source dev='/dev/vg2/web01-data'/>"));
    assert!(xml.contains("<target dev='sda' bus='sata'/>"));

    assert_eq!(mock.live_source(DOMAIN, "vda").as_deref(), Some("/dev/vg2/web01-root"));
    assert!(mock.live_source(DOMAIN, "vdb").is_none());

    let created = mock.volume("/dev/vg2/web01-root").unwrap();
    assert_eq!(created.size_le, 5120);
    assert!(mock.volume("/dev/vg1/web01-root").is_none());
    assert!(mock.volume("/dev/vg2/web01-data").is_some());

    let mutating = mock.mutating_calls();
    assert_eq!(mutating.len(), 5);
    assert_eq!(
        mutating[0],
        GatewayCall::Create { vg: "vg2".into(), name: "web01-root".into(), size_le: 5120 }
    );
    assert_eq!(mutating[1], GatewayCall::Undefine { domain: DOMAIN.into() });
    assert_eq!(
        mutating[2],
        GatewayCall::BlockCopy {
            domain: DOMAIN.into(),
            device: "vda".into(),
            destination: "/dev/vg2/web01-root".into(),
        }
    );
    assert_eq!(
        mutating[3],
        GatewayCall::Define { xml_file: dir.path().join(snapshot_name("final_state")) }
    );
    assert_eq!(mutating[4], GatewayCall::Remove { volume: "/dev/vg1/web01-root".into() });

    // Every snapshot of the run is gone.
    assert!(files_in(dir.path()).is_empty());
}

#[tokio::test]
async fn test_filter_on_disk_already_in_destination_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let mock = gateway();

    let report = migrator(&mock, dir.path(), "vg2", &["vdb"], MigrationOptions::default())
        .run()
        .await
        .unwrap();

    assert!(report.migrated.is_empty());
    assert_eq!(report.skipped, vec!["vdb"]);
    assert!(report.created_volumes.is_empty());
    assert!(mock.mutating_calls().is_empty());
    assert_eq!(mock.definition(DOMAIN).as_deref(), Some(DOMAIN_XML));
    assert!(files_in(dir.path()).is_empty());
}

#[tokio::test]
async fn test_unknown_device_is_usage_error_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let mock = gateway();

    let err = migrator(&mock, dir.path(), "vg2", &["vda", "vdz"], MigrationOptions::default())
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Usage);
    assert_eq!(err.phase(), Some(Phase::Gather));
    assert!(err.to_string().contains("vdz"));

    // Only the configuration dump happened; LVM was never queried.
    assert_eq!(mock.calls(), vec![GatewayCall::DumpXml { domain: DOMAIN.into() }]);
    assert!(mock.mutating_calls().is_empty());

    // An aborted run keeps its snapshots.
    assert_eq!(files_in(dir.path()), vec![snapshot_name("initial_state")]);
}

#[tokio::test]
async fn test_copy_failure_on_second_disk_keeps_trail() {
    let dir = tempfile::tempdir().unwrap();
    let mock = gateway();
    mock.fail_on(FailPoint::BlockCopy("vdb".to_string()));

    let err = migrator(&mock, dir.path(), "vg3", &[], MigrationOptions::default())
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Tool);
    assert_eq!(err.phase(), Some(Phase::Copy));
    assert!(err.to_string().contains("vdb"));

    let last = err.recovery_snapshot().expect("a snapshot to recover from").clone();
    assert_eq!(last, dir.path().join(snapshot_name("after_vda")));

    // The first disk's rewrite lives only in the retained snapshot.
    let recovered = std::fs::read_to_string(&last).unwrap();
    assert!(recovered.contains("/dev/vg3/web01-root"));
    assert!(recovered.contains("/dev/vg2/web01-data"));

    assert!(mock.definition(DOMAIN).is_none());
    assert!(!mock.calls().iter().any(|c| matches!(c, GatewayCall::Define { .. })));
    assert!(!mock.calls().iter().any(|c| matches!(c, GatewayCall::Remove { .. })));

    assert_eq!(
        files_in(dir.path()),
        vec![snapshot_name("after_vda"), snapshot_name("initial_state")]
    );
}

#[tokio::test]
async fn test_create_failure_leaves_created_volumes() {
    let dir = tempfile::tempdir().unwrap();
    let mock = gateway();
    mock.fail_on(FailPoint::Create("web01-data".to_string()));

    let err = migrator(&mock, dir.path(), "vg3", &[], MigrationOptions::default())
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.phase(), Some(Phase::CreateVolumes));
    assert!(err.to_string().contains("vdb"));

    // No rollback of the first volume, and the domain was never undefined.
    assert!(mock.volume("/dev/vg3/web01-root").is_some());
    assert!(mock.definition(DOMAIN).is_some());
    assert!(!mock.calls().iter().any(|c| matches!(c, GatewayCall::Undefine { .. })));
    assert_eq!(files_in(dir.path()), vec![snapshot_name("initial_state")]);
}

#[tokio::test]
async fn test_cleanup_failure_warns_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let mock = gateway();
    mock.fail_on(FailPoint::Remove("/dev/vg1/web01-root".to_string()));

    let report = migrator(&mock, dir.path(), "vg2", &[], MigrationOptions::default())
        .run()
        .await
        .unwrap();

    assert_eq!(report.migrated, vec!["vda"]);
    assert_eq!(report.cleanup_failures, vec!["/dev/vg1/web01-root"]);
    assert!(report.removed_volumes.is_empty());
    assert!(mock.volume("/dev/vg1/web01-root").is_some());
    assert!(files_in(dir.path()).is_empty());
}

#[tokio::test]
async fn test_cleanup_failure_is_fatal_when_strict() {
    let dir = tempfile::tempdir().unwrap();
    let mock = gateway();
    mock.fail_on(FailPoint::Remove("/dev/vg1/web01-root".to_string()));

    let options = MigrationOptions { strict_cleanup: true, ..Default::default() };
    let err = migrator(&mock, dir.path(), "vg2", &[], options)
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.phase(), Some(Phase::CleanupOldVolumes));
    // The domain is already safely defined on the new volume.
    assert!(mock.definition(DOMAIN).unwrap().contains("/dev/vg2/web01-root"));
    assert_eq!(
        files_in(dir.path()),
        vec![
            snapshot_name("after_vda"),
            snapshot_name("final_state"),
            snapshot_name("initial_state"),
        ]
    );
}

#[tokio::test]
async fn test_discard_only_touches_files_of_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let older: PathBuf = dir.path().join("2024-04-01_09-00-00_web01_initial_state");
    std::fs::write(&older, DOMAIN_XML).unwrap();

    let mock = gateway();
    migrator(&mock, dir.path(), "vg2", &[], MigrationOptions::default())
        .run()
        .await
        .unwrap();

    assert_eq!(files_in(dir.path()), vec!["2024-04-01_09-00-00_web01_initial_state"]);
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mock = gateway();

    let options = MigrationOptions { dry_run: true, ..Default::default() };
    let mut m = migrator(&mock, dir.path(), "vg3", &[], options);
    assert_eq!(m.gather().await.unwrap().len(), 2);

    let report = m.run().await.unwrap();
    assert!(report.dry_run);
    assert!(report.migrated.is_empty());
    assert!(mock.mutating_calls().is_empty());
    assert!(files_in(dir.path()).is_empty());
}

#[tokio::test]
async fn test_empty_dev_dir_gives_bare_group_paths() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockGateway::new()
        .with_dev_dir("")
        .with_domain(DOMAIN, DOMAIN_XML)
        .with_volume("/dev/vg1/web01-root", "vg1", 5120)
        .with_volume("/dev/vg2/web01-data", "vg2", 25600);

    let options = MigrationOptions { dev_dir: String::new(), ..Default::default() };
    let report = migrator(&mock, dir.path(), "vg2", &[], options).run().await.unwrap();

    assert_eq!(report.created_volumes, vec!["/vg2/web01-root"]);
    assert!(mock.definition(DOMAIN).unwrap().contains("<source dev=\"/vg2/web01-root\"/>"));
}

#[tokio::test]
async fn test_volume_lookup_failure_aborts_before_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let mock = gateway();
    mock.fail_on(FailPoint::Display("/dev/vg2/web01-data".to_string()));

    let err = migrator(&mock, dir.path(), "vg3", &[], MigrationOptions::default())
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Tool);
    assert_eq!(err.phase(), Some(Phase::Gather));
    assert!(mock.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_malformed_domain_xml_is_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockGateway::new().with_domain(DOMAIN, "<domain type='kvm'><devices>");

    let err = migrator(&mock, dir.path(), "vg2", &[], MigrationOptions::default())
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Parse);
    assert!(mock.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_run_after_failed_gather_is_internal_error() {
    let dir = tempfile::tempdir().unwrap();
    let mock = gateway();

    let mut migrator = migrator(&mock, dir.path(), "vg2", &["vdz"], MigrationOptions::default());
    let err = migrator.gather().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);

    let err = migrator.run().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(err.phase(), Some(Phase::Aborted));
    assert!(mock.mutating_calls().is_empty());
}
