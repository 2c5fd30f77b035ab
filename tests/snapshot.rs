use camino::Utf8PathBuf;

use cmip_climatology::snapshot::SnapshotStore;

const URL: &str = "https://storage.googleapis.com/cmip6/pangeo-cmip6.csv.gz";

#[test]
fn snapshots_round_trip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().join("catalogs")).unwrap();
    let store = SnapshotStore::new_with_root(root.clone());

    assert!(store.read(URL).unwrap().is_none());
    let path = store.write(URL, b"source_id,experiment_id,zstore\n").unwrap();
    assert!(path.starts_with(&root));
    assert_eq!(
        store.read(URL).unwrap().as_deref(),
        Some(b"source_id,experiment_id,zstore\n".as_slice())
    );

    store.write(URL, b"replaced").unwrap();
    assert_eq!(store.read(URL).unwrap().as_deref(), Some(b"replaced".as_slice()));

    store.clear().unwrap();
    assert!(store.read(URL).unwrap().is_none());
}
