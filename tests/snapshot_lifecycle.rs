// tests/snapshot_lifecycle.rs
//
// Запуск только этого файла:
//   cargo test --test snapshot_lifecycle -- --nocapture
//
// Переходы PLAIN ⇄ SNAPSHOTTED и операции над снапшотами:
// - удаление единственного снапшота возвращает файл в PLAIN;
// - clone + delete clone не трогает оригинал (общие hard-link слои);
// - ограничение глубины цепочки;
// - ошибки: зарезервированные имена, AlreadyExists, NotFound, InvalidState;
// - rename / list / open_snapshot (read-only, переоткрывается после переходов);
// - слияние в общий с клоном слой сначала делает свою копию данных;
// - открытые дескрипторы переживают переходы.

use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use fsnap::{Access, AttrStore, DeleteOutcome, FileHandle, MemAttrs, SnapConfig, SnapError, Volume};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let base = std::env::temp_dir();
    base.join(format!("fsnaptest-life-{prefix}-{pid}-{t}-{id}"))
}

fn new_volume(prefix: &str) -> Result<(PathBuf, Volume)> {
    let root = unique_root(prefix);
    fs::create_dir_all(&root)?;
    let vol = Volume::open_with_config(&root, SnapConfig::default())?;
    Ok((root, vol))
}

fn read_all(h: &FileHandle) -> Result<Vec<u8>> {
    let size = h.size()?;
    Ok(h.read(0, size as usize)?.data)
}

#[test]
fn sole_snapshot_delete_reverts_to_plain() -> Result<()> {
    let root = unique_root("revert");
    fs::create_dir_all(&root)?;
    let attrs = Arc::new(MemAttrs::new());
    let vol = Volume::open_with_attrs(&root, SnapConfig::default(), attrs.clone())?;

    let path = root.join("f");
    fs::write(&path, b"original")?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o640))?;
    attrs.set(&path, "trusted.fsnap.gfid", b"id-1")?;

    let h = vol.open_file("f", Access::ReadWrite)?;
    vol.create_first_snapshot("f", "only")?;
    assert!(path.is_dir());
    assert_eq!(attrs.get(&path, "trusted.fsnap.gfid")?, None);
    assert_eq!(
        attrs.get(&path.join("HEAD").join("data"), "trusted.fsnap.gfid")?,
        Some(b"id-1".to_vec())
    );

    h.write(0, b"ORIG")?;
    let outcome = vol.delete_snapshot("f", "only")?;
    assert_eq!(outcome, DeleteOutcome::Reverted);

    assert!(path.is_file());
    assert!(!vol.is_snapshot_root("f")?);
    assert_eq!(fs::read(&path)?, b"ORIGinal");
    assert_eq!(fs::metadata(&path)?.permissions().mode() & 0o777, 0o640);
    assert_eq!(attrs.get(&path, "trusted.fsnap.gfid")?, Some(b"id-1".to_vec()));
    assert!(!root.join("f.fsnap-revert.tmp").exists());

    // the open handle now works on the plain file
    assert!(!h.is_snapshotted()?);
    h.write(8, b"!")?;
    assert_eq!(read_all(&h)?, b"ORIGinal!");
    assert_eq!(vol.stat("f")?.depth, 1);

    drop(h);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn clone_is_isolated_from_original() -> Result<()> {
    let (root, vol) = new_volume("clone")?;
    fs::write(root.join("f"), b"0000000000")?;
    let h = vol.open_file("f", Access::ReadWrite)?;

    vol.create_snapshot("f", "a")?;
    h.write(0, b"11")?;
    vol.create_snapshot("f", "b")?;
    h.write(4, b"22")?;
    vol.create_snapshot("f", "c")?;
    h.write(8, b"33")?;
    let orig_head = read_all(&h)?;
    let orig_b = vol.open_snapshot("f", "b")?.read_all()?;

    vol.clone_snapshot("f", "b", "g")?;
    assert!(vol.is_snapshot_root("g")?);

    // layers b and a are hard-linked, c is not part of the clone
    let g = root.join("g");
    assert!(g.join("a").join("data").exists());
    assert!(g.join("b").join("data").exists());
    assert!(!g.join("c").exists());
    assert!(!g.join("b").join("child").exists());
    assert_eq!(fs::metadata(g.join("a").join("data"))?.nlink(), 2);
    let listed = vol.list_snapshots("f")?;
    assert!(listed.iter().any(|s| s.name == "a" && s.shared));
    assert!(listed.iter().any(|s| s.name == "c" && !s.shared));

    let hc = vol.open_file("g", Access::ReadWrite)?;
    assert_eq!(read_all(&hc)?, orig_b);
    hc.write(1, b"XY")?;
    assert_eq!(read_all(&h)?, orig_head);

    // deleting shared layers in the clone leaves the original alone
    vol.delete_snapshot("g", "a")?;
    vol.create_snapshot("g", "g1")?;
    hc.write(9, b"Q")?;
    vol.delete_snapshot("g", "b")?;
    assert_eq!(read_all(&h)?, orig_head);
    assert_eq!(vol.open_snapshot("f", "b")?.read_all()?, orig_b);
    assert_eq!(vol.open_snapshot("f", "a")?.read_all()?, b"0000000000");

    // and the clone still reads its own content
    let mut want = orig_b.clone();
    want[1..3].copy_from_slice(b"XY");
    want[9] = b'Q';
    assert_eq!(read_all(&hc)?, want);

    // removing the clone leaves shared data with the original
    drop(hc);
    vol.remove_file("g")?;
    assert!(!g.exists());
    assert_eq!(fs::metadata(root.join("f").join("a").join("data"))?.nlink(), 1);
    assert_eq!(vol.open_snapshot("f", "a")?.read_all()?, b"0000000000");

    drop(h);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn shared_root_is_not_truncated_on_delete() -> Result<()> {
    let (root, vol) = new_volume("sharedroot")?;
    fs::write(root.join("f"), b"abcdef")?;
    let h = vol.open_file("f", Access::ReadWrite)?;
    vol.create_snapshot("f", "r")?;
    h.write(0, b"Z")?;
    vol.create_snapshot("f", "s")?;
    vol.clone_snapshot("f", "r", "g")?;

    // root of the original is shared with the clone: generic merge
    vol.delete_snapshot("f", "r")?;
    assert_eq!(read_all(&h)?, b"Zbcdef");
    assert_eq!(vol.open_snapshot("f", "s")?.read_all()?, b"Zbcdef");
    assert_eq!(fs::read(root.join("g").join("r").join("data"))?, b"abcdef");
    assert_eq!(vol.open_snapshot("g", "r")?.read_all()?, b"abcdef");

    drop(h);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn chain_depth_is_capped() -> Result<()> {
    let root = unique_root("depth");
    fs::create_dir_all(&root)?;
    fs::write(root.join("f"), b"x")?;
    {
        let vol = Volume::open_with_config(&root, SnapConfig::default().with_max_chain_depth(3))?;
        vol.create_snapshot("f", "s1")?;
        vol.create_snapshot("f", "s2")?;
        // HEAD + s2 + s1 = 3 layers; one more would not open
        assert!(matches!(
            vol.create_snapshot("f", "s3"),
            Err(SnapError::ResourceExhausted { max: 3, .. })
        ));
        assert_eq!(vol.list_snapshots("f")?.len(), 2);
    }
    {
        let vol = Volume::open_with_config(&root, SnapConfig::default().with_max_chain_depth(2))?;
        assert!(matches!(
            vol.open_file("f", Access::ReadOnly),
            Err(SnapError::ResourceExhausted { max: 2, .. })
        ));
        // nothing leaks from the failed open
        assert_eq!(vol.open_files(), 0);
    }
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn errors_are_typed() -> Result<()> {
    let (root, vol) = new_volume("errors")?;
    fs::write(root.join("f"), b"data")?;

    // plain file: no snapshots to act on
    assert!(matches!(
        vol.delete_snapshot("f", "s1"),
        Err(SnapError::InvalidState(_))
    ));
    assert!(matches!(
        vol.clone_snapshot("f", "s1", "g"),
        Err(SnapError::InvalidState(_))
    ));
    assert!(matches!(
        vol.create_snapshot("missing", "s1"),
        Err(SnapError::NotFound(_))
    ));

    for bad in ["HEAD", "list", "", "a/b", ".."] {
        assert!(
            matches!(vol.create_snapshot("f", bad), Err(SnapError::InvalidName(_))),
            "{:?}",
            bad
        );
    }
    assert!(!vol.is_snapshot_root("f")?);

    vol.create_snapshot("f", "s1")?;
    assert!(matches!(
        vol.create_snapshot("f", "s1"),
        Err(SnapError::AlreadyExists(_))
    ));
    assert!(matches!(
        vol.create_first_snapshot("f", "s9"),
        Err(SnapError::InvalidState(_))
    ));
    assert!(matches!(
        vol.delete_snapshot("f", "nope"),
        Err(SnapError::NotFound(_))
    ));
    assert!(matches!(
        vol.delete_snapshot("f", "HEAD"),
        Err(SnapError::InvalidName(_))
    ));
    assert!(matches!(
        vol.clone_snapshot("f", "HEAD", "g"),
        Err(SnapError::InvalidName(_))
    ));
    assert!(matches!(
        vol.clone_snapshot("f", "nope", "g"),
        Err(SnapError::NotFound(_))
    ));
    fs::write(root.join("taken"), b"")?;
    assert!(matches!(
        vol.clone_snapshot("f", "s1", "taken"),
        Err(SnapError::AlreadyExists(_))
    ));
    assert!(matches!(
        vol.open_snapshot("f", "HEAD"),
        Err(SnapError::InvalidName(_))
    ));
    assert!(matches!(
        vol.open_snapshot("f", "nope"),
        Err(SnapError::NotFound(_))
    ));

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn rename_relinks_neighbours() -> Result<()> {
    let (root, vol) = new_volume("rename")?;
    fs::write(root.join("f"), b"aaaa")?;
    let h = vol.open_file("f", Access::ReadWrite)?;
    vol.create_snapshot("f", "one")?;
    h.write(0, b"b")?;
    vol.create_snapshot("f", "two")?;
    h.write(1, b"c")?;
    vol.create_snapshot("f", "three")?;

    vol.rename_snapshot("f", "two", "middle")?;
    let names: Vec<String> = vol.list_snapshots("f")?.into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["three", "middle", "one"]);
    assert_eq!(vol.open_snapshot("f", "middle")?.read_all()?, b"baaa");
    assert_eq!(
        vol.open_snapshot("f", "three")?.layers()?,
        vec!["three", "middle", "one"]
    );

    // newest frozen layer: HEAD's parent link follows
    vol.rename_snapshot("f", "three", "top")?;
    assert_eq!(read_all(&h)?, b"bcaa");
    assert_eq!(
        fs::read_link(root.join("f").join("HEAD").join("parent"))?,
        PathBuf::from("../top")
    );

    assert!(matches!(
        vol.rename_snapshot("f", "top", "one"),
        Err(SnapError::AlreadyExists(_))
    ));
    assert!(matches!(
        vol.rename_snapshot("f", "top", "list"),
        Err(SnapError::InvalidName(_))
    ));
    assert!(matches!(
        vol.rename_snapshot("f", "ghost", "x"),
        Err(SnapError::NotFound(_))
    ));

    drop(h);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn snapshot_reader_is_read_only() -> Result<()> {
    let (root, vol) = new_volume("ro")?;
    fs::write(root.join("f"), b"frozen")?;
    vol.create_snapshot("f", "s")?;
    let snap = vol.open_snapshot("f", "s")?;
    assert_eq!(snap.name(), "s");
    assert_eq!(snap.size()?, 6);
    assert!(matches!(snap.write(0, b"x"), Err(SnapError::ReadOnly(_))));
    assert_eq!(snap.read(2, 100)?.data, b"ozen");

    // frozen data is 0400 on disk
    let mode = fs::metadata(root.join("f").join("s").join("data"))?.permissions().mode();
    assert_eq!(mode & 0o777, 0o400);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn handles_share_one_backend() -> Result<()> {
    let (root, vol) = new_volume("shared")?;
    fs::write(root.join("f"), b"........")?;
    let a = vol.open_file("f", Access::ReadWrite)?;
    let b = vol.open_file("f", Access::ReadOnly)?;
    assert_eq!(vol.open_files(), 1);

    vol.create_snapshot("f", "s")?;
    a.write(2, b"AB")?;
    // b sees a's write through the same HEAD index
    assert_eq!(read_all(&b)?, b"..AB....");
    assert!(b.is_snapshotted()?);

    drop(a);
    assert_eq!(read_all(&b)?, b"..AB....");
    drop(b);
    assert_eq!(vol.open_files(), 0);

    // removed file: a surviving handle reports it
    let c = vol.open_file("f", Access::ReadWrite)?;
    vol.remove_file("f")?;
    assert!(!root.join("f").exists());
    assert!(matches!(c.size(), Err(SnapError::InvalidState(_))));
    drop(c);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn create_access_makes_plain_file() -> Result<()> {
    let (root, vol) = new_volume("create")?;
    let h = vol.open_file("new.bin", Access::Create)?;
    h.write(3, b"xyz")?;
    assert_eq!(read_all(&h)?, b"\0\0\0xyz");
    assert!(!h.is_snapshotted()?);
    drop(h);
    assert!(matches!(
        vol.open_file("absent", Access::ReadWrite),
        Err(SnapError::NotFound(_))
    ));
    let st = vol.stat("new.bin")?;
    assert_eq!(st.size, 6);
    assert!(!st.snapshotted);
    drop(vol);

    let ro = Volume::open_read_only(&root)?;
    assert!(matches!(
        ro.open_file("new.bin", Access::ReadWrite),
        Err(SnapError::ReadOnly(_))
    ));
    assert!(matches!(
        ro.create_snapshot("new.bin", "s"),
        Err(SnapError::ReadOnly(_))
    ));
    drop(ro);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

// Открытый SnapshotReader переживает удаление соседних слоёв: цепочка
// переоткрывается от его имени, удалённый снапшот читается как NotFound.
#[test]
fn snapshot_reader_follows_deletes() -> Result<()> {
    let (root, vol) = new_volume("reader")?;
    fs::write(root.join("f"), b"aaaaaaaa")?;
    let h = vol.open_file("f", Access::ReadWrite)?;

    vol.create_snapshot("f", "s1")?;
    h.write(0, b"bb")?;
    vol.create_snapshot("f", "s2")?;
    h.write(2, b"bb")?;
    h.write(6, b"c")?;
    vol.create_snapshot("f", "s3")?;
    h.write(0, b"zz")?;

    let r3 = vol.open_snapshot("f", "s3")?;
    let r1 = vol.open_snapshot("f", "s1")?;
    assert_eq!(r3.read_all()?, b"bbbbaaca");
    assert_eq!(r3.layers()?, vec!["s3", "s2", "s1"]);

    // internal layer: its data is released, the reader must not see that
    assert_eq!(vol.delete_snapshot("f", "s2")?, DeleteOutcome::Merged);
    let r = r3.read(0, 8)?;
    assert_eq!(r.data, b"bbbbaaca");
    assert_eq!(r.file_size, 8);
    assert_eq!(r3.layers()?, vec!["s3", "s1"]);
    assert_eq!(r1.read_all()?, b"aaaaaaaa");

    // root merge: s3 becomes ROOT
    assert_eq!(vol.delete_snapshot("f", "s1")?, DeleteOutcome::Merged);
    assert_eq!(r3.read_all()?, b"bbbbaaca");
    assert_eq!(r3.layers()?, vec!["s3"]);
    assert!(matches!(r1.read(0, 8), Err(SnapError::NotFound(_))));
    assert_eq!(read_all(&h)?, b"zzbbaaca");

    assert_eq!(vol.delete_snapshot("f", "s3")?, DeleteOutcome::Reverted);
    assert!(matches!(r3.read_all(), Err(SnapError::NotFound(_))));
    assert_eq!(read_all(&h)?, b"zzbbaaca");

    drop(r1);
    drop(r3);
    drop(h);
    assert_eq!(vol.open_files(), 0);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn clone_side_delete_keeps_original_bytes() -> Result<()> {
    let (root, vol) = new_volume("unshare")?;
    fs::write(root.join("f"), b"AAAAAAAA")?;
    let h = vol.open_file("f", Access::ReadWrite)?;
    vol.create_snapshot("f", "r")?;
    h.write(0, b"BB")?;
    vol.create_snapshot("f", "s")?;
    vol.clone_snapshot("f", "s", "g")?;

    let orig_s = root.join("f").join("s").join("data");
    let clone_s = root.join("g").join("s").join("data");
    assert_eq!(fs::metadata(&orig_s)?.nlink(), 2);
    let before = fs::read(&orig_s)?;
    assert_eq!(before, b"BB\0\0\0\0\0\0");

    // g's ROOT is shared with f: generic merge into g/s, which is shared too
    assert_eq!(vol.delete_snapshot("g", "r")?, DeleteOutcome::Merged);

    assert_eq!(fs::read(&orig_s)?, before);
    assert_eq!(fs::metadata(&orig_s)?.permissions().mode() & 0o777, 0o400);
    // the clone got its own copy to merge into
    assert_eq!(fs::metadata(&orig_s)?.nlink(), 1);
    assert_eq!(fs::metadata(&clone_s)?.nlink(), 1);
    assert_eq!(fs::metadata(&clone_s)?.permissions().mode() & 0o777, 0o400);
    assert_eq!(fs::read(root.join("f").join("r").join("data"))?, b"AAAAAAAA");

    assert_eq!(vol.open_snapshot("g", "s")?.read_all()?, b"BBAAAAAA");
    assert_eq!(vol.open_snapshot("f", "s")?.read_all()?, b"BBAAAAAA");
    assert_eq!(vol.open_snapshot("f", "r")?.read_all()?, b"AAAAAAAA");
    assert_eq!(read_all(&h)?, b"BBAAAAAA");

    drop(h);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}
