// tests/snapshot_read_write.rs
//
// Запуск только этого файла:
//   cargo test --test snapshot_read_write -- --nocapture
//
// Чтение/запись через цепочку слоёв:
// - базовый сценарий AAAA → s1 → BBAA → s2 → BBAC → delete s1;
// - read-after-write на разной глубине цепочки;
// - индекс ROOT = [0, len) после create и после promote;
// - удаление внутреннего снапшота не меняет видимое содержимое;
// - рандомизированная сверка с моделью в памяти (oorandom).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use fsnap::index::load_index;
use fsnap::{Access, DeleteOutcome, FileHandle, Interval, SnapConfig, Volume};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let base = std::env::temp_dir();
    base.join(format!("fsnaptest-rw-{prefix}-{pid}-{t}-{id}"))
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

fn root_index(file: &Path, layer: &str) -> Result<Vec<Interval>> {
    Ok(load_index(&file.join(layer).join("index"))?
        .entries()
        .to_vec())
}

#[test]
fn aaaa_bbaa_bbac_scenario() -> Result<()> {
    let (root, vol) = new_volume("scenario")?;
    fs::write(root.join("f"), b"AAAA")?;

    let h = vol.open_file("f", Access::ReadWrite)?;
    vol.create_snapshot("f", "s1")?;
    assert!(vol.is_snapshot_root("f")?);
    assert_eq!(read_all(&h)?, b"AAAA");

    h.write(0, b"BB")?;
    assert_eq!(read_all(&h)?, b"BBAA");

    vol.create_snapshot("f", "s2")?;
    h.write(3, b"C")?;
    assert_eq!(read_all(&h)?, b"BBAC");

    // snapshots keep their point-in-time content
    assert_eq!(vol.open_snapshot("f", "s1")?.read_all()?, b"AAAA");
    assert_eq!(vol.open_snapshot("f", "s2")?.read_all()?, b"BBAA");

    let outcome = vol.delete_snapshot("f", "s1")?;
    assert_eq!(outcome, DeleteOutcome::Merged);
    assert_eq!(read_all(&h)?, b"BBAC");
    assert_eq!(vol.open_snapshot("f", "s2")?.read_all()?, b"BBAA");

    // s2 is ROOT now and owns everything
    let file = root.join("f");
    assert_eq!(root_index(&file, "s2")?, vec![Interval::new(0, 4)]);
    assert!(!file.join("s1").exists());
    assert!(!file.join("s2").join("parent").exists());

    drop(h);
    drop(vol);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn root_index_is_full_after_create() -> Result<()> {
    let (root, vol) = new_volume("rootidx")?;
    fs::write(root.join("f"), vec![7u8; 10_000])?;
    vol.create_snapshot("f", "base")?;

    let file = root.join("f");
    assert_eq!(root_index(&file, "base")?, vec![Interval::new(0, 10_000)]);
    // fresh HEAD: same length, empty index
    assert_eq!(fs::metadata(file.join("HEAD").join("data"))?.len(), 10_000);
    assert!(root_index(&file, "HEAD")?.is_empty());
    assert_eq!(vol.stat("f")?.depth, 2);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn read_after_write_at_depth() -> Result<()> {
    let (root, vol) = new_volume("depth")?;
    fs::write(root.join("f"), vec![b'.'; 64])?;
    let h = vol.open_file("f", Access::ReadWrite)?;

    let mut model = vec![b'.'; 64];
    for d in 0..8u8 {
        vol.create_snapshot("f", &format!("s{}", d))?;
        let off = (d as usize) * 7;
        let buf = vec![b'a' + d; 5];
        h.write(off as u64, &buf)?;
        model[off..off + 5].copy_from_slice(&buf);
        assert_eq!(read_all(&h)?, model, "depth {}", d + 2);
    }
    assert_eq!(h.depth()?, 9);

    // a read spanning a nested overwrite is stitched from several layers
    let r = h.read(5, 20)?;
    assert_eq!(r.data, &model[5..25]);
    assert!(!r.eof);
    assert_eq!(r.file_size, 64);

    // past EOF
    let r = h.read(64, 10)?;
    assert!(r.data.is_empty());
    assert!(r.eof);
    let r = h.read(60, 10)?;
    assert_eq!(r.data.len(), 4);
    assert!(r.eof);

    drop(h);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn grow_and_shrink_hide_older_layers() -> Result<()> {
    let (root, vol) = new_volume("grow")?;
    fs::write(root.join("f"), b"0123456789")?;
    let h = vol.open_file("f", Access::ReadWrite)?;
    vol.create_snapshot("f", "s1")?;

    // shrink then grow: the old tail must not show through
    h.truncate(4)?;
    assert_eq!(read_all(&h)?, b"0123");
    h.truncate(8)?;
    assert_eq!(read_all(&h)?, b"0123\0\0\0\0");

    // write past EOF leaves zeros in the gap
    h.write(12, b"Z")?;
    assert_eq!(read_all(&h)?, b"0123\0\0\0\0\0\0\0\0Z");

    vol.create_snapshot("f", "s2")?;
    assert_eq!(vol.open_snapshot("f", "s2")?.read_all()?, b"0123\0\0\0\0\0\0\0\0Z");
    assert_eq!(vol.open_snapshot("f", "s1")?.read_all()?, b"0123456789");

    // root merge with a shorter child
    vol.delete_snapshot("f", "s1")?;
    assert_eq!(vol.open_snapshot("f", "s2")?.read_all()?, b"0123\0\0\0\0\0\0\0\0Z");
    assert_eq!(root_index(&root.join("f"), "s2")?, vec![Interval::new(0, 13)]);

    drop(h);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn deleting_internal_snapshot_preserves_content() -> Result<()> {
    let (root, vol) = new_volume("internal")?;
    fs::write(root.join("f"), b"abcdefghijklmnop")?;
    let h = vol.open_file("f", Access::ReadWrite)?;

    vol.create_snapshot("f", "s1")?;
    h.write(2, b"XXXX")?;
    vol.create_snapshot("f", "s2")?;
    h.write(4, b"YY")?;
    h.write(10, b"ZZ")?;
    vol.create_snapshot("f", "s3")?;
    h.write(0, b"W")?;

    let head_before = read_all(&h)?;
    let s3_before = vol.open_snapshot("f", "s3")?.read_all()?;
    let s1_before = vol.open_snapshot("f", "s1")?.read_all()?;

    // s2: neither root nor leaf
    vol.delete_snapshot("f", "s2")?;
    assert_eq!(read_all(&h)?, head_before);
    assert_eq!(vol.open_snapshot("f", "s3")?.read_all()?, s3_before);
    assert_eq!(vol.open_snapshot("f", "s1")?.read_all()?, s1_before);
    assert_eq!(s3_before, b"abXXYYghijZZmnop");

    let names: Vec<String> = vol.list_snapshots("f")?.into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["s3", "s1"]);

    // newest frozen layer: merge goes into HEAD
    vol.delete_snapshot("f", "s3")?;
    assert_eq!(read_all(&h)?, head_before);
    assert_eq!(vol.open_snapshot("f", "s1")?.read_all()?, s1_before);

    drop(h);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn content_survives_volume_reopen() -> Result<()> {
    let (root, vol) = new_volume("reopen")?;
    fs::write(root.join("f"), b"hello world")?;
    {
        let h = vol.open_file("f", Access::ReadWrite)?;
        vol.create_snapshot("f", "v1")?;
        h.write(6, b"fsnap")?;
        // no explicit sync: last close persists the HEAD index
    }
    drop(vol);

    let vol = Volume::open_with_config(&root, SnapConfig::default())?;
    assert!(vol.is_snapshot_root("f")?);
    let h = vol.open_file("f", Access::ReadOnly)?;
    assert_eq!(read_all(&h)?, b"hello fsnap");
    assert_eq!(vol.open_snapshot("f", "v1")?.read_all()?, b"hello world");
    assert!(matches!(
        h.write(0, b"x"),
        Err(fsnap::SnapError::ReadOnly(_))
    ));

    drop(h);
    drop(vol);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

// Случайные операции против модели: HEAD и каждый живой снапшот должны
// совпадать с ожидаемыми байтами после каждого шага.
#[test]
fn randomized_against_model() -> Result<()> {
    let (root, vol) = new_volume("model")?;
    let mut model: Vec<u8> = (0..200u32).map(|i| (i % 251) as u8).collect();
    fs::write(root.join("f"), &model)?;
    let h = vol.open_file("f", Access::ReadWrite)?;

    let mut rng = oorandom::Rand32::new(0x5eed_f5a9);
    let mut snaps: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let mut next = 0u32;

    for step in 0..300u32 {
        match rng.rand_range(0..10) {
            0..=4 => {
                let off = rng.rand_range(0..(model.len() as u32 + 16)) as usize;
                let len = rng.rand_range(1..24) as usize;
                let byte = rng.rand_range(0..256) as u8;
                let buf = vec![byte; len];
                h.write(off as u64, &buf)?;
                if model.len() < off + len {
                    model.resize(off + len, 0);
                }
                model[off..off + len].copy_from_slice(&buf);
            }
            5 => {
                let len = rng.rand_range(0..(model.len() as u32 + 32)) as usize;
                h.truncate(len as u64)?;
                model.resize(len, 0);
            }
            6 | 7 => {
                if snaps.len() < 8 {
                    let name = format!("n{}", next);
                    next += 1;
                    vol.create_snapshot("f", &name)?;
                    snaps.insert(name, model.clone());
                }
            }
            _ => {
                if !snaps.is_empty() {
                    let k = rng.rand_range(0..snaps.len() as u32) as usize;
                    let name = snaps.keys().nth(k).cloned().unwrap_or_default();
                    let outcome = vol.delete_snapshot("f", &name)?;
                    snaps.remove(&name);
                    assert_eq!(
                        outcome == DeleteOutcome::Reverted,
                        snaps.is_empty(),
                        "step {}",
                        step
                    );
                }
            }
        }

        assert_eq!(read_all(&h)?, model, "HEAD at step {}", step);
        assert_eq!(h.is_snapshotted()?, !snaps.is_empty());
        if step % 10 == 0 {
            for (name, want) in &snaps {
                let got = vol.open_snapshot("f", name)?.read_all()?;
                assert_eq!(&got, want, "snapshot {} at step {}", name, step);
            }
        }
    }

    drop(h);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}
