//! Creating, writing and syncing files.

use tinyfat::{Error, FatFs, Mode};

mod utils;

async fn mounted() -> FatFs<utils::RamDisk, utils::TestClock> {
    let mut fs = FatFs::new(utils::make_block_device(), utils::TestClock);
    fs.mount(512, Mode::READ | Mode::WRITE).await.expect("mount");
    fs
}

async fn read_all(
    fs: &mut FatFs<utils::RamDisk, utils::TestClock>,
    path: &str,
) -> Result<Vec<u8>, Error> {
    let mut file = fs.open_file(path, Mode::READ).await?;
    let mut collected = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = fs.read(&mut file, &mut buf).await?;
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&buf[..n]);
    }
    fs.close_file(&mut file).await?;
    Ok(collected)
}

#[tokio::test]
async fn create_write_read_back() {
    let mut fs = mounted().await;
    let mut file = fs
        .open_file("/newfile.txt", Mode::CREATE_ALWAYS | Mode::WRITE)
        .await
        .expect("create");
    let n = fs.write(&mut file, b"Hello, World!").await.expect("write");
    assert_eq!(n, 13);
    fs.close_file(&mut file).await.expect("close");

    assert_eq!(read_all(&mut fs, "/newfile.txt").await.unwrap(), b"Hello, World!");
}

#[tokio::test]
async fn size_is_persisted_on_sync_not_before() {
    let mut fs = mounted().await;
    let mut file = fs
        .open_file("/sized.bin", Mode::CREATE_ALWAYS | Mode::WRITE)
        .await
        .expect("create");
    fs.write(&mut file, &[0xCC; 64]).await.expect("write");

    // Not synced yet: the directory entry still carries size zero.
    let mut dir = fs.open_dir("/").await.expect("open root");
    let mut seen = None;
    fs.for_each_file(&mut dir, |info| {
        if info.name() == "sized.bin" {
            seen = Some(info.size());
        }
        Ok(())
    })
    .await
    .expect("iterate");
    assert_eq!(seen, Some(0));

    fs.sync_file(&mut file).await.expect("sync");

    let mut seen = None;
    fs.for_each_file(&mut dir, |info| {
        if info.name() == "sized.bin" {
            seen = Some(info.size());
        }
        Ok(())
    })
    .await
    .expect("iterate");
    assert_eq!(seen, Some(64));
    fs.close_file(&mut file).await.expect("close");
}

#[tokio::test]
async fn multi_cluster_write_and_bulk_read() {
    let mut fs = mounted().await;
    // 3 clusters worth of data plus a tail; crosses two cluster boundaries.
    let data: Vec<u8> = (0..(3 * 4096 + 777)).map(|i| (i % 251) as u8).collect();
    let mut file = fs
        .open_file("/big.dat", Mode::CREATE_ALWAYS | Mode::WRITE)
        .await
        .expect("create");
    let n = fs.write(&mut file, &data).await.expect("write");
    assert_eq!(n, data.len());
    assert_eq!(file.length(), data.len() as u32);
    fs.close_file(&mut file).await.expect("close");

    assert_eq!(read_all(&mut fs, "/big.dat").await.unwrap(), data);
}

#[tokio::test]
async fn many_small_writes_accumulate() {
    let mut fs = mounted().await;
    let mut file = fs
        .open_file("/pieces.txt", Mode::CREATE_ALWAYS | Mode::WRITE)
        .await
        .expect("create");
    let mut expected = Vec::new();
    for i in 0..300u32 {
        let piece = format!("line {i}\n");
        fs.write(&mut file, piece.as_bytes()).await.expect("write");
        expected.extend_from_slice(piece.as_bytes());
    }
    fs.close_file(&mut file).await.expect("close");

    assert_eq!(read_all(&mut fs, "/pieces.txt").await.unwrap(), expected);
}

#[tokio::test]
async fn open_append_continues_at_end() {
    let mut fs = mounted().await;
    let mut file = fs
        .open_file("/log.txt", Mode::CREATE_ALWAYS | Mode::WRITE)
        .await
        .expect("create");
    fs.write(&mut file, b"first\n").await.expect("write");
    fs.close_file(&mut file).await.expect("close");

    let mut file = fs
        .open_file("/log.txt", Mode::OPEN_APPEND | Mode::WRITE)
        .await
        .expect("append open");
    assert_eq!(file.offset(), 6);
    fs.write(&mut file, b"second\n").await.expect("write");
    fs.close_file(&mut file).await.expect("close");

    assert_eq!(read_all(&mut fs, "/log.txt").await.unwrap(), b"first\nsecond\n");
}

#[tokio::test]
async fn create_new_fails_on_existing() {
    let mut fs = mounted().await;
    assert_eq!(
        fs.open_file("/rootfile", Mode::CREATE_NEW | Mode::WRITE)
            .await
            .err(),
        Some(Error::Exists)
    );
}

#[tokio::test]
async fn open_always_creates_or_opens() {
    let mut fs = mounted().await;
    let mut file = fs
        .open_file("/maybe.txt", Mode::OPEN_ALWAYS | Mode::WRITE)
        .await
        .expect("create via open_always");
    fs.write(&mut file, b"fresh").await.expect("write");
    fs.close_file(&mut file).await.expect("close");

    // Second time round the file exists and is opened, not truncated.
    let file = fs
        .open_file("/maybe.txt", Mode::OPEN_ALWAYS | Mode::READ)
        .await
        .expect("open via open_always");
    assert_eq!(file.length(), 5);
}

#[tokio::test]
async fn create_always_truncates_and_reuses_released_cluster() {
    let mut fs = mounted().await;
    // `/rootfile` occupies cluster 4. Truncating it releases the chain and
    // primes the allocator to hand the hole straight back.
    let mut file = fs
        .open_file("/rootfile", Mode::CREATE_ALWAYS | Mode::WRITE)
        .await
        .expect("truncate");
    assert_eq!(file.length(), 0);
    fs.write(&mut file, b"recycled").await.expect("write");
    fs.close_file(&mut file).await.expect("close");

    assert_eq!(read_all(&mut fs, "/rootfile").await.unwrap(), b"recycled");

    let (disk, _clock) = fs.free();
    // The directory entry for ROOTFILE points at cluster 4 again.
    let root = disk.sector(utils::DATA_SECTOR);
    let entry = &root[2 * 32..3 * 32];
    assert_eq!(&entry[0..11], b"ROOTFILE   ");
    let cluster = u32::from(u16::from_le_bytes([entry[26], entry[27]]))
        | u32::from(u16::from_le_bytes([entry[20], entry[21]])) << 16;
    assert_eq!(cluster, 4);
    assert_eq!(u32::from_le_bytes(entry[28..32].try_into().unwrap()), 8);
}

#[tokio::test]
async fn allocate_then_release_restores_fat_and_free_count() {
    let mut fs = mounted().await;
    let hint_before = fs.free_cluster_hint();
    let fat_orig = fs.device().sector(utils::FAT1_SECTOR).to_vec();

    let mut file = fs
        .open_file("/scratch.bin", Mode::CREATE_ALWAYS | Mode::WRITE)
        .await
        .expect("create");
    fs.write(&mut file, &[0xAB; 2 * 4096]).await.expect("write");
    fs.close_file(&mut file).await.expect("close");
    // Two clusters are now allocated and linked.
    assert_eq!(fs.free_cluster_hint(), hint_before.map(|h| h - 2));
    let fat_allocated = fs.device().sector(utils::FAT1_SECTOR).to_vec();
    let entry = |fat: &[u8], c: usize| u32::from_le_bytes(fat[c * 4..c * 4 + 4].try_into().unwrap());
    assert_eq!(entry(&fat_allocated, 6) & 0x0FFF_FFFF, 7);
    assert!(entry(&fat_allocated, 7) & 0x0FFF_FFFF >= 0x0FFF_FFF8);

    // Truncating the file releases the whole chain again.
    let mut file = fs
        .open_file("/scratch.bin", Mode::CREATE_ALWAYS | Mode::WRITE)
        .await
        .expect("truncate");
    fs.close_file(&mut file).await.expect("close");
    assert_eq!(fs.free_cluster_hint(), hint_before);

    // The FAT is byte-identical to its pre-allocation state.
    let fat_after = fs.device().sector(utils::FAT1_SECTOR).to_vec();
    assert_eq!(fat_after, fat_orig);
}

#[tokio::test]
async fn second_fat_copy_mirrors_the_first() {
    let mut fs = mounted().await;
    let mut file = fs
        .open_file("/mirror.bin", Mode::CREATE_ALWAYS | Mode::WRITE)
        .await
        .expect("create");
    fs.write(&mut file, &[0x42; 3 * 4096]).await.expect("write");
    fs.close_file(&mut file).await.expect("close");

    let (disk, _clock) = fs.free();
    // Any FAT sector touched by the allocation is identical in both copies.
    assert_eq!(
        disk.sector(utils::FAT1_SECTOR),
        disk.sector(utils::FAT2_SECTOR)
    );
}

#[tokio::test]
async fn fsinfo_is_rewritten_on_sync() {
    let mut fs = mounted().await;
    let mut file = fs
        .open_file("/counted.bin", Mode::CREATE_ALWAYS | Mode::WRITE)
        .await
        .expect("create");
    fs.write(&mut file, &[1u8; 4096]).await.expect("write");
    fs.close_file(&mut file).await.expect("close");

    let free = fs.free_cluster_hint().unwrap();
    let (disk, _clock) = fs.free();
    let fsinfo = disk.sector(1);
    assert_eq!(u32::from_le_bytes(fsinfo[0..4].try_into().unwrap()), 0x4161_5252);
    assert_eq!(
        u32::from_le_bytes(fsinfo[488..492].try_into().unwrap()),
        free
    );
    // Next-free hint points at the cluster just taken.
    assert_eq!(u32::from_le_bytes(fsinfo[492..496].try_into().unwrap()), 6);
}

#[tokio::test]
async fn timestamps_come_from_the_time_source() {
    let mut fs = mounted().await;
    let mut file = fs
        .open_file("/stamped.txt", Mode::CREATE_ALWAYS | Mode::WRITE)
        .await
        .expect("create");
    fs.write(&mut file, b"tick").await.expect("write");
    fs.close_file(&mut file).await.expect("close");

    let mut dir = fs.open_dir("/").await.expect("open root");
    let mut mtime = None;
    fs.for_each_file(&mut dir, |info| {
        if info.name() == "stamped.txt" {
            mtime = Some(info.mtime());
        }
        Ok(())
    })
    .await
    .expect("iterate");
    let mtime = mtime.expect("entry listed");
    assert_eq!(mtime.year(), 2016);
    assert_eq!(mtime.zero_indexed_month, 4);
    assert_eq!(mtime.hours, 14);
    assert_eq!(mtime.seconds, 20);
}
