//! Long filename creation, listing and collision numbering.

use tinyfat::{FatFs, Mode};

mod utils;

async fn mounted() -> FatFs<utils::RamDisk, utils::TestClock> {
    let mut fs = FatFs::new(utils::make_block_device(), utils::TestClock);
    fs.mount(512, Mode::READ | Mode::WRITE).await.expect("mount");
    fs
}

/// Collect `(name, alt_name)` pairs for every entry in `path`.
async fn list(
    fs: &mut FatFs<utils::RamDisk, utils::TestClock>,
    path: &str,
) -> Vec<(String, String)> {
    let mut dir = fs.open_dir(path).await.expect("open dir");
    let mut entries = Vec::new();
    fs.for_each_file(&mut dir, |info| {
        entries.push((info.name().to_string(), info.alt_name().to_string()));
        Ok(())
    })
    .await
    .expect("iterate");
    entries
}

#[tokio::test]
async fn existing_long_names_are_listed() {
    let mut fs = mounted().await;
    let entries = list(&mut fs, "/").await;
    // The volume label and the deleted entries are skipped.
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0, "rootfile");
    assert_eq!(entries[1].0, "rootdir");
}

#[tokio::test]
async fn long_name_roundtrip() {
    let mut fs = mounted().await;
    let mut file = fs
        .open_file("/this is a long name.txt", Mode::CREATE_NEW | Mode::WRITE)
        .await
        .expect("create");
    fs.write(&mut file, b"payload").await.expect("write");
    fs.close_file(&mut file).await.expect("close");

    let entries = list(&mut fs, "/").await;
    let entry = entries
        .iter()
        .find(|(name, _)| name == "this is a long name.txt")
        .expect("created file listed");
    assert_eq!(entry.1, "THISIS~1.TXT");

    // The long name resolves on lookup, case-insensitively.
    assert!(fs.open_file("/this is a long name.txt", Mode::READ).await.is_ok());
    assert!(fs.open_file("/THIS IS A LONG NAME.TXT", Mode::READ).await.is_ok());
    // So does the generated short name.
    assert!(fs.open_file("/THISIS~1.TXT", Mode::READ).await.is_ok());
}

#[tokio::test]
async fn lowercase_83_names_use_ntres_not_lfn() {
    let mut fs = mounted().await;
    let mut file = fs
        .open_file("/readme.txt", Mode::CREATE_NEW | Mode::WRITE)
        .await
        .expect("create");
    fs.close_file(&mut file).await.expect("close");

    let entries = list(&mut fs, "/").await;
    let entry = entries
        .iter()
        .find(|(name, _)| name == "readme.txt")
        .expect("created file listed");
    // Case is stored in the NT-reserved byte; no alternate name needed.
    assert_eq!(entry.1, "");

    // On disk there is exactly one entry (no LFN group), registered in the
    // first free slot: the deleted long-name entry at index 5.
    let (disk, _clock) = fs.free();
    let root = disk.sector(utils::DATA_SECTOR);
    let entry = &root[5 * 32..6 * 32];
    assert_eq!(&entry[0..11], b"README  TXT");
    assert_eq!(entry[12], 0x18); // body and extension both lower case
}

#[tokio::test]
async fn mixed_case_names_force_lfn() {
    let mut fs = mounted().await;
    let mut file = fs
        .open_file("/Mixed.txt", Mode::CREATE_NEW | Mode::WRITE)
        .await
        .expect("create");
    fs.close_file(&mut file).await.expect("close");

    let entries = list(&mut fs, "/").await;
    let entry = entries
        .iter()
        .find(|(name, _)| name == "Mixed.txt")
        .expect("created file listed");
    assert_eq!(entry.1, "MIXED.TXT");
}

#[tokio::test]
async fn collision_numbering_then_hashing() {
    let mut fs = mounted().await;
    // Five files whose 8.3 rendering collides on "COLLISIO TXT".
    for i in 1..=5 {
        let path = format!("/collision file {i}.txt");
        let mut file = fs
            .open_file(&path, Mode::CREATE_NEW | Mode::WRITE)
            .await
            .expect("create");
        fs.close_file(&mut file).await.expect("close");
    }
    let entries = list(&mut fs, "/").await;
    for i in 1..=5 {
        let name = format!("collision file {i}.txt");
        let entry = entries.iter().find(|(n, _)| *n == name).expect("listed");
        assert_eq!(entry.1, format!("COLLIS~{i}.TXT"));
    }

    // The sixth collision switches to a hash suffix: `~` plus the 16-bit
    // CRC of the long name in uppercase hex.
    let mut file = fs
        .open_file("/collision file 6.txt", Mode::CREATE_NEW | Mode::WRITE)
        .await
        .expect("create");
    fs.close_file(&mut file).await.expect("close");

    let entries = list(&mut fs, "/").await;
    let entry = entries
        .iter()
        .find(|(n, _)| n == "collision file 6.txt")
        .expect("listed");
    let alt = &entry.1;
    assert!(alt.ends_with(".TXT"), "got {alt}");
    let stem = &alt[..alt.len() - 4];
    let tilde = stem.find('~').expect("tilde in hashed name");
    let digits = &stem[tilde + 1..];
    assert!(!digits.is_empty() && digits.len() <= 4, "got {alt}");
    assert!(
        digits.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()),
        "got {alt}"
    );
    // And it is not one of the sequential names.
    for i in 1..=5 {
        assert_ne!(alt, &format!("COLLIS~{i}.TXT"));
    }
}

#[tokio::test]
async fn non_ascii_names_roundtrip() {
    let mut fs = mounted().await;
    for name in ["/héllo wörld.txt", "/snowman ☃.txt", "/emoji 😀.txt"] {
        let mut file = fs
            .open_file(name, Mode::CREATE_NEW | Mode::WRITE)
            .await
            .expect("create");
        fs.write(&mut file, b"x").await.expect("write");
        fs.close_file(&mut file).await.expect("close");
    }
    let entries = list(&mut fs, "/").await;
    for name in ["héllo wörld.txt", "snowman ☃.txt", "emoji 😀.txt"] {
        assert!(
            entries.iter().any(|(n, _)| n == name),
            "{name} missing from {entries:?}"
        );
        let path = format!("/{name}");
        assert!(fs.open_file(&path, Mode::READ).await.is_ok());
    }
}

#[tokio::test]
async fn maximum_length_name_is_accepted() {
    let mut fs = mounted().await;
    let stem: String = core::iter::repeat('x').take(251).collect();
    let path = format!("/{stem}.txt"); // 255 characters total
    let mut file = fs
        .open_file(&path, Mode::CREATE_NEW | Mode::WRITE)
        .await
        .expect("create");
    fs.close_file(&mut file).await.expect("close");
    assert!(fs.open_file(&path, Mode::READ).await.is_ok());

    let too_long = format!("/x{stem}.txt");
    assert!(fs
        .open_file(&too_long, Mode::CREATE_NEW | Mode::WRITE)
        .await
        .is_err());
}
