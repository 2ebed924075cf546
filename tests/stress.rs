//! A deterministic multi-operation stress test: drive the volume with a
//! pseudo-random sequence of create/write/close/read operations and check
//! every read against an in-memory model.

use std::collections::HashMap;

use tinyfat::{FatFs, File, Mode};

mod utils;

struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

const NAMES: [&str; 6] = [
    "/alpha.bin",
    "/beta.bin",
    "/gamma.bin",
    "/delta with a long name.bin",
    "/epsilon.bin",
    "/zeta.bin",
];

async fn read_all(
    fs: &mut FatFs<utils::RamDisk, utils::TestClock>,
    path: &str,
) -> Vec<u8> {
    let mut file = fs.open_file(path, Mode::READ).await.expect("open for read");
    let mut collected = Vec::new();
    let mut buf = [0u8; 2048];
    loop {
        let n = fs.read(&mut file, &mut buf).await.expect("read");
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&buf[..n]);
    }
    fs.close_file(&mut file).await.expect("close");
    collected
}

#[tokio::test]
async fn random_operations_match_model() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut fs = FatFs::new(utils::make_block_device(), utils::TestClock);
    fs.mount(512, Mode::READ | Mode::WRITE).await.expect("mount");

    let mut rng = Lcg(0x5EED);
    let mut model: HashMap<&str, Vec<u8>> = HashMap::new();
    let mut open: Option<(File, &'static str, Vec<u8>)> = None;

    for step in 0..600u32 {
        match rng.next() % 4 {
            0 => {
                if open.is_none() {
                    let name = NAMES[(rng.next() as usize) % NAMES.len()];
                    let file = fs
                        .open_file(name, Mode::CREATE_ALWAYS | Mode::WRITE)
                        .await
                        .expect("create");
                    open = Some((file, name, Vec::new()));
                }
            }
            1 => {
                if let Some((file, _, pending)) = open.as_mut() {
                    let len = (rng.next() % 700) as usize;
                    let fill = (step % 251) as u8;
                    let chunk = vec![fill; len];
                    let n = fs.write(file, &chunk).await.expect("write");
                    assert_eq!(n, len);
                    pending.extend_from_slice(&chunk);
                }
            }
            2 => {
                if let Some((mut file, name, pending)) = open.take() {
                    fs.close_file(&mut file).await.expect("close");
                    model.insert(name, pending);
                }
            }
            _ => {
                let name = NAMES[(rng.next() as usize) % NAMES.len()];
                let busy = open.as_ref().map(|(_, n, _)| *n) == Some(name);
                if !busy {
                    if let Some(expected) = model.get(name) {
                        let got = read_all(&mut fs, name).await;
                        assert_eq!(&got, expected, "step {step}: {name} diverged");
                    }
                }
            }
        }
    }

    if let Some((mut file, name, pending)) = open.take() {
        fs.close_file(&mut file).await.expect("close");
        model.insert(name, pending);
    }

    for (name, expected) in &model {
        let got = read_all(&mut fs, name).await;
        assert_eq!(&got, expected, "final check: {name} diverged");
    }

    // The free-cluster hint still prices in every live chain.
    let used_clusters: u32 = model
        .values()
        .map(|data| (data.len() as u32).div_ceil(4096))
        .sum();
    assert_eq!(
        fs.free_cluster_hint(),
        Some(0x001D_F1F8 - used_clusters)
    );
}
