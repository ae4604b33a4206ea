//! Tests against real NMSARC pak files. The fixtures are not shipped with
//! the repository; every test skips with a message when its file is absent.

use std::fs;
use std::path::PathBuf;

use hgpak_core::{repack_manifest, Filter, HgpakReader, Platform, UnpackOptions};

fn test_data(name: &str) -> Option<PathBuf> {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("../test_data");
    path.push(name);
    if path.exists() {
        Some(path)
    } else {
        eprintln!("Test file not found at {path:?}, skipping.");
        None
    }
}

#[test]
fn test_mac_mesh_planet_sky_unpack() {
    let Some(path) = test_data("NMSARC.MeshPlanetSKY.mac.pak") else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();

    let mut pak = HgpakReader::open(&path, Platform::Mac).expect("Failed to open pak");
    assert_eq!(pak.filenames().len(), 6);

    let count = pak
        .unpack(dir.path(), &Filter::All, &UnpackOptions::default())
        .expect("Failed to unpack");
    assert_eq!(count, 6);

    let mut written = Vec::new();
    for entry in walk(dir.path()) {
        written.push(entry);
    }
    assert_eq!(written.len(), 6);
    assert!(written
        .iter()
        .all(|p| p.strip_prefix(dir.path()).unwrap().starts_with("models")));
}

#[test]
fn test_mac_upper_unpack() {
    let Some(path) = test_data("NMSARC.MeshPlanetSKY.mac.pak") else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();

    let mut pak = HgpakReader::open(&path, Platform::Mac).expect("Failed to open pak");
    let options = UnpackOptions {
        upper: true,
        ..Default::default()
    };
    let count = pak.unpack(dir.path(), &Filter::All, &options).unwrap();
    assert_eq!(count, 6);

    // The relative path is fully uppercased; the destination root is not.
    for fpath in walk(dir.path()) {
        let rel = fpath.strip_prefix(dir.path()).unwrap();
        let rel = rel.to_string_lossy();
        assert_eq!(rel.to_uppercase(), rel);
    }
}

#[test]
fn test_mac_filtered_extraction() {
    let Some(path) = test_data("NMSARC.MeshPlanetSKY.mac.pak") else {
        return;
    };
    let mut pak = HgpakReader::open(&path, Platform::Mac).expect("Failed to open pak");

    let count = |pak: &mut HgpakReader, filter: Filter| {
        pak.extract(&filter, None)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
            .len()
    };

    assert_eq!(count(&mut pak, Filter::pattern("*rainbowplane*")), 2);
    assert_eq!(count(&mut pak, Filter::pattern("*RAINBOWPLANE*")), 2);
    assert_eq!(
        count(&mut pak, Filter::patterns(["*rainbowplane*", "*skycube*"])),
        4
    );
}

#[test]
fn test_mac_exact_path_extraction() {
    let Some(path) = test_data("NMSARC.MeshPlanetSKY.mac.pak") else {
        return;
    };
    let mut pak = HgpakReader::open(&path, Platform::Mac).expect("Failed to open pak");

    let fpath = "models/planets/sky/skysphere.geometry.mbin.macos";
    let lower: Vec<_> = pak
        .extract(&Filter::pattern(fpath), None)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(lower.len(), 1);

    let upper: Vec<_> = pak
        .extract(&Filter::pattern(fpath.to_uppercase()), None)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(upper.len(), 1);
    assert_eq!(lower[0].1, upper[0].1);
}

#[test]
fn test_mac_repack_byte_identical() {
    let Some(src) = test_data("NMSARC.globals.mac.pak") else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();

    // Drop the platform suffix so the repacked name (and its hash) matches
    // the original archive's.
    let pak_path = dir.path().join("NMSARC.globals.pak");
    fs::copy(&src, &pak_path).unwrap();

    {
        let mut pak = HgpakReader::open(&pak_path, Platform::Mac).expect("Failed to open pak");
        let options = UnpackOptions {
            write_manifest: true,
            ..Default::default()
        };
        pak.unpack(dir.path(), &Filter::All, &options).unwrap();
    }

    let original = fs::read(&pak_path).unwrap();
    fs::remove_file(&pak_path).unwrap();

    let manifest_path = dir.path().join("NMSARC.globals.pak.manifest");
    assert!(manifest_path.exists());

    let repacked_path = repack_manifest(&manifest_path, Platform::Mac, true).unwrap();
    assert_eq!(repacked_path, pak_path);
    assert_eq!(fs::read(&repacked_path).unwrap(), original);
}

/// Collect every file below `root`.
fn walk(root: &std::path::Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out
}
