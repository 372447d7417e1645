use std::path::Path;

use facenet::{DetectorOptions, FaceNets, ModelManifest, NetKind};
use image::{Rgb, RgbImage};

const MODEL_DIR: &str = "../models";

/// Load all networks from the model directory, if the weights are there.
fn load_nets(model_dir: &Path) -> Result<Option<FaceNets>, Box<dyn std::error::Error>> {
    let mut nets = FaceNets::new(DetectorOptions::default());

    for kind in NetKind::ALL {
        let manifest_path = model_dir.join(kind.manifest_file());
        let manifest = ModelManifest::from_json(&std::fs::read(manifest_path)?)?;

        let mut weights = Vec::new();
        for path in manifest.paths.iter() {
            match std::fs::read(model_dir.join(path)) {
                Ok(shard) => weights.extend(shard),
                Err(err) => {
                    println!("Weights {path} not available ({err}), skipping");
                    return Ok(None);
                }
            }
        }

        nets.load(kind, &manifest, &weights)?;
    }

    Ok(Some(nets))
}

#[test]
fn shipped_manifests_are_valid() -> Result<(), Box<dyn std::error::Error>> {
    for kind in NetKind::ALL {
        let manifest_path = Path::new(MODEL_DIR).join(kind.manifest_file());
        let manifest = ModelManifest::from_json(&std::fs::read(&manifest_path)?)?;
        assert!(!manifest.paths.is_empty(), "{manifest_path:?}");
    }

    Ok(())
}

#[test]
fn pipeline_runs_on_synthetic_frames() -> Result<(), Box<dyn std::error::Error>> {
    let Some(nets) = load_nets(Path::new(MODEL_DIR))? else {
        return Ok(());
    };
    println!("Loaded {}", nets.describe());

    let blank = RgbImage::from_pixel(640, 480, Rgb([30, 30, 30]));
    let noisy = RgbImage::from_fn(640, 480, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
    });

    // Whatever is found must be well-formed
    for frame in [blank, noisy] {
        if let Some(face) = nets.detect_single_face(&frame)? {
            assert!(face.score > DetectorOptions::default().score_threshold);
            if let Some(expressions) = face.expressions {
                let sum: f32 = expressions.iter().map(|(_, c)| c).sum();
                assert!((sum - 1.0).abs() < 1e-3);
            }
        }
    }

    Ok(())
}
