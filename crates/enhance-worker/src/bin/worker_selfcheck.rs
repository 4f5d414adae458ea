use std::path::Path;
use std::sync::Arc;

use enhance_media::{encode_png, CancelToken, Enhancer, Image, NearestNeighbor};
use enhance_models::ModelName;
use enhance_worker::WorkerConfig;

fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with models_dir={}",
        config.models_dir.display()
    );
    ModelName::validate_registry()?;
    ensure_env_present(&["REDIS_URL"])?;
    ensure_weights(&config.models_dir, &config.preload_models)?;
    ensure_pipeline(&config)?;

    println!("worker-selfcheck: ok");
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}

fn ensure_weights(models_dir: &Path, models: &[ModelName]) -> anyhow::Result<()> {
    if !models_dir.is_dir() {
        return Err(anyhow::anyhow!(
            "models directory {} does not exist",
            models_dir.display()
        ));
    }

    for model in models {
        let path = models_dir.join(model.descriptor().weights_file);
        if !path.is_file() {
            return Err(anyhow::anyhow!(
                "weights for {} not found at {}",
                model,
                path.display()
            ));
        }
    }
    Ok(())
}

/// Run the pad, tile and stitch path once with a weight-free transform.
fn ensure_pipeline(config: &WorkerConfig) -> anyhow::Result<()> {
    let descriptor = ModelName::RealEsrganX4.descriptor();
    let transform = Arc::new(NearestNeighbor::new(descriptor.scale));
    let enhancer = Enhancer::new(descriptor, transform, config.enhance_config())?;

    let input = encode_png(&Image::from_elem((1, 3, 37, 23), 0.5))?;
    let output = enhancer.enhance_bytes(&input, &CancelToken::new())?;

    if (output.width, output.height) != (23 * 4, 37 * 4) {
        return Err(anyhow::anyhow!(
            "synthetic run produced {}x{}, expected {}x{}",
            output.width,
            output.height,
            23 * 4,
            37 * 4
        ));
    }
    Ok(())
}
