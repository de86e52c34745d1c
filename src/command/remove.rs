use std::collections::BTreeSet;

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::command;
use crate::config::DataDir;
use crate::sandbox::EngineConnector;
use crate::shim::{ShimError, ShimStore};

/// Images referenced by the named shims' metadata.
fn referenced_images(store: &ShimStore, names: &[String]) -> BTreeSet<String> {
    names
        .iter()
        .filter_map(|name| store.find_metadata(name))
        .map(|meta| meta.output_image)
        .filter(|image| !image.is_empty())
        .collect()
}

/// Remove shims. Returns the names removed.
fn remove_shims(store: &ShimStore, names: &[String], all: bool) -> Result<Vec<String>> {
    if all {
        return store.remove_all().context("Failed to remove shims");
    }

    let mut removed = Vec::new();
    for name in names {
        match store.remove(name) {
            Ok(()) => removed.push(name.clone()),
            Err(ShimError::NotFound(_)) => bail!("Shim {:?} not found", name),
            Err(e) => {
                return Err(
                    anyhow::Error::new(e).context(format!("Failed to remove shim {:?}", name))
                );
            }
        }
    }
    Ok(removed)
}

pub async fn run(
    engines: &EngineConnector,
    names: &[String],
    all: bool,
    images: bool,
) -> Result<()> {
    let data_dir = DataDir::locate()?;
    let store = command::shim_store(&data_dir)?;

    let targets = if all { store.list()? } else { names.to_vec() };
    let image_set = if images {
        referenced_images(&store, &targets)
    } else {
        BTreeSet::new()
    };

    let removed = remove_shims(&store, &targets, all)?;
    if removed.is_empty() {
        println!("No shims installed");
        return Ok(());
    }
    for name in &removed {
        println!("Removed shim: {}", name);
    }
    info!(count = removed.len(), "remove:shims removed");

    if image_set.is_empty() {
        return Ok(());
    }
    let sandbox = command::connect(engines).await?;
    let mut removed_images = 0;
    let mut failed_images = 0;
    for image in &image_set {
        match sandbox.remove_image(image).await {
            Ok(()) => removed_images += 1,
            Err(e) => {
                failed_images += 1;
                command::warn(format!("failed to remove image {:?}: {}", image, e));
            }
        }
    }
    println!("Removed {} images ({} failed)", removed_images, failed_images);
    Ok(())
}
