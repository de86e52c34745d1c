use std::io::{self, Write};

use anyhow::{Context, Result};
use chrono::Utc;
use console::style;
use tabled::{
    Table, Tabled,
    settings::{Padding, Style, object::Columns},
};
use tracing::info;

use crate::command;
use crate::sandbox::{Engine, EngineConnector, Sandbox, TuprwreImage};

#[derive(Tabled)]
struct ImageRow {
    #[tabled(rename = "IMAGE")]
    reference: String,
    #[tabled(rename = "SIZE")]
    size: String,
    #[tabled(rename = "CREATED")]
    created: String,
}

/// Format bytes as human-readable string.
fn format_bytes(bytes: i64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    if bytes <= 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_idx = 0;
    while size >= 1000.0 && unit_idx < UNITS.len() - 1 {
        size /= 1000.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as i64, UNITS[unit_idx])
    } else {
        format!("{:.1} {}", size, UNITS[unit_idx])
    }
}

/// Age of a unix timestamp relative to `now`, e.g. `3 hours ago`.
fn format_age(created: i64, now: i64) -> String {
    if created <= 0 {
        return "unknown".to_string();
    }
    let seconds = (now - created).max(0);
    let plural =
        |n: i64, unit: &str| format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" });

    if seconds < 60 {
        return "just now".to_string();
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return plural(minutes, "minute");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return plural(hours, "hour");
    }
    plural(hours / 24, "day")
}

fn image_table(images: &[TuprwreImage], now: i64) -> Table {
    let rows: Vec<ImageRow> = images
        .iter()
        .map(|image| ImageRow {
            reference: image.reference(),
            size: format_bytes(image.size),
            created: format_age(image.created, now),
        })
        .collect();
    let mut table = Table::new(rows);
    table
        .with(Style::blank())
        .modify(Columns::new(0..3), Padding::new(0, 1, 0, 0));
    table
}

/// Remove stopped tuprwre containers, reporting on stderr. Returns
/// (removed, failed).
async fn remove_stopped_containers<E: Engine>(sandbox: &Sandbox<E>) -> Result<(usize, usize)> {
    let containers = sandbox
        .list_stopped_containers()
        .await
        .context("Failed to list stopped containers")?;
    if containers.is_empty() {
        return Ok((0, 0));
    }

    eprintln!("Found {} stopped tuprwre containers", containers.len());
    let mut removed = 0;
    let mut failed = 0;
    for container in &containers {
        match sandbox.cleanup(&container.id).await {
            Ok(()) => {
                removed += 1;
                eprintln!("Removed container {}", container.name);
            }
            Err(e) => {
                failed += 1;
                command::warn(format!("failed to remove container {}: {}", container.name, e));
            }
        }
    }
    eprintln!("Cleaned up {} containers ({} failed)", removed, failed);
    Ok((removed, failed))
}

async fn remove_images<E: Engine>(sandbox: &Sandbox<E>, images: &[TuprwreImage]) -> (usize, usize) {
    let mut removed = 0;
    let mut failed = 0;
    for image in images {
        match sandbox.remove_image(&image.id).await {
            Ok(()) => {
                removed += 1;
                println!("Removed {}", image.reference());
            }
            Err(e) => {
                failed += 1;
                command::warn(format!("failed to remove image {}: {}", image.reference(), e));
            }
        }
    }
    (removed, failed)
}

fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{} [y/N]: ", prompt);
    io::stderr().flush().context("Failed to flush stderr")?;

    let mut input = String::new();
    io::stdin()
        .read_line(&mut input)
        .context("Failed to read confirmation")?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

pub async fn run(engines: &EngineConnector, dry_run: bool, force: bool) -> Result<()> {
    let sandbox = command::connect(engines).await?;

    // Leftover containers pin their images, so they go first.
    if !dry_run {
        remove_stopped_containers(&sandbox).await?;
    }

    let images = sandbox
        .list_tuprwre_images()
        .await
        .context("Failed to list tuprwre images")?;
    if images.is_empty() {
        println!("No tuprwre images found");
        return Ok(());
    }

    let total: i64 = images.iter().map(|i| i.size).sum();
    println!("{}", image_table(&images, Utc::now().timestamp()));
    println!(
        "Found {} tuprwre images ({} total)",
        images.len(),
        style(format_bytes(total)).bold()
    );

    if dry_run {
        println!("Dry run, no images removed");
        return Ok(());
    }
    if !force && !confirm("Remove these images?")? {
        eprintln!("Aborted");
        return Ok(());
    }

    let (removed, failed) = remove_images(&sandbox, &images).await;
    info!(removed, failed, "clean:images removed");
    println!("Removed {} images ({} failed)", removed, failed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::engine::{ContainerRecord, ImageRecord};
    use crate::sandbox::testing::{FakeEngine, Script};

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1_500), "1.5 KB");
        assert_eq!(format_bytes(77_800_000), "77.8 MB");
        assert_eq!(format_bytes(2_000_000_000), "2.0 GB");
    }

    #[test]
    fn test_format_age() {
        let now = 1_700_000_000;
        assert_eq!(format_age(0, now), "unknown");
        assert_eq!(format_age(now - 5, now), "just now");
        assert_eq!(format_age(now + 100, now), "just now");
        assert_eq!(format_age(now - 60, now), "1 minute ago");
        assert_eq!(format_age(now - 150, now), "2 minutes ago");
        assert_eq!(format_age(now - 3 * 3600, now), "3 hours ago");
        assert_eq!(format_age(now - 86_400, now), "1 day ago");
        assert_eq!(format_age(now - 10 * 86_400, now), "10 days ago");
    }

    #[test]
    fn test_image_table_lists_references() {
        let images = vec![TuprwreImage {
            id: "sha256:a".into(),
            repository: "tuprwre-20240101-000000-aaaaaaaa".into(),
            tag: "latest".into(),
            size: 1_500,
            created: 100,
        }];
        let rendered = image_table(&images, 100 + 7_200).to_string();
        assert!(rendered.contains("tuprwre-20240101-000000-aaaaaaaa:latest"));
        assert!(rendered.contains("1.5 KB"));
        assert!(rendered.contains("2 hours ago"));
    }

    #[tokio::test]
    async fn test_removes_stopped_containers_and_images() {
        let engine = FakeEngine::new(Script::exit(0))
            .with_containers(vec![ContainerRecord {
                id: "dead0000beef".into(),
                names: vec!["/tuprwre-1234abcd".into()],
                image: "ubuntu:22.04".into(),
                state: "exited".into(),
            }])
            .with_images(vec![ImageRecord {
                id: "sha256:a".into(),
                repo_tags: vec!["tuprwre-a:latest".into()],
                size: 10,
                created: 1,
            }]);
        let sandbox = Sandbox::new(engine.clone());

        // The fake does not know the listed container, which counts as already gone.
        assert_eq!(remove_stopped_containers(&sandbox).await.unwrap(), (1, 0));

        let images = sandbox.list_tuprwre_images().await.unwrap();
        assert_eq!(remove_images(&sandbox, &images).await, (1, 0));
        assert_eq!(engine.removed_images(), vec!["sha256:a"]);
    }
}
