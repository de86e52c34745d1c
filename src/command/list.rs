use anyhow::{Context, Result};
use tabled::{
    Table, Tabled,
    settings::{Padding, Style, object::Columns},
};

use crate::command;
use crate::config::DataDir;
use crate::shim::ShimStore;

#[derive(Tabled)]
struct ShimRow {
    #[tabled(rename = "SHIM")]
    name: String,
    #[tabled(rename = "IMAGE")]
    image: String,
    #[tabled(rename = "MODE")]
    mode: String,
    #[tabled(rename = "INSTALLED")]
    installed: String,
}

fn rows(store: &ShimStore) -> Result<Vec<ShimRow>> {
    let names = store.list().context("Failed to list shims")?;
    Ok(names
        .into_iter()
        .map(|name| match store.find_metadata(&name) {
            Some(meta) => ShimRow {
                image: meta.output_image,
                mode: meta.install_mode.as_str().to_string(),
                installed: meta.installed_at,
                name,
            },
            None => ShimRow {
                name,
                image: "-".to_string(),
                mode: "-".to_string(),
                installed: "-".to_string(),
            },
        })
        .collect())
}

pub fn run() -> Result<()> {
    let data_dir = DataDir::locate()?;
    let store = command::shim_store(&data_dir)?;
    let rows = rows(&store)?;

    if rows.is_empty() {
        println!("No shims installed.");
        return Ok(());
    }

    let mut table = Table::new(rows);
    table
        .with(Style::blank())
        .modify(Columns::new(0..4), Padding::new(0, 1, 0, 0));
    println!("{table}");

    Ok(())
}
