//! The `seesay validate` command.

use anyhow::Result;
use comfy_table::{Cell, Table};

use seesay_assets::AssetClient;
use seesay_core::catalog::validate_catalog;

pub async fn execute(source: String) -> Result<()> {
    let client = AssetClient::new()?;
    let catalog = client.load_catalog(&source).await?;

    println!("Catalog: {source} ({} questions)", catalog.len());

    let mut table = Table::new();
    table.set_header(vec!["Age group", "Questions"]);
    for (group, count) in catalog.count_by_age_group() {
        table.add_row(vec![Cell::new(group), Cell::new(count)]);
    }
    println!("{table}");

    let warnings = validate_catalog(&catalog);
    for w in &warnings {
        let prefix = w
            .query_number
            .as_ref()
            .map(|qn| format!("  [{qn}]"))
            .unwrap_or_else(|| "  ".to_string());
        println!("{prefix} WARNING: {}", w.message);
    }

    if warnings.is_empty() {
        println!("Catalog valid.");
    } else {
        println!("\n{} warning(s) found.", warnings.len());
    }

    Ok(())
}
