//! The `seesay init` command.

use std::path::Path;

use anyhow::Result;

use seesay_assets::config::STARTER_CONFIG;

pub fn execute() -> Result<()> {
    let path = Path::new("seesay.toml");
    if path.exists() {
        println!("seesay.toml already exists, skipping.");
    } else {
        std::fs::write(path, STARTER_CONFIG)?;
        println!("Created seesay.toml");
    }

    println!("\nNext steps:");
    println!("  1. Point asset_base and catalog in seesay.toml at your question set");
    println!("  2. Run: seesay validate --catalog resources/query_database.csv");
    println!("  3. Run: seesay run");

    Ok(())
}
