//! Config command - print the effective settings.

use crate::config::Settings;

pub fn run(settings: &Settings) -> anyhow::Result<()> {
    let text = settings.to_toml()?;
    println!("{text}");
    Ok(())
}
