//! TOML parser with helpful error messages

use std::path::Path;

use anyhow::{Context, Result};

use super::schema::TrebConfig;

/// Read a config file into a raw table, for layering.
pub fn read_table(path: &Path) -> Result<toml::Table> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    toml::from_str(&content)
        .map_err(|e| enhance_toml_error(e, &content))
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse treb.toml content from string
pub fn parse_treb_toml_str(content: &str) -> Result<TrebConfig> {
    let table: toml::Table =
        toml::from_str(content).map_err(|e| enhance_toml_error(e, content))?;
    from_table(table)
}

/// Deserialize a (possibly merged) table and validate it.
pub fn from_table(table: toml::Table) -> Result<TrebConfig> {
    let config: TrebConfig = toml::Value::Table(table)
        .try_into()
        .context("Invalid treb configuration")?;
    config.validate()?;
    Ok(config)
}

/// Enhance TOML parsing errors with the offending lines
fn enhance_toml_error(error: toml::de::Error, content: &str) -> anyhow::Error {
    let message = error.message().to_string();
    match error.span() {
        Some(span) => {
            let line_num = content[..span.start.min(content.len())].lines().count().max(1);
            anyhow::anyhow!(
                "TOML parsing error at line {}:\n{}\n\nError: {}",
                line_num,
                line_context(content, line_num),
                message
            )
        }
        None => anyhow::anyhow!("TOML parsing error: {}", message),
    }
}

/// Lines around an error, the failing one marked
fn line_context(content: &str, line_num: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = line_num.saturating_sub(2);
    let end = (line_num + 1).min(lines.len());

    lines[start.min(end)..end]
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let num = start + i + 1;
            let marker = if num == line_num { ">>>" } else { "   " };
            format!("{} {:4} | {}", marker, num, line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
