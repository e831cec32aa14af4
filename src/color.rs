use anyhow::{Result, anyhow};
use image::Rgba;
use std::str::FromStr;

/// Parses any CSS color: names, `#rgb`, `#rrggbb`, `#rrggbbaa`, `rgb()`/`rgba()`.
pub fn parse_color(value: &str) -> Result<Rgba<u8>> {
    let trimmed = value.trim();
    let color = svgtypes::Color::from_str(&trimmed.to_ascii_lowercase())
        .map_err(|err| anyhow!("invalid color '{}': {}", trimmed, err))?;
    Ok(Rgba([color.red, color.green, color.blue, color.alpha]))
}

pub fn to_hex(color: Rgba<u8>) -> String {
    let [r, g, b, _] = color.0;
    format!("#{:02x}{:02x}{:02x}", r, g, b)
}
