use eyre::{eyre, Result};
use std::{fs, path::Path};

/// The two images baked into the NFT at construction time.
#[derive(Debug, Clone)]
pub struct SvgAssets {
    /// Shown while the price is below the token's threshold (`frown.svg`).
    pub low: String,
    /// Shown at or above the threshold (`happy.svg`).
    pub high: String,
}

impl SvgAssets {
    pub fn load(low: impl AsRef<Path>, high: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            low: read_svg(low.as_ref())?,
            high: read_svg(high.as_ref())?,
        })
    }
}

fn read_svg(path: &Path) -> Result<String> {
    let svg = fs::read_to_string(path)
        .map_err(|e| eyre!("failed to read svg {}: {e}", path.display()))?;

    if svg.trim().is_empty() {
        return Err(eyre!("svg {} is empty", path.display()));
    }
    if !svg.contains("<svg") {
        tracing::warn!(path = %path.display(), "file does not look like an svg document");
    }

    tracing::debug!(path = %path.display(), bytes = svg.len(), "loaded svg");
    Ok(svg)
}
