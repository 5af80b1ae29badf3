//! Minimal models of the style document and tile source manifests.
//!
//! The offline subsystem only needs enough of the style to enumerate the
//! resources a region requires: the tile sources it references, the glyph url
//! template and the sprite base url. Everything else in the document is
//! ignored.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::OfflineError;

/// Font stack used when a style requests glyphs but declares no literal
/// `text-font` anywhere.
pub(crate) const DEFAULT_FONT_STACK: &str = "Open Sans Regular";

/// Parsed style document, reduced to the parts relevant for downloads.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StyleManifest {
    #[serde(default)]
    pub sources: HashMap<String, StyleSource>,
    #[serde(default)]
    pub glyphs: Option<String>,
    #[serde(default)]
    pub sprite: Option<String>,
    #[serde(default)]
    pub layers: Vec<StyleLayer>,
}

/// A source entry in the style document.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StyleSource {
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub tiles: Vec<String>,
    #[serde(default)]
    pub minzoom: Option<f64>,
    #[serde(default)]
    pub maxzoom: Option<f64>,
}

/// A layer entry. Only the layout object is inspected, for `text-font`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StyleLayer {
    #[serde(default)]
    pub layout: Option<serde_json::Value>,
}

/// Tile source manifest (TileJSON).
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TileJson {
    #[serde(default)]
    pub tiles: Vec<String>,
    #[serde(default)]
    pub minzoom: Option<f64>,
    #[serde(default)]
    pub maxzoom: Option<f64>,
}

impl StyleManifest {
    pub(crate) fn parse(data: &[u8]) -> Result<Self, OfflineError> {
        serde_json::from_slice(data).map_err(|err| OfflineError::ManifestParse(err.to_string()))
    }

    /// Font stacks referenced by the style's symbol layers.
    ///
    /// Only literal `text-font` arrays are honored; data-driven font
    /// expressions fall back to the default stack.
    pub(crate) fn font_stacks(&self) -> Vec<String> {
        let mut stacks = vec![];
        for layer in &self.layers {
            let Some(fonts) = layer
                .layout
                .as_ref()
                .and_then(|layout| layout.get("text-font"))
                .and_then(literal_font_list)
            else {
                continue;
            };

            let stack = fonts.join(",");
            if !stacks.contains(&stack) {
                stacks.push(stack);
            }
        }

        if stacks.is_empty() && self.glyphs.is_some() {
            stacks.push(DEFAULT_FONT_STACK.to_string());
        }

        stacks
    }
}

impl StyleSource {
    /// Whether the source serves tiles that must be enumerated for download.
    pub(crate) fn is_tiled(&self) -> bool {
        matches!(self.source_type.as_str(), "vector" | "raster" | "raster-dem")
    }
}

impl TileJson {
    pub(crate) fn parse(data: &[u8]) -> Result<Self, OfflineError> {
        serde_json::from_slice(data).map_err(|err| OfflineError::ManifestParse(err.to_string()))
    }
}

fn literal_font_list(value: &serde_json::Value) -> Option<Vec<String>> {
    let fonts: Vec<String> = value
        .as_array()?
        .iter()
        .map(|font| font.as_str().map(str::to_string))
        .collect::<Option<_>>()?;

    if fonts.is_empty() {
        None
    } else {
        Some(fonts)
    }
}

/// Expands a `{z}/{x}/{y}` tile url template.
pub(crate) fn expand_tile_url(template: &str, x: u32, y: u32, z: u8) -> String {
    template
        .replace("{z}", &z.to_string())
        .replace("{x}", &x.to_string())
        .replace("{y}", &y.to_string())
}

/// Expands a `{fontstack}/{range}` glyph url template.
pub(crate) fn expand_glyph_url(template: &str, font_stack: &str, start: u32, end: u32) -> String {
    template
        .replace("{fontstack}", font_stack)
        .replace("{range}", &format!("{start}-{end}"))
}

/// Urls of the sprite JSON descriptor and image for the given pixel ratio.
pub(crate) fn sprite_urls(base: &str, pixel_ratio: f32) -> (String, String) {
    let suffix = if pixel_ratio > 1.0 { "@2x" } else { "" };
    (format!("{base}{suffix}.json"), format!("{base}{suffix}.png"))
}
