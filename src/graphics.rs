use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TerminalError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Sixel,
    Kitty,
    ItermInline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    Inline,
    Absolute,
    Floating,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "unit", rename_all = "snake_case")]
pub enum Dimension {
    Auto,
    Cells(u32),
    Pixels(u32),
    Percent(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub display_mode: DisplayMode,
    pub z_index: i32,
    pub requested_width: Dimension,
    pub requested_height: Dimension,
    pub x_offset: i32,
    pub y_offset: i32,
    pub preserve_aspect_ratio: bool,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            display_mode: DisplayMode::Inline,
            z_index: 0,
            requested_width: Dimension::Auto,
            requested_height: Dimension::Auto,
            x_offset: 0,
            y_offset: 0,
            preserve_aspect_ratio: true,
        }
    }
}

/// A decoded (or pass-through, undecoded) image placed on the screen.
#[derive(Debug, Clone)]
pub struct Graphic {
    pub id: u64,
    pub protocol: Protocol,
    /// Raw source bytes as received (Sixel payload, PNG bytes, etc.) — the
    /// core never decodes pixels itself; decoding is an injected collaborator.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub row: u64,
    pub col: u16,
    pub placement: Placement,
}

#[derive(Serialize, Deserialize)]
struct GraphicData {
    #[serde(rename = "type")]
    kind: String,
    value: String,
}

#[derive(Serialize, Deserialize)]
struct PlacementWire {
    protocol: Protocol,
    data: GraphicData,
    width: u32,
    height: u32,
    row: u64,
    col: u16,
    placement: Placement,
}

#[derive(Serialize, Deserialize)]
struct GraphicsDocument {
    version: u32,
    placements: Vec<PlacementWire>,
    scrollback: Vec<PlacementWire>,
    animations: Vec<serde_json::Value>,
}

/// Catalog of graphics currently anchored to rows, with versioned JSON
/// export/import (spec §4.8).
#[derive(Default)]
pub struct GraphicsCatalog {
    graphics: Vec<Graphic>,
    next_id: u64,
}

impl GraphicsCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        protocol: Protocol,
        data: Vec<u8>,
        width: u32,
        height: u32,
        row: u64,
        col: u16,
        placement: Placement,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.graphics.push(Graphic {
            id,
            protocol,
            data,
            width,
            height,
            row,
            col,
            placement,
        });
        id
    }

    pub fn count(&self) -> usize {
        self.graphics.len()
    }

    pub fn at_row(&self, row: u64) -> Vec<&Graphic> {
        self.graphics.iter().filter(|g| g.row == row).collect()
    }

    pub fn clear(&mut self) {
        self.graphics.clear();
    }

    pub fn export_json(&self) -> String {
        let placements = self
            .graphics
            .iter()
            .map(|g| PlacementWire {
                protocol: g.protocol,
                data: GraphicData {
                    kind: "Inline".to_string(),
                    value: BASE64_STANDARD.encode(&g.data),
                },
                width: g.width,
                height: g.height,
                row: g.row,
                col: g.col,
                placement: g.placement.clone(),
            })
            .collect();

        let doc = GraphicsDocument {
            version: 1,
            placements,
            scrollback: Vec::new(),
            animations: Vec::new(),
        };
        serde_json::to_string(&doc).expect("GraphicsDocument serializes infallibly")
    }

    /// Clears existing graphics and restores from exported JSON. Returns the
    /// restored count.
    pub fn import_json(&mut self, json: &str) -> Result<usize> {
        let doc: GraphicsDocument = serde_json::from_str(json)
            .map_err(|e| TerminalError::InvalidArgument(format!("invalid graphics JSON: {e}")))?;

        self.graphics.clear();
        for p in &doc.placements {
            let data = BASE64_STANDARD
                .decode(&p.data.value)
                .map_err(|e| TerminalError::InvalidArgument(format!("invalid base64: {e}")))?;
            self.add(p.protocol, data, p.width, p.height, p.row, p.col, p.placement.clone());
        }
        Ok(self.graphics.len())
    }
}
