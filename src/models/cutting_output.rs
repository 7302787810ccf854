use serde::{Deserialize, Serialize};

/// One color/size row of a cutting output; becomes one bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorSizeBreakdown {
    pub color: String,
    pub size: String,
    pub pieces: u32,
}

/// Output of the cutting room, handed to sewing as a set of bundles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CuttingOutput {
    pub lot_number: String,
    pub article_number: String,
    pub garment_type: String,
    pub color_size_breakdown: Vec<ColorSizeBreakdown>,
}

impl CuttingOutput {
    pub fn new(
        lot_number: impl Into<String>,
        article_number: impl Into<String>,
        garment_type: impl Into<String>,
    ) -> Self {
        Self {
            lot_number: lot_number.into(),
            article_number: article_number.into(),
            garment_type: garment_type.into(),
            color_size_breakdown: Vec::new(),
        }
    }

    pub fn with_row(mut self, color: impl Into<String>, size: impl Into<String>, pieces: u32) -> Self {
        self.color_size_breakdown.push(ColorSizeBreakdown {
            color: color.into(),
            size: size.into(),
            pieces,
        });
        self
    }

    pub fn total_pieces(&self) -> u64 {
        self.color_size_breakdown
            .iter()
            .map(|row| u64::from(row.pieces))
            .sum()
    }
}
