use serde::{Deserialize, Serialize};

/// Declarative, resolution-independent background drawing (grids, axes).
///
/// Immutable once constructed; every student selecting the same preset shares
/// the same template content.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VectorTemplate {
    pub width: f32,
    pub height: f32,
    pub elements: Vec<VectorElement>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum VectorElement {
    #[serde(rename_all = "camelCase")]
    Line {
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        stroke: String,
        width: f32,
        opacity: f32,
        #[serde(default)]
        dash: Option<Vec<f32>>,
    },
    #[serde(rename_all = "camelCase")]
    Arrow {
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        stroke: String,
        width: f32,
        opacity: f32,
        head_size: f32,
    },
    #[serde(rename_all = "camelCase")]
    Rect {
        x: f32,
        y: f32,
        w: f32,
        h: f32,
        stroke: String,
        width: f32,
        opacity: f32,
        #[serde(default)]
        fill: Option<String>,
        #[serde(default)]
        dash: Option<Vec<f32>>,
    },
}

const GRID_STROKE: &str = "#cbd5e1";
const AXIS_STROKE: &str = "#64748b";

pub fn grid(width: f32, height: f32, spacing: f32) -> VectorTemplate {
    let spacing = spacing.max(4.0);
    let mut elements = Vec::new();
    let mut x = spacing;
    while x < width {
        elements.push(VectorElement::Line {
            x1: x,
            y1: 0.0,
            x2: x,
            y2: height,
            stroke: GRID_STROKE.to_string(),
            width: 1.0,
            opacity: 0.8,
            dash: None,
        });
        x += spacing;
    }
    let mut y = spacing;
    while y < height {
        elements.push(VectorElement::Line {
            x1: 0.0,
            y1: y,
            x2: width,
            y2: y,
            stroke: GRID_STROKE.to_string(),
            width: 1.0,
            opacity: 0.8,
            dash: None,
        });
        y += spacing;
    }
    VectorTemplate {
        width,
        height,
        elements,
    }
}

pub fn axes(width: f32, height: f32) -> VectorTemplate {
    let mid_x = width / 2.0;
    let mid_y = height / 2.0;
    VectorTemplate {
        width,
        height,
        elements: vec![
            VectorElement::Arrow {
                x1: 0.0,
                y1: mid_y,
                x2: width,
                y2: mid_y,
                stroke: AXIS_STROKE.to_string(),
                width: 2.0,
                opacity: 1.0,
                head_size: 12.0,
            },
            VectorElement::Arrow {
                x1: mid_x,
                y1: height,
                x2: mid_x,
                y2: 0.0,
                stroke: AXIS_STROKE.to_string(),
                width: 2.0,
                opacity: 1.0,
                head_size: 12.0,
            },
        ],
    }
}

/// Resolves a `presetId` from the wire into its template.
pub fn preset(id: &str, width: f32, height: f32) -> Option<VectorTemplate> {
    match id {
        "grid" => Some(grid(width, height, 40.0)),
        "axes" => Some(axes(width, height)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_lines_cover_both_directions() {
        let template = grid(800.0, 600.0, 100.0);
        assert_eq!(template.elements.len(), 7 + 5);
    }

    #[test]
    fn unknown_preset_is_none() {
        assert!(preset("dots", 800.0, 600.0).is_none());
        assert!(preset("axes", 800.0, 600.0).is_some());
    }
}
