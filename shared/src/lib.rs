use serde::{Deserialize, Serialize};

pub mod delta;
pub mod messages;
pub mod resume;
pub mod vector;

pub use delta::AnnotationDelta;
pub use messages::{DecodeError, Envelope, Message};
pub use resume::{decode_resume_state, encode_resume_state, ResumeDecodeError, ResumeState};
pub use vector::{VectorElement, VectorTemplate};

pub const MIN_PRESSURE: f32 = 0.05;
pub const MAX_PATHS: usize = 2000;
pub const MAX_POINTS_PER_PATH: usize = 5000;
pub const MAX_ID_LEN: usize = 64;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    #[serde(default = "default_pressure")]
    pub pressure: f32,
}

impl Point {
    pub fn new(x: f32, y: f32, pressure: f32) -> Self {
        Self {
            x,
            y,
            pressure: clamp_pressure(pressure),
        }
    }
}

fn default_pressure() -> f32 {
    0.5
}

pub fn clamp_pressure(value: f32) -> f32 {
    if !value.is_finite() {
        return 0.5;
    }
    value.max(MIN_PRESSURE).min(1.0)
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Composite {
    #[default]
    #[serde(rename = "source-over")]
    SourceOver,
    #[serde(rename = "destination-out")]
    DestinationOut,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Path {
    pub id: String,
    pub color: String,
    pub width: f32,
    pub erase: bool,
    pub opacity: f32,
    pub composite: Composite,
    pub points: Vec<Point>,
}

impl Path {
    /// Appends a raw input sample, clamping pressure into the valid range.
    pub fn push_point(&mut self, x: f32, y: f32, pressure: f32) {
        if !x.is_finite() || !y.is_finite() {
            return;
        }
        if self.points.len() >= MAX_POINTS_PER_PATH {
            return;
        }
        self.points.push(Point::new(x, y, pressure));
    }

    /// Normalizes into fractional `[0,1]` coordinates for the wire.
    ///
    /// Positions quantize to 4 decimal digits, pressure to 3, so sender and
    /// receiver canvas sizes need not match and payload size stays bounded.
    pub fn to_wire(&self, width: f32, height: f32) -> WirePath {
        let width = width.max(1.0);
        let height = height.max(1.0);
        WirePath {
            id: self.id.clone(),
            color: self.color.clone(),
            width: self.width,
            erase: self.erase,
            opacity: self.opacity,
            composite: self.composite,
            points: self
                .points
                .iter()
                .map(|point| WirePoint {
                    x: quantize(point.x / width, 4),
                    y: quantize(point.y / height, 4),
                    p: quantize(point.pressure, 3),
                })
                .collect(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct WirePoint {
    pub x: f32,
    pub y: f32,
    #[serde(default = "default_pressure")]
    pub p: f32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WirePath {
    pub id: String,
    pub color: String,
    pub width: f32,
    #[serde(default)]
    pub erase: bool,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    #[serde(default)]
    pub composite: Composite,
    pub points: Vec<WirePoint>,
}

impl WirePath {
    /// Denormalizes into the receiver's pixel space.
    pub fn to_path(&self, width: f32, height: f32) -> Path {
        let width = width.max(1.0);
        let height = height.max(1.0);
        Path {
            id: self.id.clone(),
            color: self.color.clone(),
            width: self.width,
            erase: self.erase,
            opacity: self.opacity,
            composite: self.composite,
            points: self
                .points
                .iter()
                .map(|point| Point::new(point.x * width, point.y * height, point.p))
                .collect(),
        }
    }
}

fn default_opacity() -> f32 {
    1.0
}

pub fn quantize(value: f32, digits: u32) -> f32 {
    if !value.is_finite() {
        return 0.0;
    }
    let scale = 10f32.powi(digits as i32);
    (value * scale).round() / scale
}

pub fn sanitize_color(mut color: String) -> String {
    if color.is_empty() {
        return "#1e1b4b".to_string();
    }
    if color.len() > 32 {
        color.truncate(32);
    }
    color
}

pub fn sanitize_width(width: f32) -> f32 {
    let width = if width.is_finite() { width } else { 5.0 };
    width.max(1.0).min(60.0)
}

pub fn sanitize_opacity(opacity: f32) -> f32 {
    if !opacity.is_finite() {
        return 1.0;
    }
    opacity.max(0.0).min(1.0)
}

pub fn sanitize_wire_path(mut path: WirePath) -> Option<WirePath> {
    if path.id.is_empty() || path.id.len() > MAX_ID_LEN {
        return None;
    }
    path.color = sanitize_color(path.color);
    path.width = sanitize_width(path.width);
    path.opacity = sanitize_opacity(path.opacity);
    path.points
        .retain(|point| point.x.is_finite() && point.y.is_finite() && point.p.is_finite());
    path.points.truncate(MAX_POINTS_PER_PATH);
    if path.points.is_empty() {
        return None;
    }
    Some(path)
}

pub fn sanitize_wire_paths(paths: Vec<WirePath>) -> Vec<WirePath> {
    let mut sanitized = paths
        .into_iter()
        .filter_map(sanitize_wire_path)
        .collect::<Vec<_>>();
    sanitized.truncate(MAX_PATHS);
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_with_points(points: Vec<Point>) -> Path {
        Path {
            id: "p1".to_string(),
            color: "#1e1b4b".to_string(),
            width: 5.0,
            erase: false,
            opacity: 1.0,
            composite: Composite::SourceOver,
            points,
        }
    }

    #[test]
    fn pressure_clamps_into_range() {
        assert_eq!(Point::new(0.0, 0.0, 2.0).pressure, 1.0);
        assert_eq!(Point::new(0.0, 0.0, 0.0).pressure, MIN_PRESSURE);
        assert_eq!(Point::new(0.0, 0.0, f32::NAN).pressure, 0.5);
    }

    #[test]
    fn wire_round_trip_stays_within_quantization_tolerance() {
        for (width, height) in [(800.0f32, 600.0f32), (1024.0, 768.0), (333.0, 217.0)] {
            let path = path_with_points(vec![
                Point::new(12.5, 40.25, 0.5),
                Point::new(400.125, 300.875, 0.91),
                Point::new(799.0, 599.0, 0.05),
            ]);
            let restored = path.to_wire(width, height).to_path(width, height);
            assert_eq!(restored.points.len(), path.points.len());
            for (restored, original) in restored.points.iter().zip(&path.points) {
                // Half a step of the 4-digit fractional grid, scaled back up.
                assert!((restored.x - original.x).abs() <= width * 0.5e-4 + 1e-3);
                assert!((restored.y - original.y).abs() <= height * 0.5e-4 + 1e-3);
                assert!((restored.pressure - original.pressure).abs() <= 0.5e-3 + 1e-5);
            }
        }
    }

    #[test]
    fn sanitize_drops_paths_without_usable_points() {
        let wire = WirePath {
            id: "p1".to_string(),
            color: String::new(),
            width: f32::NAN,
            erase: false,
            opacity: 2.0,
            composite: Composite::SourceOver,
            points: vec![WirePoint {
                x: f32::NAN,
                y: 0.5,
                p: 0.5,
            }],
        };
        assert!(sanitize_wire_path(wire).is_none());

        let empty_id = WirePath {
            id: String::new(),
            color: "#000".to_string(),
            width: 2.0,
            erase: false,
            opacity: 1.0,
            composite: Composite::SourceOver,
            points: vec![WirePoint {
                x: 0.1,
                y: 0.1,
                p: 0.5,
            }],
        };
        assert!(sanitize_wire_path(empty_id).is_none());
    }

    #[test]
    fn sanitize_repairs_style_fields() {
        let wire = WirePath {
            id: "p2".to_string(),
            color: String::new(),
            width: 900.0,
            erase: true,
            opacity: 2.0,
            composite: Composite::DestinationOut,
            points: vec![WirePoint {
                x: 0.2,
                y: 0.3,
                p: 0.4,
            }],
        };
        let sanitized = sanitize_wire_path(wire).unwrap();
        assert_eq!(sanitized.color, "#1e1b4b");
        assert_eq!(sanitized.width, 60.0);
        assert_eq!(sanitized.opacity, 1.0);
    }
}
