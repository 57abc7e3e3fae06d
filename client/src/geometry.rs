use slateboard_shared::Path;

/// Tuned rendering and hit-test parameters. The defaults reproduce the
/// classroom brush; they are fields rather than literals so a shell can
/// retune them without forking the engine.
#[derive(Clone, Debug)]
pub struct BrushConfig {
    /// Bias added to averaged pressure before scaling by the base width.
    pub pressure_bias: f32,
    /// Lower clamp on rendered width/radius, as a ratio of the base width.
    pub min_width_ratio: f32,
    /// Upper clamp on rendered width/radius, as a ratio of the base width.
    pub max_width_ratio: f32,
    /// Extra hit-test padding around a stroke, in pixels.
    pub erase_padding: f32,
    /// Maximum spacing between interpolated eraser samples, in pixels.
    pub erase_step: f32,
}

impl Default for BrushConfig {
    fn default() -> Self {
        Self {
            pressure_bias: 0.05,
            min_width_ratio: 0.35,
            max_width_ratio: 1.6,
            erase_padding: 4.0,
            erase_step: 4.0,
        }
    }
}

impl BrushConfig {
    pub fn dot_radius(&self, width: f32, pressure: f32) -> f32 {
        (width * (pressure + self.pressure_bias))
            .max(width * self.min_width_ratio)
            .min(width * self.max_width_ratio)
    }

    pub fn segment_width(&self, width: f32, pressure_a: f32, pressure_b: f32) -> f32 {
        let base = if width > 0.0 { width } else { 1.6 };
        let average = (pressure_a + pressure_b) / 2.0;
        let min_width = base * self.min_width_ratio;
        let max_width = base * self.max_width_ratio;
        (base * (average + self.pressure_bias))
            .max(min_width.max(0.75))
            .min(max_width.max(min_width))
    }
}

pub fn dist_to_segment(px: f32, py: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> f32 {
    let dx = x2 - x1;
    let dy = y2 - y1;
    if dx.abs() < f32::EPSILON && dy.abs() < f32::EPSILON {
        return ((px - x1).powi(2) + (py - y1).powi(2)).sqrt();
    }
    let t = ((px - x1) * dx + (py - y1) * dy) / (dx * dx + dy * dy);
    let t = t.clamp(0.0, 1.0);
    let proj_x = x1 + t * dx;
    let proj_y = y1 + t * dy;
    ((px - proj_x).powi(2) + (py - proj_y).powi(2)).sqrt()
}

pub fn path_bounds(path: &Path) -> Option<(f32, f32, f32, f32)> {
    let mut points = path.points.iter();
    let first = points.next()?;
    let mut bounds = (first.x, first.y, first.x, first.y);
    for point in points {
        bounds.0 = bounds.0.min(point.x);
        bounds.1 = bounds.1.min(point.y);
        bounds.2 = bounds.2.max(point.x);
        bounds.3 = bounds.3.max(point.y);
    }
    Some(bounds)
}

/// Whether an eraser sample at `(x, y)` touches the path. The threshold is
/// half the stroke width plus `padding`.
pub fn hit_test(path: &Path, x: f32, y: f32, padding: f32) -> bool {
    let threshold = path.width / 2.0 + padding;
    let Some((min_x, min_y, max_x, max_y)) = path_bounds(path) else {
        return false;
    };
    if x < min_x - threshold
        || x > max_x + threshold
        || y < min_y - threshold
        || y > max_y + threshold
    {
        return false;
    }
    if path.points.len() == 1 {
        let point = path.points[0];
        let dx = point.x - x;
        let dy = point.y - y;
        return dx * dx + dy * dy <= threshold * threshold;
    }
    for window in path.points.windows(2) {
        let distance = dist_to_segment(x, y, window[0].x, window[0].y, window[1].x, window[1].y);
        if distance <= threshold {
            return true;
        }
    }
    false
}

/// Sample positions for one eraser move. Interpolates between the previous
/// and current pointer position so a fast drag cannot skip over a thin
/// stroke. The current position is always the final sample.
pub fn sweep_positions(from: Option<(f32, f32)>, to: (f32, f32), step: f32) -> Vec<(f32, f32)> {
    let Some(from) = from else {
        return vec![to];
    };
    let dx = to.0 - from.0;
    let dy = to.1 - from.1;
    let distance = (dx * dx + dy * dy).sqrt();
    let count = (distance / step.max(0.5)).ceil() as usize;
    if count <= 1 {
        return vec![to];
    }
    (1..=count)
        .map(|i| {
            let t = i as f32 / count as f32;
            (from.0 + dx * t, from.1 + dy * t)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use slateboard_shared::{Composite, Point};

    fn segment_path(width: f32, points: Vec<Point>) -> Path {
        Path {
            id: "p".to_string(),
            color: "#111".to_string(),
            width,
            erase: false,
            opacity: 1.0,
            composite: Composite::SourceOver,
            points,
        }
    }

    #[test]
    fn hit_threshold_is_half_width_plus_padding() {
        let width = 6.0;
        let padding = 4.0;
        let threshold = width / 2.0 + padding;

        // Horizontal segment, probed perpendicular to its midpoint.
        let path = segment_path(
            width,
            vec![Point::new(10.0, 10.0, 0.5), Point::new(90.0, 10.0, 0.5)],
        );
        assert!(hit_test(&path, 50.0, 10.0 + threshold - 0.5, padding));
        assert!(!hit_test(&path, 50.0, 10.0 + threshold + 0.5, padding));

        // Diagonal segment, probed along its unit normal.
        let path = segment_path(
            width,
            vec![Point::new(10.0, 10.0, 0.5), Point::new(60.0, 80.0, 0.5)],
        );
        let length = (50.0f32 * 50.0 + 70.0 * 70.0).sqrt();
        let (nx, ny) = (-70.0 / length, 50.0 / length);
        let mid = (35.0, 45.0);
        assert!(hit_test(
            &path,
            mid.0 + nx * (threshold - 0.5),
            mid.1 + ny * (threshold - 0.5),
            padding
        ));
        assert!(!hit_test(
            &path,
            mid.0 + nx * (threshold + 0.5),
            mid.1 + ny * (threshold + 0.5),
            padding
        ));

        // Degenerate zero-length segment and single point reduce to a
        // radius test.
        for points in [
            vec![Point::new(40.0, 40.0, 0.5), Point::new(40.0, 40.0, 0.5)],
            vec![Point::new(40.0, 40.0, 0.5)],
        ] {
            let path = segment_path(width, points);
            assert!(hit_test(&path, 40.0, 40.0 + threshold - 0.5, padding));
            assert!(!hit_test(&path, 40.0, 40.0 + threshold + 0.5, padding));
        }
    }

    #[test]
    fn empty_path_never_hits() {
        let path = segment_path(6.0, Vec::new());
        assert!(!hit_test(&path, 0.0, 0.0, 4.0));
    }

    #[test]
    fn sweep_covers_fast_drags() {
        let positions = sweep_positions(Some((0.0, 0.0)), (100.0, 0.0), 4.0);
        assert_eq!(*positions.last().unwrap(), (100.0, 0.0));
        let mut last = (0.0, 0.0);
        for position in positions {
            assert!((position.0 - last.0).abs() <= 4.0 + 1e-3);
            last = position;
        }

        assert_eq!(sweep_positions(None, (5.0, 5.0), 4.0), vec![(5.0, 5.0)]);
    }
}
