//! Path and board rendering over an abstract target.
//!
//! The shell owns the actual canvas; the core only emits primitives. This
//! keeps the render path a pure function of `(paths, background)` and makes
//! it testable headlessly through `Recording`.

use slateboard_shared::messages::BatchFragment;
use slateboard_shared::{Composite, Path, VectorElement, VectorTemplate};

use crate::board::Board;
use crate::geometry::BrushConfig;

#[derive(Clone, Debug, PartialEq)]
pub struct Paint {
    pub color: String,
    pub opacity: f32,
    pub composite: Composite,
}

impl Paint {
    pub fn solid(color: &str) -> Self {
        Self {
            color: color.to_string(),
            opacity: 1.0,
            composite: Composite::SourceOver,
        }
    }
}

/// Outcome of the shell's asynchronous background image decode. Rendering
/// never blocks on it: the background layer is skipped until `Loaded`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ResolvedBackground {
    NotLoaded,
    Loaded { width: f32, height: f32 },
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FitRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

pub trait RenderTarget {
    fn fill_circle(&mut self, x: f32, y: f32, radius: f32, paint: &Paint);
    fn stroke_quadratic(
        &mut self,
        from: (f32, f32),
        control: (f32, f32),
        to: (f32, f32),
        width: f32,
        paint: &Paint,
    );
    fn stroke_line(
        &mut self,
        from: (f32, f32),
        to: (f32, f32),
        width: f32,
        dash: Option<&[f32]>,
        paint: &Paint,
    );
    fn stroke_rect(
        &mut self,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        stroke_width: f32,
        dash: Option<&[f32]>,
        paint: &Paint,
    );
    fn fill_rect(&mut self, x: f32, y: f32, width: f32, height: f32, paint: &Paint);
    /// Draw the currently resolved background image into `rect`. The shell
    /// knows which decoded image that is.
    fn draw_background_image(&mut self, rect: FitRect);
}

/// Aspect-fit placement: centered, contained, never cropping.
pub fn fit_rect(
    canvas_width: f32,
    canvas_height: f32,
    content_width: f32,
    content_height: f32,
) -> FitRect {
    if content_width <= 0.0 || content_height <= 0.0 {
        return FitRect {
            x: 0.0,
            y: 0.0,
            width: canvas_width,
            height: canvas_height,
        };
    }
    let canvas_ratio = canvas_width / canvas_height.max(1.0);
    let content_ratio = content_width / content_height;
    let (width, height) = if content_ratio > canvas_ratio {
        (canvas_width, canvas_width / content_ratio)
    } else {
        (canvas_height * content_ratio, canvas_height)
    };
    FitRect {
        x: (canvas_width - width) / 2.0,
        y: (canvas_height - height) / 2.0,
        width,
        height,
    }
}

fn path_paint(path: &Path) -> Paint {
    Paint {
        color: path.color.clone(),
        opacity: path.opacity,
        composite: if path.erase {
            Composite::DestinationOut
        } else {
            path.composite
        },
    }
}

/// Renders one freehand path: a pressure-scaled dot for a single point,
/// otherwise quadratic segments through successive midpoints with the width
/// interpolated from the endpoint pressures.
pub fn render_path<T: RenderTarget + ?Sized>(target: &mut T, path: &Path, brush: &BrushConfig) {
    if path.points.is_empty() {
        return;
    }
    let paint = path_paint(path);
    if path.points.len() == 1 {
        let point = path.points[0];
        let radius = brush.dot_radius(path.width, point.pressure);
        target.fill_circle(point.x, point.y, radius, &paint);
        return;
    }
    let mut start = (path.points[0].x, path.points[0].y);
    let mut previous = path.points[0];
    for current in &path.points[1..] {
        let midpoint = ((previous.x + current.x) / 2.0, (previous.y + current.y) / 2.0);
        let width = brush.segment_width(path.width, previous.pressure, current.pressure);
        target.stroke_quadratic(start, (previous.x, previous.y), midpoint, width, &paint);
        start = midpoint;
        previous = *current;
    }
    let last = path.points[path.points.len() - 1];
    let final_width = brush.segment_width(path.width, last.pressure, last.pressure);
    let radius = (path.width / 2.0)
        .max(final_width / 2.0)
        .max(path.width * brush.min_width_ratio);
    target.fill_circle(last.x, last.y, radius, &paint);
}

pub fn render_vector_template<T: RenderTarget + ?Sized>(
    target: &mut T,
    template: &VectorTemplate,
    canvas_width: f32,
    canvas_height: f32,
) {
    let rect = fit_rect(canvas_width, canvas_height, template.width, template.height);
    let scale_x = rect.width / template.width.max(1.0);
    let scale_y = rect.height / template.height.max(1.0);
    let map = |x: f32, y: f32| (rect.x + x * scale_x, rect.y + y * scale_y);
    for element in &template.elements {
        match element {
            VectorElement::Line {
                x1,
                y1,
                x2,
                y2,
                stroke,
                width,
                opacity,
                dash,
            } => {
                let paint = Paint {
                    color: stroke.clone(),
                    opacity: *opacity,
                    composite: Composite::SourceOver,
                };
                target.stroke_line(map(*x1, *y1), map(*x2, *y2), *width, dash.as_deref(), &paint);
            }
            VectorElement::Arrow {
                x1,
                y1,
                x2,
                y2,
                stroke,
                width,
                opacity,
                head_size,
            } => {
                let paint = Paint {
                    color: stroke.clone(),
                    opacity: *opacity,
                    composite: Composite::SourceOver,
                };
                let from = map(*x1, *y1);
                let to = map(*x2, *y2);
                target.stroke_line(from, to, *width, None, &paint);
                let angle = (to.1 - from.1).atan2(to.0 - from.0) + std::f32::consts::PI;
                let spread = std::f32::consts::PI / 7.0;
                for side in [-1.0f32, 1.0] {
                    let theta = angle + side * spread;
                    let head = (
                        to.0 + head_size * theta.cos(),
                        to.1 + head_size * theta.sin(),
                    );
                    target.stroke_line(to, head, *width, None, &paint);
                }
            }
            VectorElement::Rect {
                x,
                y,
                w,
                h,
                stroke,
                width,
                opacity,
                fill,
                dash,
            } => {
                let origin = map(*x, *y);
                let size = (w * scale_x, h * scale_y);
                if let Some(fill) = fill {
                    let paint = Paint {
                        color: fill.clone(),
                        opacity: *opacity,
                        composite: Composite::SourceOver,
                    };
                    target.fill_rect(origin.0, origin.1, size.0, size.1, &paint);
                }
                let paint = Paint {
                    color: stroke.clone(),
                    opacity: *opacity,
                    composite: Composite::SourceOver,
                };
                target.stroke_rect(
                    origin.0,
                    origin.1,
                    size.0,
                    size.1,
                    *width,
                    dash.as_deref(),
                    &paint,
                );
            }
        }
    }
}

/// Full repaint: background image (only once decoded), vector template,
/// the board's own paths, then the annotation overlay. Student strokes and
/// teacher annotations stay disjoint layers composited here, never merged.
pub fn render_board<T: RenderTarget + ?Sized>(
    target: &mut T,
    board: &Board,
    annotations: &[Path],
    canvas_width: f32,
    canvas_height: f32,
) {
    if board.background_image.is_some() {
        if let ResolvedBackground::Loaded { width, height } = board.background {
            target.draw_background_image(fit_rect(canvas_width, canvas_height, width, height));
        }
    }
    if let Some(template) = &board.background_vector {
        render_vector_template(target, template, canvas_width, canvas_height);
    }
    for path in board.visible_paths() {
        render_path(target, path, &board.brush);
    }
    for path in annotations {
        render_path(target, path, &board.brush);
    }
}

/// Paints one low-latency draw fragment straight onto the target, without
/// touching any path state.
pub fn render_fragment<T: RenderTarget + ?Sized>(target: &mut T, fragment: &BatchFragment) {
    match fragment {
        BatchFragment::Dot {
            x,
            y,
            radius,
            color,
        } => {
            target.fill_circle(*x, *y, *radius, &Paint::solid(color));
        }
        BatchFragment::Line {
            start_x,
            start_y,
            end_x,
            end_y,
            width,
            color,
        } => {
            target.stroke_line(
                (*start_x, *start_y),
                (*end_x, *end_y),
                *width,
                None,
                &Paint::solid(color),
            );
        }
        BatchFragment::Quadratic {
            start_x,
            start_y,
            control_x,
            control_y,
            end_x,
            end_y,
            width,
            color,
        } => {
            target.stroke_quadratic(
                (*start_x, *start_y),
                (*control_x, *control_y),
                (*end_x, *end_y),
                *width,
                &Paint::solid(color),
            );
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RenderOp {
    Circle {
        x: f32,
        y: f32,
        radius: f32,
        color: String,
        composite: Composite,
    },
    Quadratic {
        from: (f32, f32),
        control: (f32, f32),
        to: (f32, f32),
        width: f32,
        composite: Composite,
    },
    Line {
        from: (f32, f32),
        to: (f32, f32),
        width: f32,
        color: String,
    },
    Rect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        color: String,
    },
    FilledRect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        color: String,
    },
    BackgroundImage(FitRect),
}

/// Headless target that records emitted primitives.
#[derive(Default)]
pub struct Recording {
    pub ops: Vec<RenderOp>,
}

impl RenderTarget for Recording {
    fn fill_circle(&mut self, x: f32, y: f32, radius: f32, paint: &Paint) {
        self.ops.push(RenderOp::Circle {
            x,
            y,
            radius,
            color: paint.color.clone(),
            composite: paint.composite,
        });
    }

    fn stroke_quadratic(
        &mut self,
        from: (f32, f32),
        control: (f32, f32),
        to: (f32, f32),
        width: f32,
        paint: &Paint,
    ) {
        self.ops.push(RenderOp::Quadratic {
            from,
            control,
            to,
            width,
            composite: paint.composite,
        });
    }

    fn stroke_line(
        &mut self,
        from: (f32, f32),
        to: (f32, f32),
        width: f32,
        _dash: Option<&[f32]>,
        paint: &Paint,
    ) {
        self.ops.push(RenderOp::Line {
            from,
            to,
            width,
            color: paint.color.clone(),
        });
    }

    fn stroke_rect(
        &mut self,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        _stroke_width: f32,
        _dash: Option<&[f32]>,
        paint: &Paint,
    ) {
        self.ops.push(RenderOp::Rect {
            x,
            y,
            width,
            height,
            color: paint.color.clone(),
        });
    }

    fn fill_rect(&mut self, x: f32, y: f32, width: f32, height: f32, paint: &Paint) {
        self.ops.push(RenderOp::FilledRect {
            x,
            y,
            width,
            height,
            color: paint.color.clone(),
        });
    }

    fn draw_background_image(&mut self, rect: FitRect) {
        self.ops.push(RenderOp::BackgroundImage(rect));
    }
}
