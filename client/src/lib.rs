pub mod annotations;
pub mod board;
pub mod geometry;
pub mod persistence;
pub mod reliable;
pub mod render;
pub mod session;
pub mod student;
pub mod teacher;
pub mod transport;

pub const BASE_CANVAS_WIDTH: f32 = 800.0;
pub const BASE_CANVAS_HEIGHT: f32 = 600.0;
