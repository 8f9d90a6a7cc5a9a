use std::f32::consts::{FRAC_PI_2, TAU};

use glam::{Affine2, Vec2};
use serde::{Deserialize, Serialize};

use crate::{canvas::Path, ui::Choice};

/// Outline used for speaker rings and cones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    #[default]
    Circle,
    Triangle,
    Square,
    Star,
    Heart,
    /// Drawn by the speaker's HUD renderer; falls back to a circle here.
    Donut,
}

impl Choice for Shape {
    const ALL: &'static [Self] = &[
        Self::Circle,
        Self::Triangle,
        Self::Square,
        Self::Star,
        Self::Heart,
        Self::Donut,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::Circle => "circle",
            Self::Triangle => "triangle",
            Self::Square => "square",
            Self::Star => "star",
            Self::Heart => "heart",
            Self::Donut => "donut",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Circle => "Circle",
            Self::Triangle => "Triangle",
            Self::Square => "Square",
            Self::Star => "Star",
            Self::Heart => "Heart",
            Self::Donut => "Cyber donut",
        }
    }
}

const STAR_SPIKES: usize = 5;
const STAR_INNER: f32 = 0.45;

/// Closed outline of `shape` centred on the origin.
pub fn shape_path(shape: Shape, radius: f32, rotation: f32) -> Path {
    let mut path = Path::new();
    match shape {
        Shape::Circle | Shape::Donut => {
            path.circle(0.0, 0.0, radius);
        }
        Shape::Triangle => polygon(&mut path, 3, |_| radius, rotation),
        Shape::Square => {
            let half = radius * 0.85;
            let turn = Affine2::from_angle(rotation);
            let corners = [(-half, -half), (half, -half), (half, half), (-half, half)]
                .map(|(x, y)| turn.transform_point2(Vec2::new(x, y)));
            path.move_to(corners[0].x, corners[0].y);
            for corner in &corners[1..] {
                path.line_to(corner.x, corner.y);
            }
            path.close();
        }
        Shape::Star => polygon(
            &mut path,
            STAR_SPIKES * 2,
            |i| if i % 2 == 0 { radius } else { radius * STAR_INNER },
            rotation,
        ),
        Shape::Heart => heart(&mut path, radius, rotation),
    }
    path
}

fn polygon(path: &mut Path, vertices: usize, radius_of: impl Fn(usize) -> f32, rotation: f32) {
    for i in 0..vertices {
        let angle = rotation + i as f32 / vertices as f32 * TAU - FRAC_PI_2;
        let r = radius_of(i);
        let (x, y) = (angle.cos() * r, angle.sin() * r);
        if i == 0 {
            path.move_to(x, y);
        } else {
            path.line_to(x, y);
        }
    }
    path.close();
}

fn heart(path: &mut Path, radius: f32, rotation: f32) {
    let r = radius * 0.85;
    let dy = r * 0.05;
    let turn = Affine2::from_angle(rotation);
    let p = |x: f32, y: f32| turn.transform_point2(Vec2::new(x * r, y * r - dy));

    let notch = p(0.0, -0.3);
    path.move_to(notch.x, notch.y);
    path.bezier_to(p(0.2, -1.0), p(1.0, -1.0), p(1.0, -0.3));
    path.bezier_to(p(1.0, 0.3), p(0.5, 0.65), p(0.0, 1.0));
    path.bezier_to(p(-0.5, 0.65), p(-1.0, 0.3), p(-1.0, -0.3));
    path.bezier_to(p(-1.0, -1.0), p(-0.2, -1.0), notch);
    path.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::PathCommand;

    fn vertices(path: &Path) -> Vec<Vec2> {
        path.commands()
            .iter()
            .filter_map(|c| match c {
                PathCommand::MoveTo(p) | PathCommand::LineTo(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn triangle_points_up() {
        let points = vertices(&shape_path(Shape::Triangle, 10.0, 0.0));
        assert_eq!(points.len(), 3);
        assert!((points[0] - Vec2::new(0.0, -10.0)).length() < 1e-4);
    }

    #[test]
    fn star_alternates_radii() {
        let points = vertices(&shape_path(Shape::Star, 10.0, 0.0));
        assert_eq!(points.len(), 10);
        assert!((points[0].length() - 10.0).abs() < 1e-4);
        assert!((points[1].length() - 4.5).abs() < 1e-4);
    }

    #[test]
    fn square_uses_inset_half_width() {
        let points = vertices(&shape_path(Shape::Square, 10.0, 0.0));
        assert_eq!(points.len(), 4);
        assert!((points[0] - Vec2::new(-8.5, -8.5)).length() < 1e-4);
    }

    #[test]
    fn every_shape_is_closed() {
        for &shape in Shape::ALL {
            let path = shape_path(shape, 5.0, 0.3);
            assert!(matches!(path.commands().last(), Some(PathCommand::Close)));
        }
    }
}
