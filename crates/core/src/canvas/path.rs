use std::f32::consts::TAU;

use glam::Vec2;

/// A single path verb in user space.
#[derive(Debug, Clone, PartialEq)]
pub enum PathCommand {
    MoveTo(Vec2),
    LineTo(Vec2),
    BezierTo(Vec2, Vec2, Vec2),
    /// Clockwise (in screen space) arc from `start` to `end` radians.
    Arc {
        center: Vec2,
        radius: f32,
        start: f32,
        end: f32,
    },
    Close,
}

/// Flattened sub-path produced by [`Path::flatten`].
#[derive(Debug, Clone, PartialEq)]
pub struct Polyline {
    pub points: Vec<Vec2>,
    pub closed: bool,
}

/// Path builder mirroring the 2D canvas path API.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Path {
    commands: Vec<PathCommand>,
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn move_to(&mut self, x: f32, y: f32) -> &mut Self {
        self.commands.push(PathCommand::MoveTo(Vec2::new(x, y)));
        self
    }

    pub fn line_to(&mut self, x: f32, y: f32) -> &mut Self {
        self.commands.push(PathCommand::LineTo(Vec2::new(x, y)));
        self
    }

    pub fn bezier_to(&mut self, c1: Vec2, c2: Vec2, to: Vec2) -> &mut Self {
        self.commands.push(PathCommand::BezierTo(c1, c2, to));
        self
    }

    /// Appends an arc. Like the canvas API, the arc is joined to the current
    /// point by a straight line when a sub-path is already open.
    pub fn arc(&mut self, cx: f32, cy: f32, radius: f32, start: f32, end: f32) -> &mut Self {
        self.commands.push(PathCommand::Arc {
            center: Vec2::new(cx, cy),
            radius: radius.max(0.0),
            start,
            end,
        });
        self
    }

    /// Closed full circle as its own sub-path.
    pub fn circle(&mut self, cx: f32, cy: f32, radius: f32) -> &mut Self {
        let radius = radius.max(0.0);
        self.move_to(cx + radius, cy);
        self.arc(cx, cy, radius, 0.0, TAU);
        self.close()
    }

    pub fn rect(&mut self, x: f32, y: f32, w: f32, h: f32) -> &mut Self {
        self.move_to(x, y)
            .line_to(x + w, y)
            .line_to(x + w, y + h)
            .line_to(x, y + h)
            .close()
    }

    pub fn close(&mut self) -> &mut Self {
        self.commands.push(PathCommand::Close);
        self
    }

    pub fn commands(&self) -> &[PathCommand] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Converts curves into line segments. `scale` is the user-to-device
    /// scale factor and controls how finely arcs are subdivided.
    pub fn flatten(&self, scale: f32) -> Vec<Polyline> {
        let mut out = Vec::new();
        let mut current: Vec<Vec2> = Vec::new();
        let scale = scale.abs().max(0.01);

        let finish = |current: &mut Vec<Vec2>, out: &mut Vec<Polyline>, closed: bool| {
            if current.len() > 1 {
                out.push(Polyline {
                    points: std::mem::take(current),
                    closed,
                });
            } else {
                current.clear();
            }
        };

        for command in &self.commands {
            match *command {
                PathCommand::MoveTo(p) => {
                    finish(&mut current, &mut out, false);
                    current.push(p);
                }
                PathCommand::LineTo(p) => current.push(p),
                PathCommand::BezierTo(c1, c2, to) => {
                    let from = current.last().copied().unwrap_or(c1);
                    if current.is_empty() {
                        current.push(from);
                    }
                    let length = from.distance(c1) + c1.distance(c2) + c2.distance(to);
                    let steps = ((length * scale / 4.0).ceil() as usize).clamp(4, 64);
                    for i in 1..=steps {
                        let t = i as f32 / steps as f32;
                        current.push(cubic(from, c1, c2, to, t));
                    }
                }
                PathCommand::Arc {
                    center,
                    radius,
                    start,
                    end,
                } => {
                    let sweep = end - start;
                    let steps = arc_steps(sweep, radius * scale);
                    for i in 0..=steps {
                        let angle = start + sweep * (i as f32 / steps as f32);
                        let p = center + Vec2::new(angle.cos(), angle.sin()) * radius;
                        if i == 0 && current.last().is_some_and(|last| last.distance(p) < 1e-4) {
                            continue;
                        }
                        current.push(p);
                    }
                }
                PathCommand::Close => {
                    let start = current.first().copied();
                    finish(&mut current, &mut out, true);
                    if let Some(start) = start {
                        current.push(start);
                    }
                }
            }
        }
        finish(&mut current, &mut out, false);
        out
    }
}

fn arc_steps(sweep: f32, device_radius: f32) -> usize {
    let turns = (sweep.abs() / TAU).min(1.0);
    let per_turn = (12.0 + device_radius.max(0.0).sqrt() * 6.0).min(256.0);
    ((turns * per_turn).ceil() as usize).max(2)
}

fn cubic(p0: Vec2, p1: Vec2, p2: Vec2, p3: Vec2, t: f32) -> Vec2 {
    let u = 1.0 - t;
    p0 * (u * u * u) + p1 * (3.0 * u * u * t) + p2 * (3.0 * u * t * t) + p3 * (t * t * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_flattens_to_closed_quad() {
        let mut path = Path::new();
        path.rect(0.0, 0.0, 10.0, 5.0);
        let lines = path.flatten(1.0);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].closed);
        assert_eq!(lines[0].points.len(), 4);
    }

    #[test]
    fn circle_points_stay_on_radius() {
        let mut path = Path::new();
        path.circle(5.0, 5.0, 20.0);
        let lines = path.flatten(1.0);
        assert_eq!(lines.len(), 1);
        for p in &lines[0].points {
            assert!((p.distance(Vec2::new(5.0, 5.0)) - 20.0).abs() < 1e-3);
        }
    }

    #[test]
    fn separate_arcs_produce_separate_subpaths() {
        let mut path = Path::new();
        path.move_to(10.0, 0.0).arc(0.0, 0.0, 10.0, 0.0, 1.0);
        path.move_to(20.0, 0.0).arc(0.0, 0.0, 20.0, 0.0, 1.0);
        assert_eq!(path.flatten(1.0).len(), 2);
    }
}
