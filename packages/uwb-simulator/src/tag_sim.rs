//! tag_sim.rs — Tag motion inside the room
//!
//! The tag walks a closed waypoint loop at constant speed. Positions are in
//! the room frame (cm, origin at the floor-plan corner) and are clamped to the
//! room rectangle.

use serde::{Deserialize, Serialize};

// ── Types ─────────────────────────────────────────────────────────────────────

/// 2D point in the room frame, cm
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub fn new(x: f64, y: f64) -> Self { Self { x, y } }
    pub fn dist(&self, other: &Vec2) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl From<[f64; 2]> for Vec2 {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub speed_cm_s: f64,
    /// Visited in order, then back to the first
    pub waypoints: Vec<[f64; 2]>,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            speed_cm_s: 60.0,
            waypoints: vec![[80.0, 120.0], [380.0, 120.0], [380.0, 520.0], [80.0, 520.0]],
        }
    }
}

// ── Simulation tick ───────────────────────────────────────────────────────────

pub struct TagSim {
    pub position: Vec2,
    waypoints: Vec<Vec2>,
    target: usize,
    speed_cm_s: f64,
    room: Vec2,
}

impl TagSim {
    /// Starts on the first waypoint (or the room centre when there are none).
    pub fn new(cfg: &MotionConfig, room_width_cm: f64, room_height_cm: f64) -> Self {
        let room = Vec2::new(room_width_cm, room_height_cm);
        let waypoints: Vec<Vec2> = cfg.waypoints.iter().map(|&p| clamp(p.into(), room)).collect();
        let position = waypoints
            .first()
            .copied()
            .unwrap_or(Vec2::new(room.x / 2.0, room.y / 2.0));
        Self {
            position,
            target: if waypoints.len() > 1 { 1 } else { 0 },
            waypoints,
            speed_cm_s: cfg.speed_cm_s.max(0.0),
            room,
        }
    }

    /// Advance by `dt` seconds.
    pub fn tick(&mut self, dt: f64) {
        if self.waypoints.len() < 2 {
            return;
        }
        let mut budget = self.speed_cm_s * dt;
        // Bounded so degenerate loops (all waypoints equal) still terminate
        for _ in 0..=self.waypoints.len() {
            if budget <= 0.0 {
                break;
            }
            let goal = self.waypoints[self.target];
            let remaining = self.position.dist(&goal);
            if remaining > budget {
                let f = budget / remaining;
                self.position = Vec2::new(
                    self.position.x + (goal.x - self.position.x) * f,
                    self.position.y + (goal.y - self.position.y) * f,
                );
                break;
            }
            self.position = goal;
            budget -= remaining;
            self.target = (self.target + 1) % self.waypoints.len();
        }
        self.position = clamp(self.position, self.room);
    }
}

fn clamp(p: Vec2, room: Vec2) -> Vec2 {
    Vec2::new(p.x.clamp(0.0, room.x), p.y.clamp(0.0, room.y))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> MotionConfig {
        MotionConfig {
            speed_cm_s: 100.0,
            waypoints: vec![[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0]],
        }
    }

    #[test]
    fn moves_toward_next_waypoint() {
        let mut sim = TagSim::new(&square(), 480.0, 650.0);
        sim.tick(0.5);
        assert!((sim.position.x - 50.0).abs() < 1e-9);
        assert_eq!(sim.position.y, 0.0);
    }

    #[test]
    fn turns_corners_within_one_tick() {
        let mut sim = TagSim::new(&square(), 480.0, 650.0);
        sim.tick(1.5);
        assert!((sim.position.x - 100.0).abs() < 1e-9);
        assert!((sim.position.y - 50.0).abs() < 1e-9);
    }

    #[test]
    fn loop_returns_to_start() {
        let mut sim = TagSim::new(&square(), 480.0, 650.0);
        for _ in 0..40 {
            sim.tick(0.1);
        }
        assert!(sim.position.dist(&Vec2::new(0.0, 0.0)) < 1e-6);
    }

    #[test]
    fn waypoints_outside_room_are_clamped() {
        let cfg = MotionConfig {
            speed_cm_s: 1000.0,
            waypoints: vec![[-50.0, 10.0], [900.0, 10.0]],
        };
        let mut sim = TagSim::new(&cfg, 480.0, 650.0);
        assert_eq!(sim.position, Vec2::new(0.0, 10.0));
        for _ in 0..10 {
            sim.tick(0.3);
            assert!((0.0..=480.0).contains(&sim.position.x));
        }
    }

    #[test]
    fn single_waypoint_stays_put() {
        let cfg = MotionConfig { speed_cm_s: 50.0, waypoints: vec![[10.0, 20.0]] };
        let mut sim = TagSim::new(&cfg, 480.0, 650.0);
        sim.tick(1.0);
        assert_eq!(sim.position, Vec2::new(10.0, 20.0));
    }
}
