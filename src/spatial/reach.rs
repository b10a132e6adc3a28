use std::time::{Duration, Instant};

use nalgebra::{Matrix4, Point3};

use super::{
    AREvent, FrameSample, HandJoint, ScreenRect, TrackedObject, TrackingQuality, Viewport,
};

/// Tuning knobs for proximity and reach decisions. The defaults are
/// empirically calibrated; treat them as recalibration targets per device,
/// not as invariants.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ReachConfig {
    /// Camera-to-prop distance below which the child counts as "near".
    pub near_radius_m: f32,
    /// Retreat from the closest approach that counts as backing away.
    pub backs_away_delta_m: f32,
    /// Backing away must happen within this window of the last near frame.
    pub backs_away_window: Duration,
    /// Minimum spacing between evaluated frames; faster frames are skipped.
    pub eval_interval: Duration,
    /// A hand must be at least this much nearer than the prop to count as
    /// reaching into it.
    pub depth_margin_m: f32,
    /// Joints at or below this confidence are ignored.
    pub min_joint_confidence: f32,
    /// Expansion applied to the projected rectangle to absorb pose jitter.
    pub rect_padding_px: f32,
}

impl Default for ReachConfig {
    fn default() -> Self {
        Self {
            near_radius_m: 1.0,
            backs_away_delta_m: 0.7,
            backs_away_window: Duration::from_secs(3),
            eval_interval: Duration::from_millis(150),
            depth_margin_m: 0.07,
            min_joint_confidence: 0.35,
            rect_padding_px: 24.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ProximityState {
    armed: bool,
    near_flag: bool,
    last_near_distance: f32,
    min_near_distance: f32,
    last_near_at: Option<Instant>,
}

impl ProximityState {
    fn fresh() -> Self {
        Self {
            armed: true,
            near_flag: false,
            last_near_distance: f32::INFINITY,
            min_near_distance: f32::INFINITY,
            last_near_at: None,
        }
    }
}

/// Per-frame proximity and reach evaluator.
///
/// Holds the proximity state for the single tracked prop and fires
/// [`AREvent`]s on threshold crossings. Evaluation is throttled, never
/// suspends, and skips frames whose sensor data is incomplete rather than
/// erroring.
pub struct ReachDetector {
    config: ReachConfig,
    state: ProximityState,
    last_eval_at: Option<Instant>,
}

impl ReachDetector {
    pub fn new(config: ReachConfig) -> Self {
        Self {
            config,
            state: ProximityState::fresh(),
            last_eval_at: None,
        }
    }

    /// Resets proximity tracking and re-arms the reach warning. Called when
    /// the prop is placed, restored, or cleared from the scene.
    pub fn reset(&mut self) {
        self.state = ProximityState::fresh();
        self.last_eval_at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.state.armed
    }

    pub fn is_near(&self) -> bool {
        self.state.near_flag
    }

    pub fn min_near_distance(&self) -> Option<f32> {
        self.state
            .near_flag
            .then_some(self.state.min_near_distance)
    }

    /// Evaluates one frame against the tracked prop.
    ///
    /// Frames arriving faster than the configured interval are skipped, not
    /// queued. A frame that cannot produce a camera distance leaves all
    /// state untouched so the next tick can retry.
    pub fn evaluate(&mut self, frame: &FrameSample, object: &mut TrackedObject) -> Vec<AREvent> {
        if !object.is_visible() {
            return Vec::new();
        }
        if frame.tracking == TrackingQuality::Relocalizing {
            return Vec::new();
        }
        if let Some(last) = self.last_eval_at {
            if frame.captured_at.duration_since(last) < self.config.eval_interval {
                return Vec::new();
            }
        }

        let Some(distance) = camera_distance(frame, &object.world_position()) else {
            return Vec::new();
        };
        self.last_eval_at = Some(frame.captured_at);

        let mut events = Vec::new();
        self.evaluate_proximity(distance, frame.captured_at, &mut events);

        if self.state.armed {
            if let Some(event) = self.evaluate_reach(frame, object, distance) {
                self.state.armed = false;
                events.push(event);
            }
        }

        events
    }

    fn evaluate_proximity(&mut self, distance: f32, at: Instant, events: &mut Vec<AREvent>) {
        let state = &mut self.state;

        if distance < self.config.near_radius_m {
            if !state.near_flag {
                state.near_flag = true;
                state.min_near_distance = distance;
                events.push(AREvent::ProximityNear {
                    distance_m: distance,
                });
            } else {
                state.min_near_distance = state.min_near_distance.min(distance);
            }
            state.last_near_distance = distance;
            state.last_near_at = Some(at);
            return;
        }

        if !state.near_flag {
            return;
        }

        let Some(last_near_at) = state.last_near_at else {
            state.near_flag = false;
            return;
        };

        let delta = distance - state.min_near_distance;
        if at.duration_since(last_near_at) <= self.config.backs_away_window {
            if delta > self.config.backs_away_delta_m {
                state.near_flag = false;
                events.push(AREvent::BacksAway { delta_m: delta });
            }
        } else {
            // The near episode went stale; clear silently so a fresh
            // approach can announce itself again.
            state.near_flag = false;
        }
    }

    /// Reach gate, steps 3-5 of the evaluation. Missing hands, depth, or a
    /// degenerate projection abort the gate for this frame without touching
    /// proximity or arming state.
    fn evaluate_reach(
        &self,
        frame: &FrameSample,
        object: &mut TrackedObject,
        object_distance: f32,
    ) -> Option<AREvent> {
        if frame.hands.is_empty() {
            return None;
        }
        let depth = frame.depth.as_ref()?;

        let rect = match object.cached_rect(frame.seq) {
            Some(rect) => rect,
            None => {
                let rect =
                    project_bounds(frame, object)?.expanded(self.config.rect_padding_px);
                object.store_rect(frame.seq, rect);
                rect
            }
        };

        for hand in &frame.hands {
            for joint in HandJoint::PRIORITY {
                let Some(sample) = hand.joint(joint) else {
                    continue;
                };
                if sample.confidence <= self.config.min_joint_confidence {
                    continue;
                }

                let (px, py) = joint_to_pixels(sample.position, frame.viewport);
                if !rect.contains(px, py) {
                    continue;
                }

                let u = px / frame.viewport.width;
                let v = py / frame.viewport.height;
                let Some(hand_depth) = depth.sample(u, v) else {
                    continue;
                };

                let depth_delta = object_distance - hand_depth;
                if depth_delta >= self.config.depth_margin_m {
                    return Some(AREvent::Reach {
                        joint,
                        depth_delta_m: depth_delta,
                    });
                }
            }
        }

        None
    }
}

/// Absolute Z of the prop in camera space, via the inverse camera transform.
fn camera_distance(frame: &FrameSample, world: &Point3<f32>) -> Option<f32> {
    let view = frame.camera_transform.try_inverse()?;
    let in_camera = view.transform_point(world);
    let distance = in_camera.z.abs();
    distance.is_finite().then_some(distance)
}

/// Axis-aligned rectangle over all eight projected bounding-box corners.
/// Any corner failing to project (behind the camera, degenerate transform)
/// invalidates the rectangle for this frame.
fn project_bounds(frame: &FrameSample, object: &TrackedObject) -> Option<ScreenRect> {
    let view = frame.camera_transform.try_inverse()?;
    let view_projection = frame.projection * view;

    let mut min_x = f32::INFINITY;
    let mut min_y = f32::INFINITY;
    let mut max_x = f32::NEG_INFINITY;
    let mut max_y = f32::NEG_INFINITY;

    for corner in object.world_corners() {
        let (px, py) = project_to_pixels(&view_projection, &corner, frame.viewport)?;
        min_x = min_x.min(px);
        min_y = min_y.min(py);
        max_x = max_x.max(px);
        max_y = max_y.max(py);
    }

    Some(ScreenRect {
        min_x,
        min_y,
        max_x,
        max_y,
    })
}

fn project_to_pixels(
    view_projection: &Matrix4<f32>,
    point: &Point3<f32>,
    viewport: Viewport,
) -> Option<(f32, f32)> {
    let clip = view_projection * point.to_homogeneous();
    if clip.w <= 1e-6 {
        return None;
    }

    let ndc_x = clip.x / clip.w;
    let ndc_y = clip.y / clip.w;
    if !ndc_x.is_finite() || !ndc_y.is_finite() {
        return None;
    }

    let px = (ndc_x + 1.0) * 0.5 * viewport.width;
    let py = (1.0 - ndc_y) * 0.5 * viewport.height;
    Some((px, py))
}

/// Joint positions are normalized with a bottom-left origin; pixel space
/// puts row zero at the top, so Y flips.
fn joint_to_pixels(position: [f32; 2], viewport: Viewport) -> (f32, f32) {
    (
        position[0] * viewport.width,
        (1.0 - position[1]) * viewport.height,
    )
}
