//! 空间感知数据模型与触达检测脚手架。

pub mod reach;

pub use reach::{ReachConfig, ReachDetector};

use std::sync::Arc;
use std::time::Instant;

use nalgebra::{Matrix4, Point3, Vector3};

/// World-tracking quality reported by the AR session for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingQuality {
    Normal,
    Limited,
    Relocalizing,
}

impl TrackingQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingQuality::Normal => "normal",
            TrackingQuality::Limited => "limited",
            TrackingQuality::Relocalizing => "relocalizing",
        }
    }
}

/// Hand joints probed for a reach, ordered by how reliably each one
/// indicates a touch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandJoint {
    IndexTip,
    MiddleTip,
    Wrist,
}

impl HandJoint {
    /// Probe order when testing a hand against the object rectangle.
    pub const PRIORITY: [HandJoint; 3] =
        [HandJoint::IndexTip, HandJoint::MiddleTip, HandJoint::Wrist];

    pub fn as_str(&self) -> &'static str {
        match self {
            HandJoint::IndexTip => "index_tip",
            HandJoint::MiddleTip => "middle_tip",
            HandJoint::Wrist => "wrist",
        }
    }
}

/// One resolved joint: normalized position with the origin at the
/// bottom-left of the view, plus tracker confidence in `[0, 1]`.
#[derive(Debug, Clone, Copy)]
pub struct JointSample {
    pub joint: HandJoint,
    pub position: [f32; 2],
    pub confidence: f32,
}

/// A detected hand with whatever joints the tracker resolved this frame.
#[derive(Debug, Clone, Default)]
pub struct HandSkeleton {
    pub joints: Vec<JointSample>,
}

impl HandSkeleton {
    pub fn joint(&self, joint: HandJoint) -> Option<&JointSample> {
        self.joints.iter().find(|sample| sample.joint == joint)
    }
}

/// Dense depth buffer in metres, row-major with row zero at the top of the
/// image. Sampled with nearest-pixel lookup in normalized coordinates.
#[derive(Debug, Clone)]
pub struct DepthGrid {
    width: usize,
    height: usize,
    data: Arc<[f32]>,
}

impl DepthGrid {
    /// Returns `None` when the buffer length does not match the grid shape.
    pub fn new(width: usize, height: usize, data: Arc<[f32]>) -> Option<Self> {
        if width == 0 || height == 0 || data.len() != width * height {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Nearest-pixel depth at normalized top-left-origin coordinates.
    /// Out-of-range coordinates and non-finite samples yield `None`.
    pub fn sample(&self, u: f32, v: f32) -> Option<f32> {
        if !u.is_finite() || !v.is_finite() {
            return None;
        }
        if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
            return None;
        }

        let x = ((u * (self.width - 1) as f32).round() as usize).min(self.width - 1);
        let y = ((v * (self.height - 1) as f32).round() as usize).min(self.height - 1);
        let depth = self.data[y * self.width + x];
        if depth.is_finite() && depth > 0.0 {
            Some(depth)
        } else {
            None
        }
    }
}

/// Viewport extent in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

/// Per-tick sensor snapshot borrowed by the detector for one evaluation.
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub seq: u64,
    pub captured_at: Instant,
    /// Camera-to-world rigid transform.
    pub camera_transform: Matrix4<f32>,
    pub projection: Matrix4<f32>,
    pub viewport: Viewport,
    pub depth: Option<DepthGrid>,
    pub hands: Vec<HandSkeleton>,
    pub tracking: TrackingQuality,
}

/// Screen-space rectangle in pixels. Edge containment is inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenRect {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl ScreenRect {
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    pub fn expanded(&self, padding: f32) -> ScreenRect {
        ScreenRect {
            min_x: self.min_x - padding,
            min_y: self.min_y - padding,
            max_x: self.max_x + padding,
            max_y: self.max_y + padding,
        }
    }
}

/// The hazard prop under observation. At most one instance is evaluated
/// per session; the screen rectangle is recomputed lazily per frame.
#[derive(Debug, Clone)]
pub struct TrackedObject {
    transform: Matrix4<f32>,
    bounds_center: Point3<f32>,
    bounds_half_extents: Vector3<f32>,
    visible: bool,
    cached_rect: Option<(u64, ScreenRect)>,
}

impl TrackedObject {
    pub fn new(
        transform: Matrix4<f32>,
        bounds_center: Point3<f32>,
        bounds_half_extents: Vector3<f32>,
    ) -> Self {
        Self {
            transform,
            bounds_center,
            bounds_half_extents,
            visible: true,
            cached_rect: None,
        }
    }

    pub fn transform(&self) -> Matrix4<f32> {
        self.transform
    }

    pub fn world_position(&self) -> Point3<f32> {
        self.transform.transform_point(&self.bounds_center)
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Moving the prop invalidates the cached rectangle.
    pub fn set_transform(&mut self, transform: Matrix4<f32>) {
        self.transform = transform;
        self.cached_rect = None;
    }

    /// Corners of the visual bounding box in world space.
    pub fn world_corners(&self) -> [Point3<f32>; 8] {
        let c = self.bounds_center;
        let h = self.bounds_half_extents;
        let mut corners = [Point3::origin(); 8];
        for (index, corner) in corners.iter_mut().enumerate() {
            let sx = if index & 1 == 0 { -1.0 } else { 1.0 };
            let sy = if index & 2 == 0 { -1.0 } else { 1.0 };
            let sz = if index & 4 == 0 { -1.0 } else { 1.0 };
            let local = Point3::new(c.x + sx * h.x, c.y + sy * h.y, c.z + sz * h.z);
            *corner = self.transform.transform_point(&local);
        }
        corners
    }

    pub(crate) fn cached_rect(&self, seq: u64) -> Option<ScreenRect> {
        match self.cached_rect {
            Some((cached_seq, rect)) if cached_seq == seq => Some(rect),
            _ => None,
        }
    }

    pub(crate) fn store_rect(&mut self, seq: u64, rect: ScreenRect) {
        self.cached_rect = Some((seq, rect));
    }
}

/// Discrete events produced by the [`ReachDetector`] describing the child's
/// spatial relationship to the tracked prop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AREvent {
    /// The camera moved inside the proximity radius. Carries the camera
    /// distance in metres at the moment of crossing.
    ProximityNear { distance_m: f32 },
    /// The camera retreated from its closest approach shortly after being
    /// near. Carries the retreat delta in metres.
    BacksAway { delta_m: f32 },
    /// A hand joint crossed the prop's screen footprint at a nearer depth.
    Reach {
        joint: HandJoint,
        depth_delta_m: f32,
    },
}

impl AREvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AREvent::ProximityNear { .. } => "proximity_near",
            AREvent::BacksAway { .. } => "backs_away",
            AREvent::Reach { .. } => "reach",
        }
    }
}
