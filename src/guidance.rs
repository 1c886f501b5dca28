use log::debug;

use crate::messages::DirectionCode;

/// Axis-aligned region in frame pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub xmin: i32,
    pub xmax: i32,
    pub ymin: i32,
    pub ymax: i32,
}

impl BoundingBox {
    pub fn new(xmin: i32, xmax: i32, ymin: i32, ymax: i32) -> Self {
        BoundingBox {
            xmin,
            xmax,
            ymin,
            ymax,
        }
    }

    /// Midpoint on each axis. Half-pixel extents round to even.
    pub fn center(&self) -> (i32, i32) {
        (midpoint(self.xmin, self.xmax), midpoint(self.ymin, self.ymax))
    }

    /// Strict containment on all four edges.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.xmin < other.xmin
            && self.xmax > other.xmax
            && self.ymin < other.ymin
            && self.ymax > other.ymax
    }
}

fn midpoint(min: i32, max: i32) -> i32 {
    let (min, max) = (i64::from(min), i64::from(max));
    let half = ((max - min) as f64 / 2.0).round_ties_even() as i64;
    (min + half) as i32
}

/// Direction the hand has to move to reach `target`. First matching rule wins.
pub fn decide(target: Option<&BoundingBox>, hand: &BoundingBox) -> DirectionCode {
    let Some(target) = target else {
        return DirectionCode::None;
    };
    let (x, y) = hand.center();

    if hand.contains(target) {
        DirectionCode::Forward
    } else if x < target.xmin {
        DirectionCode::Right
    } else if x > target.xmax {
        DirectionCode::Left
    } else if y < target.ymin {
        DirectionCode::Up
    } else if y > target.ymax {
        DirectionCode::Down
    } else {
        DirectionCode::None
    }
}

/// Keeps the last target sighting across frames and turns hand sightings into codes.
#[derive(Debug, Default)]
pub struct GuidancePolicy {
    target: Option<BoundingBox>,
    target_ttl_frames: Option<u32>,
    frames_since_target: u32,
    target_seen_this_frame: bool,
}

impl GuidancePolicy {
    pub fn new(target_ttl_frames: Option<u32>) -> Self {
        GuidancePolicy {
            target_ttl_frames,
            ..Default::default()
        }
    }

    pub fn target(&self) -> Option<&BoundingBox> {
        self.target.as_ref()
    }

    /// Overwrites the cached target.
    pub fn observe_target(&mut self, target: BoundingBox) {
        self.target = Some(target);
        self.frames_since_target = 0;
        self.target_seen_this_frame = true;
    }

    pub fn guide(&self, hand: &BoundingBox) -> DirectionCode {
        let code = decide(self.target.as_ref(), hand);
        debug!("Hand {:?} -> {:?}", hand, code);
        code
    }

    /// Marks a frame boundary; ages the cached target when expiry is enabled.
    pub fn end_frame(&mut self) {
        if std::mem::take(&mut self.target_seen_this_frame) {
            return;
        }
        let Some(ttl) = self.target_ttl_frames else {
            return;
        };
        if self.target.is_none() {
            return;
        }
        self.frames_since_target = self.frames_since_target.saturating_add(1);
        if self.frames_since_target >= ttl {
            debug!("Target not seen for {} frames, forgetting it", ttl);
            self.target = None;
            self.frames_since_target = 0;
        }
    }
}
