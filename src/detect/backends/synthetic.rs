use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::anchor::Anchor;
use crate::detect::backend::DetectionSource;
use crate::detect::result::{Detection, FrameDetections};
use crate::track::BoundingBox;

/// Person walking in a straight line between two depths.
#[derive(Clone, Debug)]
pub struct Walker {
    pub height_cm: f64,
    /// Horizontal offset from the optical axis (cm).
    pub lateral_cm: f64,
    pub start_depth: f64,
    pub end_depth: f64,
}

/// Pinhole scene: a person of height `H` cm at depth `d` spans `focal * H / d` px.
#[derive(Clone, Debug)]
pub struct SceneConfig {
    pub focal: f64,
    /// Principal point x and horizon y (px).
    pub principal: [f64; 2],
    pub camera_height_cm: f64,
    pub first_frame: u64,
    pub frames: u64,
    pub walkers: Vec<Walker>,
    /// Mask polygon vertex spacing (px).
    pub vertex_spacing: f64,
    /// Uniform depth noise amplitude added to reported depths.
    pub depth_noise: f64,
    pub seed: u64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            focal: 6.0,
            principal: [640.0, 300.0],
            camera_height_cm: 150.0,
            first_frame: 0,
            frames: 40,
            walkers: vec![
                Walker {
                    height_cm: 170.0,
                    lateral_cm: -120.0,
                    start_depth: 6.0,
                    end_depth: 10.0,
                },
                Walker {
                    height_cm: 182.0,
                    lateral_cm: 120.0,
                    start_depth: 10.0,
                    end_depth: 6.0,
                },
            ],
            vertex_spacing: 2.0,
            depth_noise: 0.0,
            seed: 7,
        }
    }
}

/// Generates detector output for a [`SceneConfig`].
pub struct SyntheticSource {
    scene: SceneConfig,
    step: u64,
    rng: StdRng,
}

impl SyntheticSource {
    pub fn new(scene: SceneConfig) -> Self {
        let rng = StdRng::seed_from_u64(scene.seed);
        Self {
            scene,
            step: 0,
            rng,
        }
    }

    pub fn scene(&self) -> &SceneConfig {
        &self.scene
    }

    /// Anchor for a vertical object of `true_height_cm` traced at `depth`.
    pub fn anchor(&self, true_height_cm: f64, depth: f64) -> Anchor {
        Anchor::new(self.scene.focal * true_height_cm / depth, true_height_cm, depth)
    }

    fn depth_at(&self, walker: &Walker, step: u64) -> f64 {
        if self.scene.frames <= 1 {
            return walker.start_depth;
        }
        let t = step as f64 / (self.scene.frames - 1) as f64;
        walker.start_depth + (walker.end_depth - walker.start_depth) * t
    }

    fn render(&self, walker: &Walker, depth: f64) -> Detection {
        let s = &self.scene;
        let pixel_height = s.focal * walker.height_cm / depth;
        let width = 0.4 * pixel_height;
        let cx = s.principal[0] + s.focal * walker.lateral_cm / depth;
        let feet = s.principal[1] + s.focal * s.camera_height_cm / depth;
        let bbox = BoundingBox::new(cx - width / 2.0, feet - pixel_height, cx + width / 2.0, feet);
        Detection {
            bbox,
            polygon: rectangle_outline(&bbox, s.vertex_spacing),
            depth,
        }
    }
}

impl DetectionSource for SyntheticSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn next_frame(&mut self) -> Result<Option<FrameDetections>> {
        if self.step >= self.scene.frames {
            return Ok(None);
        }
        let step = self.step;
        self.step += 1;

        let mut detections = Vec::with_capacity(self.scene.walkers.len());
        for walker in &self.scene.walkers {
            let depth = self.depth_at(walker, step);
            let mut detection = self.render(walker, depth);
            if self.scene.depth_noise > 0.0 {
                let noise = self.scene.depth_noise;
                detection.depth += self.rng.gen_range(-noise..=noise);
            }
            detections.push(detection);
        }
        Ok(Some(FrameDetections {
            frame: self.scene.first_frame + step,
            detections,
        }))
    }
}

/// Box outline, clockwise from the top-left corner, one vertex per `spacing` px.
fn rectangle_outline(bbox: &BoundingBox, spacing: f64) -> Vec<[f64; 2]> {
    let corners = [
        [bbox.x1, bbox.y1],
        [bbox.x2, bbox.y1],
        [bbox.x2, bbox.y2],
        [bbox.x1, bbox.y2],
    ];
    let spacing = spacing.max(0.5);
    let mut points = Vec::new();
    for k in 0..4 {
        let [ax, ay] = corners[k];
        let [bx, by] = corners[(k + 1) % 4];
        let len = (bx - ax).hypot(by - ay);
        let steps = (len / spacing).ceil().max(1.0) as usize;
        for i in 0..steps {
            let t = i as f64 / steps as f64;
            points.push([ax + (bx - ax) * t, ay + (by - ay) * t]);
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{extract_keypoints, DEFAULT_KEYPOINT_THRESHOLD};

    #[test]
    fn emits_configured_number_of_frames() {
        let mut source = SyntheticSource::new(SceneConfig {
            first_frame: 100,
            frames: 3,
            ..SceneConfig::default()
        });
        let mut frames = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            frames.push(frame.frame);
        }
        assert_eq!(frames, vec![100, 101, 102]);
    }

    #[test]
    fn keypoints_span_the_pinhole_height() {
        let mut source = SyntheticSource::new(SceneConfig::default());
        let frame = source.next_frame().unwrap().unwrap();
        let walker = &frame.detections[0];
        assert_eq!(walker.depth, 6.0);

        let kp = extract_keypoints(&walker.polygon, DEFAULT_KEYPOINT_THRESHOLD).unwrap();
        let expected = 6.0 * 170.0 / 6.0;
        assert!((kp.pixel_length() - expected).abs() <= 2.0, "{}", kp.pixel_length());
    }

    #[test]
    fn anchor_uses_scene_focal_length() {
        let source = SyntheticSource::new(SceneConfig::default());
        let anchor = source.anchor(200.0, 8.0);
        assert_eq!(anchor.pixel_length, 150.0);
    }

    #[test]
    fn depth_noise_is_seeded() {
        let scene = SceneConfig {
            depth_noise: 0.2,
            ..SceneConfig::default()
        };
        let mut a = SyntheticSource::new(scene.clone());
        let mut b = SyntheticSource::new(scene);
        assert_eq!(a.next_frame().unwrap(), b.next_frame().unwrap());
    }
}
