//! Simulated robot.
//!
//! [`SimRobot`] hands out whatever frames it was last given.  It backs the
//! `--sim` mode of the service binary and most tests: frames can be swapped
//! at any time, and [`SimRobot::set_failing`] makes every fetch fail so
//! degraded refreshes can be exercised.

use async_trait::async_trait;
use locoslam_types::{
    CategoryInstanceLists, InstanceId, PointCloudFrame, Pose, SegmentationFrame, SlamError,
};
use tokio::sync::Mutex;

use crate::robot::RobotSource;

#[derive(Debug, Default)]
struct SimFrames {
    cloud: PointCloudFrame,
    segmentation: SegmentationFrame,
    lists: CategoryInstanceLists,
    failing: bool,
}

/// In-memory [`RobotSource`].
#[derive(Debug, Default)]
pub struct SimRobot {
    frames: Mutex<SimFrames>,
}

impl SimRobot {
    /// Instance id of the object in [`SimRobot::demo`].
    pub const DEMO_INSTANCE: InstanceId = 7;

    pub fn new(
        cloud: PointCloudFrame,
        segmentation: SegmentationFrame,
        lists: CategoryInstanceLists,
    ) -> Self {
        Self {
            frames: Mutex::new(SimFrames {
                cloud,
                segmentation,
                lists,
                failing: false,
            }),
        }
    }

    /// A `width x height` camera looking straight down at bare floor: one
    /// point per pixel on a 10 cm lattice centred on the origin, all at
    /// height zero, no instances.
    pub fn floor(width: u32, height: u32) -> Self {
        let mut points = Vec::with_capacity(width as usize * height as usize);
        for v in 0..height {
            for u in 0..width {
                points.push([
                    (u as f32 - width as f32 / 2.0) * 0.1,
                    (v as f32 - height as f32 / 2.0) * 0.1,
                    0.0,
                ]);
            }
        }
        let pixels = points.len();
        Self::new(
            PointCloudFrame {
                points,
                base_state: Pose::origin(),
            },
            SegmentationFrame {
                width,
                height,
                rgb: vec![128; pixels * 3],
                depth: vec![1.0; pixels],
                semantic: vec![0; pixels],
            },
            CategoryInstanceLists::new(),
        )
    }

    /// Floor scene with one chair-height object (category 0, instance
    /// [`DEMO_INSTANCE`](Self::DEMO_INSTANCE)) about a metre ahead.
    pub fn demo() -> Self {
        let (width, height) = (32u32, 24u32);
        let mut sim = Self::floor(width, height);
        {
            let frames = sim.frames.get_mut();
            for v in 10..14 {
                for u in 26..30 {
                    let pixel = (v * width + u) as usize;
                    frames.cloud.points[pixel][2] = 0.4;
                    frames.segmentation.semantic[pixel] = Self::DEMO_INSTANCE;
                }
            }
            frames
                .lists
                .entry(0)
                .or_default()
                .insert(Self::DEMO_INSTANCE);
        }
        sim
    }

    pub async fn set_point_cloud(&self, cloud: PointCloudFrame) {
        self.frames.lock().await.cloud = cloud;
    }

    pub async fn set_segmentation(&self, segmentation: SegmentationFrame) {
        self.frames.lock().await.segmentation = segmentation;
    }

    pub async fn set_category_lists(&self, lists: CategoryInstanceLists) {
        self.frames.lock().await.lists = lists;
    }

    /// Make every fetch fail (or succeed again).
    pub async fn set_failing(&self, failing: bool) {
        self.frames.lock().await.failing = failing;
    }
}

fn sensor_failure() -> SlamError {
    SlamError::Robot("simulated sensor failure".to_string())
}

#[async_trait]
impl RobotSource for SimRobot {
    async fn current_point_cloud(&self) -> Result<PointCloudFrame, SlamError> {
        let frames = self.frames.lock().await;
        if frames.failing {
            return Err(sensor_failure());
        }
        Ok(frames.cloud.clone())
    }

    async fn rgb_depth_segmentation(&self) -> Result<SegmentationFrame, SlamError> {
        let frames = self.frames.lock().await;
        if frames.failing {
            return Err(sensor_failure());
        }
        Ok(frames.segmentation.clone())
    }

    async fn category_instance_lists(&self) -> Result<CategoryInstanceLists, SlamError> {
        let frames = self.frames.lock().await;
        if frames.failing {
            return Err(sensor_failure());
        }
        Ok(frames.lists.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn floor_frames_are_pixel_aligned() {
        let sim = SimRobot::floor(4, 3);
        let cloud = sim.current_point_cloud().await.unwrap();
        let frame = sim.rgb_depth_segmentation().await.unwrap();
        assert_eq!(cloud.points.len(), 12);
        assert!(frame.validate().is_ok());
        assert!(cloud.points.iter().all(|p| p[2] == 0.0));
    }

    #[tokio::test]
    async fn demo_marks_object_pixels() {
        let sim = SimRobot::demo();
        let frame = sim.rgb_depth_segmentation().await.unwrap();
        let tagged = frame
            .semantic
            .iter()
            .filter(|&&id| id == SimRobot::DEMO_INSTANCE)
            .count();
        assert_eq!(tagged, 16);
    }

    #[tokio::test]
    async fn frames_can_be_replaced() {
        let sim = SimRobot::floor(2, 2);
        sim.set_point_cloud(PointCloudFrame {
            points: vec![[1.0, 2.0, 0.3]],
            base_state: Pose::new(1.0, 2.0, 0.5),
        })
        .await;
        let cloud = sim.current_point_cloud().await.unwrap();
        assert_eq!(cloud.base_state, Pose::new(1.0, 2.0, 0.5));
    }

    #[tokio::test]
    async fn failing_sim_errors_until_cleared() {
        let sim = SimRobot::floor(2, 2);
        sim.set_failing(true).await;
        assert!(sim.category_instance_lists().await.is_err());
        sim.set_failing(false).await;
        assert!(sim.category_instance_lists().await.is_ok());
    }
}
