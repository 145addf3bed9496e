//! The robot collaborator.
//!
//! The mapping service never estimates pose or segments images itself; it
//! pulls both from a [`RobotSource`].  In production that is a
//! [`RemoteRobot`] reached over the wire.  [`RobotHandler`] is the other end:
//! it exposes any source as a server, which is how the simulated robot is
//! served to out-of-process clients.
//!
//! | Method | Result |
//! |--------|--------|
//! | `get_current_pcd` | [`PointCloudFrame`] |
//! | `get_rgb_depth_segm` | [`SegmentationFrame`] |
//! | `get_category_instance_lists` | [`CategoryInstanceLists`] |

use std::sync::Arc;

use async_trait::async_trait;
use locoslam_types::{CategoryInstanceLists, PointCloudFrame, SegmentationFrame, SlamError};
use serde_json::Value;

use crate::client::RpcClient;
use crate::rpc::RpcHandler;

/// Wire names of the robot's methods.
pub mod methods {
    pub const GET_CURRENT_PCD: &str = "get_current_pcd";
    pub const GET_RGB_DEPTH_SEGM: &str = "get_rgb_depth_segm";
    pub const GET_CATEGORY_INSTANCE_LISTS: &str = "get_category_instance_lists";
}

/// Source of sensor frames for the mapping service.
#[async_trait]
pub trait RobotSource: Send + Sync {
    /// Latest point cloud (metres, real frame) with the base pose it was
    /// captured at.
    async fn current_point_cloud(&self) -> Result<PointCloudFrame, SlamError>;

    /// Latest RGB, depth and instance-id frame.
    async fn rgb_depth_segmentation(&self) -> Result<SegmentationFrame, SlamError>;

    /// Which instance ids currently belong to which category.
    async fn category_instance_lists(&self) -> Result<CategoryInstanceLists, SlamError>;
}

#[async_trait]
impl<R: RobotSource + ?Sized> RobotSource for Arc<R> {
    async fn current_point_cloud(&self) -> Result<PointCloudFrame, SlamError> {
        (**self).current_point_cloud().await
    }

    async fn rgb_depth_segmentation(&self) -> Result<SegmentationFrame, SlamError> {
        (**self).rgb_depth_segmentation().await
    }

    async fn category_instance_lists(&self) -> Result<CategoryInstanceLists, SlamError> {
        (**self).category_instance_lists().await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RemoteRobot
// ────────────────────────────────────────────────────────────────────────────

/// A robot reached through an [`RpcClient`].
#[derive(Debug)]
pub struct RemoteRobot {
    client: RpcClient,
}

impl RemoteRobot {
    pub async fn connect(url: &str) -> Result<Self, SlamError> {
        Ok(Self::from_client(RpcClient::connect(url).await?))
    }

    pub fn from_client(client: RpcClient) -> Self {
        Self { client }
    }

    pub fn url(&self) -> &str {
        self.client.url()
    }

    async fn fetch<T: serde::de::DeserializeOwned>(&self, method: &str) -> Result<T, SlamError> {
        self.client.call_as(method, Value::Null).await.map_err(|e| match e {
            SlamError::InvalidParams { details, .. } => {
                SlamError::Robot(format!("{method}: {details}"))
            }
            other => other,
        })
    }
}

#[async_trait]
impl RobotSource for RemoteRobot {
    async fn current_point_cloud(&self) -> Result<PointCloudFrame, SlamError> {
        self.fetch(methods::GET_CURRENT_PCD).await
    }

    async fn rgb_depth_segmentation(&self) -> Result<SegmentationFrame, SlamError> {
        let frame: SegmentationFrame = self.fetch(methods::GET_RGB_DEPTH_SEGM).await?;
        frame.validate()?;
        Ok(frame)
    }

    async fn category_instance_lists(&self) -> Result<CategoryInstanceLists, SlamError> {
        self.fetch(methods::GET_CATEGORY_INSTANCE_LISTS).await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RobotHandler
// ────────────────────────────────────────────────────────────────────────────

/// Serves a [`RobotSource`] to remote callers.
pub struct RobotHandler<R> {
    source: R,
}

impl<R: RobotSource> RobotHandler<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, SlamError> {
    serde_json::to_value(value).map_err(|e| SlamError::Transport(e.to_string()))
}

#[async_trait]
impl<R: RobotSource> RpcHandler for RobotHandler<R> {
    async fn handle(&self, method: &str, _params: Value) -> Result<Value, SlamError> {
        match method {
            methods::GET_CURRENT_PCD => to_value(&self.source.current_point_cloud().await?),
            methods::GET_RGB_DEPTH_SEGM => to_value(&self.source.rgb_depth_segmentation().await?),
            methods::GET_CATEGORY_INSTANCE_LISTS => {
                to_value(&self.source.category_instance_lists().await?)
            }
            other => Err(SlamError::UnknownMethod(other.to_string())),
        }
    }
}
