use super::ToolDefinition;
use crate::error::Error;
use crate::hardware::Camera;
use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use std::sync::Arc;

/// Camera tools bound to one camera.
pub fn camera_tools(camera: Arc<dyn Camera>) -> Vec<ToolDefinition> {
    vec![ToolDefinition::from_async(
        "capture_camera_frame",
        "Capture a photo from the robot's camera. Returns a base64-encoded JPEG image.",
        move |_| {
            let camera = camera.clone();
            async move {
                let frame = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<u8>> {
                    if !camera.is_available() {
                        return Err(Error::CameraUnavailable.into());
                    }
                    camera.capture_frame()
                })
                .await
                .context("Camera capture task failed")??;
                Ok(json!({
                    "image": STANDARD.encode(&frame),
                    "mime_type": "image/jpeg",
                    "size_bytes": frame.len(),
                }))
            }
        },
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::stubs::{MINIMAL_JPEG, StubCamera};
    use crate::tools::ToolDispatcher;

    struct BrokenCamera;

    impl Camera for BrokenCamera {
        fn capture_frame(&self) -> anyhow::Result<Vec<u8>> {
            unreachable!("capture must not run when unavailable")
        }

        fn is_available(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn capture_returns_base64_jpeg() {
        // --- Arrange ---
        let mut dispatcher = ToolDispatcher::new();
        for tool in camera_tools(Arc::new(StubCamera::new(None))) {
            dispatcher.register(tool);
        }

        // --- Act ---
        let result = dispatcher
            .execute("capture_camera_frame", Default::default())
            .await;

        // --- Assert ---
        assert_eq!(result["mime_type"], "image/jpeg");
        assert_eq!(result["size_bytes"], MINIMAL_JPEG.len());
        let decoded = STANDARD.decode(result["image"].as_str().unwrap()).unwrap();
        assert_eq!(decoded, MINIMAL_JPEG.to_vec());
    }

    #[tokio::test]
    async fn unavailable_camera_reports_error() {
        let mut dispatcher = ToolDispatcher::new();
        for tool in camera_tools(Arc::new(BrokenCamera)) {
            dispatcher.register(tool);
        }

        let result = dispatcher
            .execute("capture_camera_frame", Default::default())
            .await;

        assert_eq!(
            result["error"],
            "Tool execution failed: camera is not available"
        );
    }
}
