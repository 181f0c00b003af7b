//! Recognition feed — frames from a V4L2 camera via the `v4l` crate.

use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("camera not found: {0}")]
    DeviceNotFound(String),
    #[error("camera busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("frame read failed: {0}")]
    ReadFailed(String),
}

/// A captured grayscale frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

impl Frame {
    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }
}

/// Source of frames for one recognition session.
///
/// `Ok(None)` signals end of stream; a closed feed is a dropped feed.
pub trait RecognitionFeed: Send {
    fn read(&mut self) -> Result<Option<Frame>, FeedError>;
}

/// Negotiated camera pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    /// YUYV 4:2:2 packed — extract the Y channel.
    Yuyv,
    /// 8-bit grayscale, passed through.
    Grey,
}

/// V4L2 camera as a recognition feed.
pub struct CameraFeed {
    device: Device,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl CameraFeed {
    /// Open a camera by device path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, FeedError> {
        if !Path::new(device_path).exists() {
            return Err(FeedError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                FeedError::DeviceBusy
            } else {
                FeedError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| FeedError::ReadFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(FeedError::FormatNegotiationFailed(
                "device does not support video capture".into(),
            ));
        }

        let mut fmt = device
            .format()
            .map_err(|e| FeedError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| FeedError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;

        let pixel_format = if negotiated.fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if negotiated.fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else {
            return Err(FeedError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV or GREY)",
                negotiated.fourcc
            )));
        };

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "recognition feed opened"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl RecognitionFeed for CameraFeed {
    fn read(&mut self) -> Result<Option<Frame>, FeedError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
            .map_err(|e| FeedError::ReadFailed(format!("failed to create mmap stream: {e}")))?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| FeedError::ReadFailed(format!("failed to dequeue buffer: {e}")))?;

        let data = match self.pixel_format {
            PixelFormat::Grey => {
                let pixels = (self.width * self.height) as usize;
                if buf.len() < pixels {
                    return Err(FeedError::ReadFailed(format!(
                        "GREY buffer too short: expected {pixels}, got {}",
                        buf.len()
                    )));
                }
                buf[..pixels].to_vec()
            }
            PixelFormat::Yuyv => yuyv_to_grayscale(buf, self.width, self.height)?,
        };

        Ok(Some(Frame {
            data,
            width: self.width,
            height: self.height,
            sequence: meta.sequence,
        }))
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FeedError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FeedError::ReadFailed(format!(
            "YUYV buffer too short: expected {expected}, got {}",
            yuyv.len()
        )));
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let yuyv = vec![100, 128, 200, 128];
        let gray = yuyv_to_grayscale(&yuyv, 2, 1).unwrap();
        assert_eq!(gray, vec![100, 200]);
    }

    #[test]
    fn test_yuyv_too_short() {
        let yuyv = vec![100, 128];
        assert!(yuyv_to_grayscale(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_avg_brightness() {
        let frame = Frame {
            data: vec![100, 200],
            width: 2,
            height: 1,
            sequence: 0,
        };
        assert!((frame.avg_brightness() - 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_avg_brightness_empty() {
        let frame = Frame {
            data: vec![],
            width: 0,
            height: 0,
            sequence: 0,
        };
        assert_eq!(frame.avg_brightness(), 0.0);
    }
}
