//! Track payload: duration and technical stream settings.
//!
//! The bundle never decodes media; these values are supplied by whoever adds
//! the track and are carried through the manifest untouched.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{BundleError, BundleResult};

/// Track specific data.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackInfo {
    /// Duration in milliseconds.
    pub duration: u64,
    pub audio: Option<AudioSettings>,
    pub video: Option<VideoSettings>,
}

impl TrackInfo {
    pub fn with_duration(duration: u64) -> Self {
        Self {
            duration,
            ..Self::default()
        }
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }
}

/// Type, version and vendor of a capture device or encoder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    #[serde(rename = "type")]
    pub ty: Option<String>,
    pub version: Option<String>,
    pub vendor: Option<String>,
}

impl DeviceInfo {
    pub fn new(ty: impl Into<String>) -> Self {
        Self {
            ty: Some(ty.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ty.is_none() && self.version.is_none() && self.vendor.is_none()
    }
}

/// Audio stream settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AudioSettings {
    pub device: Option<DeviceInfo>,
    pub encoder: Option<DeviceInfo>,
    pub channels: Option<u32>,
    pub bit_depth: Option<u32>,
    pub bit_rate: Option<f32>,
    pub sampling_rate: Option<u32>,
}

/// Video stream settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VideoSettings {
    pub device: Option<DeviceInfo>,
    pub encoder: Option<DeviceInfo>,
    pub bit_rate: Option<f32>,
    pub frame_rate: Option<f32>,
    pub frame_width: u32,
    pub frame_height: u32,
    pub scan_type: Option<ScanType>,
    pub scan_order: Option<ScanOrder>,
}

impl VideoSettings {
    pub fn with_size(frame_width: u32, frame_height: u32) -> Self {
        Self {
            frame_width,
            frame_height,
            ..Self::default()
        }
    }

    /// Frame size in the manifest's `WxH` notation.
    pub fn size(&self) -> String {
        format!("{}x{}", self.frame_width, self.frame_height)
    }

    /// Parse a `WxH` frame size.
    pub fn parse_size(s: &str) -> BundleResult<(u32, u32)> {
        let malformed = || BundleError::Manifest {
            path: Default::default(),
            reason: format!("video size must be of the form <width>x<height>, found '{}'", s),
        };
        let (w, h) = s.trim().split_once('x').ok_or_else(malformed)?;
        let w = w.trim().parse().map_err(|_| malformed())?;
        let h = h.trim().parse().map_err(|_| malformed())?;
        Ok((w, h))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Progressive,
    Interlaced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanOrder {
    TopFieldFirst,
    BottomFieldFirst,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::Progressive => "progressive",
            ScanType::Interlaced => "interlaced",
        }
    }
}

impl ScanOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanOrder::TopFieldFirst => "top-field-first",
            ScanOrder::BottomFieldFirst => "bottom-field-first",
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ScanOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "progressive" => Ok(ScanType::Progressive),
            "interlaced" => Ok(ScanType::Interlaced),
            other => Err(format!("unknown scan type '{}'", other)),
        }
    }
}

impl FromStr for ScanOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "top-field-first" | "tff" => Ok(ScanOrder::TopFieldFirst),
            "bottom-field-first" | "bff" => Ok(ScanOrder::BottomFieldFirst),
            other => Err(format!("unknown scan order '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_size() {
        let video = VideoSettings::with_size(1280, 720);
        assert_eq!(video.size(), "1280x720");
        assert_eq!(VideoSettings::parse_size(" 1280 x 720 ").unwrap(), (1280, 720));
    }

    #[test]
    fn test_video_size_malformed() {
        assert!(VideoSettings::parse_size("1280").is_err());
        assert!(VideoSettings::parse_size("widexhigh").is_err());
    }

    #[test]
    fn test_scan_parsing() {
        assert_eq!("Interlaced".parse::<ScanType>().unwrap(), ScanType::Interlaced);
        assert_eq!("tff".parse::<ScanOrder>().unwrap(), ScanOrder::TopFieldFirst);
        assert!("diagonal".parse::<ScanType>().is_err());
    }

    #[test]
    fn test_device_empty() {
        assert!(DeviceInfo::default().is_empty());
        assert!(!DeviceInfo::new("ffmpeg").is_empty());
    }
}
