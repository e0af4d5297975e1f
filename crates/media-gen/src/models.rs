use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Output aspect ratio, serialized in the `"16:9"` form the vendor
/// services expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "16:9")]
    Wide,
    #[serde(rename = "9:16")]
    Tall,
    #[serde(rename = "1:1")]
    Square,
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AspectRatio::Wide => "16:9",
            AspectRatio::Tall => "9:16",
            AspectRatio::Square => "1:1",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "16:9" => Ok(AspectRatio::Wide),
            "9:16" => Ok(AspectRatio::Tall),
            "1:1" => Ok(AspectRatio::Square),
            other => Err(format!("unknown aspect ratio: {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "540p")]
    R540p,
    #[serde(rename = "720p")]
    R720p,
    #[serde(rename = "1080p")]
    R1080p,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Resolution::R540p => "540p",
            Resolution::R720p => "720p",
            Resolution::R1080p => "1080p",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "540p" => Ok(Resolution::R540p),
            "720p" => Ok(Resolution::R720p),
            "1080p" => Ok(Resolution::R1080p),
            other => Err(format!("unknown resolution: {other:?}")),
        }
    }
}

/// The supported text/image-to-video models. Each vendor accepts its own
/// parameter ranges and spellings, captured by the tables below so callers
/// never hand-build vendor payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoModel {
    Kling,
    Pixverse,
    Ray2,
    Veo,
}

impl VideoModel {
    /// Gateway route slug for the model.
    pub fn slug(&self) -> &'static str {
        match self {
            VideoModel::Kling => "kling-v2",
            VideoModel::Pixverse => "pixverse-v4",
            VideoModel::Ray2 => "ray-2",
            VideoModel::Veo => "veo-3",
        }
    }

    pub fn supported_durations(&self) -> &'static [u32] {
        match self {
            VideoModel::Kling => &[5, 10],
            VideoModel::Pixverse => &[5, 8],
            VideoModel::Ray2 => &[5, 9],
            VideoModel::Veo => &[5, 6, 7, 8],
        }
    }

    pub fn default_duration(&self) -> u32 {
        match self {
            VideoModel::Kling | VideoModel::Pixverse | VideoModel::Ray2 => 5,
            VideoModel::Veo => 8,
        }
    }

    pub fn supported_aspects(&self) -> &'static [AspectRatio] {
        match self {
            VideoModel::Veo => &[AspectRatio::Wide, AspectRatio::Tall],
            _ => &[AspectRatio::Wide, AspectRatio::Tall, AspectRatio::Square],
        }
    }

    pub fn default_aspect(&self) -> AspectRatio {
        AspectRatio::Wide
    }

    /// Resolutions the vendor accepts; empty when the model has no
    /// resolution parameter at all.
    pub fn supported_resolutions(&self) -> &'static [Resolution] {
        match self {
            VideoModel::Kling | VideoModel::Veo => &[],
            VideoModel::Pixverse => &[Resolution::R540p, Resolution::R720p, Resolution::R1080p],
            VideoModel::Ray2 => &[Resolution::R720p, Resolution::R1080p],
        }
    }

    pub fn default_resolution(&self) -> Option<Resolution> {
        match self {
            VideoModel::Kling | VideoModel::Veo => None,
            VideoModel::Pixverse | VideoModel::Ray2 => Some(Resolution::R720p),
        }
    }

    /// Clamp a requested duration to the model's table, falling back to the
    /// model default rather than rejecting. Vendors silently substitute
    /// their default for out-of-range values, so surfacing an error here
    /// would only desync us from what actually renders.
    pub fn resolve_duration(&self, requested: u32) -> u32 {
        if self.supported_durations().contains(&requested) {
            requested
        } else {
            let fallback = self.default_duration();
            debug!(
                model = self.slug(),
                requested, fallback, "unsupported duration, using model default"
            );
            fallback
        }
    }

    pub fn resolve_aspect(&self, requested: AspectRatio) -> AspectRatio {
        if self.supported_aspects().contains(&requested) {
            requested
        } else {
            let fallback = self.default_aspect();
            debug!(
                model = self.slug(),
                requested = %requested,
                fallback = %fallback,
                "unsupported aspect ratio, using model default"
            );
            fallback
        }
    }

    /// `None` both for models without a resolution knob and for callers who
    /// did not ask for one.
    pub fn resolve_resolution(&self, requested: Option<Resolution>) -> Option<Resolution> {
        let supported = self.supported_resolutions();
        if supported.is_empty() {
            return None;
        }
        match requested {
            Some(r) if supported.contains(&r) => Some(r),
            Some(r) => {
                let fallback = self.default_resolution();
                debug!(
                    model = self.slug(),
                    requested = %r,
                    "unsupported resolution, using model default"
                );
                fallback
            }
            None => self.default_resolution(),
        }
    }
}

impl fmt::Display for VideoModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slug())
    }
}

impl std::str::FromStr for VideoModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kling" | "kling-v2" => Ok(VideoModel::Kling),
            "pixverse" | "pixverse-v4" => Ok(VideoModel::Pixverse),
            "ray2" | "ray-2" => Ok(VideoModel::Ray2),
            "veo" | "veo-3" => Ok(VideoModel::Veo),
            other => Err(format!("unknown video model: {other:?}")),
        }
    }
}
