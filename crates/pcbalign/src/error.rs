//! Hard errors: conditions under which no partial result is meaningful.

/// Which scan of the board an error or result refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Front,
    Back,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Front => write!(f, "front"),
            Self::Back => write!(f, "back"),
        }
    }
}

/// Errors that abort a call outright.
#[derive(Debug)]
pub enum AlignError {
    /// The input raster has zero width or height.
    EmptyImage {
        /// Side the image belongs to, when known.
        side: Option<Side>,
    },
    /// The contact specification is unusable (zero count, non-positive pitch, ...).
    InvalidSpec(String),
    /// A configuration or specification file could not be read or parsed.
    Config(String),
}

impl std::fmt::Display for AlignError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyImage { side: Some(side) } => write!(f, "{} image is empty", side),
            Self::EmptyImage { side: None } => write!(f, "image is empty"),
            Self::InvalidSpec(msg) => write!(f, "invalid contact specification: {}", msg),
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for AlignError {}

/// Reject zero-sized rasters.
pub(crate) fn ensure_non_empty(width: u32, height: u32, side: Option<Side>) -> Result<(), AlignError> {
    if width == 0 || height == 0 {
        Err(AlignError::EmptyImage { side })
    } else {
        Ok(())
    }
}
