/// Scalar focus scoring methods used to pick the in-focus depth of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FocusMethod {
    /// `-min(x)`.
    Min,
    /// `max(x)`.
    Max,
    /// `max(x) - min(x)`.
    Range,
    /// Standard deviation of a 3x3 local-std filter.
    Std,
    /// `sqrt(std/mean)` of an L1 gradient magnitude.
    Tog,
    /// Standard deviation of a 3x3 local-std filter applied to `sqrt(x)`.
    Icemet,
}

impl FocusMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            FocusMethod::Min => "min",
            FocusMethod::Max => "max",
            FocusMethod::Range => "range",
            FocusMethod::Std => "std",
            FocusMethod::Tog => "tog",
            FocusMethod::Icemet => "icemet",
        }
    }
}

impl std::str::FromStr for FocusMethod {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "min" => Ok(FocusMethod::Min),
            "max" => Ok(FocusMethod::Max),
            "range" => Ok(FocusMethod::Range),
            "std" => Ok(FocusMethod::Std),
            "tog" => Ok(FocusMethod::Tog),
            "icemet" => Ok(FocusMethod::Icemet),
            other => Err(crate::error::Error::InvalidFocusMethod(other.to_string())),
        }
    }
}
