use serde::{Deserialize, Serialize};

use crate::pipeline::model::PerformanceSample;

/// A raw interaction signal as reported by a source, before normalization.
/// Tagged so sources can hand them over as JSON lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum RawSignal {
    KeyDown {
        key: String,
        code: String,
        target: Option<String>,
    },
    PointerMove {
        x: i32,
        y: i32,
    },
    Click {
        x: i32,
        y: i32,
        target: Option<String>,
    },
    Scroll {
        y: i64,
    },
    Visibility {
        visible: bool,
    },
    Focus {
        focused: bool,
    },
    Navigation {
        url: String,
    },
    PerfSample {
        sample: PerformanceSample,
    },
    Screenshot {
        image_base64: String,
        format: String,
    },
}

impl RawSignal {
    pub fn kind(&self) -> &'static str {
        match self {
            RawSignal::KeyDown { .. } => "key_down",
            RawSignal::PointerMove { .. } => "pointer_move",
            RawSignal::Click { .. } => "click",
            RawSignal::Scroll { .. } => "scroll",
            RawSignal::Visibility { .. } => "visibility",
            RawSignal::Focus { .. } => "focus",
            RawSignal::Navigation { .. } => "navigation",
            RawSignal::PerfSample { .. } => "perf_sample",
            RawSignal::Screenshot { .. } => "screenshot",
        }
    }

    /// Whether this signal counts as user interaction for idle tracking.
    pub fn is_interaction(&self) -> bool {
        matches!(
            self,
            RawSignal::KeyDown { .. }
                | RawSignal::PointerMove { .. }
                | RawSignal::Click { .. }
                | RawSignal::Scroll { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signals_parse_from_tagged_json_lines() {
        let line = r#"{"signal":"key_down","key":"a","code":"KeyA","target":"INPUT"}"#;
        let sig: RawSignal = serde_json::from_str(line).unwrap();
        assert_eq!(sig.kind(), "key_down");
        assert!(sig.is_interaction());

        let line = r#"{"signal":"navigation","url":"https://example.test/feed"}"#;
        let sig: RawSignal = serde_json::from_str(line).unwrap();
        assert_eq!(sig.kind(), "navigation");
        assert!(!sig.is_interaction());
    }
}
