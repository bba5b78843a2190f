use serde::{Deserialize, Serialize};

/// Display layout payload, discriminated by `layoutType` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "layoutType", rename_all = "snake_case")]
pub enum Layout {
    TextWall {
        text: String,
    },
    TextRows {
        text: Vec<String>,
    },
    TextLine {
        text: String,
    },
    ReferenceCard {
        title: String,
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    DoubleTextWall {
        top_text: String,
        bottom_text: String,
    },
    #[serde(rename_all = "camelCase")]
    DashboardCard {
        left_text: String,
        right_text: String,
    },
}

impl Layout {
    /// The layout pushed to the glasses when a display is cleared.
    pub fn empty() -> Self {
        Layout::TextWall {
            text: String::new(),
        }
    }
}
