//! Widget metadata carried on ports.
//!
//! Widgets are UI hints only; the runtime never interprets them beyond
//! serializing them into the port schema. Structures may contribute
//! default widgets (the enum hook emits choice widgets from the member
//! list).

use serde::{Deserialize, Serialize};

/// A single selectable choice.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub label: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Choice {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Choice {
            label: label.into(),
            value: value.into(),
            description: None,
        }
    }
}

/// Input-side widget hint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignWidget {
    Choice { choices: Vec<Choice> },
    Slider { min: f64, max: f64, step: f64 },
    String { placeholder: Option<String> },
    Search { query: String },
    Custom { hook: String },
}

/// Output-side widget hint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnWidget {
    Choice { choices: Vec<Choice> },
    Custom { hook: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widget_serializes_with_kind_tag() {
        let widget = AssignWidget::Choice {
            choices: vec![Choice::new("Red", "RED")],
        };
        let json = serde_json::to_value(&widget).unwrap();
        assert_eq!(json["kind"], "CHOICE");
        assert_eq!(json["choices"][0]["value"], "RED");
    }
}
