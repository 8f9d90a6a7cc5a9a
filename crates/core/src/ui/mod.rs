//! Toolkit-neutral description of module settings controls.
//!
//! Modules describe their controls into a [`ControlTree`]; a host turns the
//! descriptors into widgets and routes edits back through
//! [`crate::VisualModule::apply_control`].

use serde::{Deserialize, Serialize};

use crate::{canvas::Color, Result, VisualizerError};

/// Inclusive `(min, max)` bounds of a slider.
pub type Range = (f32, f32);

/// Rejects a stored setting outside its slider bounds. NaN never passes.
pub fn check_range(key: &str, value: f32, (min, max): Range) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(VisualizerError::invalid_value(key))
    }
}

/// Closed option set exposed as a select control.
pub trait Choice: Sized + Copy + PartialEq + 'static {
    const ALL: &'static [Self];

    /// Stable identifier used in settings files and control values.
    fn name(self) -> &'static str;

    fn label(self) -> &'static str {
        self.name()
    }

    fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.name() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Control {
    Section {
        label: String,
    },
    Slider {
        key: String,
        label: String,
        min: f32,
        max: f32,
        step: f32,
        value: f32,
    },
    Toggle {
        key: String,
        label: String,
        value: bool,
    },
    Select {
        key: String,
        label: String,
        options: Vec<SelectOption>,
        value: String,
    },
    Color {
        key: String,
        label: String,
        value: Color,
    },
    Text {
        key: String,
        label: String,
        value: String,
    },
}

impl Control {
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Section { .. } => None,
            Self::Slider { key, .. }
            | Self::Toggle { key, .. }
            | Self::Select { key, .. }
            | Self::Color { key, .. }
            | Self::Text { key, .. } => Some(key),
        }
    }
}

/// Flat, ordered list of controls for one module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControlTree {
    controls: Vec<Control>,
}

impl ControlTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(&mut self, label: &str) -> &mut Self {
        self.controls.push(Control::Section {
            label: label.to_string(),
        });
        self
    }

    pub fn slider(&mut self, key: &str, label: &str, range: Range, step: f32, value: f32) -> &mut Self {
        self.controls.push(Control::Slider {
            key: key.to_string(),
            label: label.to_string(),
            min: range.0,
            max: range.1,
            step,
            value,
        });
        self
    }

    pub fn toggle(&mut self, key: &str, label: &str, value: bool) -> &mut Self {
        self.controls.push(Control::Toggle {
            key: key.to_string(),
            label: label.to_string(),
            value,
        });
        self
    }

    pub fn select(&mut self, key: &str, label: &str, options: Vec<SelectOption>, value: &str) -> &mut Self {
        self.controls.push(Control::Select {
            key: key.to_string(),
            label: label.to_string(),
            options,
            value: value.to_string(),
        });
        self
    }

    /// Select control listing every variant of `T`.
    pub fn choice<T: Choice>(&mut self, key: &str, label: &str, value: T) -> &mut Self {
        let options = T::ALL
            .iter()
            .map(|c| SelectOption {
                value: c.name().to_string(),
                label: c.label().to_string(),
            })
            .collect();
        self.select(key, label, options, value.name())
    }

    pub fn color(&mut self, key: &str, label: &str, value: Color) -> &mut Self {
        self.controls.push(Control::Color {
            key: key.to_string(),
            label: label.to_string(),
            value,
        });
        self
    }

    pub fn text(&mut self, key: &str, label: &str, value: &str) -> &mut Self {
        self.controls.push(Control::Text {
            key: key.to_string(),
            label: label.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    pub fn find(&self, key: &str) -> Option<&Control> {
        self.controls.iter().find(|c| c.key() == Some(key))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.controls.iter().filter_map(Control::key)
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    pub fn clear(&mut self) {
        self.controls.clear();
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Value delivered by a host when a control changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlValue {
    Bool(bool),
    Number(f32),
    Text(String),
}

impl ControlValue {
    pub fn number(&self, key: &str) -> Result<f32> {
        match self {
            Self::Number(v) if v.is_finite() => Ok(*v),
            // Select controls deliver numeric options as strings.
            Self::Text(s) => s.trim().parse().map_err(|_| VisualizerError::invalid_value(key)),
            _ => Err(VisualizerError::invalid_value(key)),
        }
    }

    /// Number that must lie within the inclusive `range`.
    pub fn ranged(&self, key: &str, range: Range) -> Result<f32> {
        let value = self.number(key)?;
        check_range(key, value, range)?;
        Ok(value)
    }

    pub fn boolean(&self, key: &str) -> Result<bool> {
        match self {
            Self::Bool(v) => Ok(*v),
            _ => Err(VisualizerError::invalid_value(key)),
        }
    }

    pub fn text(&self, key: &str) -> Result<String> {
        match self {
            Self::Text(s) => Ok(s.clone()),
            _ => Err(VisualizerError::invalid_value(key)),
        }
    }

    pub fn color(&self, key: &str) -> Result<Color> {
        match self {
            Self::Text(s) => Color::from_hex(s).ok_or_else(|| VisualizerError::invalid_value(key)),
            _ => Err(VisualizerError::invalid_value(key)),
        }
    }

    pub fn choice<T: Choice>(&self, key: &str) -> Result<T> {
        match self {
            Self::Text(s) => T::parse(s).ok_or_else(|| VisualizerError::invalid_value(key)),
            _ => Err(VisualizerError::invalid_value(key)),
        }
    }
}

impl From<bool> for ControlValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f32> for ControlValue {
    fn from(value: f32) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for ControlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Color> for ControlValue {
    fn from(value: Color) -> Self {
        Self::Text(value.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Side {
        Left,
        Right,
    }

    impl Choice for Side {
        const ALL: &'static [Self] = &[Self::Left, Self::Right];

        fn name(self) -> &'static str {
            match self {
                Self::Left => "left",
                Self::Right => "right",
            }
        }
    }

    #[test]
    fn builds_controls_in_order() {
        let mut tree = ControlTree::new();
        tree.section("Colour")
            .slider("hue", "Hue", (0.0, 360.0), 1.0, 270.0)
            .toggle("rainbow", "Rainbow", true)
            .choice("side", "Side", Side::Right);

        assert_eq!(tree.len(), 4);
        assert_eq!(tree.keys().collect::<Vec<_>>(), ["hue", "rainbow", "side"]);
        match tree.find("side") {
            Some(Control::Select { options, value, .. }) => {
                assert_eq!(options.len(), 2);
                assert_eq!(value, "right");
            }
            other => panic!("unexpected control {other:?}"),
        }
    }

    #[test]
    fn serialises_with_type_tags() {
        let mut tree = ControlTree::new();
        tree.toggle("glow", "Glow", false);
        let json = tree.to_json().unwrap();
        assert!(json.contains("\"type\": \"toggle\""));
        assert!(json.contains("\"key\": \"glow\""));
    }

    #[test]
    fn value_validation() {
        assert_eq!(ControlValue::from(2.0).ranged("size", (0.0, 3.0)).unwrap(), 2.0);
        assert!(matches!(
            ControlValue::from(4.0).ranged("size", (0.0, 3.0)),
            Err(VisualizerError::InvalidControlValue { .. })
        ));
        assert_eq!(ControlValue::from("3").number("level").unwrap(), 3.0);
        assert!(ControlValue::from(true).number("level").is_err());
        assert_eq!(ControlValue::from("left").choice::<Side>("side").unwrap(), Side::Left);
        assert!(ControlValue::from("up").choice::<Side>("side").is_err());
        assert_eq!(ControlValue::from("#fff").color("color").unwrap(), Color::WHITE);
    }

    #[test]
    fn range_check_rejects_out_of_bounds_and_nan() {
        assert!(check_range("hue", 360.0, (0.0, 360.0)).is_ok());
        assert!(check_range("hue", 360.5, (0.0, 360.0)).is_err());
        assert!(check_range("hue", f32::NAN, (0.0, 360.0)).is_err());
    }

    #[test]
    fn untagged_values_deserialise() {
        let values: Vec<ControlValue> = serde_json::from_str(r#"[true, 0.5, "donut"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                ControlValue::Bool(true),
                ControlValue::Number(0.5),
                ControlValue::Text("donut".into()),
            ]
        );
    }
}
