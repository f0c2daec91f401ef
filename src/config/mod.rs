//! Configuration management for surface-shadow
//!
//! Handles loading, parsing, and hot-reloading of YAML configuration files.
//! A configuration names the MIDI ports, the device catalog, and the pages of
//! bindings the session builds over the device.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::fs;

use crate::shadow::Color;
use crate::surface::ControlKind;

pub use watcher::ConfigWatcher;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    /// Always-on page, dispatched before and applied after the active page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay: Option<PageConfig>,
    pub pages: Vec<PageConfig>,
}

/// MIDI port configuration (ports are found by case-insensitive substring)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MidiConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_port: Option<String>,
    /// Feedback port for LEDs and motor faders
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_port: Option<String>,
}

/// Device description
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_name")]
    pub name: String,
    /// CSV catalog; the embedded default device is used when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<PathBuf>,
    /// Milliseconds between session ticks
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            catalog: None,
            tick_ms: default_tick_ms(),
        }
    }
}

/// Page configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PageConfig {
    pub name: String,
    /// Leave unbound controls alone when the page is applied. Pages default
    /// to opaque, the overlay to transparent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transparent: Option<bool>,
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
}

/// One binding: either a named control or an allocation by kind
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BindingConfig {
    /// Bind this control by name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<String>,
    /// Allocate controls of this kind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ControlKind>,
    /// Number of controls; the whole best group when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default)]
    pub substitute: bool,
    #[serde(default = "default_true")]
    pub exact: bool,
    #[serde(default = "default_true")]
    pub trim: bool,
    /// Fail the page build when the binding cannot be satisfied
    #[serde(default)]
    pub required: bool,
    /// Action name recorded when the control fires. `page.next`,
    /// `page.prev` and `page.goto` navigate instead.
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<ArgsConfig>,
    /// Annotations painted on the bound controls, in binding order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Per-control arguments of a binding
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ArgsConfig {
    /// `index`: each control gets its position within the binding
    Mode(ArgsMode),
    /// One entry per control; an array entry becomes several arguments
    List(Vec<serde_json::Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgsMode {
    Index,
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::from_yaml(&contents).with_context(|| format!("Invalid config: {}", path))
    }

    /// Parse and validate YAML text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.device.tick_ms == 0 {
            anyhow::bail!("device.tick_ms must be greater than zero");
        }

        if self.pages.is_empty() {
            anyhow::bail!("At least one page must be defined");
        }

        let mut names = HashSet::new();
        for (page_idx, page) in self.pages.iter().enumerate() {
            if page.name.is_empty() {
                anyhow::bail!("Page {} name cannot be empty", page_idx);
            }
            if !names.insert(page.name.to_ascii_lowercase()) {
                anyhow::bail!("Duplicate page name: {}", page.name);
            }
            page.validate()
                .with_context(|| format!("Invalid page '{}'", page.name))?;
        }

        if let Some(overlay) = &self.overlay {
            overlay.validate().context("Invalid overlay")?;
        }

        Ok(())
    }
}

impl PageConfig {
    fn validate(&self) -> Result<()> {
        for (idx, binding) in self.bindings.iter().enumerate() {
            binding
                .validate()
                .with_context(|| format!("Invalid binding {} ('{}')", idx, binding.action))?;
        }
        Ok(())
    }
}

impl BindingConfig {
    /// Validate a single binding
    fn validate(&self) -> Result<()> {
        if self.action.is_empty() {
            anyhow::bail!("Binding action cannot be empty");
        }

        match (&self.control, &self.kind) {
            (Some(_), Some(_)) => anyhow::bail!("Specify either 'control' or 'kind', not both"),
            (None, None) => anyhow::bail!("Binding must specify 'control' or 'kind'"),
            (Some(_), None) if self.count.is_some() => {
                anyhow::bail!("'count' only applies to bindings by kind")
            }
            _ => {}
        }

        if self.count == Some(0) {
            anyhow::bail!("'count' must be at least 1");
        }

        if let Some(color) = &self.color {
            if Color::parse(color).is_none() {
                anyhow::bail!("Unknown color '{}'", color);
            }
        }

        if let Some(ArgsConfig::List(list)) = &self.args {
            if let Some(count) = self.count {
                if list.len() < count {
                    anyhow::bail!(
                        "Binding wants {} controls but only {} args were given",
                        count,
                        list.len()
                    );
                }
            }
        }

        Ok(())
    }

    /// Short description for logs and errors
    pub fn describe(&self) -> String {
        match (&self.control, self.kind) {
            (Some(name), _) => format!("control '{}'", name),
            (None, Some(kind)) => match self.count {
                Some(count) => format!("{} x {}", count, kind),
                None => format!("{} group", kind),
            },
            (None, None) => "nothing".to_string(),
        }
    }
}

// Default value functions
fn default_device_name() -> String { "mini-surface".to_string() }
fn default_tick_ms() -> u64 { 50 }
fn default_true() -> bool { true }

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
midi:
  input_port: "mini"
device:
  name: "mini-surface"
overlay:
  name: "Transport"
  transparent: true
  bindings:
    - control: "forward"
      action: "page.next"
    - control: "play"
      action: "transport.play"
      color: "green"
pages:
  - name: "Mixer"
    bindings:
      - kind: fader
        count: 8
        action: "volume"
        args: index
        labels: ["Kick", "Snare"]
  - name: "Sends"
    bindings:
      - kind: knob
        count: 2
        substitute: true
        action: "send"
        args: ["A", ["B", 2]]
"#;

    #[test]
    fn test_parse_sample() {
        let config = AppConfig::from_yaml(SAMPLE).unwrap();

        assert_eq!(config.midi.input_port.as_deref(), Some("mini"));
        assert_eq!(config.midi.output_port, None);
        assert_eq!(config.device.tick_ms, 50);
        assert_eq!(config.pages.len(), 2);

        let overlay = config.overlay.unwrap();
        assert_eq!(overlay.transparent, Some(true));
        assert_eq!(overlay.bindings[0].control.as_deref(), Some("forward"));

        let mixer = &config.pages[0].bindings[0];
        assert_eq!(mixer.kind, Some(ControlKind::Fader));
        assert_eq!(mixer.count, Some(8));
        assert!(mixer.exact && mixer.trim && !mixer.substitute);
        assert_eq!(mixer.args, Some(ArgsConfig::Mode(ArgsMode::Index)));

        let sends = &config.pages[1].bindings[0];
        assert!(sends.substitute);
        assert!(matches!(&sends.args, Some(ArgsConfig::List(list)) if list.len() == 2));
    }

    #[test]
    fn test_validation_errors() {
        let no_pages = "pages: []\n";
        assert!(AppConfig::from_yaml(no_pages).is_err());

        let both = r#"
pages:
  - name: "P"
    bindings:
      - control: "play"
        kind: button
        action: "x"
"#;
        assert!(AppConfig::from_yaml(both).is_err());

        let neither = r#"
pages:
  - name: "P"
    bindings:
      - action: "x"
"#;
        assert!(AppConfig::from_yaml(neither).is_err());

        let bad_color = r#"
pages:
  - name: "P"
    bindings:
      - control: "play"
        action: "x"
        color: "ultraviolet"
"#;
        assert!(AppConfig::from_yaml(bad_color).is_err());

        let duplicate = r#"
pages:
  - name: "P"
  - name: "p"
"#;
        assert!(AppConfig::from_yaml(duplicate).is_err());

        let short_args = r#"
pages:
  - name: "P"
    bindings:
      - kind: fader
        count: 3
        action: "x"
        args: [1, 2]
"#;
        assert!(AppConfig::from_yaml(short_args).is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let path = path.to_string_lossy().to_string();

        let config = AppConfig::from_yaml(SAMPLE).unwrap();
        config.save(&path).await.unwrap();

        let loaded = AppConfig::load(&path).await.unwrap();
        assert_eq!(loaded.pages[1].name, "Sends");
        assert_eq!(loaded.pages[0].bindings[0].labels.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_describe() {
        let binding = BindingConfig {
            kind: Some(ControlKind::Pedal),
            action: "sustain".to_string(),
            ..Default::default()
        };
        assert_eq!(binding.describe(), "pedal group");
    }
}
