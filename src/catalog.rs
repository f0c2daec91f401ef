//! Device catalog parser
//!
//! A catalog is a CSV description of one device's control set, one control per
//! row. Building a catalog creates fresh controls (with fresh ids) inside a
//! `BasicMatcher`, so every session gets its own control objects.
//!
//! Rows sharing a `combo` name are folded into a composite matcher: the roles
//! `push`, `turn` and `pushed_turn` form a [`PushTurnMatcher`].

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;
use tracing::info;

use crate::matcher::{BasicMatcher, ControlMatcher, PushTurnMatcher};
use crate::pattern::EventPattern;
use crate::strategy::ValueStrategy;
use crate::surface::{ControlKind, ControlSurface};

/// One control row from the CSV
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogRow {
    pub name: String,
    pub kind: ControlKind,
    pub group: String,
    pub row: u16,
    pub col: u16,
    pub priority: Option<i32>,
    pub pattern: String,
    pub strategy: Option<String>,
    /// Kinds this control can stand in for, separated by `|`
    pub substitutes: Option<String>,
    /// `combo_name:role`
    pub combo: Option<String>,
}

impl CatalogRow {
    /// Create the control this row describes
    pub fn to_surface(&self) -> Result<ControlSurface> {
        let pattern = EventPattern::parse(&self.pattern)
            .with_context(|| format!("Invalid pattern for {}", self.name))?;
        let strategy = match self.strategy.as_deref() {
            Some(s) => s
                .parse::<ValueStrategy>()
                .with_context(|| format!("Invalid strategy for {}", self.name))?,
            None => ValueStrategy::default(),
        };
        let substitutes = self
            .substitutes
            .as_deref()
            .unwrap_or("")
            .split('|')
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.parse::<ControlKind>())
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Invalid substitutes for {}", self.name))?;

        Ok(ControlSurface::new(self.name.as_str(), self.kind, pattern)
            .with_strategy(strategy)
            .at(self.row, self.col)
            .in_group(self.group.as_str())
            .with_priority(self.priority.unwrap_or(0))
            .substitutes_for(substitutes))
    }

    fn combo_role(&self) -> Result<Option<(&str, &str)>> {
        match self.combo.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(combo) => match combo.split_once(':') {
                Some((name, role)) => Ok(Some((name.trim(), role.trim()))),
                None => bail!("Invalid combo for {}: {}", self.name, combo),
            },
        }
    }
}

/// Parsed device description
#[derive(Debug, Clone)]
pub struct Catalog {
    pub rows: Vec<CatalogRow>,
}

#[derive(Default)]
struct PushTurnParts {
    push: Option<ControlSurface>,
    turn: Option<ControlSurface>,
    pushed_turn: Option<ControlSurface>,
}

impl Catalog {
    /// Load a catalog from a CSV file
    pub async fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let csv_content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read catalog: {}", path.display()))?;

        Self::parse(&csv_content)
    }

    /// Parse CSV content, validating every row
    pub fn parse(csv_content: &str) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(csv_content.as_bytes());
        let mut rows = Vec::new();

        for (line, result) in reader.deserialize().enumerate() {
            let row: CatalogRow =
                result.with_context(|| format!("Failed to parse catalog row {}", line + 1))?;

            // Fail early on bad patterns
            EventPattern::parse(&row.pattern)
                .with_context(|| format!("Invalid pattern for {}", row.name))?;
            row.combo_role()?;

            if rows.iter().any(|r: &CatalogRow| r.name == row.name) {
                bail!("Duplicate control name in catalog: {}", row.name);
            }
            rows.push(row);
        }

        Ok(Self { rows })
    }

    pub fn get(&self, name: &str) -> Option<&CatalogRow> {
        self.rows.iter().find(|r| r.name == name)
    }

    /// Build a matcher holding a fresh control for every row
    pub fn build_matcher(&self) -> Result<BasicMatcher> {
        let mut matcher = BasicMatcher::new();
        let mut combos: Vec<(String, PushTurnParts)> = Vec::new();

        for row in &self.rows {
            let surface = row.to_surface()?;

            let Some((combo, role)) = row.combo_role()? else {
                matcher.add_control(surface);
                continue;
            };

            let index = match combos.iter().position(|(name, _)| name == combo) {
                Some(index) => index,
                None => {
                    combos.push((combo.to_string(), PushTurnParts::default()));
                    combos.len() - 1
                }
            };
            let parts = &mut combos[index].1;
            let slot = match role {
                "push" => &mut parts.push,
                "turn" => &mut parts.turn,
                "pushed_turn" => &mut parts.pushed_turn,
                _ => bail!("Unknown combo role for {}: {}", row.name, role),
            };
            if slot.replace(surface).is_some() {
                bail!("Combo {} has two {} controls", combo, role);
            }
        }

        for (name, parts) in combos {
            match (parts.push, parts.turn, parts.pushed_turn) {
                (Some(push), Some(turn), Some(pushed_turn)) => {
                    matcher.add_sub_matcher(PushTurnMatcher::new(push, turn, pushed_turn));
                }
                _ => bail!("Combo {} needs push, turn and pushed_turn controls", name),
            }
        }

        info!(
            "Built device matcher: {} controls in {} groups",
            matcher.controls().len(),
            matcher.groups().len()
        );

        Ok(matcher)
    }
}

/// Default embedded catalog (a small pad/fader controller)
pub const DEFAULT_CSV: &str = include_str!("../devices/mini-surface.csv");

/// Global cache for the embedded default catalog
static DEFAULT_CATALOG: OnceLock<Catalog> = OnceLock::new();

/// Load the default catalog (cached after first parse)
pub fn load_default_catalog() -> Result<Catalog> {
    if let Some(catalog) = DEFAULT_CATALOG.get() {
        return Ok(catalog.clone());
    }

    let catalog = Catalog::parse(DEFAULT_CSV)?;
    // Ignore error if another thread set it first
    let _ = DEFAULT_CATALOG.set(catalog.clone());
    Ok(catalog)
}

/// Load a catalog from `path`, or the embedded default when there is none
pub async fn load_catalog(path: Option<&Path>) -> Result<Catalog> {
    match path {
        Some(path) => Catalog::load_from_path(path).await,
        None => load_default_catalog(),
    }
}
