//! Building pages from configuration

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::{debug, warn};

use super::{ActionRecord, PageRequest, Target};
use crate::config::{AppConfig, ArgsConfig, ArgsMode, BindingConfig, PageConfig};
use crate::device_shadow::{ArgsSource, BindArgs, DeviceShadow, MatchRequest, ShadowEvent};
use crate::matcher::ControlMatcher;
use crate::shadow::Color;
use crate::surface::{ControlKind, ControlMapping};

type Pages = (Vec<DeviceShadow<Target>>, Option<DeviceShadow<Target>>);

/// Build every configured page and the overlay
pub(super) fn build_pages(config: &AppConfig, matcher: &dyn ControlMatcher) -> Result<Pages> {
    let pages = config
        .pages
        .iter()
        .map(|page| build_page(page, matcher, false))
        .collect::<Result<Vec<_>>>()?;

    let overlay = config
        .overlay
        .as_ref()
        .map(|overlay| {
            if overlay.transparent == Some(false) {
                warn!(
                    "Overlay '{}' is opaque: it repaints every control after each page change",
                    overlay.name
                );
            }
            build_page(overlay, matcher, true)
        })
        .transpose()?;

    Ok((pages, overlay))
}

/// Build one page, binding its entries in order
pub(super) fn build_page(
    config: &PageConfig,
    matcher: &dyn ControlMatcher,
    transparent_by_default: bool,
) -> Result<DeviceShadow<Target>> {
    let transparent = config.transparent.unwrap_or(transparent_by_default);
    let mut page = DeviceShadow::new(config.name.as_str(), matcher).transparent(transparent);

    for binding in &config.bindings {
        let bound = bind(&mut page, binding)
            .with_context(|| format!("Page '{}': cannot bind {}", config.name, binding.describe()))?;
        decorate(&mut page, &bound, binding);
    }

    debug!(
        "Built page {}: {} bound, {} free",
        config.name,
        page.binding_count(),
        page.free_controls().len()
    );
    Ok(page)
}

fn bind(page: &mut DeviceShadow<Target>, binding: &BindingConfig) -> Result<Vec<ControlMapping>> {
    let callback = action_callback(page.name(), binding);

    match (&binding.control, binding.kind) {
        (Some(name), _) => {
            let Some(mapping) = page.find(name).map(|s| s.mapping()) else {
                if binding.required {
                    bail!("Unknown control '{}'", name);
                }
                warn!("{}: no control named '{}', skipping", page.name(), name);
                return Ok(Vec::new());
            };

            match page.bind_control(mapping, callback, single_args(binding.args.as_ref())) {
                Ok(()) => Ok(vec![mapping]),
                Err(e) if binding.required => Err(e.into()),
                Err(e) => {
                    warn!("{}: skipping '{}': {}", page.name(), name, e);
                    Ok(Vec::new())
                }
            }
        }
        (None, Some(kind)) => {
            let mut request = MatchRequest::new(kind)
                .substitution(binding.substitute)
                .trim(binding.trim)
                .exact(binding.exact)
                .raise_on_zero(binding.required);
            if let Some(count) = binding.count {
                request = request.target(count);
            }

            let bound = page.bind_matches(
                request,
                callback,
                args_source(binding.args.as_ref()),
                binding.required,
            )?;
            if bound.is_empty() {
                warn!("{}: nothing available for {}", page.name(), binding.describe());
            }
            Ok(bound)
        }
        (None, None) => bail!("Binding names neither a control nor a kind"),
    }
}

/// Paint configured labels and colour on freshly bound controls
fn decorate(page: &mut DeviceShadow<Target>, bound: &[ControlMapping], binding: &BindingConfig) {
    let color = binding.color.as_deref().and_then(Color::parse);
    let labels = binding.labels.as_deref().unwrap_or(&[]);

    for (i, mapping) in bound.iter().enumerate() {
        let Some(shadow) = page.shadow_mut(*mapping) else {
            continue;
        };
        if let Some(label) = labels.get(i) {
            shadow.set_annotation(label.as_str());
        }
        if let Some(color) = color {
            shadow.set_color(color);
        }
    }
}

enum Action {
    Navigate(fn(&BindArgs) -> Option<PageRequest>),
    Record(String),
}

fn goto_request(args: &BindArgs) -> Option<PageRequest> {
    match args.get(0)? {
        Value::String(name) => Some(PageRequest::Goto(name.clone())),
        Value::Number(index) => Some(PageRequest::Goto(index.to_string())),
        _ => None,
    }
}

/// Callback for a configured action.
///
/// Navigation actions fire on press only. Other actions are recorded in the
/// target; buttons and pads also toggle their LED between off and the
/// binding's colour.
fn action_callback(
    page: &str,
    binding: &BindingConfig,
) -> impl Fn(&mut ShadowEvent<'_>, &mut Target, &BindArgs) -> bool + 'static {
    let page = page.to_string();
    let lit = binding
        .color
        .as_deref()
        .and_then(Color::parse)
        .unwrap_or(Color::WHITE);
    let action = match binding.action.as_str() {
        "page.next" => Action::Navigate(|_| Some(PageRequest::Next)),
        "page.prev" => Action::Navigate(|_| Some(PageRequest::Prev)),
        "page.goto" => Action::Navigate(goto_request),
        other => Action::Record(other.to_string()),
    };

    move |event: &mut ShadowEvent<'_>, target: &mut Target, args: &BindArgs| -> bool {
        match &action {
            Action::Navigate(request) => {
                if event.is_pressed() {
                    target.page_request = request(args);
                }
                true
            }
            Action::Record(action) => {
                if is_momentary(event.shadow.kind()) && event.is_pressed() {
                    let color = if event.shadow.state.color.is_off() {
                        lit
                    } else {
                        Color::OFF
                    };
                    event.shadow.set_color(color);
                }

                target.outbox.push(ActionRecord {
                    action: action.clone(),
                    page: page.clone(),
                    control: event.shadow.name().to_string(),
                    value: event.value(),
                    channel: event.channel(),
                    args: args.clone(),
                    at: chrono::Local::now(),
                });
                true
            }
        }
    }
}

fn is_momentary(kind: ControlKind) -> bool {
    matches!(kind, ControlKind::Button | ControlKind::DrumPad | ControlKind::Key)
}

fn to_bind_args(value: &Value) -> BindArgs {
    match value {
        Value::Array(items) => BindArgs::from(items.clone()),
        other => BindArgs::from(vec![other.clone()]),
    }
}

fn args_source(args: Option<&ArgsConfig>) -> ArgsSource {
    match args {
        None => ArgsSource::None,
        Some(ArgsConfig::Mode(ArgsMode::Index)) => ArgsSource::ByIndex,
        Some(ArgsConfig::List(list)) => ArgsSource::List(list.iter().map(to_bind_args).collect()),
    }
}

fn single_args(args: Option<&ArgsConfig>) -> BindArgs {
    match args {
        None => BindArgs::empty(),
        Some(ArgsConfig::Mode(ArgsMode::Index)) => BindArgs::index(0),
        Some(ArgsConfig::List(list)) => list.first().map(to_bind_args).unwrap_or_default(),
    }
}
