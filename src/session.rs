//! Session - host orchestration of pages over one device
//!
//! The session is the host side of the engine:
//! - Raw messages are matched once and dispatched to the overlay, then to the
//!   active page
//! - Bound callbacks record actions in the session [`Target`]
//! - Pages are flushed to an output sink, the overlay always last
//! - Page navigation and rebuilds on configuration changes

mod build;
mod page;


use chrono::{DateTime, Local};
use std::fmt;
use tracing::{debug, trace};

use crate::config::AppConfig;
use crate::device_shadow::{BindArgs, DeviceShadow};
use crate::matcher::ControlMatcher;
use crate::message::describe;
use crate::shadow::OutputSink;
use crate::surface::ControlEvent;

/// Navigation asked for by a bound control
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    Next,
    Prev,
    Goto(String),
}

/// One fired binding
#[derive(Debug, Clone)]
pub struct ActionRecord {
    pub action: String,
    /// Page (or overlay) that owned the binding
    pub page: String,
    pub control: String,
    pub value: f32,
    pub channel: u8,
    pub args: BindArgs,
    pub at: DateTime<Local>,
}

impl fmt::Display for ActionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} <- {} = {:.3} (ch{}, page {})",
            self.at.format("%H:%M:%S%.3f"),
            self.action,
            self.control,
            self.value,
            self.channel + 1,
            self.page
        )?;
        if !self.args.is_empty() {
            let args: Vec<String> = self.args.values().iter().map(|v| v.to_string()).collect();
            write!(f, " args [{}]", args.join(", "))?;
        }
        Ok(())
    }
}

/// What bound callbacks act on
#[derive(Debug, Default)]
pub struct Target {
    pub outbox: Vec<ActionRecord>,
    pub page_request: Option<PageRequest>,
}

/// Pages, overlay and device matcher of one running device
pub struct Session {
    matcher: Box<dyn ControlMatcher>,
    pages: Vec<DeviceShadow<Target>>,
    overlay: Option<DeviceShadow<Target>>,
    active: usize,
    target: Target,
    /// Next apply writes every control (after a page change)
    full_apply_pending: bool,
}

impl Session {
    /// Build every page of `config` over the device's controls
    pub fn new(config: &AppConfig, matcher: impl ControlMatcher + 'static) -> anyhow::Result<Self> {
        let matcher: Box<dyn ControlMatcher> = Box::new(matcher);
        let (pages, overlay) = build::build_pages(config, matcher.as_ref())?;

        Ok(Self {
            matcher,
            pages,
            overlay,
            active: 0,
            target: Target::default(),
            full_apply_pending: true,
        })
    }

    /// Match a raw message and dispatch it.
    ///
    /// Returns the control event, if the message belongs to a control, with
    /// `handled` set when a binding consumed it.
    pub fn on_message(&mut self, raw: &[u8]) -> Option<ControlEvent> {
        let Some(mut event) = self.matcher.match_event(raw) else {
            trace!("Unmatched: {}", describe(raw));
            return None;
        };

        if let Some(overlay) = self.overlay.as_mut() {
            overlay.process_event(&mut event, &mut self.target);
        }
        if !event.handled {
            if let Some(page) = self.pages.get_mut(self.active) {
                page.process_event(&mut event, &mut self.target);
            }
        }

        if !event.handled {
            debug!("Unhandled event on {}", event.mapping);
        }

        if let Some(request) = self.target.page_request.take() {
            self.navigate(request);
        }

        Some(event)
    }

    /// Polling tick: matcher first, then overlay and active page hooks.
    ///
    /// Returns true when a tick hook ran, meaning display state may have
    /// changed and should be applied.
    pub fn tick(&mut self) -> bool {
        self.matcher.tick();
        let mut ran = false;
        if let Some(overlay) = self.overlay.as_mut() {
            ran |= overlay.tick(&mut self.target);
        }
        if let Some(page) = self.pages.get_mut(self.active) {
            ran |= page.tick(&mut self.target);
        }
        ran
    }

    /// Flush display state: the active page, then the overlay on top
    pub fn apply(&mut self, sink: &mut dyn OutputSink) {
        let thorough = std::mem::take(&mut self.full_apply_pending);

        if let Some(page) = self.pages.get(self.active) {
            page.apply(thorough, sink);
        }
        if let Some(overlay) = &self.overlay {
            overlay.apply(thorough, sink);
        }
    }

    /// Rebuild pages after a configuration change.
    ///
    /// The device's controls are kept; every page is rebuilt from scratch and
    /// the active page is kept by name when it still exists.
    pub fn rebuild(&mut self, config: &AppConfig) -> anyhow::Result<()> {
        let (pages, overlay) = build::build_pages(config, self.matcher.as_ref())?;
        let current = self.active_page_name().to_string();

        self.pages = pages;
        self.overlay = overlay;
        self.active = self
            .pages
            .iter()
            .position(|p| p.name() == current)
            .unwrap_or(0);
        self.full_apply_pending = true;

        debug!(
            "Session rebuilt: {} page(s), active {}",
            self.pages.len(),
            self.active_page_name()
        );
        Ok(())
    }

    /// Take the actions recorded since the last call
    pub fn drain_actions(&mut self) -> Vec<ActionRecord> {
        std::mem::take(&mut self.target.outbox)
    }

    pub fn matcher(&self) -> &dyn ControlMatcher {
        self.matcher.as_ref()
    }

    pub fn pages(&self) -> &[DeviceShadow<Target>] {
        &self.pages
    }

    pub fn active_page(&self) -> Option<&DeviceShadow<Target>> {
        self.pages.get(self.active)
    }

    /// Page by name, for hosts that add tick hooks or bindings in code
    pub fn page_mut(&mut self, name: &str) -> Option<&mut DeviceShadow<Target>> {
        self.pages
            .iter_mut()
            .find(|p| p.name().eq_ignore_ascii_case(name))
    }

    pub fn overlay(&self) -> Option<&DeviceShadow<Target>> {
        self.overlay.as_ref()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("controls", &self.matcher.controls().len())
            .field("pages", &self.pages)
            .field("overlay", &self.overlay)
            .field("active", &self.active)
            .finish()
    }
}
