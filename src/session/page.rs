//! Page navigation

use anyhow::{anyhow, Result};
use tracing::{info, warn};

use super::{PageRequest, Session};

impl Session {
    /// Get the active page name
    pub fn active_page_name(&self) -> &str {
        self.pages
            .get(self.active)
            .map(|p| p.name())
            .unwrap_or("(none)")
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    /// List all page names
    pub fn page_names(&self) -> Vec<&str> {
        self.pages.iter().map(|p| p.name()).collect()
    }

    /// Set active page by index or name (case-insensitive)
    pub fn set_active_page(&mut self, name_or_index: &str) -> Result<()> {
        let index = match name_or_index.parse::<usize>() {
            Ok(index) if index < self.pages.len() => index,
            Ok(index) => return Err(anyhow!("Page index {} out of range", index)),
            Err(_) => self
                .pages
                .iter()
                .position(|p| p.name().eq_ignore_ascii_case(name_or_index))
                .ok_or_else(|| anyhow!("Page '{}' not found", name_or_index))?,
        };

        self.activate(index);
        info!("Active page: {}", self.active_page_name());
        Ok(())
    }

    /// Navigate to the next page (circular)
    pub fn next_page(&mut self) {
        if self.pages.is_empty() {
            return;
        }
        self.activate((self.active + 1) % self.pages.len());
        info!("Next page → {}", self.active_page_name());
    }

    /// Navigate to the previous page (circular)
    pub fn prev_page(&mut self) {
        if self.pages.is_empty() {
            return;
        }
        let index = if self.active == 0 {
            self.pages.len() - 1
        } else {
            self.active - 1
        };
        self.activate(index);
        info!("Previous page → {}", self.active_page_name());
    }

    pub(super) fn navigate(&mut self, request: PageRequest) {
        match request {
            PageRequest::Next => self.next_page(),
            PageRequest::Prev => self.prev_page(),
            PageRequest::Goto(name) => {
                if let Err(e) = self.set_active_page(&name) {
                    warn!("Page navigation failed: {}", e);
                }
            }
        }
    }

    fn activate(&mut self, index: usize) {
        if index != self.active {
            self.full_apply_pending = true;
        }
        self.active = index;
    }
}
