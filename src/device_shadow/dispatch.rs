//! Event dispatch, ticking and output flushing

use tracing::trace;

use super::{DeviceShadow, ShadowEvent};
use crate::shadow::OutputSink;
use crate::surface::ControlEvent;

impl<T> DeviceShadow<T> {
    /// Hand a matched event to its bound callback.
    ///
    /// Returns the callback's verdict, or `false` when this page has no
    /// binding for the control (most pages ignore most controls). A handled
    /// event is marked as such.
    pub fn process_event(&mut self, event: &mut ControlEvent, target: &mut T) -> bool {
        let Some(binding) = self.bindings.get(&event.mapping) else {
            trace!("{}: no binding for {}", self.name, event.mapping);
            return false;
        };
        let Some(&i) = self.positions.get(&event.mapping) else {
            return false;
        };

        let shadow = &mut self.shadows[i];
        shadow.state.value = Some(event.value);

        let mut shadow_event = ShadowEvent {
            event: *event,
            shadow,
        };
        let handled = (binding.callback)(&mut shadow_event, target, &binding.args);

        if handled {
            event.handled = true;
        }
        handled
    }

    /// Run the page's tick hooks. Returns whether any hook ran.
    pub fn tick(&mut self, target: &mut T) -> bool {
        for hook in &self.tick_hooks {
            hook(self.shadows.as_mut_slice(), target);
        }
        !self.tick_hooks.is_empty()
    }

    /// Flush shadows to the device.
    ///
    /// A thorough apply writes every control once, unless the page is
    /// transparent; otherwise only bound controls are written so that other
    /// pages keep whatever they painted on the rest.
    pub fn apply(&self, thorough: bool, sink: &mut dyn OutputSink) {
        let everything = thorough && !self.transparent;

        let mut written = 0;
        for shadow in &self.shadows {
            if everything || self.bindings.contains_key(&shadow.mapping()) {
                shadow.apply(sink);
                written += 1;
            }
        }

        trace!(
            "{}: applied {} of {} control(s)",
            self.name,
            written,
            self.shadows.len()
        );
    }
}
