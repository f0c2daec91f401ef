//! Binding controls to callbacks
//!
//! Every bulk operation validates the whole request before touching any state,
//! so a failed bind leaves the free/bound partition exactly as it was.

use std::collections::HashSet;
use std::rc::Rc;
use tracing::debug;

use super::{
    ArgsSource, BindArgs, Binding, Callback, DeviceShadow, MatchRequest, ShadowError, ShadowEvent,
};
use crate::shadow::ControlShadow;
use crate::surface::ControlMapping;

impl<T> DeviceShadow<T> {
    /// Bind one free control
    pub fn bind_control(
        &mut self,
        mapping: ControlMapping,
        callback: impl Fn(&mut ShadowEvent<'_>, &mut T, &BindArgs) -> bool + 'static,
        args: BindArgs,
    ) -> Result<(), ShadowError> {
        self.bind_shared(&[mapping], Rc::new(callback), ArgsSource::List(vec![args]))
    }

    /// Bind a list of free controls to one callback, all or nothing
    pub fn bind_controls(
        &mut self,
        controls: &[ControlMapping],
        callback: impl Fn(&mut ShadowEvent<'_>, &mut T, &BindArgs) -> bool + 'static,
        args: ArgsSource,
    ) -> Result<(), ShadowError> {
        self.bind_shared(controls, Rc::new(callback), args)
    }

    /// Allocate a single control and bind it.
    ///
    /// With `raise_on_failure` off, allocation or binding failures are logged
    /// and reported as `Ok(None)`.
    pub fn bind_match(
        &mut self,
        request: MatchRequest,
        callback: impl Fn(&mut ShadowEvent<'_>, &mut T, &BindArgs) -> bool + 'static,
        args: BindArgs,
        raise_on_failure: bool,
    ) -> Result<Option<ControlMapping>, ShadowError> {
        let request = request.target(1);
        let bound = self.bind_matches(
            request,
            callback,
            ArgsSource::List(vec![args]),
            raise_on_failure,
        )?;
        Ok(bound.into_iter().next())
    }

    /// Allocate controls and bind them.
    ///
    /// With `raise_on_failure` off, failures are logged and reported as an
    /// empty list.
    pub fn bind_matches(
        &mut self,
        request: MatchRequest,
        callback: impl Fn(&mut ShadowEvent<'_>, &mut T, &BindArgs) -> bool + 'static,
        args: ArgsSource,
        raise_on_failure: bool,
    ) -> Result<Vec<ControlMapping>, ShadowError> {
        let result = self.control_matches(&request).and_then(|controls| {
            self.bind_shared(&controls, Rc::new(callback), args)?;
            Ok(controls)
        });

        match result {
            Ok(controls) => Ok(controls),
            Err(e) if raise_on_failure => Err(e),
            Err(e) => {
                debug!("{}: skipping {} binding: {}", self.name, request.kind, e);
                Ok(Vec::new())
            }
        }
    }

    /// Release a bound control back to the free set, resetting its shadow
    pub fn unbind(&mut self, mapping: ControlMapping) -> bool {
        if self.bindings.remove(&mapping).is_none() {
            return false;
        }
        if let Some(&i) = self.positions.get(&mapping) {
            self.shadows[i].reset();
            self.free.insert(i);
        }
        true
    }

    /// Release every binding
    pub fn unbind_all(&mut self) {
        let bound: Vec<ControlMapping> = self.bindings.keys().copied().collect();
        for mapping in bound {
            self.unbind(mapping);
        }
    }

    fn bind_shared(
        &mut self,
        controls: &[ControlMapping],
        callback: Callback<T>,
        args: ArgsSource,
    ) -> Result<(), ShadowError> {
        let positions = self.resolve_free(controls)?;
        let args = self.resolve_args(&positions, args)?;

        for (&i, args) in positions.iter().zip(args) {
            let mapping = self.shadows[i].mapping();
            self.free.remove(&i);
            self.bindings.insert(
                mapping,
                Binding {
                    callback: Rc::clone(&callback),
                    args,
                },
            );
            debug!("{}: bound {} ({})", self.name, self.shadows[i].name(), mapping);
        }

        Ok(())
    }

    /// Positions of the given controls, which must all be free and distinct
    fn resolve_free(&self, controls: &[ControlMapping]) -> Result<Vec<usize>, ShadowError> {
        let mut seen = HashSet::with_capacity(controls.len());
        controls
            .iter()
            .map(|&control| {
                let &i = self
                    .positions
                    .get(&control)
                    .ok_or(ShadowError::UnknownControl { control })?;
                if !self.free.contains(&i) || !seen.insert(i) {
                    return Err(ShadowError::ControlNotFree { control });
                }
                Ok(i)
            })
            .collect()
    }

    /// Expand an args source into exactly one entry per control
    fn resolve_args(
        &self,
        positions: &[usize],
        source: ArgsSource,
    ) -> Result<Vec<BindArgs>, ShadowError> {
        let expected = positions.len();

        let args: Vec<BindArgs> = match source {
            ArgsSource::None => vec![BindArgs::empty(); expected],
            ArgsSource::ByIndex => (0..expected).map(BindArgs::index).collect(),
            ArgsSource::List(list) => list.into_iter().take(expected).collect(),
            ArgsSource::Generator(generate) => {
                let shadows: Vec<&ControlShadow> =
                    positions.iter().map(|&i| &self.shadows[i]).collect();
                generate(&shadows).take(expected).collect()
            }
        };

        if args.len() < expected {
            return Err(ShadowError::ArgsLengthMismatch {
                expected,
                got: args.len(),
            });
        }
        Ok(args)
    }
}
