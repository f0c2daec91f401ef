//! Device shadow - free/bound partition of a device's controls
//!
//! A device shadow is one "page" of bindings over a device's control set:
//! - Allocation of controls by kind, with group-aware selection and substitution
//! - Binding of controls to callbacks with per-control arguments
//! - Dispatch of matched events to the bound callback
//! - Flushing of the page's display state to the device
//!
//! Several device shadows can coexist over the same matcher. Each one holds its
//! own copy of every control's shadow, so their partitions never interfere;
//! the host decides which pages reach the device by the order it applies them.

mod allocate;
mod bind;
mod dispatch;
mod error;

#[cfg(test)]
mod tests;

pub use allocate::MatchRequest;
pub use error::ShadowError;

use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;

use crate::matcher::ControlMatcher;
use crate::shadow::ControlShadow;
use crate::surface::{ControlEvent, ControlMapping};

/// Arguments stored with a binding and handed back on every dispatch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindArgs(Vec<Value>);

impl BindArgs {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Single argument holding a position within a bulk binding
    pub fn index(index: usize) -> Self {
        Self(vec![Value::from(index)])
    }

    pub fn get(&self, i: usize) -> Option<&Value> {
        self.0.get(i)
    }

    /// First argument as a position, if it is one
    pub fn as_index(&self) -> Option<usize> {
        self.0.first()?.as_u64().map(|i| i as usize)
    }

    pub fn str(&self, i: usize) -> Option<&str> {
        self.0.get(i)?.as_str()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

impl From<Vec<Value>> for BindArgs {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// Lazily produces one `BindArgs` per control of a resolved list
pub type ArgsGenerator = Box<dyn FnOnce(&[&ControlShadow]) -> Box<dyn Iterator<Item = BindArgs>>>;

/// Where bulk bindings take their per-control arguments from
pub enum ArgsSource {
    /// Empty arguments for every control
    None,
    /// The control's position within the list
    ByIndex,
    /// One entry per control; extra entries are ignored
    List(Vec<BindArgs>),
    /// Generated from the resolved controls
    Generator(ArgsGenerator),
}

impl ArgsSource {
    pub fn generator<F, I>(f: F) -> Self
    where
        F: FnOnce(&[&ControlShadow]) -> I + 'static,
        I: Iterator<Item = BindArgs> + 'static,
    {
        ArgsSource::Generator(Box::new(
            move |shadows: &[&ControlShadow]| -> Box<dyn Iterator<Item = BindArgs>> {
                Box::new(f(shadows))
            },
        ))
    }
}

impl fmt::Debug for ArgsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsSource::None => f.write_str("None"),
            ArgsSource::ByIndex => f.write_str("ByIndex"),
            ArgsSource::List(list) => f.debug_tuple("List").field(list).finish(),
            ArgsSource::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

/// What a callback receives: the matched event and the page's live shadow
#[derive(Debug)]
pub struct ShadowEvent<'a> {
    pub event: ControlEvent,
    pub shadow: &'a mut ControlShadow,
}

impl ShadowEvent<'_> {
    pub fn value(&self) -> f32 {
        self.event.value
    }

    pub fn channel(&self) -> u8 {
        self.event.channel
    }

    pub fn mapping(&self) -> ControlMapping {
        self.event.mapping
    }

    /// A button-like reading: value above one half
    pub fn is_pressed(&self) -> bool {
        self.event.value > 0.5
    }
}

/// Bound handler: `(event, target, args) -> handled`
pub type Callback<T> = Rc<dyn Fn(&mut ShadowEvent<'_>, &mut T, &BindArgs) -> bool>;

/// Periodic hook run on every tick with the page's shadows
pub type TickHook<T> = Rc<dyn Fn(&mut [ControlShadow], &mut T)>;

struct Binding<T> {
    callback: Callback<T>,
    args: BindArgs,
}

/// Free/bound partition of one page over a device's controls
pub struct DeviceShadow<T> {
    name: String,
    /// Every control's shadow, in the matcher's control order
    shadows: Vec<ControlShadow>,
    positions: HashMap<ControlMapping, usize>,
    /// Positions of unbound controls, scanned in control order
    free: BTreeSet<usize>,
    bindings: HashMap<ControlMapping, Binding<T>>,
    transparent: bool,
    tick_hooks: Vec<TickHook<T>>,
}

impl<T> DeviceShadow<T> {
    /// Create a page with every control of `matcher` free
    pub fn new<M>(name: impl Into<String>, matcher: &M) -> Self
    where
        M: ControlMatcher + ?Sized,
    {
        let shadows: Vec<ControlShadow> = matcher
            .controls()
            .into_iter()
            .map(ControlShadow::of)
            .collect();
        let positions = shadows
            .iter()
            .enumerate()
            .map(|(i, s)| (s.mapping(), i))
            .collect();
        let free = (0..shadows.len()).collect();

        Self {
            name: name.into(),
            shadows,
            positions,
            free,
            bindings: HashMap::new(),
            transparent: false,
            tick_hooks: Vec::new(),
        }
    }

    /// Transparent pages leave unbound controls to other pages when applied
    pub fn transparent(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_transparent(&self) -> bool {
        self.transparent
    }

    pub fn shadows(&self) -> &[ControlShadow] {
        &self.shadows
    }

    pub fn shadow(&self, mapping: ControlMapping) -> Option<&ControlShadow> {
        self.positions.get(&mapping).map(|&i| &self.shadows[i])
    }

    pub fn shadow_mut(&mut self, mapping: ControlMapping) -> Option<&mut ControlShadow> {
        let i = *self.positions.get(&mapping)?;
        Some(&mut self.shadows[i])
    }

    /// Find a shadow by control name
    pub fn find(&self, name: &str) -> Option<&ControlShadow> {
        self.shadows.iter().find(|s| s.name() == name)
    }

    pub fn is_free(&self, mapping: ControlMapping) -> bool {
        self.positions
            .get(&mapping)
            .is_some_and(|i| self.free.contains(i))
    }

    pub fn is_bound(&self, mapping: ControlMapping) -> bool {
        self.bindings.contains_key(&mapping)
    }

    /// Unbound controls in control order
    pub fn free_controls(&self) -> Vec<ControlMapping> {
        self.free.iter().map(|&i| self.shadows[i].mapping()).collect()
    }

    /// Bound controls in control order
    pub fn bound_controls(&self) -> Vec<ControlMapping> {
        self.shadows
            .iter()
            .map(|s| s.mapping())
            .filter(|m| self.bindings.contains_key(m))
            .collect()
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Stored arguments of a binding
    pub fn args(&self, mapping: ControlMapping) -> Option<&BindArgs> {
        self.bindings.get(&mapping).map(|b| &b.args)
    }

    /// Register a hook run on every [`DeviceShadow::tick`]
    pub fn on_tick(&mut self, hook: impl Fn(&mut [ControlShadow], &mut T) + 'static) {
        self.tick_hooks.push(Rc::new(hook));
    }
}

impl<T> fmt::Debug for DeviceShadow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceShadow")
            .field("name", &self.name)
            .field("controls", &self.shadows.len())
            .field("free", &self.free.len())
            .field("bound", &self.bindings.len())
            .field("transparent", &self.transparent)
            .finish()
    }
}
