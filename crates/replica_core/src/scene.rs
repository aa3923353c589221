//! # Scene Seam
//!
//! The live scene representation is owned by the renderer, which is not part of this
//! crate. The core only needs the operations in [`Scene`]: spawning and despawning
//! entities, getting or creating a live component of a given kind, merging values into it,
//! and a change-detection query over local simulation writes.
//!
//! [`MemoryScene`] is a plain in-memory implementation, used by the demo node and tests.

use crate::payload::{ComponentKind, ComponentPayload};
use crate::types::LocalHandle;
use std::collections::{BTreeMap, HashMap};

pub trait Scene: Send + std::fmt::Debug {
    /// Creates an empty live entity.
    fn spawn(&mut self) -> LocalHandle;

    /// Destroys a live entity and all its components. Returns `false` if unknown.
    fn despawn(&mut self, handle: LocalHandle) -> bool;

    fn is_alive(&self, handle: LocalHandle) -> bool;

    /// Returns the live component of `kind`, creating it with default values if needed.
    /// `None` if the entity is not alive.
    fn get_or_create(&mut self, handle: LocalHandle, kind: ComponentKind) -> Option<&mut ComponentPayload>;

    /// Merges network values into a live component. Does not count as a local change.
    fn merge(&mut self, handle: LocalHandle, payload: &ComponentPayload) -> bool {
        match self.get_or_create(handle, payload.kind()) {
            Some(live) => live.merge(payload),
            None => false,
        }
    }

    fn component(&self, handle: LocalHandle, kind: ComponentKind) -> Option<&ComponentPayload>;

    /// Mutable access for simulation systems. Marks the component as changed.
    fn component_mut(&mut self, handle: LocalHandle, kind: ComponentKind) -> Option<&mut ComponentPayload>;

    fn remove_component(&mut self, handle: LocalHandle, kind: ComponentKind) -> bool;

    /// Components written through [`Scene::component_mut`] since the previous call,
    /// each reported once.
    fn take_changed(&mut self) -> Vec<(LocalHandle, ComponentKind)>;
}

#[derive(Debug, Default)]
pub struct MemoryScene {
    live: HashMap<LocalHandle, BTreeMap<ComponentKind, ComponentPayload>>,
    changed: Vec<(LocalHandle, ComponentKind)>,
    next_handle: u64,
}

impl MemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn handles(&self) -> Vec<LocalHandle> {
        let mut handles: Vec<LocalHandle> = self.live.keys().copied().collect();
        handles.sort();
        handles
    }
}

impl Scene for MemoryScene {
    fn spawn(&mut self) -> LocalHandle {
        self.next_handle += 1;
        let handle = LocalHandle(self.next_handle);
        self.live.insert(handle, BTreeMap::new());
        handle
    }

    fn despawn(&mut self, handle: LocalHandle) -> bool {
        self.changed.retain(|(changed, _)| *changed != handle);
        self.live.remove(&handle).is_some()
    }

    fn is_alive(&self, handle: LocalHandle) -> bool {
        self.live.contains_key(&handle)
    }

    fn get_or_create(&mut self, handle: LocalHandle, kind: ComponentKind) -> Option<&mut ComponentPayload> {
        let components = self.live.get_mut(&handle)?;
        Some(
            components
                .entry(kind)
                .or_insert_with(|| ComponentPayload::default_for(kind)),
        )
    }

    fn component(&self, handle: LocalHandle, kind: ComponentKind) -> Option<&ComponentPayload> {
        self.live.get(&handle)?.get(&kind)
    }

    fn component_mut(&mut self, handle: LocalHandle, kind: ComponentKind) -> Option<&mut ComponentPayload> {
        let component = self.live.get_mut(&handle)?.get_mut(&kind)?;
        if !self.changed.contains(&(handle, kind)) {
            self.changed.push((handle, kind));
        }
        Some(component)
    }

    fn remove_component(&mut self, handle: LocalHandle, kind: ComponentKind) -> bool {
        self.changed.retain(|changed| *changed != (handle, kind));
        self.live
            .get_mut(&handle)
            .map(|components| components.remove(&kind).is_some())
            .unwrap_or(false)
    }

    fn take_changed(&mut self) -> Vec<(LocalHandle, ComponentKind)> {
        std::mem::take(&mut self.changed)
    }
}
