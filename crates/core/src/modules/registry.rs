use std::fmt;

use crate::{canvas::Canvas, AudioSnapshot};

use super::{ModuleId, ModuleKind, VisualModule};

/// Instances allowed per module kind.
pub const MAX_PER_KIND: usize = 4;

/// Lifecycle notification delivered to registry observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryEvent {
    Added { id: ModuleId, kind: ModuleKind },
    Removed { id: ModuleId, kind: ModuleKind },
}

type Observer = Box<dyn FnMut(&RegistryEvent) + Send>;

/// Ordered set of active modules. Registration order is draw order.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Box<dyn VisualModule>>,
    observers: Vec<Observer>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer for add/remove events.
    pub fn subscribe(&mut self, observer: impl FnMut(&RegistryEvent) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Whether another module of `kind` fits under the cap.
    pub fn has_room(&self, kind: ModuleKind) -> bool {
        self.count_of(kind) < MAX_PER_KIND
    }

    /// Appends `module` unless its kind is at capacity; the refused module
    /// is handed back.
    pub fn add(
        &mut self,
        module: Box<dyn VisualModule>,
    ) -> std::result::Result<ModuleId, Box<dyn VisualModule>> {
        let kind = module.kind();
        if !self.has_room(kind) {
            tracing::warn!(%kind, max = MAX_PER_KIND, "module limit reached");
            return Err(module);
        }
        let id = module.id();
        self.modules.push(module);
        tracing::debug!(%id, %kind, "module added");
        self.emit(RegistryEvent::Added { id, kind });
        Ok(id)
    }

    /// Removes the module with `id`; unknown ids are ignored.
    pub fn remove(&mut self, id: ModuleId) -> Option<Box<dyn VisualModule>> {
        let index = self.modules.iter().position(|m| m.id() == id)?;
        let module = self.modules.remove(index);
        let kind = module.kind();
        tracing::debug!(%id, %kind, "module removed");
        self.emit(RegistryEvent::Removed { id, kind });
        Some(module)
    }

    pub fn clear(&mut self) {
        while let Some(id) = self.modules.first().map(|m| m.id()) {
            self.remove(id);
        }
    }

    pub fn count_of(&self, kind: ModuleKind) -> usize {
        self.modules.iter().filter(|m| m.kind() == kind).count()
    }

    pub fn by_kind(&self, kind: ModuleKind) -> impl Iterator<Item = &(dyn VisualModule + 'static)> {
        self.iter().filter(move |m| m.kind() == kind)
    }

    pub fn get(&self, id: ModuleId) -> Option<&(dyn VisualModule + 'static)> {
        self.iter().find(|m| m.id() == id)
    }

    pub fn get_mut(&mut self, id: ModuleId) -> Option<&mut (dyn VisualModule + 'static)> {
        self.modules
            .iter_mut()
            .find(|m| m.id() == id)
            .map(|m| m.as_mut())
    }

    pub fn iter(&self) -> impl Iterator<Item = &(dyn VisualModule + 'static)> {
        self.modules.iter().map(|m| m.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut (dyn VisualModule + 'static)> {
        self.modules.iter_mut().map(|m| m.as_mut())
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Updates every enabled module in registration order. Disabled modules
    /// keep their state frozen.
    pub fn update_all(&mut self, audio: &AudioSnapshot) {
        for module in self.modules.iter_mut().filter(|m| m.enabled()) {
            module.update(audio);
        }
    }

    /// Draws every enabled module in registration order; later modules end
    /// up on top.
    pub fn draw_all(&mut self, canvas: &mut dyn Canvas) {
        for module in self.modules.iter_mut().filter(|m| m.enabled()) {
            canvas.save();
            module.draw(canvas);
            canvas.restore();
        }
    }

    /// Drops transient animation state of every module.
    pub fn reset_animation(&mut self) {
        for module in &mut self.modules {
            module.reset_animation();
        }
    }

    fn emit(&mut self, event: RegistryEvent) {
        for observer in &mut self.observers {
            observer(&event);
        }
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.modules)
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{
        canvas::{DrawCommand, RecordingCanvas},
        modules::create_module,
    };

    fn filled(kind: ModuleKind, count: usize) -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        for _ in 0..count {
            registry.add(create_module(kind)).unwrap();
        }
        registry
    }

    #[test]
    fn fifth_module_of_a_kind_is_refused() {
        let mut registry = filled(ModuleKind::Speaker, MAX_PER_KIND);
        let before: Vec<_> = registry.iter().map(|m| m.id()).collect();

        let refused = registry.add(create_module(ModuleKind::Speaker));
        assert!(refused.is_err());
        assert_eq!(registry.len(), MAX_PER_KIND);
        assert_eq!(registry.iter().map(|m| m.id()).collect::<Vec<_>>(), before);

        // Other kinds have their own budget.
        assert!(registry.add(create_module(ModuleKind::Neon)).is_ok());
    }

    #[test]
    fn removing_unknown_id_is_a_no_op() {
        let mut registry = filled(ModuleKind::Spectrum, 2);
        let stray = create_module(ModuleKind::Spectrum).id();
        let before: Vec<_> = registry.iter().map(|m| m.id()).collect();

        assert!(registry.remove(stray).is_none());
        assert_eq!(registry.iter().map(|m| m.id()).collect::<Vec<_>>(), before);
    }

    #[test]
    fn remove_frees_a_slot() {
        let mut registry = filled(ModuleKind::Neon, MAX_PER_KIND);
        let first = registry.iter().next().map(|m| m.id()).unwrap();
        registry.remove(first);
        assert_eq!(registry.count_of(ModuleKind::Neon), 3);
        assert!(registry.has_room(ModuleKind::Neon));
        assert!(registry.get(first).is_none());
    }

    #[test]
    fn observers_see_adds_and_removes() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let mut registry = ModuleRegistry::new();
        registry.subscribe(move |event| sink.lock().unwrap().push(*event));

        let id = registry.add(create_module(ModuleKind::Speaker)).unwrap();
        registry.add(create_module(ModuleKind::Neon)).unwrap();
        registry.remove(id);
        registry.clear();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(
            events[0],
            RegistryEvent::Added {
                id,
                kind: ModuleKind::Speaker
            }
        );
        assert_eq!(
            events[2],
            RegistryEvent::Removed {
                id,
                kind: ModuleKind::Speaker
            }
        );
        assert!(matches!(
            events[3],
            RegistryEvent::Removed {
                kind: ModuleKind::Neon,
                ..
            }
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn disabled_modules_are_skipped() {
        let mut registry = filled(ModuleKind::Speaker, 2);
        let ids: Vec<_> = registry.iter().map(|m| m.id()).collect();
        registry.get_mut(ids[0]).unwrap().set_enabled(false);

        let mut canvas = RecordingCanvas::new(320, 240);
        registry.draw_all(&mut canvas);
        let saves = canvas
            .commands()
            .iter()
            .filter(|c| matches!(c, DrawCommand::Save))
            .count();
        let mut only_second = RecordingCanvas::new(320, 240);
        registry.get_mut(ids[1]).unwrap().draw(&mut only_second);
        let single_saves = only_second
            .commands()
            .iter()
            .filter(|c| matches!(c, DrawCommand::Save))
            .count();
        // One wrapper save plus the module's own saves.
        assert_eq!(saves, single_saves + 1);
        assert_eq!(canvas.save_depth(), 0);
    }

    #[test]
    fn by_kind_filters() {
        let mut registry = filled(ModuleKind::Speaker, 2);
        registry.add(create_module(ModuleKind::Spectrum)).unwrap();
        assert_eq!(registry.by_kind(ModuleKind::Speaker).count(), 2);
        assert_eq!(registry.by_kind(ModuleKind::Spectrum).count(), 1);
        assert_eq!(registry.count_of(ModuleKind::Neon), 0);
    }
}
