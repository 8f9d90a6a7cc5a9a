use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{canvas::Bitmap, modules::VisualModule, Result, VisualizerError};

/// Cache of decoded images referenced by modules and the background.
#[derive(Debug, Default)]
pub struct AssetStore {
    images: HashMap<PathBuf, Arc<Bitmap>>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self {
            images: HashMap::new(),
        }
    }

    /// Registers an already decoded image under `path`.
    pub fn register_image(&mut self, path: impl Into<PathBuf>, image: Bitmap) -> Arc<Bitmap> {
        let image = Arc::new(image);
        self.images.insert(path.into(), Arc::clone(&image));
        image
    }

    /// Decodes the image at `path`, or returns the cached copy.
    pub fn load_image(&mut self, path: impl AsRef<Path>) -> Result<Arc<Bitmap>> {
        let path = path.as_ref();
        if let Some(image) = self.images.get(path) {
            return Ok(Arc::clone(image));
        }
        let image = Bitmap::open(path)?;
        tracing::info!(path = %path.display(), width = image.width(), height = image.height(), "image loaded");
        Ok(self.register_image(path, image))
    }

    /// Decodes every PNG directly inside `dir`, sorted by file name.
    pub fn load_frames(&mut self, dir: impl AsRef<Path>) -> Result<Vec<Arc<Bitmap>>> {
        let dir = dir.as_ref();
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_png = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
            if is_png && path.is_file() {
                paths.push(path);
            }
        }
        if paths.is_empty() {
            return Err(VisualizerError::msg(format!(
                "no PNG frames in `{}`",
                dir.display()
            )));
        }
        paths.sort();
        let frames = paths
            .iter()
            .map(|path| self.load_image(path))
            .collect::<Result<Vec<_>>>()?;
        tracing::info!(dir = %dir.display(), frames = frames.len(), "frame sequence loaded");
        Ok(frames)
    }

    pub fn image(&self, path: impl AsRef<Path>) -> Option<Arc<Bitmap>> {
        self.images.get(path.as_ref()).cloned()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Attaches the image every module asks for. Fails on the first image
    /// that cannot be decoded; modules resolved before it keep theirs.
    pub fn resolve_module_assets<'a>(
        &mut self,
        modules: impl IntoIterator<Item = &'a mut (dyn VisualModule + 'static)>,
    ) -> Result<()> {
        for module in modules {
            let Some(path) = module.image_path().map(PathBuf::from) else {
                continue;
            };
            let image = self.load_image(&path).map_err(|err| {
                VisualizerError::msg(format!(
                    "unknown image `{}` referenced by {}: {err}",
                    path.display(),
                    module.id()
                ))
            })?;
            module.set_image(Some(image));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{ModuleKind, ModuleRegistry, NeonModule};

    #[test]
    fn registered_images_are_shared() {
        let mut store = AssetStore::new();
        let first = store.register_image("logo.png", Bitmap::new(4, 4));
        let again = store.load_image("logo.png").unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn missing_files_error() {
        let mut store = AssetStore::new();
        assert!(store.load_image("does/not/exist.png").is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn frame_directories_load_in_name_order() {
        let dir = std::env::temp_dir().join(format!("bass-reactive-frames-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for (name, width) in [("frame_002.png", 2), ("frame_001.png", 1), ("frame_010.png", 3)] {
            Bitmap::new(width, 1).save_png(dir.join(name)).unwrap();
        }
        std::fs::write(dir.join("notes.txt"), "skip me").unwrap();

        let mut store = AssetStore::new();
        let frames = store.load_frames(&dir).unwrap();
        let widths: Vec<u32> = frames.iter().map(|frame| frame.width()).collect();
        assert_eq!(widths, vec![1, 2, 3]);
        assert_eq!(store.len(), 3);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn empty_frame_directory_errors() {
        let dir = std::env::temp_dir().join(format!("bass-reactive-no-frames-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let err = AssetStore::new().load_frames(&dir).unwrap_err();
        assert!(format!("{err}").contains("no PNG frames"));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn resolves_neon_images() {
        let mut store = AssetStore::new();
        store.register_image("logo.png", Bitmap::new(8, 2));

        let mut registry = ModuleRegistry::new();
        let mut neon = NeonModule::new();
        neon.set_image_path(Some("logo.png".into()));
        let id = registry.add(Box::new(neon)).unwrap();
        registry
            .add(crate::modules::create_module(ModuleKind::Speaker))
            .unwrap();

        store.resolve_module_assets(registry.iter_mut()).unwrap();
        assert!(registry.get(id).unwrap().has_image());
    }

    #[test]
    fn unresolvable_image_names_the_module() {
        let mut store = AssetStore::new();
        let mut registry = ModuleRegistry::new();
        let mut neon = NeonModule::new();
        neon.set_image_path(Some("missing.png".into()));
        registry.add(Box::new(neon)).unwrap();

        let err = store.resolve_module_assets(registry.iter_mut()).unwrap_err();
        assert!(format!("{err}").contains("missing.png"));
    }
}
