//! # Resource cache
//!
//! Textures and fonts are shared by many widgets, and are expensive to build. The cache deduplicates
//! them by key, but never owns them: entries are [`Weak`] and a resource dies with its last handle.
//! Expired entries read as absent, and are pruned whenever a new key is inserted.
//!
//! Construction is single-flight per key. Concurrent first loads of one key block on that key's slot
//! while the first caller builds, then share its result. Different keys build in parallel.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use crate::bitmap::{Bitmap, BitmapError};
use crate::font::{
    atlas::{self, AtlasConfig, AtlasError},
    Font, FontKey,
};
use crate::id::TextureID;

/// A GPU texture, as far as the core cares.
pub trait TextureHandle: Send + Sync + 'static {
    fn texture_id(&self) -> TextureID;
    fn extent(&self) -> [u32; 2];
}

/// Turns CPU bitmaps into GPU textures. Failure here is a device failure.
pub trait ResourceFactory: Send + Sync {
    type Texture: TextureHandle;
    fn create_texture(&self, bitmap: &Bitmap) -> anyhow::Result<Self::Texture>;
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TextureKey {
    /// Decoded from an image file.
    Path(PathBuf),
    /// Registered from memory by name.
    Named(String),
    /// The glyph atlas of a font.
    Atlas(FontKey),
}

#[derive(thiserror::Error, Debug)]
pub enum ResourceError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to decode image: {0}")]
    Decode(#[from] BitmapError),
    #[error("failed to parse font: {0}")]
    Font(rustybuzz::ttf_parser::FaceParsingError),
    #[error("failed to build glyph atlas: {0}")]
    Atlas(AtlasError),
    /// Fatal. The device could not create the resource.
    #[error(transparent)]
    Device(anyhow::Error),
}
impl From<AtlasError> for ResourceError {
    fn from(value: AtlasError) -> Self {
        // Keep parse failures in one place regardless of which layer found them.
        match value {
            AtlasError::Face(face) => Self::Font(face),
            other => Self::Atlas(other),
        }
    }
}

/// Per-key slot. `value` is only ever held briefly, so lookups never wait behind a construction.
/// `building` is held for the duration of one.
struct Slot<V> {
    value: parking_lot::RwLock<Weak<V>>,
    building: parking_lot::Mutex<()>,
}
impl<V> Default for Slot<V> {
    fn default() -> Self {
        Self {
            value: parking_lot::RwLock::new(Weak::new()),
            building: parking_lot::Mutex::new(()),
        }
    }
}
impl<V> Slot<V> {
    fn upgrade(&self) -> Option<Arc<V>> {
        self.value.read().upgrade()
    }
}

/// Map of weak references with per-key single-flight construction.
pub struct WeakCache<K, V> {
    slots: parking_lot::Mutex<hashbrown::HashMap<K, Arc<Slot<V>>>>,
}
impl<K, V> Default for WeakCache<K, V> {
    fn default() -> Self {
        Self {
            slots: parking_lot::Mutex::new(hashbrown::HashMap::new()),
        }
    }
}
impl<K: std::hash::Hash + Eq + Clone, V> WeakCache<K, V> {
    /// Find or create the slot for `key`. Creating one prunes expired slots first.
    fn slot(&self, key: &K) -> Arc<Slot<V>> {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(key) {
            return slot.clone();
        }
        // Slots referenced from outside the map may be mid-construction.
        slots.retain(|_, slot| Arc::strong_count(slot) > 1 || slot.value.read().strong_count() > 0);
        let slot = Arc::<Slot<V>>::default();
        slots.insert(key.clone(), slot.clone());
        slot
    }
    /// The live value for `key`, if any. Does not wait for one under construction.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let slot = self.slots.lock().get(key).cloned()?;
        slot.upgrade()
    }
    /// The live value for `key`, or build one with `make`. See the module docs for concurrency.
    ///
    /// A failed `make` leaves the key absent. The next caller tries again.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: &K,
        make: impl FnOnce() -> Result<V, E>,
    ) -> Result<Arc<V>, E> {
        let slot = self.slot(key);
        if let Some(live) = slot.upgrade() {
            return Ok(live);
        }
        let _building = slot.building.lock();
        // Someone else may have finished while we waited.
        if let Some(live) = slot.upgrade() {
            return Ok(live);
        }
        let value = Arc::new(make()?);
        *slot.value.write() = Arc::downgrade(&value);
        Ok(value)
    }
    /// Register an existing value under `key`, replacing whatever was there.
    pub fn insert(&self, key: &K, value: &Arc<V>) {
        let slot = self.slot(key);
        *slot.value.write() = Arc::downgrade(value);
    }
    /// First live value matching `predicate`. Values under construction are skipped.
    pub fn find(&self, mut predicate: impl FnMut(&K, &V) -> bool) -> Option<Arc<V>> {
        let slots = self.slots.lock();
        slots.iter().find_map(|(key, slot)| {
            let value = slot.upgrade()?;
            predicate(key, &value).then_some(value)
        })
    }
    /// Number of live values.
    pub fn live(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.value.read().strong_count() > 0)
            .count()
    }
    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }
}

/// Deduplicating loader for textures and fonts.
pub struct ResourceCache<F: ResourceFactory> {
    factory: F,
    atlas_config: AtlasConfig,
    textures: WeakCache<TextureKey, F::Texture>,
    fonts: WeakCache<FontKey, Font<F::Texture>>,
}
impl<F: ResourceFactory> ResourceCache<F> {
    pub fn new(factory: F, atlas_config: AtlasConfig) -> Self {
        Self {
            factory,
            atlas_config,
            textures: WeakCache::default(),
            fonts: WeakCache::default(),
        }
    }
    pub fn factory(&self) -> &F {
        &self.factory
    }
    /// Decode an image file into a texture, or share the live one loaded from the same path.
    pub fn load_texture(&self, path: impl AsRef<Path>) -> Result<Arc<F::Texture>, ResourceError> {
        let path = path.as_ref();
        self.textures
            .get_or_try_insert_with(&TextureKey::Path(path.to_owned()), || {
                let bytes = std::fs::read(path).map_err(|source| ResourceError::Io {
                    path: path.to_owned(),
                    source,
                })?;
                let bitmap = Bitmap::decode(&bytes)?;
                let texture = self
                    .factory
                    .create_texture(&bitmap)
                    .map_err(ResourceError::Device)?;
                log::debug!(
                    "Loaded {} as {} ({}x{})",
                    path.display(),
                    texture.texture_id(),
                    bitmap.width(),
                    bitmap.height()
                );
                Ok(texture)
            })
            .inspect_err(|err| log::warn!("Texture {} unavailable: {err}", path.display()))
    }
    /// Upload an in-memory image under `name`. If a live texture already has that name, it is returned
    /// instead and `bitmap` is ignored.
    pub fn texture_from_bitmap(
        &self,
        name: impl Into<String>,
        bitmap: &Bitmap,
    ) -> Result<Arc<F::Texture>, ResourceError> {
        self.textures
            .get_or_try_insert_with(&TextureKey::Named(name.into()), || {
                self.factory
                    .create_texture(bitmap)
                    .map_err(ResourceError::Device)
            })
    }
    #[must_use]
    pub fn texture(&self, key: &TextureKey) -> Option<Arc<F::Texture>> {
        self.textures.get(key)
    }
    /// Build a font from a file, or share the live one with the same key.
    /// The file is only read if no live font has this key.
    pub fn load_font(
        &self,
        path: impl AsRef<Path>,
        key: FontKey,
    ) -> Result<Arc<Font<F::Texture>>, ResourceError> {
        let path = path.as_ref();
        self.fonts
            .get_or_try_insert_with(&key.clone(), || {
                let data = std::fs::read(path).map_err(|source| ResourceError::Io {
                    path: path.to_owned(),
                    source,
                })?;
                self.build_font(&data, key)
            })
            .inspect_err(|err| log::warn!("Font {} unavailable: {err}", path.display()))
    }
    /// Build a font from file contents, or share the live one with the same key.
    pub fn load_font_data(
        &self,
        data: &[u8],
        key: FontKey,
    ) -> Result<Arc<Font<F::Texture>>, ResourceError> {
        self.fonts
            .get_or_try_insert_with(&key.clone(), || self.build_font(data, key))
    }
    fn build_font(&self, data: &[u8], key: FontKey) -> Result<Font<F::Texture>, ResourceError> {
        let committed = atlas::build_from_font_data(self.atlas_config.clone(), data)?;
        let texture = Arc::new(
            self.factory
                .create_texture(&committed.bitmap)
                .map_err(ResourceError::Device)?,
        );
        self.textures
            .insert(&TextureKey::Atlas(key.clone()), &texture);
        log::info!("Built font {key} with atlas {}", texture.texture_id());
        Ok(Font::new(key, committed.face, texture))
    }
    /// A live font with this family (ASCII case-insensitive), weight and style.
    #[must_use]
    pub fn find_font(&self, family: &str, weight: u16, italic: bool) -> Option<Arc<Font<F::Texture>>> {
        self.fonts.find(|key, _| {
            key.family.eq_ignore_ascii_case(family) && key.weight == weight && key.italic == italic
        })
    }
    /// Live textures and fonts.
    #[must_use]
    pub fn live(&self) -> (usize, usize) {
        (self.textures.live(), self.fonts.live())
    }
}
