//! # IDs
//! Process-unique identities, namespaced by a marker type `T`. Used where two resources must be
//! told apart by *identity* rather than by contents, e.g. to decide whether two draws share a texture.
//!
//! To get a fresh ID, use `UniqueID<YourNamespaceTy>`'s `Default` impl.

/// One counter shared by every namespace. IDs are therefore unique across namespaces too,
/// but that is not part of the contract.
static NEXT_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

/// ID that is guaranteed unique within this execution of the program.
/// IDs with different types may not be compared.
pub struct UniqueID<T: std::any::Any> {
    id: std::num::NonZeroU64,
    // Namespace marker
    _phantom: std::marker::PhantomData<fn() -> T>,
}
impl<T: std::any::Any> Clone for UniqueID<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T: std::any::Any> Copy for UniqueID<T> {}
impl<T: std::any::Any> PartialEq for UniqueID<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl<T: std::any::Any> Eq for UniqueID<T> {}
impl<T: std::any::Any> std::hash::Hash for UniqueID<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
impl<T: std::any::Any> UniqueID<T> {
    /// Get the raw numeric value of this ID.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id.get()
    }
}
impl<T: std::any::Any> Default for UniqueID<T> {
    fn default() -> Self {
        // Relaxed - only uniqueness matters, not ordering.
        let id = NEXT_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        // Starts at one. Overflowing a u64 by increments of one is not a practical concern,
        // but wrapping to zero must not produce an invalid ID.
        let Some(id) = std::num::NonZeroU64::new(id) else {
            log::error!("{} ID overflow! Aborting!", std::any::type_name::<T>());
            std::process::abort();
        };
        Self {
            id,
            _phantom: std::marker::PhantomData,
        }
    }
}
impl<T: std::any::Any> std::fmt::Display for UniqueID<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // rsplit always yields at least one element, even for empty strings.
        let name = std::any::type_name::<T>()
            .rsplit("::")
            .next()
            .unwrap_or_default();
        write!(f, "{name}#{}", self.id)
    }
}
impl<T: std::any::Any> std::fmt::Debug for UniqueID<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

pub struct TextureMarker;
/// Identity of a texture. Two handles with the same ID refer to the same GPU image.
pub type TextureID = UniqueID<TextureMarker>;

#[cfg(test)]
mod test {
    use super::UniqueID;
    #[test]
    fn unique() {
        struct Namespace;
        type TestID = UniqueID<Namespace>;

        let mut v: Vec<_> = (0..1024).map(|_| TestID::default()).collect();
        v.sort_unstable_by_key(TestID::id);
        let length_before = v.len();
        v.dedup();
        assert_eq!(length_before, v.len(), "had duplicate ids");
    }
    #[test]
    fn display_has_namespace() {
        struct Namespace;
        let id = UniqueID::<Namespace>::default();
        assert!(id.to_string().starts_with("Namespace#"));
    }
}
