//! Read-only provider compositions.
//!
//! [`GroupedProvider`] presents several providers as one; [`FilteredProvider`]
//! restricts a provider to an explicit key set. Both reject mutation.
//!
//! Grouped lookups and grouped key enumeration deliberately disagree on
//! precedence: `get` returns the first listed provider's record, while
//! `keys` assembles the union so that later listed providers claim a shared
//! key's enumeration slot. Consumers depend on both directions, so the
//! asymmetry is contractual and covered by tests.

use crate::error::{ErrorKind, Result};
use crate::provider::Provider;
use indexmap::IndexSet;
use slidemap_identity::ImageId;
use std::collections::HashSet;
use uuid::Uuid;

/// Ordered union of providers of one kind.
pub struct GroupedProvider<P> {
    identifier: String,
    providers: Vec<P>,
}

impl<P: Provider> GroupedProvider<P> {
    pub fn new(providers: impl IntoIterator<Item = P>) -> Self {
        Self { identifier: Uuid::new_v4().to_string(), providers: providers.into_iter().collect() }
    }

    pub fn push(&mut self, provider: P) {
        self.providers.push(provider);
    }

    /// Concatenate two groups. Groups never nest; merging keeps a single
    /// flat member list.
    pub fn merge(mut self, other: Self) -> Self {
        self.providers.extend(other.providers);
        self
    }

    pub fn members(&self) -> usize {
        self.providers.len()
    }
}

impl<P: Provider> Provider for GroupedProvider<P> {
    type Record = P::Record;

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn contains(&self, id: &ImageId) -> bool {
        self.providers.iter().any(|p| p.contains(id))
    }

    /// First listed provider holding the key wins.
    fn get(&mut self, id: &ImageId) -> Result<Option<&P::Record>> {
        match self.providers.iter().position(|p| p.contains(id)) {
            Some(index) => self.providers[index].get(id),
            None => Ok(None),
        }
    }

    fn insert(&mut self, _id: ImageId, _record: P::Record) -> Result<()> {
        exn::bail!(ErrorKind::Unsupported("can't insert into a grouped provider".to_owned()));
    }

    fn remove(&mut self, _id: &ImageId) -> Result<()> {
        exn::bail!(ErrorKind::Unsupported("can't remove from a grouped provider".to_owned()));
    }

    /// Union of member keys. Built from the last listed provider backward,
    /// so a key shared between members enumerates at the position the
    /// later listed member gave it.
    fn keys(&self) -> Vec<ImageId> {
        let mut keys: IndexSet<ImageId> = IndexSet::new();
        for provider in self.providers.iter().rev() {
            for key in provider.keys() {
                keys.insert(key);
            }
        }
        keys.into_iter().collect()
    }

    fn len(&self) -> usize {
        self.keys().len()
    }
}

/// A provider restricted to an explicit set of valid keys.
pub struct FilteredProvider<P> {
    inner: P,
    valid_keys: HashSet<ImageId>,
}

impl<P: Provider> FilteredProvider<P> {
    /// Restrict `inner` to `valid_keys`; `None` freezes the provider's
    /// current key set.
    pub fn new(inner: P, valid_keys: Option<Vec<ImageId>>) -> Self {
        let valid_keys = match valid_keys {
            Some(keys) => keys.into_iter().collect(),
            None => inner.keys().into_iter().collect(),
        };
        Self { inner, valid_keys }
    }

    pub fn valid_keys(&self) -> &HashSet<ImageId> {
        &self.valid_keys
    }
}

impl<P: Provider> Provider for FilteredProvider<P> {
    type Record = P::Record;

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }

    fn contains(&self, id: &ImageId) -> bool {
        self.valid_keys.contains(id) && self.inner.contains(id)
    }

    fn get(&mut self, id: &ImageId) -> Result<Option<&P::Record>> {
        if !self.valid_keys.contains(id) {
            return Ok(None);
        }
        self.inner.get(id)
    }

    fn insert(&mut self, _id: ImageId, _record: P::Record) -> Result<()> {
        exn::bail!(ErrorKind::Unsupported("can't insert into a filtered provider".to_owned()));
    }

    fn remove(&mut self, _id: &ImageId) -> Result<()> {
        exn::bail!(ErrorKind::Unsupported("can't remove from a filtered provider".to_owned()));
    }

    /// The provider's keys, in provider order, restricted to the mask.
    fn keys(&self) -> Vec<ImageId> {
        self.inner.keys().into_iter().filter(|id| self.valid_keys.contains(id)).collect()
    }

    fn len(&self) -> usize {
        self.keys().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageRecord;
    use crate::provider::ImageProvider;

    fn id(parts: &[&str], site: Option<&str>) -> ImageId {
        ImageId::new(parts.iter().copied(), site).unwrap()
    }

    fn provider_with(name: &str, records: &[(&str, &str)]) -> ImageProvider {
        let mut provider = ImageProvider::new(Some(name.to_owned()));
        for (part, urlpath) in records {
            provider.insert(id(&[part], None), ImageRecord::new(*urlpath)).unwrap();
        }
        provider
    }

    #[test]
    fn get_prefers_the_first_listed_provider() {
        let first = provider_with("first", &[("shared.svs", "/first/shared.svs")]);
        let second = provider_with("second", &[("shared.svs", "/second/shared.svs")]);
        let mut grouped = GroupedProvider::new([first, second]);

        let record = grouped.get(&id(&["shared.svs"], None)).unwrap().unwrap();
        assert_eq!(record.urlpath, "/first/shared.svs");
    }

    #[test]
    fn keys_prefer_the_last_listed_provider() {
        let first = provider_with("first", &[("shared.svs", "/f/s"), ("only-first.svs", "/f/o")]);
        let second = provider_with("second", &[("only-second.svs", "/s/o"), ("shared.svs", "/s/s")]);
        let grouped = GroupedProvider::new([first, second]);

        // reverse-listed precedence: the second provider's ordering leads
        let keys = grouped.keys();
        assert_eq!(
            keys,
            vec![
                id(&["only-second.svs"], None),
                id(&["shared.svs"], None),
                id(&["only-first.svs"], None),
            ]
        );
        assert_eq!(grouped.len(), 3);
    }

    #[test]
    fn get_and_keys_precedence_disagree_on_purpose() {
        let first = provider_with("first", &[("shared.svs", "/first/shared.svs")]);
        let second = provider_with("second", &[("shared.svs", "/second/shared.svs")]);
        let mut grouped = GroupedProvider::new([first, second]);
        let key = id(&["shared.svs"], None);

        // lookup resolves forward, enumeration resolves backward
        assert_eq!(grouped.get(&key).unwrap().unwrap().urlpath, "/first/shared.svs");
        assert_eq!(grouped.keys(), vec![key]);
    }

    #[test]
    fn merge_flattens_member_lists() {
        let a = GroupedProvider::new([provider_with("a", &[("a.svs", "/a")])]);
        let b = GroupedProvider::new([
            provider_with("b", &[("b.svs", "/b")]),
            provider_with("c", &[("c.svs", "/c")]),
        ]);
        let merged = a.merge(b);
        assert_eq!(merged.members(), 3);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn grouped_mutation_is_unsupported() {
        let mut grouped = GroupedProvider::new([provider_with("a", &[("a.svs", "/a")])]);
        let err = grouped.insert(id(&["x.svs"], None), ImageRecord::new("/x")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Unsupported(_)));
        let err = grouped.remove(&id(&["a.svs"], None)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Unsupported(_)));
    }

    #[test]
    fn filtered_provider_masks_keys() {
        let provider = provider_with("p", &[("a.svs", "/a"), ("b.svs", "/b"), ("c.svs", "/c")]);
        let mask = vec![id(&["a.svs"], None), id(&["c.svs"], None), id(&["ghost.svs"], None)];
        let mut filtered = FilteredProvider::new(provider, Some(mask));

        assert_eq!(filtered.keys(), vec![id(&["a.svs"], None), id(&["c.svs"], None)]);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.get(&id(&["b.svs"], None)).unwrap().is_none());
        assert!(!filtered.contains(&id(&["ghost.svs"], None)));
        assert!(filtered.get(&id(&["a.svs"], None)).unwrap().is_some());
    }

    #[test]
    fn filtered_default_mask_freezes_current_keys() {
        let provider = provider_with("p", &[("a.svs", "/a")]);
        let filtered = FilteredProvider::new(provider, None);
        assert_eq!(filtered.valid_keys().len(), 1);
        assert_eq!(filtered.keys(), vec![id(&["a.svs"], None)]);
    }

    #[test]
    fn filtered_mutation_is_unsupported() {
        let provider = provider_with("p", &[("a.svs", "/a")]);
        let mut filtered = FilteredProvider::new(provider, None);
        let err = filtered.insert(id(&["x.svs"], None), ImageRecord::new("/x")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Unsupported(_)));
    }
}
