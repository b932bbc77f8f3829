//! A map of dense integer key to value.

use std::marker::PhantomData;

pub trait Index: From<usize> {
    fn index(&self) -> usize;
}

/// A map of a dense integer key to value, implemented as a vector.
/// Effectively wraps Vec<V> to provide typed keys.
#[derive(Debug, Clone)]
pub struct DenseMap<K, V> {
    vec: Vec<V>,
    key_type: PhantomData<K>,
}

impl<K, V> Default for DenseMap<K, V> {
    fn default() -> Self {
        DenseMap {
            vec: Vec::default(),
            key_type: PhantomData,
        }
    }
}

impl<K: Index, V> std::ops::Index<K> for DenseMap<K, V> {
    type Output = V;

    fn index(&self, k: K) -> &Self::Output {
        &self.vec[k.index()]
    }
}

impl<K: Index, V> std::ops::IndexMut<K> for DenseMap<K, V> {
    fn index_mut(&mut self, k: K) -> &mut Self::Output {
        &mut self.vec[k.index()]
    }
}

impl<K: Index, V> DenseMap<K, V> {
    pub fn lookup(&self, k: K) -> Option<&V> {
        self.vec.get(k.index())
    }

    pub fn lookup_mut(&mut self, k: K) -> Option<&mut V> {
        self.vec.get_mut(k.index())
    }

    pub fn next_id(&self) -> K {
        K::from(self.vec.len())
    }

    pub fn len(&self) -> usize {
        self.vec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vec.is_empty()
    }

    pub fn all_ids(&self) -> impl Iterator<Item = K> {
        (0..self.vec.len()).map(K::from)
    }

    pub fn values(&self) -> std::slice::Iter<V> {
        self.vec.iter()
    }

    pub fn values_mut(&mut self) -> std::slice::IterMut<V> {
        self.vec.iter_mut()
    }
}

impl<K: Index, V: Clone> DenseMap<K, V> {
    pub fn new_sized(n: usize, default: V) -> Self {
        DenseMap {
            vec: vec![default; n],
            key_type: PhantomData,
        }
    }

    /// Set a value, growing the map with `default` entries if `k` is past the end.
    pub fn set_grow(&mut self, k: K, v: V, default: V) {
        if k.index() >= self.vec.len() {
            self.vec.resize(k.index() + 1, default);
        }
        self.vec[k.index()] = v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Key(usize);
    impl From<usize> for Key {
        fn from(u: usize) -> Key {
            Key(u)
        }
    }
    impl Index for Key {
        fn index(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn grow_fills_gaps() {
        let mut m: DenseMap<Key, Option<u8>> = DenseMap::default();
        m.set_grow(Key(3), Some(7), None);
        assert_eq!(m.len(), 4);
        assert_eq!(m[Key(0)], None);
        assert_eq!(m[Key(3)], Some(7));
        assert_eq!(m.lookup(Key(9)), None);
        assert_eq!(m.next_id(), Key(4));
    }
}
