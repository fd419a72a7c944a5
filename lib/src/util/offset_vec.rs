use std::fmt::{Debug, Error, Formatter};
use std::iter::FromIterator;
use std::result::Result;
use std::slice::Iter;

/// Elements with a width (eg. when used in an `OffsetVec`)
pub trait Width {
    fn width(&self) -> usize;
}

/// A vector whose elements are addressed by offset, where each element occupies as many offsets
/// as its width.
///
/// The constant pool is the main user: indices start at 1 and `long`/`double` constants take two
/// indices, the second of which can not be addressed.
#[derive(Clone)]
pub struct OffsetVec<T> {
    /// Entries, along with their offset
    entries: Vec<(Offset, T)>,

    /// Offset of the next element to be added
    offset_len: Offset,
}

/// Offset into an `OffsetVec`
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Offset(pub usize);

impl<T: Width> OffsetVec<T> {
    /// New empty offset vector
    pub fn new() -> OffsetVec<T> {
        OffsetVec::new_starting_at(Offset(0))
    }

    /// New empty offset vector, with a custom starting offset
    pub fn new_starting_at(initial_offset: Offset) -> OffsetVec<T> {
        OffsetVec {
            entries: vec![],
            offset_len: initial_offset,
        }
    }

    /// Add an entry to the back, returning its offset
    pub fn push(&mut self, elem: T) -> Offset {
        let offset = self.offset_len;
        self.offset_len.0 += elem.width();
        self.entries.push((offset, elem));
        offset
    }
}

impl<T> OffsetVec<T> {
    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Offset at which the next element would be added
    pub fn offset_len(&self) -> Offset {
        self.offset_len
    }

    /// Look up the element starting exactly at `offset`
    ///
    /// Offsets that fall in the middle of a wide element (or outside the vector) return `None`.
    pub fn get_offset(&self, offset: Offset) -> Option<&T> {
        self.entries
            .binary_search_by_key(&offset, |(off, _)| *off)
            .ok()
            .map(|idx| &self.entries[idx].1)
    }

    pub fn iter(&self) -> OffsetVecIter<'_, T> {
        OffsetVecIter(self.entries.iter())
    }
}

impl<T: PartialEq> PartialEq for OffsetVec<T> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<T: Eq> Eq for OffsetVec<T> {}

impl<T: Width> Default for OffsetVec<T> {
    fn default() -> Self {
        OffsetVec::new()
    }
}

/// Iterator over elements along with their offsets
pub struct OffsetVecIter<'a, T>(Iter<'a, (Offset, T)>);

impl<'a, T> Iterator for OffsetVecIter<'a, T> {
    type Item = (Offset, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(off, elem)| (*off, elem))
    }
}

impl<'a, T> IntoIterator for &'a OffsetVec<T> {
    type Item = (Offset, &'a T);
    type IntoIter = OffsetVecIter<'a, T>;

    fn into_iter(self) -> OffsetVecIter<'a, T> {
        self.iter()
    }
}

impl<T: Width> FromIterator<T> for OffsetVec<T> {
    fn from_iter<A: IntoIterator<Item = T>>(elems: A) -> Self {
        let mut offset_vec = OffsetVec::new();
        for elem in elems {
            offset_vec.push(elem);
        }
        offset_vec
    }
}

impl<T: Debug> Debug for OffsetVec<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        let mut list = f.debug_list();
        for (off, elem) in &self.entries {
            list.entry(&format_args!("#{} = {:?}", off.0, elem));
        }
        list.finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Copy, Clone, Eq, PartialEq, Debug)]
    enum Entry {
        Narrow(char),
        Wide(char),
    }

    impl Width for Entry {
        fn width(&self) -> usize {
            match self {
                Entry::Narrow(_) => 1,
                Entry::Wide(_) => 2,
            }
        }
    }

    #[test]
    fn wide_entries_skip_an_offset() {
        let mut pool = OffsetVec::new_starting_at(Offset(1));
        assert_eq!(pool.push(Entry::Narrow('a')), Offset(1));
        assert_eq!(pool.push(Entry::Wide('b')), Offset(2));
        assert_eq!(pool.push(Entry::Narrow('c')), Offset(4));
        assert_eq!(pool.offset_len(), Offset(5));
        assert_eq!(pool.len(), 3);

        let offsets: Vec<usize> = pool.iter().map(|(off, _)| off.0).collect();
        assert_eq!(offsets, vec![1, 2, 4]);
    }

    #[test]
    fn lookup_by_offset() {
        let pool: OffsetVec<Entry> = vec![Entry::Wide('x'), Entry::Narrow('y')]
            .into_iter()
            .collect();

        assert_eq!(pool.get_offset(Offset(0)), Some(&Entry::Wide('x')));
        assert_eq!(pool.get_offset(Offset(1)), None);
        assert_eq!(pool.get_offset(Offset(2)), Some(&Entry::Narrow('y')));
        assert_eq!(pool.get_offset(Offset(3)), None);
    }
}
