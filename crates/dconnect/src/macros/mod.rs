// Generates an insertion-ordered set newtype over `IndexSet`.
macro_rules! set {
    (
        $(#[$attr:meta])*
        pub struct $name:ident(IndexSet<$ty:ty, DefaultHashBuilder>);
    ) => {
        $(#[$attr])*
        pub struct $name(IndexSet<$ty, DefaultHashBuilder>);

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            #[doc = concat!("Creates an empty [`", stringify!($name), "`].")]
            #[must_use]
            #[inline]
            pub fn new() -> Self {
                Self(IndexSet::with_hasher(DefaultHashBuilder::default()))
            }

            #[doc = concat!("Inserts an element into a [`", stringify!($name), "`].")]
            #[must_use]
            #[inline]
            pub fn insert(mut self, element: $ty) -> Self {
                let _ = self.0.insert(element);
                self
            }

            #[doc = concat!("Adds an element to a [`", stringify!($name), "`].")]
            #[inline]
            pub fn add(&mut self, element: $ty) {
                let _ = self.0.insert(element);
            }

            #[doc = "Checks whether the given element is contained in the set."]
            #[must_use]
            #[inline]
            pub fn contains(&self, element: &$ty) -> bool {
                self.0.contains(element)
            }

            #[doc = "Checks whether the set is empty."]
            #[must_use]
            #[inline]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            #[doc = "Returns the number of elements in the set."]
            #[must_use]
            #[inline]
            pub fn len(&self) -> usize {
                self.0.len()
            }

            #[doc = "Returns an iterator over the elements, in insertion order."]
            #[inline]
            pub fn iter(&self) -> Iter<'_, $ty> {
                self.0.iter()
            }
        }

        impl IntoIterator for $name {
            type Item = $ty;
            type IntoIter = IntoIter<$ty>;

            fn into_iter(self) -> Self::IntoIter {
                self.0.into_iter()
            }
        }

        impl<'a> IntoIterator for &'a $name {
            type Item = &'a $ty;
            type IntoIter = Iter<'a, $ty>;

            fn into_iter(self) -> Self::IntoIter {
                self.0.iter()
            }
        }

        impl FromIterator<$ty> for $name {
            fn from_iter<I: IntoIterator<Item = $ty>>(iter: I) -> Self {
                let mut set = Self::new();
                for element in iter {
                    set.add(element);
                }
                set
            }
        }
    };
}

pub(crate) use set;
