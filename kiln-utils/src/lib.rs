extern crate self as kiln_utils;

pub use kiln_derive::ObjectTraversal;
use std::collections::BTreeMap;

/// Visits every string reachable from a value, allowing the walker to rewrite it in place.
pub trait ObjectTraversal {
    fn traverse<W: ObjectWalker>(&mut self, walker: &mut W) -> Result<(), W::Error>;
}

pub trait ObjectWalker {
    type Error;

    fn enter_string(&mut self, value: &mut String) -> Result<(), Self::Error>;
}

impl<T: ObjectTraversal> ObjectTraversal for Vec<T> {
    fn traverse<W: ObjectWalker>(&mut self, walker: &mut W) -> Result<(), W::Error> {
        for item in self {
            item.traverse(walker)?;
        }

        Ok(())
    }
}

impl<T: ObjectTraversal> ObjectTraversal for Option<T> {
    fn traverse<W: ObjectWalker>(&mut self, walker: &mut W) -> Result<(), W::Error> {
        match self {
            Some(v) => v.traverse(walker),
            None => Ok(()),
        }
    }
}

impl ObjectTraversal for String {
    fn traverse<W: ObjectWalker>(&mut self, walker: &mut W) -> Result<(), W::Error> {
        walker.enter_string(self)
    }
}

macro_rules! opaque {
    ($($ty:ty),*) => {
        $(
            impl ObjectTraversal for $ty {
                fn traverse<W: ObjectWalker>(&mut self, _: &mut W) -> Result<(), W::Error> {
                    Ok(())
                }
            }
        )*
    };
}

opaque!(usize, u32, bool);

// Keys are rewritten too, so the map is rebuilt rather than mutated in place.
impl<K: ObjectTraversal + Ord, V: ObjectTraversal> ObjectTraversal for BTreeMap<K, V> {
    fn traverse<W: ObjectWalker>(&mut self, walker: &mut W) -> Result<(), W::Error> {
        let mut rebuilt = BTreeMap::new();

        for (mut k, mut v) in std::mem::take(self) {
            k.traverse(walker)?;
            v.traverse(walker)?;
            rebuilt.insert(k, v);
        }

        *self = rebuilt;
        Ok(())
    }
}
