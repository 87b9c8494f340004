use super::{Header, HeaderError};
use crate::header::name::Name;
use bytesstr::BytesStr;
use std::mem::take;
use std::{fmt, slice};

/// Headers is a simple container for RTSP message headers.
/// The headers are stored as [BytesStr] under their respective [Name].
///
/// Internally it is a `Vec`-backed multimap to keep insertion order
#[derive(Debug, Default, Clone)]
pub struct Headers {
    entries: Vec<Entry>,
}

impl Headers {
    /// Returns a new empty [Headers]
    #[inline]
    pub const fn new() -> Self {
        Headers {
            entries: Vec::new(),
        }
    }

    /// Returns a new empty [Headers] with the specified capacity
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Headers {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Returns if any value is stored under `name`
    #[inline]
    pub fn contains(&self, name: &Name) -> bool {
        self.entry(name).is_some()
    }

    /// Insert a [BytesStr] value directly
    #[inline]
    pub fn insert<N, V>(&mut self, name: N, value: V)
    where
        N: Into<Name>,
        V: Into<BytesStr>,
    {
        let name = name.into();

        if let Some(Entry { values, .. }) = self.entry_mut(&name) {
            values.push(value.into());
        } else {
            self.entries.push(Entry {
                name,
                values: Values::One(value.into()),
            });
        }
    }

    /// Insert a [BytesStr] value directly at the beginning of the message
    #[inline]
    pub fn insert_front<N, V>(&mut self, name: N, value: V)
    where
        N: Into<Name>,
        V: Into<BytesStr>,
    {
        let name = name.into();

        if let Some(Entry { values, .. }) = self.entry_mut(&name) {
            values.push(value.into());
        } else {
            self.entries.insert(
                0,
                Entry {
                    name,
                    values: Values::One(value.into()),
                },
            );
        }
    }

    /// Prints the header into a BytesStr and stores it
    #[inline]
    pub fn insert_type<H: Header>(&mut self, header: &H) {
        let value = header.print();

        if let Some(Entry { values, .. }) = self.entry_mut(H::name()) {
            values.push(value);
        } else {
            self.entries.push(Entry {
                name: H::name().clone(),
                values: Values::One(value),
            });
        }
    }

    /// Replace any stored values of `H`'s name with the given header
    #[inline]
    pub fn replace_type<H: Header>(&mut self, header: &H) {
        self.remove(H::name());
        self.insert_type(header);
    }

    /// Remove all values stored under `name`
    #[inline]
    pub fn remove(&mut self, name: &Name) -> Option<Vec<BytesStr>> {
        let i = self.entries.iter().position(|entry| &entry.name == name)?;

        match self.entries.remove(i).values {
            Values::One(v) => Some(vec![v]),
            Values::Many(v) => Some(v),
        }
    }

    /// Returns a parsed header `H`, failing when it is absent
    #[inline]
    pub fn get<H: Header>(&self) -> Result<H, HeaderError> {
        match self.try_get() {
            Some(res) => res,
            None => Err(HeaderError::missing(H::name().clone())),
        }
    }

    /// Returns a parsed header `H`, or `None` when it is absent
    #[inline]
    pub fn try_get<H: Header>(&self) -> Option<Result<H, HeaderError>> {
        let entry = self.entry(H::name())?;

        Some(H::parse(entry.values.first()))
    }

    /// Parse every value stored under `H`'s name.
    ///
    /// Returns an empty `Vec` when the header is absent.
    pub fn get_all<H: Header>(&self) -> Result<Vec<H>, HeaderError> {
        let Some(entry) = self.entry(H::name()) else {
            return Ok(vec![]);
        };

        entry.values.iter().map(H::parse).collect()
    }

    /// Returns a parsed header `H` and removes it from the map
    #[inline]
    pub fn take<H: Header>(&mut self) -> Option<Result<H, HeaderError>> {
        let values = self.remove(H::name())?;

        Some(H::parse(&values[0]))
    }

    /// Returns the first raw value stored under `name`
    pub fn value(&self, name: &Name) -> Option<&BytesStr> {
        self.entry(name).map(|entry| entry.values.first())
    }

    /// Returns the len of the map if it were printed to a buffer
    pub fn printed_len(&self) -> usize {
        let mut len = 0;

        for (name, value) in self.iter() {
            len += name.as_print_str().len();
            len += value.len();
            len += 4;
        }

        len
    }

    /// Returns an iterator over [Name] and [BytesStr] pairs in the map
    pub fn iter(&self) -> impl Iterator<Item = (&Name, &BytesStr)> + '_ {
        struct Iter<'s> {
            entries: slice::Iter<'s, Entry>,
            current: Option<(&'s Name, slice::Iter<'s, BytesStr>)>,
        }

        impl<'s> Iterator for Iter<'s> {
            type Item = (&'s Name, &'s BytesStr);

            fn next(&mut self) -> Option<Self::Item> {
                if let Some((name, iter)) = &mut self.current {
                    if let Some(val) = iter.next() {
                        return Some((name, val));
                    } else {
                        self.current = None;
                    }
                }

                let entry = self.entries.next()?;

                match &entry.values {
                    Values::One(val) => Some((&entry.name, val)),
                    Values::Many(values) => {
                        let mut iter = values.iter();
                        let ret = iter.next().expect("empty vec in values");

                        self.current = Some((&entry.name, iter));

                        Some((&entry.name, ret))
                    }
                }
            }
        }

        Iter {
            entries: self.entries.iter(),
            current: None,
        }
    }

    fn entry(&self, n: &Name) -> Option<&Entry> {
        self.entries.iter().find(|Entry { name, .. }| name == n)
    }

    fn entry_mut(&mut self, n: &Name) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|Entry { name, .. }| name == n)
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            write!(f, "{}: {}\r\n", name.as_print_str(), value)?;
        }

        Ok(())
    }
}

impl PartialEq for Headers {
    fn eq(&self, other: &Self) -> bool {
        let mut a = self.iter();
        let mut b = other.iter();

        loop {
            match (a.next(), b.next()) {
                (None, None) => return true,
                (Some((name_a, value_a)), Some((name_b, value_b))) => {
                    if name_a != name_b || value_a != value_b {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }
}

impl Extend<(Name, BytesStr)> for Headers {
    fn extend<T: IntoIterator<Item = (Name, BytesStr)>>(&mut self, iter: T) {
        for (name, value) in iter {
            self.insert(name, value);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    name: Name,
    values: Values,
}

#[derive(Debug, Clone, PartialEq)]
enum Values {
    One(BytesStr),
    Many(Vec<BytesStr>),
}

impl Values {
    fn first(&self) -> &BytesStr {
        match self {
            Values::One(v) => v,
            Values::Many(v) => &v[0],
        }
    }

    fn iter(&self) -> slice::Iter<'_, BytesStr> {
        match self {
            Values::One(v) => slice::from_ref(v).iter(),
            Values::Many(v) => v.iter(),
        }
    }

    fn push(&mut self, value: BytesStr) {
        match self {
            Values::One(existing_value) => {
                let existing_value = take(existing_value);
                *self = Values::Many(vec![existing_value, value]);
            }
            Values::Many(vec) => vec.push(value),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::header::typed::CSeq;

    #[test]
    fn header_insert() {
        let mut headers = Headers::new();

        headers.insert_type(&CSeq(2));

        assert_eq!(headers.entries.len(), 1);
        assert_eq!(headers.entries[0].name, Name::CSEQ);
        assert_eq!(
            headers.entries[0].values,
            Values::One(BytesStr::from_static("2"))
        );
    }

    #[test]
    fn header_insert_twice() {
        let mut headers = Headers::new();

        headers.insert(Name::CSEQ, BytesStr::from_static("2"));
        headers.insert(Name::CSEQ, BytesStr::from_static("3"));

        assert_eq!(headers.entries.len(), 1);
        assert_eq!(
            headers.entries[0].values,
            Values::Many(vec![BytesStr::from_static("2"), BytesStr::from_static("3")])
        );
    }

    #[test]
    fn header_get() {
        let mut headers = Headers::new();
        headers.insert(Name::CSEQ, BytesStr::from_static("7"));

        let cseq: CSeq = headers.get().unwrap();

        assert_eq!(headers.entries.len(), 1);
        assert_eq!(cseq.0, 7);
    }

    #[test]
    fn header_take() {
        let mut headers = Headers::new();
        headers.insert(Name::CSEQ, BytesStr::from_static("7"));

        let cseq: CSeq = headers.take().unwrap().unwrap();

        assert!(headers.entries.is_empty());
        assert_eq!(cseq.0, 7);
    }

    #[test]
    fn header_replace() {
        let mut headers = Headers::new();
        headers.insert_type(&CSeq(1));
        headers.replace_type(&CSeq(2));

        assert_eq!(headers.get::<CSeq>().unwrap(), CSeq(2));
        assert_eq!(headers.entries.len(), 1);
    }

    #[test]
    fn header_iter_keeps_order() {
        let mut headers = Headers::new();
        headers.insert(Name::CSEQ, BytesStr::from_static("1"));
        headers.insert(Name::SESSION, BytesStr::from_static("abc"));
        headers.insert(Name::CSEQ, BytesStr::from_static("2"));

        let mut iter = headers.iter();

        let (name, value) = iter.next().unwrap();
        assert_eq!(name, &Name::CSEQ);
        assert_eq!(value, "1");

        let (name, value) = iter.next().unwrap();
        assert_eq!(name, &Name::CSEQ);
        assert_eq!(value, "2");

        let (name, value) = iter.next().unwrap();
        assert_eq!(name, &Name::SESSION);
        assert_eq!(value, "abc");

        assert!(iter.next().is_none());
    }
}
