use std::borrow::Borrow;
use std::char::{REPLACEMENT_CHARACTER, decode_utf16};
use std::fmt::{self, Write as _};
use std::hash::{Hash, Hasher};
use std::ops::{AddAssign, Deref};

use allocator_api2::alloc::Allocator;
use allocator_api2::collections::TryReserveError;
use allocator_api2::vec::Vec;

use crate::PolymorphicAllocator;

/// A growable UTF-8 string whose buffer comes from an allocator.
///
/// Dereferences to [`str`] and borrows as one, so it can be looked up by `&str` in ordered
/// containers.
///
/// # Example
///
/// ```
/// use pool_resource::make_string;
///
/// let mut greeting = make_string("Hello").unwrap();
/// greeting += ", world";
/// greeting.push('!');
///
/// assert_eq!(greeting, "Hello, world!");
/// ```
#[derive(Clone)]
pub struct PoolString<A: Allocator = PolymorphicAllocator> {
    // Only ever holds valid UTF-8.
    bytes: Vec<u8, A>,
}

impl<A: Allocator> PoolString<A> {
    /// Creates an empty string that will allocate its buffer from `alloc`.
    #[must_use]
    pub fn new_in(alloc: A) -> Self {
        Self {
            bytes: Vec::new_in(alloc),
        }
    }

    /// Creates a string holding a copy of `value`, with its buffer from `alloc`.
    ///
    /// # Panics
    ///
    /// Calls [`handle_alloc_error`][allocator_api2::alloc::handle_alloc_error] if the buffer
    /// cannot be allocated.
    #[must_use]
    pub fn from_str_in(value: &str, alloc: A) -> Self {
        let mut string = Self::new_in(alloc);
        string.push_str(value);
        string
    }

    /// Appends `value` to the end of the string.
    ///
    /// # Panics
    ///
    /// Calls [`handle_alloc_error`][allocator_api2::alloc::handle_alloc_error] if the buffer
    /// cannot grow. Use [`try_push_str()`][Self::try_push_str] to handle the failure.
    pub fn push_str(&mut self, value: &str) {
        reserve(&mut self.bytes, value.len());
        self.bytes.extend_from_slice(value.as_bytes());
    }

    /// Appends `value` to the end of the string.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer cannot grow. The string is left unchanged.
    pub fn try_push_str(&mut self, value: &str) -> Result<(), TryReserveError> {
        try_reserve(&mut self.bytes, value.len())?;
        self.bytes.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// Appends a single character.
    pub fn push(&mut self, c: char) {
        let mut buffer = [0_u8; 4];
        self.push_str(c.encode_utf8(&mut buffer));
    }

    /// The contents as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        // SAFETY: The buffer is only ever extended with whole UTF-8 strings.
        unsafe { std::str::from_utf8_unchecked(&self.bytes) }
    }

    /// The length of the string in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the string has zero length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The number of bytes the string can hold without reallocating.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    /// Truncates the string to zero length, keeping its buffer.
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// The allocator the string allocates its buffer from.
    #[must_use]
    pub fn allocator(&self) -> &A {
        self.bytes.allocator()
    }
}

impl<A: Allocator + Default> Default for PoolString<A> {
    fn default() -> Self {
        Self::new_in(A::default())
    }
}

impl<A: Allocator> Deref for PoolString<A> {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl<A: Allocator> AsRef<str> for PoolString<A> {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl<A: Allocator> Borrow<str> for PoolString<A> {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl<A: Allocator> fmt::Display for PoolString<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.as_str(), f)
    }
}

impl<A: Allocator> fmt::Debug for PoolString<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl<A: Allocator> fmt::Write for PoolString<A> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.try_push_str(s).map_err(|_reserve_error| fmt::Error)
    }
}

impl<A: Allocator, B: Allocator> PartialEq<PoolString<B>> for PoolString<A> {
    fn eq(&self, other: &PoolString<B>) -> bool {
        self.as_str() == other.as_str()
    }
}

impl<A: Allocator> Eq for PoolString<A> {}

impl<A: Allocator> PartialEq<str> for PoolString<A> {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl<A: Allocator> PartialEq<&str> for PoolString<A> {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl<A: Allocator> PartialOrd for PoolString<A> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<A: Allocator> Ord for PoolString<A> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

// Must agree with the hash of the borrowed str so lookups by &str work.
impl<A: Allocator> Hash for PoolString<A> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl<A: Allocator> AddAssign<&str> for PoolString<A> {
    fn add_assign(&mut self, rhs: &str) {
        self.push_str(rhs);
    }
}

impl<'a, A: Allocator> Extend<&'a str> for PoolString<A> {
    fn extend<I: IntoIterator<Item = &'a str>>(&mut self, iter: I) {
        for value in iter {
            self.push_str(value);
        }
    }
}

impl<A: Allocator> Extend<char> for PoolString<A> {
    fn extend<I: IntoIterator<Item = char>>(&mut self, iter: I) {
        for c in iter {
            self.push(c);
        }
    }
}

/// A growable UTF-16 string whose buffer comes from an allocator.
///
/// The units are not required to form valid UTF-16. Unpaired surrogates are replaced with
/// [`REPLACEMENT_CHARACTER`] when the string is displayed or converted.
#[derive(Clone)]
pub struct PoolWideString<A: Allocator = PolymorphicAllocator> {
    units: Vec<u16, A>,
}

impl<A: Allocator> PoolWideString<A> {
    /// Creates an empty wide string that will allocate its buffer from `alloc`.
    #[must_use]
    pub fn new_in(alloc: A) -> Self {
        Self {
            units: Vec::new_in(alloc),
        }
    }

    /// Creates a wide string holding the UTF-16 encoding of `value`.
    #[must_use]
    pub fn from_str_in(value: &str, alloc: A) -> Self {
        let mut string = Self::new_in(alloc);
        string.push_str(value);
        string
    }

    /// Appends the UTF-16 encoding of `value`.
    pub fn push_str(&mut self, value: &str) {
        reserve(&mut self.units, value.encode_utf16().count());
        self.units.extend(value.encode_utf16());
    }

    /// Appends the UTF-16 encoding of `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer cannot grow. The string is left unchanged.
    pub fn try_push_str(&mut self, value: &str) -> Result<(), TryReserveError> {
        try_reserve(&mut self.units, value.encode_utf16().count())?;
        self.units.extend(value.encode_utf16());
        Ok(())
    }

    /// Appends a single character.
    pub fn push(&mut self, c: char) {
        let mut buffer = [0_u16; 2];
        let encoded = c.encode_utf16(&mut buffer);
        reserve(&mut self.units, encoded.len());
        self.units.extend_from_slice(encoded);
    }

    /// The UTF-16 code units of the string.
    #[must_use]
    pub fn as_slice(&self) -> &[u16] {
        &self.units
    }

    /// The length of the string in UTF-16 code units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the string has zero length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Truncates the string to zero length, keeping its buffer.
    pub fn clear(&mut self) {
        self.units.clear();
    }

    /// The allocator the string allocates its buffer from.
    #[must_use]
    pub fn allocator(&self) -> &A {
        self.units.allocator()
    }

    /// Decodes the string into a standard [`String`], replacing unpaired surrogates.
    #[must_use]
    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.units)
    }

    fn chars(&self) -> impl Iterator<Item = char> + '_ {
        decode_utf16(self.units.iter().copied()).map(|c| c.unwrap_or(REPLACEMENT_CHARACTER))
    }
}

impl<A: Allocator + Default> Default for PoolWideString<A> {
    fn default() -> Self {
        Self::new_in(A::default())
    }
}

impl<A: Allocator> fmt::Display for PoolWideString<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.chars() {
            f.write_char(c)?;
        }

        Ok(())
    }
}

impl<A: Allocator> fmt::Debug for PoolWideString<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.to_string_lossy(), f)
    }
}

impl<A: Allocator, B: Allocator> PartialEq<PoolWideString<B>> for PoolWideString<A> {
    fn eq(&self, other: &PoolWideString<B>) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<A: Allocator> Eq for PoolWideString<A> {}

impl<A: Allocator> PartialEq<str> for PoolWideString<A> {
    fn eq(&self, other: &str) -> bool {
        self.units.iter().copied().eq(other.encode_utf16())
    }
}

impl<A: Allocator> PartialEq<&str> for PoolWideString<A> {
    fn eq(&self, other: &&str) -> bool {
        *self == **other
    }
}

impl<A: Allocator> PartialOrd for PoolWideString<A> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Orders by code unit, as C++ wide strings compare.
impl<A: Allocator> Ord for PoolWideString<A> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_slice().cmp(other.as_slice())
    }
}

impl<A: Allocator> Hash for PoolWideString<A> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_slice().hash(state);
    }
}

impl<A: Allocator> AddAssign<&str> for PoolWideString<A> {
    fn add_assign(&mut self, rhs: &str) {
        self.push_str(rhs);
    }
}

/// Reserves room for `additional` more elements.
///
/// Amortized growth can ask for more than the largest pool block even when the final length
/// fits in one, so an exact reservation is tried before giving up.
fn try_reserve<T, A: Allocator>(
    buffer: &mut Vec<T, A>,
    additional: usize,
) -> Result<(), TryReserveError> {
    match buffer.try_reserve(additional) {
        Ok(()) => Ok(()),
        Err(_amortized) => buffer.try_reserve_exact(additional),
    }
}

fn reserve<T, A: Allocator>(buffer: &mut Vec<T, A>, additional: usize) {
    if try_reserve(buffer, additional).is_err() {
        // Reports the failure through handle_alloc_error.
        buffer.reserve_exact(additional);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Write as _;
    use std::hash::DefaultHasher;
    use std::sync::Arc;

    use allocator_api2::alloc::Global;
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::{ExhaustionPolicy, MemoryResource, PoolAllocator, PoolResource};

    assert_impl_all!(PoolString: Send, Sync, Clone, fmt::Debug, fmt::Display, Ord, Hash);
    assert_impl_all!(PoolWideString: Send, Sync, Clone, fmt::Debug, fmt::Display, Ord, Hash);

    fn hash_of<T: Hash + ?Sized>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn builds_up_text() {
        let mut string = PoolString::new_in(Global);
        assert!(string.is_empty());

        string.push_str("pool");
        string += "ed";
        string.push(' ');
        string.extend(["str", "ing"]);
        string.extend("ß!".chars());

        assert_eq!(string, "pooled stringß!");
        assert_eq!(string.len(), "pooled stringß!".len());
        assert_eq!(string.to_uppercase(), "POOLED STRINGSS!");

        string.clear();
        assert!(string.is_empty());
    }

    #[test]
    fn grows_through_the_pool() {
        let resource = Arc::new(PoolResource::default());
        let shared: Arc<dyn MemoryResource> = Arc::<PoolResource>::clone(&resource);
        let mut string = PoolString::from_str_in("x", PolymorphicAllocator::new(shared));

        for _ in 0..1000 {
            string.push('y');
        }

        assert_eq!(string.len(), 1001);
        assert_eq!(resource.statistics().blocks_in_use, 1);

        drop(string);
        assert_eq!(resource.statistics().blocks_in_use, 0);
    }

    #[test]
    fn ordering_and_hashing_follow_str() {
        let apple = PoolString::from_str_in("apple", Global);
        let banana = PoolString::from_str_in("banana", Global);

        assert!(apple < banana);
        assert_eq!(hash_of(&apple), hash_of("apple"));
        assert_eq!(format!("{apple} {banana:?}"), r#"apple "banana""#);
    }

    #[test]
    fn write_macro_appends() {
        let mut string = PoolString::new_in(Global);
        write!(string, "{}-{}", 1, 2).unwrap();

        assert_eq!(string.as_str(), "1-2");
    }

    #[test]
    fn try_push_str_reports_exhaustion() {
        let resource = Arc::new(PoolResource::new(
            PoolAllocator::builder()
                .max_block_size(64)
                .exhaustion_policy(ExhaustionPolicy::ReturnError)
                .build(),
        ));
        let mut string = PoolString::new_in(PolymorphicAllocator::new(resource));

        string.try_push_str("short").unwrap();
        string.try_push_str(&"long".repeat(100)).unwrap_err();

        assert_eq!(string, "short");
    }

    fn small_block_resource() -> Arc<PoolResource> {
        Arc::new(PoolResource::new(
            PoolAllocator::builder()
                .max_block_size(256)
                .exhaustion_policy(ExhaustionPolicy::ReturnError)
                .build(),
        ))
    }

    #[test]
    fn grows_to_the_largest_block() {
        let resource = small_block_resource();
        let limit = resource.source().max_request_size();
        let mut string = PoolString::new_in(PolymorphicAllocator::new(resource));

        string.try_push_str(&"a".repeat(200)).unwrap();
        // Doubling the capacity would ask for 400 bytes.
        string.try_push_str(&"b".repeat(limit - 200)).unwrap();
        assert_eq!(string.len(), limit);

        string.try_push_str("c").unwrap_err();
        assert_eq!(string.len(), limit);
    }

    #[test]
    fn infallible_growth_reaches_the_largest_block() {
        let resource = small_block_resource();
        let limit = resource.source().max_request_size();
        let mut string = PoolString::new_in(PolymorphicAllocator::new(resource));

        string.push_str(&"a".repeat(200));
        string.extend((200..limit).map(|_| 'b'));

        assert_eq!(string.len(), limit);
        assert!(string.ends_with('b'));
    }

    #[test]
    fn wide_string_grows_to_the_largest_block() {
        let resource = small_block_resource();
        let limit = resource.source().max_request_size() / size_of::<u16>();
        let mut wide = PoolWideString::new_in(PolymorphicAllocator::new(resource));

        wide.try_push_str(&"a".repeat(100)).unwrap();
        wide.try_push_str(&"b".repeat(limit - 100)).unwrap();
        assert_eq!(wide.len(), limit);

        wide.try_push_str("c").unwrap_err();
        assert_eq!(wide.len(), limit);
    }

    #[test]
    fn wide_string_encodes_utf16() {
        let mut wide = PoolWideString::from_str_in("wide", Global);
        wide.push('😀');
        wide += "!";

        assert_eq!(wide.len(), 7);
        assert_eq!(wide.as_slice().first(), Some(&u16::from(b'w')));
        assert_eq!(wide, "wide😀!");
        assert_eq!(wide.to_string_lossy(), "wide😀!");
        assert_eq!(wide.to_string(), "wide😀!");
    }

    #[test]
    fn wide_string_replaces_unpaired_surrogates() {
        let unpaired: [u16; 2] = [0xD800, u16::from(b'a')];

        let mut wide = PoolWideString::new_in(Global);
        wide.units.extend_from_slice(&unpaired);

        assert_eq!(wide.to_string_lossy(), "\u{FFFD}a");
        assert_eq!(format!("{wide}"), "\u{FFFD}a");
    }

    #[test]
    fn wide_strings_compare_by_units() {
        let resource = Arc::new(PoolResource::default());
        let alloc = PolymorphicAllocator::new(resource);

        let a = PoolWideString::from_str_in("abc", alloc.clone());
        let b = PoolWideString::from_str_in("abd", alloc);
        let c = PoolWideString::from_str_in("abc", Global);

        assert!(a < b);
        assert_eq!(a, c);
        assert_eq!(hash_of(&a), hash_of(&a.clone()));
    }
}
