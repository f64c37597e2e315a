use block_pool::Result;

use crate::{
    PoolDeque, PoolList, PoolMap, PoolQueue, PoolSet, PoolString, PoolWideString,
    ResourceRegistry,
};

/// Creates an empty [`PoolList`] from the [global registry][ResourceRegistry::global].
///
/// # Errors
///
/// See [`ResourceRegistry::list()`].
pub fn make_list<T: 'static>() -> Result<PoolList<T>> {
    ResourceRegistry::global().list()
}

/// Creates an empty [`PoolMap`] from the [global registry][ResourceRegistry::global].
///
/// # Errors
///
/// See [`ResourceRegistry::map()`].
pub fn make_map<K: 'static, V: 'static>() -> Result<PoolMap<K, V>> {
    ResourceRegistry::global().map()
}

/// Creates an empty [`PoolSet`] from the [global registry][ResourceRegistry::global].
///
/// # Errors
///
/// See [`ResourceRegistry::set()`].
pub fn make_set<T: 'static>() -> Result<PoolSet<T>> {
    ResourceRegistry::global().set()
}

/// Creates an empty [`PoolDeque`] from the [global registry][ResourceRegistry::global].
///
/// # Errors
///
/// See [`ResourceRegistry::deque()`].
pub fn make_deque<T: 'static>() -> Result<PoolDeque<T>> {
    ResourceRegistry::global().deque()
}

/// Creates an empty [`PoolQueue`] from the [global registry][ResourceRegistry::global].
///
/// # Errors
///
/// See [`ResourceRegistry::queue()`].
pub fn make_queue<T: 'static>() -> Result<PoolQueue<T>> {
    ResourceRegistry::global().queue()
}

/// Creates a [`PoolString`] holding `value` from the [global registry][ResourceRegistry::global].
///
/// # Errors
///
/// See [`ResourceRegistry::string()`].
pub fn make_string(value: &str) -> Result<PoolString> {
    ResourceRegistry::global().string(value)
}

/// Creates a [`PoolWideString`] holding `value` from the
/// [global registry][ResourceRegistry::global].
///
/// # Errors
///
/// See [`ResourceRegistry::wide_string()`].
pub fn make_wide_string(value: &str) -> Result<PoolWideString> {
    ResourceRegistry::global().wide_string(value)
}
