//! Wrapping async functions with cache-aside behaviour

use std::fmt;
use std::future::Future;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::cache_service::CacheService;
use crate::domain::cache::{CacheKeyParams, CacheOptions, LoadError};
use crate::domain::DomainError;

/// Arguments of a cached call, as seen by key derivation
///
/// Tuples of serializable values map to positional arguments in order.
/// Implement it by hand to contribute named arguments or to skip fields.
pub trait KeyArgs {
    fn append_to(&self, params: CacheKeyParams) -> CacheKeyParams;
}

impl KeyArgs for () {
    fn append_to(&self, params: CacheKeyParams) -> CacheKeyParams {
        params
    }
}

macro_rules! impl_key_args_for_tuple {
    ($($name:ident => $idx:tt),+) => {
        impl<$($name: Serialize),+> KeyArgs for ($($name,)+) {
            fn append_to(&self, params: CacheKeyParams) -> CacheKeyParams {
                params$(.with_arg(&self.$idx))+
            }
        }
    };
}

impl_key_args_for_tuple!(A => 0);
impl_key_args_for_tuple!(A => 0, B => 1);
impl_key_args_for_tuple!(A => 0, B => 1, C => 2);
impl_key_args_for_tuple!(A => 0, B => 1, C => 2, D => 3);
impl_key_args_for_tuple!(A => 0, B => 1, C => 2, D => 3, E => 4);
impl_key_args_for_tuple!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5);

/// An async function whose results are cached under a fixed key prefix
///
/// The wrapped function is untouched; each call derives a key from the
/// prefix and its arguments and goes through
/// [`CacheService::get_or_load_with`].
#[derive(Clone)]
pub struct CachedFn<F> {
    cache: CacheService,
    prefix: String,
    options: CacheOptions,
    func: F,
}

impl<F> fmt::Debug for CachedFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedFn")
            .field("prefix", &self.prefix)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<F> CachedFn<F> {
    /// Wraps `func`, keying its entries under `name`
    pub fn new(cache: CacheService, name: impl Into<String>, func: F) -> Self {
        let options = cache.defaults().clone();
        Self {
            cache,
            prefix: name.into(),
            options,
            func,
        }
    }

    pub fn with_options(mut self, options: CacheOptions) -> Self {
        self.options = options;
        self
    }

    /// Overrides the key prefix derived from the function name
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    fn params_for<A: KeyArgs>(&self, args: &A) -> CacheKeyParams {
        args.append_to(CacheKeyParams::new(self.prefix.as_str()))
    }

    /// Calls the function through the cache
    pub async fn call<A, V, E, Fut>(&self, args: A) -> Result<V, LoadError<E>>
    where
        A: KeyArgs,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<V, E>>,
        V: Serialize + DeserializeOwned + Send,
    {
        let params = self.params_for(&args);

        self.cache
            .get_or_load_with(&params, &self.options, || (self.func)(args))
            .await
    }

    /// Drops the cached result for `args`
    pub async fn invalidate<A: KeyArgs>(&self, args: &A) -> Result<bool, DomainError> {
        self.cache
            .delete_with(&self.params_for(args), &self.options)
            .await
    }

    /// Reads the cached result for `args` without calling the function
    pub async fn peek<A, V>(&self, args: &A) -> Result<Option<V>, DomainError>
    where
        A: KeyArgs,
        V: DeserializeOwned,
    {
        self.cache
            .get_with(&self.params_for(args), &self.options)
            .await
    }
}

impl CacheService {
    /// Wraps `func` so its calls are cached under `name`
    pub fn wrap<F>(&self, name: impl Into<String>, func: F) -> CachedFn<F> {
        CachedFn::new(self.clone(), name, func)
    }
}

/// Wraps a function, using its path as written as the key prefix
///
/// The prefix is the same wherever the macro is invoked, as long as the
/// function is named by the same path; pass a fully qualified path (or an
/// explicit name) when several modules wrap the same function.
///
/// ```ignore
/// let find_book = cached_fn!(cache, crate::books::find_book);
/// let by_name = cached_fn!(cache, crate::books::find_book, "book:detail");
/// let book = find_book.call((42u64,)).await?;
/// ```
#[macro_export]
macro_rules! cached_fn {
    ($cache:expr, $func:path) => {
        $crate::CachedFn::new(
            $crate::CacheService::clone(&$cache),
            stringify!($func),
            $func,
        )
    };
    ($cache:expr, $func:path, $name:expr) => {
        $crate::CachedFn::new($crate::CacheService::clone(&$cache), $name, $func)
    };
}
