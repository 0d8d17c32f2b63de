//! Operation Identity
//!
//! An [`OperationKey`] names one cacheable operation: the type that owns it, the
//! operation's name and the ordered list of its parameter types. Every view,
//! lifetime override and backing-map assignment in a
//! [`CacheRegistry`](crate::CacheRegistry) is addressed by one.
//!
//! Types are recorded by name ([`core::any::type_name`]) so keys can be built
//! either from real Rust types or from plain strings supplied by a code
//! generator.
//!
//! # Examples
//!
//! ```
//! use memo_cache::OperationKey;
//!
//! struct Pricing;
//!
//! let typed = OperationKey::of::<Pricing>("quote")
//!     .with_parameter::<u32>()
//!     .with_parameter::<String>();
//! assert_eq!(typed.name(), "quote");
//! assert_eq!(typed.parameters().len(), 2);
//!
//! let named = OperationKey::new("billing::Invoice", "total", ["u64"]);
//! assert_eq!(named.to_string(), "billing::Invoice::total(u64)");
//! ```

use core::any::type_name;
use core::fmt;
use std::sync::Arc;

/// Identity of a cacheable operation.
///
/// Value-equal and immutable: two keys built from the same owner, name and
/// parameter list compare equal and hash identically. Cloning is cheap since
/// every component is reference counted.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct OperationKey {
    owner: Arc<str>,
    name: Arc<str>,
    parameters: Arc<[Arc<str>]>,
}

impl OperationKey {
    /// Creates a key from an owner name, an operation name and parameter type names.
    pub fn new<O, N, I, P>(owner: O, name: N, parameters: I) -> Self
    where
        O: Into<Arc<str>>,
        N: Into<Arc<str>>,
        I: IntoIterator<Item = P>,
        P: Into<Arc<str>>,
    {
        Self {
            owner: owner.into(),
            name: name.into(),
            parameters: parameters.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a parameterless key owned by the type `T`.
    pub fn of<T: ?Sized>(name: impl Into<Arc<str>>) -> Self {
        Self::new(type_name::<T>(), name, core::iter::empty::<Arc<str>>())
    }

    /// Returns a copy of this key with `P` appended to the parameter list.
    #[must_use]
    pub fn with_parameter<P: ?Sized>(self) -> Self {
        self.push_parameter(type_name::<P>())
    }

    fn push_parameter(self, parameter: &str) -> Self {
        let parameters = self
            .parameters
            .iter()
            .cloned()
            .chain(core::iter::once(Arc::from(parameter)))
            .collect();
        Self { parameters, ..self }
    }

    /// Name of the owning type.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Name of the operation.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter type names, in declaration order.
    pub fn parameters(&self) -> &[Arc<str>] {
        &self.parameters
    }

    /// Returns `true` when owner and operation name match, ignoring parameters.
    ///
    /// Useful for addressing every overload of an operation at once.
    pub fn partial_match(&self, owner: &str, name: &str) -> bool {
        &*self.owner == owner && &*self.name == name
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}(", self.owner, self.name)?;
        for (i, parameter) in self.parameters.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(parameter)?;
        }
        f.write_str(")")
    }
}

impl fmt::Debug for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OperationKey")
            .field(&format_args!("{self}"))
            .finish()
    }
}
