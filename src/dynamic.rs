//! Literal-or-resolver configuration values.
//!
//! Request parameters and headers may be fixed strings or zero-argument
//! resolvers (sync or async). Resolvers are re-invoked immediately before
//! building every request, so values like short-lived auth tokens stay
//! fresh without reconstructing the stream.

use futures_util::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Type alias for a boxed zero-argument async resolver.
pub type ResolverFn = Arc<dyn Fn() -> BoxFuture<'static, String> + Send + Sync>;

/// A configuration value that is either a constant or resolved per request.
#[derive(Clone)]
pub enum DynamicValue {
    /// A fixed value.
    Literal(String),

    /// A resolver invoked fresh for every outbound request.
    Resolver(ResolverFn),
}

impl DynamicValue {
    /// Wrap an async resolver.
    ///
    /// # Example
    /// ```rust
    /// use shape_link::DynamicValue;
    ///
    /// let token = DynamicValue::resolver(|| async { "Bearer fresh-token".to_string() });
    /// ```
    pub fn resolver<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = String> + Send + 'static,
    {
        Self::Resolver(Arc::new(move || Box::pin(f())))
    }

    /// Wrap a synchronous resolver.
    pub fn resolver_sync<F>(f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self::Resolver(Arc::new(move || {
            let value = f();
            Box::pin(std::future::ready(value))
        }))
    }

    /// Resolve to a concrete value. Literals return immediately; resolvers
    /// are invoked (and awaited) each call.
    pub async fn resolve(&self) -> String {
        match self {
            DynamicValue::Literal(value) => value.clone(),
            DynamicValue::Resolver(f) => f().await,
        }
    }

    /// The literal value, when this is not a resolver.
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            DynamicValue::Literal(value) => Some(value),
            DynamicValue::Resolver(_) => None,
        }
    }
}

impl fmt::Debug for DynamicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DynamicValue::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            DynamicValue::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

impl From<&str> for DynamicValue {
    fn from(value: &str) -> Self {
        Self::Literal(value.to_string())
    }
}

impl From<String> for DynamicValue {
    fn from(value: String) -> Self {
        Self::Literal(value)
    }
}
