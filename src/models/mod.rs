//! Domain entities: Proxy, CheckDefinition, ProxyCheck association, CheckResult.

pub mod check;
pub mod proxy;
pub mod result;

pub use check::{Assertion, AssertionKind, CheckDefinition, CheckOptions, NewCheckDefinition};
pub use proxy::{NewProxy, Proxy, ProxyProtocol, ProxyRow};
pub use result::CheckResult;
