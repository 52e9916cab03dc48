//! Rule lists that decide, per destination, whether a proxy connects
//! directly or forwards through its upstream.
//!
//! Two formats are supported:
//!
//!   * [`AutoProxyManager`] reads the ADBlock-style lists that browser
//!     "auto proxy" extensions use (`||example.com`, `|https://host`,
//!     `/regex/`, `@@` exceptions).
//!   * [`ProxyRuleManager`] holds plain regular expressions in a white-list
//!     or black-list, plus ignore rules that always win.
//!
//! Both implement [`RuleMatcher`], which is all a proxy session needs.
//! All methods take `&self`, so a rule list can be shared between
//! sessions and reloaded in place while they run.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]
#![deny(clippy::await_holding_lock)]

mod auto;
mod err;
mod regex_list;

pub use auto::AutoProxyManager;
pub use err::Error;
pub use regex_list::{Mode, ProxyRuleManager};

use std::path::Path;

/// A Result type for the proxy_rules crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Something that can decide whether traffic to a destination should go
/// through the upstream proxy.
pub trait RuleMatcher: Send + Sync {
    /// Return true if a connection to `host:port` should be forwarded to
    /// the upstream proxy, and false if it should be made directly.
    fn matches(&self, host: &str, port: u16) -> bool;

    /// Throw away the current rules and load new ones from `path`,
    /// returning how many were loaded.
    fn reload_from_file(&self, path: &Path) -> Result<usize>;
}

/// Read `path` and return its lines.
///
/// Both `\n` and `\r\n` line endings are accepted.
fn read_lines(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::from_io(path, e))?;
    Ok(text.lines().map(str::to_string).collect())
}
