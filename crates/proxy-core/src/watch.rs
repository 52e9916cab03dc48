//! Reload a rule file when it changes.

use crate::Result;
use proxy_rtcompat::{Runtime, SpawnExt};
use proxy_rules::RuleMatcher;

use futures::future::{self, AbortHandle, FutureExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// How often to look at the file, unless told otherwise.
const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// Enough about a file to notice that it changed.
type Fingerprint = Option<(Option<SystemTime>, u64)>;

/// Return the current [`Fingerprint`] of `path`; `None` if it can't be
/// read.
fn fingerprint(path: &Path) -> Fingerprint {
    std::fs::metadata(path)
        .ok()
        .map(|m| (m.modified().ok(), m.len()))
}

/// Watches a rule file and reloads a [`RuleMatcher`] from it on change.
///
/// The file is polled, so two reloads are always at least one interval
/// apart.  A file that disappears or fails to load leaves the loaded rules
/// as they were.
pub struct RuleFileWatcher {
    /// The file to watch.
    path: PathBuf,
    /// Where to load it.
    rules: Arc<dyn RuleMatcher>,
    /// Time between looks.
    interval: Duration,
}

impl RuleFileWatcher {
    /// Construct a watcher that reloads `rules` from `path`.
    pub fn new<P: Into<PathBuf>>(path: P, rules: Arc<dyn RuleMatcher>) -> Self {
        RuleFileWatcher {
            path: path.into(),
            rules,
            interval: DEFAULT_INTERVAL,
        }
    }

    /// Look at the file every `interval` instead of every two seconds.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start watching in a background task.
    ///
    /// The task runs until the returned handle is used to abort it.
    pub fn spawn<R: Runtime>(self, runtime: &R) -> Result<AbortHandle> {
        let (watching, handle) = future::abortable(self.run(runtime.clone()));
        runtime.spawn(watching.map(|_| ()))?;
        Ok(handle)
    }

    /// Poll the file forever.
    async fn run<R: Runtime>(self, runtime: R) {
        let mut seen = fingerprint(&self.path);
        debug!("Watching {} for changes", self.path.display());
        loop {
            runtime.sleep(self.interval).await;
            let now = fingerprint(&self.path);
            if now == seen || now.is_none() {
                continue;
            }
            seen = now;
            match self.rules.reload_from_file(&self.path) {
                Ok(n) => info!("Reloaded {} rules from {}", n, self.path.display()),
                Err(e) => warn!("Couldn't reload {}: {}", self.path.display(), e),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proxy_rtcompat::{test_with_runtime, SleepProvider};
    use proxy_rules::{Mode, ProxyRuleManager};
    use std::io::Write;

    #[test]
    fn reloads_on_change() {
        test_with_runtime(|rt| async move {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("rules.txt");
            std::fs::write(&path, "^one\\.test$\n").unwrap();

            let rules = Arc::new(ProxyRuleManager::new(Mode::WhiteList));
            rules.add_proxy_rules_with_file(&path).unwrap();
            assert!(rules.matches("one.test", 80));
            assert!(!rules.matches("two.test", 80));

            let handle = RuleFileWatcher::new(&path, Arc::clone(&rules) as Arc<dyn RuleMatcher>)
                .with_interval(Duration::from_millis(10))
                .spawn(&rt)
                .unwrap();
            rt.sleep(Duration::from_millis(30)).await;

            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(b"^two\\.test$\n").unwrap();
            drop(f);

            let mut reloaded = false;
            for _ in 0..100 {
                rt.sleep(Duration::from_millis(10)).await;
                if rules.matches("two.test", 80) {
                    reloaded = true;
                    break;
                }
            }
            assert!(reloaded);
            assert!(rules.matches("one.test", 80));

            // A vanished file leaves the rules alone.
            std::fs::remove_file(&path).unwrap();
            rt.sleep(Duration::from_millis(50)).await;
            assert!(rules.matches("two.test", 80));
            handle.abort();
        });
    }
}
