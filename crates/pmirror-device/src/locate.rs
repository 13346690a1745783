//! External tool path resolution
//!
//! Finds the adb and scrcpy executables through an ordered candidate list:
//! bundled copies, application-relative directories, SDK environment
//! variables, OS default SDK locations, and finally PATH. Results are cached
//! behind a lock; `refresh()` drops the cache so a changed environment can
//! be picked up before a session start.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use pmirror_core::prelude::*;

/// How many ancestor directories of the executable to probe. Covers running
/// from a build tree like target/debug.
const ANCESTOR_SEARCH_DEPTH: usize = 5;

/// The external tools phone-mirror shells out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Adb,
    Scrcpy,
}

impl Tool {
    pub fn name(&self) -> &'static str {
        match self {
            Tool::Adb => "adb",
            Tool::Scrcpy => "scrcpy",
        }
    }

    /// Executable file name with the OS-specific suffix applied.
    pub fn executable_name(&self) -> String {
        format!("{}{}", self.name(), env::consts::EXE_SUFFIX)
    }

    /// Conventional subfolder the tool ships in next to the application.
    fn bundle_dir(&self) -> &'static str {
        match self {
            Tool::Adb => "platform-tools",
            Tool::Scrcpy => "scrcpy",
        }
    }

    /// Whether Android SDK install locations apply to this tool.
    fn lives_in_sdk(&self) -> bool {
        matches!(self, Tool::Adb)
    }
}

/// Paths to pre-extracted bundled tool copies, supplied by an external
/// resource provider. Highest-priority candidates when present.
#[derive(Debug, Clone, Default)]
pub struct BundledTools {
    pub adb: Option<PathBuf>,
    pub scrcpy: Option<PathBuf>,
}

impl BundledTools {
    fn get(&self, tool: Tool) -> Option<&PathBuf> {
        match tool {
            Tool::Adb => self.adb.as_ref(),
            Tool::Scrcpy => self.scrcpy.as_ref(),
        }
    }
}

/// Resolves and caches the absolute paths of external tools.
///
/// Resolution never fails: when no candidate exists, [`resolve`] falls back
/// to the bare tool name so a missing tool surfaces through the process
/// runner's launch-failure path as one consistent error surface.
///
/// [`resolve`]: ToolLocator::resolve
#[derive(Debug)]
pub struct ToolLocator {
    bundled: BundledTools,
    cache: Mutex<HashMap<Tool, Option<PathBuf>>>,
}

impl Default for ToolLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolLocator {
    pub fn new() -> Self {
        Self::with_bundled(BundledTools::default())
    }

    /// Create a locator that prefers pre-extracted bundled tool copies.
    pub fn with_bundled(bundled: BundledTools) -> Self {
        Self {
            bundled,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// First existing candidate for the tool, or `None` when nothing is
    /// installed. Cached per locator lifetime.
    pub async fn probe(&self, tool: Tool) -> Option<PathBuf> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(&tool) {
            return cached.clone();
        }

        let found = self.probe_uncached(tool);
        match &found {
            Some(path) => info!("resolved {} to {}", tool.name(), path.display()),
            None => debug!("{} not found in any candidate location", tool.name()),
        }
        cache.insert(tool, found.clone());
        found
    }

    /// Resolve the tool to a runnable path, falling back to the bare
    /// executable name as a last resort.
    pub async fn resolve(&self, tool: Tool) -> PathBuf {
        self.probe(tool)
            .await
            .unwrap_or_else(|| PathBuf::from(tool.executable_name()))
    }

    /// Drop cached results so the next probe re-scans the environment.
    pub async fn refresh(&self) {
        self.cache.lock().await.clear();
    }

    fn probe_uncached(&self, tool: Tool) -> Option<PathBuf> {
        if let Some(found) = self.candidates(tool).into_iter().find(|c| c.is_file()) {
            return Some(found);
        }
        // PATH scan comes after every explicit location.
        which::which(tool.executable_name()).ok()
    }

    /// Ordered candidate list, highest priority first.
    fn candidates(&self, tool: Tool) -> Vec<PathBuf> {
        let exe_name = tool.executable_name();
        let mut candidates = Vec::new();

        // 1. Pre-extracted bundled copy
        if let Some(bundled) = self.bundled.get(tool) {
            candidates.push(bundled.clone());
        }

        // 2. Application directory and its ancestors
        if let Some(app_dir) = application_dir() {
            candidates.push(app_dir.join(tool.bundle_dir()).join(&exe_name));
            candidates.push(app_dir.join(&exe_name));
            for ancestor in app_dir.ancestors().skip(1).take(ANCESTOR_SEARCH_DEPTH) {
                candidates.push(ancestor.join(tool.bundle_dir()).join(&exe_name));
            }
        }

        if tool.lives_in_sdk() {
            // 3. SDK root declared via environment
            if let Some(sdk_root) = env::var_os("ANDROID_HOME")
                .or_else(|| env::var_os("ANDROID_SDK_ROOT"))
                .filter(|v| !v.is_empty())
            {
                candidates.push(
                    PathBuf::from(sdk_root)
                        .join("platform-tools")
                        .join(&exe_name),
                );
            }

            // 4. OS default SDK install location
            if let Some(sdk) = default_sdk_dir() {
                candidates.push(sdk.join("platform-tools").join(&exe_name));
            }
        }

        candidates
    }
}

/// Directory containing the running executable.
fn application_dir() -> Option<PathBuf> {
    let exe = env::current_exe().ok()?;
    let exe = dunce::canonicalize(&exe).unwrap_or(exe);
    exe.parent().map(Path::to_path_buf)
}

/// Default Android SDK install location for the current OS.
fn default_sdk_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        env::var_os("LOCALAPPDATA").map(|base| PathBuf::from(base).join("Android").join("Sdk"))
    }

    #[cfg(target_os = "macos")]
    {
        dirs::home_dir().map(|home| home.join("Library").join("Android").join("sdk"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        dirs::home_dir().map(|home| home.join("Android").join("Sdk"))
    }
}
