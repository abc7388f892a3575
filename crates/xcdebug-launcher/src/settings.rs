use std::path::PathBuf;

use indexmap::IndexMap;

/// Build settings of a single target, as printed by
/// `xcodebuild -showBuildSettings`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSettings {
    /// Name of the target, if a header was printed.
    pub target: Option<String>,

    values: IndexMap<String, String>,
}

impl BuildSettings {
    /// Parses the settings of every target found in `text`.
    ///
    /// ```text
    /// Build settings for action build and target App:
    ///     ACTION = build
    ///     TARGET_BUILD_DIR = /Users/me/DerivedData/App/Build/Products/Debug
    /// ```
    pub fn parse_all(text: &str) -> Vec<Self> {
        let mut blocks: Vec<Self> = Vec::new();

        for line in text.lines() {
            let line = line.trim();

            if let Some(header) = line.strip_prefix("Build settings for ") {
                let target = header
                    .split_once("target ")
                    .map(|(_, target)| target.trim_end_matches(':').trim().to_owned());

                blocks.push(Self {
                    target,
                    values: IndexMap::new(),
                });
                continue;
            }

            let Some((key, value)) = line.split_once(" = ") else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() || key.contains(char::is_whitespace) {
                continue;
            }

            if blocks.is_empty() {
                blocks.push(Self::default());
            }
            if let Some(block) = blocks.last_mut() {
                block.values.insert(key.to_owned(), value.trim().to_owned());
            }
        }

        blocks
    }

    /// Returns the value of a setting, unless it is unset or empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Returns whether a boolean setting is set to `YES`.
    pub fn is_enabled(&self, key: &str) -> bool {
        self.get(key)
            .is_some_and(|value| value.eq_ignore_ascii_case("YES"))
    }

    /// Returns whether the built application runs sandboxed or with the
    /// hardened runtime, which prevents it from loading libraries outside
    /// of its bundle.
    pub fn is_restricted(&self) -> bool {
        self.is_enabled("ENABLE_APP_SANDBOX") || self.is_enabled("ENABLE_HARDENED_RUNTIME")
    }
}

/// Application bundle produced by a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppTarget {
    /// Path to the `.app` bundle.
    pub bundle_path: PathBuf,

    /// Bundle identifier.
    pub bundle_id: String,

    /// Name of the main executable (and of its process).
    pub executable_name: String,

    /// Path to the main executable.
    pub executable_path: PathBuf,

    /// Directory of the bundle's embedded frameworks.
    pub frameworks_dir: PathBuf,

    /// Directory containing the built products (the bundle included).
    pub products_dir: PathBuf,

    /// Whether the bundle must be patched to load libraries from the
    /// products directory.
    pub restricted: bool,
}

impl AppTarget {
    /// Resolves the application bundle from the output of
    /// `xcodebuild -showBuildSettings`.
    ///
    /// If several targets are listed, the first one producing an `.app`
    /// bundle is used.
    pub fn from_settings(text: &str) -> crate::Result<Self> {
        let blocks = BuildSettings::parse_all(text);

        let settings = blocks
            .iter()
            .find(|block| {
                block
                    .get("FULL_PRODUCT_NAME")
                    .is_some_and(|name| name.ends_with(".app"))
            })
            .or_else(|| blocks.first())
            .ok_or_else(|| {
                crate::Error::LaunchFailure("no build settings were reported".to_owned())
            })?;

        let required = |key: &str| {
            settings.get(key).ok_or_else(|| {
                crate::Error::LaunchFailure(format!("build setting {key} is missing"))
            })
        };

        let products_dir = PathBuf::from(required("TARGET_BUILD_DIR")?);
        let bundle_path = products_dir.join(required("FULL_PRODUCT_NAME")?);
        let bundle_id = required("PRODUCT_BUNDLE_IDENTIFIER")?.to_owned();
        let executable_name = required("EXECUTABLE_NAME")?.to_owned();

        let executable_path = match settings.get("EXECUTABLE_PATH") {
            Some(path) => products_dir.join(path),
            None => bundle_path.join("Contents/MacOS").join(&executable_name),
        };
        let frameworks_dir = match settings.get("FRAMEWORKS_FOLDER_PATH") {
            Some(path) => products_dir.join(path),
            None => bundle_path.join("Contents/Frameworks"),
        };

        Ok(Self {
            bundle_path,
            bundle_id,
            executable_name,
            executable_path,
            frameworks_dir,
            products_dir,
            restricted: settings.is_restricted(),
        })
    }
}
