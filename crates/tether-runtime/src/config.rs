//! Build configuration resolution.
//!
//! A function declares its build properties loosely (strings, optional
//! booleans, raw JSON). [`BuildDefaults::resolve`] overlays them on the
//! session's defaults and produces one immutable [`ResolvedBuildConfig`].
//!
//! Priority: explicit function property > session default > language default
//! (`BuildDefaults::default()`).

use crate::error::{BuildError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Builds allowed to run at once when nothing overrides it.
pub const DEFAULT_BUILD_CONCURRENCY: usize = 4;

/// ECMAScript target accepted by the bundler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    EsNext,
    Es5,
    Es2015,
    Es2016,
    Es2017,
    Es2018,
    Es2019,
    Es2020,
    Es2021,
    Es2022,
    Es2023,
}

impl Target {
    /// Case-insensitive lookup; `es6` is an alias for `es2015`.
    pub fn lookup(name: &str) -> Option<Self> {
        let target = match name.trim().to_ascii_lowercase().as_str() {
            "esnext" => Target::EsNext,
            "es5" => Target::Es5,
            "es6" | "es2015" => Target::Es2015,
            "es2016" => Target::Es2016,
            "es2017" => Target::Es2017,
            "es2018" => Target::Es2018,
            "es2019" => Target::Es2019,
            "es2020" => Target::Es2020,
            "es2021" => Target::Es2021,
            "es2022" => Target::Es2022,
            "es2023" => Target::Es2023,
            _ => return None,
        };
        Some(target)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Target::EsNext => "esnext",
            Target::Es5 => "es5",
            Target::Es2015 => "es2015",
            Target::Es2016 => "es2016",
            Target::Es2017 => "es2017",
            Target::Es2018 => "es2018",
            Target::Es2019 => "es2019",
            Target::Es2020 => "es2020",
            Target::Es2021 => "es2021",
            Target::Es2022 => "es2022",
            Target::Es2023 => "es2023",
        }
    }
}

/// Source map emission mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMap {
    None,
    Inline,
    Linked,
    External,
    Both,
}

impl SourceMap {
    /// Case-insensitive lookup of the string spellings.
    ///
    /// `none` is deliberately absent: disabling maps is spelled `false`.
    pub fn lookup(name: &str) -> Option<Self> {
        let mode = match name.trim().to_ascii_lowercase().as_str() {
            "inline" => SourceMap::Inline,
            "linked" => SourceMap::Linked,
            "external" => SourceMap::External,
            "both" => SourceMap::Both,
            _ => return None,
        };
        Some(mode)
    }

    /// Bundler flag value, `None` when maps are disabled.
    pub fn flag(&self) -> Option<&'static str> {
        match self {
            SourceMap::None => None,
            SourceMap::Inline => Some("inline"),
            SourceMap::Linked => Some("linked"),
            SourceMap::External => Some("external"),
            SourceMap::Both => Some("both"),
        }
    }
}

/// How the bundler treats files with a given extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Loader {
    Js,
    Jsx,
    Ts,
    Tsx,
    Css,
    Json,
    Text,
    Base64,
    File,
    DataUrl,
    Binary,
}

impl Loader {
    pub fn lookup(name: &str) -> Option<Self> {
        let loader = match name.trim().to_ascii_lowercase().as_str() {
            "js" => Loader::Js,
            "jsx" => Loader::Jsx,
            "ts" => Loader::Ts,
            "tsx" => Loader::Tsx,
            "css" => Loader::Css,
            "json" => Loader::Json,
            "text" => Loader::Text,
            "base64" => Loader::Base64,
            "file" => Loader::File,
            "dataurl" => Loader::DataUrl,
            "binary" => Loader::Binary,
            _ => return None,
        };
        Some(loader)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Loader::Js => "js",
            Loader::Jsx => "jsx",
            Loader::Ts => "ts",
            Loader::Tsx => "tsx",
            Loader::Css => "css",
            Loader::Json => "json",
            Loader::Text => "text",
            Loader::Base64 => "base64",
            Loader::File => "file",
            Loader::DataUrl => "dataurl",
            Loader::Binary => "binary",
        }
    }
}

/// Module format of the emitted bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Esm,
    Cjs,
}

impl Format {
    pub fn lookup(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "esm" => Some(Format::Esm),
            "cjs" => Some(Format::Cjs),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Esm => "esm",
            Format::Cjs => "cjs",
        }
    }

    /// File extension of the emitted entry chunk.
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Esm => "mjs",
            Format::Cjs => "cjs",
        }
    }
}

/// Build properties a function declares for the Node.js runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeProperties {
    /// Extension (`.png`) to loader name (`file`)
    pub loader: BTreeMap<String, String>,
    /// Packages installed into the output instead of bundled
    pub install: Vec<String>,
    pub banner: String,
    pub esbuild: EsbuildOptions,
    pub minify: bool,
    pub format: String,
    pub target: String,
    pub source_map: Option<bool>,
    pub splitting: bool,
}

/// Bundler-level overrides nested under `esbuild`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EsbuildOptions {
    pub target: String,
    /// Either a mode string or a boolean, kept raw until resolution
    pub sourcemap: Option<serde_json::Value>,
    pub keep_names: Option<bool>,
    pub define: BTreeMap<String, String>,
    pub banner: BTreeMap<String, String>,
    pub external: Vec<String>,
    pub node_paths: Vec<String>,
    pub main_fields: Vec<String>,
    pub conditions: Vec<String>,
}

impl EsbuildOptions {
    pub fn resolve_target(&self, fallback: Target) -> Target {
        Target::lookup(&self.target).unwrap_or(fallback)
    }

    /// A string wins over a boolean; `false` disables maps regardless of the
    /// fallback; anything unrecognized falls back.
    pub fn resolve_sourcemap(&self, fallback: SourceMap) -> SourceMap {
        match &self.sourcemap {
            Some(serde_json::Value::String(mode)) => SourceMap::lookup(mode).unwrap_or(fallback),
            Some(serde_json::Value::Bool(true)) => SourceMap::Linked,
            Some(serde_json::Value::Bool(false)) => SourceMap::None,
            _ => fallback,
        }
    }

    pub fn resolve_keep_names(&self, fallback: bool) -> bool {
        self.keep_names.unwrap_or(fallback)
    }

    pub fn resolve_main_fields(&self, fallback: &[String]) -> Vec<String> {
        replace_if_present(&self.main_fields, fallback)
    }

    pub fn resolve_conditions(&self, fallback: &[String]) -> Vec<String> {
        replace_if_present(&self.conditions, fallback)
    }

    pub fn resolve_external(&self, fallback: &[String]) -> Vec<String> {
        replace_if_present(&self.external, fallback)
    }

    pub fn resolve_node_paths(&self, fallback: &[String]) -> Vec<String> {
        replace_if_present(&self.node_paths, fallback)
    }
}

fn replace_if_present(value: &[String], fallback: &[String]) -> Vec<String> {
    if value.is_empty() {
        fallback.to_vec()
    } else {
        value.to_vec()
    }
}

/// Session-wide defaults applied beneath every function's properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildDefaults {
    pub target: Target,
    pub sourcemap: SourceMap,
    pub keep_names: bool,
    pub format: Format,
    pub main_fields: Vec<String>,
    pub conditions: Vec<String>,
    pub external: Vec<String>,
    pub node_paths: Vec<String>,
}

impl Default for BuildDefaults {
    fn default() -> Self {
        Self {
            target: Target::EsNext,
            sourcemap: SourceMap::Linked,
            keep_names: true,
            format: Format::Esm,
            main_fields: vec!["module".to_string(), "main".to_string()],
            conditions: Vec::new(),
            external: Vec::new(),
            node_paths: Vec::new(),
        }
    }
}

impl BuildDefaults {
    /// Overlays `props` on these defaults.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::InvalidConfig`] for an unknown loader name or
    /// output format.
    pub fn resolve(&self, props: &NodeProperties) -> Result<ResolvedBuildConfig> {
        let mut loaders = BTreeMap::new();
        for (extension, name) in &props.loader {
            let loader = Loader::lookup(name).ok_or_else(|| BuildError::InvalidConfig {
                field: format!("loader[{}]", extension),
                value: name.clone(),
                hint: "Use one of: js, jsx, ts, tsx, css, json, text, base64, file, dataurl, binary"
                    .to_string(),
            })?;
            let extension = if extension.starts_with('.') {
                extension.clone()
            } else {
                format!(".{}", extension)
            };
            loaders.insert(extension, loader);
        }

        let format = if props.format.trim().is_empty() {
            self.format
        } else {
            Format::lookup(&props.format).ok_or_else(|| BuildError::InvalidConfig {
                field: "format".to_string(),
                value: props.format.clone(),
                hint: "Use 'esm' or 'cjs'".to_string(),
            })?
        };

        let target_fallback = Target::lookup(&props.target).unwrap_or(self.target);
        let sourcemap_fallback = match props.source_map {
            Some(true) => SourceMap::Linked,
            Some(false) => SourceMap::None,
            None => self.sourcemap,
        };

        let esbuild = &props.esbuild;
        let mut external = esbuild.resolve_external(&self.external);
        for package in &props.install {
            if !external.contains(package) {
                external.push(package.clone());
            }
        }

        let banner = esbuild
            .banner
            .get("js")
            .filter(|b| !b.is_empty())
            .cloned()
            .or_else(|| (!props.banner.is_empty()).then(|| props.banner.clone()));

        Ok(ResolvedBuildConfig {
            loaders,
            install: props.install.clone(),
            target: esbuild.resolve_target(target_fallback),
            sourcemap: esbuild.resolve_sourcemap(sourcemap_fallback),
            keep_names: esbuild.resolve_keep_names(self.keep_names),
            format,
            main_fields: esbuild.resolve_main_fields(&self.main_fields),
            conditions: esbuild.resolve_conditions(&self.conditions),
            external,
            node_paths: esbuild.resolve_node_paths(&self.node_paths),
            define: esbuild.define.clone(),
            banner,
            minify: props.minify,
            splitting: props.splitting,
        })
    }
}

/// Fully resolved, immutable settings for one build.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBuildConfig {
    pub loaders: BTreeMap<String, Loader>,
    pub install: Vec<String>,
    pub target: Target,
    pub sourcemap: SourceMap,
    pub keep_names: bool,
    pub format: Format,
    pub main_fields: Vec<String>,
    pub conditions: Vec<String>,
    pub external: Vec<String>,
    pub node_paths: Vec<String>,
    pub define: BTreeMap<String, String>,
    pub banner: Option<String>,
    pub minify: bool,
    pub splitting: bool,
}

/// Number of builds allowed to run at once.
///
/// A function-specific override beats the global one; zero is ignored.
pub fn concurrency_limit(function: Option<usize>, global: Option<usize>) -> usize {
    for (name, value) in [
        ("build_concurrency_function", function),
        ("build_concurrency", global),
    ] {
        match value {
            Some(0) => tracing::warn!(setting = name, "ignoring zero build concurrency"),
            Some(limit) => return limit,
            None => {}
        }
    }
    DEFAULT_BUILD_CONCURRENCY
}
