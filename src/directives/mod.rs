//! Build directives embedded in assembly source
//!
//! A directive is a comment line of the form `;%key: value`. Directives
//! configure the toolchain for one submission and are stripped from the
//! source before it is written to disk.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;


/// Prefix marking a directive line. `;` starts an assembly comment.
pub const DIRECTIVE_PREFIX: &str = ";%";

/// Tokens of an `args` directive: runs of non-separator characters, where a
/// double-quoted segment may contain separators and escaped characters.
static ARG_TOKEN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?:[^\s,"]|"(?:\\.|[^"])*")+"#).expect("Valid regex pattern"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectiveError {
    #[error("directive on line {line} is missing the ':' separator: {text:?}")]
    MissingSeparator { line: usize, text: String },
}

/// Assembler used for the compile stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilerTool {
    #[default]
    Yasm,
    Nasm,
}

impl CompilerTool {
    pub fn program(&self) -> &'static str {
        match self {
            CompilerTool::Yasm => "yasm",
            CompilerTool::Nasm => "nasm",
        }
    }

    /// Exact, case-sensitive match on the executable name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "yasm" => Some(CompilerTool::Yasm),
            "nasm" => Some(CompilerTool::Nasm),
            _ => None,
        }
    }
}

impl fmt::Display for CompilerTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// Linker used for the link stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkerTool {
    #[default]
    Gcc,
    Ld,
}

impl LinkerTool {
    pub fn program(&self) -> &'static str {
        match self {
            LinkerTool::Gcc => "gcc",
            LinkerTool::Ld => "ld",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "gcc" => Some(LinkerTool::Gcc),
            "ld" => Some(LinkerTool::Ld),
            _ => None,
        }
    }
}

impl fmt::Display for LinkerTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// Toolchain settings for a single submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub verbose: bool,
    pub compiler: CompilerTool,
    pub linker: LinkerTool,
    pub cflags: Vec<String>,
    pub ldflags: Vec<String>,
    pub args: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            verbose: true,
            compiler: CompilerTool::default(),
            linker: LinkerTool::default(),
            cflags: Vec::new(),
            ldflags: Vec::new(),
            args: Vec::new(),
        }
    }
}

impl fmt::Display for BuildConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{self:?}"),
        }
    }
}

/// Result of stripping directives from a chunk of source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSource {
    pub config: BuildConfig,
    pub code: String,
}

/// Split `source` into its build configuration and the remaining code.
///
/// Directives are applied on top of `defaults` in line order. Every
/// non-directive line is kept verbatim and terminated with `\n`.
pub fn parse_directives(
    source: &str,
    defaults: &BuildConfig,
) -> Result<ParsedSource, DirectiveError> {
    let mut config = defaults.clone();
    let mut code = String::with_capacity(source.len() + 1);

    for (index, line) in source.lines().enumerate() {
        let Some(body) = line.strip_prefix(DIRECTIVE_PREFIX) else {
            code.push_str(line);
            code.push('\n');
            continue;
        };

        let (key, value) = body
            .split_once(':')
            .ok_or_else(|| DirectiveError::MissingSeparator {
                line: index + 1,
                text: line.to_string(),
            })?;
        apply_directive(&mut config, &key.trim().to_lowercase(), value);
    }

    Ok(ParsedSource { config, code })
}

fn apply_directive(config: &mut BuildConfig, key: &str, value: &str) {
    let trimmed = value.trim();
    match key {
        "cflags" => config
            .cflags
            .extend(value.split_whitespace().map(str::to_string)),
        "ldflags" => config
            .ldflags
            .extend(value.split_whitespace().map(str::to_string)),
        "args" => config.args.extend(tokenize_args(value)),
        "verbose" => {
            if matches!(trimmed.to_lowercase().as_str(), "false" | "0") {
                config.verbose = false;
            }
        }
        "compiler" => match CompilerTool::from_name(trimmed) {
            Some(tool) => config.compiler = tool,
            None => tracing::debug!("Ignoring unsupported compiler '{}'", trimmed),
        },
        "linker" => match LinkerTool::from_name(trimmed) {
            Some(tool) => config.linker = tool,
            None => tracing::debug!("Ignoring unsupported linker '{}'", trimmed),
        },
        other => tracing::debug!("Ignoring unknown directive '{}'", other),
    }
}

/// Split an `args` value into program arguments, keeping quoted segments
/// together and stripping their surrounding quotes.
pub fn tokenize_args(value: &str) -> Vec<String> {
    ARG_TOKEN_REGEX
        .find_iter(value)
        .map(|token| token.as_str().trim_matches('"').to_string())
        .collect()
}
