use crate::builtins::Builtin;
use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// File names searched for in the project root, in order.
pub const CONFIG_CANDIDATES: &[&str] = &[
    "bumpers.yml",
    "bumpers.yaml",
    "bumpers.toml",
    ".claude/bumpers.yml",
];

/// Tool regex used when a rule leaves `tool` blank.
pub const DEFAULT_TOOL_PATTERN: &str = "^Bash$";

/// Virtual source name resolved from the transcript instead of tool input.
pub const INTENT_SOURCE: &str = "#intent";

// ===================================================================
// Generate config
// ===================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerateMode {
    #[default]
    Off,
    Once,
    Always,
}

impl GenerateMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Once => "once",
            Self::Always => "always",
        }
    }
}

/// AI enhancement settings for a rule, command or note.
///
/// In YAML this is either a bare mode or a mapping:
///
/// ```yaml
/// generate: once
/// # or
/// generate:
///   mode: always
///   prompt: "Rewrite this kindly: {{ Message }}"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "GenerateSpec")]
pub struct Generate {
    pub mode: GenerateMode,
    pub prompt: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GenerateSpec {
    Mode(GenerateMode),
    Detailed {
        #[serde(default)]
        mode: GenerateMode,
        #[serde(default)]
        prompt: Option<String>,
    },
}

impl From<GenerateSpec> for Generate {
    fn from(spec: GenerateSpec) -> Self {
        match spec {
            GenerateSpec::Mode(mode) => Self { mode, prompt: None },
            GenerateSpec::Detailed { mode, prompt } => Self {
                mode,
                prompt: prompt.filter(|p| !p.trim().is_empty()),
            },
        }
    }
}

// ===================================================================
// Rules
// ===================================================================

/// Which hook phase a rule applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleEvent {
    #[default]
    Pre,
    Post,
}

/// Where a rule looks for content to match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// The assistant's reasoning before the tool call, from the transcript.
    Intent,
    /// A named field of the tool input (pre) or tool response (post).
    Field(String),
}

impl Source {
    pub fn parse(raw: &str) -> Self {
        if raw == INTENT_SOURCE {
            Self::Intent
        } else {
            Self::Field(raw.to_string())
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MatchSpec {
    Pattern(String),
    Detailed {
        pattern: String,
        #[serde(default)]
        event: RuleEvent,
        #[serde(default)]
        sources: Vec<String>,
    },
}

#[derive(Deserialize)]
struct RawRule {
    #[serde(rename = "match")]
    matcher: MatchSpec,
    #[serde(default)]
    tool: String,
    send: String,
    #[serde(default)]
    generate: Generate,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub pattern: String,
    /// Tool-name regex; empty means [`DEFAULT_TOOL_PATTERN`].
    pub tool: String,
    pub event: RuleEvent,
    pub sources: Vec<Source>,
    pub send: String,
    pub generate: Generate,
}

impl Rule {
    pub fn tool_pattern(&self) -> &str {
        if self.tool.trim().is_empty() {
            DEFAULT_TOOL_PATTERN
        } else {
            &self.tool
        }
    }

    fn from_raw(raw: RawRule) -> Self {
        let (pattern, event, sources) = match raw.matcher {
            MatchSpec::Pattern(p) => (p, RuleEvent::Pre, Vec::new()),
            MatchSpec::Detailed {
                pattern,
                event,
                sources,
            } => (pattern, event, sources),
        };
        Self {
            pattern,
            tool: raw.tool,
            event,
            sources: sources.iter().map(|s| Source::parse(s)).collect(),
            send: raw.send,
            generate: raw.generate,
        }
    }

    /// Check that the rule can participate in matching.
    fn validate(&self) -> Result<()> {
        if self.pattern.is_empty() {
            bail!("pattern is empty");
        }
        // Templated patterns are rendered per event and compiled then.
        if !self.pattern.contains("{{") {
            Regex::new(&self.pattern)
                .with_context(|| format!("invalid pattern {:?}", self.pattern))?;
        }
        Regex::new(&format!("(?i){}", self.tool_pattern()))
            .with_context(|| format!("invalid tool pattern {:?}", self.tool))?;
        if self.send.trim().is_empty() {
            bail!("send is empty");
        }
        Ok(())
    }
}

// ===================================================================
// Commands and session notes
// ===================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct Command {
    pub name: String,
    pub send: String,
    #[serde(default)]
    pub generate: Generate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionNote {
    pub add: String,
    #[serde(default)]
    pub generate: Generate,
}

// ===================================================================
// Config
// ===================================================================

#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    command_prefix: Option<String>,
    #[serde(default)]
    cache_ttl_hours: Option<u64>,
    #[serde(default)]
    generate_timeout_secs: Option<u64>,
    #[serde(default)]
    rules: Vec<Value>,
    #[serde(default)]
    commands: Vec<Value>,
    #[serde(default)]
    session: Vec<Value>,
}

/// The validated rule set for one invocation.
#[derive(Debug, Clone)]
pub struct Config {
    pub command_prefix: String,
    pub cache_ttl_hours: u64,
    pub generate_timeout_secs: u64,
    pub rules: Vec<Rule>,
    pub commands: Vec<Command>,
    pub session: Vec<SessionNote>,
    /// Entries dropped during validation, one message each.
    pub warnings: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command_prefix: "$".into(),
            cache_ttl_hours: 24,
            generate_timeout_secs: 30,
            rules: Vec::new(),
            commands: Vec::new(),
            session: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl Config {
    /// Locate the rule file: an explicit path wins, otherwise the first
    /// candidate that exists under `project_root`.
    pub fn locate(explicit: Option<&Path>, project_root: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        let root = project_root.context("no project root to search for a rule file")?;
        CONFIG_CANDIDATES
            .iter()
            .map(|name| root.join(name))
            .find(|p| p.is_file())
            .with_context(|| format!("no bumpers config found in {}", root.display()))
    }

    /// Read and validate a rule file. YAML unless the extension is `.toml`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        let config = if is_toml {
            Self::from_toml(&contents)
        } else {
            Self::from_yaml(&contents)
        };
        config.with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        // An empty document is a valid, empty rule set.
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: RawConfig = serde_yaml_ng::from_str(contents)?;
        Ok(Self::from_raw(raw))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(contents)?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawConfig) -> Self {
        let defaults = Self::default();
        let mut warnings = Vec::new();

        let mut rules = Vec::new();
        for (i, value) in raw.rules.into_iter().enumerate() {
            let rule = serde_json::from_value::<RawRule>(value)
                .map_err(anyhow::Error::from)
                .map(Rule::from_raw)
                .and_then(|rule| rule.validate().map(|()| rule));
            match rule {
                Ok(rule) => rules.push(rule),
                Err(e) => warnings.push(format!("rule {}: {e:#}", i + 1)),
            }
        }

        let mut commands: Vec<Command> = Vec::new();
        let mut seen = HashSet::new();
        for (i, value) in raw.commands.into_iter().enumerate() {
            let command = match serde_json::from_value::<Command>(value) {
                Ok(c) => c,
                Err(e) => {
                    warnings.push(format!("command {}: {e}", i + 1));
                    continue;
                }
            };
            let problem = if command.name.trim().is_empty()
                || command.name.contains(char::is_whitespace)
            {
                Some(format!("invalid name {:?}", command.name))
            } else if Builtin::parse(&command.name).is_some() {
                Some(format!("name {:?} is reserved", command.name))
            } else if !seen.insert(command.name.clone()) {
                Some(format!("duplicate name {:?}", command.name))
            } else if command.send.trim().is_empty() {
                Some("send is empty".to_string())
            } else {
                None
            };
            match problem {
                Some(p) => warnings.push(format!("command {}: {p}", i + 1)),
                None => commands.push(command),
            }
        }

        let mut session = Vec::new();
        for (i, value) in raw.session.into_iter().enumerate() {
            match serde_json::from_value::<SessionNote>(value) {
                Ok(note) => session.push(note),
                Err(e) => warnings.push(format!("session note {}: {e}", i + 1)),
            }
        }

        Self {
            command_prefix: raw
                .command_prefix
                .filter(|p| !p.is_empty())
                .unwrap_or(defaults.command_prefix),
            cache_ttl_hours: raw.cache_ttl_hours.unwrap_or(defaults.cache_ttl_hours),
            generate_timeout_secs: raw
                .generate_timeout_secs
                .unwrap_or(defaults.generate_timeout_secs),
            rules,
            commands,
            session,
            warnings,
        }
    }

    pub fn rules_for(&self, event: RuleEvent) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(move |r| r.event == event)
    }

    pub fn command(&self, name: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.name == name)
    }
}
