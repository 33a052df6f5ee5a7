use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use minijinja::value::ValueKind;
use minijinja::{Environment, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Templates above this size are rejected before parsing.
pub const MAX_TEMPLATE_SIZE: usize = 10 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template is {0} bytes, limit is {MAX_TEMPLATE_SIZE}")]
    TooLarge(usize),
    #[error("template error: {0}")]
    Render(#[from] minijinja::Error),
}

/// Variables and helper state visible to one render.
///
/// Every context carries `Today` and `ProjectRoot`; the constructors add the
/// variables specific to rules, commands and session notes.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    project_root: Option<PathBuf>,
    argv: Vec<String>,
    vars: BTreeMap<String, Value>,
}

impl TemplateContext {
    pub fn new(project_root: Option<&Path>) -> Self {
        let mut vars = BTreeMap::new();
        vars.insert("Today".to_string(), Value::from(today()));
        vars.insert(
            "ProjectRoot".to_string(),
            Value::from(
                project_root
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ),
        );
        Self {
            project_root: project_root.map(Path::to_path_buf),
            argv: Vec::new(),
            vars,
        }
    }

    /// Context for a rule's `send`: the matched content is `Command`.
    pub fn for_rule(project_root: Option<&Path>, matched: &str) -> Self {
        Self::new(project_root).with("Command", matched)
    }

    /// Context for a prompt command. `argv[0]` is the command name.
    pub fn for_command(project_root: Option<&Path>, args: &str, argv: Vec<String>) -> Self {
        let name = argv.first().cloned().unwrap_or_default();
        let mut ctx = Self::new(project_root)
            .with("Name", name)
            .with("Args", args)
            .with("Argv", Value::from_serialize(&argv));
        ctx.argv = argv;
        ctx
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    /// Positional argument count, not counting the command name.
    pub fn argc(&self) -> usize {
        self.argv.len().saturating_sub(1)
    }

    fn environment<'source>(&self) -> Environment<'source> {
        let mut env = Environment::new();
        // Booleans print as `true`/`false` rather than Python's `True`.
        env.set_formatter(|out, state, value| {
            if value.kind() == ValueKind::Bool {
                out.write_str(if value.is_true() { "true" } else { "false" })?;
                Ok(())
            } else {
                minijinja::escape_formatter(out, state, value)
            }
        });

        env.add_global("argc", Value::from(self.argc() as u64));

        let argv = self.argv.clone();
        env.add_function("argv", move |i: i64| -> String {
            usize::try_from(i)
                .ok()
                .and_then(|i| argv.get(i).cloned())
                .unwrap_or_default()
        });

        let root = self.project_root.clone();
        env.add_function("readFile", move |rel: String| -> String {
            root.as_deref()
                .and_then(|root| resolve_under(root, &rel))
                .and_then(|path| fs::read(path).ok())
                .map(encode_contents)
                .unwrap_or_default()
        });

        let root = self.project_root.clone();
        env.add_function("testPath", move |rel: String| -> bool {
            root.as_deref()
                .and_then(|root| resolve_under(root, &rel))
                .is_some()
        });

        env
    }
}

/// Render `template` against `ctx`.
pub fn render(template: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
    if template.len() > MAX_TEMPLATE_SIZE {
        return Err(TemplateError::TooLarge(template.len()));
    }
    let env = ctx.environment();
    let tmpl = env.template_from_str(template)?;
    Ok(tmpl.render(&ctx.vars)?)
}

/// Current local date as `YYYY-MM-DD`.
pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// Resolve `rel` inside `root`, refusing absolute paths, `..` components and
/// symlinks that lead outside the root. The path must exist.
fn resolve_under(root: &Path, rel: &str) -> Option<PathBuf> {
    let rel_path = Path::new(rel);
    if rel.is_empty()
        || rel_path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return None;
    }
    let root = root.canonicalize().ok()?;
    let resolved = root.join(rel_path).canonicalize().ok()?;
    resolved.starts_with(&root).then_some(resolved)
}

fn encode_contents(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => format!(
            "data:application/octet-stream;base64,{}",
            STANDARD.encode(e.into_bytes())
        ),
    }
}
