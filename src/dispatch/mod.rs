use crate::builtins::{Builtin, ProjectState};
use crate::cache::Cache;
use crate::config::{Config, Generate, GenerateMode, RuleEvent};
use crate::enhancer::Enhancer;
use crate::generator::MessageGenerator;
use crate::matcher::{self, Payload};
use crate::project::Project;
use crate::store::KvStore;
use crate::template::{self, TemplateContext};
use crate::transcript;
use crate::types::{Event, PromptEvent, Response, SessionSource, SessionStartEvent, ToolEvent};
use anyhow::{Context, Result};
use std::path::Path;
use std::rc::Rc;

/// Routes one classified event to its handler.
pub struct Dispatcher<'g> {
    config: Config,
    project: Project,
    /// `None` when the database could not be opened; enhancement and the
    /// built-in flags are then unavailable.
    store: Option<Rc<dyn KvStore>>,
    generator: &'g dyn MessageGenerator,
}

impl<'g> Dispatcher<'g> {
    pub fn new(
        config: Config,
        project: Project,
        store: Option<Rc<dyn KvStore>>,
        generator: &'g dyn MessageGenerator,
    ) -> Self {
        Self {
            config,
            project,
            store,
            generator,
        }
    }

    pub fn dispatch(&self, event: &Event) -> Result<Response> {
        tracing::debug!(event = event.name(), project = %self.project.id, "dispatching");
        match event {
            Event::PreToolUse(e) => self.handle_pre_tool_use(e),
            Event::PostToolUse(e) => self.handle_post_tool_use(e),
            Event::UserPromptSubmit(e) => self.handle_user_prompt_submit(e),
            Event::SessionStart(e) => self.handle_session_start(e),
        }
    }

    // ---------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------

    fn root(&self) -> Option<&Path> {
        self.project.root.as_deref()
    }

    fn state(&self) -> Option<ProjectState> {
        self.store
            .as_ref()
            .map(|store| ProjectState::new(store.clone(), self.project.id.as_str()))
    }

    fn is_disabled(&self) -> bool {
        let Some(state) = self.state() else {
            return false;
        };
        state.is_disabled().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "reading disabled flag");
            false
        })
    }

    fn take_skip(&self) -> bool {
        let Some(state) = self.state() else {
            return false;
        };
        state.take_skip().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "reading skip flag");
            false
        })
    }

    fn cache(&self) -> Option<Cache> {
        self.store
            .as_ref()
            .map(|store| Cache::new(store.clone(), self.project.id.as_str()))
    }

    /// Run the enhancer for a rendered message; any failure yields the
    /// message unchanged.
    fn enhance(&self, message: &str, generate: &Generate, pattern: &str) -> String {
        if generate.mode == GenerateMode::Off {
            return message.to_string();
        }
        let Some(cache) = self.cache() else {
            tracing::error!("enhancement cache unavailable, using rendered message");
            return message.to_string();
        };
        // Out-of-range TTLs saturate; the enhancer then stores no expiry.
        let ttl = i64::try_from(self.config.cache_ttl_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or(chrono::Duration::MAX);
        let enhancer = Enhancer::new(cache, self.generator, self.root(), ttl);
        let enhanced = enhancer.enhance_or_original(message, generate, pattern);
        if let Err(e) = enhancer.close() {
            tracing::warn!(error = %e, "flushing enhancement cache");
        }
        enhanced
    }

    fn load_intent(&self, event: &ToolEvent) -> String {
        let Some(path) = &event.transcript_path else {
            return String::new();
        };
        transcript::extract_intent(path, event.tool_use_id.as_deref()).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "reading intent from transcript");
            String::new()
        })
    }

    fn render_rule_message(&self, send: &str, pattern: &str, matched: &str) -> Result<String> {
        let ctx = TemplateContext::for_rule(self.root(), matched);
        template::render(send, &ctx)
            .with_context(|| format!("rendering message for rule {pattern:?}"))
    }

    // ---------------------------------------------------------------
    // Hook handlers
    // ---------------------------------------------------------------

    fn handle_pre_tool_use(&self, event: &ToolEvent) -> Result<Response> {
        if self.is_disabled() {
            tracing::debug!("bumpers disabled for this project");
            return Ok(Response::Allow);
        }
        let ctx = TemplateContext::new(self.root());
        let payload = Payload::new(&event.tool_input, || self.load_intent(event));

        let rules = self.config.rules_for(RuleEvent::Pre);
        let Some((rule, content)) =
            matcher::find_match(rules, &event.tool_name, &payload, Some(&ctx))
        else {
            return Ok(Response::Allow);
        };
        tracing::debug!(rule = %rule.pattern, tool = %event.tool_name, "rule matched");
        if self.take_skip() {
            tracing::info!(rule = %rule.pattern, "match allowed by armed skip");
            return Ok(Response::Allow);
        }
        let rendered = self.render_rule_message(&rule.send, &rule.pattern, &content)?;
        let message = self.enhance(&rendered, &rule.generate, &rule.pattern);
        Ok(Response::Message(message))
    }

    fn handle_post_tool_use(&self, event: &ToolEvent) -> Result<Response> {
        if self.is_disabled() {
            tracing::debug!("bumpers disabled for this project");
            return Ok(Response::Allow);
        }
        let ctx = TemplateContext::new(self.root());
        let fields = event.tool_response.clone().into_fields();
        let payload = Payload::new(&fields, || self.load_intent(event));

        let rules = self.config.rules_for(RuleEvent::Post);
        let Some((rule, content)) =
            matcher::find_match(rules, &event.tool_name, &payload, Some(&ctx))
        else {
            return Ok(Response::Allow);
        };
        tracing::debug!(rule = %rule.pattern, tool = %event.tool_name, "post rule matched");
        let rendered = self.render_rule_message(&rule.send, &rule.pattern, &content)?;
        let message = self.enhance(&rendered, &rule.generate, &rule.pattern);
        Ok(Response::Message(message))
    }

    fn handle_user_prompt_submit(&self, event: &PromptEvent) -> Result<Response> {
        tracing::debug!(session = ?event.session_id, "prompt submitted");
        let Some(rest) = event
            .prompt
            .strip_prefix(self.config.command_prefix.as_str())
        else {
            return Ok(Response::Allow);
        };
        let argv = tokenize(rest);
        let Some(name) = argv.first() else {
            return Ok(Response::Allow);
        };

        if let Some(builtin) = Builtin::parse(name) {
            return Ok(Response::Block(self.run_builtin(builtin)));
        }

        let Some(command) = self.config.command(name) else {
            tracing::debug!(name = %name, "no such command");
            return Ok(Response::Allow);
        };
        let args = rest
            .trim_start()
            .split_once(char::is_whitespace)
            .map(|(_, args)| args.trim())
            .unwrap_or("");

        let ctx = TemplateContext::for_command(self.root(), args, argv.clone());
        let rendered = template::render(&command.send, &ctx)
            .with_context(|| format!("rendering command {:?}", command.name))?;
        let message = self.enhance(&rendered, &command.generate, &command.name);
        Ok(Response::PromptContext(message))
    }

    fn run_builtin(&self, builtin: Builtin) -> String {
        let Some(state) = self.state() else {
            return "bumpers state is unavailable: the state database could not be opened."
                .to_string();
        };
        state.execute(builtin).unwrap_or_else(|e| {
            tracing::warn!(?builtin, error = %e, "built-in command failed");
            format!("bumpers could not update its state: {e}")
        })
    }

    fn handle_session_start(&self, event: &SessionStartEvent) -> Result<Response> {
        if !matches!(event.source, SessionSource::Startup | SessionSource::Clear) {
            tracing::debug!(source = ?event.source, session = ?event.session_id, "ignoring session start");
            return Ok(Response::Allow);
        }

        match self.cache().map(|cache| cache.clear_session_cache()) {
            Some(Ok(removed)) => tracing::debug!(removed, "session cache cleared"),
            Some(Err(e)) => tracing::warn!(error = %e, "clearing session cache"),
            None => tracing::warn!("session cache unavailable, nothing cleared"),
        }

        let ctx = TemplateContext::new(self.root());
        let mut notes = Vec::with_capacity(self.config.session.len());
        for (i, note) in self.config.session.iter().enumerate() {
            let rendered = template::render(&note.add, &ctx)
                .with_context(|| format!("rendering session note {}", i + 1))?;
            let message = self.enhance(&rendered, &note.generate, &note.add);
            if !message.trim().is_empty() {
                notes.push(message);
            }
        }

        if notes.is_empty() {
            Ok(Response::Allow)
        } else {
            Ok(Response::SessionContext(notes.join("\n")))
        }
    }
}

/// Shell-style split honoring quotes. Unbalanced quotes fall back to a
/// plain whitespace split.
fn tokenize(input: &str) -> Vec<String> {
    shell_words::split(input)
        .unwrap_or_else(|_| input.split_whitespace().map(str::to_string).collect())
}
