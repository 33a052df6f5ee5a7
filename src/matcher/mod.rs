//! Rule matching: which content a rule may look at, and whether it matches.

use crate::config::{Rule, RuleEvent, Source};
use crate::template::{self, TemplateContext};
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::cell::OnceCell;

/// Test one rule against `content` and `tool_name`.
///
/// The tool regex is case-insensitive. A pattern containing `{{` is rendered
/// against `ctx` first, falling back to the literal pattern if rendering
/// fails. Regexes that do not compile never match.
pub fn rule_matches(
    rule: &Rule,
    content: &str,
    tool_name: &str,
    ctx: Option<&TemplateContext>,
) -> bool {
    let tool_re = match RegexBuilder::new(rule.tool_pattern())
        .case_insensitive(true)
        .build()
    {
        Ok(re) => re,
        Err(e) => {
            tracing::debug!(tool = rule.tool_pattern(), error = %e, "skipping rule with bad tool regex");
            return false;
        }
    };
    if !tool_re.is_match(tool_name) {
        return false;
    }

    let pattern = expand_pattern(&rule.pattern, ctx);
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(content),
        Err(e) => {
            tracing::debug!(pattern = %pattern, error = %e, "skipping rule with bad pattern");
            false
        }
    }
}

/// First rule in `rules` that matches the payload, in declaration order,
/// together with the content it matched. Each rule is tested per its own
/// event phase.
pub fn find_match<'r>(
    rules: impl IntoIterator<Item = &'r Rule>,
    tool_name: &str,
    payload: &Payload<'_>,
    ctx: Option<&TemplateContext>,
) -> Option<(&'r Rule, String)> {
    rules.into_iter().find_map(|rule| {
        let content = match rule.event {
            RuleEvent::Pre => match_pre(rule, tool_name, payload, ctx),
            RuleEvent::Post => match_post(rule, tool_name, payload, ctx),
        }?;
        Some((rule, content))
    })
}

fn expand_pattern<'p>(pattern: &'p str, ctx: Option<&TemplateContext>) -> Cow<'p, str> {
    let Some(ctx) = ctx else {
        return Cow::Borrowed(pattern);
    };
    if !pattern.contains("{{") {
        return Cow::Borrowed(pattern);
    }
    match template::render(pattern, ctx) {
        Ok(expanded) => Cow::Owned(expanded),
        Err(e) => {
            tracing::debug!(pattern, error = %e, "pattern template failed, using it literally");
            Cow::Borrowed(pattern)
        }
    }
}

/// The matchable content of one tool event: a field map (tool input for
/// pre, tool response for post) plus the transcript intent, loaded at most
/// once and only if a rule asks for it.
pub struct Payload<'e> {
    fields: &'e Map<String, Value>,
    intent: OnceCell<String>,
    load_intent: Box<dyn Fn() -> String + 'e>,
}

impl<'e> Payload<'e> {
    pub fn new(fields: &'e Map<String, Value>, load_intent: impl Fn() -> String + 'e) -> Self {
        Self {
            fields,
            intent: OnceCell::new(),
            load_intent: Box::new(load_intent),
        }
    }

    pub fn intent(&self) -> &str {
        self.intent.get_or_init(|| (self.load_intent)())
    }

    /// Content for one source. `None` when the field is absent or not a
    /// string, or when the intent is empty.
    pub fn resolve(&self, source: &Source) -> Option<&str> {
        match source {
            Source::Intent => Some(self.intent()).filter(|s| !s.is_empty()),
            Source::Field(name) => self.fields.get(name).and_then(Value::as_str),
        }
    }

    /// Every string-valued field, in key order.
    pub fn string_fields(&self) -> impl Iterator<Item = &'e str> {
        let fields: &'e Map<String, Value> = self.fields;
        fields.values().filter_map(Value::as_str)
    }
}

/// PreToolUse: the first candidate the rule matches. Candidates are the
/// rule's sources in order, or every string field when it declares none.
pub fn match_pre(
    rule: &Rule,
    tool_name: &str,
    payload: &Payload<'_>,
    ctx: Option<&TemplateContext>,
) -> Option<String> {
    let test = |content: &str| rule_matches(rule, content, tool_name, ctx);
    if rule.sources.is_empty() {
        payload.string_fields().find(|&c| test(c)).map(str::to_string)
    } else {
        rule.sources
            .iter()
            .filter_map(|source| payload.resolve(source))
            .find(|&c| test(c))
            .map(str::to_string)
    }
}

/// PostToolUse: pick one candidate, then test it.
///
/// Without sources the candidate is the first non-empty string field. With
/// sources, a non-empty intent wins when `#intent` is listed; otherwise the
/// first listed field holding a non-empty string.
pub fn match_post(
    rule: &Rule,
    tool_name: &str,
    payload: &Payload<'_>,
    ctx: Option<&TemplateContext>,
) -> Option<String> {
    let content = post_candidate(rule, payload)?;
    rule_matches(rule, content, tool_name, ctx).then(|| content.to_string())
}

fn post_candidate<'p>(rule: &Rule, payload: &'p Payload<'_>) -> Option<&'p str> {
    if rule.sources.is_empty() {
        return payload.string_fields().find(|s| !s.is_empty());
    }
    if rule.sources.contains(&Source::Intent) {
        let intent = payload.intent();
        if !intent.is_empty() {
            return Some(intent);
        }
    }
    rule.sources
        .iter()
        .filter(|s| matches!(s, Source::Field(_)))
        .filter_map(|s| payload.resolve(s))
        .find(|s| !s.is_empty())
}

#[cfg(test)]
mod tests;
