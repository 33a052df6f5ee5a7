use super::*;
use crate::config::{Generate, RuleEvent};
use serde_json::json;
use std::cell::Cell;
use std::path::Path;

fn rule(pattern: &str) -> Rule {
    Rule {
        pattern: pattern.into(),
        tool: String::new(),
        event: RuleEvent::Pre,
        sources: Vec::new(),
        send: "msg".into(),
        generate: Generate::default(),
    }
}

fn with_tool(mut r: Rule, tool: &str) -> Rule {
    r.tool = tool.into();
    r
}

fn with_sources(mut r: Rule, sources: &[&str]) -> Rule {
    r.sources = sources.iter().map(|s| Source::parse(s)).collect();
    r
}

fn fields(value: serde_json::Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

#[test]
fn default_tool_is_bash_case_insensitive() {
    let r = rule("^go test");
    assert!(rule_matches(&r, "go test ./...", "Bash", None));
    assert!(rule_matches(&r, "go test ./...", "bash", None));
    assert!(!rule_matches(&r, "go test ./...", "Write", None));
    assert!(!rule_matches(&r, "make test", "Bash", None));
}

#[test]
fn explicit_tool_scopes_the_rule() {
    let r = with_tool(rule("password"), "^Write$");
    assert!(!rule_matches(&r, "echo password", "Bash", None));
    assert!(rule_matches(&r, "echo password>f", "Write", None));
    assert!(rule_matches(&r, "echo password>f", "WRITE", None));
}

#[test]
fn bad_regex_never_matches() {
    assert!(!rule_matches(&rule("(unclosed"), "(unclosed", "Bash", None));
    assert!(!rule_matches(&with_tool(rule("x"), "[bad"), "x", "Bash", None));
}

#[test]
fn templated_pattern_expands_against_context() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = TemplateContext::new(Some(dir.path()));
    let r = rule("^rm -rf {{ ProjectRoot }}");
    let content = format!("rm -rf {}", dir.path().display());
    assert!(rule_matches(&r, &content, "Bash", Some(&ctx)));
    assert!(!rule_matches(&r, "rm -rf /elsewhere", "Bash", Some(&ctx)));
}

#[test]
fn broken_pattern_template_is_used_literally() {
    let ctx = TemplateContext::new(None);
    // Not valid Jinja, but a valid regex: a character class holding `{`.
    let r = rule("a[{{]b");
    assert!(rule_matches(&r, "a{b", "Bash", Some(&ctx)));
}

#[test]
fn find_match_returns_first_in_declaration_order() {
    let rules = vec![rule("^make"), rule("test"), rule("^go")];
    let input = fields(json!({ "command": "go test" }));
    let payload = Payload::new(&input, String::new);
    let (found, content) = find_match(&rules, "Bash", &payload, None).unwrap();
    assert_eq!(found.pattern, "test");
    assert_eq!(content, "go test");

    let input = fields(json!({ "command": "ls" }));
    let payload = Payload::new(&input, String::new);
    assert!(find_match(&rules, "Bash", &payload, None).is_none());
}

#[test]
fn find_match_is_rule_major() {
    // The second field matches the first rule, the first field only the
    // second rule; the earlier rule still wins.
    let rules = vec![rule("^beta"), rule("^alpha")];
    let input = fields(json!({ "a": "alpha", "b": "beta" }));
    let payload = Payload::new(&input, String::new);
    let (found, content) = find_match(&rules, "Bash", &payload, None).unwrap();
    assert_eq!(found.pattern, "^beta");
    assert_eq!(content, "beta");
}

#[test]
fn pre_without_sources_scans_string_fields_in_key_order() {
    let input = fields(json!({
        "timeout": 30,
        "command": "go test ./...",
        "description": "go test everything"
    }));
    let payload = Payload::new(&input, String::new);
    let matched = match_pre(&rule("go test"), "Bash", &payload, None);
    // "command" sorts before "description".
    assert_eq!(matched.as_deref(), Some("go test ./..."));
}

#[test]
fn pre_sources_are_tried_in_declared_order() {
    let input = fields(json!({
        "command": "cargo build",
        "description": "build it"
    }));
    let payload = Payload::new(&input, String::new);
    let r = with_sources(rule("build"), &["description", "command"]);
    assert_eq!(
        match_pre(&r, "Bash", &payload, None).as_deref(),
        Some("build it")
    );

    let r = with_sources(rule("cargo"), &["description", "command"]);
    assert_eq!(
        match_pre(&r, "Bash", &payload, None).as_deref(),
        Some("cargo build")
    );
}

#[test]
fn pre_skips_missing_and_non_string_sources() {
    let input = fields(json!({ "timeout": 30 }));
    let payload = Payload::new(&input, String::new);
    let r = with_sources(rule("30"), &["timeout", "absent"]);
    assert_eq!(match_pre(&r, "Bash", &payload, None), None);
}

#[test]
fn pre_intent_source_uses_transcript_text() {
    let input = fields(json!({ "command": "ls" }));
    let payload = Payload::new(&input, || "I'll skip the failing test".to_string());
    let r = with_sources(rule("skip the failing"), &["#intent", "command"]);
    assert_eq!(
        match_pre(&r, "Bash", &payload, None).as_deref(),
        Some("I'll skip the failing test")
    );
}

#[test]
fn intent_is_loaded_lazily_and_once() {
    let input = fields(json!({ "command": "ls" }));
    let loads = Cell::new(0);
    let payload = Payload::new(&input, || {
        loads.set(loads.get() + 1);
        "thinking".to_string()
    });

    assert_eq!(match_pre(&rule("ls"), "Bash", &payload, None).as_deref(), Some("ls"));
    assert_eq!(loads.get(), 0);

    let r = with_sources(rule("nope"), &["#intent"]);
    match_pre(&r, "Bash", &payload, None);
    match_pre(&r, "Bash", &payload, None);
    assert_eq!(loads.get(), 1);
}

#[test]
fn empty_intent_is_skipped() {
    let input = fields(json!({}));
    let payload = Payload::new(&input, String::new);
    let r = with_sources(rule(".*"), &["#intent"]);
    assert_eq!(match_pre(&r, "Bash", &payload, None), None);
}

#[test]
fn post_without_sources_uses_first_non_empty_field() {
    let response = fields(json!({
        "interrupted": false,
        "stderr": "",
        "stdout": "FAIL: TestLogin"
    }));
    let payload = Payload::new(&response, String::new);
    let mut r = rule("FAIL");
    r.event = RuleEvent::Post;
    assert_eq!(
        match_post(&r, "Bash", &payload, None).as_deref(),
        Some("FAIL: TestLogin")
    );
}

#[test]
fn post_intent_wins_over_fields_when_non_empty() {
    let response = fields(json!({ "stdout": "not related to my changes" }));
    let r = with_sources(rule("not related"), &["stdout", "#intent"]);

    let payload = Payload::new(&response, || "all good".to_string());
    // Intent is picked and does not match; fields are not consulted.
    assert_eq!(match_post(&r, "Bash", &payload, None), None);

    let payload = Payload::new(&response, String::new);
    assert_eq!(
        match_post(&r, "Bash", &payload, None).as_deref(),
        Some("not related to my changes")
    );
}

#[test]
fn post_picks_first_present_field_only() {
    let response = fields(json!({ "stdout": "ok", "stderr": "panic" }));
    let payload = Payload::new(&response, String::new);
    let r = with_sources(rule("panic"), &["missing", "stdout", "stderr"]);
    // "stdout" is the chosen candidate; it does not match.
    assert_eq!(match_post(&r, "Bash", &payload, None), None);
}

#[test]
fn post_still_checks_tool() {
    let response = fields(json!({ "stdout": "FAIL" }));
    let payload = Payload::new(&response, String::new);
    let r = with_tool(rule("FAIL"), "^Edit$");
    assert_eq!(match_post(&r, "Bash", &payload, None), None);
    assert!(match_post(&r, "Edit", &payload, None).is_some());
}

#[test]
fn context_is_optional_for_plain_patterns() {
    let ctx = TemplateContext::new(Some(Path::new("/nonexistent")));
    assert!(rule_matches(&rule("^ls$"), "ls", "Bash", Some(&ctx)));
}
