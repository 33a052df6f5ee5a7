use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde::de::IgnoredAny;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// Upper bound on how far a reply chain is followed.
pub const MAX_CHAIN_DEPTH: usize = 128;

// ===================================================================
// Top-level transcript entry, one per JSONL line
// ===================================================================

/// A single line in the host's `.jsonl` transcript.
///
/// Discriminated by the `type` field. Only conversation entries carry
/// intent; progress and system entries are kept as chain links, and any
/// other record type parses as `Other`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum TranscriptEntry {
    #[serde(rename = "user")]
    User(ConversationEntry),
    #[serde(rename = "assistant")]
    Assistant(ConversationEntry),
    #[serde(rename = "progress", alias = "system")]
    Meta(ChainLink),
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainLink {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub parent_uuid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub parent_uuid: Option<String>,
    #[serde(default)]
    pub message: Message,
}

#[derive(Debug, Default, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub content: MessageContent,
}

/// `message.content` can be a plain string (user text) or an array of
/// content blocks (assistant responses, tool results).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Blocks(Vec<ContentBlock>),
    /// Plain string content; it never carries a tool call.
    Plain(IgnoredAny),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        #[serde(default)]
        name: String,
    },
    #[serde(other)]
    Other,
}

impl TranscriptEntry {
    pub fn uuid(&self) -> Option<&str> {
        match self {
            Self::User(e) | Self::Assistant(e) => e.uuid.as_deref(),
            Self::Meta(link) => link.uuid.as_deref(),
            Self::Other => None,
        }
    }

    pub fn parent_uuid(&self) -> Option<&str> {
        match self {
            Self::User(e) | Self::Assistant(e) => e.parent_uuid.as_deref(),
            Self::Meta(link) => link.parent_uuid.as_deref(),
            Self::Other => None,
        }
    }

    /// Content blocks of an assistant entry; empty for anything else.
    fn assistant_blocks(&self) -> &[ContentBlock] {
        match self {
            Self::Assistant(conv) => match &conv.message.content {
                MessageContent::Blocks(b) => b.as_slice(),
                MessageContent::Plain(_) => &[],
            },
            _ => &[],
        }
    }

    fn has_tool_use(&self) -> bool {
        self.assistant_blocks()
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { .. }))
    }
}

// ===================================================================
// Transcript: parsed JSONL with a UUID index
// ===================================================================

/// A parsed transcript: entries in file order plus a uuid → index map.
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    by_uuid: HashMap<String, usize>,
}

impl Transcript {
    /// Parse JSONL contents. Returns the transcript and any lines that
    /// failed to parse (with 1-based line number and error).
    ///
    /// A trailing partial line (the host may be mid-append) simply shows up
    /// as a parse error.
    pub fn parse(contents: &str) -> (Self, Vec<(usize, String)>) {
        let mut entries = Vec::new();
        let mut errors = Vec::new();
        let mut by_uuid = HashMap::new();

        for (i, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<TranscriptEntry>(line) {
                Ok(entry) => {
                    if let Some(uuid) = entry.uuid() {
                        // First occurrence wins; a repeated uuid would
                        // otherwise let the chain jump forward in the file.
                        by_uuid.entry(uuid.to_string()).or_insert(entries.len());
                    }
                    entries.push(entry);
                }
                Err(e) => errors.push((i + 1, format!("{e}"))),
            }
        }

        (Self { entries, by_uuid }, errors)
    }

    /// Read and parse a transcript file. Malformed lines are skipped; a
    /// missing file, an unreadable file, or a file where every line is
    /// malformed is an error.
    pub fn read(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading transcript {}", path.display()))?;
        let (transcript, errors) = Self::parse(&contents);
        for (line, err) in &errors {
            tracing::debug!(line, error = %err, "skipping malformed transcript line");
        }
        if transcript.entries.is_empty() && !errors.is_empty() {
            bail!(
                "no parseable records in transcript {} ({} malformed lines)",
                path.display(),
                errors.len()
            );
        }
        Ok(transcript)
    }

    #[cfg(test)]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    // ---------------------------------------------------------------
    // Chain traversal
    // ---------------------------------------------------------------

    /// Iterate the reply chain starting at `index` (inclusive), newest to
    /// oldest.
    pub fn chain(&self, index: usize) -> ChainIter<'_> {
        ChainIter {
            transcript: self,
            next: Some(index),
            visited: HashSet::new(),
        }
    }

    /// The entry that precedes `index` in its reply chain. Entries with a
    /// `parentUuid` follow it; entries carrying no uuid at all fall back to
    /// the previous line.
    fn parent_of(&self, index: usize) -> Option<usize> {
        let entry = &self.entries[index];
        match entry.parent_uuid() {
            Some(parent) => self.by_uuid.get(parent).copied(),
            None if entry.uuid().is_none() => index.checked_sub(1),
            None => None,
        }
    }

    // ---------------------------------------------------------------
    // Intent extraction
    // ---------------------------------------------------------------

    /// Intent before the newest assistant tool invocation in the file.
    pub fn recent_tool_use_intent(&self) -> String {
        let found = self.entries.iter().enumerate().rev().find_map(|(i, entry)| {
            entry
                .assistant_blocks()
                .iter()
                .rposition(|b| matches!(b, ContentBlock::ToolUse { .. }))
                .map(|block| (i, block))
        });
        match found {
            Some((index, block)) => {
                let blocks = self.entries[index].assistant_blocks();
                if let ContentBlock::ToolUse { id, name } = &blocks[block] {
                    tracing::debug!(tool_use_id = %id, tool = %name, "newest tool use");
                }
                self.intent_before(index, block)
            }
            None => String::new(),
        }
    }

    /// Intent before the tool invocation with the given `tool_use` id.
    pub fn tool_use_intent(&self, tool_use_id: &str) -> String {
        let found = self.entries.iter().enumerate().rev().find_map(|(i, entry)| {
            entry
                .assistant_blocks()
                .iter()
                .position(|b| matches!(b, ContentBlock::ToolUse { id, .. } if id == tool_use_id))
                .map(|block| (i, block))
        });
        match found {
            Some((index, block)) => self.intent_before(index, block),
            None => String::new(),
        }
    }

    /// Collect the assistant text authored immediately before block `block`
    /// of entry `index`: earlier text blocks in the same entry, then text from
    /// the assistant entries above it in the reply chain. The walk stops at a
    /// user entry or at an assistant entry that made its own tool call.
    fn intent_before(&self, index: usize, block: usize) -> String {
        // Fragments are gathered newest-first and reversed at the end.
        let mut fragments: Vec<&str> = Vec::new();
        push_texts(&mut fragments, &self.entries[index].assistant_blocks()[..block]);

        for entry in self.chain(index).skip(1) {
            match entry {
                TranscriptEntry::User(_) => break,
                TranscriptEntry::Assistant(_) if entry.has_tool_use() => break,
                TranscriptEntry::Assistant(_) => {
                    push_texts(&mut fragments, entry.assistant_blocks())
                }
                TranscriptEntry::Meta(_) | TranscriptEntry::Other => {}
            }
        }

        fragments.reverse();
        let intent = fragments.join("\n");
        if intent.trim().is_empty() {
            String::new()
        } else {
            intent
        }
    }
}

/// Push the text blocks of `blocks` onto `fragments` in reverse order.
fn push_texts<'a>(fragments: &mut Vec<&'a str>, blocks: &'a [ContentBlock]) {
    for block in blocks.iter().rev() {
        if let ContentBlock::Text { text } = block {
            if !text.trim().is_empty() {
                fragments.push(text.as_str());
            }
        }
    }
}

/// Read `path` and extract intent: scoped to `tool_use_id` when given,
/// otherwise the newest tool invocation.
pub fn extract_intent(path: &Path, tool_use_id: Option<&str>) -> Result<String> {
    let transcript = Transcript::read(path)?;
    Ok(match tool_use_id {
        Some(id) => transcript.tool_use_intent(id),
        None => transcript.recent_tool_use_intent(),
    })
}

/// Iterator over a reply chain, newest to oldest.
/// Stops on a revisited entry or after [`MAX_CHAIN_DEPTH`] steps.
pub struct ChainIter<'a> {
    transcript: &'a Transcript,
    next: Option<usize>,
    visited: HashSet<usize>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a TranscriptEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.next.take()?;
        if self.visited.len() >= MAX_CHAIN_DEPTH || !self.visited.insert(index) {
            return None;
        }
        self.next = self.transcript.parent_of(index);
        Some(&self.transcript.entries[index])
    }
}
