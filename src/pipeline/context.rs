//! Context assembly: turns ranked documents into the prompt sent to the
//! generator.

use std::path::Path;

use crate::pipeline::messages::{Document, PageContext, Query, Turn};
use crate::stage::Channel;

/// Context used when retrieval found nothing.
pub const NO_DOCUMENTS: &str = "관련 문서를 찾을 수 없습니다.";

/// Bullet lines at or over this length are dropped from the principles excerpt.
const OPINION_LINE_MAX: usize = 150;
/// Principles excerpt cap, in characters.
const OPINIONS_MAX: usize = 2000;

/// Persona details quoted in the system prompts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Persona {
    pub name: String,
    /// Decision principles excerpt, see [`extract_key_opinions`].
    pub opinions: String,
}

impl Persona {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            opinions: String::new(),
        }
    }

    pub fn with_opinions(mut self, opinions: impl Into<String>) -> Self {
        self.opinions = opinions.into();
        self
    }

    /// Load the principles excerpt from a markdown file. A missing or
    /// unreadable file leaves the excerpt empty.
    pub fn load_opinions(mut self, path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => self.opinions = extract_key_opinions(&content),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to load persona principles");
            }
        }
        self
    }
}

/// Keep headings and short bullet lines from a markdown document, skipping
/// frontmatter, capped at 2000 characters.
pub fn extract_key_opinions(markdown: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut in_frontmatter = false;
    let mut length = 0usize;

    for line in markdown.lines() {
        if line.trim() == "---" {
            in_frontmatter = !in_frontmatter;
            continue;
        }
        if in_frontmatter {
            continue;
        }

        let is_heading = line.starts_with("##");
        let is_short_bullet =
            line.trim_start().starts_with('-') && line.chars().count() < OPINION_LINE_MAX;
        if is_heading || is_short_bullet {
            if !kept.is_empty() {
                length += 1;
            }
            length += line.chars().count();
            kept.push(line);
        }

        if length > OPINIONS_MAX {
            break;
        }
    }

    kept.join("\n").chars().take(OPINIONS_MAX).collect()
}

fn document_block(index: usize, doc: &Document, content: &str) -> String {
    format!(
        "\n[출처 {}]\n제목: {}\n내용: {}\n---",
        index + 1,
        doc.display_title(),
        content
    )
}

/// Render ranked documents as numbered source blocks within `budget`
/// characters. Documents are appended in rank order until the budget runs
/// out; the first document is truncated rather than dropped.
pub fn build_document_context(documents: &[Document], budget: usize) -> String {
    if documents.is_empty() {
        return NO_DOCUMENTS.to_string();
    }

    let mut blocks: Vec<String> = Vec::new();
    let mut used = 0usize;

    for (i, doc) in documents.iter().enumerate() {
        let separator = usize::from(!blocks.is_empty());
        let block = document_block(i, doc, &doc.content);
        let len = block.chars().count();

        if used + separator + len <= budget {
            used += separator + len;
            blocks.push(block);
            continue;
        }

        if blocks.is_empty() {
            let overhead = document_block(i, doc, "").chars().count();
            let room = budget.saturating_sub(overhead);
            let content: String = doc.content.chars().take(room).collect();
            blocks.push(document_block(i, doc, &content));
        }
        tracing::debug!(
            kept = blocks.len(),
            dropped = documents.len() - blocks.len(),
            budget,
            "document context truncated"
        );
        break;
    }

    blocks.join("\n")
}

fn page_section(page: &PageContext) -> String {
    let mut section = String::from("\n\n현재 사용자가 보고 있는 페이지:\n");
    if !page.title.trim().is_empty() {
        section.push_str(&format!("제목: {}\n", page.title));
    }
    if let Some(url) = page.url.as_deref().filter(|u| !u.is_empty()) {
        section.push_str(&format!("주소: {url}\n"));
    }
    section.push_str(&format!("내용:\n{}", page.content));
    section
}

fn text_prompt(persona: &Persona, context: &str) -> String {
    format!(
        "당신은 {name}의 글과 프로젝트를 학습한 AI 어시스턴트입니다.\n\n\
         아래 제공된 문서들을 바탕으로 사용자의 질문에 답변해주세요.\n\n\
         규칙:\n\
         - 제공된 문서의 내용만을 바탕으로 답변하세요\n\
         - 문서에 없는 내용은 \"제공된 문서에서는 해당 내용을 찾을 수 없습니다\"라고 솔직히 말하세요\n\
         - 답변 시 어느 출처에서 나온 정보인지 [출처 N] 형태로 표시하세요\n\
         - 자연스럽고 친근한 톤으로 답변하세요\n\
         - 한국어로 답변하세요\n\n\
         제공된 문서:\n{context}",
        name = persona.name,
    )
}

fn voice_prompt(persona: &Persona, context: &str) -> String {
    let principles = if persona.opinions.is_empty() {
        String::new()
    } else {
        format!("# 핵심 의사결정 원칙\n\n{}\n\n---\n\n", persona.opinions)
    };
    format!(
        "당신은 {name}입니다. 당신의 글과 생각, 그리고 아래 원칙을 바탕으로 답변하세요.\n\n\
         {principles}\
         # 말투\n\
         - 친구에게 말하듯 편하게: \"~거야\", \"~거든\", \"~지\"\n\
         - 짧고 직관적인 문장, 단정 대신 \"~인 것 같아\"\n\
         - 전문 용어는 영어, 설명은 한국어\n\n\
         # 음성 대화 규칙\n\
         - 핵심만 2-3문장으로 짧게\n\
         - [출처 N] 표기는 생략\n\
         - 필요하면 \"더 자세히 알고 싶으면 말해줘\" 식으로 유도\n\
         - 격식체(\"~입니다\", \"~습니다\")와 번역투는 쓰지 않기\n\n\
         아래 제공된 문서들을 바탕으로 사용자의 질문에 답변해주세요.\n\n\
         제공된 문서:\n{context}",
        name = persona.name,
    )
}

/// System prompt for `channel` over an already rendered document context.
pub fn system_prompt(
    channel: Channel,
    persona: &Persona,
    context: &str,
    page: Option<&PageContext>,
) -> String {
    let mut prompt = match channel {
        Channel::Text => text_prompt(persona, context),
        Channel::Voice => voice_prompt(persona, context),
    };
    if let Some(page) = page {
        prompt.push_str(&page_section(page));
    }
    prompt
}

/// Full message list: system prompt, history, then the question.
pub fn build_messages(
    channel: Channel,
    persona: &Persona,
    query: &Query,
    documents: &[Document],
    context_budget: usize,
) -> Vec<Turn> {
    let context = build_document_context(documents, context_budget);
    let system = system_prompt(channel, persona, &context, query.page_context.as_ref());

    let mut messages = Vec::with_capacity(query.history.len() + 2);
    messages.push(Turn::system(system));
    messages.extend(query.history.iter().cloned());
    messages.push(Turn::user(query.text.clone()));
    messages
}
