//! SVG template with literal token placeholders.

use std::collections::BTreeSet;
use std::path::Path;

use aho_corasick::{AhoCorasick, MatchKind};
use tracing::debug;

use crate::error::RenderError;
use crate::tokens::{Token, TokenValues};

fn token_matcher() -> Result<AhoCorasick, RenderError> {
    let matcher = AhoCorasick::builder()
        .match_kind(MatchKind::LeftmostLongest)
        .build(Token::ALL.iter().map(|token| token.placeholder()))?;
    Ok(matcher)
}

#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    matcher: AhoCorasick,
}

impl Template {
    pub fn new(source: impl Into<String>) -> Result<Self, RenderError> {
        Ok(Self {
            source: source.into(),
            matcher: token_matcher()?,
        })
    }

    /// Read the template from disk. Called on every cycle so edits apply
    /// without a restart.
    pub async fn load(path: &Path) -> Result<Self, RenderError> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RenderError::read(path, e))?;
        debug!(path = %path.display(), bytes = source.len(), "Loaded template");
        Self::new(source)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Tokens that occur at least once in the template
    pub fn tokens(&self) -> BTreeSet<Token> {
        self.matcher
            .find_iter(&self.source)
            .map(|m| Token::ALL[m.pattern().as_usize()])
            .collect()
    }

    /// Substitute every occurrence of every token in a single pass, then
    /// confirm no placeholder is left in the output.
    pub fn render(&self, values: &TokenValues) -> Result<String, RenderError> {
        if let Some(missing) = self
            .tokens()
            .into_iter()
            .find(|token| values.get(*token).is_none())
        {
            return Err(RenderError::MissingValue(missing));
        }

        let mut rendered = String::with_capacity(self.source.len());
        self.matcher
            .replace_all_with(&self.source, &mut rendered, |m, _, dst| {
                let token = Token::ALL[m.pattern().as_usize()];
                if let Some(value) = values.get(token) {
                    push_escaped(dst, value);
                }
                true
            });

        let leftover = unresolved(&self.matcher, &rendered);
        if !leftover.is_empty() {
            return Err(RenderError::UnresolvedTokens(leftover));
        }
        Ok(rendered)
    }
}

fn unresolved(matcher: &AhoCorasick, text: &str) -> Vec<&'static str> {
    matcher
        .find_iter(text)
        .map(|m| Token::ALL[m.pattern().as_usize()])
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(Token::placeholder)
        .collect()
}

/// Values land inside SVG text nodes and attributes.
fn push_escaped(dst: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => dst.push_str("&amp;"),
            '<' => dst.push_str("&lt;"),
            '>' => dst.push_str("&gt;"),
            '"' => dst.push_str("&quot;"),
            '\'' => dst.push_str("&apos;"),
            _ => dst.push(c),
        }
    }
}
