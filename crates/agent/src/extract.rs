//! Tool-call extraction from free model text.
//!
//! The canonical form the system prompt teaches is
//!
//! ```text
//! [Funcion: 'web_search', query: 'rust async runtimes']
//! ```
//!
//! Grammar (informal):
//! ```text
//! call    = "[" KEYWORD ":" value "," KEY ":" value [","] "]"
//! KEYWORD = "Funcion" | "Función" | "Function" | "Tool"     (any case)
//! KEY     = "query" | "consulta" | "input" | "args"         (any case)
//! value   = QUOTED | UNQUOTED
//! QUOTED  = ' ... ' | " ... " | ‘ ... ’ | “ ... ”
//! UNQUOTED runs up to the next "," or "]"
//! ```
//!
//! Whitespace and newlines are allowed between every token. A malformed
//! bracket is skipped and scanning resumes at the next `[`.
//!
//! Small models drift from the canonical form, so a list of looser
//! variants runs after the grammar pass. Variant and JSON hits that start
//! inside a bracket the grammar already accepted are discarded. Variants
//! that take an arbitrary identifier as the tool name only count when the
//! name resolves to a known tool. Results from every pass are merged in
//! order of appearance, de-duplicated on the trimmed pair, and pairs with
//! an empty name or query are dropped.

use cortex_core::tool::{ToolKind, ToolRequest};
use regex_lite::Regex;
use std::collections::HashSet;
use std::ops::Range;
use std::sync::LazyLock;
use tracing::{debug, error};

const KEYWORDS: &[&str] = &["funcion", "función", "function", "tool"];
const QUERY_KEYS: &[&str] = &["query", "consulta", "input", "args"];

/// A loose call shape. The first capture group that participates is the
/// tool name, the second the query.
struct Variant {
    pattern: &'static str,
    /// Only accept names that [`ToolKind::from_name`] resolves.
    known_tools_only: bool,
}

/// Quoted name: the closing quote must pair with the opening one.
macro_rules! quoted_name {
    () => {
        r#"(?:'([^'\]\n\\]+)'|"([^"\]\n\\]+)"|‘([^’'\]\n]+)[’']|“([^”"\]\n]+)[”"])"#
    };
}

/// Quoted query, same pairing rule as `quoted_name!`.
macro_rules! quoted_query {
    () => {
        r#"(?:'([^'\n\\]+)'|"([^"\n\\]+)"|‘([^’'\n]+)[’']|“([^”"\n]+)[”"])"#
    };
}

const VARIANTS_SRC: &[Variant] = &[
    // Funcion: 'x', query: 'y'   (no brackets)
    Variant {
        pattern: concat!(
            r"(?i)(?:funci[oó]n|function|tool)\s*:\s*",
            quoted_name!(),
            r"\s*,\s*(?:query|consulta|input|args)\s*:\s*",
            quoted_query!()
        ),
        known_tools_only: false,
    },
    // function='x' query='y'
    Variant {
        pattern: r#"(?i)(?:funci[oó]n|function|tool|name)\s*=\s*['"]([^'"\n]+)['"][\s,]+(?:query|consulta|input|args)\s*=\s*['"]([^'"\n]+)['"]"#,
        known_tools_only: false,
    },
    // web_search(query='y')
    Variant {
        pattern: r#"(?i)\b([a-z_][a-z0-9_]*)\s*\(\s*(?:query|consulta|input|args)\s*[=:]\s*['"]([^'"\n]+)['"]\s*\)"#,
        known_tools_only: true,
    },
    // [web_search: 'y']
    Variant {
        pattern: concat!(
            r"(?i)\[\s*([a-z_][a-z0-9_]*)\s*:\s*",
            quoted_name!(),
            r"\s*\]"
        ),
        known_tools_only: true,
    },
    // <tool name="x">y</tool>
    Variant {
        pattern: r#"(?is)<tool\s+name\s*=\s*['"]([^'"]+)['"]\s*>(.*?)</tool>"#,
        known_tools_only: false,
    },
    // call web_search with query 'y'
    Variant {
        pattern: r#"(?i)\bcall\s+([a-z_][a-z0-9_]*)\s+with\s+(?:the\s+)?(?:query|input)\s*:?\s*['"‘“]([^'"’”\n]+)['"’”]"#,
        known_tools_only: true,
    },
    // use the web_search tool to look up 'y'
    Variant {
        pattern: r#"(?i)\buse\s+(?:the\s+)?([a-z_][a-z0-9_]*)\s+tool\b[^'"‘“\n]{0,80}['"‘“]([^'"’”\n]+)['"’”]"#,
        known_tools_only: true,
    },
];

/// Flat JSON objects; parsed with serde_json and checked for call keys.
const JSON_OBJECT_PATTERN: &str = r"\{[^{}]*\}";

fn compile(pattern: &str) -> Option<Regex> {
    Regex::new(pattern)
        .inspect_err(|e| error!(pattern, error = %e, "Tool-call pattern failed to compile"))
        .ok()
}

static VARIANTS: LazyLock<Vec<(Regex, bool)>> = LazyLock::new(|| {
    VARIANTS_SRC
        .iter()
        .filter_map(|v| Some((compile(v.pattern)?, v.known_tools_only)))
        .collect()
});

static JSON_OBJECT: LazyLock<Option<Regex>> = LazyLock::new(|| compile(JSON_OBJECT_PATTERN));

/// Pulls `(tool_name, query)` pairs out of model text.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolCallExtractor;

impl ToolCallExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Every distinct request in `text`, in order of appearance.
    pub fn extract(&self, text: &str) -> Vec<ToolRequest> {
        let brackets = scan_brackets(text);
        let inside_bracket = |pos: usize| brackets.iter().any(|(span, _)| span.contains(&pos));

        let mut found: Vec<(usize, ToolRequest)> = scan_variants(text)
            .into_iter()
            .chain(scan_json(text))
            .filter(|(pos, _)| !inside_bracket(*pos))
            .collect();
        found.extend(brackets.iter().map(|(span, req)| (span.start, req.clone())));
        found.sort_by_key(|(pos, _)| *pos);

        let mut seen = HashSet::new();
        let requests: Vec<ToolRequest> = found
            .into_iter()
            .map(|(_, req)| req)
            .filter(|req| !req.is_empty() && !is_keyword(&req.tool_name))
            .filter(|req| seen.insert(req.clone()))
            .collect();

        if !requests.is_empty() {
            debug!(
                count = requests.len(),
                calls = ?requests.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "Extracted tool calls"
            );
        }
        requests
    }
}

fn is_keyword(word: &str) -> bool {
    let lower = word.to_lowercase();
    KEYWORDS.contains(&lower.as_str())
}

// ── Grammar pass ────────────────────────────────────────────────────────

/// Accepted calls with the byte span of their brackets.
fn scan_brackets(text: &str) -> Vec<(Range<usize>, ToolRequest)> {
    let mut out = Vec::new();
    let mut from = 0;
    while let Some(offset) = text[from..].find('[') {
        let start = from + offset;
        let mut cursor = Cursor { src: text, pos: start + 1 };
        match cursor.call() {
            Some(request) => {
                out.push((start..cursor.pos, request));
                from = cursor.pos;
            }
            None => from = start + 1,
        }
    }
    out
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl Cursor<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn eat(&mut self, expected: &[char]) -> Option<()> {
        self.skip_ws();
        if expected.contains(&self.peek()?) {
            self.bump();
            Some(())
        } else {
            None
        }
    }

    fn word(&mut self) -> Option<String> {
        self.skip_ws();
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphabetic() || c == '_') {
            self.bump();
        }
        (self.pos > start).then(|| self.src[start..self.pos].to_lowercase())
    }

    fn value(&mut self) -> Option<String> {
        self.skip_ws();
        let closers = closing_quotes(self.peek()?);
        if closers.is_empty() {
            let start = self.pos;
            while !matches!(self.peek()?, ',' | ']') {
                self.bump();
            }
            return Some(self.src[start..self.pos].trim().to_string());
        }

        self.bump();
        let mut value = String::new();
        loop {
            match self.bump()? {
                '\\' => value.push(self.bump()?),
                c if closers.contains(&c) => return Some(value),
                c => value.push(c),
            }
        }
    }

    /// Parse after the opening `[`.
    fn call(&mut self) -> Option<ToolRequest> {
        let keyword = self.word()?;
        if !KEYWORDS.contains(&keyword.as_str()) {
            return None;
        }
        self.eat(&[':', '='])?;
        let name = self.value()?;
        if name.trim().is_empty() {
            return None;
        }
        self.eat(&[','])?;
        let key = self.word()?;
        if !QUERY_KEYS.contains(&key.as_str()) {
            return None;
        }
        self.eat(&[':', '='])?;
        let query = self.value()?;
        self.skip_ws();
        if self.peek() == Some(',') {
            self.bump();
        }
        self.eat(&[']'])?;
        Some(ToolRequest::new(name, query))
    }
}

fn closing_quotes(open: char) -> &'static [char] {
    match open {
        '\'' => &['\''],
        '"' => &['"'],
        '‘' => &['’', '\''],
        '’' => &['’'],
        '“' => &['”', '"'],
        '”' => &['”'],
        _ => &[],
    }
}

// ── Variant passes ──────────────────────────────────────────────────────

fn scan_variants(text: &str) -> Vec<(usize, ToolRequest)> {
    VARIANTS
        .iter()
        .flat_map(|(re, known_only)| re.captures_iter(text).map(move |cap| (cap, *known_only)))
        .filter_map(|(cap, known_only)| {
            let whole = cap.get(0)?;
            let mut groups = cap.iter().skip(1).flatten();
            let name = groups.next()?.as_str();
            let query = groups.next()?.as_str();
            if known_only && ToolKind::from_name(name).is_none() {
                return None;
            }
            Some((whole.start(), ToolRequest::new(name, query)))
        })
        .collect()
}

fn scan_json(text: &str) -> Vec<(usize, ToolRequest)> {
    let Some(re) = JSON_OBJECT.as_ref() else {
        return Vec::new();
    };
    re.find_iter(text)
        .filter_map(|m| {
            let value: serde_json::Value = serde_json::from_str(m.as_str()).ok()?;
            let field = |keys: &[&str]| {
                keys.iter()
                    .find_map(|k| value.get(*k).and_then(|v| v.as_str()))
                    .map(str::to_string)
            };
            let name = field(&["function", "funcion", "tool", "name"])?;
            let query = field(&["query", "consulta", "input", "args", "arguments"])?;
            Some((m.start(), ToolRequest::new(name, query)))
        })
        .collect()
}

/// Convenience wrapper around [`ToolCallExtractor::extract`].
pub fn extract_tool_calls(text: &str) -> Vec<ToolRequest> {
    ToolCallExtractor::new().extract(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(text: &str) -> Vec<(String, String)> {
        extract_tool_calls(text)
            .into_iter()
            .map(|r| (r.tool_name, r.query))
            .collect()
    }

    fn pair(name: &str, query: &str) -> (String, String) {
        (name.to_string(), query.to_string())
    }

    #[test]
    fn all_patterns_compile() {
        assert_eq!(VARIANTS.len(), VARIANTS_SRC.len());
        assert!(JSON_OBJECT.is_some());
    }

    #[test]
    fn canonical_call_yields_exactly_one_pair() {
        let text = "Let me check. [Funcion: 'web_search', query: 'rust async runtimes']";
        assert_eq!(pairs(text), vec![pair("web_search", "rust async runtimes")]);
    }

    #[test]
    fn keyword_spellings_and_case() {
        for keyword in ["Funcion", "Función", "function", "TOOL"] {
            let text = format!("[{keyword}: 'crypto_price', query: 'btc']");
            assert_eq!(pairs(&text), vec![pair("crypto_price", "btc")], "{keyword}");
        }
    }

    #[test]
    fn alternative_query_keys() {
        assert_eq!(
            pairs("[Funcion: 'web_search', consulta: 'clima en Madrid']"),
            vec![pair("web_search", "clima en Madrid")]
        );
        assert_eq!(
            pairs("[Tool: \"video_search\", input: \"lofi beats\"]"),
            vec![pair("video_search", "lofi beats")]
        );
    }

    #[test]
    fn typographic_quotes_and_whitespace() {
        let text = "[ Funcion :\n  ‘web_search’ ,\n  query : “tokio tutorial” ]";
        assert_eq!(pairs(text), vec![pair("web_search", "tokio tutorial")]);
    }

    #[test]
    fn unquoted_values() {
        assert_eq!(
            pairs("[Funcion: crypto_price, query: ethereum]"),
            vec![pair("crypto_price", "ethereum")]
        );
    }

    #[test]
    fn escaped_quote_in_value() {
        assert_eq!(
            pairs(r"[Funcion: 'web_search', query: 'rust\'s borrow checker']"),
            vec![pair("web_search", "rust's borrow checker")]
        );
    }

    #[test]
    fn apostrophe_inside_double_quoted_query() {
        assert_eq!(
            pairs(r#"[Funcion: 'web_search', query: "Carl Sagan's Cosmos"]"#),
            vec![pair("web_search", "Carl Sagan's Cosmos")]
        );
        assert_eq!(
            pairs(r#"Funcion: 'web_search', query: "Carl Sagan's Cosmos""#),
            vec![pair("web_search", "Carl Sagan's Cosmos")]
        );
    }

    #[test]
    fn mismatched_quotes_do_not_close_a_variant_value() {
        assert!(pairs(r#"Funcion: 'web_search", query: 'x'"#).is_empty());
    }

    #[test]
    fn malformed_bracket_is_skipped() {
        let text = "[Funcion: 'web_search' query 'oops'] and [Funcion: 'crypto_price', query: 'btc']";
        assert_eq!(pairs(text), vec![pair("crypto_price", "btc")]);
    }

    #[test]
    fn unterminated_quote_does_not_swallow_later_calls() {
        let text = "[Funcion: 'web_search, query: 'x'\n[Funcion: 'crypto_price', query: 'sol']";
        assert!(pairs(text).contains(&pair("crypto_price", "sol")));
    }

    #[test]
    fn multiple_calls_in_order() {
        let text = "[Funcion: 'crypto_price', query: 'btc'] then \
                    [Funcion: 'web_search', query: 'bitcoin news']";
        assert_eq!(
            pairs(text),
            vec![pair("crypto_price", "btc"), pair("web_search", "bitcoin news")]
        );
    }

    #[test]
    fn duplicates_collapse_on_trimmed_pair() {
        let text = "[Funcion: 'web_search', query: 'rust'] [Funcion: ' web_search ', query: 'rust  ']";
        assert_eq!(pairs(text), vec![pair("web_search", "rust")]);
    }

    #[test]
    fn empty_query_is_dropped() {
        assert!(pairs("[Funcion: 'web_search', query: '']").is_empty());
        assert!(pairs("[Funcion: '', query: 'rust']").is_empty());
    }

    #[test]
    fn plain_text_has_no_calls() {
        assert!(pairs("Bitcoin is a cryptocurrency [citation needed].").is_empty());
        assert!(pairs("").is_empty());
    }

    #[test]
    fn unbracketed_variant() {
        assert_eq!(
            pairs("Funcion: 'web_search', query: 'best pizza in Naples'"),
            vec![pair("web_search", "best pizza in Naples")]
        );
    }

    #[test]
    fn assignment_variant() {
        assert_eq!(
            pairs("function='crypto_price' query='doge'"),
            vec![pair("crypto_price", "doge")]
        );
    }

    #[test]
    fn call_syntax_variant() {
        assert_eq!(
            pairs("I'll run web_search(query='rust 2024 edition') now."),
            vec![pair("web_search", "rust 2024 edition")]
        );
    }

    #[test]
    fn short_bracket_variant() {
        assert_eq!(
            pairs("[generate_image: 'a red fox in snow']"),
            vec![pair("generate_image", "a red fox in snow")]
        );
    }

    #[test]
    fn citations_and_unknown_calls_are_not_tool_calls() {
        assert!(pairs("Cosmos aired in 1980 [Source: 'Wikipedia'].").is_empty());
        assert!(pairs("Try print(query='hello') in the REPL.").is_empty());
        assert!(pairs("I will call helper with query 'x'").is_empty());
    }

    #[test]
    fn canonical_form_keeps_unknown_tool_names() {
        assert_eq!(
            pairs("[Funcion: 'weather', query: 'Madrid']"),
            vec![pair("weather", "Madrid")]
        );
    }

    #[test]
    fn keyword_alone_is_not_a_tool_name() {
        assert!(pairs("[Funcion: 'web_search']").is_empty());
    }

    #[test]
    fn xml_variant() {
        assert_eq!(
            pairs(r#"<tool name="video_search">rust lifetimes</tool>"#),
            vec![pair("video_search", "rust lifetimes")]
        );
    }

    #[test]
    fn json_variant() {
        assert_eq!(
            pairs(r#"{"function": "crypto_price", "query": "eth"}"#),
            vec![pair("crypto_price", "eth")]
        );
        assert!(pairs(r#"{"answer": "42"}"#).is_empty());
    }

    #[test]
    fn natural_language_variants() {
        assert_eq!(
            pairs("I will call web_search with query 'tokio select'"),
            vec![pair("web_search", "tokio select")]
        );
        assert_eq!(
            pairs("Let me use the video_search tool to find 'axum tutorial'."),
            vec![pair("video_search", "axum tutorial")]
        );
    }
}
