//! Route extraction from `.proto` interface definitions.
//!
//! Scans `service` blocks for RPC methods annotated with
//! `option (google.api.http) = { <verb>: "<uri>" }` and turns each one into a
//! [`RouteDescriptor`]. The output order is the declaration order in the
//! file, which downstream route ids depend on.
//!
//! This is a text scanner, not a protobuf parser. It sits behind the
//! [`DescriptorExtractor`] trait so a structured parser can replace it.

use crate::error::{KernelError, KernelResult};
use crate::gateway::{HttpMethod, ProtoObject};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};

static SERVICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bservice\s+([A-Za-z0-9_]+)\s*\{").expect("service regex"));

static RPC_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\brpc\s+").expect("rpc split regex"));

static SIGNATURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9_]+)\s*\([^)]+\)\s*returns\s*\([^)]+\)\s*\{")
        .expect("rpc signature regex")
});

static HTTP_OPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"option\s*\(\s*google\.api\.http\s*\)\s*=\s*\{").expect("http option regex")
});

static HTTP_BINDING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(get|post|put|delete)\s*:\s*"([^"]+)""#).expect("http binding regex")
});

/// One HTTP-mapped RPC method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDescriptor {
    /// HTTP path template, e.g. `/v1/users/{id}`.
    pub uri: String,
    /// Verb from the annotation.
    pub http_method: HttpMethod,
    /// Declared RPC method name, used to fill the transcoding plugin.
    pub rpc_method: String,
}

/// `text → ordered route descriptors`.
pub trait DescriptorExtractor {
    /// Extract every HTTP-mapped RPC method, in declaration order.
    fn extract(&self, source: &str) -> Vec<RouteDescriptor>;

    /// Read `path` and extract from its contents.
    ///
    /// An unreadable file is a [`KernelError::Parse`]; a readable file with
    /// no annotated methods yields an empty list.
    fn extract_file(&self, path: &Path) -> KernelResult<Vec<RouteDescriptor>> {
        let source = std::fs::read_to_string(path).map_err(|source| KernelError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.extract(&source))
    }
}

/// Block-structured `google.api.http` scanner.
///
/// Verbs are reported uppercase. Only a top-level `get`, `post`, `put` or
/// `delete` binding is recognised; `additional_bindings` are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpRuleExtractor;

impl DescriptorExtractor for HttpRuleExtractor {
    fn extract(&self, source: &str) -> Vec<RouteDescriptor> {
        let source = strip_comments(source);
        let mut routes = Vec::new();
        let mut matched_services = 0usize;

        for caps in SERVICE_RE.captures_iter(&source) {
            let (Some(name), Some(whole)) = (caps.get(1), caps.get(0)) else {
                continue;
            };
            matched_services += 1;
            let body = block_body(&source, whole.end());

            let mut blocks = RPC_SPLIT_RE.split(body);
            // Text before the first `rpc` is service-level noise.
            blocks.next();

            let before = routes.len();
            routes.extend(blocks.filter_map(parse_rpc_block));
            debug!(
                service = name.as_str(),
                routes = routes.len() - before,
                "scanned service block"
            );
        }

        if matched_services == 0 {
            warn!("no service declaration found in interface definition");
        }
        routes
    }
}

/// Extract routes from a `.proto` file with the default scanner.
pub fn extract_file(path: &Path) -> KernelResult<Vec<RouteDescriptor>> {
    HttpRuleExtractor.extract_file(path)
}

/// Read the descriptor to register under the service id.
///
/// A compiled descriptor set (`.pb`) is base64-encoded; anything else is
/// sent as text.
pub fn load_descriptor(path: &Path) -> KernelResult<ProtoObject> {
    let bytes = std::fs::read(path).map_err(|source| KernelError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let compiled = path.extension().and_then(|e| e.to_str()) == Some("pb");
    let content = if compiled {
        STANDARD.encode(&bytes)
    } else {
        String::from_utf8_lossy(&bytes).into_owned()
    };
    Ok(ProtoObject { content })
}

fn parse_rpc_block(block: &str) -> Option<RouteDescriptor> {
    let signature = SIGNATURE_RE.captures(block)?;
    let rpc_method = signature.get(1)?.as_str().to_string();
    let options = block_body(block, signature.get(0)?.end());

    let option = HTTP_OPTION_RE.find(options)?;
    let binding = top_level(block_body(options, option.end()));
    let rule = HTTP_BINDING_RE.captures(&binding)?;
    let http_method = HttpMethod::from_str_ci(rule.get(1)?.as_str())?;
    let uri = rule.get(2)?.as_str().to_string();

    debug!(%uri, method = %http_method, rpc = %rpc_method, "parsed route");
    Some(RouteDescriptor {
        uri,
        http_method,
        rpc_method,
    })
}

/// Body of the brace block opened just before `open_end`.
///
/// Braces inside string literals (`"/v1/items/{id}"`) do not count. An
/// unterminated block runs to the end of the input.
fn block_body(source: &str, open_end: usize) -> &str {
    let mut depth = 1usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in source[open_end..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return &source[open_end..open_end + offset];
                }
            }
            _ => {}
        }
    }
    &source[open_end..]
}

/// Text of `body` outside nested brace blocks, string literals kept whole.
fn top_level(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for ch in body.chars() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
        } else {
            match ch {
                '"' => in_string = true,
                '{' => {
                    depth += 1;
                    continue;
                }
                '}' => {
                    depth = depth.saturating_sub(1);
                    continue;
                }
                _ => {}
            }
        }
        if depth == 0 {
            out.push(ch);
        }
    }
    out
}

/// Drop `//` and `/* */` comments, leaving string literals untouched.
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut in_string = false;

    while let Some(ch) = chars.next() {
        if in_string {
            out.push(ch);
            match ch {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        let next = chars.peek().copied();
        match (ch, next) {
            ('"', _) => {
                in_string = true;
                out.push(ch);
            }
            ('/', Some('/')) => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    if skipped == '\n' {
                        out.push('\n');
                    }
                    prev = skipped;
                }
            }
            _ => out.push(ch),
        }
    }
    out
}
