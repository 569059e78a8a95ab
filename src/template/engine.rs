//! Fragment transformation: parse tags into a tree, apply compile-time directives in document
//! order, then render run-time directives.
//!
//! Text outside tags is copied byte for byte; only tag contents must be UTF-8.

use super::TemplateError;
use super::defines::{Defines, Vars};
use super::expr::{self, Expr, Scope};
use super::grammar::{DIRECTIVES, Grammar};
use super::value::Value;

/// Deepest nesting of conditional and iterate blocks within one file.
pub const MAX_BLOCK_DEPTH: usize = 64;

enum Node<'f> {
    Text(&'f [u8]),
    /// Output produced at compile time (use tags).
    Literal(Vec<u8>),
    Output {
        expr: Expr,
        encode: bool,
        horizon: usize,
    },
    Cond {
        branches: Vec<Branch<'f>>,
    },
    Iter {
        expr: Expr,
        source: String,
        item: String,
        index: Option<String>,
        horizon: usize,
        body: Vec<Node<'f>>,
    },
}

struct Branch<'f> {
    /// `None` for the else branch.
    test: Option<(Expr, usize)>,
    body: Vec<Node<'f>>,
}

enum FrameKind<'f> {
    Root,
    Cond {
        done: Vec<Branch<'f>>,
        test: Option<(Expr, usize)>,
        saw_else: bool,
        offset: usize,
    },
    Iter {
        expr: Expr,
        source: String,
        item: String,
        index: Option<String>,
        horizon: usize,
        offset: usize,
    },
}

struct Frame<'f> {
    kind: FrameKind<'f>,
    nodes: Vec<Node<'f>>,
}

/// Scope for compile-time evaluation: defines only.
struct CompileScope<'a> {
    defines: &'a Defines,
}

impl Scope for CompileScope<'_> {
    fn lookup(&self, name: &str) -> Value {
        self.define(name)
    }

    fn define(&self, name: &str) -> Value {
        self.defines.get(name).cloned().unwrap_or(Value::Null)
    }
}

/// Scope for run-time evaluation: locals, then defines up to `horizon`, then variables.
struct RenderScope<'a> {
    defines: &'a Defines,
    horizon: usize,
    vars: &'a Vars,
    locals: &'a [(String, Value)],
}

impl Scope for RenderScope<'_> {
    fn lookup(&self, name: &str) -> Value {
        if let Some((_, v)) = self.locals.iter().rev().find(|(k, _)| k == name) {
            return v.clone();
        }
        if let Some(v) = self.defines.get_within(name, self.horizon) {
            return v.clone();
        }
        self.vars.get(name).cloned().unwrap_or(Value::Null)
    }

    fn define(&self, name: &str) -> Value {
        self.defines
            .get_within(name, self.horizon)
            .cloned()
            .unwrap_or(Value::Null)
    }
}

/// HTML-escape for encode tags.
pub fn encode_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            '/' => out.push_str("&#47;"),
            _ => out.push(c),
        }
    }
    out
}

fn strip_def(name: &str) -> &str {
    name.strip_prefix("def.").unwrap_or(name)
}

fn unbalanced(block: &'static str, offset: usize) -> TemplateError {
    TemplateError::Unbalanced { block, offset }
}

/// Transforms fragments for one grammar.
#[derive(Clone, Copy, Debug)]
pub struct TemplateEngine {
    grammar: &'static Grammar,
}

impl TemplateEngine {
    pub fn new(grammar: &'static Grammar) -> Self {
        Self { grammar }
    }

    pub fn grammar(&self) -> &'static Grammar {
        self.grammar
    }

    /// Transform one fragment. Defines found in the fragment are added to `defines` and stay
    /// visible to later fragments of the same file.
    pub fn apply(
        &self,
        fragment: &[u8],
        defines: &mut Defines,
        vars: &Vars,
    ) -> Result<Vec<u8>, TemplateError> {
        let nodes = self.compile(fragment, defines)?;
        let mut out = Vec::with_capacity(fragment.len());
        let mut locals = Vec::new();
        render(&nodes, defines, vars, &mut locals, &mut out)?;
        Ok(out)
    }

    fn compile<'f>(
        &self,
        fragment: &'f [u8],
        defines: &mut Defines,
    ) -> Result<Vec<Node<'f>>, TemplateError> {
        let mut stack = vec![Frame {
            kind: FrameKind::Root,
            nodes: Vec::new(),
        }];
        let mut cursor = 0;

        for tag in self.grammar.tags(fragment) {
            if tag.start > cursor {
                push(&mut stack, Node::Text(&fragment[cursor..tag.start]));
            }
            cursor = tag.end;
            let content = std::str::from_utf8(&fragment[tag.content_start..tag.content_end])
                .map_err(|_| TemplateError::Utf8 { offset: tag.start })?;
            self.directive(content, tag.start, defines, &mut stack)?;
        }
        if cursor < fragment.len() {
            push(&mut stack, Node::Text(&fragment[cursor..]));
        }

        let root = stack.pop().ok_or_else(|| unbalanced("template", 0))?;
        match root.kind {
            FrameKind::Root => Ok(root.nodes),
            FrameKind::Cond { offset, .. } => Err(unbalanced("conditional", offset)),
            FrameKind::Iter { offset, .. } => Err(unbalanced("iterate", offset)),
        }
    }

    fn directive<'f>(
        &self,
        content: &str,
        offset: usize,
        defines: &mut Defines,
        stack: &mut Vec<Frame<'f>>,
    ) -> Result<(), TemplateError> {
        if let Some(rest) = content.strip_prefix("##") {
            let caps = DIRECTIVES
                .define
                .captures(rest)
                .ok_or_else(|| TemplateError::Syntax {
                    expr: content.to_string(),
                    message: "malformed define".to_string(),
                })?;
            let name = strip_def(&caps[1]).to_string();
            let value = match &caps[2] {
                ":" => Value::Str(caps[3].to_string()),
                _ => {
                    let e = expr::parse(&caps[3])?;
                    expr::eval(&e, &CompileScope { defines })
                }
            };
            defines.define(&name, value);
            return Ok(());
        }

        if let Some(rest) = content.strip_prefix('#') {
            let value = match DIRECTIVES.use_assign.captures(rest) {
                Some(caps) => {
                    let e = expr::parse(&caps[2])?;
                    let v = expr::eval(&e, &CompileScope { defines });
                    defines.define(&caps[1], v);
                    defines.get(&caps[1]).cloned().unwrap_or(Value::Null)
                }
                None => {
                    let e = expr::parse(rest)?;
                    expr::eval(&e, &CompileScope { defines })
                }
            };
            push(stack, Node::Literal(value.to_string().into_bytes()));
            return Ok(());
        }

        if let Some(rest) = content.strip_prefix('?') {
            return self.conditional(rest, offset, defines, stack);
        }

        if let Some(rest) = content.strip_prefix('~') {
            return self.iterate(rest, offset, defines, stack);
        }

        let (src, encode) = match content.as_bytes().first() {
            Some(b'=') => (&content[1..], false),
            Some(b'!') => (&content[1..], true),
            _ => (content, false),
        };
        let node = Node::Output {
            expr: expr::parse(src)?,
            encode,
            horizon: defines.len(),
        };
        push(stack, node);
        Ok(())
    }

    fn conditional<'f>(
        &self,
        rest: &str,
        offset: usize,
        defines: &Defines,
        stack: &mut Vec<Frame<'f>>,
    ) -> Result<(), TemplateError> {
        // `??...`: else-if / else
        if let Some(branch) = rest.strip_prefix('?') {
            let frame = stack
                .last_mut()
                .ok_or_else(|| unbalanced("conditional", offset))?;
            let FrameKind::Cond {
                done,
                test,
                saw_else,
                ..
            } = &mut frame.kind
            else {
                return Err(unbalanced("conditional", offset));
            };
            if *saw_else {
                return Err(unbalanced("conditional", offset));
            }
            let body = std::mem::take(&mut frame.nodes);
            done.push(Branch {
                test: test.take(),
                body,
            });
            let branch = branch.trim();
            if branch.is_empty() {
                *saw_else = true;
            } else {
                *test = Some((expr::parse(branch)?, defines.len()));
            }
            return Ok(());
        }

        let cond = rest.trim();
        if cond.is_empty() {
            // close
            let frame = match stack.pop() {
                Some(f) if matches!(f.kind, FrameKind::Cond { .. }) => f,
                Some(other) => {
                    stack.push(other);
                    return Err(unbalanced("conditional", offset));
                }
                None => return Err(unbalanced("conditional", offset)),
            };
            let FrameKind::Cond { mut done, test, .. } = frame.kind else {
                return Err(unbalanced("conditional", offset));
            };
            done.push(Branch {
                test,
                body: frame.nodes,
            });
            push(stack, Node::Cond { branches: done });
            return Ok(());
        }

        open_block(stack, "conditional", cond)?;
        stack.push(Frame {
            kind: FrameKind::Cond {
                done: Vec::new(),
                test: Some((expr::parse(cond)?, defines.len())),
                saw_else: false,
                offset,
            },
            nodes: Vec::new(),
        });
        Ok(())
    }

    fn iterate<'f>(
        &self,
        rest: &str,
        offset: usize,
        defines: &Defines,
        stack: &mut Vec<Frame<'f>>,
    ) -> Result<(), TemplateError> {
        if rest.trim().is_empty() {
            let frame = match stack.pop() {
                Some(f) if matches!(f.kind, FrameKind::Iter { .. }) => f,
                Some(other) => {
                    stack.push(other);
                    return Err(unbalanced("iterate", offset));
                }
                None => return Err(unbalanced("iterate", offset)),
            };
            let FrameKind::Iter {
                expr,
                source,
                item,
                index,
                horizon,
                ..
            } = frame.kind
            else {
                return Err(unbalanced("iterate", offset));
            };
            push(
                stack,
                Node::Iter {
                    expr,
                    source,
                    item,
                    index,
                    horizon,
                    body: frame.nodes,
                },
            );
            return Ok(());
        }

        let caps = DIRECTIVES
            .iterate
            .captures(rest)
            .ok_or_else(|| TemplateError::Syntax {
                expr: rest.trim().to_string(),
                message: "expected `list:item` or `list:item:index`".to_string(),
            })?;
        let source = caps[1].trim().to_string();
        open_block(stack, "iterate", &source)?;
        stack.push(Frame {
            kind: FrameKind::Iter {
                expr: expr::parse(&source)?,
                source,
                item: caps[2].to_string(),
                index: caps.get(3).map(|m| m.as_str().to_string()),
                horizon: defines.len(),
                offset,
            },
            nodes: Vec::new(),
        });
        Ok(())
    }
}

/// Refuse to open another block once [`MAX_BLOCK_DEPTH`] blocks are open.
fn open_block(stack: &[Frame<'_>], block: &str, expr: &str) -> Result<(), TemplateError> {
    // The root frame is not a block.
    if stack.len() > MAX_BLOCK_DEPTH {
        return Err(TemplateError::Syntax {
            expr: expr.to_string(),
            message: format!("{block} blocks nested deeper than {MAX_BLOCK_DEPTH} levels"),
        });
    }
    Ok(())
}

fn push<'f>(stack: &mut [Frame<'f>], node: Node<'f>) {
    if let Some(frame) = stack.last_mut() {
        frame.nodes.push(node);
    }
}

fn render(
    nodes: &[Node<'_>],
    defines: &Defines,
    vars: &Vars,
    locals: &mut Vec<(String, Value)>,
    out: &mut Vec<u8>,
) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(bytes) => out.extend_from_slice(bytes),
            Node::Literal(bytes) => out.extend_from_slice(bytes),
            Node::Output {
                expr,
                encode,
                horizon,
            } => {
                let scope = RenderScope {
                    defines,
                    horizon: *horizon,
                    vars,
                    locals,
                };
                let text = expr::eval(expr, &scope).to_string();
                if *encode {
                    out.extend_from_slice(encode_html(&text).as_bytes());
                } else {
                    out.extend_from_slice(text.as_bytes());
                }
            }
            Node::Cond { branches } => {
                for branch in branches {
                    let taken = match &branch.test {
                        None => true,
                        Some((test, horizon)) => {
                            let scope = RenderScope {
                                defines,
                                horizon: *horizon,
                                vars,
                                locals,
                            };
                            expr::eval(test, &scope).truthy()
                        }
                    };
                    if taken {
                        render(&branch.body, defines, vars, locals, out)?;
                        break;
                    }
                }
            }
            Node::Iter {
                expr,
                source,
                item,
                index,
                horizon,
                body,
            } => {
                let scope = RenderScope {
                    defines,
                    horizon: *horizon,
                    vars,
                    locals,
                };
                let pairs: Vec<(Value, Value)> = match expr::eval(expr, &scope) {
                    Value::Null => Vec::new(),
                    Value::List(items) => items
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| (v, Value::from(i)))
                        .collect(),
                    Value::Map(map) => map.into_iter().map(|(k, v)| (v, Value::Str(k))).collect(),
                    other => {
                        return Err(TemplateError::NotIterable {
                            expr: source.clone(),
                            found: other.type_name(),
                        });
                    }
                };
                for (value, position) in pairs {
                    let depth = locals.len();
                    locals.push((item.clone(), value));
                    if let Some(index) = index {
                        locals.push((index.clone(), position));
                    }
                    render(body, defines, vars, locals, out)?;
                    locals.truncate(depth);
                }
            }
        }
    }
    Ok(())
}
