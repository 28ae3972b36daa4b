//! Comment-directive scanning: conditional blocks and unroll hints.
//!
//! Directives ride in line comments and never affect tokenization:
//!
//! ```text
//! //gen:if f32 && avx2
//! ...
//! //gen:else
//! ...
//! //gen:endif
//! //gen:unroll 4
//! ```
//!
//! Conditions are boolean expressions over type tags (`f64`), target tags
//! (`neon`), and category tags (`float`, `int`, `uint`, `half`), with
//! `&&`, `||`, `!` and parentheses. AND binds tighter than OR.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    error::{GenError, GenResult},
    lexer::CommentLine,
    target::Target,
    types::ElemType,
};

static DIRECTIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*gen:(if|else|endif|unroll)\b\s*(.*)$").expect("directive regex compiles"));

/// A parsed condition tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cond {
    Tag(String),
    Not(Box<Cond>),
    And(Box<Cond>, Box<Cond>),
    Or(Box<Cond>, Box<Cond>),
}

impl Cond {
    /// Evaluates the condition against a target and element type.
    ///
    /// A tag is true when it names the element type, its category, the
    /// target, or the target's architecture.
    pub fn eval(&self, target: &Target, elem: ElemType) -> bool {
        match self {
            Self::Tag(tag) => {
                let tag = tag.as_str();
                tag == elem.to_string()
                    || tag == target.name
                    || tag == target.arch.as_str()
                    || (tag == "float" && elem.is_float())
                    || (tag == "int" && elem.is_signed_int())
                    || (tag == "uint" && elem.is_unsigned_int())
                    || (tag == "half" && elem.is_half())
            }
            Self::Not(inner) => !inner.eval(target, elem),
            Self::And(a, b) => a.eval(target, elem) && b.eval(target, elem),
            Self::Or(a, b) => a.eval(target, elem) || b.eval(target, elem),
        }
    }

    /// Parses a condition expression; AND binds tighter than OR.
    pub fn parse(text: &str, line: u32) -> GenResult<Self> {
        let tokens = cond_tokens(text, line)?;
        let mut parser = CondParser { tokens, pos: 0, line };
        let cond = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(GenError::directive(
                format!("trailing tokens in condition `{text}`"),
                line,
            ));
        }
        Ok(cond)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum CondToken {
    Tag(String),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn cond_tokens(text: &str, line: u32) -> GenResult<Vec<CondToken>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(CondToken::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(CondToken::RParen);
            }
            '!' => {
                chars.next();
                tokens.push(CondToken::Not);
            }
            '&' => {
                chars.next();
                if chars.next() != Some('&') {
                    return Err(GenError::directive("expected `&&` in condition", line));
                }
                tokens.push(CondToken::And);
            }
            '|' => {
                chars.next();
                if chars.next() != Some('|') {
                    return Err(GenError::directive("expected `||` in condition", line));
                }
                tokens.push(CondToken::Or);
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let mut tag = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        tag.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(CondToken::Tag(tag));
            }
            other => {
                return Err(GenError::directive(format!("unexpected character {other:?} in condition"), line));
            }
        }
    }
    Ok(tokens)
}

struct CondParser {
    tokens: Vec<CondToken>,
    pos: usize,
    line: u32,
}

impl CondParser {
    fn peek(&self) -> Option<&CondToken> {
        self.tokens.get(self.pos)
    }

    fn parse_or(&mut self) -> GenResult<Cond> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&CondToken::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Cond::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> GenResult<Cond> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&CondToken::And) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Cond::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> GenResult<Cond> {
        match self.peek().cloned() {
            Some(CondToken::Not) => {
                self.pos += 1;
                Ok(Cond::Not(Box::new(self.parse_unary()?)))
            }
            Some(CondToken::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                if self.peek() != Some(&CondToken::RParen) {
                    return Err(GenError::directive("unbalanced parentheses in condition", self.line));
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(CondToken::Tag(tag)) => {
                self.pos += 1;
                Ok(Cond::Tag(tag))
            }
            _ => Err(GenError::directive("expected tag in condition", self.line)),
        }
    }
}

/// A conditional source block delimited by `gen:if` / `gen:endif`.
///
/// Lines strictly between the delimiters belong to the block; when an else
/// arm is present, lines after `gen:else` form the negative branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalBlock {
    pub cond: Cond,
    pub if_line: u32,
    pub else_line: Option<u32>,
    pub end_line: u32,
}

impl ConditionalBlock {
    /// Whether a statement starting at `line` should be dropped for the
    /// given target and element type.
    pub fn drops_line(&self, line: u32, target: &Target, elem: ElemType) -> bool {
        if line <= self.if_line || line >= self.end_line {
            return false;
        }
        let active = self.cond.eval(target, elem);
        match self.else_line {
            Some(else_line) if line > else_line => active,
            Some(else_line) if line < else_line => !active,
            Some(_) => false,
            None => !active,
        }
    }
}

/// An unroll hint attached to the loop that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnrollDirective {
    pub line: u32,
    pub factor: u32,
}

/// All directives recovered from a unit's comments.
#[derive(Debug, Default)]
pub struct Directives {
    pub blocks: Vec<ConditionalBlock>,
    pub unrolls: Vec<UnrollDirective>,
}

impl Directives {
    /// The unroll factor for a loop starting at `loop_line`, tolerating the
    /// directive sitting one or two lines above.
    pub fn unroll_factor(&self, loop_line: u32) -> u32 {
        self.unrolls
            .iter()
            .find(|u| u.line < loop_line && loop_line - u.line <= 2)
            .map_or(0, |u| u.factor)
    }
}

/// Scans collected comments for directives.
///
/// Nested blocks are supported via a stack. Blocks left unclosed at end of
/// input are dropped rather than reported.
pub fn scan(comments: &[CommentLine]) -> GenResult<Directives> {
    let mut out = Directives::default();
    let mut stack: Vec<ConditionalBlock> = Vec::new();
    for comment in comments {
        let Some(caps) = DIRECTIVE_RE.captures(&comment.text) else {
            continue;
        };
        let verb = caps.get(1).expect("group 1 always present").as_str();
        let rest = caps.get(2).expect("group 2 always present").as_str().trim();
        match verb {
            "if" => {
                let cond = Cond::parse(rest, comment.line)?;
                stack.push(ConditionalBlock {
                    cond,
                    if_line: comment.line,
                    else_line: None,
                    end_line: 0,
                });
            }
            "else" => {
                let Some(block) = stack.last_mut() else {
                    return Err(GenError::directive("gen:else without matching gen:if", comment.line));
                };
                if block.else_line.is_some() {
                    return Err(GenError::directive("duplicate gen:else", comment.line));
                }
                block.else_line = Some(comment.line);
            }
            "endif" => {
                let Some(mut block) = stack.pop() else {
                    return Err(GenError::directive("gen:endif without matching gen:if", comment.line));
                };
                block.end_line = comment.line;
                out.blocks.push(block);
            }
            "unroll" => {
                let factor: u32 = rest
                    .parse()
                    .map_err(|_| GenError::directive(format!("invalid unroll factor `{rest}`"), comment.line))?;
                out.unrolls.push(UnrollDirective {
                    line: comment.line,
                    factor,
                });
            }
            _ => unreachable!("regex restricts verbs"),
        }
    }
    // unclosed blocks are dropped
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target;

    fn comment(line: u32, text: &str) -> CommentLine {
        CommentLine {
            line,
            text: text.to_owned(),
        }
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let cond = Cond::parse("f32 || f64 && neon", 1).expect("parses");
        // f32 || (f64 && neon): true for f32 on any target
        let avx2 = target::get("avx2").expect("catalog has avx2");
        assert!(cond.eval(avx2, ElemType::F32));
        assert!(!cond.eval(avx2, ElemType::F64), "f64 requires neon on the right arm");
    }

    #[test]
    fn nested_blocks_close_in_order() {
        let dirs = scan(&[
            comment(1, "gen:if float"),
            comment(3, "gen:if avx512"),
            comment(5, "gen:endif"),
            comment(7, "gen:endif"),
        ])
        .expect("scans");
        assert_eq!(dirs.blocks.len(), 2);
        assert_eq!(dirs.blocks[0].if_line, 3, "inner block closes first");
        assert_eq!(dirs.blocks[1].end_line, 7);
    }

    #[test]
    fn unclosed_blocks_are_dropped() {
        let dirs = scan(&[comment(1, "gen:if f32")]).expect("scans");
        assert!(dirs.blocks.is_empty());
    }

    #[test]
    fn else_flips_dropped_span() {
        let block = ConditionalBlock {
            cond: Cond::Tag("f32".to_owned()),
            if_line: 1,
            else_line: Some(5),
            end_line: 9,
        };
        let neon = target::get("neon").expect("catalog has neon");
        assert!(!block.drops_line(3, neon, ElemType::F32), "true branch kept");
        assert!(block.drops_line(7, neon, ElemType::F32), "else branch dropped");
        assert!(block.drops_line(3, neon, ElemType::F64), "false cond drops if branch");
        assert!(!block.drops_line(7, neon, ElemType::F64));
    }

    #[test]
    fn unroll_adjacency_tolerates_two_lines() {
        let dirs = scan(&[comment(10, "gen:unroll 4")]).expect("scans");
        assert_eq!(dirs.unroll_factor(11), 4);
        assert_eq!(dirs.unroll_factor(12), 4);
        assert_eq!(dirs.unroll_factor(13), 0);
    }
}
