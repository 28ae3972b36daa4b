//! Source-unit parser: recovers the typed, generic, SIMD-aware IR.
//!
//! The parser consumes the token stream from [`crate::lexer`] and produces a
//! [`ParseResult`]: admitted base functions, type-specific constants,
//! conditional directive blocks, and the import table. Only functions named
//! `Base*`/`base*` are considered, and of those only the ones that reference
//! the recognized op universe or carry a recognized generic constraint.

use ahash::AHashSet;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    ast::{BinOp, CallTarget, CodeRange, Expr, ExprLoc, Literal, Stmt, UnOp},
    directives::{self, ConditionalBlock, Directives},
    error::{GenError, GenResult},
    lexer::{self, Token, TokenKind},
    ops::Op,
    types::{Constraint, ElemType, TypeExpr},
};

/// Package aliases with built-in meaning, independent of the import table.
///
/// `hwy` is the core library; the rest are in-repo contrib subpackages.
/// The standard `math` package is recognized for scalar helpers.
pub const KNOWN_ALIASES: &[&str] = &[
    "hwy", "math", "vec", "matvec", "matmul", "algo", "image", "bitpack", "sort",
];

/// A value parameter or return in a function signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: TypeExpr,
}

/// A type parameter with its constraint family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeParam {
    pub name: String,
    pub constraint: Constraint,
}

/// A deduplicated reference to a called symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallRef {
    /// Package alias, `None` for bare same-unit references.
    pub pkg: Option<String>,
    pub name: String,
}

/// Descriptor of a function's main vectorized loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopInfo {
    /// Iterator variable name.
    pub var: String,
    pub start: ExprLoc,
    /// Loop bound (the comparison's right-hand side).
    pub end: ExprLoc,
    /// Stride expression (the post statement's right-hand side).
    pub stride: ExprLoc,
    /// Index of the `for` statement in the function's top-level body.
    pub stmt_index: usize,
}

/// A parsed base function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedFunc {
    pub name: String,
    /// Derived from capitalization: `Base*` is exported, `base*` is not.
    pub exported: bool,
    pub type_params: Vec<TypeParam>,
    pub params: Vec<Param>,
    pub returns: Vec<Param>,
    pub body: Vec<Stmt>,
    pub calls: Vec<CallRef>,
    pub loop_info: Option<LoopInfo>,
    /// Factor from a preceding unroll directive, zero when absent.
    pub unroll_hint: u32,
    pub position: CodeRange,
}

impl ParsedFunc {
    /// All concrete element types this function expands to.
    ///
    /// Non-generic functions produce a single empty expansion handled by the
    /// transformer as "no substitution".
    pub fn expansion(&self) -> Vec<ElemType> {
        self.type_params
            .first()
            .map(|tp| tp.constraint.expansion())
            .unwrap_or_default()
    }

    /// True when any parameter or return mentions the opaque vector type.
    pub fn signature_mentions_vector(&self) -> bool {
        self.params
            .iter()
            .chain(&self.returns)
            .any(|p| p.ty.mentions_vector())
    }
}

/// A type-specific constant family, e.g. `expTable_f32` / `expTable_f64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSpecificConst {
    pub base: String,
    pub variants: Vec<ElemType>,
}

/// Everything recovered from one source unit.
#[derive(Debug)]
pub struct ParseResult {
    pub package_name: String,
    pub functions: Vec<ParsedFunc>,
    /// Base name -> variants, in declaration order.
    pub consts: IndexMap<String, TypeSpecificConst>,
    pub blocks: Vec<ConditionalBlock>,
    pub directives: Directives,
    /// Alias -> import path, in declaration order.
    pub imports: IndexMap<String, String>,
    /// Names of every top-level function in the unit, admitted or not.
    pub all_funcs: Vec<String>,
}

/// Parses a whole source unit.
pub fn parse_unit(code: &str, filename: &str) -> GenResult<ParseResult> {
    let stream = lexer::tokenize(code)?;
    let directives = directives::scan(&stream.comments)?;
    let mut parser = Parser::new(stream.tokens, filename);
    parser.parse_unit(directives)
}

/// Merges a second unit's parse result into the first (multi-file packages).
pub fn merge(into: &mut ParseResult, other: ParseResult) {
    into.functions.extend(other.functions);
    for (base, c) in other.consts {
        match into.consts.entry(base) {
            indexmap::map::Entry::Occupied(mut e) => {
                for v in c.variants {
                    if !e.get().variants.contains(&v) {
                        e.get_mut().variants.push(v);
                    }
                }
            }
            indexmap::map::Entry::Vacant(e) => {
                e.insert(c);
            }
        }
    }
    into.blocks.extend(other.blocks);
    for (alias, path) in other.imports {
        into.imports.entry(alias).or_insert(path);
    }
    into.all_funcs.extend(other.all_funcs);
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    filename: String,
    /// Type-parameter names of the function currently being parsed; used to
    /// read bracketed arguments as types rather than index expressions.
    type_param_names: AHashSet<String>,
}

impl Parser {
    fn new(tokens: Vec<Token>, filename: &str) -> Self {
        Self {
            tokens,
            pos: 0,
            filename: filename.to_owned(),
            type_param_names: AHashSet::new(),
        }
    }

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn here(&self) -> CodeRange {
        self.tokens[self.pos.min(self.tokens.len() - 1)].range()
    }

    fn bump(&mut self) -> TokenKind {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].kind.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: &TokenKind, context: &str) -> GenResult<()> {
        if self.peek() == kind {
            self.bump();
            Ok(())
        } else {
            Err(self.unexpected(context))
        }
    }

    fn unexpected(&self, context: &str) -> GenError {
        GenError::syntax(
            format!("unexpected token {:?} while parsing {context} in {}", self.peek(), self.filename),
            self.here(),
        )
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.bump();
            true
        } else {
            false
        }
    }

    fn skip_semis(&mut self) {
        while self.eat(&TokenKind::Semi) {}
    }

    fn ident(&mut self, context: &str) -> GenResult<String> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.bump();
                Ok(name)
            }
            _ => Err(self.unexpected(context)),
        }
    }

    // ------------------------------------------------------------------
    // Unit structure
    // ------------------------------------------------------------------

    fn parse_unit(&mut self, directives: Directives) -> GenResult<ParseResult> {
        self.skip_semis();
        self.expect(&TokenKind::KwPackage, "package clause")?;
        let package_name = self.ident("package name")?;
        self.skip_semis();

        let mut imports = IndexMap::new();
        let mut consts = IndexMap::new();
        let mut functions = Vec::new();
        let mut all_funcs = Vec::new();

        loop {
            self.skip_semis();
            match self.peek() {
                TokenKind::Eof => break,
                TokenKind::KwImport => self.parse_import(&mut imports)?,
                TokenKind::KwVar | TokenKind::KwConst => self.parse_top_decl(&mut consts)?,
                TokenKind::KwType => self.skip_balanced_decl()?,
                TokenKind::KwFunc => {
                    if let Some(func) = self.parse_func(&directives, &mut all_funcs)? {
                        functions.push(func);
                    }
                }
                _ => return Err(self.unexpected("top-level declaration")),
            }
        }

        // Retain only functions that use the recognized universe or still
        // require generic specialization.
        functions.retain(|f| {
            let uses_ops = f.calls.iter().any(|c| match c.pkg.as_deref() {
                None | Some("hwy") => Op::recognize(&c.name).is_some(),
                Some(pkg) => KNOWN_ALIASES.contains(&pkg),
            });
            let calls_bases = f
                .calls
                .iter()
                .any(|c| c.name.starts_with("Base") || c.name.starts_with("base"));
            uses_ops || calls_bases || !f.type_params.is_empty()
        });

        Ok(ParseResult {
            package_name,
            functions,
            consts,
            blocks: directives.blocks.clone(),
            directives,
            imports,
            all_funcs,
        })
    }

    fn parse_import(&mut self, imports: &mut IndexMap<String, String>) -> GenResult<()> {
        self.bump(); // import
        if self.eat(&TokenKind::LParen) {
            loop {
                self.skip_semis();
                if self.eat(&TokenKind::RParen) {
                    break;
                }
                self.parse_import_line(imports)?;
            }
        } else {
            self.parse_import_line(imports)?;
        }
        Ok(())
    }

    fn parse_import_line(&mut self, imports: &mut IndexMap<String, String>) -> GenResult<()> {
        let alias = match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.bump();
                Some(name)
            }
            _ => None,
        };
        let path = match self.bump() {
            TokenKind::Str(path) => path,
            _ => return Err(self.unexpected("import path")),
        };
        // Blank imports carry no alias binding.
        if alias.as_deref() == Some("_") {
            return Ok(());
        }
        let alias = alias.unwrap_or_else(|| {
            path.rsplit('/')
                .next()
                .expect("split never yields an empty iterator")
                .to_owned()
        });
        imports.insert(alias, path);
        Ok(())
    }

    /// Top-level `var`/`const` declarations: only identifier names matter
    /// here (for type-suffix registration); initializers are skipped with
    /// bracket balancing so composite literals never confuse the parser.
    fn parse_top_decl(&mut self, consts: &mut IndexMap<String, TypeSpecificConst>) -> GenResult<()> {
        self.bump(); // var | const
        if self.eat(&TokenKind::LParen) {
            loop {
                self.skip_semis();
                if self.eat(&TokenKind::RParen) {
                    break;
                }
                self.parse_decl_line(consts)?;
            }
        } else {
            self.parse_decl_line(consts)?;
        }
        Ok(())
    }

    fn parse_decl_line(&mut self, consts: &mut IndexMap<String, TypeSpecificConst>) -> GenResult<()> {
        let name = self.ident("declaration name")?;
        if let Some((base, elem)) = ElemType::split_suffix(&name) {
            let entry = consts.entry(base.to_owned()).or_insert_with(|| TypeSpecificConst {
                base: base.to_owned(),
                variants: Vec::new(),
            });
            if !entry.variants.contains(&elem) {
                entry.variants.push(elem);
            }
        }
        self.skip_to_stmt_end()?;
        Ok(())
    }

    /// Skips tokens until a statement-ending semicolon at bracket depth zero.
    fn skip_to_stmt_end(&mut self) -> GenResult<()> {
        let mut depth = 0i32;
        loop {
            match self.peek() {
                TokenKind::Eof => return Ok(()),
                TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => {
                    depth += 1;
                    self.bump();
                }
                TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                    if depth == 0 {
                        return Ok(());
                    }
                    depth -= 1;
                    self.bump();
                }
                TokenKind::Semi if depth == 0 => {
                    self.bump();
                    return Ok(());
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    /// Skips a whole declaration including any brace-delimited body.
    fn skip_balanced_decl(&mut self) -> GenResult<()> {
        let mut depth = 0i32;
        loop {
            match self.bump() {
                TokenKind::Eof => return Ok(()),
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                TokenKind::Semi if depth == 0 => return Ok(()),
                _ => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    fn parse_func(&mut self, directives: &Directives, all_funcs: &mut Vec<String>) -> GenResult<Option<ParsedFunc>> {
        let position = self.here();
        self.bump(); // func
        // Methods (any receiver) are skipped entirely.
        if self.peek() == &TokenKind::LParen {
            self.skip_balanced_decl()?;
            return Ok(None);
        }
        let name = self.ident("function name")?;
        all_funcs.push(name.clone());
        let is_base = name.starts_with("Base") || name.starts_with("base");
        if !is_base {
            self.skip_balanced_decl()?;
            return Ok(None);
        }
        let exported = name.starts_with("Base");

        let type_params = if self.peek() == &TokenKind::LBracket {
            self.parse_type_params()?
        } else {
            Vec::new()
        };
        self.type_param_names = type_params.iter().map(|tp| tp.name.clone()).collect();

        self.expect(&TokenKind::LParen, "parameter list")?;
        let params = self.parse_params()?;
        let returns = self.parse_returns()?;

        self.expect(&TokenKind::LBrace, "function body")?;
        let body = self.parse_block()?;
        self.type_param_names.clear();

        let loop_info = detect_main_loop(&body);
        let unroll_hint = loop_info
            .as_ref()
            .map_or(0, |li| directives.unroll_factor(body[li.stmt_index].position().start_line));

        let calls = collect_calls(&body);

        Ok(Some(ParsedFunc {
            name,
            exported,
            type_params,
            params,
            returns,
            body,
            calls,
            loop_info,
            unroll_hint,
            position,
        }))
    }

    fn parse_type_params(&mut self) -> GenResult<Vec<TypeParam>> {
        self.expect(&TokenKind::LBracket, "type parameters")?;
        let mut out = Vec::new();
        loop {
            let name = self.ident("type parameter name")?;
            let mut constraint_text = self.ident("type constraint")?;
            while self.eat(&TokenKind::Pipe) {
                constraint_text.push_str(" | ");
                constraint_text.push_str(&self.ident("type constraint member")?);
            }
            let constraint = Constraint::parse(&constraint_text)
                .ok_or_else(|| GenError::syntax(format!("unrecognized constraint `{constraint_text}`"), self.here()))?;
            out.push(TypeParam { name, constraint });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBracket, "type parameters")?;
        Ok(out)
    }

    fn parse_params(&mut self) -> GenResult<Vec<Param>> {
        let mut out = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Ok(out);
        }
        loop {
            // A name group shares one trailing type: `v, w hwy.Vec[T]`.
            let mut names: SmallVec<[String; 2]> = SmallVec::new();
            names.push(self.ident("parameter name")?);
            while self.eat(&TokenKind::Comma) {
                names.push(self.ident("parameter name")?);
            }
            let ty = self.parse_type()?;
            for name in names {
                out.push(Param { name, ty: ty.clone() });
            }
            if self.eat(&TokenKind::RParen) {
                break;
            }
            self.expect(&TokenKind::Comma, "parameter list")?;
            if self.eat(&TokenKind::RParen) {
                break;
            }
        }
        Ok(out)
    }

    fn parse_returns(&mut self) -> GenResult<Vec<Param>> {
        match self.peek() {
            TokenKind::LBrace => Ok(Vec::new()),
            TokenKind::LParen => {
                self.bump();
                let mut out = Vec::new();
                loop {
                    let ty = self.parse_type()?;
                    out.push(Param {
                        name: String::new(),
                        ty,
                    });
                    if self.eat(&TokenKind::RParen) {
                        break;
                    }
                    self.expect(&TokenKind::Comma, "return list")?;
                }
                Ok(out)
            }
            _ => {
                let ty = self.parse_type()?;
                Ok(vec![Param {
                    name: String::new(),
                    ty,
                }])
            }
        }
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    fn parse_type(&mut self) -> GenResult<TypeExpr> {
        match self.peek().clone() {
            TokenKind::LBracket => {
                // only slice types here: `[]T`
                self.bump();
                self.expect(&TokenKind::RBracket, "slice type")?;
                Ok(TypeExpr::Slice(Box::new(self.parse_type()?)))
            }
            TokenKind::Star => {
                self.bump();
                Ok(TypeExpr::Pointer(Box::new(self.parse_type()?)))
            }
            TokenKind::KwFunc => {
                self.bump();
                self.expect(&TokenKind::LParen, "function type")?;
                let mut params = Vec::new();
                if !self.eat(&TokenKind::RParen) {
                    loop {
                        params.push(self.parse_type()?);
                        if self.eat(&TokenKind::RParen) {
                            break;
                        }
                        self.expect(&TokenKind::Comma, "function type parameters")?;
                    }
                }
                let ret = match self.peek() {
                    TokenKind::LBrace | TokenKind::RParen | TokenKind::Comma | TokenKind::Semi | TokenKind::RBracket => {
                        None
                    }
                    _ => Some(Box::new(self.parse_type()?)),
                };
                Ok(TypeExpr::Func { params, ret })
            }
            TokenKind::Ident(first) => {
                self.bump();
                let mut name = first;
                if self.eat(&TokenKind::Dot) {
                    let field = self.ident("qualified type name")?;
                    name = format!("{name}.{field}");
                }
                if self.peek() == &TokenKind::LBracket {
                    self.bump();
                    let mut args = Vec::new();
                    loop {
                        args.push(self.parse_type()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RBracket, "type arguments")?;
                    return Ok(match strip_core(&name) {
                        "Vec" => TypeExpr::Vec(Box::new(args.remove(0))),
                        "Mask" => TypeExpr::Mask(Box::new(args.remove(0))),
                        "Pred" => TypeExpr::Pred(Box::new(args.remove(0))),
                        _ => TypeExpr::Generic { name, args },
                    });
                }
                if self.type_param_names.contains(&name) {
                    Ok(TypeExpr::Param(name))
                } else {
                    Ok(TypeExpr::Named(name))
                }
            }
            _ => Err(self.unexpected("type expression")),
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Parses statements up to (and consuming) the closing brace.
    fn parse_block(&mut self) -> GenResult<Vec<Stmt>> {
        let mut out = Vec::new();
        loop {
            self.skip_semis();
            if self.eat(&TokenKind::RBrace) {
                return Ok(out);
            }
            if self.peek() == &TokenKind::Eof {
                return Err(self.unexpected("block (missing closing brace)"));
            }
            out.push(self.parse_stmt()?);
        }
    }

    fn parse_stmt(&mut self) -> GenResult<Stmt> {
        let position = self.here();
        match self.peek().clone() {
            TokenKind::KwVar => {
                self.bump();
                let name = self.ident("variable name")?;
                let ty = match self.peek() {
                    TokenKind::Assign | TokenKind::Semi => None,
                    _ => Some(self.parse_type()?),
                };
                let value = if self.eat(&TokenKind::Assign) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                Ok(Stmt::VarDecl {
                    name,
                    ty,
                    value,
                    position,
                })
            }
            TokenKind::KwReturn => {
                self.bump();
                let value = if matches!(self.peek(), TokenKind::Semi | TokenKind::RBrace) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                Ok(Stmt::Return { value, position })
            }
            TokenKind::KwBreak => {
                self.bump();
                Ok(Stmt::Break { position })
            }
            TokenKind::KwContinue => {
                self.bump();
                Ok(Stmt::Continue { position })
            }
            TokenKind::KwIf => self.parse_if(),
            TokenKind::KwFor => self.parse_for(),
            _ => self.parse_simple_stmt(),
        }
    }

    fn parse_if(&mut self) -> GenResult<Stmt> {
        let position = self.here();
        self.bump(); // if
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::LBrace, "if body")?;
        let body = self.parse_block()?;
        let or_else = if self.eat(&TokenKind::KwElse) {
            if self.peek() == &TokenKind::KwIf {
                vec![self.parse_if()?]
            } else {
                self.expect(&TokenKind::LBrace, "else body")?;
                self.parse_block()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If {
            cond,
            body,
            or_else,
            position,
        })
    }

    fn parse_for(&mut self) -> GenResult<Stmt> {
        let position = self.here();
        self.bump(); // for
        // `for { ... }` and `for cond { ... }` have no init/post clauses.
        if self.eat(&TokenKind::LBrace) {
            let body = self.parse_block()?;
            return Ok(Stmt::For {
                init: None,
                cond: None,
                post: None,
                body,
                position,
            });
        }
        // Try three-clause form first: `for init; cond; post { ... }`.
        let checkpoint = self.pos;
        let first = if self.peek() == &TokenKind::Semi {
            None
        } else {
            Some(self.parse_simple_stmt()?)
        };
        if self.eat(&TokenKind::Semi) {
            let cond = if self.peek() == &TokenKind::Semi {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.expect(&TokenKind::Semi, "for clauses")?;
            let post = if self.peek() == &TokenKind::LBrace {
                None
            } else {
                Some(Box::new(self.parse_simple_stmt()?))
            };
            self.expect(&TokenKind::LBrace, "for body")?;
            let body = self.parse_block()?;
            return Ok(Stmt::For {
                init: first.map(Box::new),
                cond,
                post,
                body,
                position,
            });
        }
        // Condition-only form: rewind and parse `for cond { ... }`.
        self.pos = checkpoint;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::LBrace, "for body")?;
        let body = self.parse_block()?;
        Ok(Stmt::For {
            init: None,
            cond: Some(cond),
            post: None,
            body,
            position,
        })
    }

    /// Simple statements: declarations, assignments, inc/dec, expressions.
    fn parse_simple_stmt(&mut self) -> GenResult<Stmt> {
        let position = self.here();
        let lhs = self.parse_expr()?;
        match self.peek().clone() {
            TokenKind::Define => {
                self.bump();
                let name = match lhs.expr {
                    Expr::Name(name) => name,
                    _ => return Err(GenError::syntax("left side of `:=` must be an identifier", position)),
                };
                let value = self.parse_expr()?;
                Ok(Stmt::ShortDecl {
                    name,
                    value,
                    position,
                })
            }
            TokenKind::Assign => {
                self.bump();
                let value = self.parse_expr()?;
                Ok(Stmt::Assign {
                    target: lhs,
                    value,
                    position,
                })
            }
            TokenKind::PlusAssign | TokenKind::MinusAssign | TokenKind::StarAssign | TokenKind::SlashAssign => {
                let op = match self.bump() {
                    TokenKind::PlusAssign => BinOp::Add,
                    TokenKind::MinusAssign => BinOp::Sub,
                    TokenKind::StarAssign => BinOp::Mul,
                    TokenKind::SlashAssign => BinOp::Div,
                    _ => unreachable!("matched above"),
                };
                let value = self.parse_expr()?;
                Ok(Stmt::OpAssign {
                    target: lhs,
                    op,
                    value,
                    position,
                })
            }
            // `i++` / `i--` lower to op-assignment with a literal one.
            TokenKind::Inc | TokenKind::Dec => {
                let op = if self.bump() == TokenKind::Inc { BinOp::Add } else { BinOp::Sub };
                Ok(Stmt::OpAssign {
                    target: lhs,
                    op,
                    value: ExprLoc::new(position, Expr::Lit(Literal::Int(1))),
                    position,
                })
            }
            _ => Ok(Stmt::Expr(lhs)),
        }
    }

    // ------------------------------------------------------------------
    // Expressions (precedence climbing)
    // ------------------------------------------------------------------

    fn parse_expr(&mut self) -> GenResult<ExprLoc> {
        self.parse_binary(1)
    }

    fn parse_binary(&mut self, min_prec: u8) -> GenResult<ExprLoc> {
        let mut left = self.parse_unary()?;
        loop {
            let Some((op, prec)) = binop_for(self.peek()) else {
                return Ok(left);
            };
            if prec < min_prec {
                return Ok(left);
            }
            self.bump();
            let right = self.parse_binary(prec + 1)?;
            let position = left.position;
            left = ExprLoc::new(
                position,
                Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            );
        }
    }

    fn parse_unary(&mut self) -> GenResult<ExprLoc> {
        let position = self.here();
        let op = match self.peek() {
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::Bang => Some(UnOp::Not),
            TokenKind::Caret => Some(UnOp::BitNot),
            TokenKind::Amp => Some(UnOp::Addr),
            TokenKind::Star => Some(UnOp::Deref),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let operand = self.parse_unary()?;
            return Ok(ExprLoc::new(
                position,
                Expr::Unary {
                    op,
                    operand: Box::new(operand),
                },
            ));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> GenResult<ExprLoc> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek().clone() {
                TokenKind::Dot => {
                    self.bump();
                    let field = self.ident("selector field")?;
                    if self.peek() == &TokenKind::LParen {
                        self.bump();
                        let args = self.parse_call_args()?;
                        let position = expr.position;
                        expr = ExprLoc::new(position, classify_selector_call(expr, field, Vec::new(), args));
                    } else {
                        let position = expr.position;
                        expr = ExprLoc::new(
                            position,
                            Expr::Selector {
                                object: Box::new(expr),
                                field,
                            },
                        );
                    }
                }
                TokenKind::LParen => {
                    self.bump();
                    let args = self.parse_call_args()?;
                    let position = expr.position;
                    expr = ExprLoc::new(position, self.make_call(expr, Vec::new(), args)?);
                }
                TokenKind::LBracket => {
                    self.bump();
                    // Either an index/slice expression or explicit type
                    // arguments on a generic call.
                    if self.looks_like_type_args() {
                        let mut type_args = Vec::new();
                        loop {
                            type_args.push(self.parse_type()?);
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                        self.expect(&TokenKind::RBracket, "type arguments")?;
                        self.expect(&TokenKind::LParen, "generic call")?;
                        let args = self.parse_call_args()?;
                        let position = expr.position;
                        expr = ExprLoc::new(position, self.make_call(expr, type_args, args)?);
                        continue;
                    }
                    if self.eat(&TokenKind::Colon) {
                        // `x[:high]`
                        let high = if self.peek() == &TokenKind::RBracket {
                            None
                        } else {
                            Some(Box::new(self.parse_expr()?))
                        };
                        self.expect(&TokenKind::RBracket, "slice expression")?;
                        let position = expr.position;
                        expr = ExprLoc::new(
                            position,
                            Expr::SliceExpr {
                                object: Box::new(expr),
                                low: None,
                                high,
                            },
                        );
                        continue;
                    }
                    let index = self.parse_expr()?;
                    if self.eat(&TokenKind::Colon) {
                        let high = if self.peek() == &TokenKind::RBracket {
                            None
                        } else {
                            Some(Box::new(self.parse_expr()?))
                        };
                        self.expect(&TokenKind::RBracket, "slice expression")?;
                        let position = expr.position;
                        expr = ExprLoc::new(
                            position,
                            Expr::SliceExpr {
                                object: Box::new(expr),
                                low: Some(Box::new(index)),
                                high,
                            },
                        );
                    } else {
                        self.expect(&TokenKind::RBracket, "index expression")?;
                        let position = expr.position;
                        expr = ExprLoc::new(
                            position,
                            Expr::Index {
                                object: Box::new(expr),
                                index: Box::new(index),
                            },
                        );
                    }
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Heuristic: bracket contents are type arguments when they start with a
    /// type-parameter name, a primitive type name, or a slice/pointer shape,
    /// and the matching bracket is followed by `(`.
    fn looks_like_type_args(&self) -> bool {
        match self.peek() {
            TokenKind::LBracket | TokenKind::Star => true,
            TokenKind::Ident(name) => {
                let type_like = self.type_param_names.contains(name)
                    || matches!(
                        name.as_str(),
                        "float32" | "float64" | "int32" | "int64" | "uint32" | "uint64" | "int" | "uint" | "bool"
                    )
                    || name == "hwy";
                if !type_like {
                    return false;
                }
                // Single type argument followed by `](`.
                matches!(
                    (self.peek_at(1), self.peek_at(2)),
                    (&TokenKind::RBracket, &TokenKind::LParen)
                ) || matches!(self.peek_at(1), &TokenKind::Dot | &TokenKind::Comma)
            }
            _ => false,
        }
    }

    fn parse_call_args(&mut self) -> GenResult<Vec<ExprLoc>> {
        let mut args = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if self.eat(&TokenKind::RParen) {
                return Ok(args);
            }
            self.expect(&TokenKind::Comma, "call arguments")?;
            if self.eat(&TokenKind::RParen) {
                return Ok(args);
            }
        }
    }

    /// Builds a call expression from an already-parsed callee.
    fn make_call(&mut self, callee: ExprLoc, type_args: Vec<TypeExpr>, args: Vec<ExprLoc>) -> GenResult<Expr> {
        match callee.expr {
            Expr::Name(name) => {
                // `make([]T, n)` is handled at primary; type conversions of
                // primitive and library types become Convert nodes.
                if let Some(ty) = name_as_type(&name, &self.type_param_names)
                    && args.len() == 1
                    && type_args.is_empty()
                {
                    let arg = args.into_iter().next().expect("len checked");
                    return Ok(Expr::Convert {
                        ty,
                        arg: Box::new(arg),
                    });
                }
                Ok(Expr::Call {
                    target: CallTarget::Bare(name),
                    type_args,
                    args,
                })
            }
            Expr::Selector { object, field } => Ok(classify_selector_call(*object, field, type_args, args)),
            other => Err(GenError::syntax(
                format!("expression is not callable: {other:?}"),
                callee.position,
            )),
        }
    }

    fn parse_primary(&mut self) -> GenResult<ExprLoc> {
        let position = self.here();
        match self.peek().clone() {
            TokenKind::Int(v) => {
                self.bump();
                Ok(ExprLoc::new(position, Expr::Lit(Literal::Int(v))))
            }
            TokenKind::Float { value, text } => {
                self.bump();
                Ok(ExprLoc::new(position, Expr::Lit(Literal::Float { value, text })))
            }
            TokenKind::Str(s) => {
                self.bump();
                Ok(ExprLoc::new(position, Expr::Lit(Literal::Str(s))))
            }
            TokenKind::Ident(name) => {
                self.bump();
                match name.as_str() {
                    "true" => Ok(ExprLoc::new(position, Expr::Lit(Literal::Bool(true)))),
                    "false" => Ok(ExprLoc::new(position, Expr::Lit(Literal::Bool(false)))),
                    "make" => {
                        self.expect(&TokenKind::LParen, "make expression")?;
                        let ty = self.parse_type()?;
                        self.expect(&TokenKind::Comma, "make expression")?;
                        let len = self.parse_expr()?;
                        self.eat(&TokenKind::Comma);
                        self.expect(&TokenKind::RParen, "make expression")?;
                        Ok(ExprLoc::new(
                            position,
                            Expr::Make {
                                ty,
                                len: Box::new(len),
                            },
                        ))
                    }
                    _ => Ok(ExprLoc::new(position, Expr::Name(name))),
                }
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen, "parenthesized expression")?;
                Ok(ExprLoc::new(position, Expr::Paren(Box::new(inner))))
            }
            _ => Err(self.unexpected("expression")),
        }
    }
}

fn strip_core(name: &str) -> &str {
    name.strip_prefix("hwy.").unwrap_or(name)
}

/// `pkg.Name(...)` vs `recv.Method(...)`: the object is read as a package
/// alias when it names one of the recognized aliases; anything else is a
/// method receiver.
fn classify_selector_call(object: ExprLoc, field: String, type_args: Vec<TypeExpr>, args: Vec<ExprLoc>) -> Expr {
    if let Expr::Name(pkg) = &object.expr
        && KNOWN_ALIASES.contains(&pkg.as_str())
    {
        return Expr::Call {
            target: CallTarget::Qualified {
                pkg: pkg.clone(),
                name: field,
            },
            type_args,
            args,
        };
    }
    Expr::Call {
        target: CallTarget::Method {
            recv: Box::new(object),
            name: field,
        },
        type_args,
        args,
    }
}

/// Reads a call-position name as a type for conversion expressions.
fn name_as_type(name: &str, type_params: &AHashSet<String>) -> Option<TypeExpr> {
    if type_params.contains(name) {
        return Some(TypeExpr::Param(name.to_owned()));
    }
    match name {
        "float32" | "float64" | "int32" | "int64" | "uint16" | "uint32" | "uint64" | "int" | "uint" => {
            Some(TypeExpr::Named(name.to_owned()))
        }
        _ => None,
    }
}

fn binop_for(kind: &TokenKind) -> Option<(BinOp, u8)> {
    let entry = match kind {
        TokenKind::Star => (BinOp::Mul, 5),
        TokenKind::Slash => (BinOp::Div, 5),
        TokenKind::Percent => (BinOp::Rem, 5),
        TokenKind::Shl => (BinOp::Shl, 5),
        TokenKind::Shr => (BinOp::Shr, 5),
        TokenKind::Amp => (BinOp::BitAnd, 5),
        TokenKind::Plus => (BinOp::Add, 4),
        TokenKind::Minus => (BinOp::Sub, 4),
        TokenKind::Pipe => (BinOp::BitOr, 4),
        TokenKind::Caret => (BinOp::BitXor, 4),
        TokenKind::EqEq => (BinOp::Eq, 3),
        TokenKind::NotEq => (BinOp::Ne, 3),
        TokenKind::Lt => (BinOp::Lt, 3),
        TokenKind::Le => (BinOp::Le, 3),
        TokenKind::Gt => (BinOp::Gt, 3),
        TokenKind::Ge => (BinOp::Ge, 3),
        TokenKind::AmpAmp => (BinOp::And, 2),
        TokenKind::PipePipe => (BinOp::Or, 2),
        _ => return None,
    };
    Some(entry)
}

// ----------------------------------------------------------------------
// Post-parse analysis
// ----------------------------------------------------------------------

/// Finds the main vectorized loop: the first top-level `for` whose stride
/// mentions a lane count and whose body is not a store-only zeroing loop.
fn detect_main_loop(body: &[Stmt]) -> Option<LoopInfo> {
    for (idx, stmt) in body.iter().enumerate() {
        let Stmt::For {
            init,
            cond,
            post,
            body: loop_body,
            ..
        } = stmt
        else {
            continue;
        };
        let (Some(init), Some(cond), Some(post)) = (init, cond, post) else {
            continue;
        };
        if !stride_mentions_lanes(post) {
            continue;
        }
        if is_store_only(loop_body) {
            continue;
        }
        let (var, start) = match init.as_ref() {
            Stmt::ShortDecl { name, value, .. } => (name.clone(), value.clone()),
            Stmt::Assign {
                target: ExprLoc {
                    expr: Expr::Name(name), ..
                },
                value,
                ..
            } => (name.clone(), value.clone()),
            _ => continue,
        };
        let end = match &cond.expr {
            Expr::Binary {
                op: BinOp::Lt | BinOp::Le,
                right,
                ..
            } => (**right).clone(),
            _ => continue,
        };
        let stride = match post.as_ref() {
            Stmt::OpAssign {
                op: BinOp::Add, value, ..
            } => value.clone(),
            _ => continue,
        };
        return Some(LoopInfo {
            var,
            start,
            end,
            stride,
            stmt_index: idx,
        });
    }
    None
}

/// The stride test is textual in spirit: any identifier or call mentioning
/// `lanes`, `NumLanes`, or `NumElements` counts.
fn stride_mentions_lanes(post: &Stmt) -> bool {
    let mut found = false;
    post.walk_exprs(&mut |e| match e {
        Expr::Name(name) if name.to_ascii_lowercase().contains("lanes") || name == "NumElements" => found = true,
        Expr::Call { target, .. }
            if matches!(target.name(), "NumLanes" | "MaxLanes" | "Lanes" | "NumElements") =>
        {
            found = true;
        }
        _ => {}
    });
    found
}

/// Auxiliary loops whose bodies only store (e.g. output zeroing) are not
/// main loops.
fn is_store_only(body: &[Stmt]) -> bool {
    !body.is_empty()
        && body.iter().all(|stmt| match stmt {
            Stmt::Assign { target, .. } => matches!(target.expr, Expr::Index { .. }),
            Stmt::Expr(e) => {
                matches!(&e.expr, Expr::Call { target, .. } if matches!(target.name(), "Store" | "MaskedStore"))
            }
            _ => false,
        })
}

/// Collects deduplicated call references: `alias.Name` for known aliases and
/// bare `Base*`/`base*` or recognized-op names.
fn collect_calls(body: &[Stmt]) -> Vec<CallRef> {
    let mut seen = AHashSet::new();
    let mut out = Vec::new();
    for stmt in body {
        stmt.walk_exprs(&mut |e| {
            let Expr::Call { target, .. } = e else { return };
            let call = match target {
                CallTarget::Bare(name)
                    if Op::recognize(name).is_some() || name.starts_with("Base") || name.starts_with("base") =>
                {
                    CallRef {
                        pkg: None,
                        name: name.clone(),
                    }
                }
                CallTarget::Qualified { pkg, name } if KNOWN_ALIASES.contains(&pkg.as_str()) => CallRef {
                    pkg: Some(pkg.clone()),
                    name: name.clone(),
                },
                _ => return,
            };
            if seen.insert(call.clone()) {
                out.push(call);
            }
        });
    }
    out
}
