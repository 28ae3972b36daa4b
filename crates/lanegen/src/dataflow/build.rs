//! Lowers a parsed function into the dataflow IR.
//!
//! The builder walks the top-level statement list: allocations, broadcasts,
//! scalars, and loops become top-level nodes with execution positions; loop
//! bodies are decomposed into load/elementwise/reduction/store child nodes
//! that share the loop's range. Elementwise vs. reduction tagging is by op
//! name and accumulation shape.

use ahash::AHashSet;

use crate::{
    ast::{BinOp, CallTarget, Expr, ExprLoc, Stmt},
    dataflow::{IRFunction, LoopRange, NodeKind},
    emit::render_expr,
    ops::Op,
    parse::ParsedFunc,
    types::ElemType,
};

/// Builds the dataflow IR for one function at one element type and runs
/// producer/consumer analysis.
pub fn build(func: &ParsedFunc, elem: ElemType) -> IRFunction {
    let mut b = Builder {
        ir: IRFunction::new(func.name.clone(), elem),
        exec_pos: 0,
        loop_var: None,
    };
    for stmt in &func.body {
        b.top_level(stmt);
    }
    b.ir.analyze();
    b.ir
}

struct Builder {
    ir: IRFunction,
    exec_pos: usize,
    /// Iterator variable of the loop currently being decomposed; it never
    /// participates in def-use edges.
    loop_var: Option<String>,
}

impl Builder {
    fn next_pos(&mut self) -> usize {
        let pos = self.exec_pos;
        self.exec_pos += 1;
        pos
    }

    fn top_level(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::ShortDecl { name, value, .. } => self.top_decl(name, value),
            Stmt::VarDecl {
                name,
                value: Some(value),
                ..
            } => self.top_decl(name, value),
            Stmt::For {
                init,
                cond,
                post,
                body,
                ..
            } => self.loop_node(init.as_deref(), cond.as_ref(), post.as_deref(), body),
            Stmt::Expr(expr) => {
                if let Expr::Call {
                    target: CallTarget::Qualified { name, .. },
                    args,
                    ..
                } = &expr.expr
                {
                    let pos = self.next_pos();
                    let id = self.ir.push_node(NodeKind::Call);
                    let node = self.ir.node_mut(id);
                    node.op = Some(name.clone());
                    node.exec_pos = Some(pos);
                    node.inputs = args.iter().flat_map(names_in).collect();
                }
            }
            _ => {}
        }
    }

    fn top_decl(&mut self, name: &str, value: &ExprLoc) {
        let pos = self.next_pos();
        let (kind, op) = match &value.expr {
            Expr::Make { .. } => (NodeKind::Alloc, None),
            Expr::Call { target, .. } => match target {
                CallTarget::Bare(op) | CallTarget::Qualified { name: op, .. } => match Op::recognize(op) {
                    Some(o) if o.is_broadcast() => (NodeKind::Broadcast, Some(op.clone())),
                    Some(_) => (NodeKind::Scalar, Some(op.clone())),
                    None if matches!(target, CallTarget::Qualified { .. }) => (NodeKind::Call, Some(op.clone())),
                    None => (NodeKind::Scalar, Some(op.clone())),
                },
                CallTarget::Method { .. } => (NodeKind::Scalar, None),
            },
            _ => (NodeKind::Scalar, None),
        };
        let id = self.ir.push_node(kind);
        let node = self.ir.node_mut(id);
        node.outputs = vec![name.to_owned()];
        node.inputs = names_in(value);
        node.op = op;
        node.exec_pos = Some(pos);
    }

    fn loop_node(&mut self, init: Option<&Stmt>, cond: Option<&ExprLoc>, post: Option<&Stmt>, body: &[Stmt]) {
        let pos = self.next_pos();
        let range = loop_range(init, cond, post);
        let loop_var = init.and_then(|s| match s {
            Stmt::ShortDecl { name, .. } => Some(name.clone()),
            Stmt::Assign { target, .. } => match &target.expr {
                Expr::Name(n) => Some(n.clone()),
                _ => None,
            },
            _ => None,
        });

        let loop_id = self.ir.push_node(NodeKind::Loop);
        self.ir.node_mut(loop_id).exec_pos = Some(pos);
        self.ir.node_mut(loop_id).loop_range = range.clone();
        self.loop_var = loop_var.clone();

        let mut reads: AHashSet<String> = AHashSet::new();
        let mut writes: AHashSet<String> = AHashSet::new();
        let mut locals: AHashSet<String> = AHashSet::new();
        if let Some(v) = &loop_var {
            locals.insert(v.clone());
        }

        for stmt in body {
            self.loop_body_stmt(stmt, loop_id, &range, &mut reads, &mut writes, &mut locals);
        }

        let node = self.ir.node_mut(loop_id);
        node.inputs = reads.into_iter().filter(|n| !locals.contains(n)).collect();
        node.outputs = writes.into_iter().collect();
        // Deterministic edge order regardless of set iteration.
        node.inputs.sort();
        node.outputs.sort();
        self.loop_var = None;
    }

    fn loop_body_stmt(
        &mut self,
        stmt: &Stmt,
        loop_id: usize,
        range: &Option<LoopRange>,
        reads: &mut AHashSet<String>,
        writes: &mut AHashSet<String>,
        locals: &mut AHashSet<String>,
    ) {
        match stmt {
            // out[i] = expr / out[i] += expr
            Stmt::Assign { target, value, .. } | Stmt::OpAssign { target, value, .. } => {
                match &target.expr {
                    Expr::Index { object, .. } => {
                        if let Expr::Name(buf) = &object.expr {
                            let elem_names = self.loads_for(value, loop_id, range, reads, locals);
                            let op = top_op_name(value);
                            let ew = self.child(NodeKind::Elementwise, loop_id, range);
                            let elem_out = format!("{buf}$elem");
                            {
                                let node = self.ir.node_mut(ew);
                                node.op = op;
                                node.inputs = elem_names;
                                node.outputs = vec![elem_out.clone()];
                            }
                            let store = self.child(NodeKind::Store, loop_id, range);
                            let node = self.ir.node_mut(store);
                            node.inputs = vec![buf.clone(), elem_out];
                            node.outputs = vec![buf.clone()];
                            writes.insert(buf.clone());
                            for name in names_in(value) {
                                reads.insert(name);
                            }
                        }
                    }
                    Expr::Name(acc) => {
                        let value_names = names_in(value);
                        let accumulating =
                            value_names.contains(acc) || matches!(stmt, Stmt::OpAssign { .. });
                        let elem_names = self.loads_for(value, loop_id, range, reads, locals);
                        let kind = if accumulating && !locals.contains(acc) {
                            NodeKind::Reduction
                        } else {
                            NodeKind::Elementwise
                        };
                        let id = self.child(kind, loop_id, range);
                        let node = self.ir.node_mut(id);
                        node.op = top_op_name(value).or_else(|| reduction_op_of(stmt));
                        node.inputs = elem_names;
                        if accumulating {
                            node.inputs.push(acc.clone());
                        }
                        node.outputs = vec![acc.clone()];
                        if locals.contains(acc) {
                            // loop-local temp, not visible outside
                        } else {
                            writes.insert(acc.clone());
                            if accumulating {
                                reads.insert(acc.clone());
                            }
                        }
                        for name in value_names {
                            reads.insert(name);
                        }
                    }
                    _ => {}
                }
            }
            Stmt::ShortDecl { name, value, .. } => {
                locals.insert(name.clone());
                let elem_names = self.loads_for(value, loop_id, range, reads, locals);
                // Unrecognized calls stay call nodes so higher-order
                // resolution can rewire them by op name.
                let kind = match &value.expr {
                    Expr::Call { target, .. } => match Op::recognize(target.name()) {
                        Some(op) if op.is_reduction() => NodeKind::Reduction,
                        Some(_) => NodeKind::Elementwise,
                        None => NodeKind::Call,
                    },
                    _ => NodeKind::Elementwise,
                };
                let id = self.child(kind, loop_id, range);
                let node = self.ir.node_mut(id);
                node.op = top_op_name(value);
                node.inputs = elem_names;
                node.outputs = vec![name.clone()];
                for n in names_in(value) {
                    reads.insert(n);
                }
            }
            Stmt::Expr(expr) => {
                if let Expr::Call { target, args, .. } = &expr.expr
                    && matches!(target.name(), "Store" | "MaskedStore")
                    && let Some(first) = args.first()
                    && let Some(buf) = slice_base_name(first)
                {
                    let value_names: Vec<String> = args[1..].iter().flat_map(names_in).collect();
                    let store = self.child(NodeKind::Store, loop_id, range);
                    let node = self.ir.node_mut(store);
                    node.inputs = value_names.clone();
                    node.inputs.push(buf.clone());
                    node.outputs = vec![buf.clone()];
                    writes.insert(buf);
                    for n in value_names {
                        if !locals.contains(&n) {
                            reads.insert(n);
                        }
                    }
                }
            }
            Stmt::If { body, or_else, .. } => {
                for s in body.iter().chain(or_else) {
                    self.loop_body_stmt(s, loop_id, range, reads, writes, locals);
                }
            }
            _ => {}
        }
    }

    /// Creates a load node per distinct slice indexed in `value` and returns
    /// the per-element names elementwise nodes should consume, along with
    /// plain scalar inputs.
    fn loads_for(
        &mut self,
        value: &ExprLoc,
        loop_id: usize,
        range: &Option<LoopRange>,
        reads: &mut AHashSet<String>,
        locals: &AHashSet<String>,
    ) -> Vec<String> {
        let mut sliced: Vec<String> = Vec::new();
        let mut scalars: Vec<String> = Vec::new();
        value.expr.walk(&mut |e| match e {
            Expr::Index { object, .. } => {
                if let Expr::Name(name) = &object.expr
                    && !sliced.contains(name)
                {
                    sliced.push(name.clone());
                }
            }
            Expr::Name(name) => {
                if !scalars.contains(name) {
                    scalars.push(name.clone());
                }
            }
            _ => {}
        });
        let mut elem_names = Vec::new();
        for slice in &sliced {
            let load = self.child(NodeKind::Load, loop_id, range);
            let node = self.ir.node_mut(load);
            node.inputs = vec![slice.clone()];
            node.outputs = vec![format!("{slice}$elem")];
            elem_names.push(format!("{slice}$elem"));
            reads.insert(slice.clone());
        }
        // Loop-local temporaries are real def-use edges; only the iterator
        // itself is excluded.
        for scalar in scalars {
            if !sliced.contains(&scalar) && self.loop_var.as_deref() != Some(scalar.as_str()) {
                elem_names.push(scalar);
            }
        }
        elem_names
    }

    fn child(&mut self, kind: NodeKind, loop_id: usize, range: &Option<LoopRange>) -> usize {
        let id = self.ir.push_node(kind);
        let node = self.ir.node_mut(id);
        node.parent_loop = Some(loop_id);
        node.loop_range = range.clone();
        id
    }
}

fn loop_range(init: Option<&Stmt>, cond: Option<&ExprLoc>, post: Option<&Stmt>) -> Option<LoopRange> {
    let start = match init? {
        Stmt::ShortDecl { value, .. } => render_expr(value),
        Stmt::Assign { value, .. } => render_expr(value),
        _ => return None,
    };
    let end = match &cond?.expr {
        Expr::Binary {
            op: BinOp::Lt | BinOp::Le,
            right,
            ..
        } => render_expr(right),
        _ => return None,
    };
    let stride = match post? {
        Stmt::OpAssign { op: BinOp::Add, value, .. } => render_expr(value),
        _ => return None,
    };
    Some(LoopRange { start, end, stride })
}

/// The dominant op name of an expression: the outermost recognized call, or
/// the top binary operator's spelling.
fn top_op_name(value: &ExprLoc) -> Option<String> {
    match &value.expr {
        Expr::Call { target, .. } => Some(target.name().to_owned()),
        Expr::Binary { op, .. } => Some(op.to_string()),
        Expr::Paren(inner) => top_op_name(inner),
        _ => None,
    }
}

/// Reduction op implied by an accumulating op-assignment (`s += x`).
fn reduction_op_of(stmt: &Stmt) -> Option<String> {
    match stmt {
        Stmt::OpAssign { op, .. } => Some(op.to_string()),
        _ => None,
    }
}

/// Base slice name of a store destination (`out[i:]`, `out[i]`, or `out`).
fn slice_base_name(expr: &ExprLoc) -> Option<String> {
    match &expr.expr {
        Expr::SliceExpr { object, .. } | Expr::Index { object, .. } => match &object.expr {
            Expr::Name(n) => Some(n.clone()),
            _ => None,
        },
        Expr::Name(n) => Some(n.clone()),
        _ => None,
    }
}

/// All bare names referenced by an expression.
fn names_in(expr: &ExprLoc) -> Vec<String> {
    let mut out = Vec::new();
    expr.expr.walk(&mut |e| {
        if let Expr::Name(name) = e
            && !out.contains(name)
        {
            out.push(name.clone());
        }
    });
    out
}
