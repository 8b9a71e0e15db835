//! Syntax tree consumed by the analyzer and the codegen adapter
//!
//! The parser lives outside this crate. It hands over a [`Program`] built
//! from these nodes; only the shapes that matter for access control are
//! modelled (names, attribute accesses, calls, definitions, imports).
//!
//! [`Program::new`] numbers every node in pre-order so diagnostics can name
//! the exact node that was rejected.

use std::fmt;

/// Identifier of a node within one program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Source position (1-based; 0 when unknown)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Node identity plus position, used to anchor diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Site {
    pub node: NodeId,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Literal {
    /// Host type name of the literal's value
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub id: NodeId,
    pub span: Span,
    /// Statically known host type, when the front end inferred one
    pub type_hint: Option<String>,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Name(String),
    Literal(Literal),
    List(Vec<Expr>),
    /// `object.name`
    Attribute { object: Box<Expr>, name: String },
    /// Attribute selected by a runtime value rather than a literal name
    DynamicAttribute { object: Box<Expr>, name: Box<Expr> },
    Call { callee: Box<Expr>, args: Vec<Expr> },
}

impl Expr {
    fn new(kind: ExprKind) -> Self {
        Self {
            id: NodeId::default(),
            span: Span::default(),
            type_hint: None,
            kind,
        }
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self::new(ExprKind::Name(name.into()))
    }

    pub fn literal(literal: Literal) -> Self {
        Self::new(ExprKind::Literal(literal))
    }

    pub fn str(value: impl Into<String>) -> Self {
        Self::literal(Literal::Str(value.into()))
    }

    pub fn int(value: i64) -> Self {
        Self::literal(Literal::Int(value))
    }

    pub fn list(items: Vec<Expr>) -> Self {
        Self::new(ExprKind::List(items))
    }

    pub fn attr(object: Expr, name: impl Into<String>) -> Self {
        Self::new(ExprKind::Attribute {
            object: Box::new(object),
            name: name.into(),
        })
    }

    pub fn dynamic_attr(object: Expr, name: Expr) -> Self {
        Self::new(ExprKind::DynamicAttribute {
            object: Box::new(object),
            name: Box::new(name),
        })
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call {
            callee: Box::new(callee),
            args,
        })
    }

    /// Shorthand for calling a bare name
    pub fn call_name(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::call(Self::name(name), args)
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.span = Span::new(line, column);
        self
    }

    pub fn typed(mut self, type_name: impl Into<String>) -> Self {
        self.type_hint = Some(type_name.into());
        self
    }

    pub fn site(&self) -> Site {
        Site {
            node: self.id,
            span: self.span,
        }
    }

    /// The host type of this expression if it is known without running it
    pub fn static_type(&self) -> Option<&str> {
        if let Some(hint) = &self.type_hint {
            return Some(hint);
        }
        match &self.kind {
            ExprKind::Literal(lit) => Some(lit.type_name()),
            ExprKind::List(_) => Some("list"),
            _ => None,
        }
    }

    /// The literal string value, if this is a string literal
    pub fn as_str_literal(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Literal(Literal::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// The bare name, if this is a name reference
    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Name(n) => Some(n),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub id: NodeId,
    pub span: Span,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    Assign {
        target: String,
        value: Expr,
    },
    FunctionDef {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
    },
    /// `import module [as alias]`
    Import {
        module: String,
        alias: Option<String>,
    },
    /// `from module import name [as alias], ...`
    ImportFrom {
        module: String,
        names: Vec<(String, Option<String>)>,
    },
    Return(Option<Expr>),
}

impl Stmt {
    fn new(kind: StmtKind) -> Self {
        Self {
            id: NodeId::default(),
            span: Span::default(),
            kind,
        }
    }

    pub fn expr(expr: Expr) -> Self {
        Self::new(StmtKind::Expr(expr))
    }

    pub fn assign(target: impl Into<String>, value: Expr) -> Self {
        Self::new(StmtKind::Assign {
            target: target.into(),
            value,
        })
    }

    pub fn def(name: impl Into<String>, params: &[&str], body: Vec<Stmt>) -> Self {
        Self::new(StmtKind::FunctionDef {
            name: name.into(),
            params: params.iter().map(|p| p.to_string()).collect(),
            body,
        })
    }

    pub fn import(module: impl Into<String>) -> Self {
        Self::new(StmtKind::Import {
            module: module.into(),
            alias: None,
        })
    }

    pub fn import_as(module: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::new(StmtKind::Import {
            module: module.into(),
            alias: Some(alias.into()),
        })
    }

    pub fn import_from(module: impl Into<String>, names: &[&str]) -> Self {
        Self::new(StmtKind::ImportFrom {
            module: module.into(),
            names: names.iter().map(|n| (n.to_string(), None)).collect(),
        })
    }

    pub fn ret(value: Option<Expr>) -> Self {
        Self::new(StmtKind::Return(value))
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.span = Span::new(line, column);
        self
    }

    pub fn site(&self) -> Site {
        Site {
            node: self.id,
            span: self.span,
        }
    }
}

/// A parsed compilation unit
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

impl Program {
    /// Wrap a statement list, numbering nodes in pre-order starting at 1
    pub fn new(body: Vec<Stmt>) -> Self {
        let mut program = Self { body };
        let mut next = 1;
        for stmt in &mut program.body {
            number_stmt(stmt, &mut next);
        }
        program
    }

    /// Total number of numbered nodes
    pub fn node_count(&self) -> u32 {
        fn count_expr(expr: &Expr) -> u32 {
            1 + match &expr.kind {
                ExprKind::Name(_) | ExprKind::Literal(_) => 0,
                ExprKind::List(items) => items.iter().map(count_expr).sum(),
                ExprKind::Attribute { object, .. } => count_expr(object),
                ExprKind::DynamicAttribute { object, name } => count_expr(object) + count_expr(name),
                ExprKind::Call { callee, args } => {
                    count_expr(callee) + args.iter().map(count_expr).sum::<u32>()
                }
            }
        }
        fn count_stmt(stmt: &Stmt) -> u32 {
            1 + match &stmt.kind {
                StmtKind::Expr(e) | StmtKind::Assign { value: e, .. } => count_expr(e),
                StmtKind::Return(Some(e)) => count_expr(e),
                StmtKind::FunctionDef { body, .. } => body.iter().map(count_stmt).sum(),
                _ => 0,
            }
        }
        self.body.iter().map(count_stmt).sum()
    }
}

fn next_id(next: &mut u32) -> NodeId {
    let id = NodeId(*next);
    *next += 1;
    id
}

fn number_stmt(stmt: &mut Stmt, next: &mut u32) {
    stmt.id = next_id(next);
    match &mut stmt.kind {
        StmtKind::Expr(e) | StmtKind::Assign { value: e, .. } => number_expr(e, next),
        StmtKind::Return(Some(e)) => number_expr(e, next),
        StmtKind::FunctionDef { body, .. } => {
            for s in body {
                number_stmt(s, next);
            }
        }
        StmtKind::Return(None) | StmtKind::Import { .. } | StmtKind::ImportFrom { .. } => {}
    }
}

fn number_expr(expr: &mut Expr, next: &mut u32) {
    expr.id = next_id(next);
    match &mut expr.kind {
        ExprKind::Name(_) | ExprKind::Literal(_) => {}
        ExprKind::List(items) => {
            for item in items {
                number_expr(item, next);
            }
        }
        ExprKind::Attribute { object, .. } => number_expr(object, next),
        ExprKind::DynamicAttribute { object, name } => {
            number_expr(object, next);
            number_expr(name, next);
        }
        ExprKind::Call { callee, args } => {
            number_expr(callee, next);
            for arg in args {
                number_expr(arg, next);
            }
        }
    }
}
