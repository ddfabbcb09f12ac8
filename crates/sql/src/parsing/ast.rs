//! Abstract syntax tree for the supported SQL dialect
//!
//! The statement is the root of the tree. Nodes are immutable after
//! construction and only describe syntax; resolving identifiers against the
//! schema is the compiler's job. `Display` emits canonical SQL, so parsing
//! the displayed form yields an equal tree.

use std::fmt;

use crate::types::DataType;

/// SQL statements.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// CREATE TABLE: creates a new Notion database.
    CreateTable {
        name: String,
        columns: Vec<ColumnDef>,
    },
    /// DROP TABLE: unregisters and archives a table.
    DropTable { name: String },
    /// INSERT: creates a new page in the table's database.
    Insert {
        table: String,
        columns: Vec<String>,
        values: Vec<Expression>,
        /// Columns appended to the default returning tuple
        returning: Vec<String>,
    },
    /// SELECT: queries the table's database.
    Select {
        table: String,
        columns: SelectColumns,
        filter: Option<Expression>,
        order: Vec<OrderItem>,
    },
    /// UPDATE: rewrites properties of matching pages.
    Update {
        table: String,
        set: Vec<(String, Expression)>,
        filter: Option<Expression>,
    },
    /// DELETE: archives matching pages.
    Delete {
        table: String,
        filter: Option<Expression>,
    },
}

/// The projected columns of a SELECT.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectColumns {
    /// `*`
    All,
    /// An explicit column list
    Named(Vec<String>),
}

/// A CREATE TABLE column definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub datatype: DataType,
}

/// An ORDER BY item.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub column: String,
    pub descending: bool,
}

/// SQL expressions. WHERE clauses are built from comparisons combined with
/// AND/OR/NOT; operands are column references, literals, or placeholders.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A column reference
    Column(String),
    /// A literal value
    Literal(Literal),
    /// A named bind placeholder, `:name`
    Parameter(String),
    /// An operator over child expressions
    Operator(Operator),
}

/// Expression literals.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    String(String),
}

/// Expression operators. Children are boxed since the tree is recursive.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),

    Equal(Box<Expression>, Box<Expression>),
    NotEqual(Box<Expression>, Box<Expression>),
    LessThan(Box<Expression>, Box<Expression>),
    LessThanOrEqual(Box<Expression>, Box<Expression>),
    GreaterThan(Box<Expression>, Box<Expression>),
    GreaterThanOrEqual(Box<Expression>, Box<Expression>),
}

impl From<Literal> for Expression {
    fn from(literal: Literal) -> Self {
        Expression::Literal(literal)
    }
}

impl From<Operator> for Expression {
    fn from(operator: Operator) -> Self {
        Expression::Operator(operator)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::CreateTable { name, columns } => {
                let cols: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
                write!(f, "CREATE TABLE {} ({})", name, cols.join(", "))
            }
            Statement::DropTable { name } => write!(f, "DROP TABLE {}", name),
            Statement::Insert {
                table,
                columns,
                values,
                returning,
            } => {
                let vals: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(
                    f,
                    "INSERT INTO {} ({}) VALUES ({})",
                    table,
                    columns.join(", "),
                    vals.join(", ")
                )?;
                if !returning.is_empty() {
                    write!(f, " RETURNING {}", returning.join(", "))?;
                }
                Ok(())
            }
            Statement::Select {
                table,
                columns,
                filter,
                order,
            } => {
                write!(f, "SELECT {} FROM {}", columns, table)?;
                if let Some(filter) = filter {
                    write!(f, " WHERE {}", filter)?;
                }
                if !order.is_empty() {
                    let items: Vec<String> = order.iter().map(|o| o.to_string()).collect();
                    write!(f, " ORDER BY {}", items.join(", "))?;
                }
                Ok(())
            }
            Statement::Update { table, set, filter } => {
                let assignments: Vec<String> = set
                    .iter()
                    .map(|(col, expr)| format!("{} = {}", col, expr))
                    .collect();
                write!(f, "UPDATE {} SET {}", table, assignments.join(", "))?;
                if let Some(filter) = filter {
                    write!(f, " WHERE {}", filter)?;
                }
                Ok(())
            }
            Statement::Delete { table, filter } => {
                write!(f, "DELETE FROM {}", table)?;
                if let Some(filter) = filter {
                    write!(f, " WHERE {}", filter)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for SelectColumns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectColumns::All => write!(f, "*"),
            SelectColumns::Named(columns) => write!(f, "{}", columns.join(", ")),
        }
    }
}

impl fmt::Display for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.datatype)
    }
}

impl fmt::Display for OrderItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.column)?;
        if self.descending {
            write!(f, " DESC")?;
        }
        Ok(())
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Column(name) => write!(f, "{}", name),
            Expression::Literal(literal) => write!(f, "{}", literal),
            Expression::Parameter(name) => write!(f, ":{}", name),
            Expression::Operator(op) => write!(f, "{}", op),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "NULL"),
            Literal::Boolean(true) => write!(f, "TRUE"),
            Literal::Boolean(false) => write!(f, "FALSE"),
            Literal::Integer(i) => write!(f, "{}", i),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Parenthesize logical groupings so the canonical form reparses to
        // the same tree regardless of the original precedence spelling.
        match self {
            Operator::And(lhs, rhs) => write!(f, "({} AND {})", lhs, rhs),
            Operator::Or(lhs, rhs) => write!(f, "({} OR {})", lhs, rhs),
            Operator::Not(expr) => write!(f, "(NOT {})", expr),
            Operator::Equal(lhs, rhs) => write!(f, "{} = {}", lhs, rhs),
            Operator::NotEqual(lhs, rhs) => write!(f, "{} != {}", lhs, rhs),
            Operator::LessThan(lhs, rhs) => write!(f, "{} < {}", lhs, rhs),
            Operator::LessThanOrEqual(lhs, rhs) => write!(f, "{} <= {}", lhs, rhs),
            Operator::GreaterThan(lhs, rhs) => write!(f, "{} > {}", lhs, rhs),
            Operator::GreaterThanOrEqual(lhs, rhs) => write!(f, "{} >= {}", lhs, rhs),
        }
    }
}

impl Expression {
    /// Walks the expression tree depth-first, calling the closure for every
    /// node. Halts and returns false if the closure returns false.
    pub fn walk(&self, visitor: &mut impl FnMut(&Expression) -> bool) -> bool {
        if !visitor(self) {
            return false;
        }
        match self {
            Expression::Operator(op) => match op {
                Operator::And(lhs, rhs)
                | Operator::Or(lhs, rhs)
                | Operator::Equal(lhs, rhs)
                | Operator::NotEqual(lhs, rhs)
                | Operator::LessThan(lhs, rhs)
                | Operator::LessThanOrEqual(lhs, rhs)
                | Operator::GreaterThan(lhs, rhs)
                | Operator::GreaterThanOrEqual(lhs, rhs) => {
                    lhs.walk(visitor) && rhs.walk(visitor)
                }
                Operator::Not(expr) => expr.walk(visitor),
            },
            _ => true,
        }
    }

    /// Whether the expression contains no column references.
    pub fn is_constant(&self) -> bool {
        self.walk(&mut |expr| !matches!(expr, Expression::Column(_)))
    }
}
