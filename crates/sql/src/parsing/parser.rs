//! Recursive-descent SQL parser
//!
//! Takes tokens from the lexer and builds the statement AST. The parser
//! only checks that the syntax is well-formed; it does not know whether a
//! table or column exists. That is the compiler's job.

use std::iter::Peekable;

use notiondb_common::{Error, Result};

use super::ast::{
    ColumnDef, Expression, Literal, Operator, OrderItem, SelectColumns, Statement,
};
use super::lexer::{Keyword, Lexer, Token};
use crate::types::DataType;

pub struct Parser<'a> {
    lexer: Peekable<Lexer<'a>>,
}

impl Parser<'_> {
    /// Parses the input into a single statement, ending with an optional
    /// semicolon. Trailing tokens are an error.
    pub fn parse(statement: &str) -> Result<Statement> {
        let mut parser = Parser {
            lexer: Lexer::new(statement).peekable(),
        };
        let statement = parser.parse_statement()?;
        parser.next_is(Token::Semicolon);
        if let Some(token) = parser.lexer.next().transpose()? {
            return Err(parse_error(format!("unexpected token {token}")));
        }
        Ok(statement)
    }

    /// Fetches the next token, or errors if none is left.
    fn next(&mut self) -> Result<Token> {
        self.lexer
            .next()
            .transpose()?
            .ok_or_else(|| parse_error("unexpected end of input"))
    }

    /// Returns the next identifier, or errors if the next token is not one.
    fn next_ident(&mut self) -> Result<String> {
        match self.next()? {
            Token::Ident(ident) => Ok(ident),
            token => Err(parse_error(format!("expected identifier, found {token}"))),
        }
    }

    /// Consumes the next token if it satisfies the predicate.
    fn next_if(&mut self, predicate: impl Fn(&Token) -> bool) -> Option<Token> {
        self.peek().ok()?.filter(|&t| predicate(t))?;
        self.next().ok()
    }

    /// Consumes the next token if it equals the given one, returning true.
    fn next_is(&mut self, token: Token) -> bool {
        self.next_if(|t| t == &token).is_some()
    }

    /// Consumes the next token, erroring unless it is the expected one.
    fn expect(&mut self, expect: Token) -> Result<()> {
        let token = self.next()?;
        if token != expect {
            return Err(parse_error(format!("expected {expect}, found {token}")));
        }
        Ok(())
    }

    /// Peeks the next token without consuming it.
    fn peek(&mut self) -> Result<Option<&Token>> {
        self.lexer
            .peek()
            .map(|result| result.as_ref().map(Some).map_err(|e| e.clone()))
            .unwrap_or(Ok(None))
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        match self.peek()? {
            Some(Token::Keyword(Keyword::Create)) => self.parse_create_table(),
            Some(Token::Keyword(Keyword::Drop)) => self.parse_drop_table(),
            Some(Token::Keyword(Keyword::Insert)) => self.parse_insert(),
            Some(Token::Keyword(Keyword::Select)) => self.parse_select(),
            Some(Token::Keyword(Keyword::Update)) => self.parse_update(),
            Some(Token::Keyword(Keyword::Delete)) => self.parse_delete(),
            _ => {
                let token = self.next()?;
                Err(parse_error(format!("expected statement, found {token}")))
            }
        }
    }

    fn parse_create_table(&mut self) -> Result<Statement> {
        self.expect(Keyword::Create.into())?;
        self.expect(Keyword::Table.into())?;
        let name = self.next_ident()?;
        self.expect(Token::OpenParen)?;
        let mut columns = Vec::new();
        loop {
            columns.push(self.parse_column_def()?);
            if !self.next_is(Token::Comma) {
                break;
            }
        }
        self.expect(Token::CloseParen)?;
        Ok(Statement::CreateTable { name, columns })
    }

    fn parse_column_def(&mut self) -> Result<ColumnDef> {
        let name = self.next_ident()?;
        let datatype = self.parse_type()?;
        Ok(ColumnDef { name, datatype })
    }

    fn parse_type(&mut self) -> Result<DataType> {
        match self.next()? {
            Token::Keyword(Keyword::Int) => Ok(DataType::Int),
            Token::Keyword(Keyword::Number) => Ok(DataType::Number),
            Token::Keyword(Keyword::Bool) => Ok(DataType::Bool),
            Token::Keyword(Keyword::Date) => Ok(DataType::Date),
            Token::Keyword(Keyword::Varchar) => Ok(DataType::Varchar(self.parse_length()?)),
            Token::Keyword(Keyword::TitleVarchar) => {
                Ok(DataType::TitleVarchar(self.parse_length()?))
            }
            Token::Keyword(Keyword::Money) => {
                self.expect(Token::OpenParen)?;
                let currency = self.next_ident()?.parse()?;
                self.expect(Token::CloseParen)?;
                Ok(DataType::Money(currency))
            }
            token => Err(parse_error(format!("expected column type, found {token}"))),
        }
    }

    fn parse_length(&mut self) -> Result<u32> {
        self.expect(Token::OpenParen)?;
        let length = match self.next()? {
            Token::Number(n) => n
                .parse()
                .map_err(|_| parse_error(format!("invalid length {n}")))?,
            token => return Err(parse_error(format!("expected length, found {token}"))),
        };
        self.expect(Token::CloseParen)?;
        Ok(length)
    }

    fn parse_drop_table(&mut self) -> Result<Statement> {
        self.expect(Keyword::Drop.into())?;
        self.expect(Keyword::Table.into())?;
        Ok(Statement::DropTable {
            name: self.next_ident()?,
        })
    }

    fn parse_insert(&mut self) -> Result<Statement> {
        self.expect(Keyword::Insert.into())?;
        self.expect(Keyword::Into.into())?;
        let table = self.next_ident()?;

        self.expect(Token::OpenParen)?;
        let mut columns = Vec::new();
        loop {
            columns.push(self.next_ident()?);
            if !self.next_is(Token::Comma) {
                break;
            }
        }
        self.expect(Token::CloseParen)?;

        self.expect(Keyword::Values.into())?;
        self.expect(Token::OpenParen)?;
        let mut values = Vec::new();
        loop {
            values.push(self.parse_value()?);
            if !self.next_is(Token::Comma) {
                break;
            }
        }
        self.expect(Token::CloseParen)?;

        if values.len() != columns.len() {
            return Err(parse_error(format!(
                "INSERT has {} columns but {} values",
                columns.len(),
                values.len()
            )));
        }

        let mut returning = Vec::new();
        if self.next_is(Keyword::Returning.into()) {
            loop {
                returning.push(self.next_ident()?);
                if !self.next_is(Token::Comma) {
                    break;
                }
            }
        }
        Ok(Statement::Insert {
            table,
            columns,
            values,
            returning,
        })
    }

    /// A VALUES item: a literal or a named placeholder.
    fn parse_value(&mut self) -> Result<Expression> {
        match self.next()? {
            Token::Number(n) => {
                let i = n
                    .parse()
                    .map_err(|_| parse_error(format!("invalid number {n}")))?;
                Ok(Literal::Integer(i).into())
            }
            Token::String(s) => Ok(Literal::String(s).into()),
            Token::Parameter(name) => Ok(Expression::Parameter(name)),
            Token::Keyword(Keyword::True) => Ok(Literal::Boolean(true).into()),
            Token::Keyword(Keyword::False) => Ok(Literal::Boolean(false).into()),
            Token::Keyword(Keyword::Null) => Ok(Literal::Null.into()),
            token => Err(parse_error(format!("expected value, found {token}"))),
        }
    }

    fn parse_select(&mut self) -> Result<Statement> {
        self.expect(Keyword::Select.into())?;
        let columns = if self.next_is(Token::Asterisk) {
            SelectColumns::All
        } else {
            let mut names = Vec::new();
            loop {
                names.push(self.next_ident()?);
                if !self.next_is(Token::Comma) {
                    break;
                }
            }
            SelectColumns::Named(names)
        };
        self.expect(Keyword::From.into())?;
        let table = self.next_ident()?;
        let filter = self.parse_where()?;
        let order = self.parse_order_by()?;
        Ok(Statement::Select {
            table,
            columns,
            filter,
            order,
        })
    }

    fn parse_update(&mut self) -> Result<Statement> {
        self.expect(Keyword::Update.into())?;
        let table = self.next_ident()?;
        self.expect(Keyword::Set.into())?;
        let mut set = Vec::new();
        loop {
            let column = self.next_ident()?;
            self.expect(Token::Equal)?;
            set.push((column, self.parse_value()?));
            if !self.next_is(Token::Comma) {
                break;
            }
        }
        let filter = self.parse_where()?;
        Ok(Statement::Update { table, set, filter })
    }

    fn parse_delete(&mut self) -> Result<Statement> {
        self.expect(Keyword::Delete.into())?;
        self.expect(Keyword::From.into())?;
        let table = self.next_ident()?;
        let filter = self.parse_where()?;
        Ok(Statement::Delete { table, filter })
    }

    fn parse_where(&mut self) -> Result<Option<Expression>> {
        if !self.next_is(Keyword::Where.into()) {
            return Ok(None);
        }
        Ok(Some(self.parse_expression()?))
    }

    fn parse_order_by(&mut self) -> Result<Vec<OrderItem>> {
        // ORDER is not reserved; it arrives as a plain identifier
        if self.next_if(|t| matches!(t, Token::Ident(i) if i.eq_ignore_ascii_case("order")))
            .is_none()
        {
            return Ok(Vec::new());
        }
        match self.next()? {
            Token::Ident(by) if by.eq_ignore_ascii_case("by") => {}
            token => return Err(parse_error(format!("expected BY, found {token}"))),
        }
        let mut items = Vec::new();
        loop {
            let column = self.next_ident()?;
            let descending = if self
                .next_if(|t| matches!(t, Token::Ident(i) if i.eq_ignore_ascii_case("desc")))
                .is_some()
            {
                true
            } else {
                self.next_if(|t| matches!(t, Token::Ident(i) if i.eq_ignore_ascii_case("asc")));
                false
            };
            items.push(OrderItem { column, descending });
            if !self.next_is(Token::Comma) {
                break;
            }
        }
        Ok(items)
    }

    /// Expressions: OR over AND over NOT over comparisons, with parentheses
    /// regrouping.
    fn parse_expression(&mut self) -> Result<Expression> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expression> {
        let mut lhs = self.parse_and()?;
        while self.next_is(Keyword::Or.into()) {
            let rhs = self.parse_and()?;
            lhs = Operator::Or(Box::new(lhs), Box::new(rhs)).into();
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expression> {
        let mut lhs = self.parse_not()?;
        while self.next_is(Keyword::And.into()) {
            let rhs = self.parse_not()?;
            lhs = Operator::And(Box::new(lhs), Box::new(rhs)).into();
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expression> {
        if self.next_is(Keyword::Not.into()) {
            let expr = self.parse_not()?;
            return Ok(Operator::Not(Box::new(expr)).into());
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expression> {
        if self.next_is(Token::OpenParen) {
            let expr = self.parse_expression()?;
            self.expect(Token::CloseParen)?;
            return Ok(expr);
        }
        let lhs = self.parse_operand()?;
        let op = match self.peek()? {
            Some(Token::Equal) => {
                Operator::Equal as fn(Box<Expression>, Box<Expression>) -> Operator
            }
            Some(Token::NotEqual) => Operator::NotEqual,
            Some(Token::LessThan) => Operator::LessThan,
            Some(Token::LessThanOrEqual) => Operator::LessThanOrEqual,
            Some(Token::GreaterThan) => Operator::GreaterThan,
            Some(Token::GreaterThanOrEqual) => Operator::GreaterThanOrEqual,
            _ => return Ok(lhs),
        };
        self.next()?;
        let rhs = self.parse_operand()?;
        Ok(op(Box::new(lhs), Box::new(rhs)).into())
    }

    fn parse_operand(&mut self) -> Result<Expression> {
        match self.next()? {
            Token::Ident(name) => Ok(Expression::Column(name)),
            Token::Number(n) => {
                let i = n
                    .parse()
                    .map_err(|_| parse_error(format!("invalid number {n}")))?;
                Ok(Literal::Integer(i).into())
            }
            Token::String(s) => Ok(Literal::String(s).into()),
            Token::Parameter(name) => Ok(Expression::Parameter(name)),
            Token::Keyword(Keyword::True) => Ok(Literal::Boolean(true).into()),
            Token::Keyword(Keyword::False) => Ok(Literal::Boolean(false).into()),
            Token::Keyword(Keyword::Null) => Ok(Literal::Null.into()),
            token => Err(parse_error(format!("expected operand, found {token}"))),
        }
    }
}

fn parse_error(message: impl Into<String>) -> Error {
    Error::Syntax {
        position: 0,
        message: message.into(),
    }
}
