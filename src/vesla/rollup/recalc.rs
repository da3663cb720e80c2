//! Re-evaluation of emitted formula strings.
//!
//! The recalculator reads the A1 formulas exactly as a spreadsheet would see
//! them, so it checks that the text handed to the backend still computes the
//! totals the assembler derived. It also supports overriding inputs to see how
//! every downstream total moves.

use std::collections::{HashMap, HashSet};

use crate::vesla::rollup::emitted::{EmittedCell, EmittedContent, EmittedModel};
use crate::vesla::rollup::error::{ModelError, ModelResult};
use crate::vesla::rollup::formula::Operator;
use crate::vesla::rollup::model::sheet::quote_sheet_name;
use crate::vesla::rollup::model::{CellKind, Position};
use crate::vesla::rollup::resolve::sheet_key;

type CellAt = (usize, Position);

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Cell(Position),
    SheetPrefix(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Colon,
    Comma,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    fn operator(self) -> Operator {
        match self {
            BinOp::Add => Operator::Sum,
            BinOp::Sub => Operator::Subtract,
            BinOp::Mul => Operator::Multiply,
            BinOp::Div => Operator::Divide,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(f64),
    Cell(Option<String>, Position),
    Range(Option<String>, Position, Position),
    Neg(Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
    Sum(Vec<Node>),
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '+' | '-' | '*' | '/' | '(' | ')' | ':' | ',' => {
                chars.next();
                tokens.push(match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ':' => Token::Colon,
                    _ => Token::Comma,
                });
            }
            '\'' => {
                chars.next();
                let mut sheet = String::new();
                loop {
                    match chars.next() {
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                            sheet.push('\'');
                        }
                        Some('\'') => break,
                        Some(ch) => sheet.push(ch),
                        None => return Err("unterminated sheet name".to_string()),
                    }
                }
                if chars.next() != Some('!') {
                    return Err("quoted sheet name must be followed by !".to_string());
                }
                tokens.push(Token::SheetPrefix(sheet));
            }
            '0'..='9' | '.' => {
                let mut text = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_digit() || ch == '.' {
                        text.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{text}'"))?;
                tokens.push(Token::Number(value));
            }
            'A'..='Z' | 'a'..='z' | '_' | '$' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' || ch == '.' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if chars.peek() == Some(&'!') {
                    chars.next();
                    tokens.push(Token::SheetPrefix(ident));
                } else if let Some(position) = Position::from_a1(&ident) {
                    tokens.push(Token::Cell(position));
                } else {
                    tokens.push(Token::Ident(ident.to_uppercase()));
                }
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn parse(formula: &str) -> Result<Node, String> {
        let body = formula.strip_prefix('=').unwrap_or(formula);
        let mut parser = Parser {
            tokens: tokenize(body)?,
            pos: 0,
        };
        let node = parser.additive()?;
        if parser.pos != parser.tokens.len() {
            return Err(format!("unexpected token at position {}", parser.pos));
        }
        Ok(node)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(format!("expected {expected:?}, found {other:?}")),
        }
    }

    fn additive(&mut self) -> Result<Node, String> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn multiplicative(&mut self) -> Result<Node, String> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Node, String> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Node::Neg(Box::new(self.unary()?)))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Node, String> {
        match self.next() {
            Some(Token::Number(value)) => Ok(Node::Number(value)),
            Some(Token::LParen) => {
                let inner = self.additive()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::SheetPrefix(sheet)) => match self.next() {
                Some(Token::Cell(start)) => self.cell_or_range(Some(sheet), start),
                other => Err(format!("expected cell after sheet prefix, found {other:?}")),
            },
            Some(Token::Cell(start)) => self.cell_or_range(None, start),
            Some(Token::Ident(name)) if name == "SUM" => {
                self.expect(Token::LParen)?;
                let mut args = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    loop {
                        args.push(self.additive()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.pos += 1;
                        } else {
                            break;
                        }
                    }
                }
                self.expect(Token::RParen)?;
                Ok(Node::Sum(args))
            }
            Some(Token::Ident(name)) => Err(format!("unsupported function or name '{name}'")),
            other => Err(format!("unexpected token {other:?}")),
        }
    }

    fn cell_or_range(&mut self, sheet: Option<String>, start: Position) -> Result<Node, String> {
        if self.peek() != Some(&Token::Colon) {
            return Ok(Node::Cell(sheet, start));
        }
        self.pos += 1;
        match self.next() {
            Some(Token::Cell(end)) => Ok(Node::Range(sheet, start, end)),
            other => Err(format!("expected range end, found {other:?}")),
        }
    }
}

/// Evaluates an [`EmittedModel`] from its formula strings.
pub struct Recalculator<'a> {
    model: &'a EmittedModel,
    sheets: HashMap<String, usize>,
    cells: HashMap<CellAt, &'a EmittedCell>,
    overrides: HashMap<CellAt, f64>,
    memo: HashMap<CellAt, f64>,
    parsed: HashMap<CellAt, Node>,
}

impl<'a> Recalculator<'a> {
    pub fn new(model: &'a EmittedModel) -> Self {
        let mut sheets = HashMap::new();
        let mut cells = HashMap::new();
        for (idx, sheet) in model.sheets.iter().enumerate() {
            sheets.insert(sheet_key(&sheet.name), idx);
            for cell in &sheet.cells {
                cells.insert((idx, cell.position), cell);
            }
        }
        Self {
            model,
            sheets,
            cells,
            overrides: HashMap::new(),
            memo: HashMap::new(),
            parsed: HashMap::new(),
        }
    }

    /// Replaces the value of a numeric input for subsequent evaluations.
    pub fn set_input(&mut self, sheet: &str, position: Position, value: f64) -> ModelResult<()> {
        let at = self.locate(sheet, position)?;
        match self.cells.get(&at) {
            Some(cell)
                if cell.kind == CellKind::Input
                    && matches!(cell.content, EmittedContent::Number { .. }) =>
            {
                self.overrides.insert(at, value);
                self.memo.clear();
                Ok(())
            }
            _ => Err(ModelError::NotAnInput {
                sheet: sheet.to_string(),
                position,
            }),
        }
    }

    /// Current value of a numeric cell, evaluating formulas as needed.
    pub fn value_of(&mut self, sheet: &str, position: Position) -> ModelResult<f64> {
        let at = self.locate(sheet, position)?;
        let mut visiting = HashSet::new();
        self.cell_value(at, at, Operator::Link, &mut visiting)
    }

    /// Copy of the model with overridden inputs and every formula result
    /// recomputed.
    pub fn refreshed(&mut self) -> ModelResult<EmittedModel> {
        let mut model = self.model.clone();
        for (idx, sheet) in model.sheets.iter_mut().enumerate() {
            for cell in &mut sheet.cells {
                let at = (idx, cell.position);
                match &mut cell.content {
                    EmittedContent::Number { value } => {
                        if let Some(overridden) = self.overrides.get(&at) {
                            *value = *overridden;
                        }
                    }
                    EmittedContent::Formula { value, .. } => {
                        let mut visiting = HashSet::new();
                        *value = self.cell_value(at, at, Operator::Link, &mut visiting)?;
                    }
                    EmittedContent::Text { .. } => {}
                }
            }
        }
        Ok(model)
    }

    fn locate(&self, sheet: &str, position: Position) -> ModelResult<CellAt> {
        let idx = self
            .sheets
            .get(&sheet_key(sheet))
            .copied()
            .ok_or_else(|| ModelError::UnknownSheet {
                sheet: sheet.to_string(),
                from_sheet: String::new(),
            })?;
        if !self.cells.contains_key(&(idx, position)) {
            return Err(ModelError::UnknownCell {
                sheet: self.model.sheets[idx].name.clone(),
                position,
            });
        }
        Ok((idx, position))
    }

    fn describe(&self, at: CellAt) -> String {
        format!(
            "{}!{}",
            quote_sheet_name(&self.model.sheets[at.0].name),
            at.1
        )
    }

    fn cell_value(
        &mut self,
        at: CellAt,
        from: CellAt,
        operator: Operator,
        visiting: &mut HashSet<CellAt>,
    ) -> ModelResult<f64> {
        if let Some(value) = self.overrides.get(&at) {
            return Ok(*value);
        }
        if let Some(value) = self.memo.get(&at) {
            return Ok(*value);
        }
        let cell = *self.cells.get(&at).ok_or_else(|| ModelError::UnknownCell {
            sheet: self.model.sheets[at.0].name.clone(),
            position: at.1,
        })?;

        let formula = match &cell.content {
            EmittedContent::Number { value } => return Ok(*value),
            EmittedContent::Text { .. } => {
                return Err(ModelError::TypeMismatch {
                    sheet: self.model.sheets[from.0].name.clone(),
                    position: from.1,
                    operator,
                    operand: self.describe(at),
                });
            }
            EmittedContent::Formula { formula, .. } => formula,
        };

        if !visiting.insert(at) {
            return Err(ModelError::CircularFormula {
                from: self.describe(from),
                to: self.describe(at),
            });
        }
        if !self.parsed.contains_key(&at) {
            let node = Parser::parse(formula).map_err(|message| ModelError::FormulaSyntax {
                formula: formula.clone(),
                message,
            })?;
            self.parsed.insert(at, node);
        }
        let node = self.parsed[&at].clone();
        let value = self.eval(&node, at, visiting)?;
        visiting.remove(&at);
        self.memo.insert(at, value);
        Ok(value)
    }

    fn eval(&mut self, node: &Node, home: CellAt, visiting: &mut HashSet<CellAt>) -> ModelResult<f64> {
        match node {
            Node::Number(value) => Ok(*value),
            Node::Neg(inner) => Ok(-self.eval(inner, home, visiting)?),
            Node::Cell(sheet, position) => {
                let target = self.target(sheet.as_deref(), *position, home)?;
                self.cell_value(target, home, Operator::Link, visiting)
            }
            Node::Range(..) => Err(ModelError::FormulaSyntax {
                formula: self.describe(home),
                message: "range used outside SUM".to_string(),
            }),
            Node::Binary(op, lhs, rhs) => {
                let left = self.operand(lhs, op.operator(), home, visiting)?;
                let right = self.operand(rhs, op.operator(), home, visiting)?;
                match op {
                    BinOp::Add => Ok(left + right),
                    BinOp::Sub => Ok(left - right),
                    BinOp::Mul => Ok(left * right),
                    BinOp::Div if right == 0.0 => Err(ModelError::DivisionByZero {
                        sheet: self.model.sheets[home.0].name.clone(),
                        position: home.1,
                        divisor: match rhs.as_ref() {
                            Node::Cell(sheet, position) => self
                                .target(sheet.as_deref(), *position, home)
                                .map(|at| self.describe(at))
                                .unwrap_or_else(|_| position.to_a1()),
                            _ => "0".to_string(),
                        },
                    }),
                    BinOp::Div => Ok(left / right),
                }
            }
            Node::Sum(args) => {
                let mut total = 0.0;
                for arg in args {
                    total += match arg {
                        Node::Range(sheet, start, end) => {
                            self.range_total(sheet.as_deref(), *start, *end, home, visiting)?
                        }
                        other => self.operand(other, Operator::Sum, home, visiting)?,
                    };
                }
                Ok(total)
            }
        }
    }

    /// Evaluates an operand, attributing type errors to `operator`.
    fn operand(
        &mut self,
        node: &Node,
        operator: Operator,
        home: CellAt,
        visiting: &mut HashSet<CellAt>,
    ) -> ModelResult<f64> {
        match node {
            Node::Cell(sheet, position) => {
                let target = self.target(sheet.as_deref(), *position, home)?;
                self.cell_value(target, home, operator, visiting)
            }
            other => self.eval(other, home, visiting),
        }
    }

    /// Sums the numeric cells of a rectangle; blanks and text are skipped as
    /// spreadsheet `SUM` does.
    fn range_total(
        &mut self,
        sheet: Option<&str>,
        start: Position,
        end: Position,
        home: CellAt,
        visiting: &mut HashSet<CellAt>,
    ) -> ModelResult<f64> {
        let first = self.target(sheet, start, home).map(|at| at.0).or_else(|err| {
            // The range start may be blank; only the sheet has to exist.
            match err {
                ModelError::UnknownCell { .. } => self.sheet_index(sheet, home),
                other => Err(other),
            }
        })?;
        let (top, bottom) = (start.row.min(end.row), start.row.max(end.row));
        let (left, right) = (start.col.min(end.col), start.col.max(end.col));

        let mut total = 0.0;
        for row in top..=bottom {
            for col in left..=right {
                let at = (first, Position::new(row, col));
                let Some(cell) = self.cells.get(&at) else {
                    continue;
                };
                if matches!(cell.content, EmittedContent::Text { .. }) {
                    continue;
                }
                total += self.cell_value(at, home, Operator::Sum, visiting)?;
            }
        }
        Ok(total)
    }

    fn sheet_index(&self, sheet: Option<&str>, home: CellAt) -> ModelResult<usize> {
        match sheet {
            None => Ok(home.0),
            Some(name) => {
                self.sheets
                    .get(&sheet_key(name))
                    .copied()
                    .ok_or_else(|| ModelError::UnknownSheet {
                        sheet: name.to_string(),
                        from_sheet: self.model.sheets[home.0].name.clone(),
                    })
            }
        }
    }

    fn target(&self, sheet: Option<&str>, position: Position, home: CellAt) -> ModelResult<CellAt> {
        let idx = self.sheet_index(sheet, home)?;
        if !self.cells.contains_key(&(idx, position)) {
            return Err(ModelError::UnknownCell {
                sheet: self.model.sheets[idx].name.clone(),
                position,
            });
        }
        Ok((idx, position))
    }
}
