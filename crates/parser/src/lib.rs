//! Statement parser: tokens in, command records out.
//!
//! The grammar is deliberately flat: one statement per parse, predicates as
//! comparison lists joined by AND/OR. Both keyword dialects share it, since
//! the tokenizer folds them together. Parsing never panics: every
//! failure is a `DbError::Parse` carrying a message, and whitespace-only
//! input yields `Command::Empty`.

mod command;
#[cfg(test)]
mod tests;
mod token;

pub use command::*;
pub use token::{tokenize, Token};

use common::{DbError, DbResult, Row};
use serde_json::Value;
use std::collections::HashMap;

/// Parse one statement, then bind `@name` parameters when a map is supplied.
/// Unbound parameters survive as the literal string `@name`.
pub fn parse(text: &str, params: Option<&HashMap<String, Value>>) -> DbResult<Command> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Ok(Command::Empty);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let mut command = parser.parse_statement()?;
    parser.expect_done()?;
    if let Some(params) = params {
        bind_parameters(&mut command, params);
    }
    Ok(command)
}

/// Recognize the statements the front-end handles without a current database
/// (both dialects). Returns `None` for anything else, including text that
/// does not tokenize; the worker-side parse reports those.
pub fn parse_server_statement(text: &str) -> Option<ServerCommand> {
    let tokens = tokenize(text).ok()?;
    let kw = |t: &Token, word: &str| matches!(t, Token::Keyword(k) if k == word);
    let name = |t: &Token| match t {
        Token::Ident(n) => Some(n.clone()),
        _ => None,
    };

    match tokens.as_slice() {
        [a, b, c] if kw(a, "CREATE") && kw(b, "DATABASE") => name(c).map(ServerCommand::CreateDatabase),
        // The second dialect spells DROP and DELETE with one word.
        [a, b, c] if (kw(a, "DROP") || kw(a, "DELETE")) && kw(b, "DATABASE") => {
            name(c).map(ServerCommand::DropDatabase)
        }
        [a, b] if kw(a, "SHOW") && kw(b, "DATABASES") => Some(ServerCommand::ShowDatabases),
        [a, b] if kw(a, "USE") => name(b).map(ServerCommand::UseDatabase),
        _ => None,
    }
}

/// Translate a LIKE pattern to an anchored, case-insensitive regex.
/// Metacharacters are escaped before `%`/`_` become `.*`/`.`.
pub fn like_to_regex(pattern: &str) -> DbResult<regex::Regex> {
    let mut translated = String::with_capacity(pattern.len() + 8);
    translated.push_str("(?i)^");
    for c in pattern.chars() {
        match c {
            '%' => translated.push_str(".*"),
            '_' => translated.push('.'),
            other => translated.push_str(&regex::escape(&other.to_string())),
        }
    }
    translated.push('$');
    regex::Regex::new(&translated)
        .map_err(|e| DbError::Parse(format!("invalid LIKE pattern '{pattern}': {e}")))
}

/// Replace bound `@name` placeholders in criteria values, insert rows, update
/// assignments, and HAVING comparisons. Operates on an owned command so any
/// cached template stays untouched.
pub fn bind_parameters(command: &mut Command, params: &HashMap<String, Value>) {
    match command {
        Command::Select(select) => {
            if let Some(criteria) = select.criteria.as_mut() {
                bind_criteria(criteria, params);
            }
        }
        Command::Aggregate(agg) => {
            if let Some(criteria) = agg.criteria.as_mut() {
                bind_criteria(criteria, params);
            }
            if let Some((_, value)) = agg.having.as_mut() {
                bind_value(value, params);
            }
        }
        Command::Delete { criteria, .. } => {
            if let Some(criteria) = criteria.as_mut() {
                bind_criteria(criteria, params);
            }
        }
        Command::Update { assignments, criteria, .. } => {
            for (_, value) in assignments.iter_mut() {
                bind_value(value, params);
            }
            if let Some(criteria) = criteria.as_mut() {
                bind_criteria(criteria, params);
            }
        }
        Command::Insert { rows, .. } => {
            for row in rows.iter_mut() {
                for (_, value) in row.iter_mut() {
                    bind_value(value, params);
                }
            }
        }
        Command::Explain(inner) => bind_parameters(inner, params),
        _ => {}
    }
}

fn bind_criteria(criteria: &mut Criteria, params: &HashMap<String, Value>) {
    match criteria {
        Criteria::Compare { value, .. } => bind_value(value, params),
        Criteria::Between { low, high, .. } => {
            bind_value(low, params);
            bind_value(high, params);
        }
        Criteria::In { values, .. } => {
            for value in values.iter_mut() {
                bind_value(value, params);
            }
        }
        Criteria::Like { .. } | Criteria::IsNull { .. } => {}
        Criteria::And(children) | Criteria::Or(children) => {
            for child in children.iter_mut() {
                bind_criteria(child, params);
            }
        }
    }
}

fn bind_value(value: &mut Value, params: &HashMap<String, Value>) {
    if let Value::String(text) = value {
        if let Some(name) = text.strip_prefix('@') {
            if let Some(bound) = params.get(name) {
                *value = bound.clone();
            }
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn parse_statement(&mut self) -> DbResult<Command> {
        let keyword = match self.peek() {
            Some(Token::Keyword(k)) => k.clone(),
            Some(other) => {
                return Err(DbError::Parse(format!("expected a statement, found {}", other.describe())))
            }
            None => return Ok(Command::Empty),
        };

        match keyword.as_str() {
            "CREATE" => self.parse_create(),
            "SHOW" => self.parse_show(),
            "INSERT" => self.parse_insert(),
            "SELECT" => self.parse_select(),
            "DELETE" => self.parse_delete(),
            "UPDATE" => self.parse_update(),
            "DROP" => self.parse_drop(),
            "DEFINE" => self.parse_define_schema(),
            "EXPLAIN" => {
                self.advance();
                let inner = self.parse_statement()?;
                Ok(Command::Explain(Box::new(inner)))
            }
            "BEGIN" => {
                self.advance();
                Ok(Command::Begin)
            }
            "COMMIT" => {
                self.advance();
                Ok(Command::Commit)
            }
            "ROLLBACK" => {
                self.advance();
                Ok(Command::Rollback)
            }
            "EXEC" => {
                self.advance();
                let name = self.expect_ident("procedure name")?;
                Ok(Command::ExecuteProcedure { name })
            }
            "BACKUP" => {
                self.advance();
                self.expect_keyword("TO")?;
                let path = self.expect_string("backup path")?;
                Ok(Command::Backup { path })
            }
            "RESTORE" => {
                self.advance();
                self.expect_keyword("FROM")?;
                let path = self.expect_string("restore path")?;
                Ok(Command::Restore { path })
            }
            "USE" | "DATABASE" | "DATABASES" => Err(DbError::Parse(
                "database statements run at server level, before a database is selected".into(),
            )),
            other => Err(DbError::Parse(format!("unexpected keyword {other}"))),
        }
    }

    fn parse_create(&mut self) -> DbResult<Command> {
        self.expect_keyword("CREATE")?;
        match self.peek_keyword().as_deref() {
            Some("TABLE") => {
                self.advance();
                let table = self.expect_ident("table name")?;
                Ok(Command::CreateTable { table })
            }
            Some("INDEX") => {
                self.advance();
                self.expect_keyword("ON")?;
                let table = self.expect_ident("table name")?;
                self.expect_symbol('(')?;
                let field = self.expect_ident("field name")?;
                self.expect_symbol(')')?;
                Ok(Command::CreateIndex { table, field })
            }
            Some("VIEW") => {
                self.advance();
                let name = self.expect_ident("view name")?;
                self.expect_keyword("AS")?;
                match self.parse_select()? {
                    Command::Select(query) => Ok(Command::CreateView { name, query }),
                    _ => Err(DbError::Parse("a view body must be a plain SELECT".into())),
                }
            }
            Some("TRIGGER") => {
                self.advance();
                let name = self.expect_ident("trigger name")?;
                let timing = match self.next_keyword()?.as_str() {
                    "BEFORE" => TriggerTiming::Before,
                    "AFTER" => TriggerTiming::After,
                    other => {
                        return Err(DbError::Parse(format!(
                            "expected BEFORE or AFTER, found {other}"
                        )))
                    }
                };
                let event = match self.next_keyword()?.as_str() {
                    "INSERT" => TriggerEvent::Insert,
                    "UPDATE" => TriggerEvent::Update,
                    "DELETE" => TriggerEvent::Delete,
                    other => {
                        return Err(DbError::Parse(format!(
                            "expected INSERT, UPDATE or DELETE, found {other}"
                        )))
                    }
                };
                self.expect_keyword("ON")?;
                let table = self.expect_ident("table name")?;
                self.expect_keyword("DO")?;
                let statement = self.expect_string("trigger statement")?;
                Ok(Command::CreateTrigger {
                    name,
                    table,
                    timing,
                    event,
                    statement,
                })
            }
            Some("PROCEDURE") => {
                self.advance();
                let name = self.expect_ident("procedure name")?;
                self.expect_keyword("AS")?;
                let mut statements = vec![self.expect_string("procedure statement")?];
                while self.eat_symbol(',') {
                    statements.push(self.expect_string("procedure statement")?);
                }
                Ok(Command::CreateProcedure { name, statements })
            }
            Some("DATABASE") => Err(DbError::Parse(
                "CREATE DATABASE runs at server level, before a database is selected".into(),
            )),
            _ => Err(DbError::Parse(
                "expected TABLE, INDEX, VIEW, TRIGGER or PROCEDURE after CREATE".into(),
            )),
        }
    }

    fn parse_show(&mut self) -> DbResult<Command> {
        self.expect_keyword("SHOW")?;
        match self.next_keyword()?.as_str() {
            "TABLES" => Ok(Command::ShowTables),
            "INDEXES" => Ok(Command::ShowIndexes),
            "STATS" => Ok(Command::ShowStats),
            "DATABASES" => Err(DbError::Parse(
                "SHOW DATABASES runs at server level, before a database is selected".into(),
            )),
            other => Err(DbError::Parse(format!(
                "expected TABLES, INDEXES or STATS after SHOW, found {other}"
            ))),
        }
    }

    fn parse_insert(&mut self) -> DbResult<Command> {
        self.expect_keyword("INSERT")?;
        self.expect_keyword("INTO")?;
        let table = self.expect_ident("table name")?;

        self.expect_symbol('(')?;
        let mut fields = vec![self.expect_ident("field name")?];
        while self.eat_symbol(',') {
            fields.push(self.expect_ident("field name")?);
        }
        self.expect_symbol(')')?;

        self.expect_keyword("VALUES")?;
        let mut rows = Vec::new();
        loop {
            self.expect_symbol('(')?;
            let mut values = vec![self.parse_value()?];
            while self.eat_symbol(',') {
                values.push(self.parse_value()?);
            }
            self.expect_symbol(')')?;
            if values.len() != fields.len() {
                return Err(DbError::Parse(format!(
                    "{} fields but {} values",
                    fields.len(),
                    values.len()
                )));
            }
            let mut row = Row::new();
            for (field, value) in fields.iter().zip(values) {
                row.insert(field.clone(), value);
            }
            rows.push(row);
            if !self.eat_symbol(',') {
                break;
            }
        }
        Ok(Command::Insert { table, rows })
    }

    fn parse_select(&mut self) -> DbResult<Command> {
        self.expect_keyword("SELECT")?;
        let distinct = self.eat_keyword("DISTINCT");

        let mut items = Vec::new();
        let mut aggregate: Option<(AggFunc, Option<String>)> = None;
        loop {
            if self.eat_symbol('*') {
                items.push(SelectItem::Wildcard);
            } else if let Some(func) = self.peek_agg_func() {
                self.advance();
                self.expect_symbol('(')?;
                let field = if self.eat_symbol('*') {
                    None
                } else {
                    Some(self.expect_ident("aggregate field")?)
                };
                self.expect_symbol(')')?;
                if func != AggFunc::Count && field.is_none() {
                    return Err(DbError::Parse(format!("{}(*) is not supported", func.name())));
                }
                if aggregate.is_some() {
                    return Err(DbError::Parse("only one aggregate per query".into()));
                }
                aggregate = Some((func, field));
            } else {
                items.push(SelectItem::Column(self.expect_ident("projection field")?));
            }
            if !self.eat_symbol(',') {
                break;
            }
        }

        self.expect_keyword("FROM")?;
        let table = self.expect_ident("table name")?;

        let mut joins = Vec::new();
        while let Some(join) = self.parse_join()? {
            joins.push(join);
        }

        let criteria = if self.eat_keyword("WHERE") {
            Some(self.parse_criteria()?)
        } else {
            None
        };

        let group_by = if self.eat_keyword("GROUP") {
            self.expect_keyword("BY")?;
            Some(self.expect_ident("group field")?)
        } else {
            None
        };

        let having = if self.eat_keyword("HAVING") {
            // The left-hand side names the aggregate result; either the bare
            // function or an identifier is accepted.
            if self.peek_agg_func().is_some() {
                self.advance();
                self.expect_symbol('(')?;
                if !self.eat_symbol('*') {
                    self.expect_ident("aggregate field")?;
                }
                self.expect_symbol(')')?;
            } else {
                self.expect_ident("aggregate result field")?;
            }
            let op = self.expect_operator()?;
            let value = self.parse_value()?;
            Some((op, value))
        } else {
            None
        };

        let order_by = if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            let field = self.expect_ident("order field")?;
            let direction = if self.eat_keyword("DESC") {
                SortDirection::Desc
            } else {
                self.eat_keyword("ASC");
                SortDirection::Asc
            };
            Some(OrderBy { field, direction })
        } else {
            None
        };

        let limit = if self.eat_keyword("LIMIT") {
            Some(self.expect_unsigned("LIMIT")?)
        } else {
            None
        };
        let offset = if self.eat_keyword("OFFSET") {
            Some(self.expect_unsigned("OFFSET")?)
        } else {
            None
        };

        if let Some((func, field)) = aggregate {
            if !joins.is_empty() {
                return Err(DbError::Parse("aggregates do not support joins".into()));
            }
            if order_by.is_some() || limit.is_some() || offset.is_some() || distinct {
                return Err(DbError::Parse(
                    "aggregates do not support DISTINCT, ORDER BY, LIMIT or OFFSET".into(),
                ));
            }
            return Ok(Command::Aggregate(AggregateCommand {
                table,
                func,
                field,
                criteria,
                group_by,
                having,
            }));
        }

        if group_by.is_some() || having.is_some() {
            return Err(DbError::Parse(
                "GROUP BY and HAVING require an aggregate function".into(),
            ));
        }
        if items.is_empty() {
            return Err(DbError::Parse("empty projection".into()));
        }

        Ok(Command::Select(SelectCommand {
            table,
            items,
            distinct,
            joins,
            criteria,
            order_by,
            limit,
            offset,
        }))
    }

    fn parse_join(&mut self) -> DbResult<Option<JoinClause>> {
        let kind = match self.peek_keyword().as_deref() {
            Some("JOIN") => {
                self.advance();
                JoinKind::Inner
            }
            Some("INNER") => {
                self.advance();
                self.expect_keyword("JOIN")?;
                JoinKind::Inner
            }
            Some("LEFT") => {
                self.advance();
                self.eat_keyword("OUTER");
                self.expect_keyword("JOIN")?;
                JoinKind::Left
            }
            Some("RIGHT") => {
                self.advance();
                self.eat_keyword("OUTER");
                self.expect_keyword("JOIN")?;
                JoinKind::Right
            }
            Some("FULL") => {
                self.advance();
                self.eat_keyword("OUTER");
                self.expect_keyword("JOIN")?;
                JoinKind::Full
            }
            Some("CROSS") => {
                self.advance();
                self.expect_keyword("JOIN")?;
                JoinKind::Cross
            }
            _ => return Ok(None),
        };

        let table = self.expect_ident("join table")?;
        let on = if kind == JoinKind::Cross {
            None
        } else {
            self.expect_keyword("ON")?;
            let left = self.expect_ident("join field")?;
            let op = self.expect_operator()?;
            let right = self.expect_ident("join field")?;
            Some(JoinCondition { left, op, right })
        };
        Ok(Some(JoinClause { kind, table, on }))
    }

    fn parse_delete(&mut self) -> DbResult<Command> {
        self.expect_keyword("DELETE")?;
        // The second dialect uses one word for DELETE and DROP, so the drop
        // targets are also reachable from here.
        match self.peek_keyword().as_deref() {
            Some("TABLE") => {
                self.advance();
                return Ok(Command::DropTable {
                    table: self.expect_ident("table name")?,
                });
            }
            Some("VIEW") => {
                self.advance();
                return Ok(Command::DropView {
                    name: self.expect_ident("view name")?,
                });
            }
            Some("TRIGGER") => {
                self.advance();
                return Ok(Command::DropTrigger {
                    name: self.expect_ident("trigger name")?,
                });
            }
            Some("DATABASE") => {
                return Err(DbError::Parse(
                    "DROP DATABASE runs at server level, before a database is selected".into(),
                ))
            }
            _ => {}
        }
        self.expect_keyword("FROM")?;
        let table = self.expect_ident("table name")?;
        let criteria = if self.eat_keyword("WHERE") {
            Some(self.parse_criteria()?)
        } else {
            None
        };
        Ok(Command::Delete { table, criteria })
    }

    fn parse_update(&mut self) -> DbResult<Command> {
        self.expect_keyword("UPDATE")?;
        let table = self.expect_ident("table name")?;
        self.expect_keyword("SET")?;

        let mut assignments = Vec::new();
        loop {
            let field = self.expect_ident("field name")?;
            match self.expect_operator()? {
                CompareOp::Eq => {}
                other => {
                    return Err(DbError::Parse(format!(
                        "expected '=' in assignment, found '{}'",
                        other.symbol()
                    )))
                }
            }
            let value = self.parse_value()?;
            assignments.push((field, value));
            if !self.eat_symbol(',') {
                break;
            }
        }

        let criteria = if self.eat_keyword("WHERE") {
            Some(self.parse_criteria()?)
        } else {
            None
        };
        Ok(Command::Update {
            table,
            assignments,
            criteria,
        })
    }

    fn parse_drop(&mut self) -> DbResult<Command> {
        self.expect_keyword("DROP")?;
        match self.next_keyword()?.as_str() {
            "TABLE" => Ok(Command::DropTable {
                table: self.expect_ident("table name")?,
            }),
            "VIEW" => Ok(Command::DropView {
                name: self.expect_ident("view name")?,
            }),
            "TRIGGER" => Ok(Command::DropTrigger {
                name: self.expect_ident("trigger name")?,
            }),
            "DATABASE" => Err(DbError::Parse(
                "DROP DATABASE runs at server level, before a database is selected".into(),
            )),
            other => Err(DbError::Parse(format!(
                "expected TABLE, VIEW or TRIGGER after DROP, found {other}"
            ))),
        }
    }

    fn parse_define_schema(&mut self) -> DbResult<Command> {
        self.expect_keyword("DEFINE")?;
        self.expect_keyword("SCHEMA")?;
        let table = self.expect_ident("table name")?;
        self.expect_symbol('(')?;

        let mut fields = Vec::new();
        loop {
            let name = self.expect_ident("field name")?;
            let kind_word = self.next_keyword()?;
            let kind = FieldKind::parse(&kind_word).ok_or_else(|| {
                DbError::Parse(format!(
                    "expected NUMBER, BOOLEAN, DATE or TEXT, found {kind_word}"
                ))
            })?;
            let mut required = false;
            let mut default = None;
            loop {
                if self.eat_keyword("REQUIRED") {
                    required = true;
                } else if self.eat_keyword("DEFAULT") {
                    default = Some(self.parse_value()?);
                } else {
                    break;
                }
            }
            fields.push(SchemaField {
                name,
                kind,
                required,
                default,
            });
            if !self.eat_symbol(',') {
                break;
            }
        }
        self.expect_symbol(')')?;
        Ok(Command::DefineSchema { table, fields })
    }

    /// Flat condition list with AND binding tighter than OR: adjacent
    /// AND-linked conditions group first, the groups join under OR.
    fn parse_criteria(&mut self) -> DbResult<Criteria> {
        let mut groups: Vec<Vec<Criteria>> = vec![vec![self.parse_condition()?]];
        loop {
            if self.eat_keyword("AND") {
                groups
                    .last_mut()
                    .expect("at least one group")
                    .push(self.parse_condition()?);
            } else if self.eat_keyword("OR") {
                groups.push(vec![self.parse_condition()?]);
            } else {
                break;
            }
        }

        let mut or_nodes: Vec<Criteria> = groups
            .into_iter()
            .map(|group| {
                if group.len() == 1 {
                    group.into_iter().next().expect("len checked")
                } else {
                    Criteria::And(group)
                }
            })
            .collect();
        if or_nodes.len() == 1 {
            Ok(or_nodes.remove(0))
        } else {
            Ok(Criteria::Or(or_nodes))
        }
    }

    fn parse_condition(&mut self) -> DbResult<Criteria> {
        let field = self.expect_ident("field name")?;

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(Criteria::IsNull { field, negated });
        }

        if self.eat_keyword("BETWEEN") {
            let low = self.parse_value()?;
            self.expect_keyword("AND")?;
            let high = self.parse_value()?;
            return Ok(Criteria::Between { field, low, high });
        }

        if self.eat_keyword("LIKE") {
            let pattern = self.expect_string("LIKE pattern")?;
            return Ok(Criteria::Like { field, pattern });
        }

        let negated = self.eat_keyword("NOT");
        if self.eat_keyword("IN") {
            self.expect_symbol('(')?;
            let mut values = vec![self.parse_value()?];
            while self.eat_symbol(',') {
                values.push(self.parse_value()?);
            }
            self.expect_symbol(')')?;
            return Ok(Criteria::In {
                field,
                values,
                negated,
            });
        }
        if negated {
            return Err(DbError::Parse("expected IN after NOT".into()));
        }

        let op = self.expect_operator()?;
        let value = self.parse_value()?;
        Ok(Criteria::Compare { field, op, value })
    }

    fn parse_value(&mut self) -> DbResult<Value> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Value::Number(n.clone())),
            Some(Token::Str(s)) => Ok(Value::String(s.clone())),
            Some(Token::Param(name)) => Ok(Value::String(format!("@{name}"))),
            Some(Token::Keyword(k)) if k == "TRUE" => Ok(Value::Bool(true)),
            Some(Token::Keyword(k)) if k == "FALSE" => Ok(Value::Bool(false)),
            Some(Token::Keyword(k)) if k == "NULL" => Ok(Value::Null),
            Some(other) => Err(DbError::Parse(format!(
                "expected a value, found {}",
                other.describe()
            ))),
            None => Err(DbError::Parse("expected a value, found end of input".into())),
        }
    }

    // Token plumbing.

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_keyword(&self) -> Option<String> {
        match self.peek() {
            Some(Token::Keyword(k)) => Some(k.clone()),
            _ => None,
        }
    }

    fn peek_agg_func(&self) -> Option<AggFunc> {
        match self.peek_keyword().as_deref() {
            Some("COUNT") => Some(AggFunc::Count),
            Some("SUM") => Some(AggFunc::Sum),
            Some("AVG") => Some(AggFunc::Avg),
            Some("MIN") => Some(AggFunc::Min),
            Some("MAX") => Some(AggFunc::Max),
            _ => None,
        }
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.peek_keyword().as_deref() == Some(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, word: &str) -> DbResult<()> {
        if self.eat_keyword(word) {
            Ok(())
        } else {
            Err(DbError::Parse(match self.peek() {
                Some(t) => format!("expected {word}, found {}", t.describe()),
                None => format!("expected {word}, found end of input"),
            }))
        }
    }

    fn next_keyword(&mut self) -> DbResult<String> {
        match self.advance() {
            Some(Token::Keyword(k)) => Ok(k.clone()),
            Some(other) => Err(DbError::Parse(format!(
                "expected a keyword, found {}",
                other.describe()
            ))),
            None => Err(DbError::Parse("expected a keyword, found end of input".into())),
        }
    }

    fn expect_ident(&mut self, what: &str) -> DbResult<String> {
        match self.advance() {
            Some(Token::Ident(name)) => Ok(name.clone()),
            Some(other) => Err(DbError::Parse(format!(
                "expected {what}, found {}",
                other.describe()
            ))),
            None => Err(DbError::Parse(format!("expected {what}, found end of input"))),
        }
    }

    fn expect_string(&mut self, what: &str) -> DbResult<String> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(s.clone()),
            Some(other) => Err(DbError::Parse(format!(
                "expected {what}, found {}",
                other.describe()
            ))),
            None => Err(DbError::Parse(format!("expected {what}, found end of input"))),
        }
    }

    fn expect_operator(&mut self) -> DbResult<CompareOp> {
        match self.advance() {
            Some(Token::Operator(op)) => CompareOp::parse(op)
                .ok_or_else(|| DbError::Parse(format!("unknown operator '{op}'"))),
            Some(other) => Err(DbError::Parse(format!(
                "expected a comparison operator, found {}",
                other.describe()
            ))),
            None => Err(DbError::Parse(
                "expected a comparison operator, found end of input".into(),
            )),
        }
    }

    fn expect_unsigned(&mut self, what: &str) -> DbResult<u64> {
        match self.advance() {
            Some(Token::Number(n)) => n
                .as_u64()
                .ok_or_else(|| DbError::Parse(format!("{what} must be a non-negative integer"))),
            Some(other) => Err(DbError::Parse(format!(
                "{what} must be a non-negative integer, found {}",
                other.describe()
            ))),
            None => Err(DbError::Parse(format!("{what} expects a number"))),
        }
    }

    fn expect_symbol(&mut self, symbol: char) -> DbResult<()> {
        match self.advance() {
            Some(Token::Symbol(c)) if *c == symbol => Ok(()),
            Some(other) => Err(DbError::Parse(format!(
                "expected '{symbol}', found {}",
                other.describe()
            ))),
            None => Err(DbError::Parse(format!("expected '{symbol}', found end of input"))),
        }
    }

    fn eat_symbol(&mut self, symbol: char) -> bool {
        match self.peek() {
            Some(Token::Symbol(c)) if *c == symbol => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect_done(&mut self) -> DbResult<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(DbError::Parse(format!(
                "trailing input after statement: {}",
                token.describe()
            ))),
        }
    }
}
