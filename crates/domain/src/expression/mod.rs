//! Condition expression grammar.
//!
//! A small closed grammar over metric comparisons (`affinity >= 60`), tier
//! comparisons (`tier(affinity) >= 'lover'`), flag tests
//! (`flags.seen_intro == true`), intimacy and time-of-day predicates, and
//! logical composition with `&&`, `||`, `!`.
//!
//! Expressions are parsed once, when a program is loaded, and evaluation is a
//! pure total function: an unknown metric reads as 0, an unknown flag as
//! false, and evaluation never errors and never mutates anything.

mod parser;

use std::collections::HashMap;
use std::fmt;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DomainError;
use crate::game_time::TimeOfDay;
use crate::relationship::{FlagValue, RelationshipRecord};
use crate::tiers::WorldSchema;

/// Read-only context a condition is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub schema: &'a WorldSchema,
    pub metrics: &'a HashMap<String, f64>,
    pub flags: &'a HashMap<String, FlagValue>,
    pub intimacy_level_id: Option<&'a str>,
    pub time_of_day: TimeOfDay,
    pub player_input: Option<&'a str>,
}

impl<'a> EvalContext<'a> {
    pub fn for_record(
        schema: &'a WorldSchema,
        record: &'a RelationshipRecord,
        time_of_day: TimeOfDay,
        player_input: Option<&'a str>,
    ) -> Self {
        Self {
            schema,
            metrics: &record.metrics,
            flags: &record.flags,
            intimacy_level_id: record.intimacy_level_id.as_deref(),
            time_of_day,
            player_input,
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

/// A single comparable operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Number(f64),
    Literal(String),
    Bool(bool),
    /// Bare identifier: a relationship metric
    Metric(String),
    /// `tier(metric)` - the named tier the metric currently resolves to
    Tier(String),
    /// `flags.name`
    Flag(String),
    /// `time_of_day`
    TimeOfDay,
    /// `intimacy` - the currently derived intimacy level
    Intimacy,
    /// `input` - the player's free-text input for this call
    PlayerInput,
}

/// Parsed expression tree. Closed set; evaluation is one exhaustive match.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare {
        lhs: Operand,
        op: CmpOp,
        rhs: Operand,
    },
    /// A bare operand used as a boolean test (`flags.seen_intro`)
    Test(Operand),
}

/// Resolved operand value during evaluation.
enum Value {
    Num(f64),
    Text(String),
    Flag(bool),
}

impl Expr {
    /// Evaluate against a context. Total: never errors, never mutates.
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> bool {
        match self {
            // Short-circuit left-to-right
            Expr::And(lhs, rhs) => lhs.evaluate(ctx) && rhs.evaluate(ctx),
            Expr::Or(lhs, rhs) => lhs.evaluate(ctx) || rhs.evaluate(ctx),
            Expr::Not(inner) => !inner.evaluate(ctx),
            Expr::Compare { lhs, op, rhs } => compare(lhs, *op, rhs, ctx),
            Expr::Test(operand) => truthy(operand, ctx),
        }
    }
}

fn compare(lhs: &Operand, op: CmpOp, rhs: &Operand, ctx: &EvalContext<'_>) -> bool {
    // Tier and intimacy operands compare by rank against a tier-name literal,
    // so `tier(affinity) >= 'friend'` is an ordered comparison.
    if let Some(result) = ranked_compare(lhs, op, rhs, ctx) {
        return result;
    }
    let lhs = resolve(lhs, ctx);
    let rhs = resolve(rhs, ctx);
    match (lhs, rhs) {
        // IEEE double semantics
        (Value::Num(a), Value::Num(b)) => numeric_cmp(a, op, b),
        (Value::Text(a), Value::Text(b)) => match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            // Strings have no runtime ordering in this grammar
            _ => false,
        },
        (Value::Flag(a), Value::Flag(b)) => match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            _ => false,
        },
        // Mixed-type comparisons coerce both sides to numbers, keeping the
        // evaluator total for partially-initialized state.
        (a, b) => numeric_cmp(coerce_num(&a), op, coerce_num(&b)),
    }
}

/// Ordered tier / intimacy comparison. Returns `None` when neither side is a
/// ranked operand.
fn ranked_compare(lhs: &Operand, op: CmpOp, rhs: &Operand, ctx: &EvalContext<'_>) -> Option<bool> {
    let (ranked, literal, flipped) = match (lhs, rhs) {
        (Operand::Tier(_) | Operand::Intimacy, Operand::Literal(name)) => (lhs, name, false),
        (Operand::Literal(name), Operand::Tier(_) | Operand::Intimacy) => (rhs, name, true),
        _ => return None,
    };

    let (current_rank, literal_rank) = match ranked {
        Operand::Tier(metric) => {
            let current = ctx
                .schema
                .resolve_tier(metric, ctx.metrics.get(metric).copied().unwrap_or(0.0))
                .and_then(|tier| ctx.schema.tier_rank(metric, tier))
                .unwrap_or(0);
            let literal = ctx.schema.tier_rank(metric, literal).unwrap_or(0);
            (current as f64, literal as f64)
        }
        Operand::Intimacy => {
            (intimacy_rank(ctx, ctx.intimacy_level_id), intimacy_rank(ctx, Some(literal)))
        }
        _ => return None,
    };

    let (a, b) = if flipped {
        (literal_rank, current_rank)
    } else {
        (current_rank, literal_rank)
    };
    Some(numeric_cmp(a, op, b))
}

/// Intimacy levels are declared most-demanding-first; rank them so a higher
/// number means a more intimate level, with "no level" at 0.
fn intimacy_rank(ctx: &EvalContext<'_>, level_id: Option<&str>) -> f64 {
    let levels = &ctx.schema.intimacy_levels;
    level_id
        .and_then(|id| levels.iter().position(|level| level.id == id))
        .map(|index| (levels.len() - index) as f64)
        .unwrap_or(0.0)
}

fn numeric_cmp(a: f64, op: CmpOp, b: f64) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Ge => a >= b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Lt => a < b,
    }
}

fn resolve(operand: &Operand, ctx: &EvalContext<'_>) -> Value {
    match operand {
        Operand::Number(n) => Value::Num(*n),
        Operand::Literal(s) => Value::Text(s.clone()),
        Operand::Bool(b) => Value::Flag(*b),
        Operand::Metric(name) => Value::Num(ctx.metrics.get(name).copied().unwrap_or(0.0)),
        Operand::Tier(metric) => Value::Text(
            ctx.schema
                .resolve_tier(metric, ctx.metrics.get(metric).copied().unwrap_or(0.0))
                .unwrap_or("")
                .to_string(),
        ),
        Operand::Flag(name) => match ctx.flags.get(name) {
            Some(FlagValue::Bool(b)) => Value::Flag(*b),
            Some(FlagValue::Number(n)) => Value::Num(*n),
            Some(FlagValue::Text(s)) => Value::Text(s.clone()),
            // Unknown flag reads as its type's zero value
            None => Value::Flag(false),
        },
        Operand::TimeOfDay => Value::Text(ctx.time_of_day.keyword().to_string()),
        Operand::Intimacy => Value::Text(ctx.intimacy_level_id.unwrap_or("").to_string()),
        Operand::PlayerInput => Value::Text(ctx.player_input.unwrap_or("").to_string()),
    }
}

fn coerce_num(value: &Value) -> f64 {
    match value {
        Value::Num(n) => *n,
        Value::Flag(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Text(_) => 0.0,
    }
}

fn truthy(operand: &Operand, ctx: &EvalContext<'_>) -> bool {
    match resolve(operand, ctx) {
        Value::Num(n) => n != 0.0,
        Value::Text(s) => !s.is_empty(),
        Value::Flag(b) => b,
    }
}

/// A parsed condition carrying its original source text.
///
/// Serializes as the source string; deserialization parses, so a malformed
/// condition fails when the program is loaded, never mid-execution.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    expr: Expr,
}

impl Expression {
    pub fn parse(source: impl Into<String>) -> Result<Self, DomainError> {
        let source = source.into();
        let expr = parser::parse(&source)?;
        Ok(Self { source, expr })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> bool {
        self.expr.evaluate(ctx)
    }
}

impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl Serialize for Expression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Expression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Expression::parse(source).map_err(D::Error::custom)
    }
}
