//! Condition Parser
//!
//! Parses the short textual forms used on the command line into query types.
//!
//! # Supported Syntax
//!
//! ```text
//! value >= 20          value condition ("value" keyword optional: ">= 20")
//! hour < 18            calendar field condition (year|month|day|hour|minute)
//! >= 60                duration condition ("duration" keyword optional)
//! 100..200             time range [100, 200); either bound may be omitted
//! minute | bucket:10   grouping (a field, a value bucket width, or "none")
//! ```
//!
//! Literals: `12` (long), `1.5` / `-2e3` (float), `true` / `false`, `'c'` (char),
//! `"text"` (string), `0x0aff` (blob).

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while_m_n},
    character::complete::{alpha1, anychar, char, digit1, multispace0},
    combinator::{all_consuming, map, map_res, opt, recognize, value},
    multi::many0,
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use crate::query::ast::*;
use crate::query::error::{QueryError, QueryResult};
use crate::storage::{TimeRange, Timestamp, Value, ValueType};

/// A parsed WHERE-style condition
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedCondition {
    Value(ValueCondition),
    Field(FieldCondition),
}

fn finish<'a, T>(input: &'a str, result: IResult<&'a str, T>) -> QueryResult<T> {
    match result {
        Ok((_, parsed)) => Ok(parsed),
        Err(e) => Err(QueryError::Parse(format!("'{}': {:?}", input.trim(), e))),
    }
}

/// Parse `value <op> <literal>` or `<field> <op> <integer>`
pub fn parse_condition(input: &str) -> QueryResult<ParsedCondition> {
    finish(
        input,
        all_consuming(delimited(
            multispace0,
            alt((
                map(field_condition, ParsedCondition::Field),
                map(value_condition, ParsedCondition::Value),
            )),
            multispace0,
        ))(input),
    )
}

/// Parse a value condition such as `value != 3` or `< 1.5`
pub fn parse_value_condition(input: &str) -> QueryResult<ValueCondition> {
    finish(
        input,
        all_consuming(delimited(multispace0, value_condition, multispace0))(input),
    )
}

/// Parse a duration condition such as `>= 60`
pub fn parse_duration_condition(input: &str) -> QueryResult<Condition<i64>> {
    finish(
        input,
        all_consuming(delimited(multispace0, duration_condition, multispace0))(input),
    )
}

/// Parse `start..end`, `..end`, `start..` or `..`
pub fn parse_range(input: &str) -> QueryResult<TimeRange> {
    let range = finish(
        input,
        all_consuming(delimited(multispace0, time_range, multispace0))(input),
    )?;
    if !range.is_valid() {
        return Err(QueryError::invalid(format!(
            "time range start is after its end: {}",
            input.trim()
        )));
    }
    Ok(range)
}

/// Parse `none`, a calendar field name or `bucket:<width>`
pub fn parse_group_by(input: &str) -> QueryResult<GroupBy> {
    finish(
        input,
        all_consuming(delimited(multispace0, group_by, multispace0))(input),
    )
}

/// Build a filter from condition and range strings
pub fn parse_filter<S: AsRef<str>>(conditions: &[S], ranges: &[S]) -> QueryResult<Filter> {
    let mut filter = Filter::new();
    for text in conditions {
        match parse_condition(text.as_ref())? {
            ParsedCondition::Value(cond) => filter.values.push(cond),
            ParsedCondition::Field(cond) => filter.time.fields.push(cond),
        }
    }
    for text in ranges {
        filter.ranges.push(parse_range(text.as_ref())?);
    }
    Ok(filter)
}

/// Parse a literal as a value of the given series type
pub fn parse_typed_value(input: &str, value_type: ValueType) -> QueryResult<Value> {
    let text = input.trim();
    let bad = |e: &dyn std::fmt::Display| {
        QueryError::Parse(format!("'{}' is not a valid {}: {}", text, value_type, e))
    };

    Ok(match value_type {
        ValueType::Float => Value::Float(text.parse().map_err(|e| bad(&e))?),
        ValueType::Long => Value::Long(text.parse().map_err(|e| bad(&e))?),
        ValueType::Int => Value::Int(text.parse().map_err(|e| bad(&e))?),
        ValueType::Int16 => Value::Int16(text.parse().map_err(|e| bad(&e))?),
        ValueType::UInt8 => Value::UInt8(text.parse().map_err(|e| bad(&e))?),
        ValueType::UInt16 => Value::UInt16(text.parse().map_err(|e| bad(&e))?),
        ValueType::UInt32 => Value::UInt32(text.parse().map_err(|e| bad(&e))?),
        ValueType::UInt64 => Value::UInt64(text.parse().map_err(|e| bad(&e))?),
        ValueType::Bool => Value::Bool(text.parse().map_err(|e| bad(&e))?),
        ValueType::Char => {
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Value::Char(c),
                _ => return Err(bad(&"expected exactly one character")),
            }
        }
        ValueType::Str => Value::Str(text.to_string()),
        ValueType::Blob => {
            let hex = text.strip_prefix("0x").unwrap_or(text);
            finish(text, all_consuming(hex_bytes)(hex)).map(Value::Blob)?
        }
    })
}

fn value_condition(input: &str) -> IResult<&str, ValueCondition> {
    let (input, _) = opt(pair(tag_no_case("value"), multispace0))(input)?;
    let (input, op) = operator(input)?;
    let (input, _) = multispace0(input)?;
    let (input, operand) = literal(input)?;
    Ok((input, Condition::new(op, operand)))
}

fn field_condition(input: &str) -> IResult<&str, FieldCondition> {
    let (input, field) = map_res(alpha1, |s: &str| TimeField::from_str(s).ok_or(()))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, op) = operator(input)?;
    let (input, _) = multispace0(input)?;
    let (input, operand) = map_res(signed_integer, |s: &str| s.parse::<i32>())(input)?;
    Ok((input, FieldCondition::new(field, op, operand)))
}

fn duration_condition(input: &str) -> IResult<&str, Condition<i64>> {
    let (input, _) = opt(pair(tag_no_case("duration"), multispace0))(input)?;
    let (input, op) = operator(input)?;
    let (input, _) = multispace0(input)?;
    let (input, operand) = map_res(signed_integer, |s: &str| s.parse::<i64>())(input)?;
    Ok((input, Condition::new(op, operand)))
}

fn time_range(input: &str) -> IResult<&str, TimeRange> {
    let (input, start) = opt(timestamp)(input)?;
    let (input, _) = delimited(multispace0, tag(".."), multispace0)(input)?;
    let (input, end) = opt(timestamp)(input)?;
    Ok((
        input,
        TimeRange::new(
            start.unwrap_or(Timestamp::MIN),
            end.unwrap_or(Timestamp::MAX),
        ),
    ))
}

fn group_by(input: &str) -> IResult<&str, GroupBy> {
    alt((
        value(GroupBy::None, tag_no_case("none")),
        map(
            preceded(pair(tag_no_case("bucket"), char(':')), float_number),
            GroupBy::Bucket,
        ),
        map(
            map_res(alpha1, |s: &str| TimeField::from_str(s).ok_or(())),
            GroupBy::Field,
        ),
    ))(input)
}

/// Parse comparison operator
fn operator(input: &str) -> IResult<&str, Operator> {
    alt((
        value(Operator::Gte, tag(">=")),
        value(Operator::Lte, tag("<=")),
        value(Operator::Ne, alt((tag("!="), tag("<>")))),
        value(Operator::Gt, tag(">")),
        value(Operator::Lt, tag("<")),
        value(Operator::Eq, alt((tag("=="), tag("=")))),
    ))(input)
}

fn literal(input: &str) -> IResult<&str, Value> {
    alt((
        map(preceded(tag_no_case("0x"), hex_bytes), Value::Blob),
        value(Value::Bool(true), tag_no_case("true")),
        value(Value::Bool(false), tag_no_case("false")),
        map(delimited(char('\''), anychar, char('\'')), Value::Char),
        map(
            delimited(char('"'), take_while(|c| c != '"'), char('"')),
            |s: &str| Value::Str(s.to_string()),
        ),
        map_res(recognize(tuple((signed_integer, fraction_or_exponent))), |s: &str| {
            s.parse::<f64>().map(Value::Float)
        }),
        map_res(signed_integer, |s: &str| s.parse::<i64>().map(Value::Long)),
    ))(input)
}

fn timestamp(input: &str) -> IResult<&str, Timestamp> {
    map_res(signed_integer, |s: &str| s.parse::<i64>())(input)
}

fn signed_integer(input: &str) -> IResult<&str, &str> {
    recognize(pair(opt(alt((char('-'), char('+')))), digit1))(input)
}

/// The part of a float after its integer digits; at least one of fraction or exponent
fn fraction_or_exponent(input: &str) -> IResult<&str, &str> {
    alt((
        recognize(pair(
            pair(char('.'), digit1),
            opt(tuple((alt((char('e'), char('E'))), signed_integer))),
        )),
        recognize(pair(alt((char('e'), char('E'))), signed_integer)),
    ))(input)
}

fn float_number(input: &str) -> IResult<&str, f64> {
    map_res(
        recognize(pair(signed_integer, opt(fraction_or_exponent))),
        |s: &str| s.parse::<f64>(),
    )(input)
}

fn hex_bytes(input: &str) -> IResult<&str, Vec<u8>> {
    many0(map_res(
        take_while_m_n(2, 2, |c: char| c.is_ascii_hexdigit()),
        |s: &str| u8::from_str_radix(s, 16),
    ))(input)
}
