//! Hive type strings.
//!
//! Parses the type descriptors stored in Metastore `FieldSchema.type`
//! (`bigint`, `decimal(10,2)`, `array<struct<a:int,b:string>>`, ...) and
//! prints [`ColumnType`] back in Hive's canonical spelling.

use super::{ColumnType, StructField, DEFAULT_DECIMAL_PRECISION};
use crate::{Error, Result};

/// Convert a Hive type string to a catalog type.
pub fn to_catalog_type(hive_type: &str) -> Result<ColumnType> {
    HiveTypeParser::new(hive_type)?.parse()
}

/// Convert a catalog type to its canonical Hive type string.
pub fn to_external_type(column_type: &ColumnType) -> Result<String> {
    let mut out = String::new();
    write_hive_type(column_type, &mut out)?;
    Ok(out)
}

fn write_hive_type(column_type: &ColumnType, out: &mut String) -> Result<()> {
    match column_type {
        ColumnType::Boolean => out.push_str("boolean"),
        ColumnType::Byte => out.push_str("tinyint"),
        ColumnType::Short => out.push_str("smallint"),
        ColumnType::Integer => out.push_str("int"),
        ColumnType::Long => out.push_str("bigint"),
        ColumnType::Float => out.push_str("float"),
        ColumnType::Double => out.push_str("double"),
        ColumnType::Decimal { precision, scale } => {
            ColumnType::decimal(*precision as u32, *scale as u32)?;
            out.push_str(&format!("decimal({},{})", precision, scale));
        }
        ColumnType::String => out.push_str("string"),
        ColumnType::VarChar(n) => {
            ColumnType::varchar(*n)?;
            out.push_str(&format!("varchar({})", n));
        }
        ColumnType::FixedChar(n) => {
            ColumnType::fixed_char(*n)?;
            out.push_str(&format!("char({})", n));
        }
        ColumnType::Binary => out.push_str("binary"),
        ColumnType::Date => out.push_str("date"),
        ColumnType::Timestamp => out.push_str("timestamp"),
        ColumnType::IntervalYear => out.push_str("interval_year_month"),
        ColumnType::IntervalDay => out.push_str("interval_day_time"),
        ColumnType::Time => {
            return Err(Error::UnsupportedType(
                "time has no Hive representation".into(),
            ))
        }
        ColumnType::List(element) => {
            out.push_str("array<");
            write_hive_type(element, out)?;
            out.push('>');
        }
        ColumnType::Map(key, value) => {
            if !key.is_primitive() {
                return Err(Error::UnsupportedType(format!(
                    "Hive map keys must be primitive, got {}",
                    key
                )));
            }
            out.push_str("map<");
            write_hive_type(key, out)?;
            out.push(',');
            write_hive_type(value, out)?;
            out.push('>');
        }
        ColumnType::Struct(fields) => {
            if fields.is_empty() {
                return Err(Error::UnsupportedType("struct without fields".into()));
            }
            out.push_str("struct<");
            for (i, field) in fields.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_field_name(&field.name, out);
                out.push(':');
                write_hive_type(&field.field_type, out)?;
                if let Some(comment) = &field.comment {
                    out.push_str(" comment '");
                    out.push_str(&comment.replace('\\', "\\\\").replace('\'', "\\'"));
                    out.push('\'');
                }
            }
            out.push('>');
        }
        ColumnType::Union(types) => {
            if types.is_empty() {
                return Err(Error::UnsupportedType("union without members".into()));
            }
            out.push_str("uniontype<");
            for (i, t) in types.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_hive_type(t, out)?;
            }
            out.push('>');
        }
    }
    Ok(())
}

fn write_field_name(name: &str, out: &mut String) {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        out.push_str(name);
    } else {
        out.push('`');
        out.push_str(&name.replace('`', "``"));
        out.push('`');
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Quoted(String),
    /// Single- or double-quoted string literal
    Literal(String),
    Symbol(char),
}

/// Recursive-descent parser over a tokenized Hive type string.
struct HiveTypeParser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> HiveTypeParser<'a> {
    fn new(input: &'a str) -> Result<Self> {
        let tokens = Self::tokenize(input)?;
        Ok(Self {
            input,
            tokens,
            pos: 0,
        })
    }

    fn tokenize(input: &str) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        let mut chars = input.chars().peekable();

        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                chars.next();
            } else if matches!(c, '<' | '>' | '(' | ')' | ',' | ':') {
                tokens.push(Token::Symbol(c));
                chars.next();
            } else if c == '`' {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('`') if chars.peek() == Some(&'`') => {
                            chars.next();
                            name.push('`');
                        }
                        Some('`') => break,
                        Some(ch) => name.push(ch),
                        None => {
                            return Err(Error::UnsupportedType(format!(
                                "unterminated quoted name in '{}'",
                                input
                            )))
                        }
                    }
                }
                tokens.push(Token::Quoted(name));
            } else if c == '\'' || c == '"' {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some(ch) = chars.next() {
                    match ch {
                        '\\' => match chars.next() {
                            Some(escaped) => text.push(escaped),
                            None => break,
                        },
                        ch if ch == c => {
                            closed = true;
                            break;
                        }
                        ch => text.push(ch),
                    }
                }
                if !closed {
                    return Err(Error::UnsupportedType(format!(
                        "unterminated string literal in '{}'",
                        input
                    )));
                }
                tokens.push(Token::Literal(text));
            } else if c.is_ascii_alphanumeric() || c == '_' || c == '$' {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            } else {
                return Err(Error::UnsupportedType(format!(
                    "unexpected character '{}' in '{}'",
                    c, input
                )));
            }
        }

        Ok(tokens)
    }

    fn parse(mut self) -> Result<ColumnType> {
        let parsed = self.parse_type()?;
        if self.pos != self.tokens.len() {
            return Err(self.error("trailing input"));
        }
        Ok(parsed)
    }

    fn error(&self, message: &str) -> Error {
        Error::UnsupportedType(format!("{} in '{}'", message, self.input))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect_symbol(&mut self, symbol: char) -> Result<()> {
        match self.next() {
            Some(Token::Symbol(c)) if c == symbol => Ok(()),
            _ => Err(self.error(&format!("expected '{}'", symbol))),
        }
    }

    fn eat_symbol(&mut self, symbol: char) -> bool {
        if self.peek() == Some(&Token::Symbol(symbol)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_number(&mut self) -> Result<u32> {
        match self.next() {
            Some(Token::Ident(s)) => s
                .parse::<u32>()
                .map_err(|_| self.error(&format!("expected a number, got '{}'", s))),
            _ => Err(self.error("expected a number")),
        }
    }

    fn parse_type(&mut self) -> Result<ColumnType> {
        let name = match self.next() {
            Some(Token::Ident(name)) => name.to_lowercase(),
            _ => return Err(self.error("expected a type name")),
        };

        match name.as_str() {
            "boolean" => Ok(ColumnType::Boolean),
            "tinyint" => Ok(ColumnType::Byte),
            "smallint" => Ok(ColumnType::Short),
            "int" | "integer" => Ok(ColumnType::Integer),
            "bigint" => Ok(ColumnType::Long),
            "float" => Ok(ColumnType::Float),
            "double" => {
                if matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case("precision"))
                {
                    self.pos += 1;
                }
                Ok(ColumnType::Double)
            }
            "string" => Ok(ColumnType::String),
            "binary" => Ok(ColumnType::Binary),
            "date" => Ok(ColumnType::Date),
            "timestamp" => {
                if matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case("with")) {
                    // timestamp with local time zone
                    return Err(self.error("timestamp with time zone is not supported"));
                }
                Ok(ColumnType::Timestamp)
            }
            "interval_year_month" => Ok(ColumnType::IntervalYear),
            "interval_day_time" => Ok(ColumnType::IntervalDay),
            "decimal" | "numeric" => {
                if self.eat_symbol('(') {
                    let precision = self.expect_number()?;
                    let scale = if self.eat_symbol(',') {
                        self.expect_number()?
                    } else {
                        0
                    };
                    self.expect_symbol(')')?;
                    ColumnType::decimal(precision, scale)
                } else {
                    ColumnType::decimal(DEFAULT_DECIMAL_PRECISION as u32, 0)
                }
            }
            "char" => {
                self.expect_symbol('(')?;
                let length = self.expect_number()?;
                self.expect_symbol(')')?;
                ColumnType::fixed_char(length)
            }
            "varchar" => {
                self.expect_symbol('(')?;
                let length = self.expect_number()?;
                self.expect_symbol(')')?;
                ColumnType::varchar(length)
            }
            "array" => {
                self.expect_symbol('<')?;
                let element = self.parse_type()?;
                self.expect_symbol('>')?;
                Ok(ColumnType::List(Box::new(element)))
            }
            "map" => {
                self.expect_symbol('<')?;
                let key = self.parse_type()?;
                if !key.is_primitive() {
                    return Err(self.error("map key must be primitive"));
                }
                self.expect_symbol(',')?;
                let value = self.parse_type()?;
                self.expect_symbol('>')?;
                Ok(ColumnType::Map(Box::new(key), Box::new(value)))
            }
            "struct" => {
                self.expect_symbol('<')?;
                let mut fields = Vec::new();
                loop {
                    let field_name = match self.next() {
                        Some(Token::Ident(n)) | Some(Token::Quoted(n)) => n,
                        _ => return Err(self.error("expected a struct field name")),
                    };
                    self.expect_symbol(':')?;
                    let field_type = self.parse_type()?;
                    let mut field = StructField::new(field_name, field_type);
                    if matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case("comment"))
                    {
                        self.pos += 1;
                        match self.next() {
                            Some(Token::Literal(c)) => field = field.with_comment(c),
                            _ => return Err(self.error("expected a field comment")),
                        }
                    }
                    fields.push(field);
                    if !self.eat_symbol(',') {
                        break;
                    }
                }
                self.expect_symbol('>')?;
                Ok(ColumnType::Struct(fields))
            }
            "uniontype" => {
                self.expect_symbol('<')?;
                let mut types = vec![self.parse_type()?];
                while self.eat_symbol(',') {
                    types.push(self.parse_type()?);
                }
                self.expect_symbol('>')?;
                Ok(ColumnType::Union(types))
            }
            other => Err(self.error(&format!("unknown type '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_primitive_types() {
        assert_eq!(to_catalog_type("boolean").unwrap(), ColumnType::Boolean);
        assert_eq!(to_catalog_type("TINYINT").unwrap(), ColumnType::Byte);
        assert_eq!(to_catalog_type("int").unwrap(), ColumnType::Integer);
        assert_eq!(to_catalog_type("integer").unwrap(), ColumnType::Integer);
        assert_eq!(to_catalog_type("bigint").unwrap(), ColumnType::Long);
        assert_eq!(to_catalog_type("double precision").unwrap(), ColumnType::Double);
        assert_eq!(to_catalog_type("timestamp").unwrap(), ColumnType::Timestamp);
        assert_eq!(
            to_catalog_type("interval_day_time").unwrap(),
            ColumnType::IntervalDay
        );
    }

    #[test]
    fn test_parameterized_types() {
        assert_eq!(
            to_catalog_type("decimal(10, 2)").unwrap(),
            ColumnType::Decimal {
                precision: 10,
                scale: 2
            }
        );
        assert_eq!(
            to_catalog_type("decimal").unwrap(),
            ColumnType::Decimal {
                precision: 10,
                scale: 0
            }
        );
        assert_eq!(to_catalog_type("varchar(64)").unwrap(), ColumnType::VarChar(64));
        assert_eq!(to_catalog_type("char(3)").unwrap(), ColumnType::FixedChar(3));
    }

    #[test]
    fn test_nested_types() {
        let parsed = to_catalog_type("array<struct<street:string,zip:int>>").unwrap();
        assert_eq!(
            parsed,
            ColumnType::List(Box::new(ColumnType::Struct(vec![
                StructField::new("street", ColumnType::String),
                StructField::new("zip", ColumnType::Integer),
            ])))
        );

        let parsed = to_catalog_type("map<string, array<decimal(5,1)>>").unwrap();
        assert_eq!(
            parsed,
            ColumnType::Map(
                Box::new(ColumnType::String),
                Box::new(ColumnType::List(Box::new(ColumnType::Decimal {
                    precision: 5,
                    scale: 1
                })))
            )
        );

        let parsed = to_catalog_type("uniontype<int,string>").unwrap();
        assert_eq!(
            parsed,
            ColumnType::Union(vec![ColumnType::Integer, ColumnType::String])
        );
    }

    #[test]
    fn test_struct_field_comment_and_quoting() {
        let parsed = to_catalog_type("struct<`order id`:bigint comment 'pk'>").unwrap();
        match parsed {
            ColumnType::Struct(fields) => {
                assert_eq!(fields[0].name, "order id");
                assert_eq!(fields[0].comment.as_deref(), Some("pk"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let parsed =
            to_catalog_type(r#"struct<ts:timestamp comment "event time",note:string comment 'it\'s'>"#)
                .unwrap();
        match &parsed {
            ColumnType::Struct(fields) => {
                assert_eq!(fields[0].field_type, ColumnType::Timestamp);
                assert_eq!(fields[0].comment.as_deref(), Some("event time"));
                assert_eq!(fields[1].comment.as_deref(), Some("it's"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            to_external_type(&parsed).unwrap(),
            r"struct<ts:timestamp comment 'event time',note:string comment 'it\'s'>"
        );

        for broken in ["struct<a:int comment>", "struct<a:int comment 'open>", "struct<a:int comment pk>"] {
            let err = to_catalog_type(broken).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UnsupportedType, "{}", broken);
        }
    }

    #[test]
    fn test_round_trip_canonical_types() {
        let canonical = [
            "boolean",
            "tinyint",
            "smallint",
            "int",
            "bigint",
            "float",
            "double",
            "decimal(10,2)",
            "decimal(38,0)",
            "string",
            "varchar(255)",
            "char(10)",
            "binary",
            "date",
            "timestamp",
            "interval_year_month",
            "interval_day_time",
            "array<bigint>",
            "map<string,double>",
            "map<int,array<string>>",
            "struct<id:int,name:string>",
            "struct<`first name`:string,tags:array<string>>",
            "array<struct<k:string,v:map<string,decimal(12,4)>>>",
            "uniontype<int,string,array<date>>",
        ];

        for hive_type in canonical {
            let catalog_type = to_catalog_type(hive_type).unwrap();
            assert_eq!(
                to_external_type(&catalog_type).unwrap(),
                hive_type,
                "round trip of {}",
                hive_type
            );
        }
    }

    #[test]
    fn test_unsupported_types_fail_closed() {
        let rejected = [
            "decimal(39,2)",
            "decimal(10,11)",
            "decimal(0)",
            "char(0)",
            "char(256)",
            "varchar(70000)",
            "geometry",
            "void",
            "array<geometry>",
            "struct<a:int,b:geometry>",
            "map<array<int>,string>",
            "timestamp with local time zone",
            "int>",
            "array<int",
            "struct<>",
            "",
        ];

        for hive_type in rejected {
            let err = to_catalog_type(hive_type).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UnsupportedType, "{}", hive_type);
        }
    }

    #[test]
    fn test_to_external_rejects_unrepresentable() {
        assert!(to_external_type(&ColumnType::Time).is_err());
        assert!(to_external_type(&ColumnType::List(Box::new(ColumnType::Time))).is_err());
        assert!(to_external_type(&ColumnType::Struct(vec![StructField::new(
            "t",
            ColumnType::Time
        )]))
        .is_err());
        assert!(to_external_type(&ColumnType::Map(
            Box::new(ColumnType::List(Box::new(ColumnType::Integer))),
            Box::new(ColumnType::String)
        ))
        .is_err());
        assert!(to_external_type(&ColumnType::Decimal {
            precision: 40,
            scale: 0
        })
        .is_err());
        assert!(to_external_type(&ColumnType::Struct(vec![])).is_err());
    }
}
