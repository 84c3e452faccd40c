//! USDA (ASCII) layer parser.
//!
//! Lines are consumed from a queue; statements that span several lines
//! (arrays, time-sample dictionaries, metadata blocks) are joined until their
//! brackets balance, then parsed with a small character cursor.
//!
//! # Supported Syntax
//!
//! - Layer metadata: `( defaultPrim = "World" upAxis = "Y" ... )`
//! - `def|over|class [Type] "Name" [( metadata )] { ... }`
//! - `[custom] [uniform] type[[]] name [= value] [( metadata )]`
//! - `type name.connect = </Path.prop>` and `type name.timeSamples = { t: v, ... }`
//! - `[custom] [uniform] rel name = </Target>` or `[</A>, </B>]`
//!
//! Composition metadata (references, payloads, variants) is read but not resolved.

use std::collections::VecDeque;

use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use thiserror::Error;

use super::path::SdfPath;
use super::prim::{Attribute, Prim, Specifier};
use super::stage::Stage;
use super::types::{TypeName, Value, ValueType};

/// Errors that can occur during USDA parsing.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Unexpected end of file")]
    UnexpectedEof,

    #[error("Invalid number format: {0}")]
    InvalidNumber(String),

    #[error("Unclosed block starting at line {0}")]
    UnclosedBlock(usize),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// A literal value before it is typed against an attribute declaration.
#[derive(Clone, Debug, PartialEq)]
enum Literal {
    Number(f64),
    Bool(bool),
    Str(String),
    Asset(String),
    Path(String),
    Ident(String),
    Tuple(Vec<Literal>),
    List(Vec<Literal>),
    /// Time samples `{ time: value, ... }`; other dictionaries parse as empty
    Samples(Vec<(f64, Literal)>),
    None,
}

const LIST_OPS: &[&str] = &["prepend", "append", "add", "delete", "reorder"];

/// USDA layer parser.
pub struct UsdaParser {
    lines: VecDeque<(usize, String)>,
    current_line: usize,
    stage: Stage,
}

impl UsdaParser {
    /// Create a new parser from file contents.
    pub fn new(content: &str) -> Self {
        let lines: VecDeque<_> = content
            .lines()
            .enumerate()
            .map(|(i, s)| (i + 1, s.to_string()))
            .collect();

        Self {
            lines,
            current_line: 0,
            stage: Stage::new(),
        }
    }

    /// Parse the layer into a stage.
    pub fn parse(mut self) -> ParseResult<Stage> {
        // Header comment (`#usda 1.0`) and blank lines
        while let Some((_, line)) = self.lines.front() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                self.lines.pop_front();
            } else {
                break;
            }
        }

        if let Some((num, line)) = self.lines.front().cloned() {
            if line.trim_start().starts_with('(') {
                self.lines.pop_front();
                self.current_line = num;
                let (inner, rest) = self.take_balanced(line.trim_start().to_string(), num)?;
                self.apply_layer_metadata(&inner)?;
                self.push_rest(num, rest);
            }
        }

        while let Some((num, line)) = self.next_line() {
            let trimmed = line.trim();
            if starts_with_specifier(trimmed) {
                self.parse_prim(&SdfPath::abs_root(), trimmed.to_string(), num)?;
            } else {
                log::debug!("Skipping layer statement at line {}: {}", num, trimmed);
                let first = trimmed.to_string();
                self.take_statement(first, num)?;
            }
        }

        Ok(self.stage)
    }

    /// Next non-empty, non-comment line.
    fn next_line(&mut self) -> Option<(usize, String)> {
        while let Some((num, line)) = self.lines.pop_front() {
            let stripped = strip_comment(&line);
            if !stripped.trim().is_empty() {
                self.current_line = num;
                return Some((num, stripped.to_string()));
            }
        }
        None
    }

    fn push_rest(&mut self, num: usize, rest: String) {
        if !rest.trim().is_empty() {
            self.lines.push_front((num, rest));
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::Parse {
            line: self.current_line,
            message: message.into(),
        }
    }

    /// `text` starts with an opening `(`, `[` or `{`. Pull lines until the
    /// matching close is found. Returns the inner text and whatever follows.
    fn take_balanced(&mut self, mut text: String, start_line: usize) -> ParseResult<(String, String)> {
        loop {
            if let Some(end) = find_matching(&text) {
                let inner = text[1..end].to_string();
                let rest = text[end + 1..].to_string();
                return Ok((inner, rest));
            }
            match self.lines.pop_front() {
                Some((num, line)) => {
                    self.current_line = num;
                    text.push('\n');
                    text.push_str(strip_comment(&line));
                }
                None => return Err(ParseError::UnclosedBlock(start_line)),
            }
        }
    }

    /// Join continuation lines until brackets and strings are balanced.
    fn take_statement(&mut self, mut text: String, start_line: usize) -> ParseResult<String> {
        while !is_balanced(&text) {
            match self.lines.pop_front() {
                Some((num, line)) => {
                    self.current_line = num;
                    text.push('\n');
                    text.push_str(strip_comment(&line));
                }
                None => {
                    log::debug!("Statement starting at line {} never closed", start_line);
                    return Err(ParseError::UnexpectedEof);
                }
            }
        }
        Ok(text)
    }

    fn apply_layer_metadata(&mut self, text: &str) -> ParseResult<()> {
        for (key, literal) in parse_metadata_entries(text, self.current_line)? {
            let meta = &mut self.stage.metadata;
            match (key.as_str(), literal) {
                ("defaultPrim", Literal::Str(s)) => meta.default_prim = Some(s),
                ("upAxis", Literal::Str(s)) => meta.up_axis = s,
                ("metersPerUnit", Literal::Number(n)) => meta.meters_per_unit = Some(n),
                ("startTimeCode", Literal::Number(n)) => meta.start_time_code = Some(n),
                ("endTimeCode", Literal::Number(n)) => meta.end_time_code = Some(n),
                ("timeCodesPerSecond", Literal::Number(n)) => meta.time_codes_per_second = n,
                ("framesPerSecond", Literal::Number(n)) => meta.frames_per_second = Some(n),
                (other, _) => log::debug!("Ignoring layer metadata '{}'", other),
            }
        }
        Ok(())
    }

    /// Parse a prim header line and its body, inserting prims into the stage.
    fn parse_prim(&mut self, parent: &SdfPath, header: String, start_line: usize) -> ParseResult<()> {
        let mut cursor = Cursor::new(&header);
        let keyword = cursor.ident();
        let specifier = Specifier::from_keyword(&keyword)
            .ok_or_else(|| self.error(format!("Expected prim specifier, found '{}'", keyword)))?;

        cursor.skip_ws();
        let type_name = if cursor.peek() == Some('"') {
            String::new()
        } else {
            cursor.ident()
        };

        cursor.skip_ws();
        let name = match cursor.string() {
            Some(name) => name,
            None => return Err(self.error("Expected quoted prim name")),
        };

        let path = parent
            .append_child(&name)
            .map_err(|e| self.error(e.to_string()))?;

        let mut prim = Prim::new(path.clone(), specifier, type_name);
        let mut rest = cursor.rest().trim_start().to_string();

        // Metadata may follow on the header line or start on the next line.
        if rest.is_empty() {
            if let Some((num, line)) = self.next_line() {
                rest = line.trim_start().to_string();
                self.current_line = num;
            }
        }
        if rest.starts_with('(') {
            let (inner, after) = self.take_balanced(rest, start_line)?;
            for (key, literal) in parse_metadata_entries(&inner, self.current_line)? {
                if let Some(text) = literal_to_metadata_string(&literal) {
                    prim.metadata.insert(key, text);
                }
            }
            rest = after.trim_start().to_string();
            if rest.is_empty() {
                if let Some((num, line)) = self.next_line() {
                    rest = line.trim_start().to_string();
                    self.current_line = num;
                }
            }
        }

        match rest.strip_prefix('{') {
            Some(after) => self.push_rest(start_line, after.to_string()),
            None => return Err(self.error(format!("Expected '{{' to open prim '{}'", name))),
        }

        // The prim is inserted before its children so they link to it.
        self.stage.insert_prim(prim);

        loop {
            let (num, line) = match self.next_line() {
                Some(x) => x,
                None => return Err(ParseError::UnclosedBlock(start_line)),
            };
            let trimmed = line.trim();

            if let Some(after) = trimmed.strip_prefix('}') {
                self.push_rest(num, after.to_string());
                break;
            }

            if starts_with_specifier(trimmed) {
                self.parse_prim(&path, trimmed.to_string(), num)?;
                continue;
            }

            let statement = self.take_statement(trimmed.to_string(), num)?;
            self.parse_property(&path, &statement)?;
        }

        Ok(())
    }

    /// Parse an attribute, relationship or other body statement.
    fn parse_property(&mut self, prim_path: &SdfPath, statement: &str) -> ParseResult<()> {
        let mut cursor = Cursor::new(statement);
        let mut custom = false;
        let mut uniform = false;

        let first = cursor.peek_ident();
        if first == "variantSet" || first == "reorder" || first == "delete" {
            log::debug!("Skipping '{}' statement in {}", first, prim_path);
            return Ok(());
        }

        let mut word = cursor.ident();
        loop {
            match word.as_str() {
                "custom" => custom = true,
                "uniform" | "varying" | "config" => uniform = word == "uniform",
                w if LIST_OPS.contains(&w) => {}
                _ => break,
            }
            cursor.skip_ws();
            word = cursor.ident();
        }

        if word == "rel" {
            return self.parse_relationship(prim_path, &mut cursor);
        }

        if word.is_empty() {
            return Err(self.error(format!("Unrecognized statement: {}", statement.trim())));
        }

        let mut type_text = word;
        if cursor.eat_str("[]") {
            type_text.push_str("[]");
        }
        let type_name = TypeName::parse(&type_text);

        cursor.skip_ws();
        let full_name = cursor.ident();
        if full_name.is_empty() {
            return Err(self.error(format!("Expected attribute name after '{}'", type_text)));
        }

        let (name, suffix) = split_property_suffix(&full_name);

        let prim = match self.stage.prim(prim_path) {
            Some(p) => p,
            None => return Err(self.error(format!("No prim at {}", prim_path))),
        };

        let mut attr = prim
            .attribute(name)
            .cloned()
            .unwrap_or_else(|| Attribute::new(name, type_name.clone()));
        attr.custom |= custom;
        attr.uniform |= uniform;

        cursor.skip_ws();
        if cursor.eat('=') {
            let literal = cursor
                .literal()
                .map_err(|message| self.error(message))?;

            match suffix {
                Some("connect") => {
                    for target in collect_paths(&literal) {
                        let target = SdfPath::new(&target).map_err(|e| self.error(e.to_string()))?;
                        attr.add_connection(target);
                    }
                }
                Some("timeSamples") => {
                    if let Literal::Samples(samples) = literal {
                        for (time, sample) in samples {
                            if let Some(value) = to_value(&type_name, &sample)
                                .map_err(|m| self.error(format!("{}: {}", name, m)))?
                            {
                                attr.set_time_sample(time, value)
                                    .map_err(|e| self.error(e.to_string()))?;
                            }
                        }
                    } else {
                        return Err(self.error(format!("Expected time samples for {}", name)));
                    }
                }
                Some(other) => {
                    log::debug!("Ignoring '{}.{}' on {}", name, other, prim_path);
                }
                None => match to_value(&type_name, &literal)
                    .map_err(|m| self.error(format!("{}: {}", name, m)))?
                {
                    Some(value) => attr.set(value).map_err(|e| self.error(e.to_string()))?,
                    None => attr.clear(),
                },
            }
        }

        cursor.skip_ws();
        if cursor.peek() == Some('(') {
            let text = cursor.rest().to_string();
            if let Some(end) = find_matching(&text) {
                for (key, literal) in parse_metadata_entries(&text[1..end], self.current_line)? {
                    if let Some(text) = literal_to_metadata_string(&literal) {
                        attr.metadata.insert(key, text);
                    }
                }
            }
        }

        if let Some(prim) = self.stage.prim_mut(prim_path) {
            prim.insert_attribute(attr);
        }
        Ok(())
    }

    fn parse_relationship(&mut self, prim_path: &SdfPath, cursor: &mut Cursor) -> ParseResult<()> {
        cursor.skip_ws();
        let name = cursor.ident();
        if name.is_empty() {
            return Err(self.error("Expected relationship name"));
        }

        let mut targets = Vec::new();
        cursor.skip_ws();
        if cursor.eat('=') {
            let literal = cursor.literal().map_err(|m| self.error(m))?;
            for target in collect_paths(&literal) {
                targets.push(SdfPath::new(&target).map_err(|e| self.error(e.to_string()))?);
            }
        }

        let prim = match self.stage.prim_mut(prim_path) {
            Some(p) => p,
            None => return Err(self.error(format!("No prim at {}", prim_path))),
        };
        let rel = prim.create_relationship(&name);
        for target in targets {
            if !rel.targets.contains(&target) {
                rel.targets.push(target);
            }
        }
        Ok(())
    }
}

/// Parse a USDA string into a stage.
pub fn parse_usda(content: &str) -> ParseResult<Stage> {
    UsdaParser::new(content).parse()
}

fn starts_with_specifier(line: &str) -> bool {
    ["def ", "over ", "class "].iter().any(|k| line.starts_with(k))
        || line == "def"
        || line == "over"
        || line == "class"
}

fn split_property_suffix(full_name: &str) -> (&str, Option<&str>) {
    for suffix in ["connect", "timeSamples", "spline"] {
        if let Some(name) = full_name.strip_suffix(suffix).and_then(|n| n.strip_suffix('.')) {
            return (name, Some(suffix));
        }
    }
    (full_name, None)
}

/// Remove a trailing `#` comment that is not inside a string or asset path.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    for (i, c) in line.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' || c == '@' => quote = Some(c),
            None if c == '#' => return &line[..i],
            None => {}
        }
    }
    line
}

/// Scan `text` tracking brackets outside strings. Returns the byte index
/// of the bracket closing the one at position 0.
fn find_matching(text: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut scanner = QuoteScanner::default();
    for (i, c) in text.char_indices() {
        if scanner.in_quote(text, i, c) {
            continue;
        }
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn is_balanced(text: &str) -> bool {
    let mut depth = 0i32;
    let mut scanner = QuoteScanner::default();
    for (i, c) in text.char_indices() {
        if scanner.in_quote(text, i, c) {
            continue;
        }
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
    }
    depth <= 0 && scanner.quote.is_none()
}

/// Tracks whether a scan position is inside `"..."`, `"""..."""`, `'...'`
/// or `@...@`.
#[derive(Default)]
struct QuoteScanner {
    quote: Option<&'static str>,
    skip: usize,
}

impl QuoteScanner {
    fn in_quote(&mut self, text: &str, i: usize, c: char) -> bool {
        if self.skip > 0 {
            self.skip -= 1;
            return true;
        }
        match self.quote {
            Some(q) => {
                if c == '\\' {
                    self.skip = 1;
                } else if text[i..].starts_with(q) {
                    self.skip = q.len() - 1;
                    self.quote = None;
                }
                true
            }
            None => {
                let opener = if text[i..].starts_with("\"\"\"") {
                    Some("\"\"\"")
                } else {
                    match c {
                        '"' => Some("\""),
                        '\'' => Some("'"),
                        '@' => Some("@"),
                        _ => None,
                    }
                };
                match opener {
                    Some(q) => {
                        self.skip = q.len() - 1;
                        self.quote = Some(q);
                        true
                    }
                    None => false,
                }
            }
        }
    }
}

/// Parse `key = value` entries of a metadata block. Bare strings are
/// recorded as `doc`.
fn parse_metadata_entries(text: &str, line: usize) -> ParseResult<Vec<(String, Literal)>> {
    let mut cursor = Cursor::new(text);
    let mut entries = Vec::new();

    loop {
        cursor.skip_ws_and(&[',', ';']);
        let Some(c) = cursor.peek() else { break };

        if c == '"' || c == '\'' {
            if let Some(doc) = cursor.string() {
                entries.push(("doc".to_string(), Literal::Str(doc)));
            }
            continue;
        }

        let mut key = cursor.ident();
        while LIST_OPS.contains(&key.as_str()) {
            cursor.skip_ws();
            key = cursor.ident();
        }
        if key.is_empty() {
            // Trailing prim path of a reference (`@a.usda@</Target>`)
            if cursor.peek() == Some('<') {
                cursor.literal().map_err(|message| ParseError::Parse { line, message })?;
                continue;
            }
            return Err(ParseError::Parse {
                line,
                message: format!("Unexpected character '{}' in metadata", c),
            });
        }

        cursor.skip_ws();
        if !cursor.eat('=') {
            // Typed dictionary entries (`string foo = ...`) are not needed.
            cursor.skip_until_newline();
            continue;
        }
        let literal = cursor
            .literal()
            .map_err(|message| ParseError::Parse { line, message })?;
        entries.push((key, literal));
    }

    Ok(entries)
}

fn literal_to_metadata_string(literal: &Literal) -> Option<String> {
    match literal {
        Literal::Str(s) | Literal::Ident(s) | Literal::Asset(s) | Literal::Path(s) => Some(s.clone()),
        Literal::Bool(b) => Some(b.to_string()),
        Literal::Number(n) => Some(n.to_string()),
        Literal::List(items) => Some(
            items
                .iter()
                .filter_map(literal_to_metadata_string)
                .collect::<Vec<_>>()
                .join(","),
        ),
        _ => None,
    }
}

fn collect_paths(literal: &Literal) -> Vec<String> {
    match literal {
        Literal::Path(p) => vec![p.clone()],
        Literal::List(items) => items.iter().flat_map(collect_paths).collect(),
        _ => Vec::new(),
    }
}

fn number(literal: &Literal) -> Result<f64, String> {
    match literal {
        Literal::Number(n) => Ok(*n),
        Literal::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        other => Err(format!("expected number, found {:?}", other)),
    }
}

fn numbers<const N: usize>(literal: &Literal) -> Result<[f32; N], String> {
    match literal {
        Literal::Tuple(items) if items.len() == N => {
            let mut out = [0.0f32; N];
            for (slot, item) in out.iter_mut().zip(items) {
                *slot = number(item)? as f32;
            }
            Ok(out)
        }
        other => Err(format!("expected {}-tuple, found {:?}", N, other)),
    }
}

fn text(literal: &Literal) -> Result<String, String> {
    match literal {
        Literal::Str(s) | Literal::Ident(s) | Literal::Asset(s) => Ok(s.clone()),
        other => Err(format!("expected string, found {:?}", other)),
    }
}

fn list(literal: &Literal) -> Result<&[Literal], String> {
    match literal {
        Literal::List(items) => Ok(items),
        other => Err(format!("expected array, found {:?}", other)),
    }
}

/// USDA writes quaternions as (real, i, j, k).
fn quat(literal: &Literal) -> Result<Quat, String> {
    let [w, x, y, z] = numbers::<4>(literal)?;
    Ok(Quat::from_xyzw(x, y, z, w))
}

/// USD matrices are row-major with row vectors, which matches glam's
/// column-major storage of the equivalent column-vector matrix.
fn matrix(literal: &Literal) -> Result<Mat4, String> {
    match literal {
        Literal::Tuple(rows) if rows.len() == 4 => {
            let mut cols = [[0.0f32; 4]; 4];
            for (col, row) in cols.iter_mut().zip(rows) {
                *col = numbers::<4>(row)?;
            }
            Ok(Mat4::from_cols_array_2d(&cols))
        }
        other => Err(format!("expected 4x4 matrix, found {:?}", other)),
    }
}

/// Convert a literal into a typed value. `None` literals yield `Ok(None)`.
fn to_value(type_name: &TypeName, literal: &Literal) -> Result<Option<Value>, String> {
    use ValueType as T;

    if *literal == Literal::None {
        return Ok(None);
    }

    let value = if type_name.is_array {
        let items = list(literal)?;
        match &type_name.base {
            T::Int | T::Bool => Value::IntArray(
                items.iter().map(|i| number(i).map(|n| n as i32)).collect::<Result<_, _>>()?,
            ),
            T::Float | T::Double => Value::FloatArray(
                items.iter().map(|i| number(i).map(|n| n as f32)).collect::<Result<_, _>>()?,
            ),
            T::Vec2(_) => Value::Vec2Array(
                items.iter().map(|i| numbers::<2>(i).map(Vec2::from)).collect::<Result<_, _>>()?,
            ),
            T::Vec3(_) => Value::Vec3Array(
                items.iter().map(|i| numbers::<3>(i).map(Vec3::from)).collect::<Result<_, _>>()?,
            ),
            T::Vec4(_) => Value::Vec4Array(
                items.iter().map(|i| numbers::<4>(i).map(Vec4::from)).collect::<Result<_, _>>()?,
            ),
            T::Quat(_) => Value::QuatArray(items.iter().map(quat).collect::<Result<_, _>>()?),
            T::Token => Value::TokenArray(items.iter().map(text).collect::<Result<_, _>>()?),
            T::String | T::Asset => {
                Value::StringArray(items.iter().map(text).collect::<Result<_, _>>()?)
            }
            T::Matrix4 | T::Unknown(_) => {
                log::debug!("Skipping value of unsupported array type {}", type_name);
                return Ok(None);
            }
        }
    } else {
        match &type_name.base {
            T::Bool => Value::Bool(number(literal)? != 0.0),
            T::Int => Value::Int(number(literal)? as i32),
            T::Float => Value::Float(number(literal)? as f32),
            T::Double => Value::Double(number(literal)?),
            T::String => Value::String(text(literal)?),
            T::Token => Value::Token(text(literal)?),
            T::Asset => Value::Asset(text(literal)?),
            T::Vec2(_) => Value::Vec2(Vec2::from(numbers::<2>(literal)?)),
            T::Vec3(_) => Value::Vec3(Vec3::from(numbers::<3>(literal)?)),
            T::Vec4(_) => Value::Vec4(Vec4::from(numbers::<4>(literal)?)),
            T::Quat(_) => Value::Quat(quat(literal)?),
            T::Matrix4 => Value::Matrix4(matrix(literal)?),
            T::Unknown(_) => {
                log::debug!("Skipping value of unsupported type {}", type_name);
                return Ok(None);
            }
        }
    };

    Ok(Some(value))
}

/// Character cursor over a single statement.
struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, s: &str) -> bool {
        if self.rest().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn skip_ws_and(&mut self, extra: &[char]) {
        while self
            .peek()
            .is_some_and(|c| c.is_whitespace() || extra.contains(&c))
        {
            self.bump();
        }
    }

    fn skip_until_newline(&mut self) {
        while let Some(c) = self.bump() {
            if c == '\n' {
                break;
            }
        }
    }

    /// Identifier including namespace separators and property suffixes
    /// (`primvars:st`, `inputs:file.connect`).
    fn ident(&mut self) -> String {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':' || c == '.')
        {
            self.bump();
        }
        self.text[start..self.pos].to_string()
    }

    fn peek_ident(&self) -> String {
        let mut probe = Cursor {
            text: self.text,
            pos: self.pos,
        };
        probe.skip_ws();
        probe.ident()
    }

    /// Quoted string, single or triple quoted.
    fn string(&mut self) -> Option<String> {
        let delim = if self.rest().starts_with("\"\"\"") {
            "\"\"\""
        } else if self.rest().starts_with('"') {
            "\""
        } else if self.rest().starts_with('\'') {
            "'"
        } else {
            return None;
        };
        self.pos += delim.len();

        let mut out = String::new();
        loop {
            if self.rest().starts_with(delim) {
                self.pos += delim.len();
                return Some(out);
            }
            match self.bump()? {
                '\\' => match self.bump()? {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    other => out.push(other),
                },
                c => out.push(c),
            }
        }
    }

    fn delimited(&mut self, open: char, close: char) -> Option<String> {
        if !self.eat(open) {
            return None;
        }
        let start = self.pos;
        while let Some(c) = self.bump() {
            if c == close {
                return Some(self.text[start..self.pos - close.len_utf8()].to_string());
            }
        }
        None
    }

    fn number(&mut self) -> Result<f64, String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '-' || c == '+' || c == '.')
        {
            self.bump();
        }
        let raw = &self.text[start..self.pos];
        match raw {
            "inf" => Ok(f64::INFINITY),
            "-inf" => Ok(f64::NEG_INFINITY),
            "nan" => Ok(f64::NAN),
            _ => raw.parse::<f64>().map_err(|_| format!("invalid number '{}'", raw)),
        }
    }

    fn sequence(&mut self, close: char) -> Result<Vec<Literal>, String> {
        let mut items = Vec::new();
        loop {
            self.skip_ws_and(&[',']);
            if self.eat(close) {
                return Ok(items);
            }
            if self.peek().is_none() {
                return Err(format!("expected '{}'", close));
            }
            items.push(self.literal()?);
        }
    }

    fn samples(&mut self) -> Result<Vec<(f64, Literal)>, String> {
        let mut samples = Vec::new();
        loop {
            self.skip_ws_and(&[',']);
            if self.eat('}') {
                return Ok(samples);
            }
            match self.peek() {
                Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                    let time = self.number()?;
                    self.skip_ws();
                    if !self.eat(':') {
                        return Err("expected ':' after time code".to_string());
                    }
                    self.skip_ws();
                    let value = self.literal()?;
                    samples.push((time, value));
                }
                Some(_) => {
                    // Not a time-sample dictionary; skip its contents.
                    let mut depth = 1;
                    while let Some(c) = self.bump() {
                        match c {
                            '{' => depth += 1,
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    return Ok(samples);
                                }
                            }
                            _ => {}
                        }
                    }
                    return Err("unclosed dictionary".to_string());
                }
                None => return Err("unclosed dictionary".to_string()),
            }
        }
    }

    fn literal(&mut self) -> Result<Literal, String> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                self.bump();
                Ok(Literal::Tuple(self.sequence(')')?))
            }
            Some('[') => {
                self.bump();
                Ok(Literal::List(self.sequence(']')?))
            }
            Some('{') => {
                self.bump();
                Ok(Literal::Samples(self.samples()?))
            }
            Some('"') | Some('\'') => self
                .string()
                .map(Literal::Str)
                .ok_or_else(|| "unterminated string".to_string()),
            Some('@') => self
                .delimited('@', '@')
                .map(Literal::Asset)
                .ok_or_else(|| "unterminated asset path".to_string()),
            Some('<') => self
                .delimited('<', '>')
                .map(Literal::Path)
                .ok_or_else(|| "unterminated path".to_string()),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                self.number().map(Literal::Number)
            }
            Some(_) => {
                let word = self.ident();
                match word.as_str() {
                    "" => Err(format!("unexpected '{}'", self.peek().unwrap_or(' '))),
                    "None" => Ok(Literal::None),
                    "true" => Ok(Literal::Bool(true)),
                    "false" => Ok(Literal::Bool(false)),
                    "inf" => Ok(Literal::Number(f64::INFINITY)),
                    "nan" => Ok(Literal::Number(f64::NAN)),
                    _ => Ok(Literal::Ident(word)),
                }
            }
            None => Err("expected value".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_layer_metadata() {
        let usda = r#"#usda 1.0
(
    "Exported scene"
    defaultPrim = "World"
    metersPerUnit = 1
    upAxis = "Z"
    startTimeCode = 1
    endTimeCode = 48
    timeCodesPerSecond = 30
    customLayerData = {
        string creator = "test"
    }
)

def Xform "World"
{
}
"#;
        let stage = parse_usda(usda).unwrap();
        assert_eq!(stage.metadata.default_prim.as_deref(), Some("World"));
        assert_eq!(stage.metadata.up_axis, "Z");
        assert_eq!(stage.metadata.meters_per_unit, Some(1.0));
        assert_eq!(stage.metadata.time_codes_per_second, 30.0);
        assert_eq!(stage.metadata.end_time_code, Some(48.0));
        assert!(stage.default_prim().is_some());
    }

    #[test]
    fn test_parse_simple_mesh() {
        let usda = r#"
def Mesh "Cube" {
    point3f[] points = [(0, 0, 0), (1, 0, 0), (1, 1, 0), (0, 1, 0)]
    int[] faceVertexCounts = [4]
    int[] faceVertexIndices = [0, 1, 2, 3]
}
"#;
        let stage = parse_usda(usda).unwrap();
        let mesh = stage.prim(&SdfPath::new("/Cube").unwrap()).unwrap();
        assert!(mesh.is_a("Mesh"));
        assert_eq!(mesh.value("points").and_then(Value::as_vec3_array).map(|p| p.len()), Some(4));
        assert_eq!(
            mesh.value("faceVertexIndices").and_then(Value::as_int_array),
            Some(&[0, 1, 2, 3][..])
        );
    }

    #[test]
    fn test_parse_material_network() {
        let usda = r#"
def Scope "Looks"
{
    def Material "Wood" (
        kind = "component"
    )
    {
        token outputs:surface.connect = </Looks/Wood/PBR.outputs:surface>

        def Shader "PBR"
        {
            uniform token info:id = "UsdPreviewSurface"
            color3f inputs:diffuseColor.connect = </Looks/Wood/Tex.outputs:rgb>
            float inputs:roughness = 0.8
            token outputs:surface
        }

        def Shader "Tex"
        {
            uniform token info:id = "UsdUVTexture"
            asset inputs:file = @textures/wood.png@
            float2 inputs:st.connect = </Looks/Wood/Reader.outputs:result>
            float3 outputs:rgb
        }
    }
}
"#;
        let stage = parse_usda(usda).unwrap();
        let wood = stage.prim(&SdfPath::new("/Looks/Wood").unwrap()).unwrap();
        assert_eq!(wood.metadata.get("kind").map(String::as_str), Some("component"));
        assert_eq!(
            wood.output("surface").unwrap().connections()[0].to_string(),
            "/Looks/Wood/PBR.outputs:surface"
        );
        assert_eq!(wood.child_names(), &["PBR".to_string(), "Tex".to_string()]);

        let pbr = stage.prim(&SdfPath::new("/Looks/Wood/PBR").unwrap()).unwrap();
        assert_eq!(pbr.value("info:id"), Some(&Value::token("UsdPreviewSurface")));
        assert!(pbr.attribute("info:id").unwrap().uniform);
        assert_eq!(pbr.input("roughness").and_then(|a| a.get()), Some(&Value::Float(0.8)));
        assert!(pbr.input("diffuseColor").unwrap().has_connections());

        let tex = stage.prim(&SdfPath::new("/Looks/Wood/Tex").unwrap()).unwrap();
        assert_eq!(
            tex.input("file").and_then(|a| a.get()),
            Some(&Value::Asset("textures/wood.png".to_string()))
        );
    }

    #[test]
    fn test_parse_time_samples_and_metadata() {
        let usda = r#"
def Xform "Spinner"
{
    double3 xformOp:translate.timeSamples = {
        0: (0, 0, 0),
        24: (10, 0, 0),
    }
    float xformOp:rotateY = 45
    uniform token[] xformOpOrder = ["xformOp:translate", "xformOp:rotateY"]

    def Mesh "Body"
    {
        texCoord2f[] primvars:st = [(0, 0), (1, 0), (1, 1)] (
            interpolation = "faceVarying"
        )
        rel material:binding = </Looks/Wood>
    }
}
"#;
        let stage = parse_usda(usda).unwrap();
        let spinner = stage.prim(&SdfPath::new("/Spinner").unwrap()).unwrap();
        let translate = spinner.attribute("xformOp:translate").unwrap();
        assert!(translate.is_animated());
        assert_eq!(translate.time_samples().len(), 2);
        assert_eq!(
            spinner.value("xformOpOrder").and_then(Value::as_token_array).map(|o| o.len()),
            Some(2)
        );

        let body = stage.prim(&SdfPath::new("/Spinner/Body").unwrap()).unwrap();
        assert_eq!(body.attribute("primvars:st").unwrap().interpolation(), Some("faceVarying"));
        assert_eq!(
            body.relationship("material:binding").unwrap().targets[0].to_string(),
            "/Looks/Wood"
        );
    }

    #[test]
    fn test_parse_inline_prim_and_comments() {
        let usda = r#"
def Xform "A" { # trailing comment
    def Scope "B" { }
    string note = "has # inside"
}
"#;
        let stage = parse_usda(usda).unwrap();
        assert!(stage.prim(&SdfPath::new("/A/B").unwrap()).is_some());
        let a = stage.prim(&SdfPath::new("/A").unwrap()).unwrap();
        assert_eq!(a.value("note"), Some(&Value::String("has # inside".into())));
    }

    #[test]
    fn test_parse_quat_and_matrix() {
        let usda = r#"
def Xform "X"
{
    quatf xformOp:orient = (1, 0, 0, 0)
    matrix4d xformOp:transform = ( (1, 0, 0, 0), (0, 1, 0, 0), (0, 0, 1, 0), (5, 6, 7, 1) )
}
"#;
        let stage = parse_usda(usda).unwrap();
        let x = stage.prim(&SdfPath::new("/X").unwrap()).unwrap();
        assert_eq!(x.value("xformOp:orient").and_then(Value::as_quat), Some(Quat::IDENTITY));
        let m = x.value("xformOp:transform").and_then(Value::as_matrix4).unwrap();
        assert_eq!(m.transform_point3(Vec3::ZERO), Vec3::new(5.0, 6.0, 7.0));
    }

    #[test]
    fn test_unclosed_block() {
        let usda = "def Xform \"A\" {\n    float x = 1\n";
        assert!(matches!(parse_usda(usda), Err(ParseError::UnclosedBlock(_))));
    }

    #[test]
    fn test_type_mismatch_is_error() {
        let usda = "def Xform \"A\" {\n    float x = \"text\"\n}\n";
        assert!(matches!(parse_usda(usda), Err(ParseError::Parse { .. })));
    }
}
