// SPDX-License-Identifier: MIT
//
// Copyright 2025, sheetlayer contributors.

use crate::datatype::FieldType;

/// Semantic category of a number format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CellFormat {
    /// No temporal meaning, the cell value keeps its literal type
    #[default]
    General,
    /// Calendar date
    Date,
    /// Date with time of day
    DateTime,
    /// Time of day or elapsed time
    Time,
}

impl CellFormat {
    /// The field type implied by the format, if any
    pub fn field_type(self) -> Option<FieldType> {
        match self {
            CellFormat::General => None,
            CellFormat::Date => Some(FieldType::Date),
            CellFormat::DateTime => Some(FieldType::DateTime),
            CellFormat::Time => Some(FieldType::Time),
        }
    }
}

/// What a cell style tells about the values it formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StyleFormat {
    /// The semantic category
    pub format: CellFormat,
    /// The format displays fractions of a second
    pub sub_second: bool,
}

impl StyleFormat {
    /// Shorthand for a format without sub-second precision
    pub const fn new(format: CellFormat) -> Self {
        StyleFormat {
            format,
            sub_second: false,
        }
    }
}

/// Detect the semantic category of a custom format code
///
/// Only the first section (up to `;`) is considered. Quoted literals,
/// escaped characters and bracketed colour/condition tokens are skipped.
/// `y` and `d` are date tokens, `h`, `s` and `AM/PM` are time tokens, and
/// `m` is a minute when it follows an hour or precedes a second, a month
/// otherwise. Elapsed time tokens (`[h]`, `[mm]`, `[ss]`) classify as time.
///
/// # Examples
///
/// ```
/// use sheetlayer::{detect_custom_number_format, CellFormat};
///
/// assert_eq!(detect_custom_number_format("yyyy-mm-dd").format, CellFormat::Date);
/// assert_eq!(detect_custom_number_format("h:mm:ss").format, CellFormat::Time);
/// assert_eq!(detect_custom_number_format("$#,##0.00").format, CellFormat::General);
/// assert!(detect_custom_number_format("hh:mm:ss.000").sub_second);
/// ```
pub fn detect_custom_number_format(format: &str) -> StyleFormat {
    let chars: Vec<char> = format.chars().collect();
    let mut tokens = Vec::new();
    let mut sub_second = false;
    let mut prev_is_seconds = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let mut is_seconds = false;
        match c {
            ';' => break,
            '\\' | '_' | '*' => i += 1,
            '"' => {
                i += 1;
                while i < chars.len() && chars[i] != '"' {
                    i += 1;
                }
            }
            '[' => {
                let Some(end) = chars[i..].iter().position(|&c| c == ']').map(|p| i + p) else {
                    break;
                };
                let inner: Vec<char> = chars[i + 1..end]
                    .iter()
                    .map(|c| c.to_ascii_lowercase())
                    .collect();
                if let Some(&first) = inner.first() {
                    if inner.iter().all(|c| matches!(c, 'h' | 'm' | 's')) {
                        tokens.push(Token::Elapsed);
                        is_seconds = first == 's';
                    }
                }
                i = end;
            }
            'a' | 'A' => {
                let rest: String = chars[i..].iter().take(5).collect::<String>().to_ascii_uppercase();
                if rest.starts_with("AM/PM") {
                    tokens.push(Token::Letter('h'));
                    i += 4;
                } else if rest.starts_with("A/P") {
                    tokens.push(Token::Letter('h'));
                    i += 2;
                }
            }
            '.' if prev_is_seconds && chars.get(i + 1) == Some(&'0') => sub_second = true,
            c => {
                let lc = c.to_ascii_lowercase();
                if matches!(lc, 'y' | 'd' | 'h' | 'm' | 's') {
                    tokens.push(Token::Letter(lc));
                    is_seconds = lc == 's';
                }
            }
        }
        prev_is_seconds = is_seconds;
        i += 1;
    }

    let mut has_date = false;
    let mut has_time = false;
    for (idx, token) in tokens.iter().enumerate() {
        match token {
            Token::Elapsed => has_time = true,
            Token::Letter('y' | 'd') => has_date = true,
            Token::Letter('h' | 's') => has_time = true,
            Token::Letter(_) => {
                let before = tokens[..idx]
                    .iter()
                    .rev()
                    .find(|t| **t != Token::Letter('m'));
                let after = tokens[idx + 1..]
                    .iter()
                    .find(|t| **t != Token::Letter('m'));
                let is_minute = matches!(before, Some(Token::Letter('h') | Token::Elapsed))
                    || matches!(after, Some(Token::Letter('s') | Token::Elapsed));
                if is_minute {
                    has_time = true;
                } else {
                    has_date = true;
                }
            }
        }
    }

    let format = match (has_date, has_time) {
        (true, true) => CellFormat::DateTime,
        (true, false) => CellFormat::Date,
        (false, true) => CellFormat::Time,
        (false, false) => CellFormat::General,
    };
    StyleFormat { format, sub_second }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Letter(char),
    Elapsed,
}

/// Determine cell format from built-in format ID
pub fn builtin_format_by_id(id: u32) -> StyleFormat {
    match id {
        // mm-dd-yy, d-mmm-yy, d-mmm, mmm-yy
        14..=17 => StyleFormat::new(CellFormat::Date),
        // h:mm AM/PM, h:mm:ss AM/PM, h:mm, h:mm:ss
        18..=21 => StyleFormat::new(CellFormat::Time),
        // m/d/yy h:mm
        22 => StyleFormat::new(CellFormat::DateTime),
        // mm:ss, [h]:mm:ss
        45 | 46 => StyleFormat::new(CellFormat::Time),
        // mmss.0
        47 => StyleFormat {
            format: CellFormat::Time,
            sub_second: true,
        },
        _ => StyleFormat::default(),
    }
}

/// Ported from openpyxl, MIT License
/// https://foss.heptapod.net/openpyxl/openpyxl/-/blob/a5e197c530aaa49814fd1d993dd776edcec35105/openpyxl/styles/tests/test_number_style.py
#[test]
fn test_is_date_format() {
    let detect = |s| detect_custom_number_format(s).format;
    assert_eq!(detect("DD/MM/YY"), CellFormat::Date);
    assert_eq!(detect("H:MM:SS;@"), CellFormat::Time);
    assert_eq!(detect("yyyy-mm-dd"), CellFormat::Date);
    assert_eq!(detect("#,##0\\ [$\\u20bd-46D]"), CellFormat::General);
    assert_eq!(detect("m\"M\"d\"D\";@"), CellFormat::Date);
    assert_eq!(detect("m/d/yy\"M\"d\"D\";@"), CellFormat::Date);
    assert_eq!(detect("[h]:mm:ss"), CellFormat::Time);
    assert_eq!(
        detect("\"Y: \"0.00\"m\";\"Y: \"-0.00\"m\";\"Y: <num>m\";@"),
        CellFormat::General
    );
    assert_eq!(detect("#,##0\\ [$''u20bd-46D]"), CellFormat::General);
    assert_eq!(detect("\"$\"#,##0_);[Red](\"$\"#,##0)"), CellFormat::General);
    assert_eq!(detect("[$-404]e\"\\xfc\"m\"\\xfc\"d\"\\xfc\""), CellFormat::Date);
    assert_eq!(detect("0_ ;[Red]\\-0\\ "), CellFormat::General);
    assert_eq!(detect("\\Y000000"), CellFormat::General);
    assert_eq!(detect("#,##0.0####\" YMD\""), CellFormat::General);
    assert_eq!(detect("[h]"), CellFormat::Time);
    assert_eq!(detect("[ss]"), CellFormat::Time);
    assert_eq!(detect("[s].000"), CellFormat::Time);
    assert_eq!(detect("[m]"), CellFormat::Time);
    assert_eq!(detect("[mm]"), CellFormat::Time);
    assert_eq!(detect("[h]:mm"), CellFormat::Time);
    assert_eq!(detect("[m]:mm"), CellFormat::Time);
    assert_eq!(detect("m:mm"), CellFormat::Date);
    assert_eq!(
        detect("[Blue]\\+[h]:mm;[Red]\\-[h]:mm;[Green][h]:mm"),
        CellFormat::Time
    );
    assert_eq!(detect("[>=100][Magenta][s].00"), CellFormat::Time);
    assert_eq!(detect("[h]:mm;[=0]\\-"), CellFormat::Time);
    assert_eq!(detect("h:mm:ss AM/PM"), CellFormat::Time);
    assert_eq!(detect("h:mm:ss"), CellFormat::Time);
    assert_eq!(detect("[>=100][Magenta].00"), CellFormat::General);
    assert_eq!(detect("[>=100][Magenta]General"), CellFormat::General);
    assert_eq!(detect("ha/p\\\\m"), CellFormat::Time);
    assert_eq!(
        detect("#,##0.00\\ _M\"H\"_);[Red]#,##0.00\\ _M\"S\"_)"),
        CellFormat::General
    );
    assert_eq!(detect("yyyy-mm-dd hh:mm:ss"), CellFormat::DateTime);
    assert_eq!(detect("m/d/yy h:mm"), CellFormat::DateTime);
}

#[test]
fn test_sub_second() {
    assert!(detect_custom_number_format("yyyy-mm-dd hh:mm:ss.000").sub_second);
    assert!(detect_custom_number_format("[s].000").sub_second);
    assert!(!detect_custom_number_format("hh:mm:ss").sub_second);
    assert!(!detect_custom_number_format("0.000").sub_second);
    assert!(builtin_format_by_id(47).sub_second);
    assert_eq!(builtin_format_by_id(14).format, CellFormat::Date);
    assert_eq!(builtin_format_by_id(22).format, CellFormat::DateTime);
    assert_eq!(builtin_format_by_id(2).format, CellFormat::General);
}
