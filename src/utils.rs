// SPDX-License-Identifier: MIT
//
// Copyright 2025, sheetlayer contributors.

//! Internal module providing handy function

use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::BytesRef;

use crate::XlsxError;

macro_rules! from_err {
    ($from:ty, $to:tt, $var:tt) => {
        impl From<$from> for $to {
            fn from(e: $from) -> $to {
                $to::$var(e)
            }
        }
    };
}

/// Appends the text a `&name;` or `&#N;` reference stands for.
///
/// Unknown named entities are kept verbatim so no text is silently lost.
pub(crate) fn unescape_entity_to_buffer(
    entity: &BytesRef<'_>,
    buffer: &mut String,
) -> Result<(), XlsxError> {
    if let Some(ch) = entity.resolve_char_ref()? {
        buffer.push(ch);
        return Ok(());
    }
    let name = entity.decode()?;
    match resolve_predefined_entity(&name) {
        Some(s) => buffer.push_str(s),
        None => {
            buffer.push('&');
            buffer.push_str(&name);
            buffer.push(';');
        }
    }
    Ok(())
}
