// SPDX-License-Identifier: MIT
//
// Copyright 2025, sheetlayer contributors.

//! Builds small xlsx packages in memory.

#![allow(dead_code)]

use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

pub const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// Number formats: style 1 is a date, style 2 a datetime, style 3 a time
pub const STYLES: &str = r#"<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><numFmts count="1"><numFmt numFmtId="164" formatCode="yyyy-mm-dd hh:mm"/></numFmts><cellXfs count="4"><xf numFmtId="0"/><xf numFmtId="14"/><xf numFmtId="164"/><xf numFmtId="21"/></cellXfs></styleSheet>"#;

/// An xlsx package under construction
#[derive(Default)]
pub struct Package {
    sheets: Vec<(String, String)>,
    strings: Vec<String>,
    styles: Option<String>,
    date1904: bool,
    extra: Vec<(String, Vec<u8>)>,
}

impl Package {
    pub fn new() -> Self {
        Package::default()
    }

    /// Adds a sheet, `sheet_data` being the content of `<sheetData>`
    pub fn sheet(self, name: &str, sheet_data: &str) -> Self {
        let xml =
            format!(r#"<worksheet xmlns="{MAIN_NS}"><sheetData>{sheet_data}</sheetData></worksheet>"#);
        self.raw_sheet(name, &xml)
    }

    /// Adds a sheet with the whole content of its part
    pub fn raw_sheet(mut self, name: &str, xml: &str) -> Self {
        self.sheets.push((name.to_string(), xml.to_string()));
        self
    }

    pub fn strings(mut self, strings: &[&str]) -> Self {
        self.strings = strings.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn styles(mut self, styles: &str) -> Self {
        self.styles = Some(styles.to_string());
        self
    }

    pub fn date1904(mut self) -> Self {
        self.date1904 = true;
        self
    }

    /// Adds a part no sheet refers to
    pub fn part(mut self, path: &str, content: &[u8]) -> Self {
        self.extra.push((path.to_string(), content.to_vec()));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        let mut add = |path: &str, content: &[u8]| {
            zip.start_file(path, options).unwrap();
            zip.write_all(content).unwrap();
        };

        let mut overrides = String::new();
        let mut rels = String::new();
        let mut sheets = String::new();
        for (i, (name, xml)) in self.sheets.iter().enumerate() {
            let n = i + 1;
            overrides.push_str(&format!(
                r#"<Override PartName="/xl/worksheets/sheet{n}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#
            ));
            rels.push_str(&format!(
                r#"<Relationship Id="rId{n}" Type="{REL_NS}/worksheet" Target="worksheets/sheet{n}.xml"/>"#
            ));
            sheets.push_str(&format!(r#"<sheet name="{name}" sheetId="{n}" r:id="rId{n}"/>"#));
            add(&format!("xl/worksheets/sheet{n}.xml"), xml.as_bytes());
        }
        let mut next = self.sheets.len() + 1;
        if !self.strings.is_empty() {
            let items: String = self
                .strings
                .iter()
                .map(|s| format!("<si><t>{s}</t></si>"))
                .collect();
            add(
                "xl/sharedStrings.xml",
                format!(
                    r#"<sst xmlns="{MAIN_NS}" count="{0}" uniqueCount="{0}">{items}</sst>"#,
                    self.strings.len()
                )
                .as_bytes(),
            );
            rels.push_str(&format!(
                r#"<Relationship Id="rId{next}" Type="{REL_NS}/sharedStrings" Target="sharedStrings.xml"/>"#
            ));
            next += 1;
        }
        if let Some(styles) = &self.styles {
            add("xl/styles.xml", styles.as_bytes());
            rels.push_str(&format!(
                r#"<Relationship Id="rId{next}" Type="{REL_NS}/styles" Target="styles.xml"/>"#
            ));
        }
        for (path, content) in &self.extra {
            add(path, content);
        }

        let pr = if self.date1904 {
            r#"<workbookPr date1904="1"/>"#
        } else {
            "<workbookPr/>"
        };
        add(
            "xl/workbook.xml",
            format!(
                r#"<workbook xmlns="{MAIN_NS}" xmlns:r="{REL_NS}">{pr}<sheets>{sheets}</sheets></workbook>"#
            )
            .as_bytes(),
        );
        add(
            "xl/_rels/workbook.xml.rels",
            format!(
                r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{rels}</Relationships>"#
            )
            .as_bytes(),
        );
        add(
            "[Content_Types].xml",
            format!(
                r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>{overrides}</Types>"#
            )
            .as_bytes(),
        );
        zip.finish().unwrap().into_inner()
    }
}

/// Raw content of a part of a package
pub fn read_part(package: &[u8], path: &str) -> Option<Vec<u8>> {
    let mut zip = ZipArchive::new(Cursor::new(package)).unwrap();
    let mut file = zip.by_name(path).ok()?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).unwrap();
    Some(buf)
}

/// One `<row>` of inline string cells
pub fn string_row(r: u32, values: &[&str]) -> String {
    let cells: String = values
        .iter()
        .map(|v| format!(r#"<c t="inlineStr"><is><t>{v}</t></is></c>"#))
        .collect();
    format!(r#"<row r="{r}">{cells}</row>"#)
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
