// SPDX-License-Identifier: MIT
//
// Copyright 2025, sheetlayer contributors.

mod common;

use common::{init_logger, read_part, string_row, Package, MAIN_NS, STYLES};
use rstest::rstest;
use serde_derive::Deserialize;
use sheetlayer::{
    ExcelDateTime, Field, FieldType, FieldTypes, HeaderMode, OpenOptions, ParseState, Record,
    Value, WorkbookDataset, XlsxError,
};

macro_rules! record_eq {
    ($table:expr, $right:expr) => {
        let records: Vec<Vec<Value>> = $table
            .records()
            .unwrap()
            .map(|(_, r)| r.values().to_vec())
            .collect();
        let right: Vec<Vec<Value>> = $right;
        assert_eq!(records.len(), right.len(), "Record count mismatch");
        for (i, (rl, rr)) in records.iter().zip(right.iter()).enumerate() {
            assert_eq!(rl, rr, "Mismatch at record {i}");
        }
    };
}

fn field_types(workbook: &mut WorkbookDataset, index: usize) -> Vec<FieldType> {
    workbook
        .layer(index)
        .unwrap()
        .fields()
        .unwrap()
        .iter()
        .map(|f| f.field_type)
        .collect()
}

fn field_names(workbook: &mut WorkbookDataset, index: usize) -> Vec<String> {
    workbook
        .layer(index)
        .unwrap()
        .fields()
        .unwrap()
        .iter()
        .map(|f| f.name.clone())
        .collect()
}

fn people() -> Vec<u8> {
    Package::new()
        .strings(&["Name", "Age", "Alice", "Bob"])
        .sheet(
            "People",
            r#"<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
<row r="2"><c r="A2" t="s"><v>2</v></c><c r="B2"><v>30</v></c></row>
<row r="3"><c r="A3" t="s"><v>3</v></c><c r="B3"><v>41.5</v></c></row>"#,
        )
        .build()
}

fn date(y: i32, m: u32, d: u32) -> ExcelDateTime {
    ExcelDateTime::from_ymd(y, m, d).unwrap()
}

#[test]
fn header_line_and_types() {
    init_logger();
    let mut workbook = WorkbookDataset::from_bytes(people(), OpenOptions::new()).unwrap();
    assert_eq!(workbook.layer_names(), ["People"]);
    assert_eq!(field_names(&mut workbook, 0), ["Name", "Age"]);
    assert_eq!(
        field_types(&mut workbook, 0),
        [FieldType::String, FieldType::Real]
    );
    let table = workbook.layer(0).unwrap();
    assert!(table.has_header_line().unwrap());
    record_eq!(
        table,
        vec![
            vec![Value::from("Alice"), Value::Real(30.)],
            vec![Value::from("Bob"), Value::Real(41.5)],
        ]
    );
    assert_eq!(table.record(0).unwrap()[0], Value::from("Alice"));
}

#[test]
fn header_modes() {
    let options = OpenOptions::new().with_headers(HeaderMode::Disable);
    let mut workbook = WorkbookDataset::from_bytes(people(), options).unwrap();
    assert_eq!(field_names(&mut workbook, 0), ["field_1", "field_2"]);
    // "Age" in the first record forces the column to String
    assert_eq!(
        field_types(&mut workbook, 0),
        [FieldType::String, FieldType::String]
    );
    let table = workbook.layer(0).unwrap();
    assert!(!table.has_header_line().unwrap());
    assert_eq!(table.feature_count().unwrap(), 3);
    assert_eq!(table.record(2).unwrap()[1], Value::from("41.5"));

    let sheet = format!(
        "{}{}",
        string_row(1, &["a", "b"]),
        string_row(2, &["c", "d"])
    );
    let package = Package::new().sheet("Letters", &sheet).build();
    let mut workbook = WorkbookDataset::from_bytes(package.clone(), OpenOptions::new()).unwrap();
    assert_eq!(field_names(&mut workbook, 0), ["field_1", "field_2"]);
    assert_eq!(workbook.layer(0).unwrap().feature_count().unwrap(), 2);

    let options = OpenOptions::new().with_headers(HeaderMode::Force);
    let mut workbook = WorkbookDataset::from_bytes(package, options).unwrap();
    assert_eq!(field_names(&mut workbook, 0), ["a", "b"]);
    record_eq!(
        workbook.layer(0).unwrap(),
        vec![vec![Value::from("c"), Value::from("d")]]
    );
}

#[test]
fn single_string_row_is_data() {
    let package = Package::new()
        .sheet("Only", &string_row(1, &["alpha", "beta"]))
        .build();
    let mut workbook = WorkbookDataset::from_bytes(package, OpenOptions::new()).unwrap();
    assert_eq!(field_names(&mut workbook, 0), ["field_1", "field_2"]);
    let table = workbook.layer(0).unwrap();
    assert!(!table.has_header_line().unwrap());
    record_eq!(table, vec![vec![Value::from("alpha"), Value::from("beta")]]);
}

#[test]
fn shared_string_index() {
    let package = Package::new()
        .strings(&["a", "b", "c"])
        .sheet("S", r#"<row r="1"><c r="A1" t="s"><v>2</v></c></row>"#)
        .build();
    let options = OpenOptions::new().with_headers(HeaderMode::Disable);
    let mut workbook = WorkbookDataset::from_bytes(package, options).unwrap();
    assert_eq!(workbook.layer(0).unwrap().record(0).unwrap()[0], Value::from("c"));
}

#[rstest]
#[case(&["<c><v>1</v></c>", "<c><v>2.5</v></c>"], FieldType::Real)]
#[case(&["<c><v>1</v></c>", r#"<c t="inlineStr"><is><t>x</t></is></c>"#], FieldType::String)]
#[case(&["<c/>", "<c/>", "<c><v>3</v></c>"], FieldType::Integer)]
#[case(&[r#"<c t="b"><v>1</v></c>"#, r#"<c t="b"><v>0</v></c>"#], FieldType::Boolean)]
#[case(&[r#"<c s="1"><v>45306</v></c>"#, r#"<c s="1"><v>45307</v></c>"#], FieldType::Date)]
#[case(&[r#"<c s="1"><v>45306</v></c>"#, r#"<c s="3"><v>0.5</v></c>"#], FieldType::String)]
#[case(&[r#"<c s="2"><v>45306.5</v></c>"#, "<c><v>7</v></c>"], FieldType::String)]
#[case(&["<c/>", "<c/>"], FieldType::String)]
fn type_promotion(#[case] cells: &[&str], #[case] expected: FieldType) {
    let sheet: String = cells
        .iter()
        .enumerate()
        .map(|(i, c)| format!(r#"<row r="{}">{c}</row>"#, i + 1))
        .collect();
    let package = Package::new().styles(STYLES).sheet("T", &sheet).build();
    let options = OpenOptions::new().with_headers(HeaderMode::Disable);
    let mut workbook = WorkbookDataset::from_bytes(package, options).unwrap();
    assert_eq!(field_types(&mut workbook, 0), [expected]);
}

#[test]
fn field_types_disabled() {
    let package = Package::new()
        .styles(STYLES)
        .sheet(
            "T",
            r#"<row r="1"><c><v>1</v></c><c s="1"><v>45306</v></c></row>"#,
        )
        .build();
    let options = OpenOptions::new()
        .with_headers(HeaderMode::Disable)
        .with_field_types(FieldTypes::String);
    let mut workbook = WorkbookDataset::from_bytes(package, options).unwrap();
    assert_eq!(
        field_types(&mut workbook, 0),
        [FieldType::String, FieldType::String]
    );
    record_eq!(
        workbook.layer(0).unwrap(),
        vec![vec![Value::from("1"), Value::from("2024-01-15")]]
    );
}

#[test]
fn column_style_types_empty_column() {
    let package = Package::new()
        .styles(STYLES)
        .raw_sheet(
            "T",
            &format!(
                r#"<worksheet xmlns="{MAIN_NS}"><cols><col min="2" max="2" style="1"/></cols><sheetData>{}<row r="2"><c r="A2"><v>1</v></c></row></sheetData></worksheet>"#,
                string_row(1, &["id", "day"])
            ),
        )
        .build();
    let mut workbook = WorkbookDataset::from_bytes(package, OpenOptions::new()).unwrap();
    assert_eq!(
        field_types(&mut workbook, 0),
        [FieldType::Integer, FieldType::Date]
    );
    let columns = workbook.layer(0).unwrap().column_defs().unwrap().to_vec();
    assert_eq!(columns.len(), 1);
    assert_eq!(columns[0].style, Some(1));
}

#[test]
fn leading_blank_rows() {
    let package = Package::new()
        .sheet("T", r#"<row r="3"><c r="B3"><v>1</v></c></row>"#)
        .build();
    let mut workbook = WorkbookDataset::from_bytes(package, OpenOptions::new()).unwrap();
    let table = workbook.layer(0).unwrap();
    assert!(!table.has_header_line().unwrap());
    record_eq!(
        table,
        vec![
            vec![Value::Empty, Value::Empty],
            vec![Value::Empty, Value::Empty],
            vec![Value::Empty, Value::Integer(1)],
        ]
    );
}

#[test]
fn lazy_single_parse() {
    let mut workbook = WorkbookDataset::from_bytes(people(), OpenOptions::new()).unwrap();
    let table = workbook.layer(0).unwrap();
    assert_eq!(table.parse_count(), 0);
    assert_eq!(table.parse_state(), &ParseState::NotParsed);
    assert_eq!(table.feature_count().unwrap(), 2);
    assert_eq!(table.records().unwrap().count(), 2);
    table.ensure_initialized().unwrap();
    assert_eq!(table.parse_count(), 1);
    assert_eq!(table.parse_state(), &ParseState::Parsed);
}

#[test]
fn failed_parse_keeps_rows() {
    let xml = format!(
        r#"<worksheet xmlns="{MAIN_NS}"><sheetData><row r="1"><c r="A1"><v>1</v></c></row><row r="2"><c r="A2"><v>2"#
    );
    let package = Package::new()
        .raw_sheet("Broken", &xml)
        .sheet(
            "Healthy",
            &format!(r#"{}<row r="2"><c><v>1</v></c></row>"#, string_row(1, &["n"])),
        )
        .build();
    let options = OpenOptions::new().with_update(true);
    let mut workbook = WorkbookDataset::from_bytes(package, options).unwrap();
    let table = workbook.layer(0).unwrap();
    assert!(table.feature_count().is_err());
    assert!(matches!(table.parse_state(), ParseState::Failed(_)));
    assert_eq!(table.feature_count().unwrap(), 1);
    assert_eq!(table.parse_count(), 1);
    table.insert_record(Record::new(vec![3i64.into()])).unwrap();

    let healthy = workbook.layer(1).unwrap();
    healthy.insert_record(Record::new(vec![2i64.into()])).unwrap();

    match workbook.flush() {
        Err(XlsxError::Flush(errors)) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].0, "Broken");
            assert!(matches!(errors[0].1, XlsxError::SheetParse { .. }));
        }
        r => panic!("expecting a flush error, got {r:?}"),
    }
    assert!(workbook.layer(0).unwrap().is_dirty());
    assert!(!workbook.layer(1).unwrap().is_dirty());

    let mut reopened =
        WorkbookDataset::from_bytes(workbook.package_bytes().to_vec(), OpenOptions::new()).unwrap();
    assert_eq!(reopened.layer_names(), ["Broken", "Healthy"]);
    assert_eq!(field_names(&mut reopened, 1), ["n"]);
    record_eq!(
        reopened.layer(1).unwrap(),
        vec![vec![Value::Integer(1)], vec![Value::Integer(2)]]
    );
}

#[test]
fn record_ids_are_stable() {
    let mut workbook = WorkbookDataset::create_in_memory().unwrap();
    let table = workbook.create_layer("Ids").unwrap();
    table.add_field(Field::new("n", FieldType::Integer)).unwrap();
    for i in 0..5i64 {
        let fid = table.insert_record(Record::new(vec![(i * 10).into()])).unwrap();
        assert_eq!(fid, i);
    }
    table.delete_record(2).unwrap();
    assert!(matches!(table.record(2), Err(XlsxError::FeatureNotFound(2))));
    assert!(matches!(table.delete_record(2), Err(XlsxError::FeatureNotFound(2))));
    assert_eq!(table.record(3).unwrap()[0], Value::Integer(30));
    assert_eq!(table.insert_record(Record::new(vec![50i64.into()])).unwrap(), 5);
    let fids: Vec<i64> = table.records().unwrap().map(|(fid, _)| fid).collect();
    assert_eq!(fids, [0, 1, 3, 4, 5]);
    assert_eq!(table.feature_count().unwrap(), 5);

    table.set_record(4, Record::new(vec![Value::Real(44.9)])).unwrap();
    assert_eq!(table.record(4).unwrap()[0], Value::Integer(44));
    table
        .update_record(5, &Record::new(vec![7i64.into()]), &[0], &[], false)
        .unwrap();
    assert_eq!(table.record(5).unwrap()[0], Value::Integer(7));
    assert!(matches!(
        table.update_record(5, &Record::default(), &[3], &[], false),
        Err(XlsxError::FieldIndex(3))
    ));
}

#[test]
fn round_trip() {
    init_logger();
    let day = date(2024, 1, 15);
    let stamp = ExcelDateTime::from_ymd_hms_milli(2024, 1, 15, 10, 30, 5, 0).unwrap();
    let clock = ExcelDateTime::from_hms_milli(8, 15, 30, 250).unwrap();

    let mut workbook = WorkbookDataset::create_in_memory().unwrap();
    let table = workbook.create_layer("All types").unwrap();
    table.add_field(Field::new("id", FieldType::Integer)).unwrap();
    table.add_field(Field::new("value", FieldType::Real)).unwrap();
    table.add_field(Field::new("flag", FieldType::Boolean)).unwrap();
    table.add_field(Field::new("label", FieldType::String)).unwrap();
    table.add_field(Field::new("day", FieldType::Date)).unwrap();
    table.add_field(Field::new("stamp", FieldType::DateTime)).unwrap();
    table
        .add_field(Field {
            sub_second: true,
            ..Field::new("clock", FieldType::Time)
        })
        .unwrap();
    let first = vec![
        Value::Integer(1),
        Value::Real(0.1),
        Value::Boolean(true),
        Value::from(" a <b> & c "),
        Value::Date(day),
        Value::DateTime(stamp),
        Value::Time(clock),
    ];
    let second = vec![
        Value::Integer(-2),
        Value::Empty,
        Value::Boolean(false),
        Value::from("second"),
        Value::Empty,
        Value::Empty,
        Value::Empty,
    ];
    table.insert_record(Record::new(first.clone())).unwrap();
    table.insert_record(Record::new(second.clone())).unwrap();
    assert!(workbook.is_dirty());
    workbook.flush().unwrap();
    assert!(!workbook.is_dirty());

    let bytes = workbook.package_bytes().to_vec();
    let mut reopened = WorkbookDataset::from_bytes(bytes, OpenOptions::new()).unwrap();
    assert_eq!(reopened.layer_names(), ["All types"]);
    assert_eq!(
        field_names(&mut reopened, 0),
        ["id", "value", "flag", "label", "day", "stamp", "clock"]
    );
    assert_eq!(
        field_types(&mut reopened, 0),
        [
            FieldType::Integer,
            FieldType::Real,
            FieldType::Boolean,
            FieldType::String,
            FieldType::Date,
            FieldType::DateTime,
            FieldType::Time,
        ]
    );
    let table = reopened.layer(0).unwrap();
    assert!(table.fields().unwrap()[6].sub_second);
    record_eq!(table, vec![first, second]);
}

#[test]
fn update_keeps_other_parts() {
    let theme = b"<a:theme xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\"/>";
    let package = Package::new()
        .strings(&["id", "Alice"])
        .styles(STYLES)
        .sheet("Keep", r#"<row r="1"><c t="s"><v>1</v></c><c><v>5</v></c></row>"#)
        .sheet(
            "Edit",
            &format!(
                r#"{}<row r="2"><c><v>1</v></c></row><row r="3"><c><v>2</v></c></row>"#,
                string_row(1, &["id"])
            ),
        )
        .part("xl/theme/theme1.xml", theme)
        .build();

    let options = OpenOptions::new().with_update(true);
    let mut workbook = WorkbookDataset::from_bytes(package.clone(), options).unwrap();
    assert!(!workbook.is_dirty());
    let table = workbook.layer_by_name("edit").unwrap();
    assert_eq!(table.insert_record(Record::new(vec![3i64.into()])).unwrap(), 2);
    assert!(workbook.is_dirty());
    workbook.flush().unwrap();

    let written = workbook.package_bytes().to_vec();
    assert_eq!(
        read_part(&written, "xl/worksheets/sheet1.xml"),
        read_part(&package, "xl/worksheets/sheet1.xml")
    );
    assert_eq!(read_part(&written, "xl/theme/theme1.xml").unwrap(), theme);
    assert_ne!(
        read_part(&written, "xl/worksheets/sheet2.xml"),
        read_part(&package, "xl/worksheets/sheet2.xml")
    );

    let mut reopened = WorkbookDataset::from_bytes(written, OpenOptions::new()).unwrap();
    assert_eq!(reopened.layer_names(), ["Keep", "Edit"]);
    assert_eq!(field_names(&mut reopened, 1), ["id"]);
    record_eq!(
        reopened.layer(1).unwrap(),
        vec![
            vec![Value::Integer(1)],
            vec![Value::Integer(2)],
            vec![Value::Integer(3)],
        ]
    );
    record_eq!(
        reopened.layer(0).unwrap(),
        vec![vec![Value::from("Alice"), Value::Integer(5)]]
    );
}

#[test]
fn date1904_round_trip() {
    let package = Package::new()
        .date1904()
        .styles(STYLES)
        .sheet(
            "Days",
            &format!(
                r#"{}<row r="2"><c s="1"><v>43844</v></c></row>"#,
                string_row(1, &["day"])
            ),
        )
        .build();
    let options = OpenOptions::new().with_update(true);
    let mut workbook = WorkbookDataset::from_bytes(package, options).unwrap();
    let table = workbook.layer(0).unwrap();
    assert_eq!(table.record(0).unwrap()[0], Value::Date(date(2024, 1, 15)));
    table
        .insert_record(Record::new(vec![Value::Date(date(2024, 2, 29))]))
        .unwrap();
    workbook.flush().unwrap();

    let written = workbook.package_bytes().to_vec();
    let sheet = String::from_utf8(read_part(&written, "xl/worksheets/sheet1.xml").unwrap()).unwrap();
    assert!(sheet.contains("<v>43844.0</v>"), "{sheet}");
    let mut reopened = WorkbookDataset::from_bytes(written, OpenOptions::new()).unwrap();
    record_eq!(
        reopened.layer(0).unwrap(),
        vec![
            vec![Value::Date(date(2024, 1, 15))],
            vec![Value::Date(date(2024, 2, 29))],
        ]
    );
}

#[test]
fn read_only() {
    let mut workbook = WorkbookDataset::from_bytes(people(), OpenOptions::new()).unwrap();
    assert!(matches!(
        workbook.create_layer("New"),
        Err(XlsxError::ReadOnly)
    ));
    assert!(matches!(workbook.delete_layer(0), Err(XlsxError::ReadOnly)));
    let table = workbook.layer(0).unwrap();
    assert!(matches!(
        table.insert_record(Record::default()),
        Err(XlsxError::ReadOnly)
    ));
    assert!(matches!(table.delete_record(0), Err(XlsxError::ReadOnly)));
    assert_eq!(table.feature_count().unwrap(), 2);
    workbook.flush().unwrap();
    assert!(matches!(workbook.layer(3), Err(XlsxError::LayerIndex(3))));
}

#[test]
fn create_and_delete_layers() {
    let package = Package::new()
        .sheet("First", r#"<row r="1"><c><v>1</v></c></row>"#)
        .sheet("Second", r#"<row r="1"><c><v>2</v></c></row>"#)
        .build();
    let options = OpenOptions::new().with_update(true);
    let mut workbook = WorkbookDataset::from_bytes(package, options).unwrap();
    assert!(matches!(
        workbook.create_layer("first"),
        Err(XlsxError::SheetName(_))
    ));
    assert!(matches!(
        workbook.create_layer("a/b"),
        Err(XlsxError::SheetName(_))
    ));
    workbook.delete_layer(0).unwrap();
    let table = workbook.create_layer("Third").unwrap();
    table.add_field(Field::new("x", FieldType::Real)).unwrap();
    table.insert_record(Record::new(vec![1.5.into()])).unwrap();
    workbook.flush().unwrap();

    let written = workbook.package_bytes().to_vec();
    assert!(read_part(&written, "xl/worksheets/sheet1.xml").is_none());
    let mut reopened = WorkbookDataset::from_bytes(written, OpenOptions::new()).unwrap();
    assert_eq!(reopened.layer_names(), ["Second", "Third"]);
    record_eq!(reopened.layer(0).unwrap(), vec![vec![Value::Integer(2)]]);
    assert_eq!(field_names(&mut reopened, 1), ["x"]);
    record_eq!(reopened.layer(1).unwrap(), vec![vec![Value::Real(1.5)]]);
}

#[test]
fn flush_to_file() {
    let path = std::env::temp_dir().join(format!("sheetlayer-{}.xlsx", std::process::id()));
    {
        let mut workbook = WorkbookDataset::create(&path).unwrap();
        let table = workbook.create_layer("Sheet1").unwrap();
        table.add_field(Field::new("n", FieldType::Integer)).unwrap();
        table.insert_record(Record::new(vec![42i64.into()])).unwrap();
        workbook.close().unwrap();
    }
    let mut workbook = WorkbookDataset::open(&path, OpenOptions::new()).unwrap();
    assert_eq!(workbook.path(), Some(path.as_path()));
    record_eq!(workbook.layer(0).unwrap(), vec![vec![Value::Integer(42)]]);
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn password_protected() {
    let mut bytes = vec![0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
    bytes.resize(512, 0);
    assert!(matches!(
        WorkbookDataset::from_bytes(bytes, OpenOptions::new()),
        Err(XlsxError::Password)
    ));
    assert!(WorkbookDataset::from_bytes(b"not a zip".to_vec(), OpenOptions::new()).is_err());
}

#[test]
fn deserialize_records() {
    #[derive(Debug, Deserialize, PartialEq)]
    struct Person {
        #[serde(rename = "Name")]
        name: String,
        #[serde(rename = "Age")]
        age: f64,
    }

    let mut workbook = WorkbookDataset::from_bytes(people(), OpenOptions::new()).unwrap();
    let people: Vec<Person> = workbook
        .layer(0)
        .unwrap()
        .deserialize()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        people,
        [
            Person {
                name: "Alice".to_string(),
                age: 30.
            },
            Person {
                name: "Bob".to_string(),
                age: 41.5
            },
        ]
    );
}

#[test]
fn rust_xlsxwriter_workbook() {
    use rust_xlsxwriter::{ExcelDateTime as XlsxDate, Format, Workbook};

    let mut book = Workbook::new();
    let day = Format::new().set_num_format("yyyy-mm-dd");
    let sheet = book.add_worksheet().set_name("Trips").unwrap();
    sheet.write_string(0, 0, "city").unwrap();
    sheet.write_string(0, 1, "km").unwrap();
    sheet.write_string(0, 2, "day").unwrap();
    sheet.write_string(1, 0, "Paris").unwrap();
    sheet.write_number(1, 1, 12).unwrap();
    sheet
        .write_datetime_with_format(1, 2, &XlsxDate::from_ymd(2024, 1, 15).unwrap(), &day)
        .unwrap();
    sheet.write_string(2, 0, "Nantes").unwrap();
    sheet.write_number(2, 1, 7.5).unwrap();
    sheet
        .write_datetime_with_format(2, 2, &XlsxDate::from_ymd(2024, 3, 1).unwrap(), &day)
        .unwrap();
    let bytes = book.save_to_buffer().unwrap();

    let options = OpenOptions::new().with_update(true);
    let mut workbook = WorkbookDataset::from_bytes(bytes, options).unwrap();
    assert_eq!(field_names(&mut workbook, 0), ["city", "km", "day"]);
    assert_eq!(
        field_types(&mut workbook, 0),
        [FieldType::String, FieldType::Real, FieldType::Date]
    );
    let table = workbook.layer(0).unwrap();
    record_eq!(
        table,
        vec![
            vec![Value::from("Paris"), Value::Real(12.), Value::Date(date(2024, 1, 15))],
            vec![Value::from("Nantes"), Value::Real(7.5), Value::Date(date(2024, 3, 1))],
        ]
    );

    // a datetime field needs a style the stylesheet does not have yet
    let stamp = ExcelDateTime::from_ymd_hms_milli(2024, 3, 2, 18, 45, 0, 0).unwrap();
    table.add_field(Field::new("stamp", FieldType::DateTime)).unwrap();
    table
        .insert_record(Record::new(vec![
            "Lille".into(),
            3.25.into(),
            Value::Date(date(2024, 3, 2)),
            Value::DateTime(stamp),
        ]))
        .unwrap();
    workbook.flush().unwrap();

    let written = workbook.package_bytes().to_vec();
    let mut reopened = WorkbookDataset::from_bytes(written, OpenOptions::new()).unwrap();
    assert_eq!(
        field_types(&mut reopened, 0),
        [
            FieldType::String,
            FieldType::Real,
            FieldType::Date,
            FieldType::DateTime
        ]
    );
    let table = reopened.layer(0).unwrap();
    assert_eq!(table.feature_count().unwrap(), 3);
    assert_eq!(table.record(2).unwrap()[3], Value::DateTime(stamp));
    assert_eq!(table.record(0).unwrap()[3], Value::Empty);
}

#[test]
fn open_options_from_pairs() {
    let options =
        OpenOptions::from_pairs(["HEADERS=FORCE", "FIELD_TYPES=STRING"]).unwrap();
    assert_eq!(options.headers, HeaderMode::Force);
    assert_eq!(options.field_types, FieldTypes::String);
    assert!(!options.update);
    assert!(OpenOptions::from_pairs(["HEADERS=MAYBE"]).is_err());
}
