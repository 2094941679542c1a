#![no_main]
use libfuzzer_sys::fuzz_target;
use sheetlayer::{OpenOptions, WorkbookDataset};

fuzz_target!(|data: &[u8]| {
    let options = OpenOptions::new().with_update(true);
    let mut workbook = match WorkbookDataset::from_bytes(data.to_vec(), options) {
        Ok(workbook) => workbook,
        Err(_) => return,
    };
    for i in 0..workbook.layer_count() {
        let Ok(table) = workbook.layer(i) else {
            continue;
        };
        if table.feature_count().is_err() {
            continue;
        }
        let fids: Vec<i64> = match table.records() {
            Ok(records) => records.map(|(fid, _)| fid).collect(),
            Err(_) => continue,
        };
        if let Some(&fid) = fids.first() {
            let _ = table.delete_record(fid);
        }
    }
    let _ = workbook.flush();
});
