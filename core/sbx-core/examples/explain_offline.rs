// 저장된 EXPLAIN 출력을 정규화하고 Annotator 결과를 출력
//
//   cargo run --example explain_offline --features logging -- plan.txt

use sbx_core::SbxResult;
use sbx_core::explain::{Annotator, AnnotatorConfig, parse_explain_text};
use std::io::Read;

fn main() -> SbxResult<()> {
    sbx_core::logging::init();

    let mut raw = String::new();
    match std::env::args().nth(1) {
        Some(path) => {
            raw = std::fs::read_to_string(&path)
                .map_err(|e| sbx_core::SbxError::Config(format!("{path}: {e}")))?;
        }
        None => {
            std::io::stdin()
                .read_to_string(&mut raw)
                .map_err(|e| sbx_core::SbxError::Config(format!("stdin: {e}")))?;
        }
    }

    let info = parse_explain_text(&raw)?;
    println!("{}", serde_json::to_string_pretty(&info.rows)?);

    for finding in Annotator::new(AnnotatorConfig::default()).annotate(&info) {
        println!("[{:?}] {:?} {}: {}", finding.severity, finding.kind, finding.subject, finding.message);
    }
    Ok(())
}
