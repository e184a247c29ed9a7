//! End-to-end intake runs over real fixture documents.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use appraisal::pipeline::{BroadcastProgress, StageEventKind, StageStatus};
use appraisal::processor::ExtractionResult;
use appraisal::upload::XLSX_MIME;
use appraisal::{validate_rows, PipelineOutcome, PipelineState, StageName, WorkerPool};

use common::*;

const EICAR: &str = r"X5O!P%@AP[4\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn table(run: &appraisal::PipelineRun) -> &appraisal::processor::TabularExtraction {
    match run.extraction() {
        Some(ExtractionResult::Tabular(table)) => table,
        other => panic!("expected tabular extraction, got {:?}", other),
    }
}

// ── Rent rolls ──

#[test]
fn test_rent_roll_csv_is_ingested() {
    let harness = TestHarness::new();
    let csv = b"Unit,Tenant,Monthly Rent\n101,Acme LLC,2500\n102,\"Smith, J\",1800\n";

    let run = harness.process(upload("u1", "rent-roll.csv", "text/csv", csv.to_vec()));

    assert_eq!(run.state, PipelineState::Completed);
    let rows = table(&run);
    assert_eq!(rows.row_count, 2);
    assert_eq!(rows.rows[1]["Tenant"], "Smith, J");
    assert!(validate_rows(rows, &["unit", "monthly_rent"]).is_empty());

    let doc = run.document().unwrap();
    assert!(!doc.had_metadata);
    assert_eq!(doc.stored_at, artifact_path("u1", "rent-roll.csv"));
    assert_eq!(harness.read_artifact(&doc.stored_at), csv.to_vec());
    assert_eq!(harness.stored_files(), vec![artifact_path("u1", "rent-roll.csv")]);
}

#[test]
fn test_rent_roll_missing_headers_reported() {
    let harness = TestHarness::new();
    let run = harness.process(upload("u1", "rents.csv", "text/csv", b"Unit\n".to_vec()));

    let errors = validate_rows(table(&run), &["Unit", "Monthly Rent"]);
    assert_eq!(
        errors,
        vec![
            "missing required header 'Monthly Rent'".to_string(),
            "no data rows parsed".to_string(),
        ]
    );
}

#[test]
fn test_workbook_rows_and_doc_props_stripped() {
    let harness = TestHarness::new();
    let workbook = xlsx(
        &[&["Parcel", "Assessed"], &["A-1", "410000"], &["B-2", "395000"]],
        Some("County Assessor"),
    );

    let run = harness.process(upload("u1", "comps.xlsx", XLSX_MIME, workbook));

    assert_eq!(run.state, PipelineState::Completed);
    let rows = table(&run);
    assert_eq!(rows.headers, vec!["Parcel", "Assessed"]);
    assert_eq!(rows.rows[1]["Assessed"], "395000");

    let doc = run.document().unwrap();
    assert!(doc.had_metadata);
    let stored = harness.read_artifact(&doc.stored_at);
    assert!(!contains(&stored, b"County Assessor"));
    assert!(!contains(&stored, b"docProps/core.xml"));
}

#[test]
fn test_workbooks_differing_only_in_properties_are_duplicates() {
    let harness = TestHarness::new();
    let rows: &[&[&str]] = &[&["Parcel"], &["A-1"]];

    let first = harness.process(upload("u1", "a.xlsx", XLSX_MIME, xlsx(rows, Some("alice"))));
    let second = harness.process(upload("u2", "b.xlsx", XLSX_MIME, xlsx(rows, Some("bob"))));

    assert!(!first.is_duplicate());
    assert!(second.is_duplicate());
    assert_eq!(second.hash().unwrap().duplicate_of.as_deref(), Some("u1"));
}

#[test]
fn test_workbook_cell_past_last_column_is_row_error() {
    let harness = TestHarness::new();
    let sheet = r#"<worksheet><sheetData>
        <row r="1"><c r="A1" t="inlineStr"><is><t>Unit</t></is></c></row>
        <row r="2"><c r="A2"><v>101</v></c><c r="ZZZZZZZZ2"><v>1</v></c></row>
    </sheetData></worksheet>"#;

    let run = harness.process(upload("u1", "wide.xlsx", XLSX_MIME, xlsx_with_sheet(sheet, None)));

    assert_eq!(run.state, PipelineState::Completed);
    let rows = table(&run);
    assert_eq!(rows.row_count, 1);
    assert_eq!(rows.rows[0]["Unit"], "101");
    assert_eq!(rows.errors, vec!["row 2: cell ZZZZZZZZ2 is beyond column XFD".to_string()]);
}

#[test]
fn test_workbook_formula_injection_flagged() {
    let harness = TestHarness::new();
    let workbook = xlsx(&[&["Unit", "Note"], &["101", "=cmd|' /C calc'!A0"]], None);

    let run = harness.process(upload("u1", "rents.xlsx", XLSX_MIME, workbook));

    assert_eq!(run.state, PipelineState::Failed(StageName::Scan));
    assert!(run
        .scan
        .as_ref()
        .unwrap()
        .threats
        .contains(&"active-content:formula-cmd".to_string()));
}

#[test]
fn test_workbook_formula_element_flagged() {
    let harness = TestHarness::new();
    let sheet = r#"<worksheet><sheetData>
        <row r="1"><c r="A1" t="inlineStr"><is><t>Link</t></is></c></row>
        <row r="2"><c r="A2" t="str"><f>HYPERLINK("http://evil")</f><v>x</v></c></row>
    </sheetData></worksheet>"#;

    let run = harness.process(upload("u1", "links.xlsx", XLSX_MIME, xlsx_with_sheet(sheet, None)));

    assert_eq!(run.state, PipelineState::Failed(StageName::Scan));
    assert!(run
        .scan
        .as_ref()
        .unwrap()
        .threats
        .contains(&"active-content:formula-hyperlink".to_string()));
}

// ── Images ──

#[test]
fn test_jpeg_exif_removed_before_hashing() {
    let harness = TestHarness::new();
    let photo = jpeg(64, 48);

    let first = harness.process(upload(
        "u1",
        "front.jpg",
        "image/jpeg",
        with_exif(&photo, "GPS 40.7128N 74.0060W"),
    ));
    let second = harness.process(upload(
        "u2",
        "front-copy.jpg",
        "image/jpeg",
        with_exif(&photo, "Camera XYZ serial 42"),
    ));

    assert_eq!(first.state, PipelineState::Completed);
    let doc = first.document().unwrap();
    assert!(doc.had_metadata);
    let stored = harness.read_artifact(&doc.stored_at);
    assert!(!contains(&stored, b"Exif"));
    assert!(!contains(&stored, b"40.7128N"));

    assert!(second.is_duplicate());
    assert_eq!(first.hash().unwrap().digest, second.hash().unwrap().digest);
}

#[test]
fn test_png_text_chunk_stripped_and_preview_written() {
    let harness = TestHarness::new();
    let image = with_text_chunk(&png(1200, 600), "Author", "J. Appraiser");

    let run = harness.process(upload("u1", "site.png", "image/png", image));

    assert_eq!(run.state, PipelineState::Completed);
    let doc = run.document().unwrap();
    assert!(doc.had_metadata);
    assert!(!contains(&harness.read_artifact(&doc.stored_at), b"J. Appraiser"));

    let preview = doc.preview.as_ref().unwrap();
    assert_eq!(preview.path, artifact_path("u1", "preview.png"));
    assert_eq!(preview.format, "png");
    assert!(preview.width <= 512 && preview.height <= 512);
    assert_eq!(preview.width, 2 * preview.height);
    assert!(harness
        .read_artifact(&preview.path)
        .starts_with(b"\x89PNG\r\n\x1a\n"));
}

#[test]
fn test_upload_named_preview_keeps_both_artifacts() {
    let harness = TestHarness::new();

    let run = harness.process(upload("u1", "preview.png", "image/png", png(16, 16)));

    let doc = run.document().unwrap();
    assert_eq!(doc.stored_at, artifact_path("u1", "preview.png"));
    assert_eq!(
        doc.preview.as_ref().unwrap().path,
        artifact_path("u1", "preview-derived.png")
    );
    assert_eq!(harness.stored_files().len(), 2);
}

// ── PDFs ──

#[test]
fn test_pdf_info_removed_and_preview_from_embedded_image() {
    let harness = TestHarness::new();
    let pdf = pdf_with_jpeg(jpeg(300, 600), 300, 600, Some("Jane Owner"));

    let run = harness.process(upload("u1", "deed.pdf", "application/pdf", pdf));

    assert_eq!(run.state, PipelineState::Completed, "stages: {:?}", run.stages);
    let doc = run.document().unwrap();
    assert!(doc.had_metadata);
    let stored = harness.read_artifact(&doc.stored_at);
    assert!(stored.starts_with(b"%PDF"));
    assert!(!contains(&stored, b"Jane Owner"));

    let preview = doc.preview.as_ref().unwrap();
    assert_eq!((preview.width, preview.height), (256, 512));
}

#[test]
fn test_pdf_without_info_has_no_metadata() {
    let harness = TestHarness::new();
    let pdf = pdf_with_jpeg(jpeg(20, 20), 20, 20, None);

    let run = harness.process(upload("u1", "plat.pdf", "application/pdf", pdf));

    assert!(!run.document().unwrap().had_metadata);
}

#[test]
fn test_pdfs_differing_only_in_info_are_duplicates() {
    let harness = TestHarness::new();
    let plain = pdf_with_jpeg(jpeg(40, 40), 40, 40, None);
    let authored = pdf_with_jpeg(jpeg(40, 40), 40, 40, Some("Alice"));

    let first = harness.process(upload("u1", "deed.pdf", "application/pdf", plain));
    let second = harness.process(upload("u2", "deed-signed.pdf", "application/pdf", authored));

    assert_eq!(second.state, PipelineState::Completed, "stages: {:?}", second.stages);
    assert!(!first.is_duplicate());
    assert!(second.is_duplicate());
    assert_eq!(first.hash().unwrap().digest, second.hash().unwrap().digest);
}

// ── Rejections ──

#[test]
fn test_image_declared_as_csv_fails_scan() {
    let harness = TestHarness::new();

    let run = harness.process(upload("u1", "rents.csv", "text/csv", png(4, 4)));

    assert_eq!(run.state, PipelineState::Failed(StageName::Scan));
    let scan = run.scan.as_ref().unwrap();
    assert!(!scan.clean);
    assert!(scan
        .threats
        .contains(&"mime-mismatch:declared=text/csv,actual=image/png".to_string()));
    assert!(run.extraction().is_none());
    assert!(harness.stored_files().is_empty());

    for stage in [StageName::Scrub, StageName::Extract, StageName::Preview, StageName::Dedupe] {
        assert_eq!(run.stage(stage).unwrap().status, StageStatus::Pending);
    }
}

#[test]
fn test_executable_declared_as_csv_flagged() {
    let harness = TestHarness::new();
    let mut content = b"MZ\x90\x00\x03\x00\x00\x00".to_vec();
    content.extend_from_slice(&[0u8; 56]);

    let run = harness.process(upload("u1", "rents.csv", "text/csv", content));

    let scan = run.scan.as_ref().unwrap();
    assert!(!scan.clean);
    assert!(scan.threats.contains(&"executable-header:pe".to_string()));
    assert!(scan
        .threats
        .iter()
        .any(|t| t.starts_with("mime-mismatch:declared=text/csv")));
    assert!(run.extraction().is_none());
    assert_eq!(
        run.stage(StageName::Extract).unwrap().status,
        StageStatus::Pending
    );
}

#[test]
fn test_eicar_flagged() {
    let harness = TestHarness::new();
    let content = format!("note\n{}\n", EICAR).into_bytes();

    let run = harness.process(upload("u1", "notes.csv", "text/csv", content));

    match &run.outcome {
        PipelineOutcome::Failed { stage, detail } => {
            assert_eq!(*stage, StageName::Scan);
            assert!(detail.contains("signature:eicar-test"), "{}", detail);
        }
        other => panic!("expected scan failure, got {:?}", other),
    }
}

#[test]
fn test_formula_injection_flagged() {
    let harness = TestHarness::new();
    let content = b"unit,note\n101,=HYPERLINK(\"http://evil\")\n".to_vec();

    let run = harness.process(upload("u1", "rents.csv", "text/csv", content));

    assert_eq!(run.state, PipelineState::Failed(StageName::Scan));
    assert!(run
        .scan
        .as_ref()
        .unwrap()
        .threats
        .contains(&"active-content:formula-hyperlink".to_string()));
}

#[test]
fn test_disallowed_type_flagged() {
    let harness = TestHarness::new();

    let run = harness.process(upload("u1", "notes.txt", "text/plain", b"hello".to_vec()));

    assert_eq!(run.state, PipelineState::Failed(StageName::Scan));
    assert!(run
        .scan
        .as_ref()
        .unwrap()
        .threats
        .contains(&"disallowed-type:text/plain".to_string()));
}

#[test]
fn test_corrupt_jpeg_fails_scrub() {
    let harness = TestHarness::new();
    let mut photo = jpeg(8, 8);
    // SOI followed by a segment whose length runs past the end.
    photo.truncate(2);
    photo.extend_from_slice(&[0xFF, 0xE1, 0x40, 0x00, b'E']);

    let run = harness.process(upload("u1", "bad.jpg", "image/jpeg", photo));

    assert_eq!(run.state, PipelineState::Failed(StageName::Scrub));
    assert_eq!(run.stage(StageName::Scan).unwrap().status, StageStatus::Completed);
    assert!(harness.stored_files().is_empty());
}

// ── Deduplication ──

#[test]
fn test_duplicates_detected_across_filenames() {
    let harness = TestHarness::new();
    let csv = b"Parcel,Value\nA-1,100\n".to_vec();

    let first = harness.process(upload("u1", "january.csv", "text/csv", csv.clone()));
    let second = harness.process(upload("u2", "february.csv", "text/csv", csv));

    assert!(!first.is_duplicate());
    assert!(second.is_duplicate());
    assert_eq!(second.hash().unwrap().duplicate_of.as_deref(), Some("u1"));
    assert_eq!(
        harness.stored_files(),
        vec![
            artifact_path("u1", "january.csv"),
            artifact_path("u2", "february.csv"),
        ]
    );
}

#[test]
fn test_tenants_do_not_share_dedup_scope() {
    let harness = TestHarness::new();
    let csv = b"Parcel,Value\nA-1,100\n".to_vec();

    let first = harness.process(tenant_upload("t1", "u1", "a.csv", "text/csv", csv.clone()));
    let second = harness.process(tenant_upload("t2", "u2", "a.csv", "text/csv", csv));

    assert!(!first.is_duplicate());
    assert!(!second.is_duplicate());
    assert_eq!(first.hash().unwrap().digest, second.hash().unwrap().digest);
    assert_eq!(second.hash().unwrap().tenant_id, "t2");
}

// ── Progress and concurrency ──

#[test]
fn test_progress_stream_ends_with_finished_event() {
    let harness = TestHarness::new();
    let progress = BroadcastProgress::new(64);
    let mut rx = progress.subscribe();

    let run = harness
        .pipeline()
        .process(
            upload("u1", "a.csv", "text/csv", b"a\n1\n".to_vec()),
            &appraisal::CancelFlag::new(),
            &progress,
        )
        .unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.upload_id, "u1");
        events.push(event.kind);
    }
    assert_eq!(
        events.first(),
        Some(&StageEventKind::Started {
            stage: StageName::Scan
        })
    );
    assert_eq!(
        events.last(),
        Some(&StageEventKind::Finished { state: run.state })
    );
}

#[test]
fn test_worker_pool_runs_mixed_submission() {
    let harness = TestHarness::new();
    let pool = WorkerPool::new(harness.pipeline(), 3).unwrap();

    let uploads = vec![
        upload("u1", "a.csv", "text/csv", b"a,b\n1,2\n".to_vec()),
        upload("u2", "b.csv", "text/csv", b"a,b\n1,2\n".to_vec()),
        upload("u3", "c.png", "image/png", png(10, 10)),
        upload("u4", "d.csv", "text/csv", png(4, 4)),
        upload("u5", "e.jpg", "image/jpeg", with_exif(&jpeg(10, 10), "x")),
    ];
    for upload in uploads {
        pool.submit(upload).unwrap();
    }

    let mut seen = HashSet::new();
    let mut duplicates = 0;
    for _ in 0..5 {
        let result = pool.recv_result().unwrap();
        let run = result.result.unwrap();
        assert_eq!(run.upload_id, result.upload_id);
        if run.is_duplicate() {
            duplicates += 1;
        }
        let expected = if result.upload_id == "u4" {
            PipelineState::Failed(StageName::Scan)
        } else {
            PipelineState::Completed
        };
        assert_eq!(run.state, expected, "{}", result.upload_id);
        seen.insert(result.upload_id);
    }

    assert_eq!(seen.len(), 5);
    assert_eq!(duplicates, 1);
    assert_eq!(harness.dedup.len(), 3);

    pool.shutdown();
    pool.wait();
}

#[test]
fn test_pool_shares_one_index_between_pipelines() {
    let harness = TestHarness::new();
    let pipeline = harness.pipeline();
    let pool = WorkerPool::new(Arc::clone(&pipeline), 2).unwrap();

    pool.submit(upload("u1", "a.csv", "text/csv", b"x\n1\n".to_vec()))
        .unwrap();
    let pooled = pool.recv_result().unwrap().result.unwrap();
    let direct = harness.process(upload("u2", "b.csv", "text/csv", b"x\n1\n".to_vec()));

    assert!(!pooled.is_duplicate());
    assert!(direct.is_duplicate());

    pool.shutdown();
    pool.wait();
}
