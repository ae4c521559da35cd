mod common;

use common::{Harness, LETTER, blank_png_data_url, page_content, png_data_url};
use contract_sign::store::{ArtifactKind, ArtifactStore, RecordStore};
use contract_sign::{
    ErrorKind, PageIndexError, SignError, SignatureRequest, SigningStatus, SignaturePayload,
};
use lopdf::Document;
use serde_json::json;

fn jane_doe() -> SignatureRequest {
    SignatureRequest::new(SignaturePayload::Text("Jane Doe".to_string()))
}

#[tokio::test]
async fn signs_the_first_page_of_a_letter_contract() {
    let h = Harness::new();
    let created = h.upload(&[LETTER, LETTER, LETTER]).await;
    assert_eq!(created.page_count, 3);
    assert!(created.contract_id.starts_with("CN-"));
    assert_eq!(created.access_token.len(), 32);

    let signed = h
        .engine
        .request_signature(&created.contract_id, &created.access_token, jane_doe().at(0, 0.5, 0.85))
        .await
        .unwrap();
    assert!(signed.reference.as_str().starts_with(&format!("signed/{}_SIGNED_", created.contract_id)));
    assert_eq!(signed.url, format!("https://sign.example.com/{}", signed.reference));

    let base = h.artifacts.get(&created.base_document_ref).unwrap();
    let output = h.artifacts.get(&signed.reference).unwrap();
    let doc = Document::load_mem(&output).unwrap();
    assert_eq!(doc.get_pages().len(), 3);

    let first = page_content(&output, 1);
    assert!(first.contains("(Page 1) Tj"), "{first}");
    assert!(first.contains("/SigOverlay Do"), "{first}");
    for n in [2, 3] {
        assert_eq!(page_content(&output, n), page_content(&base, n));
    }

    // the form XObject carries the placement computed for a 612x792 page
    let placed = doc.objects.values().filter_map(|o| o.as_stream().ok()).any(|s| {
        let mut s = s.clone();
        let _ = s.decompress();
        String::from_utf8_lossy(&s.content).contains("183.6 0 0 45.9 214.2 95.85 cm")
    });
    assert!(placed);

    let status = h.engine.contract_status(&created.contract_id).unwrap();
    assert_eq!(status.status, SigningStatus::Signed);
    assert_eq!(status.signed_document_ref.as_ref(), Some(&signed.reference));
    let placement = status.placement.unwrap();
    assert_eq!((placement.page_index, placement.x_pct, placement.y_pct), (0, 0.5, 0.85));
    assert!(status.signed_at.is_some());
}

#[tokio::test]
async fn out_of_range_page_leaves_contract_unsigned() {
    let h = Harness::new();
    let created = h.upload(&[LETTER, LETTER, LETTER]).await;

    let err = h
        .engine
        .request_signature(&created.contract_id, &created.access_token, jane_doe().at(5, 0.5, 0.5))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SignError::InvalidPageIndex(PageIndexError::OutOfRange { index: 5, page_count: 3 })
    ));
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = h
        .engine
        .request_signature(&created.contract_id, &created.access_token, jane_doe().at(-1, 0.5, 0.5))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SignError::InvalidPageIndex(PageIndexError::OutOfRange { index: -1, .. })
    ));

    let status = h.engine.contract_status(&created.contract_id).unwrap();
    assert_eq!(status.status, SigningStatus::Created);
    assert!(h.artifacts.list(ArtifactKind::Signed).is_empty());
}

#[tokio::test]
async fn invalid_input_can_be_retried() {
    let h = Harness::new();
    let created = h.upload(&[LETTER]).await;
    let (id, token) = (&created.contract_id, &created.access_token);

    let err = h.engine.request_signature(id, token, jane_doe().at(0, 1.5, 0.5)).await.unwrap_err();
    assert!(matches!(err, SignError::InvalidCoordinate(_)));

    let blank = SignatureRequest::new(SignaturePayload::Text("   ".to_string()));
    assert!(matches!(
        h.engine.request_signature(id, token, blank).await,
        Err(SignError::EmptySignature)
    ));

    let garbage = SignatureRequest::new(SignaturePayload::Raster(b"not an image".to_vec()));
    assert!(matches!(
        h.engine.request_signature(id, token, garbage).await,
        Err(SignError::InvalidSignatureFormat(_))
    ));

    assert_eq!(h.engine.contract_status(id).unwrap().status, SigningStatus::Created);
    h.engine.request_signature(id, token, jane_doe()).await.unwrap();
}

#[tokio::test]
async fn transparent_drawing_is_not_a_signature() {
    let h = Harness::new();
    let created = h.upload(&[LETTER]).await;
    let (id, token) = (&created.contract_id, &created.access_token);

    let request = SignatureRequest::from_json(&json!({
        "signature": blank_png_data_url(300, 100),
        "page": 0,
        "x_pct": 0.5,
        "y_pct": 0.85
    }))
    .unwrap();
    let err = h.engine.request_signature(id, token, request).await.unwrap_err();
    assert!(matches!(err, SignError::EmptySignature));
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    assert_eq!(h.engine.contract_status(id).unwrap().status, SigningStatus::Created);
    assert!(h.artifacts.list(ArtifactKind::Signed).is_empty());
}

#[tokio::test]
async fn signing_keeps_the_runtime_responsive() {
    let h = Harness::new();
    let created = h.upload(&[LETTER, LETTER]).await;

    let engine = h.engine.clone();
    let signing = tokio::spawn(async move {
        engine
            .request_signature(&created.contract_id, &created.access_token, jane_doe().at(1, 0.5, 0.5))
            .await
    });

    // single-threaded runtime: the counter only advances while signing is parked
    let mut ticks = 0u32;
    while !signing.is_finished() {
        ticks += 1;
        tokio::task::yield_now().await;
    }
    assert!(ticks > 1, "runtime stalled while signing ({ticks} ticks)");
    signing.await.unwrap().unwrap();
}

#[tokio::test]
async fn second_signature_is_rejected() {
    let h = Harness::new();
    let created = h.upload(&[LETTER]).await;
    let (id, token) = (&created.contract_id, &created.access_token);

    let first = h.engine.request_signature(id, token, jane_doe()).await.unwrap();
    for _ in 0..3 {
        let err = h
            .engine
            .request_signature(id, token, jane_doe().at(0, 0.1, 0.1))
            .await
            .unwrap_err();
        assert!(matches!(err, SignError::AlreadySigned(_)));
        assert_eq!(err.status_code(), 409);
    }
    let record = h.records.get(id).unwrap().unwrap();
    assert_eq!(record.signed_document_ref, Some(first.reference));
    assert_eq!(h.artifacts.list(ArtifactKind::Signed).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_sign_exactly_once() {
    let h = Harness::new();
    let created = h.upload(&[LETTER, LETTER]).await;

    let tasks: Vec<_> = (0..8)
        .map(|n| {
            let engine = h.engine.clone();
            let id = created.contract_id.clone();
            let token = created.access_token.clone();
            tokio::spawn(async move {
                let request = jane_doe().at(n % 2, 0.5, 0.5);
                engine.request_signature(&id, &token, request).await
            })
        })
        .collect();

    let mut successes = 0;
    let mut already_signed = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => successes += 1,
            Err(SignError::AlreadySigned(_)) => already_signed += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!((successes, already_signed), (1, 7));
    assert_eq!(h.artifacts.list(ArtifactKind::Signed).len(), 1);
}

#[tokio::test]
async fn bad_links_are_distinguished() {
    let h = Harness::new();
    let created = h.upload(&[LETTER]).await;

    let err = h.engine.validate_link("CN-19700101-000000", &created.access_token).unwrap_err();
    assert!(matches!(err, SignError::ContractNotFound(_)));
    assert_eq!(err.status_code(), 404);

    let err = h.engine.validate_link(&created.contract_id, "0".repeat(32).as_str()).unwrap_err();
    assert!(matches!(err, SignError::Unauthorized(_)));
    assert_eq!(err.status_code(), 403);
    assert!(err.is_link_invalid());

    let err = h
        .engine
        .request_signature(&created.contract_id, "wrong", jane_doe())
        .await
        .unwrap_err();
    assert!(matches!(err, SignError::Unauthorized(_)));

    let snapshot = h.engine.validate_link(&created.contract_id, &created.access_token).unwrap();
    assert_eq!(snapshot.status, SigningStatus::Created);
    assert_eq!(snapshot.page_count, 1);
}

#[tokio::test]
async fn drawn_signature_keeps_its_aspect_ratio() {
    let h = Harness::new();
    let created = h.upload(&[LETTER]).await;
    let body = json!({
        "signature": png_data_url(200, 100),
        "page": 0,
        "x_pct": 0.0,
        "y_pct": 0.0
    });
    let request = SignatureRequest::from_json(&body).unwrap();
    let signed = h
        .engine
        .request_signature(&created.contract_id, &created.access_token, request)
        .await
        .unwrap();

    let output = h.artifacts.get(&signed.reference).unwrap();
    let doc = Document::load_mem(&output).unwrap();
    // 30% of 612 wide, half as tall, centred on the top-left corner
    let placed = doc.objects.values().filter_map(|o| o.as_stream().ok()).any(|s| {
        let mut s = s.clone();
        let _ = s.decompress();
        String::from_utf8_lossy(&s.content).contains("183.6 0 0 91.8 -91.8 746.1 cm")
    });
    assert!(placed);
}

#[tokio::test]
async fn signed_document_download_requires_the_token() {
    let h = Harness::new();
    let created = h.upload(&[LETTER, LETTER]).await;
    let (id, token) = (&created.contract_id, &created.access_token);

    assert!(h.engine.signed_document(id, token).is_err());
    let signed = h.engine.request_signature(id, token, jane_doe()).await.unwrap();

    let bytes = h.engine.signed_document(id, token).unwrap();
    assert_eq!(bytes, h.artifacts.get(&signed.reference).unwrap());
    assert!(matches!(
        h.engine.signed_document(id, "nope"),
        Err(SignError::Unauthorized(_))
    ));
}
