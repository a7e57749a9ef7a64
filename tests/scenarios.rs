use anyhow::Context;
use sled::open;
use std::sync::Arc;
use trade_ledger::{
    Action, Actor, DocType, DocumentDraft, DocumentWorkflowEngine, EngineConfig, Role, Status,
    WorkflowError, error::Corruption,
};

use tempfile::{TempDir, tempdir}; // Use for test db cleanup.

const BUYER: Actor = Actor { id: 1, role: Role::Buyer };
const SELLER: Actor = Actor { id: 2, role: Role::Seller };
const AUDITOR: Actor = Actor { id: 3, role: Role::Auditor };
const BANK: Actor = Actor { id: 4, role: Role::Bank };

// Sled takes a file lock on the database, so every test gets its own
// database in a temp dir which is cleaned up when the TempDir drops.
fn engine(name: &str) -> anyhow::Result<(TempDir, DocumentWorkflowEngine)> {
    let temp_dir = tempdir()?;
    let db = open(temp_dir.path().join(name))?;
    let config = EngineConfig::new().set_flush_on_append(false);
    let engine = DocumentWorkflowEngine::with_config(Arc::new(db), config)?;
    Ok((temp_dir, engine))
}

fn upload(
    engine: &DocumentWorkflowEngine,
    uploader: &Actor,
    doc_type: DocType,
    doc_number: &str,
) -> anyhow::Result<u64> {
    let draft = DocumentDraft::new(doc_type)
        .set_doc_number(doc_number)
        .set_file_reference(&format!("files/{doc_number}.pdf"))
        .set_counterparty(SELLER.id);
    let content = format!("{doc_type} {doc_number} original scan");
    let document = engine.register_document(draft, content.as_bytes(), uploader)?;
    Ok(document.id)
}

#[test]
fn purchase_order_verified_then_credit_closes_amendment() -> anyhow::Result<()> {
    let (_dir, engine) = engine("po_flow.db")?;
    let po = upload(&engine, &BUYER, DocType::PurchaseOrder, "PO-1001")?;

    assert_eq!(engine.status(po)?, Status::Created);

    engine
        .perform_action(po, &AUDITOR, Action::Verify, None)
        .context("Verify failed: ")?;
    assert_eq!(engine.status(po)?, Status::Verified);

    engine
        .perform_action(po, &BANK, Action::IssueLoc, Some(r#"{"amount":"250000"}"#.into()))
        .context("Issue LOC failed: ")?;
    assert_eq!(engine.status(po)?, Status::LocIssued);

    let rejected = engine.perform_action(po, &BUYER, Action::Amend, None);
    assert!(matches!(
        rejected,
        Err(WorkflowError::ActionNotPermitted {
            role: Role::Buyer,
            doc_type: DocType::PurchaseOrder,
            status: Status::LocIssued,
            action: Action::Amend,
        })
    ));

    let timeline = engine.get_document_with_ledger(po)?;
    assert_eq!(timeline.entries.len(), 2);
    assert_eq!(timeline.status, Status::LocIssued);

    // the seller can now ship against the credit
    engine.perform_action(po, &SELLER, Action::IssueBol, None)?;
    assert_eq!(engine.status(po)?, Status::BolIssued);
    assert!(engine.list_permitted_actions(po, &SELLER)?.is_empty());

    Ok(())
}

#[test]
fn invoice_can_only_be_paid_once() -> anyhow::Result<()> {
    let (_dir, engine) = engine("invoice.db")?;
    let invoice = upload(&engine, &SELLER, DocType::Invoice, "INV-77")?;

    assert_eq!(engine.get_document_with_ledger(invoice)?.status, Status::Created);

    engine.perform_action(invoice, &BANK, Action::Paid, None)?;
    assert_eq!(engine.status(invoice)?, Status::Paid);

    let second = engine.perform_action(invoice, &BANK, Action::Paid, None);
    assert!(matches!(
        second,
        Err(WorkflowError::ActionNotPermitted { status: Status::Paid, .. })
    ));
    assert_eq!(engine.get_document_with_ledger(invoice)?.entries.len(), 1);
    assert!(engine.list_permitted_actions(invoice, &BANK)?.is_empty());

    Ok(())
}

#[test]
fn bill_of_lading_lifecycle() -> anyhow::Result<()> {
    let (_dir, engine) = engine("bol.db")?;
    let bol = upload(&engine, &SELLER, DocType::BillOfLading, "BOL-5")?;

    assert_eq!(engine.status(bol)?, Status::BolIssued);
    assert_eq!(
        engine.list_permitted_actions(bol, &SELLER)?.into_iter().collect::<Vec<_>>(),
        vec![Action::Shipped]
    );

    engine.perform_action(bol, &SELLER, Action::Shipped, None)?;

    // goods are not received before they are invoiced
    let early = engine.perform_action(bol, &BUYER, Action::Received, None);
    assert!(matches!(early, Err(WorkflowError::ActionNotPermitted { .. })));

    engine.perform_action(bol, &SELLER, Action::IssueInvoice, None)?;
    engine.perform_action(bol, &BUYER, Action::Received, None)?;

    assert_eq!(engine.audit_ledger(bol)?, Status::Received);
    for actor in [BUYER, SELLER, AUDITOR, BANK] {
        assert!(engine.list_permitted_actions(bol, &actor)?.is_empty());
    }

    Ok(())
}

#[test]
fn amendment_requires_reverification() -> anyhow::Result<()> {
    let (_dir, engine) = engine("amend.db")?;
    let po = upload(&engine, &BUYER, DocType::PurchaseOrder, "PO-2")?;

    engine.perform_action(po, &BUYER, Action::Amend, Some(r#"{"quantity":120}"#.into()))?;
    assert_eq!(engine.status(po)?, Status::Amended);

    // no second amendment and no credit until the auditor signs off again
    assert!(engine.perform_action(po, &BUYER, Action::Amend, None).is_err());
    assert!(engine.perform_action(po, &BANK, Action::IssueLoc, None).is_err());

    engine.perform_action(po, &AUDITOR, Action::Verify, None)?;
    engine.perform_action(po, &BUYER, Action::Amend, Some(r#"{"quantity":90}"#.into()))?;
    engine.perform_action(po, &AUDITOR, Action::Verify, None)?;

    let timeline = engine.get_document_with_ledger(po)?;
    assert_eq!(timeline.status, Status::Verified);
    assert_eq!(timeline.entries.len(), 4);
    assert_eq!(timeline.entries[2].metadata.as_deref(), Some(r#"{"quantity":90}"#));

    Ok(())
}

#[test]
fn unknown_document_is_reported() -> anyhow::Result<()> {
    let (_dir, engine) = engine("missing.db")?;

    assert!(matches!(
        engine.perform_action(404, &BANK, Action::Paid, None),
        Err(WorkflowError::DocumentNotFound(404))
    ));
    assert!(matches!(
        engine.list_permitted_actions(404, &BANK),
        Err(WorkflowError::DocumentNotFound(404))
    ));
    assert!(matches!(
        engine.get_document_with_ledger(404),
        Err(WorkflowError::DocumentNotFound(404))
    ));

    Ok(())
}

#[test]
fn upload_rules_are_enforced() -> anyhow::Result<()> {
    let (_dir, engine) = engine("upload.db")?;
    let draft = || {
        DocumentDraft::new(DocType::PurchaseOrder)
            .set_doc_number("PO-9")
            .set_file_reference("files/PO-9.pdf")
    };

    let by_auditor = engine.register_document(draft(), b"scan", &AUDITOR);
    assert!(matches!(
        by_auditor,
        Err(WorkflowError::UploadNotPermitted { role: Role::Auditor, .. })
    ));

    let empty = engine.register_document(draft(), b"", &BUYER);
    assert!(matches!(empty, Err(WorkflowError::InvalidContent(_))));

    engine.register_document(draft(), b"scan", &BUYER)?;
    let duplicate = engine.register_document(draft(), b"another scan", &BUYER);
    assert!(matches!(
        duplicate,
        Err(WorkflowError::DuplicateDocumentNumber { uploader_id: 1, .. })
    ));

    // a different buyer may use the same number
    let other_buyer = Actor::new(11, Role::Buyer);
    engine.register_document(draft(), b"scan", &other_buyer)?;

    Ok(())
}

#[test]
fn ledger_keeps_role_held_at_the_time() -> anyhow::Result<()> {
    let (_dir, engine) = engine("roles.db")?;
    let po = upload(&engine, &BUYER, DocType::PurchaseOrder, "PO-3")?;

    // the same person first acts as auditor, then is moved to the bank
    let as_auditor = Actor::new(42, Role::Auditor);
    let as_bank = Actor::new(42, Role::Bank);

    engine.perform_action(po, &as_auditor, Action::Verify, None)?;
    engine.perform_action(po, &as_bank, Action::IssueLoc, None)?;

    let entries = engine.get_document_with_ledger(po)?.entries;
    assert_eq!(entries[0].actor_id, 42);
    assert_eq!(entries[0].actor_role, Role::Auditor);
    assert_eq!(entries[1].actor_role, Role::Bank);

    Ok(())
}

#[test]
fn timeline_is_ordered_and_chained() -> anyhow::Result<()> {
    let (_dir, engine) = engine("timeline.db")?;
    let po = upload(&engine, &BUYER, DocType::PurchaseOrder, "PO-4")?;

    engine.perform_action(po, &AUDITOR, Action::Verify, None)?;
    engine.perform_action(po, &BUYER, Action::Amend, None)?;
    engine.perform_action(po, &AUDITOR, Action::Verify, None)?;
    engine.perform_action(po, &BANK, Action::IssueLoc, None)?;

    let timeline = engine.get_document_with_ledger(po)?;
    assert_eq!(timeline.entries[0].prev_hash, timeline.document.record_hash);

    for (i, pair) in timeline.entries.windows(2).enumerate() {
        assert_eq!(pair[0].sequence, i as u64 + 1);
        assert_eq!(pair[1].sequence, pair[0].sequence + 1);
        assert_eq!(pair[1].prev_hash, pair[0].entry_hash);
        assert!(pair[0].created_at.to_datetime_utc() <= pair[1].created_at.to_datetime_utc());
        assert!(pair[0].id < pair[1].id);
    }

    Ok(())
}

#[test]
fn tampered_ledger_is_surfaced_and_never_extended() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("tamper.db"))?);
    let engine = DocumentWorkflowEngine::new(db.clone())?;

    let po = upload(&engine, &BUYER, DocType::PurchaseOrder, "PO-5")?;
    engine.perform_action(po, &AUDITOR, Action::Verify, None)?;

    // rewrite the first entry behind the engine's back
    let ledger = db.open_tree("ledger")?;
    let mut key = po.to_be_bytes().to_vec();
    key.extend_from_slice(&1u64.to_be_bytes());
    let stored = ledger.get(&key)?.context("entry missing")?;
    let mut entry: trade_ledger::LedgerEntry = minicbor::decode(&stored)?;
    entry.actor_role = Role::Bank;
    ledger.insert(key, minicbor::to_vec(&entry)?)?;

    let result = engine.perform_action(po, &BANK, Action::IssueLoc, None);
    assert!(matches!(
        result,
        Err(WorkflowError::CorruptLedger {
            reason: Corruption::HashMismatch { sequence: 1 },
            ..
        })
    ));
    assert!(matches!(
        engine.audit_ledger(po),
        Err(WorkflowError::CorruptLedger { .. })
    ));
    assert_eq!(ledger.len(), 1);

    Ok(())
}

#[test]
fn rewritten_document_record_is_surfaced() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("tamper_doc.db"))?);
    let engine = DocumentWorkflowEngine::new(db.clone())?;

    let loc = upload(&engine, &BANK, DocType::LetterOfCredit, "LOC-5")?;
    engine.perform_action(loc, &BANK, Action::IssueLoc, None)?;
    let idle = upload(&engine, &BUYER, DocType::PurchaseOrder, "PO-IDLE")?;

    // retype the credit and hand it to someone else
    let documents = db.open_tree("documents")?;
    let stored = documents.get(loc.to_be_bytes())?.context("document missing")?;
    let mut record: trade_ledger::Document = minicbor::decode(&stored)?;
    record.doc_type = DocType::PurchaseOrder;
    record.uploader_id = 999;
    documents.insert(loc.to_be_bytes(), minicbor::to_vec(&record)?)?;

    let tampered = |result: &Result<_, WorkflowError>| {
        matches!(
            result,
            Err(WorkflowError::CorruptLedger {
                reason: Corruption::DocumentTampered { .. },
                ..
            })
        )
    };
    assert!(tampered(&engine.audit_ledger(loc).map(|_| ())));
    assert!(tampered(&engine.list_permitted_actions(loc, &SELLER).map(|_| ())));
    assert!(tampered(&engine.perform_action(loc, &SELLER, Action::IssueBol, None).map(|_| ())));
    assert!(tampered(&engine.list_documents(&Actor::new(999, Role::Buyer)).map(|_| ())));

    // a document with an empty ledger is covered by its seal alone
    let stored = documents.get(idle.to_be_bytes())?.context("document missing")?;
    let mut record: trade_ledger::Document = minicbor::decode(&stored)?;
    record.content_hash = trade_ledger::hashing::hash_content(b"substituted scan")?;
    documents.insert(idle.to_be_bytes(), minicbor::to_vec(&record)?)?;

    assert!(tampered(&engine.verify_document_content(idle, b"substituted scan").map(|_| ())));
    assert!(tampered(&engine.get_document_with_ledger(idle).map(|_| ())));
    assert!(tampered(&engine.trade_timeline(loc).map(|_| ())));

    Ok(())
}

#[test]
fn follow_on_documents_link_into_one_trade() -> anyhow::Result<()> {
    let (_dir, engine) = engine("trade.db")?;
    let po = upload(&engine, &BUYER, DocType::PurchaseOrder, "PO-T")?;
    engine.perform_action(po, &AUDITOR, Action::Verify, None)?;
    engine.perform_action(po, &BANK, Action::IssueLoc, None)?;

    let issue = |uploader: &Actor, doc_type: DocType, number: &str, parent: u64| {
        let draft = DocumentDraft::new(doc_type)
            .set_doc_number(number)
            .set_file_reference(&format!("files/{number}.pdf"))
            .set_parent(parent);
        engine.register_document(draft, number.as_bytes(), uploader)
    };

    let loc = issue(&BANK, DocType::LetterOfCredit, "LOC-T", po)?.id;
    let bol = issue(&SELLER, DocType::BillOfLading, "BOL-T", loc)?.id;
    let invoice = issue(&SELLER, DocType::Invoice, "INV-T", bol)?.id;
    let unrelated = upload(&engine, &BUYER, DocType::PurchaseOrder, "PO-U")?;

    engine.perform_action(bol, &SELLER, Action::Shipped, None)?;
    engine.perform_action(invoice, &BANK, Action::Paid, None)?;

    // any member of the trade leads to the same view
    for member in [po, loc, bol, invoice] {
        let trade = engine.trade_timeline(member)?;
        assert_eq!(trade.root, po);
        let ids: Vec<u64> = trade.documents.iter().map(|t| t.document.id).collect();
        assert_eq!(ids, vec![po, loc, bol, invoice]);
    }

    let trade = engine.trade_timeline(invoice)?;
    let statuses: Vec<Status> = trade.documents.iter().map(|t| t.status).collect();
    assert_eq!(
        statuses,
        vec![Status::LocIssued, Status::Created, Status::Shipped, Status::Paid]
    );
    assert_eq!(trade.documents[1].document.parent_id, Some(po));

    let alone = engine.trade_timeline(unrelated)?;
    assert_eq!(alone.root, unrelated);
    assert_eq!(alone.documents.len(), 1);

    // links must point at an existing document of a type it can be issued against
    assert!(matches!(
        issue(&BANK, DocType::LetterOfCredit, "LOC-X", 9_999),
        Err(WorkflowError::ParentNotFound(9_999))
    ));
    assert!(matches!(
        issue(&BUYER, DocType::PurchaseOrder, "PO-X", po),
        Err(WorkflowError::InvalidParent {
            doc_type: DocType::PurchaseOrder,
            parent_type: DocType::PurchaseOrder,
        })
    ));
    assert_eq!(engine.list_documents(&AUDITOR)?.len(), 5);

    Ok(())
}

#[test]
fn documents_are_visible_by_role() -> anyhow::Result<()> {
    let (_dir, engine) = engine("listing.db")?;
    let other_buyer = Actor::new(10, Role::Buyer);
    let other_seller = Actor::new(20, Role::Seller);

    upload(&engine, &BUYER, DocType::PurchaseOrder, "PO-A")?; // counterparty: SELLER
    upload(&engine, &other_buyer, DocType::PurchaseOrder, "PO-B")?; // counterparty: SELLER
    upload(&engine, &other_seller, DocType::Invoice, "INV-C")?; // counterparty: SELLER
    upload(&engine, &other_buyer, DocType::PurchaseOrder, "PO-D")?;

    let numbers = |actor: &Actor| -> anyhow::Result<Vec<String>> {
        Ok(engine
            .list_documents(actor)?
            .into_iter()
            .map(|d| d.doc_number)
            .collect())
    };

    assert_eq!(numbers(&BUYER)?, vec!["PO-A"]);
    assert_eq!(numbers(&other_buyer)?, vec!["PO-B", "PO-D"]);
    assert_eq!(numbers(&SELLER)?, vec!["PO-A", "PO-B", "INV-C", "PO-D"]);
    assert_eq!(numbers(&other_seller)?, vec!["INV-C"]);
    assert_eq!(numbers(&AUDITOR)?.len(), 4);
    assert_eq!(numbers(&BANK)?.len(), 4);

    Ok(())
}

#[test]
fn uploaded_content_can_be_reverified() -> anyhow::Result<()> {
    let (_dir, engine) = engine("content.db")?;
    let po = upload(&engine, &BUYER, DocType::PurchaseOrder, "PO-6")?;

    assert!(engine.verify_document_content(po, b"PO PO-6 original scan")?);
    assert!(!engine.verify_document_content(po, b"PO PO-6 doctored scan")?);
    assert!(matches!(
        engine.verify_document_content(po, b""),
        Err(WorkflowError::InvalidContent(_))
    ));

    Ok(())
}

#[test]
fn ledger_survives_reopen() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config = EngineConfig::new().set_db_path(temp_dir.path().join("reopen.db"));

    let po = {
        let engine = DocumentWorkflowEngine::open(config.clone())?;
        let po = upload(&engine, &BUYER, DocType::PurchaseOrder, "PO-7")?;
        engine.perform_action(po, &AUDITOR, Action::Verify, None)?;
        po
    };

    let engine = DocumentWorkflowEngine::open(config)?;
    assert_eq!(engine.status(po)?, Status::Verified);
    assert_eq!(
        engine.list_permitted_actions(po, &BANK)?.into_iter().collect::<Vec<_>>(),
        vec![Action::IssueLoc]
    );

    Ok(())
}
