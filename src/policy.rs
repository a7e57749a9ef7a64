//! Authorization table: which role may take which action on which document
//! type, given the document's derived status.
//!
//! This is the only place permissions are decided. Anything a caller displays
//! is a hint; [`allowed_actions`] is re-evaluated on every write.
use std::collections::BTreeSet;

use super::types::{Action, DocType, Role, Status};

/// One row of the policy table.
struct Grant {
    role: Role,
    doc_type: DocType,
    action: Action,
    legal_in: &'static [Status],
}

const POLICY_TABLE: &[Grant] = &[
    Grant {
        role: Role::Buyer,
        doc_type: DocType::PurchaseOrder,
        action: Action::Amend,
        legal_in: &[Status::Created, Status::Verified],
    },
    Grant {
        role: Role::Buyer,
        doc_type: DocType::BillOfLading,
        action: Action::Received,
        legal_in: &[Status::InvoiceIssued],
    },
    Grant {
        role: Role::Seller,
        doc_type: DocType::PurchaseOrder,
        action: Action::IssueBol,
        legal_in: &[Status::LocIssued],
    },
    Grant {
        role: Role::Seller,
        doc_type: DocType::BillOfLading,
        action: Action::Shipped,
        legal_in: &[Status::BolIssued],
    },
    Grant {
        role: Role::Seller,
        doc_type: DocType::BillOfLading,
        action: Action::IssueInvoice,
        legal_in: &[Status::Shipped],
    },
    Grant {
        role: Role::Seller,
        doc_type: DocType::LetterOfCredit,
        action: Action::IssueBol,
        legal_in: &[Status::LocIssued],
    },
    Grant {
        role: Role::Auditor,
        doc_type: DocType::PurchaseOrder,
        action: Action::Verify,
        legal_in: &[Status::Created, Status::Amended],
    },
    Grant {
        role: Role::Auditor,
        doc_type: DocType::LetterOfCredit,
        action: Action::Verify,
        legal_in: &[Status::Created],
    },
    Grant {
        role: Role::Bank,
        doc_type: DocType::PurchaseOrder,
        action: Action::IssueLoc,
        legal_in: &[Status::Created, Status::Verified],
    },
    // re-confirmation of an already issued credit is allowed
    Grant {
        role: Role::Bank,
        doc_type: DocType::LetterOfCredit,
        action: Action::IssueLoc,
        legal_in: &[Status::Created, Status::Verified, Status::LocIssued],
    },
    Grant {
        role: Role::Bank,
        doc_type: DocType::Invoice,
        action: Action::Paid,
        legal_in: &[Status::Created],
    },
];

/// Actions `role` may take on a `doc_type` currently in `status`.
/// Anything not granted by the table is denied.
pub fn allowed_actions(role: Role, doc_type: DocType, status: Status) -> BTreeSet<Action> {
    POLICY_TABLE
        .iter()
        .filter(|g| g.role == role && g.doc_type == doc_type && g.legal_in.contains(&status))
        .map(|g| g.action)
        .collect()
}

pub fn is_allowed(role: Role, doc_type: DocType, status: Status, action: Action) -> bool {
    POLICY_TABLE.iter().any(|g| {
        g.role == role && g.doc_type == doc_type && g.action == action && g.legal_in.contains(&status)
    })
}

/// Which document types a role may bring into the system.
pub fn can_upload(role: Role, doc_type: DocType) -> bool {
    matches!(
        (role, doc_type),
        (Role::Buyer, DocType::PurchaseOrder)
            | (Role::Bank, DocType::LetterOfCredit)
            | (Role::Seller, DocType::BillOfLading)
            | (Role::Seller, DocType::Invoice)
    )
}

/// Which document types a `doc_type` may be issued against. A PO always
/// starts a trade.
pub fn can_link(doc_type: DocType, parent_type: DocType) -> bool {
    matches!(
        (doc_type, parent_type),
        (DocType::LetterOfCredit, DocType::PurchaseOrder)
            | (DocType::BillOfLading, DocType::PurchaseOrder | DocType::LetterOfCredit)
            | (
                DocType::Invoice,
                DocType::PurchaseOrder | DocType::LetterOfCredit | DocType::BillOfLading
            )
    )
}
