//! Integration tests for the native store adapter.
//!
//! These tests run against a throwaway mail data directory and verify that
//! the adapter:
//! - Writes signature files and keeps both indices consistent
//! - Reuses existing templates
//! - Detects external edits against the ledger baseline
//! - Refuses to touch a store whose indices are unreadable
//! - Discovers accounts through automation or the configuration file

use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use signet_core::{
    codec::{IndexCodec, PlistCodec},
    native::{
        index::{NameIndex, OrderingIndex},
        AutomationAccount, AutomationAvailability, AutomationBridge, AutomationError, NativeLayout,
        NativeStore, ProcessProbe,
    },
    AccessScope, AccountBinding, CancelHandle, CanonicalSignature, DispatchOptions, OutcomeStatus,
    Baseline, StoreKind, SyncCoordinator, SyncError, SyncLedger,
};
use tempfile::TempDir;

const ACCOUNT: &str = "ACCT-1";

const S0_FILE: &str = "Content-Transfer-Encoding: 7bit\n\
Content-Type: text/html;\n\
\tcharset=us-ascii\n\
Message-Id: <S0>\n\
Mime-Version: 1.0 (Mac OS X Mail 16.0)\n\
\n\
<html><head></head><body class=\"sig\"><div>Old</div></body></html>\n";

/// Name index as the mail client writes it, with a key this crate does not model.
const CLIENT_NAMES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<array>
	<dict>
		<key>SignatureIsRich</key>
		<true/>
		<key>SignatureName</key>
		<string>Old</string>
		<key>SignatureUniqueId</key>
		<string>S0</string>
		<key>SignatureExtraKey</key>
		<string>kept</string>
	</dict>
</array>
</plist>
"#;

/// Ordering index as the mail client writes it: an array of account records.
const CLIENT_ORDERING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<array>
	<dict>
		<key>AccountURL</key>
		<string>ALL_SIGNATURES</string>
		<key>Signatures</key>
		<array>
			<string>S0</string>
		</array>
	</dict>
	<dict>
		<key>AccountURL</key>
		<string>ACCT-1</string>
		<key>SignatureSelection</key>
		<integer>1</integer>
		<key>Signatures</key>
		<array>
			<string>S0</string>
		</array>
	</dict>
</array>
</plist>
"#;

/// Bridge that reports a fixed availability and account list.
struct FakeBridge {
    availability: AutomationAvailability,
    accounts: Vec<AutomationAccount>,
}

#[async_trait]
impl AutomationBridge for FakeBridge {
    async fn probe(&self) -> AutomationAvailability {
        self.availability.clone()
    }

    async fn accounts(&self) -> Result<Vec<AutomationAccount>, AutomationError> {
        Ok(self.accounts.clone())
    }
}

struct Running(bool);

#[async_trait]
impl ProcessProbe for Running {
    async fn is_running(&self) -> bool {
        self.0
    }
}

fn unavailable() -> Arc<dyn AutomationBridge> {
    Arc::new(FakeBridge {
        availability: AutomationAvailability::Unavailable {
            message: "test".to_string(),
        },
        accounts: Vec::new(),
    })
}

/// Helper to create a V10 data directory with an empty signatures folder.
fn setup_layout() -> (TempDir, NativeLayout) {
    let dir = TempDir::new().unwrap();
    let layout = NativeLayout::new(dir.path(), 10);
    fs::create_dir_all(layout.signatures_dir()).unwrap();
    (dir, layout)
}

fn store(layout: &NativeLayout, running: bool) -> NativeStore {
    NativeStore::new(layout.clone())
        .with_automation(unavailable())
        .with_process_probe(Arc::new(Running(running)))
}

/// Seed the store with signature S0 assigned to the account.
fn seed_existing_signature(layout: &NativeLayout) {
    fs::write(layout.signature_file("S0"), S0_FILE).unwrap();

    let mut names = NameIndex::default();
    names.upsert("S0", "Old");
    fs::write(layout.name_index(), PlistCodec.encode(&names).unwrap()).unwrap();

    let mut ordering = OrderingIndex::default();
    ordering.place(ACCOUNT, "S0", true);
    fs::write(layout.ordering_index(), PlistCodec.encode(&ordering).unwrap()).unwrap();
}

fn read_ordering(layout: &NativeLayout) -> OrderingIndex {
    PlistCodec.decode(&fs::read(layout.ordering_index()).unwrap()).unwrap()
}

fn read_names(layout: &NativeLayout) -> NameIndex {
    PlistCodec.decode(&fs::read(layout.name_index()).unwrap()).unwrap()
}

fn temp_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .count()
}

#[tokio::test]
async fn test_write_then_read_round_trip() {
    let (_dir, layout) = setup_layout();
    let native = store(&layout, false);

    let signature = CanonicalSignature::new("S1", "Work", "<p>Jane Doe</p>");
    let receipt = native
        .write_signature(&signature, ACCOUNT, true, None, false)
        .await
        .unwrap();

    assert_eq!(receipt.hash, signature.content_hash());
    assert!(!receipt.restart_required);

    let state = native.read_signature_state(ACCOUNT).await.unwrap().unwrap();
    assert_eq!(state.content, "<p>Jane Doe</p>");
    assert_eq!(state.hash, receipt.hash);
    assert!(state.modified_at.is_some());

    assert_eq!(read_names(&layout).get("S1").unwrap().name, "Work");
    assert_eq!(read_ordering(&layout).signatures(ACCOUNT), ["S1".to_string()]);
    assert_eq!(temp_files(&layout.signatures_dir()), 0);
}

#[tokio::test]
async fn test_default_binding_goes_first_and_reuses_template() {
    let (_dir, layout) = setup_layout();
    seed_existing_signature(&layout);

    let ledger = Arc::new(SyncLedger::in_memory());
    let coordinator = Arc::new(
        SyncCoordinator::new(ledger.clone()).with_native(Arc::new(store(&layout, true))),
    );

    let signature = CanonicalSignature::new("S1", "Work", "<p>A</p>")
        .with_binding(AccountBinding::native(ACCOUNT).as_default());

    let report = coordinator
        .dispatch(&signature, DispatchOptions::default(), &CancelHandle::new(), None)
        .await
        .unwrap();

    match &report.outcomes[0].status {
        OutcomeStatus::Recorded { receipt } => {
            assert!(receipt.restart_required);
            assert!(!receipt.warnings.is_empty());
        }
        other => panic!("expected recorded, got {other:?}"),
    }

    assert_eq!(
        read_ordering(&layout).signatures(ACCOUNT),
        ["S1".to_string(), "S0".to_string()]
    );

    // S0 was borrowed as the template: its headers survive with a new id.
    let written = fs::read_to_string(layout.signature_file("S1")).unwrap();
    assert!(written.contains("Message-Id: <S1>"));
    assert!(written.contains("Mac OS X Mail 16.0"));
    assert!(written.contains("<body class=\"sig\"><p>A</p></body>"));

    let entry = ledger.get(&signature.bindings[0].key()).unwrap();
    assert_eq!(entry.content_hash, signature.content_hash());
    assert!(!entry.conflict);
}

#[tokio::test]
async fn test_non_default_keeps_existing_order() {
    let (_dir, layout) = setup_layout();
    seed_existing_signature(&layout);
    let native = store(&layout, false);

    let signature = CanonicalSignature::new("S1", "Work", "<p>A</p>");
    native
        .write_signature(&signature, ACCOUNT, false, None, false)
        .await
        .unwrap();

    assert_eq!(
        read_ordering(&layout).signatures(ACCOUNT),
        ["S0".to_string(), "S1".to_string()]
    );
}

#[tokio::test]
async fn test_file_state_ignores_assignment() {
    let (_dir, layout) = setup_layout();
    seed_existing_signature(&layout);
    let native = store(&layout, false);

    let signature = CanonicalSignature::new("S1", "Work", "<p>A</p>");
    native
        .write_signature(&signature, ACCOUNT, false, None, false)
        .await
        .unwrap();

    let assigned = native.read_signature_state(ACCOUNT).await.unwrap().unwrap();
    assert_eq!(assigned.content, "<div>Old</div>");

    let own = native.read_signature_file_state("S1").await.unwrap().unwrap();
    assert_eq!(own.hash, signature.content_hash());
    assert!(native.read_signature_file_state("S9").await.unwrap().is_none());
}

#[tokio::test]
async fn test_client_written_indices_are_updated_in_place() {
    let (_dir, layout) = setup_layout();
    fs::write(layout.signature_file("S0"), S0_FILE).unwrap();
    fs::write(layout.name_index(), CLIENT_NAMES).unwrap();
    fs::write(layout.ordering_index(), CLIENT_ORDERING).unwrap();
    let native = store(&layout, false);

    let signature = CanonicalSignature::new("S1", "Work", "<p>A</p>");
    native
        .write_signature(&signature, ACCOUNT, true, None, false)
        .await
        .unwrap();

    let ordering = read_ordering(&layout);
    let accounts: Vec<_> = ordering.records().iter().map(|r| r.account()).collect();
    assert_eq!(accounts, [Some("ALL_SIGNATURES"), Some(ACCOUNT)]);
    assert_eq!(ordering.signatures(ACCOUNT), ["S1".to_string(), "S0".to_string()]);
    assert_eq!(
        ordering.signatures("ALL_SIGNATURES"),
        ["S0".to_string(), "S1".to_string()]
    );

    let ordering_xml = fs::read_to_string(layout.ordering_index()).unwrap();
    assert!(ordering_xml.contains("<key>SignatureSelection</key>"));
    assert!(ordering_xml.contains("<key>AccountURL</key>"));
    assert!(!ordering_xml.contains("AccountUUID"));

    let names = read_names(&layout);
    assert_eq!(names.records().len(), 2);
    assert_eq!(names.get("S1").unwrap().name, "Work");
    let names_xml = fs::read_to_string(layout.name_index()).unwrap();
    assert!(names_xml.contains("<key>SignatureExtraKey</key>"));
    assert!(names_xml.contains("<string>kept</string>"));

    let assigned = native.read_signature_state(ACCOUNT).await.unwrap().unwrap();
    assert_eq!(assigned.hash, signature.content_hash());
}

#[tokio::test]
async fn test_headerless_template_round_trips() {
    let (_dir, layout) = setup_layout();
    fs::write(layout.signature_file("S1"), "<body>old</body>").unwrap();
    let native = store(&layout, false);

    let signature = CanonicalSignature::new("S1", "Work", "<p>a</p>\n\n<p>b</p>");
    let receipt = native
        .write_signature(&signature, ACCOUNT, true, None, true)
        .await
        .unwrap();

    let live = native.read_signature_file_state("S1").await.unwrap().unwrap();
    assert_eq!(live.content, "<p>a</p>\n\n<p>b</p>");
    assert_eq!(live.hash, receipt.hash);

    // The next sync against that baseline is not a conflict.
    let baseline = Baseline {
        hash: receipt.hash.clone(),
        synced_at: receipt.written_at,
    };
    native
        .write_signature(&signature, ACCOUNT, true, Some(&baseline), false)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_external_edit_is_a_conflict() {
    let (_dir, layout) = setup_layout();
    let ledger = Arc::new(SyncLedger::in_memory());
    let coordinator = Arc::new(
        SyncCoordinator::new(ledger.clone()).with_native(Arc::new(store(&layout, false))),
    );

    let signature = CanonicalSignature::new("S1", "Work", "<p>A</p>")
        .with_binding(AccountBinding::native(ACCOUNT).as_default());
    let key = signature.bindings[0].key();

    coordinator
        .dispatch(&signature, DispatchOptions::default(), &CancelHandle::new(), None)
        .await
        .unwrap();
    let baseline = ledger.baseline(&key).unwrap();

    // Someone edits the signature in the mail client.
    let path = layout.signature_file("S1");
    let edited = fs::read_to_string(&path).unwrap().replace("<p>A</p>", "<p>Edited</p>");
    fs::write(&path, edited).unwrap();

    let mut next = signature.clone();
    next.html = "<p>B</p>".to_string();
    let report = coordinator
        .dispatch(&next, DispatchOptions::default(), &CancelHandle::new(), None)
        .await
        .unwrap();

    assert!(matches!(report.outcomes[0].status, OutcomeStatus::Conflict { .. }));
    assert_eq!(ledger.baseline(&key).unwrap(), baseline);
    assert!(fs::read_to_string(&path).unwrap().contains("<p>Edited</p>"));

    let forced = DispatchOptions {
        force: true,
        ..Default::default()
    };
    let report = coordinator
        .dispatch(&next, forced, &CancelHandle::new(), None)
        .await
        .unwrap();
    assert!(report.outcomes[0].is_recorded());
    assert!(fs::read_to_string(&path).unwrap().contains("<p>B</p>"));
}

#[tokio::test]
async fn test_first_replace_leaves_backup() {
    let (_dir, layout) = setup_layout();
    seed_existing_signature(&layout);
    let native = store(&layout, false);

    let signature = CanonicalSignature::new("S0", "Old", "<p>New</p>");
    native
        .write_signature(&signature, ACCOUNT, true, None, true)
        .await
        .unwrap();

    let backup = signet_core::native::layout::backup_path(&layout.signature_file("S0"));
    assert_eq!(fs::read_to_string(backup).unwrap(), S0_FILE);
}

#[tokio::test]
async fn test_corrupt_index_aborts_before_writing() {
    let (_dir, layout) = setup_layout();
    fs::write(layout.ordering_index(), b"not a property list").unwrap();
    let native = store(&layout, false);

    let signature = CanonicalSignature::new("S1", "Work", "<p>A</p>");
    let err = native
        .write_signature(&signature, ACCOUNT, true, None, false)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Fatal { .. }), "{err:?}");
    assert!(!layout.signature_file("S1").exists());
    assert_eq!(fs::read(layout.ordering_index()).unwrap(), b"not a property list");
}

#[tokio::test]
async fn test_missing_signatures_dir_is_not_configured() {
    let dir = TempDir::new().unwrap();
    let layout = NativeLayout::new(dir.path(), 10);
    let native = store(&layout, false);

    let signature = CanonicalSignature::new("S1", "Work", "<p>A</p>");
    let err = native
        .write_signature(&signature, ACCOUNT, true, None, false)
        .await
        .unwrap_err();

    assert!(
        matches!(err, SyncError::NotConfigured { store: StoreKind::Native, .. }),
        "{err:?}"
    );
}

#[tokio::test]
async fn test_discovery_through_automation() {
    let (_dir, layout) = setup_layout();
    let native = NativeStore::new(layout).with_automation(Arc::new(FakeBridge {
        availability: AutomationAvailability::Available,
        accounts: vec![AutomationAccount {
            id: ACCOUNT.to_string(),
            name: "Home".to_string(),
            full_name: "Jane Doe".to_string(),
            account_type: "iCloud".to_string(),
            emails: vec!["jane@icloud.com".to_string()],
        }],
    }));

    let accounts = native.discover_accounts().await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].id, ACCOUNT);
    assert!(accounts[0].is_managed_cloud);
}

#[tokio::test]
async fn test_discovery_falls_back_to_configuration() {
    let (_dir, layout) = setup_layout();

    let accounts = plist::Value::Dictionary(plist::Dictionary::from_iter([(
        "MailAccounts".to_string(),
        plist::Value::Array(vec![
            plist::Value::Dictionary(plist::Dictionary::from_iter([
                ("uniqueId".to_string(), plist::Value::String(ACCOUNT.to_string())),
                ("AccountName".to_string(), plist::Value::String("Work".to_string())),
                ("AccountType".to_string(), plist::Value::String("IMAPAccount".to_string())),
                (
                    "EmailAddresses".to_string(),
                    plist::Value::Array(vec![plist::Value::String("jane@work.com".to_string())]),
                ),
            ])),
            // "On My Mac" has no address and is skipped.
            plist::Value::Dictionary(plist::Dictionary::from_iter([(
                "AccountType".to_string(),
                plist::Value::String("LocalAccount".to_string()),
            )])),
        ]),
    )]));
    accounts.to_file_xml(layout.accounts_file()).unwrap();

    let native = NativeStore::new(layout).with_automation(Arc::new(FakeBridge {
        availability: AutomationAvailability::Denied {
            message: "-1743".to_string(),
        },
        accounts: Vec::new(),
    }));

    let found = native.discover_accounts().await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].email, "jane@work.com");
    assert_eq!(found[0].display_name, "Work");
    assert!(!found[0].is_managed_cloud);
}

#[tokio::test]
async fn test_discovery_denied_without_fallback() {
    let (_dir, layout) = setup_layout();
    let native = NativeStore::new(layout).with_automation(Arc::new(FakeBridge {
        availability: AutomationAvailability::Denied {
            message: "not authorized".to_string(),
        },
        accounts: Vec::new(),
    }));

    let err = native.discover_accounts().await.unwrap_err();
    assert!(
        matches!(err, SyncError::AccessDenied { scope: AccessScope::Automation, .. }),
        "{err:?}"
    );
    assert!(err.remediation().contains("Automation"));
}

#[tokio::test]
async fn test_discovery_with_no_accounts_is_not_configured() {
    let (_dir, layout) = setup_layout();
    let native = store(&layout, false);

    let err = native.discover_accounts().await.unwrap_err();
    assert!(matches!(err, SyncError::NotConfigured { .. }), "{err:?}");
}
