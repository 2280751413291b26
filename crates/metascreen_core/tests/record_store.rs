use metascreen_core::db::{open_db, open_db_in_memory};
use metascreen_core::ingest::{normalize_raw_records, IngestBatch, RawRecord};
use metascreen_core::repo::record_repo::SqliteRecordRepository;
use metascreen_core::repo::RepoError;
use metascreen_core::screening::keyword_classifier::KeywordClassifier;
use metascreen_core::screening::ranker::RankingUnavailable;
use metascreen_core::{
    Classification, ClassifierError, Decision, DecisionRequest, IdentityError, Invitation,
    InvitationSender, Record, RecordDraft, RecordStore, RelevanceClassifier, RequestContext, Role,
    ScreeningConfig, ScreeningError,
};
use rusqlite::Connection;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

struct BrokenClassifier;

impl RelevanceClassifier for BrokenClassifier {
    fn classify(&self, _texts: &[String]) -> Result<Vec<Classification>, ClassifierError> {
        Err(ClassifierError::new("model offline"))
    }
}

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<Invitation>>,
    offline: bool,
}

impl InvitationSender for Outbox {
    fn send_invitation(&self, invitation: &Invitation) -> Result<(), IdentityError> {
        if self.offline {
            return Err(IdentityError::Unavailable("mail relay down".to_string()));
        }
        self.sent.lock().unwrap().push(invitation.clone());
        Ok(())
    }
}

fn admin() -> RequestContext {
    RequestContext::new("admin@example.org", Role::Admin).at(1_000)
}

fn reviewer(email: &str) -> RequestContext {
    RequestContext::new(email, Role::Reviewer).at(2_000)
}

fn keyword_config(keywords: &[&str]) -> ScreeningConfig {
    let mut config = ScreeningConfig::default();
    config.highlight.keywords = keywords.iter().map(|k| k.to_string()).collect();
    config
}

fn store_with<'c>(
    conn: &'c Connection,
    config: &ScreeningConfig,
    classifier: Arc<dyn RelevanceClassifier>,
) -> RecordStore<SqliteRecordRepository<'c>> {
    let repo = SqliteRecordRepository::try_new(conn).unwrap();
    RecordStore::from_config(repo, config, classifier).unwrap()
}

fn keyword_store<'c>(
    conn: &'c Connection,
    keywords: &[&str],
) -> RecordStore<SqliteRecordRepository<'c>> {
    let config = keyword_config(keywords);
    let classifier = KeywordClassifier::new(&config.highlight.keywords).unwrap();
    store_with(conn, &config, Arc::new(classifier))
}

fn batch(titles: &[&str]) -> IngestBatch {
    IngestBatch {
        drafts: titles
            .iter()
            .map(|title| RecordDraft::new(*title, format!("abstract of {title}")))
            .collect(),
        malformed: Vec::new(),
    }
}

fn include(record: &Record) -> DecisionRequest {
    DecisionRequest::from_unscreened(record.uuid, Decision::Included, None)
}

fn exclude(record: &Record, reason: &str) -> DecisionRequest {
    DecisionRequest::from_unscreened(record.uuid, Decision::Excluded, Some(reason.to_string()))
}

fn titles(records: &[Record]) -> Vec<String> {
    records.iter().map(|record| record.title.clone()).collect()
}

#[test]
fn ingest_drops_duplicates_within_batch_and_against_stored_records() {
    let conn = open_db_in_memory().unwrap();
    let store = keyword_store(&conn, &[]);
    let project = store.create_project(&admin(), "Statins").unwrap();

    let first = store
        .ingest_batch(project.uuid, batch(&["Alpha", "Beta", "  alpha "]))
        .unwrap();
    assert_eq!(first.identified, 3);
    assert_eq!(first.duplicates, 1);
    assert_eq!(titles(&first.stored), vec!["Alpha", "Beta"]);

    let raw = normalize_raw_records(vec![
        RawRecord {
            title: Some("BETA".to_string()),
            ..RawRecord::default()
        },
        RawRecord {
            title: Some("Gamma".to_string()),
            ..RawRecord::default()
        },
        RawRecord::default(),
    ]);
    let second = store.ingest_batch(project.uuid, raw).unwrap();
    assert_eq!(second.identified, 2);
    assert_eq!(second.duplicates, 1);
    assert_eq!(second.malformed, 1);
    assert_eq!(titles(&second.stored), vec!["Gamma"]);
    assert_eq!(second.stored[0].ordinal, 2);

    let set = store.record_set(project.uuid).unwrap();
    assert_eq!(titles(&set), vec!["Alpha", "Beta", "Gamma"]);

    let prisma = store.prisma_counts(project.uuid).unwrap();
    assert_eq!(prisma.identified, 5);
    assert_eq!(prisma.duplicates_removed, 2);
    assert_eq!(prisma.malformed_skipped, 1);
    assert_eq!(prisma.screened, 3);
    assert_eq!(prisma.unscreened, 3);
}

#[test]
fn second_decision_on_same_record_is_a_conflict() {
    let conn = open_db_in_memory().unwrap();
    let store = keyword_store(&conn, &[]);
    let project = store.create_project(&admin(), "Statins").unwrap();
    let record = store
        .ingest_batch(project.uuid, batch(&["Alpha"]))
        .unwrap()
        .stored
        .remove(0);

    let decided = store
        .assign_decision(&reviewer("r1@example.org"), project.uuid, exclude(&record, " off topic "))
        .unwrap();
    assert_eq!(decided.decision, Decision::Excluded);
    assert_eq!(decided.reason.as_deref(), Some("off topic"));
    assert_eq!(decided.reviewer_id.as_deref(), Some("r1@example.org"));

    let err = store
        .assign_decision(&reviewer("r2@example.org"), project.uuid, include(&record))
        .unwrap_err();
    match err {
        ScreeningError::DecisionConflict { current } => {
            assert_eq!(current.decision, Decision::Excluded);
            assert_eq!(current.reviewer_id.as_deref(), Some("r1@example.org"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let stored = store.get_record(project.uuid, record.uuid).unwrap();
    assert_eq!(stored, decided);
}

#[test]
fn decided_prior_state_is_an_invalid_transition() {
    let conn = open_db_in_memory().unwrap();
    let store = keyword_store(&conn, &[]);
    let project = store.create_project(&admin(), "Statins").unwrap();
    let record = store
        .ingest_batch(project.uuid, batch(&["Alpha"]))
        .unwrap()
        .stored
        .remove(0);

    let request = DecisionRequest {
        record_id: record.uuid,
        expected_prior: Decision::Included,
        new_decision: Decision::Excluded,
        reason: None,
    };
    let err = store
        .assign_decision(&reviewer("r1@example.org"), project.uuid, request)
        .unwrap_err();
    assert!(matches!(err, ScreeningError::InvalidTransition { .. }));
}

#[test]
fn unknown_record_is_not_found() {
    let conn = open_db_in_memory().unwrap();
    let store = keyword_store(&conn, &[]);
    let project = store.create_project(&admin(), "Statins").unwrap();
    let ghost = Record::from_draft(RecordDraft::new("Ghost", ""), 0);

    let err = store
        .assign_decision(&reviewer("r1@example.org"), project.uuid, include(&ghost))
        .unwrap_err();
    assert!(matches!(err, ScreeningError::RecordNotFound(id) if id == ghost.uuid));
}

#[test]
fn concurrent_reviewers_racing_on_one_record_have_exactly_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.db");

    let (project_id, record_id) = {
        let conn = open_db(&path).unwrap();
        let store = keyword_store(&conn, &[]);
        let project = store.create_project(&admin(), "Race").unwrap();
        let record = store
            .ingest_batch(project.uuid, batch(&["Contested"]))
            .unwrap()
            .stored
            .remove(0);
        (project.uuid, record.uuid)
    };

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [
        ("r1@example.org", Decision::Included),
        ("r2@example.org", Decision::Excluded),
    ]
    .into_iter()
    .map(|(email, decision)| {
        let barrier = Arc::clone(&barrier);
        let path = path.clone();
        thread::spawn(move || {
            let conn = open_db(&path).unwrap();
            let store = keyword_store(&conn, &[]);
            barrier.wait();
            let result = store.assign_decision(
                &reviewer(email),
                project_id,
                DecisionRequest::from_unscreened(record_id, decision, None),
            );
            result.map(|record| record.decision).map_err(|err| match err {
                ScreeningError::DecisionConflict { current } => current.decision,
                other => panic!("unexpected error: {other}"),
            })
        })
    })
    .collect();

    let outcomes: Vec<Result<Decision, Decision>> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<Decision> = outcomes.iter().filter_map(|o| o.ok()).collect();
    let losers: Vec<Decision> = outcomes.iter().filter_map(|o| o.err()).collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(losers, winners);

    let conn = open_db(&path).unwrap();
    let store = keyword_store(&conn, &[]);
    let stored = store.get_record(project_id, record_id).unwrap();
    assert_eq!(stored.decision, winners[0]);
    let progress = store.progress(project_id).unwrap();
    assert_eq!(progress.percent_complete, 100.0);
}

#[test]
fn progress_tracks_decisions() {
    let conn = open_db_in_memory().unwrap();
    let store = keyword_store(&conn, &[]);
    let project = store.create_project(&admin(), "Statins").unwrap();
    let stored = store
        .ingest_batch(project.uuid, batch(&["A", "B", "C", "D"]))
        .unwrap()
        .stored;

    assert_eq!(store.progress(project.uuid).unwrap().percent_complete, 0.0);
    store
        .assign_decision(&reviewer("r@example.org"), project.uuid, include(&stored[0]))
        .unwrap();
    store
        .assign_decision(&reviewer("r@example.org"), project.uuid, exclude(&stored[1], "no"))
        .unwrap();

    let progress = store.progress(project.uuid).unwrap();
    assert_eq!(progress.total, 4);
    assert_eq!(progress.included, 1);
    assert_eq!(progress.excluded, 1);
    assert_eq!(progress.unscreened, 2);
    assert_eq!(progress.percent_complete, 50.0);
    assert_eq!(
        store.next_record(project.uuid).unwrap().map(|r| r.title),
        Some("C".to_string())
    );
}

#[test]
fn re_review_after_replace_surfaces_a_conflict() {
    let conn = open_db_in_memory().unwrap();
    let store = keyword_store(&conn, &[]);
    let project = store.create_project(&admin(), "Statins").unwrap();
    let stored = store
        .ingest_batch(project.uuid, batch(&["Alpha", "Beta"]))
        .unwrap()
        .stored;

    store
        .assign_decision(&reviewer("r1@example.org"), project.uuid, include(&stored[0]))
        .unwrap();
    store
        .assign_decision(&reviewer("r1@example.org"), project.uuid, include(&stored[1]))
        .unwrap();
    assert!(store.conflicts(project.uuid).unwrap().is_empty());

    // Second review round: the admin resets the set to unscreened.
    let reset: Vec<Record> = stored
        .iter()
        .map(|record| {
            Record::with_id(
                record.uuid,
                RecordDraft::new(record.title.clone(), record.abstract_text.clone()),
                record.ordinal,
            )
        })
        .collect();
    store.replace_record_set(&admin(), project.uuid, &reset).unwrap();

    store
        .assign_decision(&reviewer("r2@example.org"), project.uuid, exclude(&reset[0], "dose"))
        .unwrap();
    store
        .assign_decision(&reviewer("r2@example.org"), project.uuid, include(&reset[1]))
        .unwrap();

    let conflicts = store.conflicts(project.uuid).unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].dedup_key, "alpha");
    let reviewers: Vec<&str> = conflicts[0]
        .entries
        .iter()
        .map(|entry| entry.reviewer_id.as_str())
        .collect();
    assert_eq!(reviewers, vec!["r1@example.org", "r2@example.org"]);
}

#[test]
fn failed_replace_leaves_the_record_set_untouched() {
    let conn = open_db_in_memory().unwrap();
    let store = keyword_store(&conn, &[]);
    let project = store.create_project(&admin(), "Statins").unwrap();
    let before = store
        .ingest_batch(project.uuid, batch(&["Alpha", "Beta"]))
        .unwrap()
        .stored;

    let twin = Record::from_draft(RecordDraft::new("Gamma", ""), 0);
    let mut clash = twin.clone();
    clash.ordinal = 1;
    store
        .replace_record_set(&admin(), project.uuid, &[twin, clash])
        .unwrap_err();

    assert_eq!(store.record_set(project.uuid).unwrap(), before);
}

#[test]
fn reviewers_cannot_replace_record_sets() {
    let conn = open_db_in_memory().unwrap();
    let store = keyword_store(&conn, &[]);
    let project = store.create_project(&admin(), "Statins").unwrap();
    let err = store
        .replace_record_set(&reviewer("r@example.org"), project.uuid, &[])
        .unwrap_err();
    assert!(matches!(err, ScreeningError::Forbidden { .. }));
}

#[test]
fn ranking_waits_for_enough_labels_then_orders_by_relevance() {
    let conn = open_db_in_memory().unwrap();
    let store = keyword_store(&conn, &["randomized", "placebo"]);
    let project = store.create_project(&admin(), "Statins").unwrap();

    let labeled: Vec<String> = (0..10).map(|idx| format!("Labeled {idx}")).collect();
    let mut titles_in: Vec<&str> = labeled.iter().map(String::as_str).collect();
    titles_in.extend(["Case report", "Randomized trial", "Randomized placebo trial"]);
    let stored = store.ingest_batch(project.uuid, batch(&titles_in)).unwrap().stored;

    for record in stored.iter().take(9) {
        store
            .assign_decision(&reviewer("r@example.org"), project.uuid, include(record))
            .unwrap();
    }
    let early = store.next_records(project.uuid).unwrap();
    assert!(!early.ranked);
    assert_eq!(early.labeled_count, 9);
    assert_eq!(
        titles(&early.records)[1..],
        ["Case report", "Randomized trial", "Randomized placebo trial"]
    );
    assert!(early.records.iter().all(|r| r.relevance_score.is_none()));

    store
        .assign_decision(&reviewer("r@example.org"), project.uuid, include(&stored[9]))
        .unwrap();
    let ranked = store.next_records(project.uuid).unwrap();
    assert!(ranked.ranked);
    assert_eq!(
        titles(&ranked.records),
        vec!["Randomized placebo trial", "Randomized trial", "Case report"]
    );
    assert_eq!(ranked.records[0].relevance_score, Some(1.0));
}

#[test]
fn classifier_failure_falls_back_to_original_order() {
    let conn = open_db_in_memory().unwrap();
    let mut config = ScreeningConfig::default();
    config.ranking.min_labeled = 1;
    let store = store_with(&conn, &config, Arc::new(BrokenClassifier));
    let project = store.create_project(&admin(), "Statins").unwrap();
    let stored = store
        .ingest_batch(project.uuid, batch(&["A", "B", "C"]))
        .unwrap()
        .stored;
    store
        .assign_decision(&reviewer("r@example.org"), project.uuid, include(&stored[0]))
        .unwrap();

    let queue = store.next_records(project.uuid).unwrap();
    assert!(!queue.ranked);
    assert!(matches!(
        queue.unavailable,
        Some(RankingUnavailable::ClassifierFailed(_))
    ));
    assert_eq!(titles(&queue.records), vec!["B", "C"]);
}

#[test]
fn share_token_resolves_until_rotated() {
    let conn = open_db_in_memory().unwrap();
    let store = keyword_store(&conn, &[]);
    let project = store.create_project(&admin(), "Statins").unwrap();
    assert_eq!(project.share_token.len(), 32);

    let found = store
        .find_project_by_share_token(&project.share_token)
        .unwrap()
        .unwrap();
    assert_eq!(found.uuid, project.uuid);

    let rotated = store.rotate_share_token(&admin(), project.uuid).unwrap();
    assert_ne!(rotated, project.share_token);
    assert!(store
        .find_project_by_share_token(&project.share_token)
        .unwrap()
        .is_none());
    assert!(store.find_project_by_share_token(&rotated).unwrap().is_some());

    let err = store
        .rotate_share_token(&reviewer("r@example.org"), project.uuid)
        .unwrap_err();
    assert!(matches!(err, ScreeningError::Forbidden { .. }));
}

#[test]
fn highlight_and_export_use_the_live_record_set() {
    let conn = open_db_in_memory().unwrap();
    let store = keyword_store(&conn, &["statin"]);
    let project = store.create_project(&admin(), "Statins").unwrap();
    let record = store
        .ingest_batch(project.uuid, batch(&["Statin therapy"]))
        .unwrap()
        .stored
        .remove(0);

    let highlighted = store.highlight_record(project.uuid, record.uuid).unwrap();
    assert_eq!(highlighted.title_spans.len(), 1);
    assert_eq!(highlighted.title_spans[0].start, 0);
    assert_eq!(highlighted.title_spans[0].end, 6);
    assert_eq!(highlighted.abstract_spans.len(), 1);
    assert_eq!(highlighted.abstract_spans[0].keyword, "statin");

    store
        .assign_decision(&reviewer("r@example.org"), project.uuid, include(&record))
        .unwrap();
    let mut csv_out = Vec::new();
    store.export_csv(project.uuid, &mut csv_out).unwrap();
    let csv_text = String::from_utf8(csv_out).unwrap();
    assert!(csv_text.contains("Statin therapy,abstract of Statin therapy,,,,included,,r@example.org"));

    let mut ris_out = Vec::new();
    store.export_ris(project.uuid, &mut ris_out).unwrap();
    let ris_text = String::from_utf8(ris_out).unwrap();
    assert!(ris_text.contains("N1  - Decision: included; Reviewer: r@example.org"));
}

#[test]
fn missing_project_is_reported() {
    let conn = open_db_in_memory().unwrap();
    let store = keyword_store(&conn, &[]);
    let ghost = uuid::Uuid::new_v4();
    assert!(matches!(
        store.progress(ghost).unwrap_err(),
        ScreeningError::ProjectNotFound(id) if id == ghost
    ));
    assert!(matches!(
        store.ingest_batch(ghost, batch(&["A"])).unwrap_err(),
        ScreeningError::ProjectNotFound(_)
    ));
}

#[test]
fn hand_built_batch_with_blank_title_is_skipped_not_fatal() {
    let conn = open_db_in_memory().unwrap();
    let store = keyword_store(&conn, &[]);
    let project = store.create_project(&admin(), "Statins").unwrap();

    let report = store
        .ingest_batch(project.uuid, batch(&["Good", "   "]))
        .unwrap();
    assert_eq!(titles(&report.stored), vec!["Good"]);
    assert_eq!(report.identified, 1);
    assert_eq!(report.malformed, 1);

    let prisma = store.prisma_counts(project.uuid).unwrap();
    assert_eq!(prisma.identified, 1);
    assert_eq!(prisma.malformed_skipped, 1);
}

#[test]
fn replace_rejects_two_records_with_one_dedup_key() {
    let conn = open_db_in_memory().unwrap();
    let store = keyword_store(&conn, &[]);
    let project = store.create_project(&admin(), "Statins").unwrap();
    let before = store
        .ingest_batch(project.uuid, batch(&["Alpha"]))
        .unwrap()
        .stored;

    let first = Record::from_draft(RecordDraft::new("Gamma", ""), 0);
    let second = Record::from_draft(RecordDraft::new("  GAMMA ", ""), 1);
    let err = store
        .replace_record_set(&admin(), project.uuid, &[first, second])
        .unwrap_err();
    assert!(matches!(
        err,
        ScreeningError::Repo(RepoError::AlreadyExists(_))
    ));
    assert_eq!(store.record_set(project.uuid).unwrap(), before);
}

#[test]
fn reviewer_identity_is_stored_normalized() {
    let conn = open_db_in_memory().unwrap();
    let store = keyword_store(&conn, &[]);
    let project = store.create_project(&admin(), "Statins").unwrap();
    let record = store
        .ingest_batch(project.uuid, batch(&["Alpha"]))
        .unwrap()
        .stored
        .remove(0);

    let decided = store
        .assign_decision(&reviewer(" Ada@Example.ORG "), project.uuid, include(&record))
        .unwrap();
    assert_eq!(decided.reviewer_id.as_deref(), Some("ada@example.org"));
}

#[test]
fn projects_are_listed_by_name() {
    let conn = open_db_in_memory().unwrap();
    let store = keyword_store(&conn, &[]);
    assert!(store.list_projects().unwrap().is_empty());

    store.create_project(&admin(), "Statins").unwrap();
    store.create_project(&admin(), "Antibiotics").unwrap();
    let names: Vec<String> = store
        .list_projects()
        .unwrap()
        .into_iter()
        .map(|project| project.name)
        .collect();
    assert_eq!(names, vec!["Antibiotics", "Statins"]);
}

#[test]
fn admins_invite_collaborators_with_the_share_token() {
    let conn = open_db_in_memory().unwrap();
    let store = keyword_store(&conn, &[]);
    let project = store.create_project(&admin(), "Statins").unwrap();
    let outbox = Outbox::default();

    let invitation = store
        .invite_collaborator(&admin(), project.uuid, " Bob@Example.org ", &outbox)
        .unwrap();
    assert_eq!(invitation.invitee_email, "bob@example.org");
    assert_eq!(invitation.project_name, "Statins");
    assert_eq!(invitation.share_token, project.share_token);
    assert_eq!(invitation.invited_by, "admin@example.org");
    assert_eq!(outbox.sent.lock().unwrap().as_slice(), &[invitation]);

    let forbidden = store
        .invite_collaborator(&reviewer("r@example.org"), project.uuid, "c@example.org", &outbox)
        .unwrap_err();
    assert!(matches!(forbidden, ScreeningError::Forbidden { .. }));
    let invalid = store
        .invite_collaborator(&admin(), project.uuid, "not an email", &outbox)
        .unwrap_err();
    assert!(matches!(invalid, ScreeningError::InvalidInput(_)));
    let missing = store
        .invite_collaborator(&admin(), uuid::Uuid::new_v4(), "c@example.org", &outbox)
        .unwrap_err();
    assert!(matches!(missing, ScreeningError::ProjectNotFound(_)));
    assert_eq!(outbox.sent.lock().unwrap().len(), 1);

    let offline = Outbox {
        offline: true,
        ..Outbox::default()
    };
    let undelivered = store
        .invite_collaborator(&admin(), project.uuid, "c@example.org", &offline)
        .unwrap_err();
    assert!(matches!(
        undelivered,
        ScreeningError::Invitation(IdentityError::Unavailable(_))
    ));
}
