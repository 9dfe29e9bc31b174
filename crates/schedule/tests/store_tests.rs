//! Store-level tests for the approval workflow invariants.
use schedule::{
    propose_candidate, Capability, CommentChannel, ProposalRequest, ScheduleDb, ScheduleError,
    ScheduleProposer, SessionContext,
};
use serde_json::json;

fn open_db(dir: &tempfile::TempDir) -> ScheduleDb {
    ScheduleDb::open_or_create(&dir.path().join("schedule.db")).unwrap()
}

fn scheduler() -> SessionContext {
    SessionContext::new("sched-1", [Capability::Scheduler])
}

fn committee() -> SessionContext {
    SessionContext::new("comm-1", [Capability::LoadCommittee])
}

fn faculty() -> SessionContext {
    SessionContext::new("fac-1", [Capability::Faculty])
}

fn student() -> SessionContext {
    SessionContext::new("stud-1", [Capability::Student])
}

fn sample_sections() -> serde_json::Value {
    json!([
        {
            "course_id": 201,
            "day_code": "S",
            "start_time": "08:00",
            "end_time": "09:00",
            "student_group": 1,
            "is_ai_generated": false
        },
        {
            "course_id": 305,
            "day_code": "T",
            "start_time": "10:00",
            "end_time": "12:00",
            "student_group": 1,
            "is_ai_generated": true
        }
    ])
}

#[test]
fn create_then_list_round_trips_sections() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let sections = sample_sections();

    let created = db
        .create_version(&scheduler(), 5, &sections, Some("first draft"), Some(42))
        .unwrap();
    assert_eq!(created.level, 5);
    assert!(!created.is_active);
    assert!(!created.scheduler_approved);
    assert!(!created.committee_approved);
    assert_eq!(created.student_count, Some(42));

    let listed = db.list_by_level(5).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].sections, sections);
}

#[test]
fn create_rejects_bad_input() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);

    let err = db
        .create_version(&scheduler(), 0, &sample_sections(), None, None)
        .unwrap_err();
    assert!(matches!(err, ScheduleError::InvalidInput(_)));

    let err = db
        .create_version(&scheduler(), 5, &json!({"not": "an array"}), None, None)
        .unwrap_err();
    assert!(matches!(err, ScheduleError::InvalidInput(_)));

    let err = db
        .create_version(&faculty(), 5, &sample_sections(), None, None)
        .unwrap_err();
    assert!(matches!(err, ScheduleError::Forbidden(Capability::Scheduler)));
}

#[test]
fn rename_validates_and_reports_missing() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let v = db
        .create_version(&scheduler(), 4, &sample_sections(), None, None)
        .unwrap();

    let renamed = db.rename_version(&v.id, "  final candidate  ").unwrap();
    assert_eq!(renamed.version_comment.as_deref(), Some("final candidate"));

    assert!(matches!(
        db.rename_version(&v.id, "   "),
        Err(ScheduleError::InvalidInput(_))
    ));
    assert!(matches!(
        db.rename_version("no-such-id", "name"),
        Err(ScheduleError::NotFound(_))
    ));
}

#[test]
fn committee_review_scenario_level_five() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let a = db
        .create_version(&scheduler(), 5, &sample_sections(), Some("A"), None)
        .unwrap();
    let b = db
        .create_version(&scheduler(), 5, &sample_sections(), Some("B"), None)
        .unwrap();

    let b = db.committee_review(&committee(), &b.id, true, "ok").unwrap();
    assert!(b.committee_approved);
    assert_eq!(b.committee_comment.as_deref(), Some("ok"));
    let a_after = db.get_version(&a.id).unwrap();
    assert!(!a_after.committee_approved);

    let b = db.activate_version(&scheduler(), &b.id).unwrap();
    assert!(b.is_active);
    assert!(!db.get_version(&a.id).unwrap().is_active);
}

#[test]
fn committee_approval_is_exclusive_per_level() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let ids: Vec<String> = (0..3)
        .map(|i| {
            db.create_version(&scheduler(), 6, &sample_sections(), Some(&format!("v{i}")), None)
                .unwrap()
                .id
        })
        .collect();
    // A version at a different level is untouched by level-6 reviews.
    let other = db
        .create_version(&scheduler(), 7, &sample_sections(), None, None)
        .unwrap();
    db.committee_review(&committee(), &other.id, true, "level 7 pick")
        .unwrap();

    for id in &ids {
        db.committee_review(&committee(), id, true, "approved").unwrap();
        let approved: Vec<_> = db
            .list_by_level(6)
            .unwrap()
            .into_iter()
            .filter(|v| v.committee_approved)
            .collect();
        assert_eq!(approved.len(), 1);
        assert_eq!(&approved[0].id, id);
    }
    assert!(db.get_version(&other.id).unwrap().committee_approved);
}

#[test]
fn committee_rejection_is_idempotent_and_local() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let a = db
        .create_version(&scheduler(), 5, &sample_sections(), None, None)
        .unwrap();
    let b = db
        .create_version(&scheduler(), 5, &sample_sections(), None, None)
        .unwrap();
    db.committee_review(&committee(), &a.id, true, "keep").unwrap();

    let b = db
        .committee_review(&committee(), &b.id, false, "clashes on Tuesday")
        .unwrap();
    assert!(!b.committee_approved);
    assert_eq!(b.committee_comment.as_deref(), Some("clashes on Tuesday"));

    let b = db
        .committee_review(&committee(), &b.id, false, "still clashes")
        .unwrap();
    assert!(!b.committee_approved);
    assert_eq!(b.committee_comment.as_deref(), Some("still clashes"));

    // Rejection never touches siblings.
    assert!(db.get_version(&a.id).unwrap().committee_approved);
}

#[test]
fn committee_review_requires_capability_and_existing_version() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let v = db
        .create_version(&scheduler(), 3, &sample_sections(), None, None)
        .unwrap();

    assert!(matches!(
        db.committee_review(&scheduler(), &v.id, true, "nope"),
        Err(ScheduleError::Forbidden(Capability::LoadCommittee))
    ));
    assert!(matches!(
        db.committee_review(&committee(), "missing", true, "x"),
        Err(ScheduleError::NotFound(_))
    ));
}

#[test]
fn rejecting_an_active_version_leaves_it_active() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let v = db
        .create_version(&scheduler(), 5, &sample_sections(), None, None)
        .unwrap();
    db.committee_review(&committee(), &v.id, true, "ok").unwrap();
    db.activate_version(&scheduler(), &v.id).unwrap();

    let v = db
        .committee_review(&committee(), &v.id, false, "second thoughts")
        .unwrap();
    assert!(v.is_active, "rejection does not clear the active flag");
    assert!(!v.committee_approved);
}

#[test]
fn activation_is_exclusive_under_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schedule.db");
    let db = ScheduleDb::open_or_create(&path).unwrap();
    let a = db
        .create_version(&scheduler(), 5, &sample_sections(), Some("A"), None)
        .unwrap();
    let b = db
        .create_version(&scheduler(), 5, &sample_sections(), Some("B"), None)
        .unwrap();
    drop(db);

    let spawn = |target: String, path: std::path::PathBuf| {
        std::thread::spawn(move || {
            let db = ScheduleDb::open_or_create(&path).unwrap();
            for _ in 0..20 {
                db.activate_version(&scheduler(), &target).unwrap();
            }
        })
    };
    let t1 = spawn(a.id.clone(), path.clone());
    let t2 = spawn(b.id.clone(), path.clone());
    t1.join().unwrap();
    t2.join().unwrap();

    let db = ScheduleDb::open_or_create(&path).unwrap();
    let active: Vec<_> = db
        .list_by_level(5)
        .unwrap()
        .into_iter()
        .filter(|v| v.is_active)
        .collect();
    assert_eq!(active.len(), 1, "exactly one version ends up active");
}

#[test]
fn delete_guards_the_active_version() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let v = db
        .create_version(&scheduler(), 5, &sample_sections(), None, None)
        .unwrap();
    db.activate_version(&scheduler(), &v.id).unwrap();

    let err = db.delete_version(&scheduler(), &v.id).unwrap_err();
    assert!(matches!(err, ScheduleError::Conflict(_)));
    assert!(db.get_version(&v.id).unwrap().is_active, "row unchanged");

    // Activate a replacement, then the old one can go.
    let replacement = db
        .create_version(&scheduler(), 5, &sample_sections(), None, None)
        .unwrap();
    db.activate_version(&scheduler(), &replacement.id).unwrap();
    db.delete_version(&scheduler(), &v.id).unwrap();
    assert!(matches!(
        db.get_version(&v.id),
        Err(ScheduleError::NotFound(_))
    ));
    assert!(matches!(
        db.delete_version(&scheduler(), &v.id),
        Err(ScheduleError::NotFound(_))
    ));
}

#[test]
fn pending_for_committee_includes_active_versions() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let forwarded = db
        .create_version(&scheduler(), 4, &sample_sections(), None, None)
        .unwrap();
    db.scheduler_approve(&scheduler(), &forwarded.id, true).unwrap();
    let active = db
        .create_version(&scheduler(), 5, &sample_sections(), None, None)
        .unwrap();
    db.activate_version(&scheduler(), &active.id).unwrap();
    // Plain drafts stay out of the committee list.
    db.create_version(&scheduler(), 5, &sample_sections(), None, None)
        .unwrap();

    let pending = db.list_pending_for_committee(&committee()).unwrap();
    let ids: Vec<_> = pending.iter().map(|v| v.id.as_str()).collect();
    assert_eq!(pending.len(), 2);
    assert!(ids.contains(&forwarded.id.as_str()));
    assert!(ids.contains(&active.id.as_str()));
}

#[test]
fn scheduler_approve_round_trips_and_withdraws() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let v = db
        .create_version(&scheduler(), 4, &sample_sections(), None, None)
        .unwrap();

    let v = db.scheduler_approve(&scheduler(), &v.id, true).unwrap();
    assert!(v.scheduler_approved);
    assert!(!v.is_active);
    assert!(!v.committee_approved);

    let v = db.scheduler_approve(&scheduler(), &v.id, false).unwrap();
    assert!(!v.scheduler_approved);

    assert!(matches!(
        db.scheduler_approve(&committee(), &v.id, true),
        Err(ScheduleError::Forbidden(Capability::Scheduler))
    ));
}

#[test]
fn approved_listing_and_active_schedule() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let l5 = db
        .create_version(&scheduler(), 5, &sample_sections(), None, None)
        .unwrap();
    let l6 = db
        .create_version(&scheduler(), 6, &sample_sections(), None, None)
        .unwrap();
    db.committee_review(&committee(), &l5.id, true, "ok").unwrap();
    db.committee_review(&committee(), &l6.id, true, "ok").unwrap();

    assert_eq!(db.list_approved(None).unwrap().len(), 2);
    let only_l5 = db.list_approved(Some(5)).unwrap();
    assert_eq!(only_l5.len(), 1);
    assert_eq!(only_l5[0].id, l5.id);

    // Students only see a schedule once it is both approved and active.
    assert!(db.active_schedule(5).unwrap().is_none());
    db.activate_version(&scheduler(), &l5.id).unwrap();
    assert_eq!(db.active_schedule(5).unwrap().unwrap().id, l5.id);
}

#[test]
fn comment_channels_are_separate_and_validated() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let v = db
        .create_version(&scheduler(), 5, &sample_sections(), None, None)
        .unwrap();

    db.add_student_comment(&student(), "s-100", &v.id, "Too many morning lectures")
        .unwrap();
    db.add_faculty_comment(&faculty(), &v.id, "Lab slot overlaps with CSC 340")
        .unwrap();

    let student_side = db
        .list_comments_for_version(&v.id, CommentChannel::Student)
        .unwrap();
    assert_eq!(student_side.len(), 1);
    assert_eq!(student_side[0].student_id.as_deref(), Some("s-100"));
    assert!(student_side[0].user_id.is_none());

    let faculty_side = db
        .list_comments_for_version(&v.id, CommentChannel::Faculty)
        .unwrap();
    assert_eq!(faculty_side.len(), 1);
    assert_eq!(faculty_side[0].user_id.as_deref(), Some("fac-1"));

    let mine = db.list_my_comments_for_version(&faculty(), &v.id).unwrap();
    assert_eq!(mine.len(), 1);
    let other_faculty = SessionContext::new("fac-2", [Capability::Faculty]);
    assert!(db
        .list_my_comments_for_version(&other_faculty, &v.id)
        .unwrap()
        .is_empty());

    assert!(matches!(
        db.add_student_comment(&student(), "s-100", &v.id, "   "),
        Err(ScheduleError::InvalidInput(_))
    ));
    assert!(matches!(
        db.add_student_comment(&student(), "s-100", &v.id, &"x".repeat(501)),
        Err(ScheduleError::InvalidInput(_))
    ));
    assert!(matches!(
        db.add_faculty_comment(&faculty(), &v.id, &"x".repeat(1001)),
        Err(ScheduleError::InvalidInput(_))
    ));
    assert!(matches!(
        db.add_faculty_comment(&faculty(), "missing-version", "text"),
        Err(ScheduleError::NotFound(_))
    ));
    assert!(matches!(
        db.add_faculty_comment(&student(), &v.id, "text"),
        Err(ScheduleError::Forbidden(Capability::Faculty))
    ));
}

#[test]
fn comments_are_removed_with_their_version() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let v = db
        .create_version(&scheduler(), 5, &sample_sections(), None, None)
        .unwrap();
    let c = db
        .add_faculty_comment(&faculty(), &v.id, "note")
        .unwrap();
    db.delete_version(&scheduler(), &v.id).unwrap();
    assert!(matches!(
        db.get_comment(&c.id),
        Err(ScheduleError::NotFound(_))
    ));
}

#[test]
fn rules_crud() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);

    let rule = db
        .add_rule(&scheduler(), " No lectures between 12:00 and 13:00 ")
        .unwrap();
    assert_eq!(rule.text, "No lectures between 12:00 and 13:00");
    assert_eq!(db.list_rules().unwrap().len(), 1);

    assert!(matches!(
        db.add_rule(&scheduler(), "  "),
        Err(ScheduleError::InvalidInput(_))
    ));
    assert!(matches!(
        db.add_rule(&faculty(), "rule"),
        Err(ScheduleError::Forbidden(Capability::Scheduler))
    ));

    db.delete_rule(&scheduler(), &rule.rule_id).unwrap();
    assert!(matches!(
        db.delete_rule(&scheduler(), &rule.rule_id),
        Err(ScheduleError::NotFound(_))
    ));
}

struct StaticProposer(std::result::Result<serde_json::Value, String>);

impl ScheduleProposer for StaticProposer {
    fn propose(&self, _request: &ProposalRequest) -> std::result::Result<serde_json::Value, String> {
        self.0.clone()
    }
}

struct CapturingProposer;

impl ScheduleProposer for CapturingProposer {
    fn propose(&self, request: &ProposalRequest) -> std::result::Result<serde_json::Value, String> {
        assert_eq!(request.level, 5);
        assert_eq!(request.constraints.len(), 1);
        assert_eq!(request.command, "move CSC 340 to Thursday");
        Ok(request.current_sections.clone())
    }
}

#[test]
fn proposer_receives_rules_and_sections() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    db.add_rule(&scheduler(), "No lectures after 15:00").unwrap();
    let v = db
        .create_version(&scheduler(), 5, &sample_sections(), None, None)
        .unwrap();

    let candidate = propose_candidate(
        &db,
        &CapturingProposer,
        &scheduler(),
        &v.id,
        "move CSC 340 to Thursday",
    )
    .unwrap();
    assert_eq!(candidate, sample_sections());
}

#[test]
fn failed_proposal_surfaces_and_preserves_versions() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let v = db
        .create_version(&scheduler(), 5, &sample_sections(), Some("saved"), None)
        .unwrap();

    let proposer = StaticProposer(Err("model returned malformed JSON".into()));
    let err = propose_candidate(&db, &proposer, &scheduler(), &v.id, "regenerate").unwrap_err();
    assert!(matches!(err, ScheduleError::UpstreamGenerationFailed(_)));

    // The stored version is untouched by the failure.
    let reread = db.get_version(&v.id).unwrap();
    assert_eq!(reread.sections, sample_sections());
    assert_eq!(reread.version_comment.as_deref(), Some("saved"));

    assert!(matches!(
        propose_candidate(&db, &StaticProposer(Ok(json!([]))), &scheduler(), "missing", ""),
        Err(ScheduleError::NotFound(_))
    ));
    assert!(matches!(
        propose_candidate(&db, &StaticProposer(Ok(json!([]))), &faculty(), &v.id, ""),
        Err(ScheduleError::Forbidden(Capability::Scheduler))
    ));
}
